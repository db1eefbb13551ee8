//! Compute programs
//!
//! A [`ComputeProgram`] owns one compute pipeline, the binding-set layout
//! and allocated binding-set instance it dispatches with, and the packed
//! uniform block pushed before every dispatch. Programs are constructed
//! from an explicit [`ProgramInterface`] (or looked up by name in a
//! registry for the legacy path), bind resources and parameters by name,
//! and append their work to whatever encoder the pass graph is recording
//! into.

use std::sync::Arc;

use ash::vk;

use crate::binding::BindingList;
use crate::context::{ComputeEncoder, FrameworkContext, GpuTexture};
use crate::error::{ComputeError, CrateResult};
use crate::interface::{InterfaceRegistry, ProgramInterface};
use crate::uniform::UniformBlock;

/// One GPU compute pipeline plus its binding set and uniform block
pub struct ComputeProgram {
    framework: Arc<dyn FrameworkContext>,
    shader: String,
    bindings: BindingList,
    block: UniformBlock,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    binding_set: vk::DescriptorSet,
    pipeline: Option<vk::Pipeline>,
    /// Raw image handle currently bound to each slot, remembered for
    /// barrier insertion by the caller.
    bound_images: Vec<Option<vk::Image>>,
    uniforms_dirty: bool,
    bindings_dirty: bool,
}

impl std::fmt::Debug for ComputeProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeProgram")
            .field("shader", &self.shader)
            .field("bindings", &self.bindings)
            .field("block", &self.block)
            .field("set_layout", &self.set_layout)
            .field("pipeline_layout", &self.pipeline_layout)
            .field("binding_set", &self.binding_set)
            .field("pipeline", &self.pipeline)
            .field("bound_images", &self.bound_images)
            .field("uniforms_dirty", &self.uniforms_dirty)
            .field("bindings_dirty", &self.bindings_dirty)
            .finish()
    }
}

impl ComputeProgram {
    /// Build a program for `shader` with an explicit interface.
    ///
    /// Creates the binding-set layout, the pipeline layout (with a
    /// push-constant range only when the uniform list is non-empty), and
    /// allocates one binding set from the framework's shared pool. The
    /// pipeline itself is *not* created here; call
    /// [`create_pipeline`](Self::create_pipeline) once every program's
    /// layout exists, so a shared pool can be sized from the full set of
    /// layouts first.
    ///
    /// After construction the `set_*` calls are valid in any order;
    /// dispatching is not until `create_pipeline` has run.
    pub fn new(
        framework: Arc<dyn FrameworkContext>,
        shader: impl Into<String>,
        interface: ProgramInterface,
    ) -> CrateResult<Self> {
        let shader = shader.into();
        let ProgramInterface { uniforms, bindings } = interface;

        let set_layout = framework.create_binding_set_layout(&bindings)?;
        let pipeline_layout = match framework.create_pipeline_layout(set_layout, uniforms.total_size())
        {
            Ok(layout) => layout,
            Err(err) => {
                framework.destroy_binding_set_layout(set_layout);
                return Err(err);
            }
        };
        let binding_set = match framework.allocate_binding_set(set_layout) {
            Ok(set) => set,
            Err(err) => {
                framework.destroy_pipeline_layout(pipeline_layout);
                framework.destroy_binding_set_layout(set_layout);
                return Err(err);
            }
        };

        let bound_images = vec![None; bindings.len()];
        let block = UniformBlock::new(shader.clone(), uniforms);

        Ok(Self {
            framework,
            shader,
            bindings,
            block,
            set_layout,
            pipeline_layout,
            binding_set,
            pipeline: None,
            bound_images,
            uniforms_dirty: false,
            bindings_dirty: false,
        })
    }

    /// Legacy path: look the interface up by exact program name.
    ///
    /// An unregistered name produces a program with an empty interface, so
    /// the mistake surfaces as an unknown-slot error on the first bind.
    pub fn from_registry(
        framework: Arc<dyn FrameworkContext>,
        shader: impl Into<String>,
        registry: &InterfaceRegistry,
    ) -> CrateResult<Self> {
        let shader = shader.into();
        let interface = registry.lookup(&shader);
        Self::new(framework, shader, interface)
    }

    /// Logical shader name this program was built for
    pub fn shader(&self) -> &str {
        &self.shader
    }

    /// Load the program's shader and create its compute pipeline.
    ///
    /// Deferred past construction so all binding-set layouts exist before
    /// anything that depends on them. Calling it again replaces the
    /// pipeline (used when a shader is reloaded).
    pub fn create_pipeline(&mut self) -> CrateResult<()> {
        let pipeline = self
            .framework
            .create_compute_pipeline(self.pipeline_layout, &self.shader)?;
        if let Some(old) = self.pipeline.replace(pipeline) {
            self.framework.destroy_pipeline(old);
        }
        Ok(())
    }

    /// Bind `texture` to the slot named `slot_name`.
    ///
    /// The descriptor write happens immediately, not at dispatch time.
    /// An unknown slot name is a configuration error: ignoring it would
    /// desynchronize the binding set from the shader's expectation.
    ///
    /// `kernel_index` is reserved for multi-entry-point programs and is
    /// currently ignored.
    pub fn set_texture(
        &mut self,
        kernel_index: u32,
        slot_name: &str,
        texture: &GpuTexture,
    ) -> CrateResult<()> {
        let _ = kernel_index;
        let slot = self
            .bindings
            .find(slot_name)
            .ok_or_else(|| ComputeError::UnknownBindingSlot {
                program: self.shader.clone(),
                name: slot_name.to_owned(),
            })?;
        self.framework
            .write_image_binding(self.binding_set, slot, texture);
        self.bound_images[slot.slot as usize] = Some(texture.image);
        self.bindings_dirty = true;
        Ok(())
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> CrateResult<()> {
        self.block.set_f32(name, value)?;
        self.uniforms_dirty = true;
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> CrateResult<()> {
        self.block.set_i32(name, value)?;
        self.uniforms_dirty = true;
        Ok(())
    }

    pub fn set_float2(&mut self, name: &str, x: f32, y: f32) -> CrateResult<()> {
        self.block.set_vec2(name, x, y)?;
        self.uniforms_dirty = true;
        Ok(())
    }

    /// Record this program's work: push constants (when the block is
    /// non-empty), pipeline and binding-set binds, then the dispatch.
    ///
    /// This is the steady-state hot path; it performs no allocation and
    /// creates no resources. Dispatch order within one encoder is exactly
    /// call order, so the caller is responsible for issuing dispatches in
    /// data-dependency order.
    ///
    /// `kernel_index` and `frame_index` are reserved and currently unused.
    pub fn dispatch(
        &self,
        encoder: &mut dyn ComputeEncoder,
        kernel_index: u32,
        frame_index: u32,
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    ) -> CrateResult<()> {
        let _ = (kernel_index, frame_index);
        let pipeline = self
            .pipeline
            .ok_or_else(|| ComputeError::PipelineNotCreated(self.shader.clone()))?;

        if !self.block.is_empty() {
            encoder.push_constants(self.pipeline_layout, self.block.bytes());
        }
        encoder.bind_pipeline(pipeline);
        encoder.bind_binding_set(self.pipeline_layout, self.binding_set);
        encoder.dispatch(groups_x, groups_y, groups_z);
        Ok(())
    }

    /// The image currently bound to `slot_name`, if any
    pub fn bound_image(&self, slot_name: &str) -> Option<vk::Image> {
        let slot = self.bindings.find(slot_name)?;
        self.bound_images[slot.slot as usize]
    }

    /// Current uniform values as pushed to the GPU
    pub fn uniform_block(&self) -> &UniformBlock {
        &self.block
    }

    pub fn bindings(&self) -> &BindingList {
        &self.bindings
    }

    pub fn binding_set(&self) -> vk::DescriptorSet {
        self.binding_set
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// True once a `set_*` call changed state since the last
    /// [`clear_dirty`](Self::clear_dirty)
    pub fn dirty(&self) -> bool {
        self.uniforms_dirty || self.bindings_dirty
    }

    /// True when a bound resource changed (dispatch topology), as opposed
    /// to a parameter value
    pub fn bindings_dirty(&self) -> bool {
        self.bindings_dirty
    }

    pub fn clear_dirty(&mut self) {
        self.uniforms_dirty = false;
        self.bindings_dirty = false;
    }
}

impl Drop for ComputeProgram {
    fn drop(&mut self) {
        // Teardown order matters: pipeline, then pipeline layout, then
        // binding-set layout. The binding set itself returns with the pool.
        if let Some(pipeline) = self.pipeline.take() {
            self.framework.destroy_pipeline(pipeline);
        }
        self.framework.destroy_pipeline_layout(self.pipeline_layout);
        self.framework.destroy_binding_set_layout(self.set_layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingKind;
    use crate::capture::{stub_texture, CaptureEncoder, CaptureFramework, CapturedCommand, Released};
    use crate::uniform::{UniformSet, UniformType};

    fn two_image_interface() -> ProgramInterface {
        ProgramInterface::new(
            UniformSet::empty(),
            BindingList::new()
                .push("in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
                .push("out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
        )
    }

    #[test]
    fn dispatch_before_create_pipeline_fails() {
        let framework = Arc::new(CaptureFramework::new());
        let program =
            ComputeProgram::new(framework, "advect", two_image_interface()).unwrap();

        let mut encoder = CaptureEncoder::new();
        let err = program
            .dispatch(&mut encoder, 0, 0, 4, 4, 1)
            .unwrap_err();
        assert!(matches!(err, ComputeError::PipelineNotCreated(name) if name == "advect"));
        assert!(encoder.commands.is_empty());
    }

    #[test]
    fn unknown_slot_fails_and_leaves_binding_set_untouched() {
        let framework = Arc::new(CaptureFramework::new());
        let mut program =
            ComputeProgram::new(framework.clone(), "advect", two_image_interface()).unwrap();

        let err = program
            .set_texture(0, "doesNotExist", &stub_texture(7))
            .unwrap_err();
        assert!(matches!(
            err,
            ComputeError::UnknownBindingSlot { program, name }
                if program == "advect" && name == "doesNotExist"
        ));
        assert!(framework.binding_set_contents(program.binding_set()).is_empty());
        assert!(!program.dirty());
    }

    #[test]
    fn set_texture_is_idempotent() {
        let framework = Arc::new(CaptureFramework::new());
        let mut program =
            ComputeProgram::new(framework.clone(), "advect", two_image_interface()).unwrap();

        let texture = stub_texture(42);
        program.set_texture(0, "in", &texture).unwrap();
        let once = framework.binding_set_contents(program.binding_set());

        program.set_texture(0, "in", &texture).unwrap();
        let twice = framework.binding_set_contents(program.binding_set());

        assert_eq!(once, twice);
        assert_eq!(program.bound_image("in"), Some(texture.image));
    }

    #[test]
    fn empty_uniforms_push_nothing() {
        let framework = Arc::new(CaptureFramework::new());
        let mut program =
            ComputeProgram::new(framework.clone(), "advect", two_image_interface()).unwrap();
        program.create_pipeline().unwrap();
        program.set_texture(0, "in", &stub_texture(1)).unwrap();
        program.set_texture(0, "out", &stub_texture(2)).unwrap();

        let mut encoder = CaptureEncoder::new();
        program.dispatch(&mut encoder, 0, 0, 4, 4, 1).unwrap();

        assert_eq!(encoder.dispatch_count(), 1);
        assert_eq!(encoder.push_constant_count(), 0);
        assert_eq!(encoder.dispatches(), vec![(4, 4, 1)]);

        // A zero-sized push-constant range must have been omitted too.
        assert_eq!(framework.push_constant_size(program.pipeline_layout()), Some(0));
    }

    #[test]
    fn pushed_bytes_match_uniform_block() {
        let framework = Arc::new(CaptureFramework::new());
        let interface = ProgramInterface::new(
            UniformSet::pack(&[
                ("DeltaTime", UniformType::Float),
                ("FrameNo", UniformType::Int),
            ])
            .unwrap(),
            BindingList::new(),
        );
        let mut program = ComputeProgram::new(framework, "psetup", interface).unwrap();
        program.create_pipeline().unwrap();
        program.set_float("DeltaTime", 0.016).unwrap();
        program.set_int("FrameNo", 7).unwrap();

        let mut encoder = CaptureEncoder::new();
        program.dispatch(&mut encoder, 0, 0, 8, 8, 1).unwrap();

        let pushed = encoder
            .commands
            .iter()
            .find_map(|c| match c {
                CapturedCommand::PushConstants { data, .. } => Some(data.clone()),
                _ => None,
            })
            .expect("one push-constant update before the dispatch");
        assert_eq!(f32::from_ne_bytes(pushed[0..4].try_into().unwrap()), 0.016);
        assert_eq!(i32::from_ne_bytes(pushed[4..8].try_into().unwrap()), 7);
    }

    #[test]
    fn unknown_uniform_fails() {
        let framework = Arc::new(CaptureFramework::new());
        let interface = ProgramInterface::new(
            UniformSet::pack(&[("Alpha", UniformType::Float)]).unwrap(),
            BindingList::new(),
        );
        let mut program = ComputeProgram::new(framework, "jacobi1", interface).unwrap();

        assert!(program.set_float("Gamma", 1.0).is_err());
        assert!(program.set_int("Gamma", 1).is_err());
        assert!(program.set_float2("Gamma", 1.0, 2.0).is_err());
    }

    #[test]
    fn registry_miss_surfaces_as_slot_not_found() {
        let framework = Arc::new(CaptureFramework::new());
        let registry = InterfaceRegistry::new();
        let mut program =
            ComputeProgram::from_registry(framework, "unknownShader", &registry).unwrap();

        let err = program.set_texture(0, "U_in", &stub_texture(1)).unwrap_err();
        assert!(matches!(err, ComputeError::UnknownBindingSlot { .. }));
    }

    #[test]
    fn drop_releases_in_fixed_order() {
        let framework = Arc::new(CaptureFramework::new());
        let mut program =
            ComputeProgram::new(framework.clone(), "advect", two_image_interface()).unwrap();
        program.create_pipeline().unwrap();
        drop(program);

        let released = framework.released();
        assert_eq!(released.len(), 3);
        assert!(matches!(released[0], Released::Pipeline(_)));
        assert!(matches!(released[1], Released::PipelineLayout(_)));
        assert!(matches!(released[2], Released::BindingSetLayout(_)));
    }

    #[test]
    fn pool_exhaustion_fails_at_construction() {
        use crate::context::PoolRequirements;

        let framework = Arc::new(CaptureFramework::with_capacity(PoolRequirements {
            binding_sets: 1,
            storage_images: 2,
            combined_image_samplers: 0,
        }));

        let first =
            ComputeProgram::new(framework.clone(), "advect", two_image_interface()).unwrap();
        let err =
            ComputeProgram::new(framework.clone(), "force", two_image_interface()).unwrap_err();
        assert!(matches!(err, ComputeError::DescriptorPoolExhausted(_)));
        drop(first);
    }

    #[test]
    fn dirty_tracking_separates_values_from_topology() {
        let framework = Arc::new(CaptureFramework::new());
        let interface = ProgramInterface::new(
            UniformSet::pack(&[("Time", UniformType::Float)]).unwrap(),
            BindingList::new().push("U_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
        );
        let mut program = ComputeProgram::new(framework, "advect", interface).unwrap();
        assert!(!program.dirty());

        program.set_float("Time", 1.0).unwrap();
        assert!(program.dirty());
        assert!(!program.bindings_dirty());

        program.clear_dirty();
        program.set_texture(0, "U_out", &stub_texture(3)).unwrap();
        assert!(program.bindings_dirty());
    }
}
