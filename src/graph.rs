//! The fluid-simulation compute pass graph
//!
//! A GPU port of Jos Stam's stable fluids: advect the velocity field,
//! generate and apply an external force, then project the field back to
//! divergence-free by relaxing a pressure Poisson equation with a fixed
//! number of Jacobi iterations and subtracting the pressure gradient.
//!
//! The graph owns one [`ComputeProgram`] per pass and threads the shared
//! compute targets between them by hand; there is no dependency inference.
//! `record` emits the dispatches in exactly the data-dependency order, so
//! the recorded sequence is correct by construction.

use std::sync::Arc;

use ash::vk;
use glam::Vec2;

use crate::binding::{BindingKind, BindingList};
use crate::context::{ComputeEncoder, FrameworkContext, GpuTexture, PoolRequirements};
use crate::error::{ComputeError, CrateResult};
use crate::interface::ProgramInterface;
use crate::program::ComputeProgram;
use crate::uniform::{UniformSet, UniformType};

/// Workgroup footprint of every fluid kernel
/// IMPORTANT: This must be kept in sync with the local size in the
/// fluid compute shaders.
pub const FLUID_WORKGROUP_SIZE: u32 = 16;

/// Default relaxation step count; convergence is never measured at runtime
pub const DEFAULT_JACOBI_ITERATIONS: u32 = 20;

/// Simulation parameters
///
/// `jacobi_iterations` trades pressure-solve quality for time with no
/// runtime convergence check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidConfig {
    /// Simulation grid width in texels
    pub width: u32,
    /// Simulation grid height in texels
    pub height: u32,
    pub jacobi_iterations: u32,
    /// Magnitude scale applied to pointer movement
    pub jet_force: f32,
    /// Sharpness of the injected force splat
    pub jet_exponent: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            jacobi_iterations: DEFAULT_JACOBI_ITERATIONS,
            jet_force: 2000.0,
            jet_exponent: 200.0,
        }
    }
}

impl FluidConfig {
    /// Defaults overridden by `FLUID_*` environment variables
    /// (`FLUID_RES`, `FLUID_JACOBI_ITERATIONS`, `FLUID_JET_FORCE`,
    /// `FLUID_JET_EXPONENT`).
    pub fn from_env() -> CrateResult<Self> {
        let mut config = Self::default();
        if let Some(res) = read_env::<u32>("FLUID_RES")? {
            config.width = res;
            config.height = res;
        }
        if let Some(iterations) = read_env::<u32>("FLUID_JACOBI_ITERATIONS")? {
            config.jacobi_iterations = iterations;
        }
        if let Some(force) = read_env::<f32>("FLUID_JET_FORCE")? {
            config.jet_force = force;
        }
        if let Some(exponent) = read_env::<f32>("FLUID_JET_EXPONENT")? {
            config.jet_exponent = exponent;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CrateResult<()> {
        if self.width == 0
            || self.height == 0
            || self.width % FLUID_WORKGROUP_SIZE != 0
            || self.height % FLUID_WORKGROUP_SIZE != 0
        {
            return Err(ComputeError::InvalidResolution {
                width: self.width,
                height: self.height,
                granularity: FLUID_WORKGROUP_SIZE,
            });
        }
        Ok(())
    }

    /// Thread-group counts covering the grid
    pub fn group_counts(&self) -> (u32, u32) {
        (
            self.width / FLUID_WORKGROUP_SIZE,
            self.height / FLUID_WORKGROUP_SIZE,
        )
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> CrateResult<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ComputeError::InvalidEnvValue {
                name: name.to_owned(),
                value,
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Identity of one pass in the fluid graph; stable across rebuilds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassId {
    Advect,
    ForceGen,
    Force,
    PressureSetup,
    JacobiA,
    JacobiB,
    PressureFinish,
}

/// One node of the graph: identity, shader asset name, owned program
#[derive(Debug)]
pub struct ComputePass {
    pub id: PassId,
    pub shader: String,
    pub program: ComputeProgram,
}

/// The compute targets the graph wires between passes
///
/// Owned by the texture collaborator, not the graph; every handle must
/// stay valid for the graph's lifetime.
#[derive(Clone, Copy, Debug)]
pub struct FluidTargets {
    /// Persistent velocity field, sampled by graphics (`V1`)
    pub velocity_a: GpuTexture,
    /// Advected velocity, written by `Advect` (`V2`)
    pub velocity_b: GpuTexture,
    /// Velocity after force application (`V3`)
    pub velocity_c: GpuTexture,
    /// External force field (`F1`)
    pub force: GpuTexture,
    /// Velocity divergence (`D1`)
    pub divergence: GpuTexture,
    /// Pressure ping buffer (`P1`)
    pub pressure_a: GpuTexture,
    /// Pressure pong buffer (`P2`)
    pub pressure_b: GpuTexture,
}

struct PassSpec {
    id: PassId,
    shader: &'static str,
    interface: ProgramInterface,
}

/// Interface of every pass, in dispatch order.
///
/// This is also the input to descriptor-pool sizing, so it must stay the
/// single source of truth for the graph's binding requirements.
fn pass_specs() -> Vec<PassSpec> {
    let common = UniformSet::pack(&[
        ("DeltaTime", UniformType::Float),
        ("Time", UniformType::Float),
        ("FrameNo", UniformType::Int),
    ])
    .expect("common fluid uniforms are a valid layout");

    let jet = common
        .extended(&[
            ("JetForceExponent", UniformType::Float),
            ("JetForceOrigin", UniformType::Float2),
            ("JetForceVector", UniformType::Float2),
        ])
        .expect("jet uniforms are a valid layout");

    let jacobi = common
        .extended(&[("Alpha", UniformType::Float), ("Beta", UniformType::Float)])
        .expect("jacobi uniforms are a valid layout");

    let jacobi_bindings = || {
        BindingList::new()
            .push("B1_in", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
            .push("X1_in", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
            .push("X1_out", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
    };

    vec![
        PassSpec {
            id: PassId::Advect,
            shader: "fluid/advect",
            interface: ProgramInterface::new(
                common.clone(),
                BindingList::new()
                    .push("U_in", BindingKind::CombinedImageSampler, vk::Format::R32G32_SFLOAT)
                    .push("U_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
            ),
        },
        PassSpec {
            id: PassId::ForceGen,
            shader: "fluid/force_gen",
            interface: ProgramInterface::new(
                jet,
                BindingList::new().push(
                    "F_out",
                    BindingKind::StorageImage,
                    vk::Format::R32G32_SFLOAT,
                ),
            ),
        },
        PassSpec {
            id: PassId::Force,
            shader: "fluid/force",
            interface: ProgramInterface::new(
                common.clone(),
                BindingList::new()
                    .push("F_in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
                    .push("W_in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
                    .push("W_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
            ),
        },
        PassSpec {
            id: PassId::PressureSetup,
            shader: "fluid/pressure_setup",
            interface: ProgramInterface::new(
                common.clone(),
                BindingList::new()
                    .push("W_in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
                    .push("DivW_out", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
                    .push("P_out", BindingKind::StorageImage, vk::Format::R32_SFLOAT),
            ),
        },
        PassSpec {
            id: PassId::JacobiA,
            shader: "fluid/jacobi",
            interface: ProgramInterface::new(jacobi.clone(), jacobi_bindings()),
        },
        PassSpec {
            id: PassId::JacobiB,
            shader: "fluid/jacobi",
            interface: ProgramInterface::new(jacobi, jacobi_bindings()),
        },
        PassSpec {
            id: PassId::PressureFinish,
            shader: "fluid/pressure_finish",
            interface: ProgramInterface::new(
                common,
                BindingList::new()
                    .push("W_in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
                    .push("P_in", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
                    .push("U_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
            ),
        },
    ]
}

/// The ordered fluid pipeline: Advect → ForceGen → Force → PressureSetup →
/// (JacobiA ⇄ JacobiB) × N → PressureFinish
#[derive(Debug)]
pub struct FluidGraph {
    passes: Vec<ComputePass>,
    targets: FluidTargets,
    config: FluidConfig,
    groups: (u32, u32),
    recorded: bool,
}

impl FluidGraph {
    /// Descriptor-pool capacity the graph's programs will consume.
    ///
    /// The shared pool must be created from this *before*
    /// [`FluidGraph::new`] runs, because every program allocates its
    /// binding set during construction.
    pub fn pool_requirements() -> PoolRequirements {
        let specs = pass_specs();
        PoolRequirements::for_interfaces(specs.iter().map(|spec| &spec.interface))
    }

    /// Build every pass, wire the targets, and create the pipelines.
    ///
    /// Construction order is load-bearing: all binding-set layouts first,
    /// pipelines last.
    pub fn new(
        framework: Arc<dyn FrameworkContext>,
        config: FluidConfig,
        targets: FluidTargets,
    ) -> CrateResult<Self> {
        config.validate()?;

        let mut passes = Vec::new();
        for spec in pass_specs() {
            let program =
                ComputeProgram::new(framework.clone(), spec.shader, spec.interface)?;
            passes.push(ComputePass {
                id: spec.id,
                shader: spec.shader.to_owned(),
                program,
            });
        }

        let mut graph = Self {
            passes,
            targets,
            config,
            groups: config.group_counts(),
            recorded: false,
        };

        graph.wire_targets()?;

        for pass in &mut graph.passes {
            pass.program.create_pipeline()?;
        }

        Ok(graph)
    }

    /// Bind every pass's inputs and outputs to the shared targets.
    fn wire_targets(&mut self) -> CrateResult<()> {
        let targets = self.targets;
        let dx = 1.0 / self.config.height as f32;
        let alpha = -dx * dx;

        {
            let advect = self.program_mut(PassId::Advect)?;
            advect.set_texture(0, "U_in", &targets.velocity_a)?;
            advect.set_texture(0, "U_out", &targets.velocity_b)?;
        }
        {
            let force_gen = self.program_mut(PassId::ForceGen)?;
            force_gen.set_texture(0, "F_out", &targets.force)?;
        }
        {
            let force = self.program_mut(PassId::Force)?;
            force.set_texture(0, "F_in", &targets.force)?;
            force.set_texture(0, "W_in", &targets.velocity_b)?;
            force.set_texture(0, "W_out", &targets.velocity_c)?;
        }
        {
            let setup = self.program_mut(PassId::PressureSetup)?;
            setup.set_texture(0, "W_in", &targets.velocity_c)?;
            setup.set_texture(0, "DivW_out", &targets.divergence)?;
            setup.set_texture(0, "P_out", &targets.pressure_a)?;
        }
        {
            let jacobi_a = self.program_mut(PassId::JacobiA)?;
            jacobi_a.set_float("Alpha", alpha)?;
            jacobi_a.set_float("Beta", 4.0)?;
            jacobi_a.set_texture(0, "B1_in", &targets.divergence)?;
            jacobi_a.set_texture(0, "X1_in", &targets.pressure_a)?;
            jacobi_a.set_texture(0, "X1_out", &targets.pressure_b)?;
        }
        {
            let jacobi_b = self.program_mut(PassId::JacobiB)?;
            jacobi_b.set_float("Alpha", alpha)?;
            jacobi_b.set_float("Beta", 4.0)?;
            jacobi_b.set_texture(0, "B1_in", &targets.divergence)?;
            jacobi_b.set_texture(0, "X1_in", &targets.pressure_b)?;
            jacobi_b.set_texture(0, "X1_out", &targets.pressure_a)?;
        }
        {
            let finish = self.program_mut(PassId::PressureFinish)?;
            finish.set_texture(0, "W_in", &targets.velocity_c)?;
            finish.set_texture(0, "P_in", &targets.pressure_a)?;
            finish.set_texture(0, "U_out", &targets.velocity_a)?;
        }
        Ok(())
    }

    /// Look a pass up by identity.
    pub fn pass(&self, id: PassId) -> Option<&ComputePass> {
        self.passes.iter().find(|pass| pass.id == id)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut ComputePass> {
        self.passes.iter_mut().find(|pass| pass.id == id)
    }

    fn program_mut(&mut self, id: PassId) -> CrateResult<&mut ComputeProgram> {
        self.pass_mut(id)
            .map(|pass| &mut pass.program)
            .ok_or_else(|| ComputeError::Other(format!("pass {id:?} missing from graph")))
    }

    pub fn passes(&self) -> &[ComputePass] {
        &self.passes
    }

    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    /// The final pass's output, the image graphics samples (`V1`)
    pub fn output(&self) -> &GpuTexture {
        &self.targets.velocity_a
    }

    /// Push the per-frame timing parameters to every pass.
    pub fn set_frame_params(&mut self, delta_time: f32, time: f32, frame_no: i32) -> CrateResult<()> {
        for pass in &mut self.passes {
            pass.program.set_float("DeltaTime", delta_time)?;
            pass.program.set_float("Time", time)?;
            pass.program.set_int("FrameNo", frame_no)?;
        }
        Ok(())
    }

    /// Update the injected force splat for this frame.
    pub fn set_jet(&mut self, origin: Vec2, vector: Vec2) -> CrateResult<()> {
        let exponent = self.config.jet_exponent;
        let force_gen = self.program_mut(PassId::ForceGen)?;
        force_gen.set_float("JetForceExponent", exponent)?;
        force_gen.set_float2("JetForceOrigin", origin.x, origin.y)?;
        force_gen.set_float2("JetForceVector", vector.x, vector.y)?;
        Ok(())
    }

    /// Whether the command sequence must be re-recorded.
    ///
    /// Push constants are baked into the recorded sequence, so any changed
    /// parameter or binding requires a re-record; a clean frame does not.
    pub fn needs_record(&self) -> bool {
        !self.recorded || self.passes.iter().any(|pass| pass.program.dirty())
    }

    /// Whether a re-record would be due to a changed binding (dispatch
    /// topology) rather than parameter values only.
    pub fn topology_changed(&self) -> bool {
        self.passes.iter().any(|pass| pass.program.bindings_dirty())
    }

    /// Record the whole pipeline in data-dependency order.
    ///
    /// The Jacobi pair ping-pongs between the two pressure buffers for the
    /// configured iteration count; every other pass dispatches once.
    pub fn record(&mut self, encoder: &mut dyn ComputeEncoder) -> CrateResult<()> {
        let (groups_x, groups_y) = self.groups;
        let iterations = self.config.jacobi_iterations;

        self.dispatch(PassId::Advect, encoder, groups_x, groups_y)?;
        self.dispatch(PassId::ForceGen, encoder, groups_x, groups_y)?;
        self.dispatch(PassId::Force, encoder, groups_x, groups_y)?;
        self.dispatch(PassId::PressureSetup, encoder, groups_x, groups_y)?;
        for _ in 0..iterations {
            self.dispatch(PassId::JacobiA, encoder, groups_x, groups_y)?;
            self.dispatch(PassId::JacobiB, encoder, groups_x, groups_y)?;
        }
        self.dispatch(PassId::PressureFinish, encoder, groups_x, groups_y)?;

        for pass in &mut self.passes {
            pass.program.clear_dirty();
        }
        self.recorded = true;
        Ok(())
    }

    fn dispatch(
        &self,
        id: PassId,
        encoder: &mut dyn ComputeEncoder,
        groups_x: u32,
        groups_y: u32,
    ) -> CrateResult<()> {
        let pass = self
            .pass(id)
            .ok_or_else(|| ComputeError::Other(format!("pass {id:?} missing from graph")))?;
        pass.program.dispatch(encoder, 0, 0, groups_x, groups_y, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{stub_texture, CaptureEncoder, CaptureFramework};

    fn targets() -> FluidTargets {
        FluidTargets {
            velocity_a: stub_texture(1),
            velocity_b: stub_texture(2),
            velocity_c: stub_texture(3),
            force: stub_texture(4),
            divergence: stub_texture(5),
            pressure_a: stub_texture(6),
            pressure_b: stub_texture(7),
        }
    }

    fn graph(framework: Arc<CaptureFramework>, config: FluidConfig) -> FluidGraph {
        FluidGraph::new(framework, config, targets()).unwrap()
    }

    #[test]
    fn rejects_resolution_off_the_workgroup_grid() {
        let config = FluidConfig {
            width: 100,
            height: 256,
            ..FluidConfig::default()
        };
        let err = FluidGraph::new(Arc::new(CaptureFramework::new()), config, targets())
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidResolution { width: 100, .. }));
    }

    #[test]
    fn records_passes_in_dependency_order() {
        let framework = Arc::new(CaptureFramework::new());
        let mut graph = graph(framework.clone(), FluidConfig::default());

        let mut encoder = CaptureEncoder::new();
        graph.record(&mut encoder).unwrap();

        // 4 lead-in passes, 2 dispatches per Jacobi iteration, 1 finish.
        assert_eq!(
            encoder.dispatch_count(),
            4 + 2 * DEFAULT_JACOBI_ITERATIONS as usize + 1
        );
        assert!(encoder
            .dispatches()
            .iter()
            .all(|&(x, y, z)| (x, y, z) == (16, 16, 1)));

        // The bound sets follow pass order: advect first, finish last,
        // alternating Jacobi sets in between.
        let sets = encoder.bound_sets();
        let advect_set = graph.pass(PassId::Advect).unwrap().program.binding_set();
        let finish_set = graph
            .pass(PassId::PressureFinish)
            .unwrap()
            .program
            .binding_set();
        assert_eq!(sets.first(), Some(&advect_set));
        assert_eq!(sets.last(), Some(&finish_set));

        let jacobi_a = graph.pass(PassId::JacobiA).unwrap().program.binding_set();
        let jacobi_b = graph.pass(PassId::JacobiB).unwrap().program.binding_set();
        assert_eq!(sets[4], jacobi_a);
        assert_eq!(sets[5], jacobi_b);
        assert_eq!(sets[sets.len() - 2], jacobi_b);
    }

    #[test]
    fn jacobi_iteration_budget_is_configurable() {
        let framework = Arc::new(CaptureFramework::new());
        let config = FluidConfig {
            jacobi_iterations: 3,
            ..FluidConfig::default()
        };
        let mut graph = graph(framework, config);

        let mut encoder = CaptureEncoder::new();
        graph.record(&mut encoder).unwrap();
        assert_eq!(encoder.dispatch_count(), 4 + 2 * 3 + 1);
    }

    #[test]
    fn jacobi_passes_ping_pong_the_pressure_buffers() {
        let framework = Arc::new(CaptureFramework::new());
        let graph = graph(framework.clone(), FluidConfig::default());
        let targets = targets();

        let a = graph.pass(PassId::JacobiA).unwrap();
        let b = graph.pass(PassId::JacobiB).unwrap();
        assert_eq!(a.program.bound_image("X1_in"), Some(targets.pressure_a.image));
        assert_eq!(a.program.bound_image("X1_out"), Some(targets.pressure_b.image));
        assert_eq!(b.program.bound_image("X1_in"), Some(targets.pressure_b.image));
        assert_eq!(b.program.bound_image("X1_out"), Some(targets.pressure_a.image));
    }

    #[test]
    fn finish_output_feeds_next_frame_advect_input() {
        let framework = Arc::new(CaptureFramework::new());
        let graph = graph(framework.clone(), FluidConfig::default());

        let advect = graph.pass(PassId::Advect).unwrap();
        let finish = graph.pass(PassId::PressureFinish).unwrap();

        // Same underlying resource: the binding sets hold the identical
        // descriptor triple.
        let advect_writes = framework.binding_set_contents(advect.program.binding_set());
        let finish_writes = framework.binding_set_contents(finish.program.binding_set());
        let advect_in = advect_writes[&advect.program.bindings().find("U_in").unwrap().slot];
        let finish_out = finish_writes[&finish.program.bindings().find("U_out").unwrap().slot];
        assert_eq!(advect_in, finish_out);
        assert_eq!(finish_out.image, graph.output().image);
    }

    #[test]
    fn record_is_skipped_only_when_nothing_changed() {
        let framework = Arc::new(CaptureFramework::new());
        let mut graph = graph(framework, FluidConfig::default());
        assert!(graph.needs_record());

        let mut encoder = CaptureEncoder::new();
        graph.record(&mut encoder).unwrap();
        assert!(!graph.needs_record());

        // A parameter change forces a re-record but not a topology change.
        graph.set_frame_params(0.016, 1.0, 60).unwrap();
        assert!(graph.needs_record());
        assert!(!graph.topology_changed());

        let mut encoder = CaptureEncoder::new();
        graph.record(&mut encoder).unwrap();
        assert!(!graph.needs_record());

        // Rebinding a target is a topology change.
        graph
            .pass_mut(PassId::Advect)
            .unwrap()
            .program
            .set_texture(0, "U_in", &stub_texture(99))
            .unwrap();
        assert!(graph.topology_changed());
    }

    #[test]
    fn jet_update_marks_only_force_gen_dirty() {
        let framework = Arc::new(CaptureFramework::new());
        let mut graph = graph(framework, FluidConfig::default());
        let mut encoder = CaptureEncoder::new();
        graph.record(&mut encoder).unwrap();

        graph
            .set_jet(Vec2::new(0.5, 0.5), Vec2::new(10.0, 0.0))
            .unwrap();
        assert!(graph.needs_record());
        for pass in graph.passes() {
            let dirty = pass.program.dirty();
            assert_eq!(dirty, pass.id == PassId::ForceGen, "pass {:?}", pass.id);
        }
    }

    #[test]
    fn pool_requirements_cover_every_pass() {
        let requirements = FluidGraph::pool_requirements();
        assert_eq!(requirements.binding_sets, 7);
        // One sampled velocity read in Advect; everything else is storage.
        assert_eq!(requirements.combined_image_samplers, 1);
        assert_eq!(requirements.storage_images, 17);
    }

    #[test]
    fn pushed_jacobi_constants_match_grid_scale() {
        let framework = Arc::new(CaptureFramework::new());
        let graph = graph(framework, FluidConfig::default());
        let jacobi = graph.pass(PassId::JacobiA).unwrap();

        let dx = 1.0 / 256.0f32;
        assert_eq!(jacobi.program.uniform_block().read_f32("Alpha").unwrap(), -dx * dx);
        assert_eq!(jacobi.program.uniform_block().read_f32("Beta").unwrap(), 4.0);
    }
}
