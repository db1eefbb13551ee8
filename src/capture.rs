//! Device-free capture backend for the framework seam
//!
//! [`CaptureFramework`] and [`CaptureEncoder`] implement the same
//! contracts as the Vulkan backend but record every layout creation,
//! binding-set write, and recorded command instead of touching a device.
//! The test suite runs the whole program/graph surface against them, and
//! they double as a dry-run tool when debugging pass wiring without a GPU.

use std::cell::RefCell;
use std::collections::BTreeMap;

use ash::vk;
use ash::vk::Handle;

use crate::binding::{BindingDesc, BindingKind, BindingList};
use crate::context::{ComputeEncoder, FrameworkContext, GpuTexture, PoolRequirements};
use crate::error::{ComputeError, CrateResult};

/// One command recorded through a [`CaptureEncoder`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapturedCommand {
    PushConstants {
        layout: vk::PipelineLayout,
        data: Vec<u8>,
    },
    BindPipeline(vk::Pipeline),
    BindBindingSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    Dispatch {
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    },
}

/// Encoder that appends commands to an in-memory list
#[derive(Debug, Default)]
pub struct CaptureEncoder {
    pub commands: Vec<CapturedCommand>,
}

impl CaptureEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, CapturedCommand::Dispatch { .. }))
            .count()
    }

    pub fn push_constant_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, CapturedCommand::PushConstants { .. }))
            .count()
    }

    /// The recorded dispatches, in order
    pub fn dispatches(&self) -> Vec<(u32, u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CapturedCommand::Dispatch {
                    groups_x,
                    groups_y,
                    groups_z,
                } => Some((*groups_x, *groups_y, *groups_z)),
                _ => None,
            })
            .collect()
    }

    /// The binding sets bound before each dispatch, in dispatch order
    pub fn bound_sets(&self) -> Vec<vk::DescriptorSet> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CapturedCommand::BindBindingSet { set, .. } => Some(*set),
                _ => None,
            })
            .collect()
    }
}

impl ComputeEncoder for CaptureEncoder {
    fn push_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]) {
        self.commands.push(CapturedCommand::PushConstants {
            layout,
            data: data.to_vec(),
        });
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(CapturedCommand::BindPipeline(pipeline));
    }

    fn bind_binding_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.commands
            .push(CapturedCommand::BindBindingSet { layout, set });
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.commands.push(CapturedCommand::Dispatch {
            groups_x,
            groups_y,
            groups_z,
        });
    }
}

/// Which GPU object a teardown call released, in call order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    BindingSetLayout(vk::DescriptorSetLayout),
}

#[derive(Debug, Default)]
struct CaptureState {
    next_handle: u64,
    set_layouts: Vec<(vk::DescriptorSetLayout, Vec<BindingDesc>)>,
    pipeline_layouts: Vec<(vk::PipelineLayout, vk::DescriptorSetLayout, u32)>,
    binding_sets: Vec<(vk::DescriptorSet, BTreeMap<u32, GpuTexture>)>,
    pipelines: Vec<(vk::Pipeline, vk::PipelineLayout, String)>,
    allocated: PoolRequirements,
    released: Vec<Released>,
}

impl CaptureState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Framework implementation that records instead of allocating
///
/// Construct with [`CaptureFramework::with_capacity`] to emulate a sized
/// descriptor pool; the unbounded default never exhausts.
#[derive(Debug, Default)]
pub struct CaptureFramework {
    capacity: Option<PoolRequirements>,
    state: RefCell<CaptureState>,
}

impl CaptureFramework {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulate a descriptor pool sized to `capacity`; allocations past it
    /// fail the way an undersized real pool does.
    pub fn with_capacity(capacity: PoolRequirements) -> Self {
        Self {
            capacity: Some(capacity),
            state: RefCell::new(CaptureState::default()),
        }
    }

    /// The descriptor writes currently stored in `set`, keyed by slot
    pub fn binding_set_contents(&self, set: vk::DescriptorSet) -> BTreeMap<u32, GpuTexture> {
        self.state
            .borrow()
            .binding_sets
            .iter()
            .find(|(handle, _)| *handle == set)
            .map(|(_, writes)| writes.clone())
            .unwrap_or_default()
    }

    /// The shader name a pipeline was created from
    pub fn pipeline_shader(&self, pipeline: vk::Pipeline) -> Option<String> {
        self.state
            .borrow()
            .pipelines
            .iter()
            .find(|(handle, _, _)| *handle == pipeline)
            .map(|(_, _, shader)| shader.clone())
    }

    /// The push-constant range size a pipeline layout was created with
    pub fn push_constant_size(&self, layout: vk::PipelineLayout) -> Option<u32> {
        self.state
            .borrow()
            .pipeline_layouts
            .iter()
            .find(|(handle, _, _)| *handle == layout)
            .map(|(_, _, size)| *size)
    }

    /// Teardown calls observed so far, in order
    pub fn released(&self) -> Vec<Released> {
        self.state.borrow().released.clone()
    }

    /// Binding sets allocated so far
    pub fn sets_allocated(&self) -> u32 {
        self.state.borrow().allocated.binding_sets
    }
}

impl FrameworkContext for CaptureFramework {
    fn create_binding_set_layout(
        &self,
        bindings: &BindingList,
    ) -> CrateResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let handle = vk::DescriptorSetLayout::from_raw(state.next_raw());
        state.set_layouts.push((handle, bindings.entries().to_vec()));
        Ok(handle)
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constant_size: u32,
    ) -> CrateResult<vk::PipelineLayout> {
        let mut state = self.state.borrow_mut();
        let handle = vk::PipelineLayout::from_raw(state.next_raw());
        state
            .pipeline_layouts
            .push((handle, set_layout, push_constant_size));
        Ok(handle)
    }

    fn allocate_binding_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> CrateResult<vk::DescriptorSet> {
        let mut state = self.state.borrow_mut();

        let entries = state
            .set_layouts
            .iter()
            .find(|(handle, _)| *handle == layout)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default();

        let mut would_be = state.allocated;
        would_be.binding_sets += 1;
        for entry in &entries {
            match entry.kind {
                BindingKind::StorageImage => would_be.storage_images += 1,
                BindingKind::CombinedImageSampler => would_be.combined_image_samplers += 1,
            }
        }
        if let Some(capacity) = self.capacity {
            if would_be.binding_sets > capacity.binding_sets
                || would_be.storage_images > capacity.storage_images
                || would_be.combined_image_samplers > capacity.combined_image_samplers
            {
                return Err(ComputeError::DescriptorPoolExhausted(layout));
            }
        }
        state.allocated = would_be;

        let handle = vk::DescriptorSet::from_raw(state.next_raw());
        state.binding_sets.push((handle, BTreeMap::new()));
        Ok(handle)
    }

    fn write_image_binding(&self, set: vk::DescriptorSet, slot: &BindingDesc, texture: &GpuTexture) {
        let mut state = self.state.borrow_mut();
        if let Some((_, writes)) = state.binding_sets.iter_mut().find(|(handle, _)| *handle == set)
        {
            writes.insert(slot.slot, *texture);
        }
    }

    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        shader: &str,
    ) -> CrateResult<vk::Pipeline> {
        let mut state = self.state.borrow_mut();
        let handle = vk::Pipeline::from_raw(state.next_raw());
        state.pipelines.push((handle, layout, shader.to_owned()));
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state
            .borrow_mut()
            .released
            .push(Released::Pipeline(pipeline));
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state
            .borrow_mut()
            .released
            .push(Released::PipelineLayout(layout));
    }

    fn destroy_binding_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .borrow_mut()
            .released
            .push(Released::BindingSetLayout(layout));
    }
}

/// Fabricate a distinct, non-null texture handle triple for tests and
/// dry runs.
pub fn stub_texture(id: u64) -> GpuTexture {
    GpuTexture {
        image: vk::Image::from_raw(id),
        view: vk::ImageView::from_raw(id | 0x1_0000),
        sampler: vk::Sampler::from_raw(id | 0x2_0000),
        layout: vk::ImageLayout::GENERAL,
    }
}
