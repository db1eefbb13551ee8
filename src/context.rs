//! The seam between compute programs and the device owner
//!
//! Programs never talk to a `VkDevice` directly. Everything they need —
//! set layouts, pipeline layouts, binding-set allocation, descriptor
//! writes, pipeline creation — goes through the [`FrameworkContext`]
//! trait, and everything they record goes through a [`ComputeEncoder`].
//! The real implementations live in [`crate::vulkan`]; a device-free
//! recording implementation lives in [`crate::capture`] for tests and
//! dry runs.

use ash::vk;

use crate::binding::{BindingDesc, BindingKind, BindingList};
use crate::error::CrateResult;
use crate::interface::ProgramInterface;

/// Non-owning reference to a GPU image a program can bind
///
/// The image, view and sampler are owned by the texture collaborator;
/// whoever hands a `GpuTexture` to `set_texture` guarantees the handles
/// outlive the binding. `layout` is the image's steady-state layout
/// (`GENERAL` for compute targets).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

impl GpuTexture {
    /// The descriptor triple written into a binding set
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(self.layout)
    }
}

/// Descriptor-pool capacity required by a set of program interfaces
///
/// The shared pool must be sized before any program allocates from it, so
/// the graph sums its interfaces' slot counts up front and the framework
/// creates the pool from the totals. Undersizing fails at allocation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolRequirements {
    pub binding_sets: u32,
    pub storage_images: u32,
    pub combined_image_samplers: u32,
}

impl PoolRequirements {
    /// Account for one program's interface.
    pub fn add_interface(&mut self, interface: &ProgramInterface) {
        self.binding_sets += 1;
        self.storage_images += interface.bindings.count_of(BindingKind::StorageImage);
        self.combined_image_samplers += interface
            .bindings
            .count_of(BindingKind::CombinedImageSampler);
    }

    /// Sum the requirements of every interface in `interfaces`.
    pub fn for_interfaces<'a>(interfaces: impl IntoIterator<Item = &'a ProgramInterface>) -> Self {
        let mut requirements = Self::default();
        for interface in interfaces {
            requirements.add_interface(interface);
        }
        requirements
    }

    /// Pool sizes for pool creation; zero-count entries are omitted
    /// because zero-sized pool sizes are invalid.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes = Vec::new();
        if self.storage_images > 0 {
            sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(self.storage_images),
            );
        }
        if self.combined_image_samplers > 0 {
            sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(self.combined_image_samplers),
            );
        }
        sizes
    }
}

/// Narrow contract a compute program needs from the device owner
///
/// The implementor owns the device, the shared descriptor pool, the
/// pipeline cache and the shader search path, and must outlive every
/// program built against it. All calls report failures synchronously;
/// none are retried.
pub trait FrameworkContext {
    /// Create a binding-set layout with one compute-visible entry per slot.
    fn create_binding_set_layout(
        &self,
        bindings: &BindingList,
    ) -> CrateResult<vk::DescriptorSetLayout>;

    /// Create a pipeline layout over `set_layout`.
    ///
    /// `push_constant_size` of zero means no push-constant range at all;
    /// zero-sized ranges are invalid and must be omitted, not clamped.
    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constant_size: u32,
    ) -> CrateResult<vk::PipelineLayout>;

    /// Allocate one binding-set instance from the shared pool.
    fn allocate_binding_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> CrateResult<vk::DescriptorSet>;

    /// Write `texture`'s descriptor into `set` at `slot`, immediately.
    fn write_image_binding(&self, set: vk::DescriptorSet, slot: &BindingDesc, texture: &GpuTexture);

    /// Load the compiled shader named `shader` and create a compute
    /// pipeline bound to `layout`.
    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        shader: &str,
    ) -> CrateResult<vk::Pipeline>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn destroy_binding_set_layout(&self, layout: vk::DescriptorSetLayout);
}

/// Sink for the commands a program records per dispatch
///
/// An encoder only exists while its command sequence is in the recording
/// state, so holding one is the license to record.
pub trait ComputeEncoder {
    /// Push the packed uniform bytes for the next dispatch.
    fn push_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]);

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    fn bind_binding_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet);

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingList;
    use crate::uniform::UniformSet;

    #[test]
    fn pool_requirements_sum_across_interfaces() {
        let a = ProgramInterface::new(
            UniformSet::empty(),
            BindingList::new()
                .push("U_in", BindingKind::CombinedImageSampler, vk::Format::R32G32_SFLOAT)
                .push("U_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
        );
        let b = ProgramInterface::new(
            UniformSet::empty(),
            BindingList::new().push("F_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT),
        );

        let requirements = PoolRequirements::for_interfaces([&a, &b]);
        assert_eq!(
            requirements,
            PoolRequirements {
                binding_sets: 2,
                storage_images: 2,
                combined_image_samplers: 1,
            }
        );
    }

    #[test]
    fn zero_counts_produce_no_pool_sizes() {
        let interface = ProgramInterface::new(
            UniformSet::empty(),
            BindingList::new().push("X1_out", BindingKind::StorageImage, vk::Format::R32_SFLOAT),
        );
        let sizes = PoolRequirements::for_interfaces([&interface]).pool_sizes();

        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 1);
    }
}
