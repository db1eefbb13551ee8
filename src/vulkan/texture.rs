//! Compute target textures
//!
//! Storage images the fluid passes write and the graphics stage samples.
//! Each target owns its image, memory, view and sampler, and hands out a
//! non-owning [`GpuTexture`] for binding; the target must outlive every
//! binding that references it.

use ash::vk;

use crate::context::GpuTexture;
use crate::error::{ComputeError, CrateResult};

use super::device::VulkanContext;

/// One GPU-resident compute target in `GENERAL` layout
pub struct TargetTexture {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    format: vk::Format,
    width: u32,
    height: u32,
}

impl TargetTexture {
    /// Create a `width`×`height` storage-capable image, move it to
    /// `GENERAL` layout, and build its view and sampler.
    pub fn new(
        context: &VulkanContext,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> CrateResult<Self> {
        let device = context.device().clone();

        let format_properties = unsafe {
            context
                .instance()
                .get_physical_device_format_properties(context.physical_device(), format)
        };
        if !format_properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
        {
            return Err(ComputeError::Other(format!(
                "format {format:?} does not support storage image operations"
            )));
        }

        unsafe {
            // Written by compute, sampled by the fragment stage.
            let image = device.create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format)
                    .extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    })
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(
                        vk::ImageUsageFlags::STORAGE
                            | vk::ImageUsageFlags::SAMPLED
                            | vk::ImageUsageFlags::TRANSFER_DST,
                    ),
                None,
            )?;

            let requirements = device.get_image_memory_requirements(image);
            let memory_type_index = match context.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ) {
                Ok(index) => index,
                Err(err) => {
                    device.destroy_image(image, None);
                    return Err(err);
                }
            };

            let memory = match device.allocate_memory(
                &vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index),
                None,
            ) {
                Ok(memory) => memory,
                Err(err) => {
                    device.destroy_image(image, None);
                    return Err(err.into());
                }
            };

            let mut texture = Self {
                device: device.clone(),
                image,
                memory,
                view: vk::ImageView::null(),
                sampler: vk::Sampler::null(),
                format,
                width,
                height,
            };

            device.bind_image_memory(image, memory, 0)?;

            // One-time transition out of UNDEFINED; the image then stays
            // in GENERAL for its whole lifetime.
            context.submit_one_shot(|device, command_buffer| {
                let barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            })?;

            texture.sampler = device.create_sampler(
                &vk::SamplerCreateInfo::default()
                    .mag_filter(vk::Filter::LINEAR)
                    .min_filter(vk::Filter::LINEAR)
                    .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                    .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                    .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                    .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                    .max_anisotropy(1.0)
                    .compare_op(vk::CompareOp::NEVER)
                    .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE),
                None,
            )?;

            texture.view = device.create_image_view(
                &vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
                None,
            )?;

            Ok(texture)
        }
    }

    /// Non-owning handle triple for binding
    pub fn handle(&self) -> GpuTexture {
        GpuTexture {
            image: self.image,
            view: self.view,
            sampler: self.sampler,
            layout: vk::ImageLayout::GENERAL,
        }
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for TargetTexture {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
