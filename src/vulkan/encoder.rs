//! Compute command recording over a raw Vulkan command buffer

use ash::vk;

use crate::context::ComputeEncoder;
use crate::error::CrateResult;

/// Encoder recording into a Vulkan command buffer
///
/// Constructing one puts the command buffer into the recording state;
/// [`finish`](Self::finish) ends recording. Programs can only dispatch
/// through a live encoder, which is what keeps "record only while
/// recording" a compile-time property instead of a runtime check.
pub struct AshComputeEncoder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> AshComputeEncoder<'a> {
    /// Begin recording into `command_buffer`.
    ///
    /// The buffer's pool must allow individual reset; beginning a
    /// previously recorded buffer re-records it from scratch.
    pub fn begin(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> CrateResult<Self> {
        unsafe {
            device.begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::default())?
        };
        Ok(Self {
            device,
            command_buffer,
        })
    }

    /// End recording and hand the buffer back for submission.
    pub fn finish(self) -> CrateResult<vk::CommandBuffer> {
        unsafe { self.device.end_command_buffer(self.command_buffer)? };
        Ok(self.command_buffer)
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl ComputeEncoder for AshComputeEncoder<'_> {
    fn push_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                data,
            );
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline,
            );
        }
    }

    fn bind_binding_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        unsafe {
            self.device
                .cmd_dispatch(self.command_buffer, groups_x, groups_y, groups_z);
        }
    }
}
