//! Cross-queue frame synchronization
//!
//! The compute queue and the graphics queue run as logically concurrent
//! streams ordered by a two-semaphore handshake:
//!
//! - compute waits on "graphics finished the previous frame" and signals
//!   "compute finished" (the graphics semaphore is pre-signaled once at
//!   setup so the very first wait is satisfiable)
//! - graphics waits on "compute finished" plus the swapchain's
//!   image-acquired semaphore, and signals both "graphics finished" (next
//!   frame's compute wait) and "render complete" (presentation)
//!
//! [`FrameSync`] is the pure state machine producing the wait/signal sets
//! for each submission; [`FrameOrchestrator`] owns the semaphores and
//! performs the actual queue submissions.

use ash::vk;

use crate::error::{ComputeError, CrateResult};

/// Per-frame submission progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    ComputeSubmitted,
    GraphicsSubmitted,
    PresentPending,
}

/// One semaphore wait with the pipeline stages that block on it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags,
}

/// The wait and signal sets for one queue submission
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,
}

/// State machine deriving the semaphore handshake for each frame
///
/// Holds only semaphore handles and the frame state; it never touches the
/// device, so the full submission ordering is testable without one.
#[derive(Debug)]
pub struct FrameSync {
    graphics_done: vk::Semaphore,
    compute_done: vk::Semaphore,
    state: FrameState,
    compute_handshake: bool,
}

impl FrameSync {
    pub fn new(graphics_done: vk::Semaphore, compute_done: vk::Semaphore) -> Self {
        Self {
            graphics_done,
            compute_done,
            state: FrameState::Idle,
            compute_handshake: true,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Debug toggle: when disabled, graphics no longer waits for compute.
    /// Compute keeps waiting on graphics either way.
    pub fn set_compute_handshake(&mut self, enabled: bool) {
        self.compute_handshake = enabled;
    }

    pub fn compute_handshake(&self) -> bool {
        self.compute_handshake
    }

    /// Plan this frame's compute submission: wait until the previous
    /// frame's graphics work released the shared images, signal
    /// "compute finished".
    pub fn plan_compute(&mut self) -> CrateResult<SubmissionPlan> {
        if self.state != FrameState::Idle {
            return Err(ComputeError::FrameOutOfOrder {
                operation: "submit compute",
                state: self.state,
            });
        }
        self.state = FrameState::ComputeSubmitted;
        Ok(SubmissionPlan {
            waits: vec![SemaphoreWait {
                semaphore: self.graphics_done,
                stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            }],
            signals: vec![self.compute_done],
        })
    }

    /// Plan this frame's graphics submission.
    ///
    /// `image_acquired` and `render_complete` are the swapchain semaphores
    /// of the windowed path; a headless frame passes `None` for both.
    pub fn plan_graphics(
        &mut self,
        image_acquired: Option<vk::Semaphore>,
        render_complete: Option<vk::Semaphore>,
    ) -> CrateResult<SubmissionPlan> {
        if self.state != FrameState::ComputeSubmitted {
            return Err(ComputeError::FrameOutOfOrder {
                operation: "submit graphics",
                state: self.state,
            });
        }
        self.state = FrameState::GraphicsSubmitted;

        let mut waits = Vec::new();
        if self.compute_handshake {
            waits.push(SemaphoreWait {
                semaphore: self.compute_done,
                stage: vk::PipelineStageFlags::VERTEX_INPUT,
            });
        }
        if let Some(acquired) = image_acquired {
            waits.push(SemaphoreWait {
                semaphore: acquired,
                stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            });
        }

        let mut signals = vec![self.graphics_done];
        if let Some(complete) = render_complete {
            signals.push(complete);
        }

        Ok(SubmissionPlan { waits, signals })
    }

    /// Record that presentation was queued.
    pub fn mark_present(&mut self) -> CrateResult<()> {
        if self.state != FrameState::GraphicsSubmitted {
            return Err(ComputeError::FrameOutOfOrder {
                operation: "queue present",
                state: self.state,
            });
        }
        self.state = FrameState::PresentPending;
        Ok(())
    }

    /// Close out the frame and return to idle.
    pub fn complete_frame(&mut self) -> CrateResult<()> {
        if self.state != FrameState::PresentPending {
            return Err(ComputeError::FrameOutOfOrder {
                operation: "complete frame",
                state: self.state,
            });
        }
        self.state = FrameState::Idle;
        Ok(())
    }
}

/// Barrier making compute writes to `image` visible to fragment-stage
/// sampling.
///
/// The image stays in `GENERAL` layout; the layout being unchanged does
/// not exempt the access-mask transition from shader-write to
/// shader-read, so the barrier is required before graphics samples the
/// compute output.
pub fn compute_write_to_sample_barrier(image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}

/// Owns the handshake semaphores and submits to both queues
pub struct FrameOrchestrator {
    device: ash::Device,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    sync: FrameSync,
}

impl FrameOrchestrator {
    /// Create the handshake semaphores and pre-signal the graphics one so
    /// the first frame's compute wait is trivially satisfiable.
    pub fn new(
        device: &ash::Device,
        graphics_queue: vk::Queue,
        compute_queue: vk::Queue,
    ) -> CrateResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let graphics_done = unsafe { device.create_semaphore(&semaphore_info, None)? };
        let compute_done = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(err) => {
                unsafe { device.destroy_semaphore(graphics_done, None) };
                return Err(err.into());
            }
        };

        let signal_semaphores = [graphics_done];
        let submit = vk::SubmitInfo::default().signal_semaphores(&signal_semaphores);
        let result = unsafe {
            device
                .queue_submit(graphics_queue, &[submit], vk::Fence::null())
                .and_then(|()| device.queue_wait_idle(graphics_queue))
        };
        if let Err(err) = result {
            unsafe {
                device.destroy_semaphore(graphics_done, None);
                device.destroy_semaphore(compute_done, None);
            }
            return Err(err.into());
        }

        Ok(Self {
            device: device.clone(),
            graphics_queue,
            compute_queue,
            sync: FrameSync::new(graphics_done, compute_done),
        })
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    pub fn set_compute_handshake(&mut self, enabled: bool) {
        self.sync.set_compute_handshake(enabled);
    }

    /// Submit the compute command sequence for this frame.
    pub fn submit_compute(&mut self, command_buffer: vk::CommandBuffer) -> CrateResult<()> {
        let plan = self.sync.plan_compute()?;
        self.submit(self.compute_queue, command_buffer, &plan, vk::Fence::null())
    }

    /// Submit the graphics command sequence for this frame.
    ///
    /// Pass the swapchain semaphores when presenting; `None` for a
    /// headless frame. `fence` (optional) is signaled when the graphics
    /// work completes.
    pub fn submit_graphics(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_acquired: Option<vk::Semaphore>,
        render_complete: Option<vk::Semaphore>,
        fence: vk::Fence,
    ) -> CrateResult<()> {
        let plan = self.sync.plan_graphics(image_acquired, render_complete)?;
        self.submit(self.graphics_queue, command_buffer, &plan, fence)
    }

    /// Close out a headless frame (no presentation step).
    pub fn finish_frame(&mut self) -> CrateResult<()> {
        self.sync.mark_present()?;
        self.sync.complete_frame()
    }

    pub fn mark_present(&mut self) -> CrateResult<()> {
        self.sync.mark_present()
    }

    pub fn complete_frame(&mut self) -> CrateResult<()> {
        self.sync.complete_frame()
    }

    /// Wait for the compute queue to drain.
    ///
    /// A command sequence must never be re-recorded while the GPU may
    /// still be consuming it; callers rebuild only after this returns.
    pub fn wait_compute_idle(&self) -> CrateResult<()> {
        unsafe { self.device.queue_wait_idle(self.compute_queue)? };
        Ok(())
    }

    /// Wait for both queues to drain.
    pub fn wait_idle(&self) -> CrateResult<()> {
        unsafe {
            self.device.queue_wait_idle(self.compute_queue)?;
            self.device.queue_wait_idle(self.graphics_queue)?;
        }
        Ok(())
    }

    fn submit(
        &self,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
        plan: &SubmissionPlan,
        fence: vk::Fence,
    ) -> CrateResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> =
            plan.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            plan.waits.iter().map(|w| w.stage).collect();
        let command_buffers = [command_buffer];

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&plan.signals);

        unsafe { self.device.queue_submit(queue, &[submit], fence) }.map_err(|err| {
            log::warn!("queue submission failed: {err}");
            ComputeError::from(err)
        })
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        unsafe {
            // Semaphores may still be referenced by in-flight work.
            let _ = self.device.queue_wait_idle(self.compute_queue);
            let _ = self.device.queue_wait_idle(self.graphics_queue);
            self.device.destroy_semaphore(self.sync.graphics_done, None);
            self.device.destroy_semaphore(self.sync.compute_done, None);
        }
    }
}
