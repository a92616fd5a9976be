use ash::vk;
use color_eyre::Result;

use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::pipeline::RenderPipeline;
use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::error::{ApiOp, RenderError};

/// Phases of one frame iteration, in the order the executor performs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Waiting on the previous frame's fence, then resetting it.
    Idle,
    /// Requesting the next presentable image index.
    Acquiring,
    /// Re-recording the single command buffer.
    Recording,
    /// Commands handed to the graphics queue.
    Submitted,
    /// Image handed to the presentation engine.
    Presenting,
}

impl FramePhase {
    /// The sole legal transition out of each phase; one full cycle per frame.
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Acquiring,
            Self::Acquiring => Self::Recording,
            Self::Recording => Self::Submitted,
            Self::Submitted => Self::Presenting,
            Self::Presenting => Self::Idle,
        }
    }
}

/// The single frame-in-flight synchronization set.
struct FrameSync {
    // Signals when the acquired image is ready to be written.
    image_available: vk::Semaphore,

    // Signals when rendering commands have finished execution.
    render_finished: vk::Semaphore,

    // CPU-visible signal that all of the frame's submitted work has retired.
    in_flight: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Created signaled so the first frame's wait returns immediately.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let sync = unsafe {
            Self {
                image_available: device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(|r| RenderError::api(ApiOp::CreateSyncObjects, r))?,
                render_finished: device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(|r| RenderError::api(ApiOp::CreateSyncObjects, r))?,
                in_flight: device
                    .create_fence(&fence_info, None)
                    .map_err(|r| RenderError::api(ApiOp::CreateSyncObjects, r))?,
            }
        };
        Ok(sync)
    }
}

/// Records and submits one command sequence per frame and drives the present
/// call. Exactly one frame is ever in flight.
pub struct FrameExecutor {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
    phase: FramePhase,
}

impl FrameExecutor {
    pub fn new(device: &RenderDevice) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.graphics_queue.family_index);
        let command_pool = unsafe {
            device
                .logical
                .create_command_pool(&pool_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateCommandPool, r))?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .logical
                .allocate_command_buffers(&alloc_info)
                .map_err(|r| RenderError::api(ApiOp::AllocateCommandBuffers, r))?[0]
        };

        let sync = FrameSync::new(&device.logical)?;

        Ok(Self {
            command_pool,
            command_buffer,
            sync,
            phase: FramePhase::Idle,
        })
    }

    /// Runs one full frame iteration: wait and reset the fence, acquire,
    /// record, submit, present. Any error is fatal; the caller tears down.
    pub fn draw(
        &mut self,
        device: &RenderDevice,
        swapchain: &Swapchain,
        pipeline: &RenderPipeline,
    ) -> Result<()> {
        debug_assert_eq!(self.phase, FramePhase::Idle);

        // The previous frame must fully retire before its fence, command
        // buffer, or image can be reused. The reset happens only after a
        // successful wait.
        unsafe {
            device
                .logical
                .wait_for_fences(&[self.sync.in_flight], true, u64::MAX)
                .map_err(|r| RenderError::api(ApiOp::WaitFence, r))?;
            device
                .logical
                .reset_fences(&[self.sync.in_flight])
                .map_err(|r| RenderError::api(ApiOp::ResetFence, r))?;
        }
        self.phase = self.phase.next();

        let (image_index, suboptimal) = unsafe {
            swapchain
                .loader
                .acquire_next_image(
                    swapchain.handle,
                    u64::MAX,
                    self.sync.image_available,
                    vk::Fence::null(),
                )
                .map_err(|r| RenderError::api(ApiOp::AcquireImage, r))?
        };
        if suboptimal {
            log::debug!("acquired a suboptimal swapchain image");
        }
        self.phase = self.phase.next();

        self.record(&device.logical, swapchain, pipeline, image_index)?;
        self.phase = self.phase.next();

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer];
        let signal_semaphores = [self.sync.render_finished];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .logical
                .queue_submit(
                    device.graphics_queue.handle,
                    &[submit_info],
                    self.sync.in_flight,
                )
                .map_err(|r| RenderError::api(ApiOp::QueueSubmit, r))?
        };
        self.phase = self.phase.next();

        let swapchains = [swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            swapchain
                .loader
                .queue_present(device.present_queue.handle, &present_info)
                .map_err(|r| RenderError::api(ApiOp::QueuePresent, r))?
        };
        if suboptimal {
            log::debug!("presented to a suboptimal swapchain");
        }
        self.phase = self.phase.next();

        debug_assert_eq!(self.phase, FramePhase::Idle);
        Ok(())
    }

    fn record(
        &self,
        device: &ash::Device,
        swapchain: &Swapchain,
        pipeline: &RenderPipeline,
        image_index: u32,
    ) -> Result<()> {
        unsafe {
            device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|r| RenderError::api(ApiOp::RecordCommands, r))?;

            let begin_info = vk::CommandBufferBeginInfo::default();
            device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|r| RenderError::api(ApiOp::RecordCommands, r))?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            }];
            let render_pass_begin = vk::RenderPassBeginInfo::default()
                .render_pass(pipeline.render_pass)
                .framebuffer(pipeline.framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: swapchain.extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
            device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
            // Three vertices, one instance; the positions live in the shader.
            device.cmd_draw(self.command_buffer, 3, 1, 0, 0);
            device.cmd_end_render_pass(self.command_buffer);

            device
                .end_command_buffer(self.command_buffer)
                .map_err(|r| RenderError::api(ApiOp::RecordCommands, r))?;
        }
        Ok(())
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.sync.render_finished, None);
            device.destroy_semaphore(self.sync.image_available, None);
            device.destroy_fence(self.sync.in_flight, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_frame_cycles_through_every_phase_once() {
        let expected = [
            FramePhase::Acquiring,
            FramePhase::Recording,
            FramePhase::Submitted,
            FramePhase::Presenting,
            FramePhase::Idle,
        ];

        let mut phase = FramePhase::Idle;
        for want in expected {
            phase = phase.next();
            assert_eq!(phase, want);
        }
    }

    #[test]
    fn the_cycle_has_period_five() {
        let mut phase = FramePhase::Idle;
        for _ in 0..5 {
            phase = phase.next();
        }
        assert_eq!(phase, FramePhase::Idle);
    }
}
