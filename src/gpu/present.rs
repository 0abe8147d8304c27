//! The acquire, record, submit, present loop.
//!
//! Each frame-in-flight slot owns a draw fence plus an acquire and a submit
//! semaphore. Before a slot is reused the host waits on its draw fence, which
//! bounds the CPU to as many frames ahead as the swapchain has images.

use crate::utils::PerFrame;

use super::{
    CommandBuffer, CommandBufferCreateInfo, CommandBufferLevel, CommandBufferUsageBit,
    CommandPool, CommandPoolCreateInfo, CommandPoolFlags, Context, Fence, FenceCreateInfo,
    GPUError, Image, PipelineStageBit, PresentStatus, QueueType, Result, Semaphore,
    SemaphoreCreateInfo, SubmitInfo, SurfaceHandles, Swapchain, SwapchainCreateInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentCycleInfo<'a> {
    pub debug_name: &'a str,
    pub swapchain: SwapchainCreateInfo<'a>,
}

pub struct FrameResources {
    pub draw_fence: Fence,
    pub acquire_semaphore: Semaphore,
    pub submit_semaphore: Semaphore,
    /// The last submission from this slot went through, so `draw_fence`
    /// will be signalled.
    in_flight: bool,
}

impl FrameResources {
    fn new(ctx: &Context, name: &str, slot: usize) -> Result<Self> {
        let fence_name = format!("{} draw fence {}", name, slot);
        let acquire_name = format!("{} acquire {}", name, slot);
        let submit_name = format!("{} submit {}", name, slot);
        Ok(Self {
            draw_fence: Fence::new(
                ctx,
                &FenceCreateInfo {
                    debug_name: &fence_name,
                    signaled: true,
                    ..Default::default()
                },
            )?,
            acquire_semaphore: Semaphore::new(
                ctx,
                &SemaphoreCreateInfo {
                    debug_name: &acquire_name,
                    ..Default::default()
                },
            )?,
            submit_semaphore: Semaphore::new(
                ctx,
                &SemaphoreCreateInfo {
                    debug_name: &submit_name,
                    ..Default::default()
                },
            )?,
            in_flight: false,
        })
    }
}

/// The frame currently being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Frame-in-flight slot; also the command buffer index to record into.
    pub slot: u32,
    /// Swapchain image acquired for this frame.
    pub image_index: u32,
    pub status: PresentStatus,
}

pub struct PresentCycle {
    debug_name: String,
    swapchain: Swapchain,
    commands: CommandBuffer,
    pool: CommandPool,
    frames: PerFrame<FrameResources>,
    current: Option<Frame>,
    ctx: Context,
}

fn make_frames(ctx: &Context, name: &str, count: u32) -> Result<PerFrame<FrameResources>> {
    PerFrame::try_new(count as usize, |slot| FrameResources::new(ctx, name, slot))
}

fn make_commands(pool: &CommandPool, name: &str, count: u32) -> Result<CommandBuffer> {
    let cmd_name = format!("{} commands", name);
    CommandBuffer::new(
        pool,
        &CommandBufferCreateInfo {
            debug_name: &cmd_name,
            level: CommandBufferLevel::Primary,
            command_buffer_count: count,
        },
    )
}

impl PresentCycle {
    pub fn new(ctx: &Context, info: &PresentCycleInfo, surface: Option<SurfaceHandles>) -> Result<Self> {
        let swapchain = Swapchain::new(ctx, &info.swapchain, surface)?;
        let count = swapchain.image_count();
        let pool_name = format!("{} pool", info.debug_name);
        let pool = CommandPool::new(
            ctx,
            &CommandPoolCreateInfo {
                debug_name: &pool_name,
                queue_type: QueueType::Graphics,
                flags: CommandPoolFlags::RESET_COMMAND_BUFFER,
            },
        )?;
        let commands = make_commands(&pool, info.debug_name, count)?;
        let frames = make_frames(ctx, info.debug_name, count)?;
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            swapchain,
            commands,
            pool,
            frames,
            current: None,
            ctx: ctx.clone(),
        })
    }

    /// Wait for the next slot to retire, acquire an image and begin
    /// recording into the slot's command buffer.
    ///
    /// An `OutOfDate` frame has nothing recording; call [`Self::resize`]
    /// and try again. `end_frame` must not be called for it.
    pub fn begin_frame(&mut self) -> Result<Frame> {
        if self.current.is_some() {
            return Err(self
                .ctx
                .fatal(GPUError::InvalidUsage("begin_frame called twice without end_frame")));
        }
        let slot = self.frames.curr_idx() as u32;
        let res = self.frames.curr();
        if res.in_flight {
            res.draw_fence.wait()?;
        }

        let (image_index, status) = self.swapchain.acquire_next_image(&res.acquire_semaphore)?;
        let frame = Frame {
            slot,
            image_index,
            status,
        };
        if status == PresentStatus::OutOfDate {
            log::debug!("'{}' swapchain out of date", self.debug_name);
            return Ok(frame);
        }

        self.commands
            .begin(slot, CommandBufferUsageBit::ONE_TIME_SUBMIT)?;
        self.current = Some(frame);
        log::trace!("'{}' frame slot {} image {}", self.debug_name, slot, image_index);
        Ok(frame)
    }

    /// Finish the frame: end recording, submit behind the acquire, present
    /// behind the submit.
    pub fn end_frame(&mut self) -> Result<PresentStatus> {
        let frame = self
            .current
            .take()
            .ok_or_else(|| self.ctx.fatal(GPUError::InvalidUsage("end_frame without begin_frame")))?;
        self.commands.end(frame.slot)?;

        let res = self.frames.curr_mut();
        res.in_flight = false;
        res.draw_fence.reset()?;
        self.commands.submit(
            &[SubmitInfo {
                command_buffer_indices: &[frame.slot],
                wait_semaphores: &[&res.acquire_semaphore],
                wait_dst_pipeline_stages: &[PipelineStageBit::COLOUR_ATTACHMENT_OUTPUT],
                signal_semaphores: &[&res.submit_semaphore],
                ..Default::default()
            }],
            Some(&res.draw_fence),
        )?;
        res.in_flight = true;
        let status =
            self.swapchain
                .present(&self.pool, &[&res.submit_semaphore], frame.image_index)?;
        self.frames.advance_next_frame();
        Ok(status)
    }

    /// Recreate the swapchain at a new size along with every per-frame
    /// primitive and command buffer.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.ctx.wait_idle()?;
        if self.current.take().is_some() {
            log::debug!("'{}' resized mid-frame; dropping the open frame", self.debug_name);
        }
        self.swapchain.recreate(width, height)?;
        let count = self.swapchain.image_count();
        self.commands = make_commands(&self.pool, &self.debug_name, count)?;
        self.pool.reset(true)?;
        self.frames = make_frames(&self.ctx, &self.debug_name, count)?;
        Ok(())
    }

    /// Command buffer of the frame being recorded. Record into index
    /// [`Frame::slot`].
    pub fn commands(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    /// Swapchain image of the frame being recorded.
    pub fn current_image(&self) -> Option<&Image> {
        self.current
            .and_then(|f| self.swapchain.image(f.image_index))
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.current
    }

    pub fn frame_resources(&self) -> &PerFrame<FrameResources> {
        &self.frames
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}
