//! Indexed command buffers and their recording state machine.
//!
//! ```text
//! Initial --begin--> Recording --end--> Executable --submit--> Pending
//!    ^                                      ^                     |
//!    |                                      +---- completed ------+
//!    +---- reset / pool reset / completed ONE_TIME_SUBMIT --------+
//! ```

use std::any::Any;
use std::sync::Arc;

use smallvec::SmallVec;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::barrier::StateUpdates;
use super::command_pool::{CommandPoolShared, RawCommandPool};
use super::software::SoftwareSink;
use super::submit::SubmitBatch;
use super::{
    AccelerationStructureBuild, Barrier, BarrierPlan, Buffer, BufferCopy, CommandBufferLevel,
    CommandBufferUsageBit, CommandPool, CommandPoolFlags, Context, DependencyBit, DescriptorSet,
    Device, Draw, DrawIndexed, Event, ExplicitBarrier, GPUError, IndexType, Pipeline,
    PipelineBindPoint, PipelineLayout, PipelineStageBit, QueueType, Result, Transition,
};

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::D3D12Sink;
#[cfg(feature = "nori-vulkan")]
use super::vulkan::VulkanSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct CommandBufferCreateInfo<'a> {
    pub debug_name: &'a str,
    pub level: CommandBufferLevel,
    pub command_buffer_count: u32,
}

impl Default for CommandBufferCreateInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            level: CommandBufferLevel::Primary,
            command_buffer_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBufferBinding<'a> {
    pub buffer: &'a Buffer,
    pub offset: u64,
    /// Bytes between vertices. Vulkan takes it from the pipeline instead.
    pub stride: u32,
}

/// Barriers of one `pipeline_barrier` or `wait_events` call, translated for
/// the recording queue.
pub(crate) enum BarrierBatch<'a> {
    Explicit(SmallVec<[ExplicitBarrier<'a>; 4]>),
    ResourceState(SmallVec<[Transition<'a>; 4]>),
}

impl BarrierBatch<'_> {
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            BarrierBatch::Explicit(b) => b.is_empty(),
            BarrierBatch::ResourceState(t) => t.is_empty(),
        }
    }
}

/// Backend half of a [`CommandBuffer`]. Indices are validated before any
/// call reaches the sink.
pub(crate) trait CommandSink: Send {
    fn as_any(&self) -> &dyn Any;

    fn begin(&mut self, index: u32, usage: CommandBufferUsageBit) -> Result<()>;
    fn end(&mut self, index: u32) -> Result<()>;
    fn reset(&mut self, index: u32, release_resources: bool) -> Result<()>;

    fn pipeline_barrier(
        &mut self,
        index: u32,
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        dependency: DependencyBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()>;
    fn set_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()>;
    fn reset_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()>;
    fn wait_events(
        &mut self,
        index: u32,
        events: &[&Event],
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()>;

    fn bind_pipeline(&mut self, index: u32, pipeline: &Pipeline) -> Result<()>;
    fn bind_descriptor_sets(
        &mut self,
        index: u32,
        bind_point: PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()>;
    fn bind_vertex_buffers(
        &mut self,
        index: u32,
        first_binding: u32,
        bindings: &[VertexBufferBinding<'_>],
    ) -> Result<()>;
    fn bind_index_buffer(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()>;

    fn draw(&mut self, index: u32, draw: &Draw) -> Result<()>;
    fn draw_indexed(&mut self, index: u32, draw: &DrawIndexed) -> Result<()>;
    fn draw_indirect(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()>;
    fn dispatch(&mut self, index: u32, x: u32, y: u32, z: u32) -> Result<()>;
    fn copy_buffer(
        &mut self,
        index: u32,
        src: &Buffer,
        dst: &Buffer,
        regions: &[BufferCopy],
    ) -> Result<()>;
    fn execute_secondary(
        &mut self,
        index: u32,
        secondary: &dyn CommandSink,
        indices: &[u32],
    ) -> Result<()>;
    fn build_acceleration_structure(
        &mut self,
        index: u32,
        build: &AccelerationStructureBuild,
    ) -> Result<()>;

    /// Best effort; failures are logged.
    fn begin_debug_label(&mut self, index: u32, label: &str, colour: [f32; 4]);
    fn end_debug_label(&mut self, index: u32);

    /// Submit one native batch per entry, in order, on the pool's queue.
    /// Returns the queue value that marks completion of the last batch.
    fn submit(&mut self, batches: &[SubmitBatch<'_>]) -> Result<u64>;

    /// Highest queue value the pool's queue has retired.
    fn completed_value(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub(crate) state: CommandBufferState,
    pub(crate) usage: CommandBufferUsageBit,
    pub(crate) pending_value: u64,
    epoch: u64,
    /// Recorded at least once since the last reset.
    recorded: bool,
}

/// An array of independently recordable command buffers from one pool.
///
/// Recording into a given index requires `&mut self`; record in parallel by
/// using one pool and one `CommandBuffer` per thread.
pub struct CommandBuffer {
    debug_name: String,
    level: CommandBufferLevel,
    pub(crate) slots: Vec<Slot>,
    pub(crate) sink: Box<dyn CommandSink>,
    pub(crate) pool: Arc<CommandPoolShared>,
}

impl CommandBuffer {
    /// Allocate `command_buffer_count` buffers of one level from `pool`.
    pub fn new(pool: &CommandPool, info: &CommandBufferCreateInfo) -> Result<Self> {
        let shared = pool.shared.clone();
        shared.assert_owner();
        let ctx = &shared.ctx;
        if info.command_buffer_count == 0 {
            return Err(ctx.fatal(GPUError::InvalidUsage(
                "command buffers need a count of at least one",
            )));
        }

        let sink: Box<dyn CommandSink> = {
            let raw = shared.raw.lock();
            match (ctx.device(), &*raw) {
                #[cfg(feature = "nori-vulkan")]
                (Device::Vulkan(dev), RawCommandPool::Vulkan(vk_pool)) => Box::new(ctx.check(
                    VulkanSink::new(dev, vk_pool, shared.queue_type, info),
                )?),
                #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
                (Device::D3D12(dev), RawCommandPool::D3D12(dx_pool)) => {
                    Box::new(ctx.check(D3D12Sink::new(dev, dx_pool, shared.queue_type, info))?)
                }
                (Device::Software(dev), RawCommandPool::Software) => Box::new(SoftwareSink::new(
                    dev,
                    shared.queue_type,
                    info.command_buffer_count,
                )),
                #[allow(unreachable_patterns)]
                _ => {
                    return Err(ctx.fatal(GPUError::InvalidUsage(
                        "command pool does not belong to this device",
                    )))
                }
            }
        };

        let epoch = shared.epoch();
        log::debug!(
            "Allocated {} {:?} command buffer(s) '{}' from pool '{}'",
            info.command_buffer_count,
            info.level,
            info.debug_name,
            shared.debug_name
        );
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            level: info.level,
            slots: vec![
                Slot {
                    state: CommandBufferState::Initial,
                    usage: CommandBufferUsageBit::empty(),
                    pending_value: 0,
                    epoch,
                    recorded: false,
                };
                info.command_buffer_count as usize
            ],
            sink,
            pool: shared,
        })
    }

    pub fn info(&self) -> CommandBufferCreateInfo<'_> {
        CommandBufferCreateInfo {
            debug_name: &self.debug_name,
            level: self.level,
            command_buffer_count: self.slots.len() as u32,
        }
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub fn count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn queue_type(&self) -> QueueType {
        self.pool.queue_type
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.pool.ctx
    }

    /// State of buffer `index`, or `None` when out of range.
    pub fn state(&self, index: u32) -> Option<CommandBufferState> {
        let slot = self.slots.get(index as usize)?;
        let completed = if slot.state == CommandBufferState::Pending {
            match self.sink.completed_value() {
                Ok(v) => v,
                Err(e) => {
                    self.ctx().fatal(e);
                    0
                }
            }
        } else {
            0
        };
        Some(self.resolve(slot, completed))
    }

    fn resolve(&self, slot: &Slot, completed: u64) -> CommandBufferState {
        if slot.epoch != self.pool.epoch() {
            return CommandBufferState::Initial;
        }
        match slot.state {
            CommandBufferState::Pending if completed >= slot.pending_value => {
                if slot.usage.contains(CommandBufferUsageBit::ONE_TIME_SUBMIT) {
                    CommandBufferState::Initial
                } else {
                    CommandBufferState::Executable
                }
            }
            s => s,
        }
    }

    /// Bounds-check `index` and return its up-to-date state.
    #[track_caller]
    pub(crate) fn checked_state(&self, index: u32) -> Result<CommandBufferState> {
        match self.slots.get(index as usize) {
            Some(slot) => {
                let completed = if slot.state == CommandBufferState::Pending {
                    self.ctx().check(self.sink.completed_value())?
                } else {
                    0
                };
                Ok(self.resolve(slot, completed))
            }
            None => Err(self.ctx().fatal(GPUError::IndexOutOfRange {
                index,
                count: self.count(),
            })),
        }
    }

    #[track_caller]
    fn invalid_state(&self, index: u32, state: CommandBufferState, operation: &'static str) -> GPUError {
        self.ctx().fatal(GPUError::InvalidCommandBufferState {
            index,
            state,
            operation,
        })
    }

    #[track_caller]
    fn recording(&self, index: u32, operation: &'static str) -> Result<()> {
        self.pool.assert_owner();
        match self.checked_state(index)? {
            CommandBufferState::Recording => Ok(()),
            state => Err(self.invalid_state(index, state, operation)),
        }
    }

    #[track_caller]
    fn require_queue(&self, allowed: &[QueueType], what: &'static str) -> Result<()> {
        if allowed.contains(&self.pool.queue_type) {
            Ok(())
        } else {
            Err(self.ctx().fatal(GPUError::InvalidUsage(what)))
        }
    }

    /// Begin recording into buffer `index`.
    ///
    /// Re-beginning an `Executable` buffer resets it implicitly, which needs
    /// a pool created with [`CommandPoolFlags::RESET_COMMAND_BUFFER`].
    pub fn begin(&mut self, index: u32, usage: CommandBufferUsageBit) -> Result<()> {
        self.pool.assert_owner();
        let state = self.checked_state(index)?;
        match state {
            CommandBufferState::Recording | CommandBufferState::Pending => {
                return Err(self.invalid_state(index, state, "begin"));
            }
            CommandBufferState::Initial | CommandBufferState::Executable => {}
        }

        let epoch = self.pool.epoch();
        let slot = self.slots[index as usize];
        let dirty = slot.recorded && slot.epoch == epoch;
        if dirty && !self.pool.flags.contains(CommandPoolFlags::RESET_COMMAND_BUFFER) {
            return Err(self.ctx().fatal(GPUError::InvalidUsage(
                "re-recording a command buffer needs a pool with RESET_COMMAND_BUFFER",
            )));
        }

        let res = self.sink.begin(index, usage);
        self.ctx().check(res)?;
        self.slots[index as usize] = Slot {
            state: CommandBufferState::Recording,
            usage,
            pending_value: 0,
            epoch,
            recorded: true,
        };
        log::trace!("Begin '{}'[{}] ({:?})", self.debug_name, index, usage);
        Ok(())
    }

    pub fn end(&mut self, index: u32) -> Result<()> {
        self.recording(index, "end")?;
        let res = self.sink.end(index);
        self.ctx().check(res)?;
        self.slots[index as usize].state = CommandBufferState::Executable;
        Ok(())
    }

    /// Return buffer `index` to `Initial`. Needs
    /// [`CommandPoolFlags::RESET_COMMAND_BUFFER`].
    pub fn reset(&mut self, index: u32, release_resources: bool) -> Result<()> {
        self.pool.assert_owner();
        let state = self.checked_state(index)?;
        if state == CommandBufferState::Pending {
            return Err(self.invalid_state(index, state, "reset"));
        }
        if !self.pool.flags.contains(CommandPoolFlags::RESET_COMMAND_BUFFER) {
            return Err(self.ctx().fatal(GPUError::InvalidUsage(
                "per-buffer reset needs a pool with RESET_COMMAND_BUFFER",
            )));
        }
        let res = self.sink.reset(index, release_resources);
        self.ctx().check(res)?;
        let epoch = self.pool.epoch();
        self.slots[index as usize] = Slot {
            state: CommandBufferState::Initial,
            usage: CommandBufferUsageBit::empty(),
            pending_value: 0,
            epoch,
            recorded: false,
        };
        Ok(())
    }

    /// Translate `barriers` for the recording queue. The returned updates
    /// are committed once the batch is recorded, so a failed call leaves
    /// every tracked state as it was.
    #[track_caller]
    fn translate<'a>(&self, barriers: &[Barrier<'a>]) -> Result<(BarrierBatch<'a>, StateUpdates<'a>)> {
        let model = self.ctx().barrier_model();
        if let Some(b) = barriers.iter().find(|b| b.model() != model) {
            return Err(self.ctx().fatal(GPUError::InvalidBarrier(format!(
                "{}: built for {:?} barriers but recorded on a {:?} device",
                b.info().debug_name,
                b.model(),
                model
            ))));
        }

        let mut updates = StateUpdates::default();
        let batch = match model {
            super::BarrierModel::Explicit => BarrierBatch::Explicit(
                barriers
                    .iter()
                    .filter_map(|b| match b.plan {
                        BarrierPlan::Explicit(e) => e,
                        BarrierPlan::ResourceState(_) => None,
                    })
                    .collect(),
            ),
            super::BarrierModel::ResourceState => {
                let mut out = SmallVec::new();
                for b in barriers {
                    if let BarrierPlan::ResourceState(plan) = &b.plan {
                        let transitions = plan
                            .resolve(self.pool.queue_type, &mut updates)
                            .map_err(|reason| {
                                self.ctx().fatal(GPUError::InvalidBarrier(format!(
                                    "{}: {}",
                                    b.info().debug_name,
                                    reason
                                )))
                            })?;
                        out.extend(transitions);
                    }
                }
                BarrierBatch::ResourceState(out)
            }
        };
        Ok((batch, updates))
    }

    /// Record a pipeline barrier.
    pub fn pipeline_barrier(
        &mut self,
        index: u32,
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        dependency: DependencyBit,
        barriers: &[Barrier<'_>],
    ) -> Result<()> {
        self.recording(index, "record a barrier into")?;
        let (batch, updates) = self.translate(barriers)?;
        let res = self
            .sink
            .pipeline_barrier(index, src_stage, dst_stage, dependency, &batch);
        self.ctx().check(res)?;
        updates.commit();
        Ok(())
    }

    pub fn set_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()> {
        self.recording(index, "set an event in")?;
        self.same_device(event.context())?;
        let res = self.sink.set_event(index, event, stage);
        self.ctx().check(res)
    }

    pub fn reset_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()> {
        self.recording(index, "reset an event in")?;
        self.same_device(event.context())?;
        let res = self.sink.reset_event(index, event, stage);
        self.ctx().check(res)
    }

    /// Wait for `events` on the device, then apply `barriers`.
    pub fn wait_events(
        &mut self,
        index: u32,
        events: &[&Event],
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        barriers: &[Barrier<'_>],
    ) -> Result<()> {
        self.recording(index, "wait for events in")?;
        for e in events {
            self.same_device(e.context())?;
        }
        let (batch, updates) = self.translate(barriers)?;
        let res = self
            .sink
            .wait_events(index, events, src_stage, dst_stage, &batch);
        self.ctx().check(res)?;
        updates.commit();
        Ok(())
    }

    #[track_caller]
    fn same_device(&self, other: &Context) -> Result<()> {
        if self.ctx().same_device(other) {
            Ok(())
        } else {
            Err(self.ctx().fatal(GPUError::InvalidUsage(
                "object was created on a different context",
            )))
        }
    }

    pub fn bind_pipeline(&mut self, index: u32, pipeline: &Pipeline) -> Result<()> {
        self.recording(index, "bind a pipeline in")?;
        match pipeline.bind_point() {
            PipelineBindPoint::Compute => self.require_queue(
                &[QueueType::Graphics, QueueType::Compute],
                "compute pipelines need a graphics or compute queue",
            )?,
            _ => self.require_queue(&[QueueType::Graphics], "graphics pipelines need a graphics queue")?,
        }
        let res = self.sink.bind_pipeline(index, pipeline);
        self.ctx().check(res)
    }

    pub fn bind_descriptor_sets(
        &mut self,
        index: u32,
        bind_point: PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.recording(index, "bind descriptor sets in")?;
        let res = self
            .sink
            .bind_descriptor_sets(index, bind_point, layout, first_set, sets, dynamic_offsets);
        self.ctx().check(res)
    }

    pub fn bind_vertex_buffers(
        &mut self,
        index: u32,
        first_binding: u32,
        bindings: &[VertexBufferBinding<'_>],
    ) -> Result<()> {
        self.recording(index, "bind vertex buffers in")?;
        self.require_queue(&[QueueType::Graphics], "vertex buffers need a graphics queue")?;
        let res = self.sink.bind_vertex_buffers(index, first_binding, bindings);
        self.ctx().check(res)
    }

    pub fn bind_index_buffer(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        self.recording(index, "bind an index buffer in")?;
        self.require_queue(&[QueueType::Graphics], "index buffers need a graphics queue")?;
        let res = self.sink.bind_index_buffer(index, buffer, offset, index_type);
        self.ctx().check(res)
    }

    pub fn draw(&mut self, index: u32, draw: &Draw) -> Result<()> {
        self.recording(index, "draw in")?;
        self.require_queue(&[QueueType::Graphics], "draws need a graphics queue")?;
        let res = self.sink.draw(index, draw);
        self.ctx().check(res)
    }

    pub fn draw_indexed(&mut self, index: u32, draw: &DrawIndexed) -> Result<()> {
        self.recording(index, "draw in")?;
        self.require_queue(&[QueueType::Graphics], "draws need a graphics queue")?;
        let res = self.sink.draw_indexed(index, draw);
        self.ctx().check(res)
    }

    pub fn draw_indirect(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.recording(index, "draw in")?;
        self.require_queue(&[QueueType::Graphics], "draws need a graphics queue")?;
        let res = self
            .sink
            .draw_indirect(index, buffer, offset, draw_count, stride);
        self.ctx().check(res)
    }

    pub fn dispatch(&mut self, index: u32, x: u32, y: u32, z: u32) -> Result<()> {
        self.recording(index, "dispatch in")?;
        self.require_queue(
            &[QueueType::Graphics, QueueType::Compute],
            "dispatches need a graphics or compute queue",
        )?;
        let res = self.sink.dispatch(index, x, y, z);
        self.ctx().check(res)
    }

    /// Copy `regions` from `src` to `dst`. Every region must fit both
    /// buffers.
    pub fn copy_buffer(
        &mut self,
        index: u32,
        src: &Buffer,
        dst: &Buffer,
        regions: &[BufferCopy],
    ) -> Result<()> {
        self.recording(index, "copy in")?;
        let fits = |offset: u64, size: u64, buf: &Buffer| {
            offset.checked_add(size).map_or(false, |end| end <= buf.size())
        };
        let ok = regions.iter().all(|r| {
            r.size > 0 && fits(r.src_offset, r.size, src) && fits(r.dst_offset, r.size, dst)
        });
        if !ok {
            return Err(self
                .ctx()
                .fatal(GPUError::InvalidUsage("copy region out of bounds or empty")));
        }
        let res = self.sink.copy_buffer(index, src, dst, regions);
        self.ctx().check(res)
    }

    /// Execute recorded secondary buffers from buffer `index`.
    ///
    /// A primary `secondary` is ignored.
    pub fn execute_secondary_command_buffers(
        &mut self,
        index: u32,
        secondary: &CommandBuffer,
        indices: &[u32],
    ) -> Result<()> {
        self.recording(index, "execute secondaries in")?;
        if secondary.level != CommandBufferLevel::Secondary {
            log::debug!(
                "Ignoring primary command buffer '{}' passed as secondary",
                secondary.debug_name
            );
            return Ok(());
        }
        self.same_device(secondary.ctx())?;
        for &i in indices {
            let state = secondary.checked_state(i)?;
            if state != CommandBufferState::Executable {
                return Err(secondary.invalid_state(i, state, "execute"));
            }
        }
        let res = self
            .sink
            .execute_secondary(index, secondary.sink.as_ref(), indices);
        self.ctx().check(res)
    }

    pub fn build_acceleration_structure(
        &mut self,
        index: u32,
        build: &AccelerationStructureBuild,
    ) -> Result<()> {
        self.recording(index, "build an acceleration structure in")?;
        self.require_queue(
            &[QueueType::Graphics, QueueType::Compute],
            "acceleration structure builds need a graphics or compute queue",
        )?;
        let res = self.sink.build_acceleration_structure(index, build);
        self.ctx().check(res)
    }

    pub fn begin_debug_label(&mut self, index: u32, label: &str, colour: [f32; 4]) -> Result<()> {
        self.recording(index, "label")?;
        self.sink.begin_debug_label(index, label, colour);
        Ok(())
    }

    pub fn end_debug_label(&mut self, index: u32) -> Result<()> {
        self.recording(index, "label")?;
        self.sink.end_debug_label(index);
        Ok(())
    }
}
