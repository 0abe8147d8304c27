use std::any::Any;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{Counter, QueueOp, SoftBatch, SoftSignal, SoftWait, SoftwareDevice, SoftwareQueue, SoftwareResource, Worker};
use crate::gpu::command_buffer::{BarrierBatch, CommandSink, VertexBufferBinding};
use crate::gpu::submit::SubmitBatch;
use crate::gpu::{
    AccelerationStructureBuild, Backend, Buffer, BufferCopy, CommandBufferUsageBit,
    DependencyBit, DescriptorSet, Draw, DrawIndexed, Event, GPUError, IndexType, Pipeline,
    PipelineBindPoint, PipelineLayout, PipelineStageBit, QueueType, RawBuffer, RawEvent, RawFence,
    RawImage, RawSemaphore, ResourceState, Result, Semaphore, Transition, TransitionTarget,
};

/// One recorded command, as the queue worker sees it.
pub(crate) enum SoftCommand {
    Transition {
        resource: Arc<SoftwareResource>,
        before: ResourceState,
        after: ResourceState,
    },
    /// Execution and memory dependency. The worker runs commands in order,
    /// so this only shows up in traces.
    Barrier,
    SetEvent(Arc<Counter>),
    ResetEvent(Arc<Counter>),
    WaitEvents(Vec<Arc<Counter>>),
    Copy {
        src: Arc<SoftwareResource>,
        dst: Arc<SoftwareResource>,
        regions: SmallVec<[BufferCopy; 2]>,
    },
    /// Draws, dispatches and builds: costs `command_latency_us`, touches no
    /// memory.
    Work(&'static str),
    Execute(Arc<Vec<SoftCommand>>),
    Label(String),
}

/// Run `list` on `worker`. `false` means the device shut down mid-list.
pub(super) fn execute(list: &[SoftCommand], worker: &Worker) -> bool {
    for cmd in list {
        match cmd {
            SoftCommand::Transition {
                resource,
                before,
                after,
            } => transition(resource, *before, *after, worker.queue_type),
            SoftCommand::Barrier => log::trace!("{:?} queue: barrier", worker.queue_type),
            SoftCommand::SetEvent(e) => e.set(1),
            SoftCommand::ResetEvent(e) => e.set(0),
            SoftCommand::WaitEvents(events) => {
                if !events.iter().all(|e| e.wait_or_shutdown(1, &worker.shutdown)) {
                    return false;
                }
            }
            SoftCommand::Copy { src, dst, regions } => copy(src, dst, regions),
            SoftCommand::Work(what) => {
                log::trace!("{:?} queue: {}", worker.queue_type, what);
                if !worker.latency.is_zero() {
                    std::thread::sleep(worker.latency);
                }
            }
            SoftCommand::Execute(inner) => {
                if !execute(inner, worker) {
                    return false;
                }
            }
            SoftCommand::Label(label) => log::trace!("{:?} queue: label '{}'", worker.queue_type, label),
        }
    }
    true
}

fn transition(res: &SoftwareResource, before: ResourceState, after: ResourceState, queue: QueueType) {
    let actual = res.executed_state();
    // The transfer queue promotes and decays through COMMON implicitly.
    let copy_promotion = queue == QueueType::Transfer && before == ResourceState::COMMON;
    if actual != before && !copy_promotion {
        log::warn!(
            "'{}' transitioned from {:?} but is in {:?}",
            res.name,
            before,
            actual
        );
    }
    res.state
        .store(after.bits(), std::sync::atomic::Ordering::Release);
}

fn copy(src: &Arc<SoftwareResource>, dst: &Arc<SoftwareResource>, regions: &[BufferCopy]) {
    let span = |offset: u64, size: u64| -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(offset).ok()?;
        Some(start..start.checked_add(usize::try_from(size).ok()?)?)
    };

    if Arc::ptr_eq(src, dst) {
        let mut mem = src.memory.lock();
        for r in regions {
            match (span(r.src_offset, r.size), span(r.dst_offset, r.size)) {
                (Some(s), Some(d)) if s.end <= mem.len() && d.end <= mem.len() => {
                    mem.copy_within(s, d.start)
                }
                _ => log::error!("Copy region {:?} out of bounds of '{}'", r, src.name),
            }
        }
        return;
    }

    // Lock in address order so opposing copies on two queues cannot deadlock.
    let (first, second) = if Arc::as_ptr(src) < Arc::as_ptr(dst) {
        (src, dst)
    } else {
        (dst, src)
    };
    let mut a = first.memory.lock();
    let mut b = second.memory.lock();
    let (s_mem, d_mem) = if Arc::ptr_eq(first, src) {
        (&*a, &mut *b)
    } else {
        (&*b, &mut *a)
    };
    for r in regions {
        match (span(r.src_offset, r.size), span(r.dst_offset, r.size)) {
            (Some(s), Some(d)) if s.end <= s_mem.len() && d.end <= d_mem.len() => {
                d_mem[d].copy_from_slice(&s_mem[s])
            }
            _ => log::error!(
                "Copy region {:?} from '{}' to '{}' out of bounds",
                r,
                src.name,
                dst.name
            ),
        }
    }
}

fn mismatch(found: Backend) -> GPUError {
    GPUError::BackendMismatch {
        expected: Backend::Software,
        found,
    }
}

fn event_counter(event: &Event) -> Result<Arc<Counter>> {
    match &event.raw {
        RawEvent::Software(e) => Ok(e.signal.clone()),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(event.context().backend())),
    }
}

fn semaphore_counter(sem: &Semaphore) -> Result<Arc<Counter>> {
    match &sem.raw {
        RawSemaphore::Software(s) => Ok(s.signal.clone()),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(sem.context().backend())),
    }
}

fn buffer_resource(buffer: &Buffer) -> Result<Arc<SoftwareResource>> {
    match buffer.raw() {
        RawBuffer::Software(r) => Ok(r.clone()),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(buffer.backend())),
    }
}

fn target_resource(target: &TransitionTarget<'_>) -> Result<Option<Arc<SoftwareResource>>> {
    match target {
        TransitionTarget::Global => Ok(None),
        TransitionTarget::Buffer(b) => buffer_resource(b).map(Some),
        TransitionTarget::Image(i, _) => match i.raw() {
            RawImage::Software(r) => Ok(Some(r.clone())),
            #[allow(unreachable_patterns)]
            _ => Err(mismatch(i.backend())),
        },
    }
}

/// Command recorder for the software queues.
pub(crate) struct SoftwareSink {
    queue: Arc<SoftwareQueue>,
    recording: Vec<Vec<SoftCommand>>,
    finished: Vec<Option<Arc<Vec<SoftCommand>>>>,
}

impl SoftwareSink {
    pub(crate) fn new(dev: &SoftwareDevice, queue_type: QueueType, count: u32) -> Self {
        Self {
            queue: dev.queue(queue_type).clone(),
            recording: (0..count).map(|_| Vec::new()).collect(),
            finished: vec![None; count as usize],
        }
    }

    fn push(&mut self, index: u32, cmd: SoftCommand) {
        self.recording[index as usize].push(cmd);
    }

    fn barriers(&mut self, index: u32, batch: &BarrierBatch<'_>) -> Result<()> {
        match batch {
            BarrierBatch::Explicit(barriers) => {
                if !barriers.is_empty() {
                    self.push(index, SoftCommand::Barrier);
                }
            }
            BarrierBatch::ResourceState(transitions) => {
                for t in transitions {
                    match t {
                        Transition::State {
                            target,
                            before,
                            after,
                        } => match target_resource(target)? {
                            Some(resource) => self.push(
                                index,
                                SoftCommand::Transition {
                                    resource,
                                    before: *before,
                                    after: *after,
                                },
                            ),
                            None => self.push(index, SoftCommand::Barrier),
                        },
                        Transition::Uav { .. } => self.push(index, SoftCommand::Barrier),
                    }
                }
            }
        }
        Ok(())
    }
}

impl CommandSink for SoftwareSink {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn begin(&mut self, index: u32, _usage: CommandBufferUsageBit) -> Result<()> {
        self.recording[index as usize].clear();
        self.finished[index as usize] = None;
        Ok(())
    }

    fn end(&mut self, index: u32) -> Result<()> {
        let cmds = std::mem::take(&mut self.recording[index as usize]);
        self.finished[index as usize] = Some(Arc::new(cmds));
        Ok(())
    }

    fn reset(&mut self, index: u32, _release_resources: bool) -> Result<()> {
        self.recording[index as usize].clear();
        self.finished[index as usize] = None;
        Ok(())
    }

    fn pipeline_barrier(
        &mut self,
        index: u32,
        _src_stage: PipelineStageBit,
        _dst_stage: PipelineStageBit,
        _dependency: DependencyBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()> {
        if barriers.is_empty() {
            self.push(index, SoftCommand::Barrier);
            return Ok(());
        }
        self.barriers(index, barriers)
    }

    fn set_event(&mut self, index: u32, event: &Event, _stage: PipelineStageBit) -> Result<()> {
        let e = event_counter(event)?;
        self.push(index, SoftCommand::SetEvent(e));
        Ok(())
    }

    fn reset_event(&mut self, index: u32, event: &Event, _stage: PipelineStageBit) -> Result<()> {
        let e = event_counter(event)?;
        self.push(index, SoftCommand::ResetEvent(e));
        Ok(())
    }

    fn wait_events(
        &mut self,
        index: u32,
        events: &[&Event],
        _src_stage: PipelineStageBit,
        _dst_stage: PipelineStageBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()> {
        let counters = events
            .iter()
            .map(|e| event_counter(e))
            .collect::<Result<Vec<_>>>()?;
        self.push(index, SoftCommand::WaitEvents(counters));
        self.barriers(index, barriers)
    }

    fn bind_pipeline(&mut self, _index: u32, _pipeline: &Pipeline) -> Result<()> {
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        _index: u32,
        _bind_point: PipelineBindPoint,
        _layout: &PipelineLayout,
        _first_set: u32,
        _sets: &[&DescriptorSet],
        _dynamic_offsets: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        _index: u32,
        _first_binding: u32,
        bindings: &[VertexBufferBinding<'_>],
    ) -> Result<()> {
        for b in bindings {
            buffer_resource(b.buffer)?;
        }
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        _index: u32,
        buffer: &Buffer,
        _offset: u64,
        _index_type: IndexType,
    ) -> Result<()> {
        buffer_resource(buffer).map(|_| ())
    }

    fn draw(&mut self, index: u32, _draw: &Draw) -> Result<()> {
        self.push(index, SoftCommand::Work("draw"));
        Ok(())
    }

    fn draw_indexed(&mut self, index: u32, _draw: &DrawIndexed) -> Result<()> {
        self.push(index, SoftCommand::Work("draw indexed"));
        Ok(())
    }

    fn draw_indirect(
        &mut self,
        index: u32,
        buffer: &Buffer,
        _offset: u64,
        _draw_count: u32,
        _stride: u32,
    ) -> Result<()> {
        buffer_resource(buffer)?;
        self.push(index, SoftCommand::Work("draw indirect"));
        Ok(())
    }

    fn dispatch(&mut self, index: u32, _x: u32, _y: u32, _z: u32) -> Result<()> {
        self.push(index, SoftCommand::Work("dispatch"));
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        index: u32,
        src: &Buffer,
        dst: &Buffer,
        regions: &[BufferCopy],
    ) -> Result<()> {
        let cmd = SoftCommand::Copy {
            src: buffer_resource(src)?,
            dst: buffer_resource(dst)?,
            regions: regions.iter().copied().collect(),
        };
        self.push(index, cmd);
        Ok(())
    }

    fn execute_secondary(
        &mut self,
        index: u32,
        secondary: &dyn CommandSink,
        indices: &[u32],
    ) -> Result<()> {
        let other = secondary
            .as_any()
            .downcast_ref::<SoftwareSink>()
            .ok_or(GPUError::InvalidUsage("secondary command buffer is not a software buffer"))?;
        for &i in indices {
            let list = other.finished[i as usize]
                .clone()
                .ok_or(GPUError::InvalidUsage("secondary command buffer was not recorded"))?;
            self.push(index, SoftCommand::Execute(list));
        }
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        index: u32,
        build: &AccelerationStructureBuild,
    ) -> Result<()> {
        log::trace!("Recording acceleration structure build '{}'", build.debug_name());
        self.push(index, SoftCommand::Work("acceleration structure build"));
        Ok(())
    }

    fn begin_debug_label(&mut self, index: u32, label: &str, _colour: [f32; 4]) {
        self.push(index, SoftCommand::Label(label.to_string()));
    }

    fn end_debug_label(&mut self, _index: u32) {}

    fn submit(&mut self, batches: &[SubmitBatch<'_>]) -> Result<u64> {
        let mut value = self.queue.completed_value();
        for batch in batches {
            let lists = batch
                .indices
                .iter()
                .map(|&i| {
                    self.finished[i as usize]
                        .clone()
                        .ok_or(GPUError::InvalidUsage("command buffer was not recorded"))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut waits = Vec::with_capacity(batch.waits.len());
            for (sem, _stage, v) in &batch.waits {
                let c = semaphore_counter(sem)?;
                waits.push(match sem.semaphore_type() {
                    crate::gpu::SemaphoreType::Binary => SoftWait::Binary(c),
                    crate::gpu::SemaphoreType::Timeline => SoftWait::Timeline(c, *v),
                });
            }

            let mut signals = Vec::with_capacity(batch.signals.len());
            for (sem, v) in &batch.signals {
                let c = semaphore_counter(sem)?;
                signals.push(match sem.semaphore_type() {
                    crate::gpu::SemaphoreType::Binary => SoftSignal::Binary(c),
                    crate::gpu::SemaphoreType::Timeline => SoftSignal::Timeline(c, *v),
                });
            }

            let fence = match batch.fence {
                Some(f) => match &f.raw {
                    RawFence::Software(f) => Some(f.signal.clone()),
                    #[allow(unreachable_patterns)]
                    _ => return Err(mismatch(f.context().backend())),
                },
                None => None,
            };

            value = self.queue.enqueue(QueueOp::Submit(SoftBatch {
                waits,
                lists,
                signals,
                fence,
            }))?;
        }
        Ok(value)
    }

    fn completed_value(&self) -> Result<u64> {
        Ok(self.queue.completed_value())
    }
}
