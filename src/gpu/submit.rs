//! Queue submission of recorded command buffers.

use smallvec::SmallVec;

use super::{
    CommandBuffer, CommandBufferLevel, CommandBufferState, CommandBufferUsageBit, Context, Fence,
    GPUError, PipelineStageBit, Result, Semaphore, SemaphoreType,
};

/// One batch of a [`CommandBuffer::submit`] call.
///
/// `wait_values` and `signal_values` may be left empty when no timeline
/// semaphore is involved; otherwise they run parallel to their semaphore
/// list and entries for binary semaphores are ignored.
#[derive(Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub command_buffer_indices: &'a [u32],
    pub wait_semaphores: &'a [&'a Semaphore],
    pub wait_dst_pipeline_stages: &'a [PipelineStageBit],
    pub wait_values: &'a [u64],
    pub signal_semaphores: &'a [&'a Semaphore],
    pub signal_values: &'a [u64],
    /// Signalled when this batch completes.
    pub fence: Option<&'a Fence>,
}

impl std::fmt::Debug for SubmitInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |s: &[&Semaphore]| s.iter().map(|s| s.debug_name().to_string()).collect::<Vec<_>>();
        f.debug_struct("SubmitInfo")
            .field("command_buffer_indices", &self.command_buffer_indices)
            .field("wait_semaphores", &names(self.wait_semaphores))
            .field("wait_dst_pipeline_stages", &self.wait_dst_pipeline_stages)
            .field("wait_values", &self.wait_values)
            .field("signal_semaphores", &names(self.signal_semaphores))
            .field("signal_values", &self.signal_values)
            .field("fence", &self.fence.map(|f| f.debug_name()))
            .finish()
    }
}

/// Validated form of a [`SubmitInfo`] handed to the backend. Binary
/// semaphores carry a value of 0.
pub(crate) struct SubmitBatch<'a> {
    pub(crate) indices: &'a [u32],
    pub(crate) waits: SmallVec<[(&'a Semaphore, PipelineStageBit, u64); 4]>,
    pub(crate) signals: SmallVec<[(&'a Semaphore, u64); 4]>,
    pub(crate) fence: Option<&'a Fence>,
}

#[track_caller]
fn semaphore_values<'a>(
    ctx: &Context,
    semaphores: &[&'a Semaphore],
    values: &[u64],
    field: &'static str,
) -> Result<SmallVec<[(&'a Semaphore, u64); 4]>> {
    if !values.is_empty() && values.len() != semaphores.len() {
        return Err(ctx.fatal(GPUError::SubmitLengthMismatch {
            field,
            expected: semaphores.len(),
            found: values.len(),
        }));
    }

    let mut out = SmallVec::new();
    for (i, sem) in semaphores.iter().enumerate() {
        if !ctx.same_device(sem.context()) {
            return Err(ctx.fatal(GPUError::InvalidUsage(
                "semaphore was created on a different context",
            )));
        }
        let value = match sem.semaphore_type() {
            SemaphoreType::Binary => 0,
            SemaphoreType::Timeline => match values.get(i) {
                Some(v) => *v,
                None => {
                    return Err(ctx.fatal(GPUError::SubmitLengthMismatch {
                        field,
                        expected: semaphores.len(),
                        found: values.len(),
                    }))
                }
            },
        };
        out.push((*sem, value));
    }
    Ok(out)
}

impl CommandBuffer {
    /// Submit batches of command buffers to the pool's queue, in order.
    ///
    /// `fence` is signalled once every batch has completed. Submitted
    /// buffers are `Pending` until then.
    pub fn submit(&mut self, infos: &[SubmitInfo<'_>], fence: Option<&Fence>) -> Result<()> {
        self.pool.assert_owner();
        let ctx = self.ctx().clone();
        if self.level() != CommandBufferLevel::Primary {
            return Err(ctx.fatal(GPUError::InvalidUsage(
                "secondary command buffers are executed from a primary, not submitted",
            )));
        }

        let mut batches: SmallVec<[SubmitBatch<'_>; 2]> = SmallVec::new();
        // An index already submitted earlier in this call counts as Pending.
        let mut submitted: SmallVec<[u32; 8]> = SmallVec::new();
        for info in infos {
            if info.wait_dst_pipeline_stages.len() != info.wait_semaphores.len() {
                return Err(ctx.fatal(GPUError::SubmitLengthMismatch {
                    field: "wait_dst_pipeline_stages",
                    expected: info.wait_semaphores.len(),
                    found: info.wait_dst_pipeline_stages.len(),
                }));
            }
            let waits = semaphore_values(&ctx, info.wait_semaphores, info.wait_values, "wait_values")?;
            let signals = semaphore_values(
                &ctx,
                info.signal_semaphores,
                info.signal_values,
                "signal_values",
            )?;

            for &index in info.command_buffer_indices {
                let state = if submitted.contains(&index) {
                    CommandBufferState::Pending
                } else {
                    self.checked_state(index)?
                };
                let simultaneous = self.slots[index as usize]
                    .usage
                    .contains(CommandBufferUsageBit::SIMULTANEOUS);
                let ok = match state {
                    CommandBufferState::Executable => true,
                    CommandBufferState::Pending => simultaneous,
                    _ => false,
                };
                if !ok {
                    return Err(ctx.fatal(GPUError::InvalidCommandBufferState {
                        index,
                        state,
                        operation: "submit",
                    }));
                }
                submitted.push(index);
            }

            if let Some(f) = info.fence {
                if !ctx.same_device(f.context()) {
                    return Err(ctx.fatal(GPUError::InvalidUsage(
                        "fence was created on a different context",
                    )));
                }
            }

            batches.push(SubmitBatch {
                indices: info.command_buffer_indices,
                waits: waits
                    .into_iter()
                    .zip(info.wait_dst_pipeline_stages.iter().copied())
                    .map(|((sem, value), stage)| (sem, stage, value))
                    .collect(),
                signals,
                fence: info.fence,
            });
        }

        if let Some(fence) = fence {
            if !ctx.same_device(fence.context()) {
                return Err(ctx.fatal(GPUError::InvalidUsage(
                    "fence was created on a different context",
                )));
            }
            match batches.last_mut() {
                Some(last) if last.fence.is_none() => last.fence = Some(fence),
                _ => batches.push(SubmitBatch {
                    indices: &[],
                    waits: SmallVec::new(),
                    signals: SmallVec::new(),
                    fence: Some(fence),
                }),
            }
        }

        if batches.is_empty() {
            return Ok(());
        }

        let res = self.sink.submit(&batches);
        let value = ctx.check(res)?;
        self.pool.note_submitted(value);
        for info in infos {
            for &index in info.command_buffer_indices {
                let slot = &mut self.slots[index as usize];
                slot.state = CommandBufferState::Pending;
                slot.pending_value = slot.pending_value.max(value);
            }
        }
        log::trace!(
            "Submitted {} batch(es) to the {:?} queue, completes at {}",
            batches.len(),
            self.queue_type(),
            value
        );
        Ok(())
    }
}
