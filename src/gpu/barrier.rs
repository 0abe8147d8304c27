//! Barrier validation and translation.
//!
//! A [`Barrier`] is written in explicit-barrier terms (access masks plus
//! image layouts). On explicit backends it maps almost 1:1 onto a native
//! barrier. On resource-state backends it becomes a before/after state pair
//! on the target resource, split through `COMMON` when the resource changes
//! queues.

use smallvec::SmallVec;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::{
    buffer_state_for, image_state_for, AccessBit, BarrierModel, Buffer, Context, GPUError, Image,
    ImageLayout, QueueType, ResourceState, Result, SubresourceRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum BarrierType {
    /// Global memory dependency; no resource.
    #[default]
    Memory,
    Buffer,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarrierTarget<'a> {
    #[default]
    None,
    Buffer {
        buffer: &'a Buffer,
        offset: u64,
        /// `None` covers the rest of the buffer.
        size: Option<u64>,
    },
    Image {
        image: &'a Image,
        range: SubresourceRange,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierCreateInfo<'a> {
    pub debug_name: &'a str,
    pub barrier_type: BarrierType,
    pub src_access: AccessBit,
    pub dst_access: AccessBit,
    /// `None` on both sides means no queue ownership transfer.
    pub src_queue: Option<QueueType>,
    pub dst_queue: Option<QueueType>,
    pub target: BarrierTarget<'a>,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExplicitTarget<'a> {
    Global,
    Buffer {
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
    },
    Image {
        image: &'a Image,
        range: SubresourceRange,
    },
}

/// Native-shaped barrier for explicit backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExplicitBarrier<'a> {
    pub(crate) target: ExplicitTarget<'a>,
    pub(crate) src_access: AccessBit,
    pub(crate) dst_access: AccessBit,
    pub(crate) old_layout: ImageLayout,
    pub(crate) new_layout: ImageLayout,
    pub(crate) src_queue: Option<QueueType>,
    pub(crate) dst_queue: Option<QueueType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionTarget<'a> {
    Global,
    Buffer(&'a Buffer),
    Image(&'a Image, SubresourceRange),
}

impl TransitionTarget<'_> {
    fn tracked_state(&self) -> ResourceState {
        match self {
            TransitionTarget::Global => ResourceState::COMMON,
            TransitionTarget::Buffer(b) => b.tracked_state(),
            TransitionTarget::Image(i, _) => i.tracked_state(),
        }
    }

    fn set_tracked_state(&self, state: ResourceState) {
        match self {
            TransitionTarget::Global => {}
            TransitionTarget::Buffer(b) => b.set_tracked_state(state),
            TransitionTarget::Image(i, _) => i.set_tracked_state(state),
        }
    }

    /// Tracked state is per resource, so image ranges are ignored.
    fn same_resource(&self, other: &TransitionTarget<'_>) -> bool {
        match (self, other) {
            (TransitionTarget::Buffer(a), TransitionTarget::Buffer(b)) => a == b,
            (TransitionTarget::Image(a, _), TransitionTarget::Image(b, _)) => a == b,
            _ => false,
        }
    }
}

/// Tracked states a batch of barriers leaves its resources in.
///
/// Later barriers of the same batch see earlier updates. Nothing is written
/// back to the resources until [`StateUpdates::commit`].
#[derive(Debug, Default)]
pub(crate) struct StateUpdates<'a>(SmallVec<[(TransitionTarget<'a>, ResourceState); 4]>);

impl<'a> StateUpdates<'a> {
    fn current(&self, target: &TransitionTarget<'a>) -> ResourceState {
        self.0
            .iter()
            .find(|(t, _)| t.same_resource(target))
            .map_or_else(|| target.tracked_state(), |(_, state)| *state)
    }

    fn set(&mut self, target: TransitionTarget<'a>, state: ResourceState) {
        if let TransitionTarget::Global = target {
            return;
        }
        match self.0.iter_mut().find(|(t, _)| t.same_resource(&target)) {
            Some(entry) => entry.1 = state,
            None => self.0.push((target, state)),
        }
    }

    pub(crate) fn commit(self) {
        for (target, state) in self.0 {
            target.set_tracked_state(state);
        }
    }
}

/// One native resource-state barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition<'a> {
    State {
        target: TransitionTarget<'a>,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders unordered-access work without changing state. A `Global`
    /// target covers every resource.
    Uav { target: TransitionTarget<'a> },
}

/// Resource-state translation of a barrier, resolved at record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResourceStatePlan<'a> {
    target: TransitionTarget<'a>,
    /// `None` takes the state the resource is tracked in.
    before: Option<ResourceState>,
    after: ResourceState,
    ownership: Option<(QueueType, QueueType)>,
    uav: bool,
}

impl<'a> ResourceStatePlan<'a> {
    /// Native transitions for recording on a `queue` queue. The target's
    /// new tracked state goes into `updates`.
    pub(crate) fn resolve(
        &self,
        queue: QueueType,
        updates: &mut StateUpdates<'a>,
    ) -> Result<SmallVec<[Transition<'a>; 2]>, String> {
        let mut out = SmallVec::new();
        if let TransitionTarget::Global = self.target {
            if self.uav {
                out.push(Transition::Uav {
                    target: TransitionTarget::Global,
                });
            }
            return Ok(out);
        }

        let mut before = self.before.unwrap_or_else(|| updates.current(&self.target));
        let after = self.after;
        if queue == QueueType::Transfer {
            if !after.is_copy_legal() {
                return Err(format!(
                    "state {:?} cannot be used on a transfer queue",
                    after
                ));
            }
            if !before.is_copy_legal() {
                // Copy queues only ever see resources decayed to COMMON.
                before = ResourceState::COMMON;
            }
        }

        let target = self.target;
        let tracked = match self.ownership {
            Some((src, dst)) => {
                let release = queue == src || queue != dst;
                let acquire = queue == dst || queue != src;
                if release && before != ResourceState::COMMON {
                    out.push(Transition::State {
                        target,
                        before,
                        after: ResourceState::COMMON,
                    });
                }
                if acquire && after != ResourceState::COMMON {
                    out.push(Transition::State {
                        target,
                        before: ResourceState::COMMON,
                        after,
                    });
                }
                if acquire {
                    after
                } else {
                    ResourceState::COMMON
                }
            }
            None => {
                if before != after {
                    out.push(Transition::State {
                        target,
                        before,
                        after,
                    });
                } else if self.uav && after.contains(ResourceState::UNORDERED_ACCESS) {
                    out.push(Transition::Uav { target });
                }
                after
            }
        };
        updates.set(target, tracked);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierPlan<'a> {
    /// `None` when the barrier degraded to nothing.
    Explicit(Option<ExplicitBarrier<'a>>),
    ResourceState(ResourceStatePlan<'a>),
}

/// A validated state transition, ready to be recorded.
///
/// Barriers borrow the resource they transition and are meant to be built
/// right before the `pipeline_barrier` or `wait_events` call that uses them.
#[derive(Debug, Clone, Copy)]
pub struct Barrier<'a> {
    info: BarrierCreateInfo<'a>,
    model: BarrierModel,
    pub(crate) plan: BarrierPlan<'a>,
}

impl<'a> Barrier<'a> {
    pub fn new(ctx: &Context, info: &BarrierCreateInfo<'a>) -> Result<Self> {
        if let Err(reason) = validate(ctx, info) {
            let name = if info.debug_name.is_empty() {
                "<unnamed>"
            } else {
                info.debug_name
            };
            return Err(ctx.fatal(GPUError::InvalidBarrier(format!("{}: {}", name, reason))));
        }

        let model = ctx.barrier_model();
        let plan = match model {
            BarrierModel::Explicit => BarrierPlan::Explicit(explicit_plan(info)),
            BarrierModel::ResourceState => BarrierPlan::ResourceState(resource_state_plan(info)),
        };
        Ok(Self {
            info: *info,
            model,
            plan,
        })
    }

    pub fn info(&self) -> BarrierCreateInfo<'a> {
        self.info
    }

    pub fn model(&self) -> BarrierModel {
        self.model
    }

    /// Whether recording the barrier changes an image layout.
    pub fn transitions_layout(&self) -> bool {
        self.info.barrier_type == BarrierType::Image
            && self.info.old_layout != self.info.new_layout
    }
}

fn ownership(info: &BarrierCreateInfo) -> Option<(QueueType, QueueType)> {
    match (info.src_queue, info.dst_queue) {
        (Some(src), Some(dst)) if src != dst => Some((src, dst)),
        _ => None,
    }
}

fn validate(ctx: &Context, info: &BarrierCreateInfo) -> std::result::Result<(), String> {
    if info.src_queue.is_some() != info.dst_queue.is_some() {
        return Err("queue ownership transfers need both a source and a destination queue".into());
    }

    match (info.barrier_type, info.target) {
        (BarrierType::Memory, BarrierTarget::None) => {
            if info.old_layout != info.new_layout && info.new_layout != ImageLayout::Undefined {
                return Err("memory barriers cannot change layouts".into());
            }
            Ok(())
        }
        (BarrierType::Buffer, BarrierTarget::Buffer { buffer, offset, size }) => {
            if buffer.backend() != ctx.backend() {
                return Err(format!("buffer '{}' belongs to another backend", buffer.debug_name()));
            }
            let end = match size {
                Some(0) => return Err("buffer barriers cannot cover zero bytes".into()),
                Some(size) => offset.checked_add(size),
                None => Some(buffer.size()),
            };
            match end {
                Some(end) if offset < buffer.size() && end <= buffer.size() => Ok(()),
                _ => Err(format!(
                    "range at offset {} exceeds buffer '{}' of {} bytes",
                    offset,
                    buffer.debug_name(),
                    buffer.size()
                )),
            }
        }
        (BarrierType::Image, BarrierTarget::Image { image, range }) => {
            if image.backend() != ctx.backend() {
                return Err(format!("image '{}' belongs to another backend", image.debug_name()));
            }
            let mips_ok = range.level_count > 0
                && range
                    .base_mip
                    .checked_add(range.level_count)
                    .map_or(false, |end| end <= image.mip_levels());
            let layers_ok = range.layer_count > 0
                && range
                    .base_layer
                    .checked_add(range.layer_count)
                    .map_or(false, |end| end <= image.array_layers());
            if !mips_ok || !layers_ok {
                return Err(format!(
                    "subresource range {:?} exceeds image '{}' ({} mips, {} layers)",
                    range,
                    image.debug_name(),
                    image.mip_levels(),
                    image.array_layers()
                ));
            }
            if matches!(
                info.new_layout,
                ImageLayout::Undefined | ImageLayout::Preinitialised
            ) {
                return Err(format!("cannot transition into {:?}", info.new_layout));
            }
            if !info.new_layout.allowed_by(image.usage()) {
                return Err(format!(
                    "image '{}' with usage {:?} cannot be put into {:?}",
                    image.debug_name(),
                    image.usage(),
                    info.new_layout
                ));
            }
            let illegal = info.dst_access
                & AccessBit::WRITES
                & !info.new_layout.writable_access();
            if !illegal.is_empty() {
                return Err(format!(
                    "{:?} writes are not allowed in {:?}",
                    illegal, info.new_layout
                ));
            }
            Ok(())
        }
        (ty, _) => Err(format!("target does not match barrier type {:?}", ty)),
    }
}

fn explicit_plan<'a>(info: &BarrierCreateInfo<'a>) -> Option<ExplicitBarrier<'a>> {
    let transfer = ownership(info);
    let global = ExplicitBarrier {
        target: ExplicitTarget::Global,
        src_access: info.src_access,
        dst_access: info.dst_access,
        old_layout: ImageLayout::Undefined,
        new_layout: ImageLayout::Undefined,
        src_queue: None,
        dst_queue: None,
    };
    let writes = info.src_access.has_write() || info.dst_access.has_write();

    match info.target {
        BarrierTarget::None => Some(global),
        BarrierTarget::Buffer {
            buffer,
            offset,
            size,
        } => Some(ExplicitBarrier {
            target: ExplicitTarget::Buffer {
                buffer,
                offset,
                size: size.unwrap_or(buffer.size() - offset),
            },
            src_access: info.src_access,
            dst_access: info.dst_access,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            src_queue: transfer.map(|t| t.0),
            dst_queue: transfer.map(|t| t.1),
        }),
        BarrierTarget::Image { image, range } => {
            if info.old_layout == info.new_layout && transfer.is_none() {
                return writes.then_some(global);
            }
            Some(ExplicitBarrier {
                target: ExplicitTarget::Image { image, range },
                src_access: info.src_access,
                dst_access: info.dst_access,
                old_layout: info.old_layout,
                new_layout: info.new_layout,
                src_queue: transfer.map(|t| t.0),
                dst_queue: transfer.map(|t| t.1),
            })
        }
    }
}

fn resource_state_plan<'a>(info: &BarrierCreateInfo<'a>) -> ResourceStatePlan<'a> {
    let uav = info.src_access.contains(AccessBit::SHADER_WRITE)
        || info.dst_access.contains(AccessBit::SHADER_WRITE);
    let ownership = ownership(info);

    match info.target {
        BarrierTarget::None => ResourceStatePlan {
            target: TransitionTarget::Global,
            before: None,
            after: ResourceState::COMMON,
            ownership: None,
            uav: info.src_access.has_write() || info.dst_access.has_write(),
        },
        BarrierTarget::Buffer { buffer, .. } => ResourceStatePlan {
            target: TransitionTarget::Buffer(buffer),
            before: (!info.src_access.is_empty()).then(|| buffer_state_for(info.src_access)),
            after: buffer_state_for(info.dst_access),
            ownership,
            uav,
        },
        BarrierTarget::Image { image, range } => ResourceStatePlan {
            target: TransitionTarget::Image(image, range),
            before: image_state_for(info.old_layout, info.src_access),
            after: image_state_for(info.new_layout, info.dst_access)
                .unwrap_or(ResourceState::COMMON),
            ownership,
            uav,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Backend, BufferCreateInfo, BufferUsageBit, ContextInfo, ImageCreateInfo, ImageUsageBit,
        NativeBuffer, NativeImage, SoftwareDeviceInfo,
    };

    fn context(model: BarrierModel) -> Context {
        Context::headless(&ContextInfo {
            backend: Some(Backend::Software),
            software: SoftwareDeviceInfo {
                barrier_model: model,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn image(ctx: &Context, usage: ImageUsageBit) -> Image {
        Image::from_native(
            ctx,
            &ImageCreateInfo {
                debug_name: "target",
                mip_levels: 4,
                array_layers: 2,
                usage,
                ..Default::default()
            },
            NativeImage::Software,
        )
        .unwrap()
    }

    fn buffer(ctx: &Context, size: u64) -> Buffer {
        Buffer::from_native(
            ctx,
            &BufferCreateInfo {
                debug_name: "buf",
                size,
                usage: BufferUsageBit::TRANSFER_SRC | BufferUsageBit::TRANSFER_DST,
                ..Default::default()
            },
            NativeBuffer::Software,
        )
        .unwrap()
    }

    /// Resolve one barrier and apply its state update, as a successful
    /// `pipeline_barrier` call does.
    fn record<'a>(
        plan: &ResourceStatePlan<'a>,
        queue: QueueType,
    ) -> std::result::Result<SmallVec<[Transition<'a>; 2]>, String> {
        let mut updates = StateUpdates::default();
        let out = plan.resolve(queue, &mut updates)?;
        updates.commit();
        Ok(out)
    }

    fn image_barrier<'a>(
        img: &'a Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_access: AccessBit,
        dst_access: AccessBit,
    ) -> BarrierCreateInfo<'a> {
        BarrierCreateInfo {
            debug_name: "test",
            barrier_type: BarrierType::Image,
            src_access,
            dst_access,
            target: BarrierTarget::Image {
                image: img,
                range: SubresourceRange::whole(4, 2),
            },
            old_layout,
            new_layout,
            ..Default::default()
        }
    }

    #[test]
    fn info_round_trips() {
        let ctx = context(BarrierModel::Explicit);
        let img = image(&ctx, ImageUsageBit::SAMPLED | ImageUsageBit::TRANSFER_DST);
        let info = image_barrier(
            &img,
            ImageLayout::TransferDstOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::TRANSFER_WRITE,
            AccessBit::SHADER_READ,
        );
        let barrier = Barrier::new(&ctx, &info).unwrap();
        assert_eq!(barrier.info(), info);
        assert!(barrier.transitions_layout());
    }

    #[test]
    fn same_layout_read_barrier_is_empty() {
        let ctx = context(BarrierModel::Explicit);
        let img = image(&ctx, ImageUsageBit::SAMPLED);
        let info = image_barrier(
            &img,
            ImageLayout::ShaderReadOnlyOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::SHADER_READ,
            AccessBit::SHADER_READ,
        );
        let barrier = Barrier::new(&ctx, &info).unwrap();
        assert!(!barrier.transitions_layout());
        assert_eq!(barrier.plan, BarrierPlan::Explicit(None));
    }

    #[test]
    fn same_layout_write_barrier_degrades_to_memory_barrier() {
        let ctx = context(BarrierModel::Explicit);
        let img = image(&ctx, ImageUsageBit::STORAGE);
        let info = image_barrier(
            &img,
            ImageLayout::General,
            ImageLayout::General,
            AccessBit::SHADER_WRITE,
            AccessBit::SHADER_READ,
        );
        match Barrier::new(&ctx, &info).unwrap().plan {
            BarrierPlan::Explicit(Some(b)) => {
                assert_eq!(b.target, ExplicitTarget::Global);
                assert_eq!(b.src_access, AccessBit::SHADER_WRITE);
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn same_layout_produces_no_state_transition() {
        let ctx = context(BarrierModel::ResourceState);
        let img = image(&ctx, ImageUsageBit::SAMPLED);
        let info = image_barrier(
            &img,
            ImageLayout::ShaderReadOnlyOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::SHADER_READ,
            AccessBit::SHADER_READ,
        );
        let barrier = Barrier::new(&ctx, &info).unwrap();
        let BarrierPlan::ResourceState(plan) = barrier.plan else {
            panic!("expected a resource-state plan");
        };
        assert!(record(&plan, QueueType::Graphics).unwrap().is_empty());
    }

    #[test]
    fn undefined_old_layout_uses_tracked_state() {
        let ctx = context(BarrierModel::ResourceState);
        let img = image(&ctx, ImageUsageBit::TRANSFER_DST | ImageUsageBit::SAMPLED);
        img.set_tracked_state(ResourceState::SHADER_RESOURCE);
        let info = image_barrier(
            &img,
            ImageLayout::Undefined,
            ImageLayout::TransferDstOptimal,
            AccessBit::empty(),
            AccessBit::TRANSFER_WRITE,
        );
        let BarrierPlan::ResourceState(plan) = Barrier::new(&ctx, &info).unwrap().plan else {
            panic!("expected a resource-state plan");
        };
        let transitions = record(&plan, QueueType::Graphics).unwrap();
        assert_eq!(transitions.len(), 1);
        assert!(matches!(
            transitions[0],
            Transition::State { before, after, .. }
                if before == ResourceState::SHADER_RESOURCE && after == ResourceState::COPY_DEST
        ));
        assert_eq!(img.tracked_state(), ResourceState::COPY_DEST);
    }

    #[test]
    fn state_updates_chain_within_a_batch_and_wait_for_commit() {
        let ctx = context(BarrierModel::ResourceState);
        let buf = buffer(&ctx, 64);
        let to = |dst_access| BarrierCreateInfo {
            barrier_type: BarrierType::Buffer,
            dst_access,
            target: BarrierTarget::Buffer {
                buffer: &buf,
                offset: 0,
                size: None,
            },
            ..Default::default()
        };
        let plans = [to(AccessBit::TRANSFER_WRITE), to(AccessBit::TRANSFER_READ)].map(|info| {
            match Barrier::new(&ctx, &info).unwrap().plan {
                BarrierPlan::ResourceState(plan) => plan,
                other => panic!("unexpected plan {:?}", other),
            }
        });

        let mut updates = StateUpdates::default();
        plans[0].resolve(QueueType::Graphics, &mut updates).unwrap();
        let second = plans[1].resolve(QueueType::Graphics, &mut updates).unwrap();
        assert!(matches!(
            second[0],
            Transition::State { before, after, .. }
                if before == ResourceState::COPY_DEST && after == ResourceState::COPY_SOURCE
        ));
        assert_eq!(buf.tracked_state(), ResourceState::COMMON);

        updates.commit();
        assert_eq!(buf.tracked_state(), ResourceState::COPY_SOURCE);
    }

    #[test]
    fn queue_transfer_splits_through_common() {
        let ctx = context(BarrierModel::ResourceState);
        let buf = buffer(&ctx, 256);
        let info = BarrierCreateInfo {
            barrier_type: BarrierType::Buffer,
            src_access: AccessBit::TRANSFER_WRITE,
            dst_access: AccessBit::SHADER_READ,
            src_queue: Some(QueueType::Transfer),
            dst_queue: Some(QueueType::Graphics),
            target: BarrierTarget::Buffer {
                buffer: &buf,
                offset: 0,
                size: None,
            },
            ..Default::default()
        };
        let BarrierPlan::ResourceState(plan) = Barrier::new(&ctx, &info).unwrap().plan else {
            panic!("expected a resource-state plan");
        };

        let release = record(&plan, QueueType::Transfer).unwrap();
        assert_eq!(release.len(), 1);
        assert!(matches!(
            release[0],
            Transition::State { before, after, .. }
                if before == ResourceState::COPY_DEST && after == ResourceState::COMMON
        ));
        assert_eq!(buf.tracked_state(), ResourceState::COMMON);

        let acquire = record(&plan, QueueType::Graphics).unwrap();
        assert_eq!(acquire.len(), 1);
        assert!(matches!(
            acquire[0],
            Transition::State { before, after, .. }
                if before == ResourceState::COMMON && after == ResourceState::SHADER_RESOURCE
        ));
        assert_eq!(buf.tracked_state(), ResourceState::SHADER_RESOURCE);

        // Recorded on a third queue, both halves are emitted.
        assert_eq!(record(&plan, QueueType::Compute).unwrap().len(), 2);
    }

    #[test]
    fn transfer_queue_rejects_non_copy_states() {
        let ctx = context(BarrierModel::ResourceState);
        let img = image(&ctx, ImageUsageBit::SAMPLED);
        let info = image_barrier(
            &img,
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::empty(),
            AccessBit::SHADER_READ,
        );
        let BarrierPlan::ResourceState(plan) = Barrier::new(&ctx, &info).unwrap().plan else {
            panic!("expected a resource-state plan");
        };
        assert!(record(&plan, QueueType::Transfer).is_err());
    }

    #[test]
    fn transfer_queue_decays_before_state() {
        let ctx = context(BarrierModel::ResourceState);
        let buf = buffer(&ctx, 64);
        buf.set_tracked_state(ResourceState::SHADER_RESOURCE);
        let info = BarrierCreateInfo {
            barrier_type: BarrierType::Buffer,
            dst_access: AccessBit::TRANSFER_WRITE,
            target: BarrierTarget::Buffer {
                buffer: &buf,
                offset: 0,
                size: Some(64),
            },
            ..Default::default()
        };
        let BarrierPlan::ResourceState(plan) = Barrier::new(&ctx, &info).unwrap().plan else {
            panic!("expected a resource-state plan");
        };
        let t = record(&plan, QueueType::Transfer).unwrap();
        assert!(matches!(
            t[0],
            Transition::State { before, .. } if before == ResourceState::COMMON
        ));
    }

    #[test]
    fn memory_write_barrier_becomes_global_uav() {
        let ctx = context(BarrierModel::ResourceState);
        let info = BarrierCreateInfo {
            barrier_type: BarrierType::Memory,
            src_access: AccessBit::SHADER_WRITE,
            dst_access: AccessBit::SHADER_READ,
            ..Default::default()
        };
        let BarrierPlan::ResourceState(plan) = Barrier::new(&ctx, &info).unwrap().plan else {
            panic!("expected a resource-state plan");
        };
        let t = record(&plan, QueueType::Compute).unwrap();
        assert_eq!(
            t.as_slice(),
            &[Transition::Uav {
                target: TransitionTarget::Global
            }]
        );
    }

    #[test]
    fn invalid_barriers_are_rejected() {
        let ctx = context(BarrierModel::Explicit);
        let img = image(&ctx, ImageUsageBit::SAMPLED);
        let buf = buffer(&ctx, 16);

        // Layout the usage does not allow.
        let info = image_barrier(
            &img,
            ImageLayout::Undefined,
            ImageLayout::ColourAttachmentOptimal,
            AccessBit::empty(),
            AccessBit::COLOUR_ATTACHMENT_WRITE,
        );
        assert!(matches!(Barrier::new(&ctx, &info), Err(GPUError::InvalidBarrier(_))));

        // Writes into a read-only layout.
        let info = image_barrier(
            &img,
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::empty(),
            AccessBit::SHADER_WRITE,
        );
        assert!(Barrier::new(&ctx, &info).is_err());

        // Into Undefined.
        let info = image_barrier(
            &img,
            ImageLayout::ShaderReadOnlyOptimal,
            ImageLayout::Undefined,
            AccessBit::empty(),
            AccessBit::empty(),
        );
        assert!(Barrier::new(&ctx, &info).is_err());

        // Subresource range past the last mip.
        let mut info = image_barrier(
            &img,
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnlyOptimal,
            AccessBit::empty(),
            AccessBit::SHADER_READ,
        );
        info.target = BarrierTarget::Image {
            image: &img,
            range: SubresourceRange::new(3, 2, 0, 1),
        };
        assert!(Barrier::new(&ctx, &info).is_err());

        // Buffer range out of bounds.
        let info = BarrierCreateInfo {
            barrier_type: BarrierType::Buffer,
            target: BarrierTarget::Buffer {
                buffer: &buf,
                offset: 8,
                size: Some(16),
            },
            ..Default::default()
        };
        assert!(Barrier::new(&ctx, &info).is_err());

        // Type and target disagree.
        let info = BarrierCreateInfo {
            barrier_type: BarrierType::Image,
            target: BarrierTarget::Buffer {
                buffer: &buf,
                offset: 0,
                size: None,
            },
            ..Default::default()
        };
        assert!(Barrier::new(&ctx, &info).is_err());

        // Half-specified ownership transfer.
        let info = BarrierCreateInfo {
            src_queue: Some(QueueType::Graphics),
            ..Default::default()
        };
        assert!(Barrier::new(&ctx, &info).is_err());
    }
}
