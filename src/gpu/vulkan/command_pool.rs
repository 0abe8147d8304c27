use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use ash::extensions::{ext, khr};
use ash::vk;
use smallvec::SmallVec;

use super::{subresource_range, VulkanDevice, VulkanQueue};
use crate::gpu::command_buffer::{BarrierBatch, CommandSink, VertexBufferBinding};
use crate::gpu::submit::SubmitBatch;
use crate::gpu::{
    AccelerationStructureBuild, Backend, Buffer, BufferCopy, CommandBufferCreateInfo,
    CommandBufferLevel, CommandBufferUsageBit, CommandPoolCreateInfo, DependencyBit,
    DescriptorSet, Draw, DrawIndexed, Event, ExplicitBarrier, ExplicitTarget, GPUError, IndexType,
    NativeAccelerationStructureBuild, NativeDescriptorSet, NativePipeline, NativePipelineLayout,
    Pipeline, PipelineBindPoint, PipelineLayout, PipelineStageBit, QueueType, RawBuffer, RawEvent,
    RawFence, RawImage, RawSemaphore, Result,
};

/// Thin wrapper around a Vulkan command pool.
pub(crate) struct VulkanCommandPool {
    device: ash::Device,
    pub(crate) raw: vk::CommandPool,
}

impl VulkanCommandPool {
    pub(crate) fn new(dev: &VulkanDevice, info: &CommandPoolCreateInfo) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(dev.family(info.queue_type))
            .flags(info.flags.into())
            .build();
        let raw = unsafe { dev.device.create_command_pool(&ci, None)? };
        dev.set_name(raw, info.debug_name, vk::ObjectType::COMMAND_POOL);
        Ok(Self {
            device: dev.device.clone(),
            raw,
        })
    }

    pub(crate) fn reset(&self, release_resources: bool) -> Result<()> {
        let flags = if release_resources {
            vk::CommandPoolResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandPoolResetFlags::empty()
        };
        unsafe { self.device.reset_command_pool(self.raw, flags)? };
        Ok(())
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.raw, None) };
    }
}

/// Inputs of one `vkCmdBuildAccelerationStructuresKHR` call. `ranges`
/// runs parallel to `geometries`.
pub struct VulkanAccelerationStructureBuild {
    pub ty: vk::AccelerationStructureTypeKHR,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub mode: vk::BuildAccelerationStructureModeKHR,
    pub src: vk::AccelerationStructureKHR,
    pub dst: vk::AccelerationStructureKHR,
    pub geometries: Vec<vk::AccelerationStructureGeometryKHR>,
    pub ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
    pub scratch_address: vk::DeviceAddress,
}

fn mismatch(found: Backend) -> GPUError {
    GPUError::BackendMismatch {
        expected: Backend::Vulkan,
        found,
    }
}

fn raw_buffer(buffer: &Buffer) -> Result<vk::Buffer> {
    match buffer.raw() {
        RawBuffer::Vulkan(b) => Ok(*b),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(buffer.backend())),
    }
}

fn raw_event(event: &Event) -> Result<vk::Event> {
    match &event.raw {
        RawEvent::Vulkan(e) => Ok(e.raw),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(event.context().backend())),
    }
}

#[derive(Default)]
struct NativeBarriers {
    memory: SmallVec<[vk::MemoryBarrier; 2]>,
    buffer: SmallVec<[vk::BufferMemoryBarrier; 4]>,
    image: SmallVec<[vk::ImageMemoryBarrier; 4]>,
}

/// Command recorder for Vulkan. Holds one native command buffer per index.
pub(crate) struct VulkanSink {
    device: ash::Device,
    pool: vk::CommandPool,
    level: CommandBufferLevel,
    buffers: Vec<vk::CommandBuffer>,
    queue: Arc<VulkanQueue>,
    families: [u32; 3],
    debug_utils: Option<ext::DebugUtils>,
    acceleration_structure: Option<khr::AccelerationStructure>,
}

impl VulkanSink {
    pub(crate) fn new(
        dev: &VulkanDevice,
        pool: &VulkanCommandPool,
        queue_type: QueueType,
        info: &CommandBufferCreateInfo,
    ) -> Result<Self> {
        let level = match info.level {
            CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
            CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let buffers = unsafe {
            dev.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(pool.raw)
                    .level(level)
                    .command_buffer_count(info.command_buffer_count)
                    .build(),
            )?
        };
        for (i, buf) in buffers.iter().enumerate() {
            dev.set_name(
                *buf,
                &format!("{}[{}]", info.debug_name, i),
                vk::ObjectType::COMMAND_BUFFER,
            );
        }
        Ok(Self {
            device: dev.device.clone(),
            pool: pool.raw,
            level: info.level,
            buffers,
            queue: dev.queue(queue_type).clone(),
            families: [
                dev.family(QueueType::Graphics),
                dev.family(QueueType::Compute),
                dev.family(QueueType::Transfer),
            ],
            debug_utils: dev.debug_utils().cloned(),
            acceleration_structure: dev.acceleration_structure.clone(),
        })
    }

    fn buf(&self, index: u32) -> vk::CommandBuffer {
        self.buffers[index as usize]
    }

    fn ownership(&self, b: &ExplicitBarrier<'_>) -> (u32, u32) {
        match (b.src_queue, b.dst_queue) {
            (Some(src), Some(dst)) => {
                let (s, d) = (self.families[src.slot()], self.families[dst.slot()]);
                if s == d {
                    (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
                } else {
                    (s, d)
                }
            }
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        }
    }

    fn native_barriers(&self, batch: &BarrierBatch<'_>) -> Result<NativeBarriers> {
        let barriers = match batch {
            BarrierBatch::Explicit(b) => b,
            BarrierBatch::ResourceState(_) => {
                return Err(GPUError::InvalidBarrier(
                    "resource-state barriers cannot be recorded on Vulkan".to_string(),
                ))
            }
        };
        let mut out = NativeBarriers::default();
        for b in barriers {
            let (src_family, dst_family) = self.ownership(b);
            match b.target {
                ExplicitTarget::Global => out.memory.push(
                    vk::MemoryBarrier::builder()
                        .src_access_mask(b.src_access.into())
                        .dst_access_mask(b.dst_access.into())
                        .build(),
                ),
                ExplicitTarget::Buffer {
                    buffer,
                    offset,
                    size,
                } => out.buffer.push(
                    vk::BufferMemoryBarrier::builder()
                        .src_access_mask(b.src_access.into())
                        .dst_access_mask(b.dst_access.into())
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .buffer(raw_buffer(buffer)?)
                        .offset(offset)
                        .size(size)
                        .build(),
                ),
                ExplicitTarget::Image { image, range } => {
                    let raw = match image.raw() {
                        RawImage::Vulkan(i) => *i,
                        #[allow(unreachable_patterns)]
                        _ => return Err(mismatch(image.backend())),
                    };
                    out.image.push(
                        vk::ImageMemoryBarrier::builder()
                            .src_access_mask(b.src_access.into())
                            .dst_access_mask(b.dst_access.into())
                            .old_layout(b.old_layout.into())
                            .new_layout(b.new_layout.into())
                            .src_queue_family_index(src_family)
                            .dst_queue_family_index(dst_family)
                            .image(raw)
                            .subresource_range(subresource_range(image.format(), range))
                            .build(),
                    )
                }
            }
        }
        Ok(out)
    }
}

impl CommandSink for VulkanSink {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn begin(&mut self, index: u32, usage: CommandBufferUsageBit) -> Result<()> {
        let inheritance = vk::CommandBufferInheritanceInfo::builder().build();
        let mut begin = vk::CommandBufferBeginInfo::builder().flags(usage.into());
        if self.level == CommandBufferLevel::Secondary {
            begin = begin.inheritance_info(&inheritance);
        }
        unsafe { self.device.begin_command_buffer(self.buf(index), &begin)? };
        Ok(())
    }

    fn end(&mut self, index: u32) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.buf(index))? };
        Ok(())
    }

    fn reset(&mut self, index: u32, release_resources: bool) -> Result<()> {
        let flags = if release_resources {
            vk::CommandBufferResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandBufferResetFlags::empty()
        };
        unsafe { self.device.reset_command_buffer(self.buf(index), flags)? };
        Ok(())
    }

    fn pipeline_barrier(
        &mut self,
        index: u32,
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        dependency: DependencyBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()> {
        let native = self.native_barriers(barriers)?;
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buf(index),
                src_stage.into(),
                dst_stage.into(),
                dependency.into(),
                &native.memory,
                &native.buffer,
                &native.image,
            )
        };
        Ok(())
    }

    fn set_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()> {
        let raw = raw_event(event)?;
        unsafe { self.device.cmd_set_event(self.buf(index), raw, stage.into()) };
        Ok(())
    }

    fn reset_event(&mut self, index: u32, event: &Event, stage: PipelineStageBit) -> Result<()> {
        let raw = raw_event(event)?;
        unsafe { self.device.cmd_reset_event(self.buf(index), raw, stage.into()) };
        Ok(())
    }

    fn wait_events(
        &mut self,
        index: u32,
        events: &[&Event],
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()> {
        let raw: SmallVec<[vk::Event; 4]> = events
            .iter()
            .map(|e| raw_event(e))
            .collect::<Result<_>>()?;
        let native = self.native_barriers(barriers)?;
        unsafe {
            self.device.cmd_wait_events(
                self.buf(index),
                &raw,
                src_stage.into(),
                dst_stage.into(),
                &native.memory,
                &native.buffer,
                &native.image,
            )
        };
        Ok(())
    }

    fn bind_pipeline(&mut self, index: u32, pipeline: &Pipeline) -> Result<()> {
        let raw = match &pipeline.raw {
            NativePipeline::Vulkan(p) => *p,
            #[allow(unreachable_patterns)]
            _ => return Err(GPUError::InvalidUsage("pipeline is not a Vulkan pipeline")),
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(self.buf(index), pipeline.bind_point().into(), raw)
        };
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        index: u32,
        bind_point: PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        let layout = match &layout.raw {
            NativePipelineLayout::Vulkan(l) => *l,
            #[allow(unreachable_patterns)]
            _ => return Err(GPUError::InvalidUsage("layout is not a Vulkan pipeline layout")),
        };
        let raw: SmallVec<[vk::DescriptorSet; 4]> = sets
            .iter()
            .map(|s| match &s.raw {
                NativeDescriptorSet::Vulkan(d) => Ok(*d),
                #[allow(unreachable_patterns)]
                _ => Err(GPUError::InvalidUsage("descriptor set is not a Vulkan set")),
            })
            .collect::<Result<_>>()?;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.buf(index),
                bind_point.into(),
                layout,
                first_set,
                &raw,
                dynamic_offsets,
            )
        };
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        index: u32,
        first_binding: u32,
        bindings: &[VertexBufferBinding<'_>],
    ) -> Result<()> {
        let buffers: SmallVec<[vk::Buffer; 4]> = bindings
            .iter()
            .map(|b| raw_buffer(b.buffer))
            .collect::<Result<_>>()?;
        let offsets: SmallVec<[vk::DeviceSize; 4]> = bindings.iter().map(|b| b.offset).collect();
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.buf(index), first_binding, &buffers, &offsets)
        };
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        let raw = raw_buffer(buffer)?;
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.buf(index), raw, offset, index_type.into())
        };
        Ok(())
    }

    fn draw(&mut self, index: u32, draw: &Draw) -> Result<()> {
        unsafe {
            self.device.cmd_draw(
                self.buf(index),
                draw.vertex_count,
                draw.instance_count,
                draw.first_vertex,
                draw.first_instance,
            )
        };
        Ok(())
    }

    fn draw_indexed(&mut self, index: u32, draw: &DrawIndexed) -> Result<()> {
        unsafe {
            self.device.cmd_draw_indexed(
                self.buf(index),
                draw.index_count,
                draw.instance_count,
                draw.first_index,
                draw.vertex_offset,
                draw.first_instance,
            )
        };
        Ok(())
    }

    fn draw_indirect(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let raw = raw_buffer(buffer)?;
        unsafe {
            self.device
                .cmd_draw_indirect(self.buf(index), raw, offset, draw_count, stride)
        };
        Ok(())
    }

    fn dispatch(&mut self, index: u32, x: u32, y: u32, z: u32) -> Result<()> {
        unsafe { self.device.cmd_dispatch(self.buf(index), x, y, z) };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        index: u32,
        src: &Buffer,
        dst: &Buffer,
        regions: &[BufferCopy],
    ) -> Result<()> {
        let regions: SmallVec<[vk::BufferCopy; 4]> = regions.iter().map(|&r| r.into()).collect();
        unsafe {
            self.device.cmd_copy_buffer(
                self.buf(index),
                raw_buffer(src)?,
                raw_buffer(dst)?,
                &regions,
            )
        };
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
            .downcast_ref::<VulkanSink>()
            .ok_or(GPUError::InvalidUsage("secondary command buffer is not a Vulkan buffer"))?;
        let raw: SmallVec<[vk::CommandBuffer; 4]> =
            indices.iter().map(|&i| other.buf(i)).collect();
        unsafe { self.device.cmd_execute_commands(self.buf(index), &raw) };
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        index: u32,
        build: &AccelerationStructureBuild,
    ) -> Result<()> {
        let loader = self.acceleration_structure.as_ref().ok_or(GPUError::Unimplemented(
            "acceleration structures are not supported by this device",
        ))?;
        let native = match &build.raw {
            NativeAccelerationStructureBuild::Vulkan(b) => b,
            #[allow(unreachable_patterns)]
            _ => return Err(GPUError::InvalidUsage("build inputs are not Vulkan inputs")),
        };
        if native.ranges.len() != native.geometries.len() {
            return Err(GPUError::SubmitLengthMismatch {
                field: "ranges",
                expected: native.geometries.len(),
                found: native.ranges.len(),
            });
        }
        let info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(native.ty)
            .flags(native.flags)
            .mode(native.mode)
            .src_acceleration_structure(native.src)
            .dst_acceleration_structure(native.dst)
            .geometries(&native.geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: native.scratch_address,
            })
            .build();
        unsafe {
            loader.cmd_build_acceleration_structures(
                self.buf(index),
                &[info],
                &[native.ranges.as_slice()],
            )
        };
        Ok(())
    }

    fn begin_debug_label(&mut self, index: u32, label: &str, colour: [f32; 4]) {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            log::warn!("Debug label {:?} contains a NUL byte", label);
            return;
        };
        let info = vk::DebugUtilsLabelEXT::builder()
            .label_name(&name)
            .color(colour)
            .build();
        unsafe { utils.cmd_begin_debug_utils_label(self.buf(index), &info) };
    }

    fn end_debug_label(&mut self, index: u32) {
        if let Some(utils) = &self.debug_utils {
            unsafe { utils.cmd_end_debug_utils_label(self.buf(index)) };
        }
    }

    fn submit(&mut self, batches: &[SubmitBatch<'_>]) -> Result<u64> {
        let mut state = self.queue.state.lock();
        let value = state.last_submitted + 1;

        for (i, batch) in batches.iter().enumerate() {
            let last = i + 1 == batches.len();
            let cmds: SmallVec<[vk::CommandBuffer; 4]> =
                batch.indices.iter().map(|&i| self.buf(i)).collect();

            let mut wait_sems: SmallVec<[vk::Semaphore; 4]> = SmallVec::new();
            let mut wait_stages: SmallVec<[vk::PipelineStageFlags; 4]> = SmallVec::new();
            let mut wait_values: SmallVec<[u64; 4]> = SmallVec::new();
            for (sem, stage, v) in &batch.waits {
                wait_sems.push(semaphore(sem)?);
                wait_stages.push((*stage).into());
                wait_values.push(*v);
            }

            let mut signal_sems: SmallVec<[vk::Semaphore; 4]> = SmallVec::new();
            let mut signal_values: SmallVec<[u64; 4]> = SmallVec::new();
            for (sem, v) in &batch.signals {
                signal_sems.push(semaphore(sem)?);
                signal_values.push(*v);
            }
            if last {
                signal_sems.push(self.queue.timeline);
                signal_values.push(value);
            }

            let fence = match batch.fence {
                Some(f) => match &f.raw {
                    RawFence::Vulkan(f) => f.raw,
                    #[allow(unreachable_patterns)]
                    _ => return Err(mismatch(f.context().backend())),
                },
                None => vk::Fence::null(),
            };

            let mut timeline = vk::TimelineSemaphoreSubmitInfo::builder()
                .wait_semaphore_values(&wait_values)
                .signal_semaphore_values(&signal_values);
            let submit = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_sems)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&cmds)
                .signal_semaphores(&signal_sems)
                .push_next(&mut timeline)
                .build();
            unsafe { self.device.queue_submit(state.raw, &[submit], fence)? };
        }

        state.last_submitted = value;
        Ok(value)
    }

    fn completed_value(&self) -> Result<u64> {
        self.queue.completed_value(&self.device)
    }
}

fn semaphore(sem: &crate::gpu::Semaphore) -> Result<vk::Semaphore> {
    match &sem.raw {
        RawSemaphore::Vulkan(s) => Ok(s.raw),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(sem.context().backend())),
    }
}

impl Drop for VulkanSink {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &self.buffers) };
    }
}
