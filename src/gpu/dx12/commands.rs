use std::any::Any;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use smallvec::SmallVec;
use windows::core::ComInterface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R32_UINT};

use super::sync::D3D12EventState;
use super::{list_type, set_name, D3D12Device, D3D12Queue};
use crate::gpu::command_buffer::{BarrierBatch, CommandSink, VertexBufferBinding};
use crate::gpu::submit::SubmitBatch;
use crate::gpu::{
    AccelerationStructureBuild, Backend, Buffer, BufferCopy, CommandBufferCreateInfo,
    CommandBufferLevel, CommandBufferUsageBit, CommandPoolCreateInfo, DependencyBit,
    DescriptorSet, Draw, DrawIndexed, Event, GPUError, Image, IndexType,
    NativeAccelerationStructureBuild, NativeDescriptorSet, NativePipeline, NativePipelineLayout,
    Pipeline, PipelineBindPoint, PipelineLayout, PipelineStageBit, QueueType, RawBuffer, RawEvent,
    RawFence, RawImage, RawSemaphore, ResourceState, Result, Semaphore, SubresourceRange,
    Transition, TransitionTarget,
};

/// D3D12 has no pool object; allocators live with the lists they back.
pub(crate) struct D3D12CommandPool {
    ty: D3D12_COMMAND_LIST_TYPE,
}

impl D3D12CommandPool {
    pub(crate) fn new(_dev: &D3D12Device, info: &CommandPoolCreateInfo) -> Result<Self> {
        Ok(Self {
            ty: list_type(info.queue_type),
        })
    }
}

/// Inputs of one `BuildRaytracingAccelerationStructure` call. The geometry
/// pointer inside `inputs` is filled in from `geometries` at record time.
pub struct D3D12AccelerationStructureBuild {
    pub inputs: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS,
    pub geometries: Vec<D3D12_RAYTRACING_GEOMETRY_DESC>,
    pub dest: u64,
    pub source: u64,
    pub scratch: u64,
}

fn mismatch(found: Backend) -> GPUError {
    GPUError::BackendMismatch {
        expected: Backend::D3D12,
        found,
    }
}

fn resource_of_buffer(buffer: &Buffer) -> Result<&ID3D12Resource> {
    match buffer.raw() {
        RawBuffer::D3D12(r) => Ok(r),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(buffer.backend())),
    }
}

fn resource_of_image(image: &Image) -> Result<&ID3D12Resource> {
    match image.raw() {
        RawImage::D3D12(r) => Ok(r),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(image.backend())),
    }
}

fn native_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(state.bits() as i32)
}

fn transition(
    resource: &ID3D12Resource,
    subresource: u32,
    before: ResourceState,
    after: ResourceState,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: subresource,
                StateBefore: native_state(before),
                StateAfter: native_state(after),
            }),
        },
    }
}

fn uav(resource: Option<&ID3D12Resource>) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                pResource: match resource {
                    Some(r) => unsafe { std::mem::transmute_copy(r) },
                    None => ManuallyDrop::new(None),
                },
            }),
        },
    }
}

/// Subresource indices covered by `range`, or `None` for all of them.
fn subresources(image: &Image, range: SubresourceRange) -> Option<SmallVec<[u32; 8]>> {
    let (mips, layers) = (image.mip_levels(), image.array_layers());
    if range.base_mip == 0
        && range.level_count >= mips
        && range.base_layer == 0
        && range.layer_count >= layers
    {
        return None;
    }
    let planes = if image.format().is_depth_stencil() { 2 } else { 1 };
    let mut out = SmallVec::new();
    for plane in 0..planes {
        for layer in range.base_layer..range.base_layer + range.layer_count {
            for mip in range.base_mip..range.base_mip + range.level_count {
                out.push(mip + layer * mips + plane * mips * layers);
            }
        }
    }
    Some(out)
}

fn native_barriers(batch: &BarrierBatch<'_>) -> Result<SmallVec<[D3D12_RESOURCE_BARRIER; 4]>> {
    let transitions = match batch {
        BarrierBatch::ResourceState(t) => t,
        BarrierBatch::Explicit(_) => {
            return Err(GPUError::InvalidBarrier(
                "explicit barriers cannot be recorded on D3D12".to_string(),
            ))
        }
    };
    let mut out = SmallVec::new();
    for t in transitions {
        match *t {
            Transition::State {
                target,
                before,
                after,
            } => match target {
                TransitionTarget::Global => {}
                TransitionTarget::Buffer(b) => out.push(transition(
                    resource_of_buffer(b)?,
                    D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    before,
                    after,
                )),
                TransitionTarget::Image(image, range) => {
                    let resource = resource_of_image(image)?;
                    match subresources(image, range) {
                        None => out.push(transition(
                            resource,
                            D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                            before,
                            after,
                        )),
                        Some(list) => {
                            for sub in list {
                                out.push(transition(resource, sub, before, after));
                            }
                        }
                    }
                }
            },
            Transition::Uav { target } => out.push(match target {
                TransitionTarget::Global => uav(None),
                TransitionTarget::Buffer(b) => uav(Some(resource_of_buffer(b)?)),
                TransitionTarget::Image(i, _) => uav(Some(resource_of_image(i)?)),
            }),
        }
    }
    Ok(out)
}

fn native_semaphore(sem: &Semaphore) -> Result<&super::D3D12Semaphore> {
    match &sem.raw {
        RawSemaphore::D3D12(s) => Ok(s),
        #[allow(unreachable_patterns)]
        _ => Err(mismatch(sem.context().backend())),
    }
}

/// Command recorder for D3D12. One allocator per list so indices can be
/// reset independently.
pub(crate) struct D3D12Sink {
    device: ID3D12Device,
    allocators: Vec<ID3D12CommandAllocator>,
    lists: Vec<ID3D12GraphicsCommandList>,
    queue: Arc<D3D12Queue>,
    /// Event operations recorded into each index, applied on retirement.
    events: Vec<Vec<(Arc<D3D12EventState>, bool)>>,
    draw_signatures: Vec<(u32, ID3D12CommandSignature)>,
}

unsafe impl Send for D3D12Sink {}

impl D3D12Sink {
    pub(crate) fn new(
        dev: &D3D12Device,
        pool: &D3D12CommandPool,
        queue_type: QueueType,
        info: &CommandBufferCreateInfo,
    ) -> Result<Self> {
        let ty = match info.level {
            CommandBufferLevel::Primary => pool.ty,
            CommandBufferLevel::Secondary => D3D12_COMMAND_LIST_TYPE_BUNDLE,
        };
        let mut allocators = Vec::with_capacity(info.command_buffer_count as usize);
        let mut lists = Vec::with_capacity(info.command_buffer_count as usize);
        for i in 0..info.command_buffer_count {
            let allocator: ID3D12CommandAllocator =
                unsafe { dev.device.CreateCommandAllocator(ty) }?;
            let list: ID3D12GraphicsCommandList = unsafe {
                dev.device
                    .CreateCommandList(0, ty, &allocator, None::<&ID3D12PipelineState>)
            }?;
            // Lists are created open.
            unsafe { list.Close() }?;
            set_name(&list, &format!("{}[{}]", info.debug_name, i));
            allocators.push(allocator);
            lists.push(list);
        }
        Ok(Self {
            device: dev.device.clone(),
            allocators,
            lists,
            queue: dev.queue(queue_type).clone(),
            events: vec![Vec::new(); info.command_buffer_count as usize],
            draw_signatures: Vec::new(),
        })
    }

    fn list(&self, index: u32) -> &ID3D12GraphicsCommandList {
        &self.lists[index as usize]
    }

    fn event_op(&mut self, index: u32, event: &Event, set: bool) -> Result<()> {
        match &event.raw {
            RawEvent::D3D12(e) => {
                self.events[index as usize].push((e.state().clone(), set));
                Ok(())
            }
            #[allow(unreachable_patterns)]
            _ => Err(mismatch(event.context().backend())),
        }
    }

    fn draw_signature(&mut self, stride: u32) -> Result<ID3D12CommandSignature> {
        if let Some((_, sig)) = self.draw_signatures.iter().find(|(s, _)| *s == stride) {
            return Ok(sig.clone());
        }
        let arg = D3D12_INDIRECT_ARGUMENT_DESC {
            Type: D3D12_INDIRECT_ARGUMENT_TYPE_DRAW,
            ..Default::default()
        };
        let desc = D3D12_COMMAND_SIGNATURE_DESC {
            ByteStride: stride,
            NumArgumentDescs: 1,
            pArgumentDescs: &arg,
            NodeMask: 0,
        };
        let mut sig: Option<ID3D12CommandSignature> = None;
        unsafe {
            self.device
                .CreateCommandSignature(&desc, None::<&ID3D12RootSignature>, &mut sig)
        }?;
        let sig = sig.ok_or(GPUError::InvalidUsage("command signature creation failed"))?;
        self.draw_signatures.push((stride, sig.clone()));
        Ok(sig)
    }
}

impl CommandSink for D3D12Sink {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn begin(&mut self, index: u32, _usage: CommandBufferUsageBit) -> Result<()> {
        let i = index as usize;
        unsafe {
            self.allocators[i].Reset()?;
            self.lists[i].Reset(&self.allocators[i], None::<&ID3D12PipelineState>)?;
        }
        self.events[i].clear();
        Ok(())
    }

    fn end(&mut self, index: u32) -> Result<()> {
        unsafe { self.list(index).Close() }?;
        Ok(())
    }

    fn reset(&mut self, index: u32, _release_resources: bool) -> Result<()> {
        self.events[index as usize].clear();
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
        let native = native_barriers(barriers)?;
        if !native.is_empty() {
            unsafe { self.list(index).ResourceBarrier(&native) };
        }
        Ok(())
    }

    fn set_event(&mut self, index: u32, event: &Event, _stage: PipelineStageBit) -> Result<()> {
        self.event_op(index, event, true)
    }

    fn reset_event(&mut self, index: u32, event: &Event, _stage: PipelineStageBit) -> Result<()> {
        self.event_op(index, event, false)
    }

    fn wait_events(
        &mut self,
        index: u32,
        _events: &[&Event],
        src_stage: PipelineStageBit,
        dst_stage: PipelineStageBit,
        barriers: &BarrierBatch<'_>,
    ) -> Result<()> {
        // Lists execute in order, so the wait reduces to its barriers.
        self.pipeline_barrier(index, src_stage, dst_stage, DependencyBit::empty(), barriers)
    }

    fn bind_pipeline(&mut self, index: u32, pipeline: &Pipeline) -> Result<()> {
        match &pipeline.raw {
            NativePipeline::D3D12(pso) => {
                unsafe { self.list(index).SetPipelineState(pso) };
                Ok(())
            }
            #[allow(unreachable_patterns)]
            _ => Err(GPUError::InvalidUsage("pipeline is not a D3D12 pipeline")),
        }
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
        let root = match &layout.raw {
            NativePipelineLayout::D3D12(r) => r,
            #[allow(unreachable_patterns)]
            _ => return Err(GPUError::InvalidUsage("layout is not a D3D12 root signature")),
        };
        if !dynamic_offsets.is_empty() {
            log::warn!("Dynamic offsets are ignored on D3D12");
        }
        let list = self.list(index);
        let compute = bind_point != PipelineBindPoint::Graphics;
        unsafe {
            if compute {
                list.SetComputeRootSignature(root);
            } else {
                list.SetGraphicsRootSignature(root);
            }
        }
        for (i, set) in sets.iter().enumerate() {
            let (heap, table) = match &set.raw {
                NativeDescriptorSet::D3D12 { heap, table } => (heap, *table),
                #[allow(unreachable_patterns)]
                _ => return Err(GPUError::InvalidUsage("descriptor set is not a D3D12 table")),
            };
            let slot = first_set + i as u32;
            unsafe {
                list.SetDescriptorHeaps(&[Some(heap.clone())]);
                if compute {
                    list.SetComputeRootDescriptorTable(slot, table);
                } else {
                    list.SetGraphicsRootDescriptorTable(slot, table);
                }
            }
        }
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        index: u32,
        first_binding: u32,
        bindings: &[VertexBufferBinding<'_>],
    ) -> Result<()> {
        let views = bindings
            .iter()
            .map(|b| {
                let resource = resource_of_buffer(b.buffer)?;
                Ok(D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: unsafe { resource.GetGPUVirtualAddress() } + b.offset,
                    SizeInBytes: (b.buffer.size() - b.offset) as u32,
                    StrideInBytes: b.stride,
                })
            })
            .collect::<Result<SmallVec<[D3D12_VERTEX_BUFFER_VIEW; 4]>>>()?;
        unsafe { self.list(index).IASetVertexBuffers(first_binding, Some(&views)) };
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        index: u32,
        buffer: &Buffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        let resource = resource_of_buffer(buffer)?;
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: unsafe { resource.GetGPUVirtualAddress() } + offset,
            SizeInBytes: (buffer.size() - offset) as u32,
            Format: match index_type {
                IndexType::U16 => DXGI_FORMAT_R16_UINT,
                IndexType::U32 => DXGI_FORMAT_R32_UINT,
            },
        };
        unsafe { self.list(index).IASetIndexBuffer(Some(&view)) };
        Ok(())
    }

    fn draw(&mut self, index: u32, draw: &Draw) -> Result<()> {
        unsafe {
            self.list(index).DrawInstanced(
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
            self.list(index).DrawIndexedInstanced(
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
        let signature = self.draw_signature(stride)?;
        let resource = resource_of_buffer(buffer)?;
        unsafe {
            self.list(index).ExecuteIndirect(
                &signature,
                draw_count,
                resource,
                offset,
                None::<&ID3D12Resource>,
                0,
            )
        };
        Ok(())
    }

    fn dispatch(&mut self, index: u32, x: u32, y: u32, z: u32) -> Result<()> {
        unsafe { self.list(index).Dispatch(x, y, z) };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        index: u32,
        src: &Buffer,
        dst: &Buffer,
        regions: &[BufferCopy],
    ) -> Result<()> {
        let (src, dst) = (resource_of_buffer(src)?, resource_of_buffer(dst)?);
        let list = self.list(index);
        for r in regions {
            unsafe { list.CopyBufferRegion(dst, r.dst_offset, src, r.src_offset, r.size) };
        }
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
            .downcast_ref::<D3D12Sink>()
            .ok_or(GPUError::InvalidUsage("secondary command buffer is not a D3D12 bundle"))?;
        for &i in indices {
            unsafe { self.list(index).ExecuteBundle(other.list(i)) };
            let ops = other.events[i as usize].clone();
            self.events[index as usize].extend(ops);
        }
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        index: u32,
        build: &AccelerationStructureBuild,
    ) -> Result<()> {
        let native = match &build.raw {
            NativeAccelerationStructureBuild::D3D12(b) => b,
            #[allow(unreachable_patterns)]
            _ => return Err(GPUError::InvalidUsage("build inputs are not D3D12 inputs")),
        };
        let list4: ID3D12GraphicsCommandList4 = self.list(index).cast().map_err(|_| {
            GPUError::Unimplemented("acceleration structures are not supported by this device")
        })?;
        let mut inputs = native.inputs;
        if inputs.Type == D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL {
            inputs.NumDescs = native.geometries.len() as u32;
            inputs.DescsLayout = D3D12_ELEMENTS_LAYOUT_ARRAY;
            inputs.Anonymous.pGeometryDescs = native.geometries.as_ptr();
        }
        let desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
            DestAccelerationStructureData: native.dest,
            Inputs: inputs,
            SourceAccelerationStructureData: native.source,
            ScratchAccelerationStructureData: native.scratch,
        };
        unsafe { list4.BuildRaytracingAccelerationStructure(&desc, None) };
        Ok(())
    }

    fn begin_debug_label(&mut self, index: u32, label: &str, _colour: [f32; 4]) {
        let wide: Vec<u16> = label.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.list(index).BeginEvent(
                0,
                Some(wide.as_ptr() as *const std::ffi::c_void),
                (wide.len() * 2) as u32,
            )
        };
    }

    fn end_debug_label(&mut self, index: u32) {
        unsafe { self.list(index).EndEvent() };
    }

    fn submit(&mut self, batches: &[SubmitBatch<'_>]) -> Result<u64> {
        let mut state = self.queue.state.lock();
        let value = state.last_submitted + 1;
        let mut deferred: SmallVec<[(Arc<D3D12EventState>, bool); 4]> = SmallVec::new();

        for batch in batches {
            for (sem, _, v) in &batch.waits {
                let sem = native_semaphore(sem)?;
                unsafe { state.raw.Wait(&sem.raw, sem.wait_value(*v)) }?;
            }

            let lists = batch
                .indices
                .iter()
                .map(|&i| self.list(i).cast::<ID3D12CommandList>().map(Some))
                .collect::<windows::core::Result<Vec<_>>>()?;
            if !lists.is_empty() {
                unsafe { state.raw.ExecuteCommandLists(&lists) };
            }
            for &i in batch.indices {
                deferred.extend(self.events[i as usize].iter().cloned());
            }

            for (sem, v) in &batch.signals {
                let sem = native_semaphore(sem)?;
                unsafe { state.raw.Signal(&sem.raw, sem.signal_value(*v)) }?;
            }
            if let Some(fence) = batch.fence {
                match &fence.raw {
                    RawFence::D3D12(f) => unsafe { state.raw.Signal(&f.raw, f.target()) }?,
                    #[allow(unreachable_patterns)]
                    _ => return Err(mismatch(fence.context().backend())),
                }
            }
        }

        unsafe { state.raw.Signal(&self.queue.fence, value) }?;
        state.last_submitted = value;
        for (event, set) in deferred {
            event.defer(self.queue.clone(), value, set);
        }
        Ok(value)
    }

    fn completed_value(&self) -> Result<u64> {
        match self.queue.completed_value() {
            u64::MAX => Err(GPUError::DeviceLost),
            v => Ok(v),
        }
    }
}
