//! Views over allocations produced outside this crate.
//!
//! Buffers and images are created by the application's allocator; the
//! synchronization layer only needs their native handle, their extent and
//! the state they are tracked in. None of these types destroy the native
//! object they wrap.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "nori-vulkan")]
use ash::vk;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::software::SoftwareResource;
use super::{
    image_state_for, AccessBit, Backend, BufferUsageBit, Context, Extent3D, Format, GPUError,
    ImageLayout, ImageUsageBit, PipelineBindPoint, ResourceState, Result,
};

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::D3D12AccelerationStructureBuild;
#[cfg(feature = "nori-vulkan")]
use super::vulkan::VulkanAccelerationStructureBuild;
#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use windows::Win32::Graphics::Direct3D12::{
    ID3D12DescriptorHeap, ID3D12PipelineState, ID3D12Resource, ID3D12RootSignature,
    D3D12_GPU_DESCRIPTOR_HANDLE,
};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct BufferCreateInfo<'a> {
    pub debug_name: &'a str,
    pub size: u64,
    pub usage: BufferUsageBit,
    /// State the allocation is in when handed over.
    pub initial_state: ResourceState,
}

/// Native handle of a buffer allocation.
pub enum NativeBuffer {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::Buffer),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12Resource),
    /// Host memory of `size` bytes is allocated by the software device.
    Software,
}

pub(crate) enum RawBuffer {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::Buffer),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12Resource),
    Software(Arc<SoftwareResource>),
}

pub struct Buffer {
    id: u64,
    debug_name: String,
    size: u64,
    usage: BufferUsageBit,
    initial_state: ResourceState,
    state: AtomicU32,
    raw: RawBuffer,
    ctx: Context,
}

impl Buffer {
    /// Wrap an allocation produced by the application's allocator.
    ///
    /// # Prerequisites
    /// - `native` must belong to the same device as `ctx`.
    /// - The allocation must outlive the returned view and every command
    ///   buffer recorded with it.
    pub fn from_native(ctx: &Context, info: &BufferCreateInfo, native: NativeBuffer) -> Result<Self> {
        let raw = match native {
            #[cfg(feature = "nori-vulkan")]
            NativeBuffer::Vulkan(raw) => {
                let dev = ctx.vulkan()?;
                dev.set_name(raw, info.debug_name, vk::ObjectType::BUFFER);
                RawBuffer::Vulkan(raw)
            }
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            NativeBuffer::D3D12(raw) => {
                ctx.d3d12()?;
                super::dx12::set_name(&raw, info.debug_name);
                RawBuffer::D3D12(raw)
            }
            NativeBuffer::Software => {
                ctx.software()?;
                let size = usize::try_from(info.size)
                    .map_err(|_| ctx.fatal(GPUError::InvalidUsage("buffer too large for host memory")))?;
                RawBuffer::Software(Arc::new(SoftwareResource::new(
                    info.debug_name,
                    size,
                    info.initial_state,
                )))
            }
        };

        Ok(Self {
            id: next_resource_id(),
            debug_name: info.debug_name.to_string(),
            size: info.size,
            usage: info.usage,
            initial_state: info.initial_state,
            state: AtomicU32::new(info.initial_state.bits()),
            raw,
            ctx: ctx.clone(),
        })
    }

    pub fn info(&self) -> BufferCreateInfo<'_> {
        BufferCreateInfo {
            debug_name: &self.debug_name,
            size: self.size,
            usage: self.usage,
            initial_state: self.initial_state,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsageBit {
        self.usage
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn backend(&self) -> Backend {
        self.ctx.backend()
    }

    /// State the buffer was left in by the last recorded barrier.
    pub fn tracked_state(&self) -> ResourceState {
        ResourceState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_tracked_state(&self, state: ResourceState) {
        self.state.store(state.bits(), Ordering::Release);
    }

    pub(crate) fn raw(&self) -> &RawBuffer {
        &self.raw
    }

    pub(crate) fn software(&self) -> Result<&Arc<SoftwareResource>> {
        match &self.raw {
            RawBuffer::Software(res) => Ok(res),
            #[allow(unreachable_patterns)]
            _ => Err(self.ctx.fatal(GPUError::BackendMismatch {
                expected: Backend::Software,
                found: self.ctx.backend(),
            })),
        }
    }

    /// Copy `data` into the buffer's host memory. Software buffers only.
    pub fn host_write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let res = self.software()?;
        let mut mem = res.memory.lock();
        let range = host_range(offset, data.len(), mem.len())
            .ok_or_else(|| self.ctx.fatal(GPUError::InvalidUsage("host write out of bounds")))?;
        mem[range].copy_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes of the buffer's host memory. Software buffers only.
    pub fn host_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let res = self.software()?;
        let mem = res.memory.lock();
        let range = host_range(offset, len, mem.len())
            .ok_or_else(|| self.ctx.fatal(GPUError::InvalidUsage("host read out of bounds")))?;
        Ok(mem[range].to_vec())
    }
}

fn host_range(offset: u64, len: usize, size: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    (end <= size).then_some(start..end)
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Buffer {}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("debug_name", &self.debug_name)
            .field("size", &self.size)
            .field("state", &self.tracked_state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct ImageCreateInfo<'a> {
    pub debug_name: &'a str,
    pub format: Format,
    pub extent: Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: ImageUsageBit,
    /// Layout the allocation is in when handed over.
    pub initial_layout: ImageLayout,
}

impl Default for ImageCreateInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            format: Format::RGBA8Unorm,
            extent: Extent3D::default(),
            mip_levels: 1,
            array_layers: 1,
            usage: ImageUsageBit::empty(),
            initial_layout: ImageLayout::Undefined,
        }
    }
}

pub enum NativeImage {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::Image),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12Resource),
    Software,
}

pub(crate) enum RawImage {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::Image),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12Resource),
    Software(Arc<SoftwareResource>),
}

/// Weak back-reference from a presentable image to the swapchain slot that
/// owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainImageRef {
    pub swapchain_id: u64,
    pub index: u32,
}

pub struct Image {
    id: u64,
    debug_name: String,
    format: Format,
    extent: Extent3D,
    mip_levels: u32,
    array_layers: u32,
    usage: ImageUsageBit,
    initial_layout: ImageLayout,
    state: AtomicU32,
    swapchain: Option<SwapchainImageRef>,
    raw: RawImage,
    ctx: Context,
}

fn initial_image_state(layout: ImageLayout) -> ResourceState {
    image_state_for(layout, AccessBit::empty()).unwrap_or(ResourceState::COMMON)
}

impl Image {
    /// Wrap an image allocation produced by the application's allocator.
    ///
    /// # Prerequisites
    /// - `native` must belong to the same device as `ctx`.
    /// - The allocation must outlive the returned view and every command
    ///   buffer recorded with it.
    pub fn from_native(ctx: &Context, info: &ImageCreateInfo, native: NativeImage) -> Result<Self> {
        if info.mip_levels == 0 || info.array_layers == 0 {
            return Err(ctx.fatal(GPUError::InvalidUsage(
                "images need at least one mip level and one array layer",
            )));
        }
        let raw = match native {
            #[cfg(feature = "nori-vulkan")]
            NativeImage::Vulkan(raw) => {
                let dev = ctx.vulkan()?;
                dev.set_name(raw, info.debug_name, vk::ObjectType::IMAGE);
                RawImage::Vulkan(raw)
            }
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            NativeImage::D3D12(raw) => {
                ctx.d3d12()?;
                super::dx12::set_name(&raw, info.debug_name);
                RawImage::D3D12(raw)
            }
            NativeImage::Software => {
                ctx.software()?;
                RawImage::Software(Arc::new(SoftwareResource::new(
                    info.debug_name,
                    0,
                    initial_image_state(info.initial_layout),
                )))
            }
        };
        Ok(Self::with_raw(ctx, info, raw, None))
    }

    pub(crate) fn with_raw(
        ctx: &Context,
        info: &ImageCreateInfo,
        raw: RawImage,
        swapchain: Option<SwapchainImageRef>,
    ) -> Self {
        Self {
            id: next_resource_id(),
            debug_name: info.debug_name.to_string(),
            format: info.format,
            extent: info.extent,
            mip_levels: info.mip_levels,
            array_layers: info.array_layers,
            usage: info.usage,
            initial_layout: info.initial_layout,
            state: AtomicU32::new(initial_image_state(info.initial_layout).bits()),
            swapchain,
            raw,
            ctx: ctx.clone(),
        }
    }

    pub fn info(&self) -> ImageCreateInfo<'_> {
        ImageCreateInfo {
            debug_name: &self.debug_name,
            format: self.format,
            extent: self.extent,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            usage: self.usage,
            initial_layout: self.initial_layout,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Channels per texel of the image's format.
    pub fn format_components(&self) -> u32 {
        self.format.components()
    }

    pub fn extent(&self) -> Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn usage(&self) -> ImageUsageBit {
        self.usage
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn backend(&self) -> Backend {
        self.ctx.backend()
    }

    /// Whether the image belongs to a swapchain and must not be destroyed on
    /// its own.
    pub fn swapchain_owned(&self) -> bool {
        self.swapchain.is_some()
    }

    pub fn swapchain_ref(&self) -> Option<SwapchainImageRef> {
        self.swapchain
    }

    pub fn tracked_state(&self) -> ResourceState {
        ResourceState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_tracked_state(&self, state: ResourceState) {
        self.state.store(state.bits(), Ordering::Release);
    }

    pub(crate) fn raw(&self) -> &RawImage {
        &self.raw
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Image {}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("debug_name", &self.debug_name)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("swapchain", &self.swapchain)
            .finish()
    }
}

pub enum NativePipeline {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::Pipeline),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12PipelineState),
    Software,
}

/// A finished pipeline built by the pipeline collaborator.
pub struct Pipeline {
    bind_point: PipelineBindPoint,
    pub(crate) raw: NativePipeline,
}

impl Pipeline {
    pub fn from_native(bind_point: PipelineBindPoint, raw: NativePipeline) -> Self {
        Self { bind_point, raw }
    }

    pub fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }
}

pub enum NativePipelineLayout {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::PipelineLayout),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(ID3D12RootSignature),
    Software,
}

pub struct PipelineLayout {
    pub(crate) raw: NativePipelineLayout,
}

impl PipelineLayout {
    pub fn from_native(raw: NativePipelineLayout) -> Self {
        Self { raw }
    }
}

pub enum NativeDescriptorSet {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(vk::DescriptorSet),
    /// A descriptor table inside a shader-visible heap.
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12 {
        heap: ID3D12DescriptorHeap,
        table: D3D12_GPU_DESCRIPTOR_HANDLE,
    },
    Software,
}

pub struct DescriptorSet {
    pub(crate) raw: NativeDescriptorSet,
}

impl DescriptorSet {
    pub fn from_native(raw: NativeDescriptorSet) -> Self {
        Self { raw }
    }
}

pub enum NativeAccelerationStructureBuild {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanAccelerationStructureBuild),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12AccelerationStructureBuild),
    Software,
}

/// Geometry and scratch memory of one acceleration-structure build, laid
/// out by the ray-tracing collaborator.
pub struct AccelerationStructureBuild {
    debug_name: String,
    pub(crate) raw: NativeAccelerationStructureBuild,
}

impl AccelerationStructureBuild {
    pub fn from_native(debug_name: &str, raw: NativeAccelerationStructureBuild) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            raw,
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
