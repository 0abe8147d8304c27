use std::sync::atomic::{AtomicU64, Ordering};

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::software::SoftwareSwapchain;
use super::{
    CommandPool, Context, Device, Extent3D, Format, GPUError, Image, ImageCreateInfo,
    ImageLayout, ImageUsageBit, QueueType, RawImage, Result, Semaphore, SemaphoreType,
    SwapchainImageRef,
};

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::D3D12Swapchain;
#[cfg(feature = "nori-vulkan")]
use super::vulkan::VulkanSwapchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct SwapchainCreateInfo<'a> {
    pub debug_name: &'a str,
    pub width: u32,
    pub height: u32,
    /// Requested number of images. Backends may clamp it.
    pub image_count: u32,
    pub format: Format,
    pub vsync: bool,
}

impl Default for SwapchainCreateInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            width: 1280,
            height: 720,
            image_count: 2,
            format: Format::BGRA8Srgb,
            vsync: true,
        }
    }
}

/// Platform window to present into.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum PresentStatus {
    Optimal,
    /// Still presentable, but no longer matches the surface exactly.
    Suboptimal,
    /// Must be recreated before the next acquire.
    OutOfDate,
}

pub(crate) enum RawSwapchain {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanSwapchain),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12Swapchain),
    Software(SoftwareSwapchain),
}

static NEXT_SWAPCHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Ring of presentable images.
///
/// Images handed out by [`Swapchain::image`] are owned by the swapchain and
/// are replaced wholesale by [`Swapchain::recreate`].
pub struct Swapchain {
    id: u64,
    debug_name: String,
    format: Format,
    vsync: bool,
    images: Vec<Image>,
    raw: RawSwapchain,
    ctx: Context,
}

impl Swapchain {
    /// Create a swapchain. `surface` is required on native backends and
    /// ignored by [`Backend::Software`](super::Backend::Software).
    pub fn new(
        ctx: &Context,
        info: &SwapchainCreateInfo,
        surface: Option<SurfaceHandles>,
    ) -> Result<Self> {
        if info.image_count == 0 || info.width == 0 || info.height == 0 {
            return Err(ctx.fatal(GPUError::InvalidUsage(
                "swapchains need a non-zero size and image count",
            )));
        }
        let raw = match ctx.device() {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => {
                let surface = surface.ok_or_else(|| ctx.fatal(GPUError::HeadlessDisplayNotSupported))?;
                RawSwapchain::Vulkan(ctx.check(VulkanSwapchain::new(dev, info, &surface))?)
            }
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => {
                let surface = surface.ok_or_else(|| ctx.fatal(GPUError::HeadlessDisplayNotSupported))?;
                RawSwapchain::D3D12(ctx.check(D3D12Swapchain::new(dev, info, &surface))?)
            }
            Device::Software(dev) => {
                let _ = surface;
                RawSwapchain::Software(SoftwareSwapchain::new(dev, info))
            }
        };

        let mut swapchain = Self {
            id: NEXT_SWAPCHAIN_ID.fetch_add(1, Ordering::Relaxed),
            debug_name: info.debug_name.to_string(),
            format: info.format,
            vsync: info.vsync,
            images: Vec::new(),
            raw,
            ctx: ctx.clone(),
        };
        swapchain.wrap_images();
        log::debug!(
            "Created swapchain '{}' with {} image(s) of {}x{}",
            swapchain.debug_name,
            swapchain.images.len(),
            swapchain.extent().width,
            swapchain.extent().height
        );
        Ok(swapchain)
    }

    fn wrap_images(&mut self) {
        let (width, height) = self.raw_extent();
        let raws: Vec<RawImage> = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSwapchain::Vulkan(sc) => sc.images().iter().map(|i| RawImage::Vulkan(*i)).collect(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawSwapchain::D3D12(sc) => sc.images().iter().cloned().map(RawImage::D3D12).collect(),
            RawSwapchain::Software(sc) => sc.images().iter().cloned().map(RawImage::Software).collect(),
        };
        let format = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSwapchain::Vulkan(sc) => sc.format(),
            _ => self.format,
        };
        self.format = format;

        self.images = raws
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let name = format!("{} image {}", self.debug_name, i);
                let info = ImageCreateInfo {
                    debug_name: &name,
                    format,
                    extent: Extent3D {
                        width,
                        height,
                        depth: 1,
                    },
                    mip_levels: 1,
                    array_layers: 1,
                    usage: ImageUsageBit::COLOUR_ATTACHMENT | ImageUsageBit::TRANSFER_DST,
                    initial_layout: ImageLayout::Undefined,
                };
                Image::with_raw(
                    &self.ctx,
                    &info,
                    raw,
                    Some(SwapchainImageRef {
                        swapchain_id: self.id,
                        index: i as u32,
                    }),
                )
            })
            .collect();
    }

    fn raw_extent(&self) -> (u32, u32) {
        match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSwapchain::Vulkan(sc) => sc.extent(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawSwapchain::D3D12(sc) => sc.extent(),
            RawSwapchain::Software(sc) => sc.extent(),
        }
    }

    /// Request the next presentable image.
    ///
    /// `semaphore` is signalled once the image may be written. It must be a
    /// binary semaphore with no pending signal.
    pub fn acquire_next_image(&mut self, semaphore: &Semaphore) -> Result<(u32, PresentStatus)> {
        if semaphore.semaphore_type() != SemaphoreType::Binary {
            return Err(self
                .ctx
                .fatal(GPUError::InvalidUsage("acquire needs a binary semaphore")));
        }
        let res = match (&mut self.raw, self.ctx.device()) {
            #[cfg(feature = "nori-vulkan")]
            (RawSwapchain::Vulkan(sc), Device::Vulkan(dev)) => sc.acquire(dev, semaphore),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            (RawSwapchain::D3D12(sc), Device::D3D12(dev)) => sc.acquire(dev, semaphore),
            (RawSwapchain::Software(sc), Device::Software(_)) => sc.acquire(semaphore),
            #[allow(unreachable_patterns)]
            _ => Err(GPUError::BackendMismatch {
                expected: self.ctx.backend(),
                found: semaphore.context().backend(),
            }),
        };
        let (index, status) = self.ctx.check(res)?;
        log::trace!("Acquired image {} of '{}' ({:?})", index, self.debug_name, status);
        Ok((index, status))
    }

    /// Queue image `index` for presentation once every semaphore in `waits`
    /// is signalled. `pool` selects the presenting queue and must be a
    /// graphics pool.
    pub fn present(
        &mut self,
        pool: &CommandPool,
        waits: &[&Semaphore],
        index: u32,
    ) -> Result<PresentStatus> {
        if pool.queue_type() != QueueType::Graphics {
            return Err(self
                .ctx
                .fatal(GPUError::InvalidUsage("presentation needs a graphics pool")));
        }
        if index as usize >= self.images.len() {
            return Err(self.ctx.fatal(GPUError::IndexOutOfRange {
                index,
                count: self.images.len() as u32,
            }));
        }
        if let Some(s) = waits.iter().find(|s| s.semaphore_type() != SemaphoreType::Binary) {
            log::error!("Present waits on timeline semaphore '{}'", s.debug_name());
            return Err(self
                .ctx
                .fatal(GPUError::InvalidUsage("present waits need binary semaphores")));
        }

        let res = match (&mut self.raw, self.ctx.device()) {
            #[cfg(feature = "nori-vulkan")]
            (RawSwapchain::Vulkan(sc), Device::Vulkan(dev)) => sc.present(dev, waits, index),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            (RawSwapchain::D3D12(sc), Device::D3D12(dev)) => sc.present(dev, waits, index),
            (RawSwapchain::Software(sc), Device::Software(_)) => sc.present(waits, index),
            #[allow(unreachable_patterns)]
            _ => Err(GPUError::BackendMismatch {
                expected: self.ctx.backend(),
                found: pool.context().backend(),
            }),
        };
        self.ctx.check(res)
    }

    /// Rebuild the swapchain at a new size. Every previously returned image
    /// is invalidated. The device must be idle.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(self
                .ctx
                .fatal(GPUError::InvalidUsage("swapchains need a non-zero size")));
        }
        // Native buffers may not be resized while wrappers still reference them.
        self.images.clear();
        let res = match (&mut self.raw, self.ctx.device()) {
            #[cfg(feature = "nori-vulkan")]
            (RawSwapchain::Vulkan(sc), Device::Vulkan(dev)) => sc.recreate(dev, width, height),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            (RawSwapchain::D3D12(sc), Device::D3D12(dev)) => sc.recreate(dev, width, height),
            (RawSwapchain::Software(sc), Device::Software(_)) => {
                sc.recreate(width, height);
                Ok(())
            }
            #[allow(unreachable_patterns)]
            _ => Err(GPUError::BackendMismatch {
                expected: self.ctx.backend(),
                found: self.ctx.backend(),
            }),
        };
        self.wrap_images();
        self.ctx.check(res)?;
        log::debug!("Recreated swapchain '{}' at {}x{}", self.debug_name, width, height);
        Ok(())
    }

    pub fn image(&self, index: u32) -> Option<&Image> {
        self.images.get(index as usize)
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn extent(&self) -> Extent3D {
        let (width, height) = self.raw_extent();
        Extent3D {
            width,
            height,
            depth: 1,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}
