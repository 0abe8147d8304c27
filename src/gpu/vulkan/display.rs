use std::sync::Arc;

use ash::extensions::khr;
use ash::vk;

use super::{format_from_vk, VulkanDevice, VulkanQueue};
use crate::gpu::{
    Format, GPUError, PresentStatus, QueueType, RawSemaphore, Result, Semaphore, SurfaceHandles,
    SwapchainCreateInfo,
};

fn raw_semaphore(sem: &Semaphore) -> Result<vk::Semaphore> {
    match &sem.raw {
        RawSemaphore::Vulkan(s) => Ok(s.raw),
        #[allow(unreachable_patterns)]
        _ => Err(GPUError::BackendMismatch {
            expected: crate::gpu::Backend::Vulkan,
            found: sem.context().backend(),
        }),
    }
}

/// Everything a swapchain (re)build needs that does not change with size.
struct Config {
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    image_count: u32,
    transform: vk::SurfaceTransformFlagsKHR,
}

pub(crate) struct VulkanSwapchain {
    surface_loader: khr::Surface,
    loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    raw: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    config: Config,
    format: Format,
    extent: vk::Extent2D,
    queue: Arc<VulkanQueue>,
}

impl VulkanSwapchain {
    pub(crate) fn new(
        dev: &VulkanDevice,
        info: &SwapchainCreateInfo,
        handles: &SurfaceHandles,
    ) -> Result<Self> {
        let (Some(surface_loader), Some(loader)) =
            (dev.surface_loader.clone(), dev.swapchain_loader.clone())
        else {
            return Err(GPUError::HeadlessDisplayNotSupported);
        };

        let surface = unsafe {
            ash_window::create_surface(&dev.entry, &dev.instance, handles.display, handles.window, None)
        }?;

        let built = Self::configure(dev, &surface_loader, surface, info).and_then(|config| {
            let extent = Self::choose_extent(&surface_loader, dev.pdevice, surface, info.width, info.height)?;
            let raw = Self::build(&loader, surface, &config, extent, vk::SwapchainKHR::null())?;
            Ok((config, extent, raw))
        });
        let (config, extent, raw) = match built {
            Ok(v) => v,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };
        let images = unsafe { loader.get_swapchain_images(raw) }?;
        dev.set_name(raw, info.debug_name, vk::ObjectType::SWAPCHAIN_KHR);

        let format = format_from_vk(config.format.format).unwrap_or(info.format);
        Ok(Self {
            surface_loader,
            loader,
            surface,
            raw,
            images,
            config,
            format,
            extent,
            queue: dev.queue(QueueType::Graphics).clone(),
        })
    }

    fn configure(
        dev: &VulkanDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        info: &SwapchainCreateInfo,
    ) -> Result<Config> {
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                dev.pdevice,
                dev.family(QueueType::Graphics),
                surface,
            )
        }?;
        if !supported {
            log::error!("Graphics queue family cannot present to this surface");
            return Err(GPUError::NoSuitableDevice);
        }

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(dev.pdevice, surface)
        }?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(dev.pdevice, surface) }?;
        let modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(dev.pdevice, surface)
        }?;

        let wanted: vk::Format = info.format.into();
        let format = formats
            .iter()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.iter().find(|f| format_from_vk(f.format).is_some()))
            .copied()
            .ok_or(GPUError::InvalidUsage("surface reports no usable format"))?;
        if format.format != wanted {
            log::warn!("Surface does not support {:?}; using {:?}", info.format, format.format);
        }

        let present_mode = if info.vsync || !modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::IMMEDIATE
        };

        let mut image_count = std::cmp::max(info.image_count, capabilities.min_image_count);
        if capabilities.max_image_count != 0 {
            image_count = std::cmp::min(image_count, capabilities.max_image_count);
        }

        Ok(Config {
            format,
            present_mode,
            image_count,
            transform: capabilities.current_transform,
        })
    }

    fn choose_extent(
        surface_loader: &khr::Surface,
        pdevice: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<vk::Extent2D> {
        let capabilities =
            unsafe { surface_loader.get_physical_device_surface_capabilities(pdevice, surface) }?;
        if capabilities.current_extent.width != u32::MAX {
            return Ok(capabilities.current_extent);
        }
        Ok(vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        })
    }

    fn build(
        loader: &khr::Swapchain,
        surface: vk::SurfaceKHR,
        config: &Config,
        extent: vk::Extent2D,
        old: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR> {
        let usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT;
        let raw = unsafe {
            loader.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(surface)
                    .present_mode(config.present_mode)
                    .image_format(config.format.format)
                    .image_color_space(config.format.color_space)
                    .image_array_layers(1)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .image_extent(extent)
                    .image_usage(usage)
                    .min_image_count(config.image_count)
                    .pre_transform(config.transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .clipped(true)
                    .old_swapchain(old)
                    .build(),
                None,
            )
        }?;
        Ok(raw)
    }

    pub(crate) fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub(crate) fn format(&self) -> Format {
        self.format
    }

    pub(crate) fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    pub(crate) fn acquire(
        &mut self,
        _dev: &VulkanDevice,
        semaphore: &Semaphore,
    ) -> Result<(u32, PresentStatus)> {
        let sem = raw_semaphore(semaphore)?;
        match unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, sem, vk::Fence::null())
        } {
            Ok((index, false)) => Ok((index, PresentStatus::Optimal)),
            Ok((index, true)) => Ok((index, PresentStatus::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, PresentStatus::OutOfDate)),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn present(
        &mut self,
        _dev: &VulkanDevice,
        waits: &[&Semaphore],
        index: u32,
    ) -> Result<PresentStatus> {
        let waits = waits
            .iter()
            .map(|s| raw_semaphore(s))
            .collect::<Result<Vec<_>>>()?;
        let swapchains = [self.raw];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices)
            .build();
        let state = self.queue.state.lock();
        match unsafe { self.loader.queue_present(state.raw, &info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn recreate(&mut self, dev: &VulkanDevice, width: u32, height: u32) -> Result<()> {
        let extent =
            Self::choose_extent(&self.surface_loader, dev.pdevice, self.surface, width, height)?;
        let raw = Self::build(&self.loader, self.surface, &self.config, extent, self.raw)?;
        unsafe { self.loader.destroy_swapchain(self.raw, None) };
        self.raw = raw;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(raw) }?;
        Ok(())
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.raw, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
