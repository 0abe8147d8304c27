use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use windows::core::ComInterface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGISwapChain3, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
    DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};

use super::{set_name, D3D12Device, D3D12Queue};
use crate::gpu::{
    Backend, Format, GPUError, PresentStatus, QueueType, RawSemaphore, Result, Semaphore,
    SurfaceHandles, SwapchainCreateInfo,
};

/// Flip-model back buffers cannot be sRGB; sRGB is applied through views.
fn buffer_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::RGBA8Unorm | Format::RGBA8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::RGBA16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        _ => DXGI_FORMAT_B8G8R8A8_UNORM,
    }
}

fn native_semaphore(sem: &Semaphore) -> Result<&super::D3D12Semaphore> {
    match &sem.raw {
        RawSemaphore::D3D12(s) => Ok(s),
        #[allow(unreachable_patterns)]
        _ => Err(GPUError::BackendMismatch {
            expected: Backend::D3D12,
            found: sem.context().backend(),
        }),
    }
}

pub(crate) struct D3D12Swapchain {
    raw: IDXGISwapChain3,
    buffers: Vec<ID3D12Resource>,
    debug_name: String,
    sync_interval: u32,
    extent: (u32, u32),
    queue: Arc<D3D12Queue>,
}

unsafe impl Send for D3D12Swapchain {}

impl D3D12Swapchain {
    pub(crate) fn new(
        dev: &D3D12Device,
        info: &SwapchainCreateInfo,
        handles: &SurfaceHandles,
    ) -> Result<Self> {
        let hwnd = match handles.window {
            RawWindowHandle::Win32(h) => HWND(h.hwnd as isize),
            _ => {
                return Err(GPUError::InvalidUsage(
                    "D3D12 swapchains need a Win32 window handle",
                ))
            }
        };
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: info.width,
            Height: info.height,
            Format: buffer_format(info.format),
            BufferCount: info.image_count.max(2),
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };
        let queue = dev.queue(QueueType::Graphics).clone();
        let raw: IDXGISwapChain3 = {
            let state = queue.state.lock();
            unsafe {
                dev.factory
                    .CreateSwapChainForHwnd(&state.raw, hwnd, &desc, None, None)
            }?
            .cast()?
        };
        let mut swapchain = Self {
            raw,
            buffers: Vec::new(),
            debug_name: info.debug_name.to_string(),
            sync_interval: u32::from(info.vsync),
            extent: (info.width, info.height),
            queue,
        };
        swapchain.fetch_buffers(desc.BufferCount)?;
        Ok(swapchain)
    }

    fn fetch_buffers(&mut self, count: u32) -> Result<()> {
        self.buffers = (0..count)
            .map(|i| unsafe { self.raw.GetBuffer::<ID3D12Resource>(i) })
            .collect::<windows::core::Result<Vec<_>>>()?;
        for (i, b) in self.buffers.iter().enumerate() {
            set_name(b, &format!("{} image {}", self.debug_name, i));
        }
        Ok(())
    }

    pub(crate) fn images(&self) -> &[ID3D12Resource] {
        &self.buffers
    }

    pub(crate) fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// DXGI hands out back buffers in a fixed order; the acquire semaphore
    /// is signalled on the graphics queue right away.
    pub(crate) fn acquire(
        &mut self,
        _dev: &D3D12Device,
        semaphore: &Semaphore,
    ) -> Result<(u32, PresentStatus)> {
        let sem = native_semaphore(semaphore)?;
        let index = unsafe { self.raw.GetCurrentBackBufferIndex() };
        let state = self.queue.state.lock();
        unsafe { state.raw.Signal(&sem.raw, sem.signal_value(0)) }?;
        Ok((index, PresentStatus::Optimal))
    }

    pub(crate) fn present(
        &mut self,
        _dev: &D3D12Device,
        waits: &[&Semaphore],
        _index: u32,
    ) -> Result<PresentStatus> {
        let state = self.queue.state.lock();
        for s in waits {
            let sem = native_semaphore(s)?;
            unsafe { state.raw.Wait(&sem.raw, sem.wait_value(0)) }?;
        }
        let hr = unsafe { self.raw.Present(self.sync_interval, Default::default()) };
        if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
            return Err(GPUError::DeviceLost);
        }
        hr.ok()?;
        Ok(PresentStatus::Optimal)
    }

    pub(crate) fn recreate(&mut self, _dev: &D3D12Device, width: u32, height: u32) -> Result<()> {
        let count = self.buffers.len() as u32;
        self.buffers.clear();
        unsafe {
            self.raw
                .ResizeBuffers(count, width, height, DXGI_FORMAT_UNKNOWN, Default::default())
        }?;
        self.extent = (width, height);
        self.fetch_buffers(count)
    }
}
