//! Resource-state backend on Direct3D 12.
//!
//! Every queue owns an `ID3D12Fence` that is signalled with a monotonically
//! increasing value after each submission. Binary semaphores and fences are
//! emulated on top of further `ID3D12Fence` objects.

use std::sync::Arc;

use parking_lot::Mutex;
use windows::core::{ComInterface, HSTRING, PCWSTR};
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, D3D12GetDebugInterface, ID3D12CommandQueue, ID3D12Debug, ID3D12Device,
    ID3D12Fence, ID3D12Object, D3D12_COMMAND_LIST_TYPE, D3D12_COMMAND_LIST_TYPE_COMPUTE,
    D3D12_COMMAND_LIST_TYPE_COPY, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC,
    D3D12_FENCE_FLAG_NONE,
};
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter1, IDXGIFactory4};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

use super::{ContextInfo, GPUError, QueueType, Result};

mod commands;
pub(crate) use commands::{D3D12CommandPool, D3D12Sink};
pub use commands::D3D12AccelerationStructureBuild;
mod display;
pub(crate) use display::D3D12Swapchain;
mod sync;
pub(crate) use sync::{D3D12Event, D3D12Fence, D3D12Semaphore};

pub(crate) fn list_type(queue_type: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match queue_type {
        QueueType::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Transfer => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

/// Attach a debug name to a D3D12 object. Best effort.
pub(crate) fn set_name<T: ComInterface>(obj: &T, name: &str) {
    if name.is_empty() {
        return;
    }
    let res = obj
        .cast::<ID3D12Object>()
        .and_then(|o| unsafe { o.SetName(&HSTRING::from(name)) });
    if let Err(e) = res {
        log::warn!("Failed to name D3D12 object {:?}: {}", name, e);
    }
}

/// Block until `fence` reaches `value` or the timeout passes. `Ok(false)` on
/// timeout.
pub(crate) fn wait_fence(fence: &ID3D12Fence, value: u64, timeout_ns: u64) -> Result<bool> {
    if unsafe { fence.GetCompletedValue() } >= value {
        return Ok(true);
    }
    if timeout_ns == 0 {
        return Ok(false);
    }
    let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }?;
    let res = unsafe { fence.SetEventOnCompletion(value, event) };
    if res.is_ok() {
        let ms = if timeout_ns == u64::MAX {
            INFINITE
        } else {
            (timeout_ns / 1_000_000).clamp(1, u32::MAX as u64 - 1) as u32
        };
        unsafe { WaitForSingleObject(event, ms) };
    }
    unsafe {
        let _ = CloseHandle(event);
    }
    res?;
    let completed = unsafe { fence.GetCompletedValue() };
    if completed == u64::MAX {
        return Err(GPUError::DeviceLost);
    }
    Ok(completed >= value)
}

pub(crate) struct D3D12QueueState {
    pub(crate) raw: ID3D12CommandQueue,
    pub(crate) last_submitted: u64,
}

/// A native queue plus the fence its submissions retire on.
pub(crate) struct D3D12Queue {
    pub(crate) fence: ID3D12Fence,
    pub(crate) state: Mutex<D3D12QueueState>,
}

unsafe impl Send for D3D12Queue {}
unsafe impl Sync for D3D12Queue {}

impl D3D12Queue {
    fn new(device: &ID3D12Device, queue_type: QueueType) -> Result<Self> {
        let raw: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: list_type(queue_type),
                ..Default::default()
            })
        }?;
        set_name(&raw, &format!("nori {:?} queue", queue_type));
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
        Ok(Self {
            fence,
            state: Mutex::new(D3D12QueueState {
                raw,
                last_submitted: 0,
            }),
        })
    }

    pub(crate) fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_idle(&self) -> Result<()> {
        let value = {
            let mut state = self.state.lock();
            state.last_submitted += 1;
            unsafe { state.raw.Signal(&self.fence, state.last_submitted) }?;
            state.last_submitted
        };
        wait_fence(&self.fence, value, u64::MAX)?;
        Ok(())
    }
}

pub(crate) struct D3D12Device {
    pub(crate) factory: IDXGIFactory4,
    pub(crate) device: ID3D12Device,
    queues: [Arc<D3D12Queue>; 3],
}

unsafe impl Send for D3D12Device {}
unsafe impl Sync for D3D12Device {}

impl D3D12Device {
    pub(crate) fn new(info: &ContextInfo) -> Result<Self> {
        if info.enable_validation {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                    }
                }
                Err(e) => log::warn!("D3D12 debug layer unavailable: {}", e),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory1() }?;
        let adapter: IDXGIAdapter1 = unsafe { factory.EnumAdapters1(info.device_index as u32) }
            .map_err(|_| GPUError::NoSuitableDevice)?;

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
        let device = device.ok_or(GPUError::NoSuitableDevice)?;

        let queues = [
            Arc::new(D3D12Queue::new(&device, QueueType::Graphics)?),
            Arc::new(D3D12Queue::new(&device, QueueType::Compute)?),
            Arc::new(D3D12Queue::new(&device, QueueType::Transfer)?),
        ];

        if let Ok(desc) = unsafe { adapter.GetDesc1() } {
            let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
            log::info!(
                "D3D12 device {:?}",
                String::from_utf16_lossy(&desc.Description[..len])
            );
        }

        Ok(Self {
            factory,
            device,
            queues,
        })
    }

    pub(crate) fn queue(&self, queue_type: QueueType) -> &Arc<D3D12Queue> {
        &self.queues[queue_type.slot()]
    }

    pub(crate) fn wait_idle(&self) -> Result<()> {
        for q in &self.queues {
            q.wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for D3D12Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to idle D3D12 queues during teardown: {}", e);
        }
    }
}
