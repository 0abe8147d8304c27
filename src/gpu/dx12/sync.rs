use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D12::{ID3D12Fence, D3D12_FENCE_FLAG_NONE};

use super::{set_name, wait_fence, D3D12Device, D3D12Queue};
use crate::gpu::{FenceCreateInfo, GPUError, Result, SemaphoreCreateInfo, SemaphoreType};

/// Binary fence on top of an `ID3D12Fence`: signaled once the native value
/// reaches `target`. A reset moves `target` one past the last signal.
pub(crate) struct D3D12Fence {
    pub(crate) raw: ID3D12Fence,
    target: AtomicU64,
}

unsafe impl Send for D3D12Fence {}
unsafe impl Sync for D3D12Fence {}

impl D3D12Fence {
    pub(crate) fn new(dev: &D3D12Device, info: &FenceCreateInfo) -> Result<Self> {
        let raw: ID3D12Fence = unsafe { dev.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
        set_name(&raw, info.debug_name);
        Ok(Self {
            raw,
            target: AtomicU64::new(if info.signaled { 0 } else { 1 }),
        })
    }

    /// Value a queue signals to set the fence.
    pub(crate) fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    pub(crate) fn wait(&self, timeout_ns: u64) -> Result<bool> {
        wait_fence(&self.raw, self.target(), timeout_ns)
    }

    pub(crate) fn reset(&self) -> Result<()> {
        let completed = unsafe { self.raw.GetCompletedValue() };
        if completed == u64::MAX {
            return Err(GPUError::DeviceLost);
        }
        self.target.store(completed + 1, Ordering::Release);
        Ok(())
    }

    pub(crate) fn status(&self) -> Result<bool> {
        Ok(unsafe { self.raw.GetCompletedValue() } >= self.target())
    }
}

pub(crate) struct D3D12Semaphore {
    pub(crate) raw: ID3D12Fence,
    ty: SemaphoreType,
    /// Last value handed to a queue signal of a binary semaphore.
    binary: AtomicU64,
}

unsafe impl Send for D3D12Semaphore {}
unsafe impl Sync for D3D12Semaphore {}

impl D3D12Semaphore {
    pub(crate) fn new(dev: &D3D12Device, info: &SemaphoreCreateInfo) -> Result<Self> {
        let initial = match info.semaphore_type {
            SemaphoreType::Binary => 0,
            SemaphoreType::Timeline => info.initial_value,
        };
        let raw: ID3D12Fence = unsafe { dev.device.CreateFence(initial, D3D12_FENCE_FLAG_NONE) }?;
        set_name(&raw, info.debug_name);
        Ok(Self {
            raw,
            ty: info.semaphore_type,
            binary: AtomicU64::new(0),
        })
    }

    /// Native value a queue signal should write. `requested` is used for
    /// timeline semaphores.
    pub(crate) fn signal_value(&self, requested: u64) -> u64 {
        match self.ty {
            SemaphoreType::Timeline => requested,
            SemaphoreType::Binary => self.binary.fetch_add(1, Ordering::AcqRel) + 1,
        }
    }

    /// Native value a queue wait should block on.
    pub(crate) fn wait_value(&self, requested: u64) -> u64 {
        match self.ty {
            SemaphoreType::Timeline => requested,
            SemaphoreType::Binary => self.binary.load(Ordering::Acquire),
        }
    }

    pub(crate) fn signal(&self, value: u64) -> Result<()> {
        let current = self.current_value()?;
        if value < current {
            return Err(GPUError::TimelineValueDecrease {
                current,
                requested: value,
            });
        }
        if value == current {
            return Ok(());
        }
        unsafe { self.raw.Signal(value) }?;
        Ok(())
    }

    pub(crate) fn wait(&self, value: u64, timeout_ns: u64) -> Result<bool> {
        wait_fence(&self.raw, value, timeout_ns)
    }

    pub(crate) fn current_value(&self) -> Result<u64> {
        match unsafe { self.raw.GetCompletedValue() } {
            u64::MAX => Err(GPUError::DeviceLost),
            v => Ok(v),
        }
    }
}

/// Device-side set or reset waiting for a queue to pass `value`.
struct DeferredOp {
    queue: Arc<D3D12Queue>,
    value: u64,
    set: bool,
}

#[derive(Default)]
pub(crate) struct D3D12EventState {
    set: AtomicBool,
    deferred: Mutex<Vec<DeferredOp>>,
}

impl D3D12EventState {
    /// Apply `set` once `queue` completes `value`.
    pub(crate) fn defer(&self, queue: Arc<D3D12Queue>, value: u64, set: bool) {
        self.deferred.lock().push(DeferredOp { queue, value, set });
    }

    fn resolve(&self) {
        let mut deferred = self.deferred.lock();
        deferred.retain(|op| {
            if op.queue.completed_value() >= op.value {
                self.set.store(op.set, Ordering::Release);
                false
            } else {
                true
            }
        });
    }
}

/// D3D12 has no event objects. Host operations act on a flag directly;
/// recorded ones are applied when their submission retires.
pub(crate) struct D3D12Event {
    state: Arc<D3D12EventState>,
}

impl D3D12Event {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(D3D12EventState::default()),
        }
    }

    pub(crate) fn state(&self) -> &Arc<D3D12EventState> {
        &self.state
    }

    pub(crate) fn set(&self) {
        self.state.resolve();
        self.state.set.store(true, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.state.resolve();
        self.state.set.store(false, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.state.resolve();
        self.state.set.load(Ordering::Acquire)
    }
}
