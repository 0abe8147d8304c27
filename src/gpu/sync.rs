//! Host-visible synchronization primitives.

#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::software::{SoftwareEvent, SoftwareFence, SoftwareSemaphore};
use super::{Context, Device, GPUError, Result};

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::{D3D12Event, D3D12Fence, D3D12Semaphore};
#[cfg(feature = "nori-vulkan")]
use super::vulkan::{VulkanEvent, VulkanFence, VulkanSemaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct FenceCreateInfo<'a> {
    pub debug_name: &'a str,
    /// Create the fence already signaled.
    pub signaled: bool,
    /// How long [`Fence::wait`] blocks before reporting a timeout.
    pub timeout_ns: u64,
}

impl Default for FenceCreateInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            signaled: false,
            timeout_ns: u64::MAX,
        }
    }
}

pub(crate) enum RawFence {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanFence),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12Fence),
    Software(SoftwareFence),
}

/// CPU-observable completion signal for a queue submission.
pub struct Fence {
    debug_name: String,
    signaled: bool,
    timeout_ns: u64,
    pub(crate) raw: RawFence,
    ctx: Context,
}

impl Fence {
    pub fn new(ctx: &Context, info: &FenceCreateInfo) -> Result<Self> {
        let raw = match ctx.device() {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => RawFence::Vulkan(ctx.check(VulkanFence::new(dev, info))?),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => RawFence::D3D12(ctx.check(D3D12Fence::new(dev, info))?),
            Device::Software(_) => RawFence::Software(SoftwareFence::new(info.signaled)),
        };
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            signaled: info.signaled,
            timeout_ns: info.timeout_ns,
            raw,
            ctx: ctx.clone(),
        })
    }

    /// Block until the fence is signaled, for at most the fence's timeout.
    ///
    /// Returns `false` on timeout.
    pub fn wait(&self) -> Result<bool> {
        self.wait_timeout(self.timeout_ns)
    }

    /// [`Self::wait`] with an explicit timeout.
    pub fn wait_timeout(&self, timeout_ns: u64) -> Result<bool> {
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawFence::Vulkan(f) => f.wait(timeout_ns),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawFence::D3D12(f) => f.wait(timeout_ns),
            RawFence::Software(f) => Ok(f.wait(timeout_ns)),
        };
        let signaled = self.ctx.check(res)?;
        if !signaled {
            log::debug!("Fence '{}' timed out after {}ns", self.debug_name, timeout_ns);
        }
        Ok(signaled)
    }

    /// Return the fence to the unsignaled state.
    ///
    /// The fence must not be gating work that is still in flight.
    pub fn reset(&self) -> Result<()> {
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawFence::Vulkan(f) => f.reset(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawFence::D3D12(f) => f.reset(),
            RawFence::Software(f) => {
                f.reset();
                Ok(())
            }
        };
        self.ctx.check(res)
    }

    /// `true` when signaled.
    pub fn status(&self) -> Result<bool> {
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawFence::Vulkan(f) => f.status(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawFence::D3D12(f) => f.status(),
            RawFence::Software(f) => Ok(f.status()),
        };
        self.ctx.check(res)
    }

    pub fn info(&self) -> FenceCreateInfo<'_> {
        FenceCreateInfo {
            debug_name: &self.debug_name,
            signaled: self.signaled,
            timeout_ns: self.timeout_ns,
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum SemaphoreType {
    /// Single signal, single wait. Only usable in submit and present lists.
    #[default]
    Binary,
    /// Monotonic `u64` payload, also usable from the host.
    Timeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct SemaphoreCreateInfo<'a> {
    pub debug_name: &'a str,
    pub semaphore_type: SemaphoreType,
    /// Starting payload of a timeline semaphore. Ignored for binary ones.
    pub initial_value: u64,
}

pub(crate) enum RawSemaphore {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanSemaphore),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12Semaphore),
    Software(SoftwareSemaphore),
}

/// GPU-side ordering signal between submissions.
pub struct Semaphore {
    debug_name: String,
    semaphore_type: SemaphoreType,
    initial_value: u64,
    pub(crate) raw: RawSemaphore,
    ctx: Context,
}

impl Semaphore {
    pub fn new(ctx: &Context, info: &SemaphoreCreateInfo) -> Result<Self> {
        let raw = match ctx.device() {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => {
                RawSemaphore::Vulkan(ctx.check(VulkanSemaphore::new(dev, info))?)
            }
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => RawSemaphore::D3D12(ctx.check(D3D12Semaphore::new(dev, info))?),
            Device::Software(_) => RawSemaphore::Software(SoftwareSemaphore::new(
                info.semaphore_type,
                info.initial_value,
            )),
        };
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            semaphore_type: info.semaphore_type,
            initial_value: info.initial_value,
            raw,
            ctx: ctx.clone(),
        })
    }

    #[track_caller]
    fn require_timeline(&self, op: &'static str) -> Result<()> {
        match self.semaphore_type {
            SemaphoreType::Timeline => Ok(()),
            SemaphoreType::Binary => Err(self.ctx.fatal(GPUError::BinarySemaphoreHostOperation(op))),
        }
    }

    /// Set the payload of a timeline semaphore from the host.
    ///
    /// Signalling the current value again is a no-op; a lower value is an
    /// error.
    pub fn signal(&self, value: u64) -> Result<()> {
        self.require_timeline("signal")?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSemaphore::Vulkan(s) => s.signal(value),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawSemaphore::D3D12(s) => s.signal(value),
            RawSemaphore::Software(s) => s.signal(value),
        };
        self.ctx.check(res)
    }

    /// Block until the payload reaches `value`. Returns `false` on timeout.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> Result<bool> {
        self.require_timeline("wait")?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSemaphore::Vulkan(s) => s.wait(value, timeout_ns),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawSemaphore::D3D12(s) => s.wait(value, timeout_ns),
            RawSemaphore::Software(s) => Ok(s.wait(value, timeout_ns)),
        };
        self.ctx.check(res)
    }

    pub fn current_value(&self) -> Result<u64> {
        self.require_timeline("current_value")?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawSemaphore::Vulkan(s) => s.current_value(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawSemaphore::D3D12(s) => s.current_value(),
            RawSemaphore::Software(s) => Ok(s.current_value()),
        };
        self.ctx.check(res)
    }

    pub fn semaphore_type(&self) -> SemaphoreType {
        self.semaphore_type
    }

    pub fn info(&self) -> SemaphoreCreateInfo<'_> {
        SemaphoreCreateInfo {
            debug_name: &self.debug_name,
            semaphore_type: self.semaphore_type,
            initial_value: self.initial_value,
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct EventCreateInfo<'a> {
    pub debug_name: &'a str,
    /// Only command buffers may set, reset or query the event.
    pub device_only: bool,
}

pub(crate) enum RawEvent {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanEvent),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12Event),
    Software(SoftwareEvent),
}

/// Fine-grained flag settable from the host or a command buffer.
pub struct Event {
    debug_name: String,
    device_only: bool,
    pub(crate) raw: RawEvent,
    ctx: Context,
}

impl Event {
    pub fn new(ctx: &Context, info: &EventCreateInfo) -> Result<Self> {
        let raw = match ctx.device() {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => RawEvent::Vulkan(ctx.check(VulkanEvent::new(dev, info))?),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(_) => RawEvent::D3D12(D3D12Event::new()),
            Device::Software(_) => RawEvent::Software(SoftwareEvent::new()),
        };
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            device_only: info.device_only,
            raw,
            ctx: ctx.clone(),
        })
    }

    #[track_caller]
    fn require_host(&self) -> Result<()> {
        if self.device_only {
            return Err(self.ctx.fatal(GPUError::InvalidUsage(
                "device-only events cannot be used from the host",
            )));
        }
        Ok(())
    }

    pub fn set(&self) -> Result<()> {
        self.require_host()?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawEvent::Vulkan(e) => e.set(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawEvent::D3D12(e) => {
                e.set();
                Ok(())
            }
            RawEvent::Software(e) => {
                e.set();
                Ok(())
            }
        };
        self.ctx.check(res)
    }

    pub fn reset(&self) -> Result<()> {
        self.require_host()?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawEvent::Vulkan(e) => e.reset(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawEvent::D3D12(e) => {
                e.reset();
                Ok(())
            }
            RawEvent::Software(e) => {
                e.reset();
                Ok(())
            }
        };
        self.ctx.check(res)
    }

    /// `true` while the event is **not** set.
    ///
    /// See [`Self::is_set`] for the un-inverted query.
    pub fn status(&self) -> Result<bool> {
        Ok(!self.is_set()?)
    }

    pub fn is_set(&self) -> Result<bool> {
        self.require_host()?;
        let res = match &self.raw {
            #[cfg(feature = "nori-vulkan")]
            RawEvent::Vulkan(e) => e.is_set(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawEvent::D3D12(e) => Ok(e.is_set()),
            RawEvent::Software(e) => Ok(e.is_set()),
        };
        self.ctx.check(res)
    }

    pub fn info(&self) -> EventCreateInfo<'_> {
        EventCreateInfo {
            debug_name: &self.debug_name,
            device_only: self.device_only,
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }
}
