use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::{CommandPoolFlags, Context, Device, GPUError, QueueType, Result};

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::D3D12CommandPool;
#[cfg(feature = "nori-vulkan")]
use super::vulkan::VulkanCommandPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct CommandPoolCreateInfo<'a> {
    pub debug_name: &'a str,
    pub queue_type: QueueType,
    pub flags: CommandPoolFlags,
}

pub(crate) enum RawCommandPool {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanCommandPool),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12CommandPool),
    Software,
}

pub(crate) struct CommandPoolShared {
    pub(crate) debug_name: String,
    pub(crate) queue_type: QueueType,
    pub(crate) flags: CommandPoolFlags,
    pub(crate) raw: Mutex<RawCommandPool>,
    /// Bumped by every pool reset; buffers recorded in an older epoch are
    /// back in `Initial`.
    epoch: AtomicU64,
    /// Highest queue value any buffer of the pool was submitted at.
    submitted: AtomicU64,
    owner: ThreadId,
    pub(crate) ctx: Context,
}

impl CommandPoolShared {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn note_submitted(&self, value: u64) {
        self.submitted.fetch_max(value, Ordering::AcqRel);
    }

    /// Whether some buffer of the pool may still be executing.
    fn has_pending(&self) -> Result<bool> {
        let submitted = self.submitted.load(Ordering::Acquire);
        if submitted == 0 {
            return Ok(false);
        }
        Ok(self.ctx.completed_value(self.queue_type)? < submitted)
    }

    pub(crate) fn assert_owner(&self) {
        debug_assert_eq!(
            self.owner,
            std::thread::current().id(),
            "CommandPool '{}' used from wrong thread",
            self.debug_name
        );
    }
}

/// Allocation arena for command buffers of one queue type.
///
/// A pool, and every command buffer allocated from it, belongs to the
/// thread that created it. One pool per recording thread is the intended
/// way to record in parallel.
pub struct CommandPool {
    pub(crate) shared: Arc<CommandPoolShared>,
}

impl CommandPool {
    pub fn new(ctx: &Context, info: &CommandPoolCreateInfo) -> Result<Self> {
        let raw = match ctx.device() {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => RawCommandPool::Vulkan(ctx.check(VulkanCommandPool::new(dev, info))?),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => RawCommandPool::D3D12(ctx.check(D3D12CommandPool::new(dev, info))?),
            Device::Software(_) => RawCommandPool::Software,
        };
        log::debug!(
            "Created {:?} command pool '{}' ({:?})",
            info.queue_type,
            info.debug_name,
            info.flags
        );
        Ok(Self {
            shared: Arc::new(CommandPoolShared {
                debug_name: info.debug_name.to_string(),
                queue_type: info.queue_type,
                flags: info.flags,
                raw: Mutex::new(raw),
                epoch: AtomicU64::new(0),
                submitted: AtomicU64::new(0),
                owner: std::thread::current().id(),
                ctx: ctx.clone(),
            }),
        })
    }

    /// Reset every command buffer allocated from this pool to `Initial`.
    ///
    /// None of the pool's buffers may be pending.
    pub fn reset(&self, release_resources: bool) -> Result<()> {
        self.shared.assert_owner();
        if self.shared.has_pending()? {
            return Err(self.shared.ctx.fatal(GPUError::InvalidUsage(
                "command pool reset while one of its buffers is pending",
            )));
        }
        let raw = self.shared.raw.lock();
        let res = match &*raw {
            #[cfg(feature = "nori-vulkan")]
            RawCommandPool::Vulkan(pool) => pool.reset(release_resources),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            RawCommandPool::D3D12(_) => Ok(()),
            RawCommandPool::Software => Ok(()),
        };
        #[cfg(not(feature = "nori-vulkan"))]
        let _ = release_resources;
        self.shared.ctx.check(res)?;
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        log::trace!("Reset command pool '{}'", self.shared.debug_name);
        Ok(())
    }

    pub fn queue_type(&self) -> QueueType {
        self.shared.queue_type
    }

    pub fn flags(&self) -> CommandPoolFlags {
        self.shared.flags
    }

    pub fn info(&self) -> CommandPoolCreateInfo<'_> {
        CommandPoolCreateInfo {
            debug_name: &self.shared.debug_name,
            queue_type: self.shared.queue_type,
            flags: self.shared.flags,
        }
    }

    pub fn context(&self) -> &Context {
        &self.shared.ctx
    }
}
