use ash::vk;

use super::VulkanDevice;
use crate::gpu::{
    EventCreateInfo, FenceCreateInfo, GPUError, Result, SemaphoreCreateInfo, SemaphoreType,
};

pub(crate) struct VulkanFence {
    device: ash::Device,
    pub(crate) raw: vk::Fence,
}

impl VulkanFence {
    pub(crate) fn new(dev: &VulkanDevice, info: &FenceCreateInfo) -> Result<Self> {
        let flags = if info.signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let raw = unsafe {
            dev.device
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags).build(), None)
        }?;
        dev.set_name(raw, info.debug_name, vk::ObjectType::FENCE);
        Ok(Self {
            device: dev.device.clone(),
            raw,
        })
    }

    pub(crate) fn wait(&self, timeout_ns: u64) -> Result<bool> {
        match unsafe { self.device.wait_for_fences(&[self.raw], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn reset(&self) -> Result<()> {
        Ok(unsafe { self.device.reset_fences(&[self.raw]) }?)
    }

    pub(crate) fn status(&self) -> Result<bool> {
        Ok(unsafe { self.device.get_fence_status(self.raw) }?)
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.raw, None) };
    }
}

pub(crate) struct VulkanSemaphore {
    device: ash::Device,
    pub(crate) raw: vk::Semaphore,
}

impl VulkanSemaphore {
    pub(crate) fn new(dev: &VulkanDevice, info: &SemaphoreCreateInfo) -> Result<Self> {
        let mut type_ci = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(match info.semaphore_type {
                SemaphoreType::Binary => vk::SemaphoreType::BINARY,
                SemaphoreType::Timeline => vk::SemaphoreType::TIMELINE,
            })
            .initial_value(match info.semaphore_type {
                SemaphoreType::Binary => 0,
                SemaphoreType::Timeline => info.initial_value,
            });
        let raw = unsafe {
            dev.device.create_semaphore(
                &vk::SemaphoreCreateInfo::builder().push_next(&mut type_ci),
                None,
            )
        }?;
        dev.set_name(raw, info.debug_name, vk::ObjectType::SEMAPHORE);
        Ok(Self {
            device: dev.device.clone(),
            raw,
        })
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
        let info = vk::SemaphoreSignalInfo::builder()
            .semaphore(self.raw)
            .value(value);
        Ok(unsafe { self.device.signal_semaphore(&info) }?)
    }

    pub(crate) fn wait(&self, value: u64, timeout_ns: u64) -> Result<bool> {
        let semaphores = [self.raw];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe { self.device.wait_semaphores(&info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn current_value(&self) -> Result<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(self.raw) }?)
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.raw, None) };
    }
}

pub(crate) struct VulkanEvent {
    device: ash::Device,
    pub(crate) raw: vk::Event,
}

impl VulkanEvent {
    pub(crate) fn new(dev: &VulkanDevice, info: &EventCreateInfo) -> Result<Self> {
        let raw = unsafe {
            dev.device
                .create_event(&vk::EventCreateInfo::builder().build(), None)
        }?;
        dev.set_name(raw, info.debug_name, vk::ObjectType::EVENT);
        Ok(Self {
            device: dev.device.clone(),
            raw,
        })
    }

    pub(crate) fn set(&self) -> Result<()> {
        Ok(unsafe { self.device.set_event(self.raw) }?)
    }

    pub(crate) fn reset(&self) -> Result<()> {
        Ok(unsafe { self.device.reset_event(self.raw) }?)
    }

    pub(crate) fn is_set(&self) -> Result<bool> {
        Ok(unsafe { self.device.get_event_status(self.raw) }?)
    }
}

impl Drop for VulkanEvent {
    fn drop(&mut self) {
        unsafe { self.device.destroy_event(self.raw, None) };
    }
}
