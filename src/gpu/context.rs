use std::sync::Arc;

use raw_window_handle::RawDisplayHandle;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

use super::software::SoftwareDevice;
use super::{get_api, report_fatal, Backend, BarrierModel, GPUError, QueueType, Result};
use crate::utils::env_flag;

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
use super::dx12::D3D12Device;
#[cfg(feature = "nori-vulkan")]
use super::vulkan::VulkanDevice;

/// Tuning knobs for [`Backend::Software`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct SoftwareDeviceInfo {
    /// Which translation path barriers take on this device.
    pub barrier_model: BarrierModel,
    /// Artificial execution time added to every emulated draw, dispatch,
    /// copy and build, in microseconds.
    pub command_latency_us: u64,
}

impl Default for SoftwareDeviceInfo {
    fn default() -> Self {
        Self {
            barrier_model: BarrierModel::ResourceState,
            command_latency_us: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct ContextInfo {
    /// Backend to create. `None` falls back to [`get_api`].
    pub backend: Option<Backend>,
    /// Physical adapter to use, in enumeration order.
    pub device_index: usize,
    pub enable_validation: bool,
    /// Abort the process on fatal errors instead of returning them.
    pub abort_on_fatal: bool,
    pub software: SoftwareDeviceInfo,
}

impl ContextInfo {
    /// Default settings overlaid with `NORI_BACKEND`, `NORI_VALIDATION`,
    /// `NORI_ABORT_ON_FATAL` and `NORI_DEVICE`.
    pub fn from_env() -> Result<Self> {
        let mut info = Self::default();
        info.overlay(|name| std::env::var(name).ok())?;
        info.enable_validation |= env_flag("NORI_VALIDATION");
        info.abort_on_fatal |= env_flag("NORI_ABORT_ON_FATAL");
        Ok(info)
    }

    fn overlay<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("NORI_BACKEND") {
            self.backend = Some(name.parse()?);
        }
        if let Some(idx) = lookup("NORI_DEVICE") {
            match idx.trim().parse::<usize>() {
                Ok(idx) => self.device_index = idx,
                Err(_) => log::warn!("Ignoring NORI_DEVICE={:?}: not an adapter index", idx),
            }
        }
        Ok(())
    }
}

pub(crate) enum Device {
    #[cfg(feature = "nori-vulkan")]
    Vulkan(VulkanDevice),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12(D3D12Device),
    Software(SoftwareDevice),
}

impl Device {
    fn wait_idle(&self) -> Result<()> {
        match self {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => dev.wait_idle(),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => dev.wait_idle(),
            Device::Software(dev) => dev.wait_idle(),
        }
    }
}

struct ContextInner {
    info: ContextInfo,
    backend: Backend,
    barrier_model: BarrierModel,
    presentation: bool,
    device: Device,
}

/// A native device bound to one backend.
///
/// Every primitive is created against a `Context` and keeps a clone of it,
/// so the device is torn down only after the last object using it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Construct a context without presentation support.
    ///
    /// On Vulkan no surface extensions are enabled, so [`crate::Swapchain`]
    /// creation fails with [`GPUError::HeadlessDisplayNotSupported`]. The
    /// software backend always emulates presentation.
    pub fn headless(info: &ContextInfo) -> Result<Self> {
        Self::create(info, None)
    }

    /// Construct a context able to present to surfaces of `display`.
    pub fn new(info: &ContextInfo, display: RawDisplayHandle) -> Result<Self> {
        Self::create(info, Some(display))
    }

    fn create(info: &ContextInfo, display: Option<RawDisplayHandle>) -> Result<Self> {
        let abort = info.abort_on_fatal;
        let backend = match info.backend.or_else(get_api) {
            Some(b) => b,
            None => return Err(report_fatal(GPUError::NoBackendSelected, abort)),
        };
        if !backend.is_available() {
            return Err(report_fatal(GPUError::UnsupportedBackend(backend), abort));
        }

        #[cfg(not(feature = "nori-vulkan"))]
        let _ = display;

        let device = match backend {
            #[cfg(feature = "nori-vulkan")]
            Backend::Vulkan => match VulkanDevice::new(info, display) {
                Ok(dev) => Device::Vulkan(dev),
                Err(e) => return Err(report_fatal(e, abort)),
            },
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Backend::D3D12 => match D3D12Device::new(info) {
                Ok(dev) => Device::D3D12(dev),
                Err(e) => return Err(report_fatal(e, abort)),
            },
            Backend::Software => match SoftwareDevice::new(&info.software) {
                Ok(dev) => Device::Software(dev),
                Err(e) => return Err(report_fatal(e, abort)),
            },
            #[allow(unreachable_patterns)]
            _ => return Err(report_fatal(GPUError::UnsupportedBackend(backend), abort)),
        };

        let barrier_model = match backend {
            Backend::Software => info.software.barrier_model,
            b => b.native_barrier_model(),
        };
        let presentation = backend != Backend::Vulkan || display.is_some();

        log::info!(
            "Created {} context ({:?} barriers{})",
            backend,
            barrier_model,
            if presentation { "" } else { ", headless" }
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                info: *info,
                backend,
                barrier_model,
                presentation,
                device,
            }),
        })
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    /// How barriers recorded against this context are translated.
    pub fn barrier_model(&self) -> BarrierModel {
        self.inner.barrier_model
    }

    pub fn info(&self) -> &ContextInfo {
        &self.inner.info
    }

    /// Whether swapchains may be created on this context.
    pub fn supports_presentation(&self) -> bool {
        self.inner.presentation
    }

    /// Block until every queue of the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.check(self.inner.device.wait_idle())
    }

    pub(crate) fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Whether both handles refer to the same native device.
    pub fn same_device(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(feature = "nori-vulkan")]
    pub(crate) fn vulkan(&self) -> Result<&VulkanDevice> {
        match &self.inner.device {
            Device::Vulkan(dev) => Ok(dev),
            #[allow(unreachable_patterns)]
            _ => Err(self.mismatch(Backend::Vulkan)),
        }
    }

    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    pub(crate) fn d3d12(&self) -> Result<&D3D12Device> {
        match &self.inner.device {
            Device::D3D12(dev) => Ok(dev),
            _ => Err(self.mismatch(Backend::D3D12)),
        }
    }

    pub(crate) fn software(&self) -> Result<&SoftwareDevice> {
        match &self.inner.device {
            Device::Software(dev) => Ok(dev),
            #[allow(unreachable_patterns)]
            _ => Err(self.mismatch(Backend::Software)),
        }
    }

    #[track_caller]
    fn mismatch(&self, expected: Backend) -> GPUError {
        self.fatal(GPUError::BackendMismatch {
            expected,
            found: self.inner.backend,
        })
    }

    /// Route a fatal error through the context's abort policy.
    #[track_caller]
    pub(crate) fn fatal(&self, err: GPUError) -> GPUError {
        report_fatal(err, self.inner.info.abort_on_fatal)
    }

    #[track_caller]
    pub(crate) fn check<T>(&self, res: Result<T>) -> Result<T> {
        match res {
            Ok(v) => Ok(v),
            Err(e) => Err(self.fatal(e)),
        }
    }

    /// Highest submission value the queue of `queue_type` has retired.
    pub(crate) fn completed_value(&self, queue_type: QueueType) -> Result<u64> {
        let res = match &self.inner.device {
            #[cfg(feature = "nori-vulkan")]
            Device::Vulkan(dev) => dev.queue(queue_type).completed_value(&dev.device),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            Device::D3D12(dev) => match dev.queue(queue_type).completed_value() {
                u64::MAX => Err(GPUError::DeviceLost),
                v => Ok(v),
            },
            Device::Software(dev) => Ok(dev.queue(queue_type).completed_value()),
        };
        self.check(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn software_info() -> ContextInfo {
        ContextInfo {
            backend: Some(Backend::Software),
            ..Default::default()
        }
    }

    #[test]
    fn env_overlay_reads_backend_and_device() {
        let mut info = ContextInfo::default();
        info.overlay(|name| match name {
            "NORI_BACKEND" => Some("software".into()),
            "NORI_DEVICE" => Some("2".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(info.backend, Some(Backend::Software));
        assert_eq!(info.device_index, 2);
    }

    #[test]
    fn env_overlay_rejects_unknown_backends() {
        let mut info = ContextInfo::default();
        let res = info.overlay(|name| (name == "NORI_BACKEND").then(|| "glide".to_string()));
        assert!(matches!(res, Err(GPUError::UnknownBackend(_))));
    }

    #[test]
    fn software_context_uses_configured_barrier_model() {
        let mut info = software_info();
        info.software.barrier_model = BarrierModel::Explicit;
        let ctx = Context::headless(&info).unwrap();
        assert_eq!(ctx.backend(), Backend::Software);
        assert_eq!(ctx.barrier_model(), BarrierModel::Explicit);
        assert!(ctx.supports_presentation());
        assert_eq!(ctx.info(), &info);
        ctx.wait_idle().unwrap();
    }

    #[test]
    fn contexts_with_different_backends_coexist() {
        let a = Context::headless(&software_info()).unwrap();
        let b = Context::headless(&software_info()).unwrap();
        assert!(!a.same_device(&b));
        assert!(a.same_device(&a.clone()));
        assert!(a.software().is_ok());
    }

    #[cfg(not(all(feature = "nori-dx12", target_os = "windows")))]
    #[test]
    fn uncompiled_backend_is_fatal() {
        let info = ContextInfo {
            backend: Some(Backend::D3D12),
            ..Default::default()
        };
        assert!(matches!(
            Context::headless(&info),
            Err(GPUError::UnsupportedBackend(Backend::D3D12))
        ));
    }
}
