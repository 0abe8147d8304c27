use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::*;
pub mod structs;
pub use structs::*;
pub mod state;
pub use state::*;
pub mod resource;
pub use resource::*;
pub mod barrier;
pub use barrier::*;
pub mod context;
pub use context::*;
pub mod sync;
pub use sync::*;
pub mod command_pool;
pub use command_pool::*;
pub mod command_buffer;
pub use command_buffer::*;
pub mod submit;
pub use submit::*;
pub mod swapchain;
pub use swapchain::*;
pub mod present;
pub use present::*;

pub mod software;
#[cfg(feature = "nori-vulkan")]
pub mod vulkan;
#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
pub mod dx12;

/// Native GPU execution environment a [`Context`] is bound to.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum Backend {
    /// Explicit barriers, binary + timeline semaphores, fences and events.
    Vulkan = 1,
    /// Per-resource states and monotonic fences.
    D3D12 = 2,
    /// CPU-emulated queues. Always available.
    Software = 3,
}

impl Backend {
    /// Whether support for this backend was compiled into the crate.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Vulkan => cfg!(feature = "nori-vulkan"),
            Backend::D3D12 => cfg!(all(feature = "nori-dx12", target_os = "windows")),
            Backend::Software => true,
        }
    }

    /// The barrier model native to this backend.
    ///
    /// The software backend is configurable, see
    /// [`SoftwareDeviceInfo::barrier_model`].
    pub fn native_barrier_model(self) -> BarrierModel {
        match self {
            Backend::Vulkan => BarrierModel::Explicit,
            Backend::D3D12 | Backend::Software => BarrierModel::ResourceState,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Backend::Vulkan),
            2 => Some(Backend::D3D12),
            3 => Some(Backend::Software),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Vulkan => write!(f, "vulkan"),
            Backend::D3D12 => write!(f, "d3d12"),
            Backend::Software => write!(f, "software"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = GPUError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(Backend::Vulkan),
            "d3d12" | "dx12" => Ok(Backend::D3D12),
            "software" | "sw" => Ok(Backend::Software),
            _ => Err(GPUError::UnknownBackend(s.to_string())),
        }
    }
}

/// How a backend expresses resource hazards.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum BarrierModel {
    /// Access masks, stage masks and image layouts map 1:1 onto native
    /// barriers.
    Explicit,
    /// Barriers become before/after resource-state pairs.
    #[default]
    ResourceState,
}

static SELECTED_API: AtomicU8 = AtomicU8::new(0);

/// Record the process-wide default backend.
///
/// Only contexts created with [`ContextInfo::backend`] left as `None` read
/// this value. The selection is made once; later calls fail unless
/// `force_override` is set.
pub fn set_api(backend: Backend, force_override: bool) -> Result<()> {
    if !backend.is_available() {
        return Err(report_fatal(GPUError::UnsupportedBackend(backend), false));
    }

    if force_override {
        SELECTED_API.store(backend as u8, Ordering::SeqCst);
        return Ok(());
    }

    match SELECTED_API.compare_exchange(0, backend as u8, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => Ok(()),
        Err(current) if current == backend as u8 => Ok(()),
        Err(current) => Err(report_fatal(
            GPUError::BackendAlreadySelected(
                Backend::from_raw(current).unwrap_or(Backend::Software),
            ),
            false,
        )),
    }
}

/// The process-wide default backend, if one was selected.
pub fn get_api() -> Option<Backend> {
    Backend::from_raw(SELECTED_API.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_from_env_style_names() {
        assert_eq!("vulkan".parse::<Backend>().unwrap(), Backend::Vulkan);
        assert_eq!("DX12".parse::<Backend>().unwrap(), Backend::D3D12);
        assert_eq!(" software ".parse::<Backend>().unwrap(), Backend::Software);
        assert!(matches!(
            "metal".parse::<Backend>(),
            Err(GPUError::UnknownBackend(_))
        ));
    }

    #[test]
    fn software_backend_is_always_available() {
        assert!(Backend::Software.is_available());
        assert_eq!(
            Backend::Vulkan.native_barrier_model(),
            BarrierModel::Explicit
        );
        assert_eq!(
            Backend::D3D12.native_barrier_model(),
            BarrierModel::ResourceState
        );
    }

    #[test]
    fn api_selection_is_sticky_unless_forced() {
        set_api(Backend::Software, false).unwrap();
        assert_eq!(get_api(), Some(Backend::Software));
        // Selecting the same backend again is harmless.
        set_api(Backend::Software, false).unwrap();
        if Backend::Vulkan.is_available() {
            assert!(matches!(
                set_api(Backend::Vulkan, false),
                Err(GPUError::BackendAlreadySelected(Backend::Software))
            ));
            set_api(Backend::Vulkan, true).unwrap();
            assert_eq!(get_api(), Some(Backend::Vulkan));
            set_api(Backend::Software, true).unwrap();
        }
        assert_eq!(get_api(), Some(Backend::Software));
    }
}
