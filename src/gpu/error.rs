use std::fmt;
use std::panic::Location;

use super::{Backend, CommandBufferState, QueueType};

#[cfg(feature = "nori-vulkan")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanError {
    res: ash::vk::Result,
}

#[cfg(feature = "nori-vulkan")]
impl VulkanError {
    /// Native result code reported by the driver.
    pub fn code(&self) -> ash::vk::Result {
        self.res
    }
}

#[cfg(feature = "nori-vulkan")]
impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {} (code {})", self.res, self.res.as_raw())
    }
}

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
#[derive(Debug, Clone)]
pub struct D3D12Error {
    err: windows::core::Error,
}

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
impl D3D12Error {
    /// Native HRESULT reported by the runtime.
    pub fn code(&self) -> i32 {
        self.err.code().0
    }
}

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
impl fmt::Display for D3D12Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D3D12 Error: {} (hresult {:#010x})", self.err.message(), self.err.code().0)
    }
}

#[derive(Debug)]
pub enum GPUError {
    #[cfg(feature = "nori-vulkan")]
    VulkanError(VulkanError),
    #[cfg(feature = "nori-vulkan")]
    LoadingError(ash::LoadingError),
    #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
    D3D12Error(D3D12Error),
    /// A backend name that does not exist.
    UnknownBackend(String),
    /// Neither the context info nor [`crate::set_api`] named a backend.
    NoBackendSelected,
    /// The backend exists but was not compiled into this build.
    UnsupportedBackend(Backend),
    BackendAlreadySelected(Backend),
    /// Two objects from different backends were combined.
    BackendMismatch { expected: Backend, found: Backend },
    NoSuitableDevice,
    QueueUnavailable(QueueType),
    HeadlessDisplayNotSupported,
    DeviceLost,
    InvalidBarrier(String),
    IndexOutOfRange { index: u32, count: u32 },
    InvalidCommandBufferState {
        index: u32,
        state: CommandBufferState,
        operation: &'static str,
    },
    SubmitLengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    BinarySemaphoreHostOperation(&'static str),
    TimelineValueDecrease { current: u64, requested: u64 },
    InvalidUsage(&'static str),
    Unimplemented(&'static str),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl fmt::Display for GPUError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "nori-vulkan")]
            GPUError::VulkanError(e) => e.fmt(f),
            #[cfg(feature = "nori-vulkan")]
            GPUError::LoadingError(e) => write!(f, "Failed to load Vulkan: {}", e),
            #[cfg(all(feature = "nori-dx12", target_os = "windows"))]
            GPUError::D3D12Error(e) => e.fmt(f),
            GPUError::UnknownBackend(name) => write!(f, "Unknown backend '{}'", name),
            GPUError::NoBackendSelected => write!(f, "No backend was selected"),
            GPUError::UnsupportedBackend(b) => {
                write!(f, "Backend '{}' is not compiled into this build", b)
            }
            GPUError::BackendAlreadySelected(b) => {
                write!(f, "Backend '{}' was already selected", b)
            }
            GPUError::BackendMismatch { expected, found } => write!(
                f,
                "Object belongs to backend '{}' but was used with '{}'",
                found, expected
            ),
            GPUError::NoSuitableDevice => write!(f, "No suitable GPU device found"),
            GPUError::QueueUnavailable(q) => write!(f, "No {:?} queue available", q),
            GPUError::HeadlessDisplayNotSupported => {
                write!(f, "Presentation requires a context created with a display")
            }
            GPUError::DeviceLost => write!(f, "Device lost"),
            GPUError::InvalidBarrier(reason) => write!(f, "Invalid barrier: {}", reason),
            GPUError::IndexOutOfRange { index, count } => write!(
                f,
                "Command buffer index {} out of range (count {})",
                index, count
            ),
            GPUError::InvalidCommandBufferState {
                index,
                state,
                operation,
            } => write!(
                f,
                "Cannot {} command buffer {} in state {:?}",
                operation, index, state
            ),
            GPUError::SubmitLengthMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "Submit array '{}' has {} entries, expected {}",
                field, found, expected
            ),
            GPUError::BinarySemaphoreHostOperation(op) => {
                write!(f, "'{}' is only valid on timeline semaphores", op)
            }
            GPUError::TimelineValueDecrease { current, requested } => write!(
                f,
                "Timeline value {} is lower than the current value {}",
                requested, current
            ),
            GPUError::InvalidUsage(msg) => write!(f, "Invalid usage: {}", msg),
            GPUError::Unimplemented(what) => write!(f, "Unimplemented: {}", what),
        }
    }
}

impl std::error::Error for GPUError {}

#[cfg(feature = "nori-vulkan")]
impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        match res {
            ash::vk::Result::ERROR_DEVICE_LOST => GPUError::DeviceLost,
            _ => GPUError::VulkanError(VulkanError { res }),
        }
    }
}

#[cfg(feature = "nori-vulkan")]
impl From<ash::LoadingError> for GPUError {
    fn from(res: ash::LoadingError) -> Self {
        GPUError::LoadingError(res)
    }
}

#[cfg(all(feature = "nori-dx12", target_os = "windows"))]
impl From<windows::core::Error> for GPUError {
    fn from(err: windows::core::Error) -> Self {
        GPUError::D3D12Error(D3D12Error { err })
    }
}

/// Log a fatal error at the caller's location.
///
/// With `abort` set the process is aborted after logging; otherwise the error
/// is handed back so the caller can return it.
#[track_caller]
pub(crate) fn report_fatal(err: GPUError, abort: bool) -> GPUError {
    let loc = Location::caller();
    log::error!("{}:{}: {}", loc.file(), loc.line(), err);
    if abort {
        std::process::abort();
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_names_the_field() {
        let err = GPUError::SubmitLengthMismatch {
            field: "wait_dst_pipeline_stages",
            expected: 2,
            found: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("wait_dst_pipeline_stages"));
        assert!(msg.contains("expected 2"));
    }

    #[test]
    fn reported_errors_are_returned_when_not_aborting() {
        let err = report_fatal(GPUError::DeviceLost, false);
        assert!(matches!(err, GPUError::DeviceLost));
    }

    #[cfg(feature = "nori-vulkan")]
    #[test]
    fn vulkan_results_keep_their_code() {
        let err: GPUError = ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into();
        match err {
            GPUError::VulkanError(e) => {
                assert_eq!(e.code(), ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            GPUError::from(ash::vk::Result::ERROR_DEVICE_LOST),
            GPUError::DeviceLost
        ));
    }
}
