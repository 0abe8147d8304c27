//! Cross-backend GPU synchronization and submission.
//!
//! `nori` puts one ordering-correct API over two native execution models:
//! the explicit-barrier model (Vulkan) and the resource-state model
//! (Direct3D 12). A headless [`Backend::Software`] device emulates a queue on
//! CPU threads for machines without a GPU.
//!
//! ```text
//! Context (backend tag + native device)
//! ├── Fence / Semaphore / Event
//! ├── Barrier ── borrows Buffer / Image
//! ├── CommandPool
//! │   └── CommandBuffer[0..count] ── submit(SubmitInfo..)
//! └── Swapchain
//!     └── PresentCycle (PerFrame<FrameResources>)
//! ```

pub mod gpu;
pub mod utils;

pub use gpu::*;

#[cfg(all(feature = "nori-dx12", not(target_os = "windows")))]
compile_error!("the `nori-dx12` feature is only available on Windows targets");
