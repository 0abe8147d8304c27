pub mod per_frame;
pub use per_frame::PerFrame;

/// `true` when the environment variable is set to `1`.
pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}
