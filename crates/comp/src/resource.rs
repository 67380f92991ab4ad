//! Resource limits for loading and execution.
//!
//! The engine is cooperative and single-threaded; these limits are the only
//! backstop against runaway programs. Exceeding an execution limit produces a
//! `#fail.runtime` failure value, not a panic; exceeding the source size limit
//! is a build error.

/// Limits threaded through the loader and engine.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum module source size in bytes.
    pub max_source_bytes: u64,
    /// Maximum concurrent frames on the engine stack.
    pub max_frames: usize,
    /// Maximum total instructions per `run` call; `None` is unlimited.
    pub max_steps: Option<u64>,
}

/// Maximum module source size: 10 MiB.
pub const MAX_SOURCE_BYTES: u64 = 10 * 1024 * 1024;

/// Default frame-stack depth limit.
pub const DEFAULT_MAX_FRAMES: usize = 10_000;

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: MAX_SOURCE_BYTES,
            max_frames: DEFAULT_MAX_FRAMES,
            max_steps: None,
        }
    }
}
