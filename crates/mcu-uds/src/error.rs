//! MCU startup errors
//!
//! Everything here is fatal: it is raised while building the context, before
//! any service runs. Request-level failures never become
//! Rust errors; they are answered on the bus with a negative response.

use thiserror::Error;

use crate::config::ConfigError;
use crate::memory::MemoryError;

#[derive(Debug, Error)]
pub enum McuError {
    /// Configuration rejected (bad unit id, zero block size, ...)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backing store could not be opened
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}
