//! Custom error types for the hardware control core.
//!
//! This module defines the primary error type, `HwError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes of the system:
//!
//! - **`AlreadyLocked`**: another controller already holds the exclusivity
//!   guard. The payload says whether the contention is with another thread
//!   in this process or with another process on the host. Fatal to
//!   construction, never retried.
//! - **`NotOnRobot`**: real-hardware construction was attempted somewhere
//!   that is not the robot. Fatal.
//! - **`FirmwareNotFound`**: no matching firmware image in any searched
//!   directory. Fatal on the real boot path.
//! - **`InstrumentMismatch`**: a discovered instrument does not match the
//!   caller's expectation. Surfaced to the discovery caller.
//! - **`Motion`**: the motion board rejected a command. Surfaced to the
//!   caller, not retried by the core.
//! - **`Construction`**: the dedicated worker failed to build its
//!   controller. Recovered by the boot sequencer via simulated fallback.
//! - **`WorkerGone`**: the dedicated worker has exited; no further
//!   operations can be submitted on this executor.
//!
//! The remaining variants wrap ambient failure sources (I/O, configuration,
//! disabled cargo features) so the rest of the crate can use `?` freely.

use crate::types::Mount;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type HwResult<T> = std::result::Result<T, HwError>;

/// Who holds the exclusivity guard when an acquire attempt fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockContention {
    /// Another thread in this process holds the controller.
    Thread,
    /// Another process on this host holds the controller.
    Process,
}

impl fmt::Display for LockContention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockContention::Thread => f.write_str("held by another thread in this process"),
            LockContention::Process => f.write_str("held by another process on this host"),
        }
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum HwError {
    #[error("only one hardware controller may be instantiated: {0}")]
    AlreadyLocked(LockContention),

    #[error("the hardware controller may only be instantiated on the robot")]
    NotOnRobot,

    #[error("could not find a smoothie firmware image in {searched:?}")]
    FirmwareNotFound { searched: Vec<PathBuf> },

    #[error("mount {mount}: expected instrument {expected} but got {}", .found.as_deref().unwrap_or("none"))]
    InstrumentMismatch {
        mount: Mount,
        expected: String,
        found: Option<String>,
    },

    #[error("motion controller error: {0}")]
    Motion(String),

    #[error("hardware controller construction failed: {0}")]
    Construction(String),

    #[error("hardware worker is no longer running")]
    WorkerGone,

    #[error("unknown module model '{0}'")]
    UnknownModule(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
