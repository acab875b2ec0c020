/// Error handling module for the upload supervisor.
///
/// This module defines the error types used throughout the library.
/// Every failure of a start attempt ends up as one of these variants and is
/// reported to the caller's callback as a single `failed` notification; none
/// of them is fatal to the host.
///
/// # Example
///
/// ```
/// use upload_supervisor::error::{Error, FailureKind, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Server is up"),
///         Err(Error::AssetMissing { asset }) => println!("Bundled binary missing: {}", asset),
///         Err(e) if e.kind() == FailureKind::DiedImmediately => println!("Crashed on launch"),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the upload-supervisor library.
///
/// Each variant carries enough context to produce an actionable message,
/// in particular the asset path when the bundled binary cannot be found.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The bundled server binary for the detected architecture does not exist.
    ///
    /// This is the most likely real-world failure: the package was built
    /// without the binary for this CPU.
    #[error("Server binary asset not found: {asset}")]
    AssetMissing {
        /// Asset path that was looked up in the asset store
        asset: String,
    },

    /// The asset exists but could not be read or written to its install path.
    #[error("Failed to copy server binary from {asset}: {reason}")]
    AssetCopy {
        /// Asset path being copied
        asset: String,
        /// Underlying I/O error text
        reason: String,
    },

    /// The installed binary could not be marked readable and executable.
    #[error("Failed to set executable permission on {path}: {reason}")]
    PermissionSet {
        /// Installed binary path
        path: String,
        /// Underlying I/O error text
        reason: String,
    },

    /// The operating system refused to create the child process.
    #[error("Failed to start process: {0}")]
    Spawn(String),

    /// The child terminated before its liveness was checked.
    #[error("process died immediately")]
    DiedImmediately {
        /// Exit code, if the child exited normally
        code: Option<i32>,
    },

    /// An in-flight start was cancelled by `stop`.
    #[error("start cancelled")]
    Cancelled,

    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration is malformed JSON or YAML
    /// - Required fields are missing
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The supervisor task is no longer running.
    #[error("Supervisor is not running")]
    SupervisorGone,

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Coarse classification of a failed start attempt.
///
/// This is the taxonomy surfaced to callbacks and lifecycle records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Bundled binary missing or unreadable
    AssetMissingOrUnreadable,
    /// Could not mark the installed binary executable
    PermissionSetFailed,
    /// OS refused to create the process
    SpawnFailed,
    /// Child exited within the grace period
    DiedImmediately,
    /// Start was cancelled by a stop
    Cancelled,
    /// Configuration problems
    Config,
    /// Everything else
    Other,
}

impl Error {
    /// Classify this error for callbacks and lifecycle records
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::AssetMissing { .. } | Error::AssetCopy { .. } => {
                FailureKind::AssetMissingOrUnreadable
            }
            Error::PermissionSet { .. } => FailureKind::PermissionSetFailed,
            Error::Spawn(_) => FailureKind::SpawnFailed,
            Error::DiedImmediately { .. } => FailureKind::DiedImmediately,
            Error::Cancelled => FailureKind::Cancelled,
            Error::ConfigParse(_) | Error::ConfigInvalid(_) => FailureKind::Config,
            Error::SupervisorGone | Error::Other(_) => FailureKind::Other,
        }
    }

    /// Whether the host should retry after this failure
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl FailureKind {
    /// Every start failure is retryable; configuration errors and
    /// cancellations are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Config | FailureKind::Cancelled)
    }
}

/// Result type for upload-supervisor operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;
