//! Error types for packet caching and write-back.
//!
//! Only conditions that change the outcome of a call are errors. Running out of
//! cache room, falling out of the resident window and dropping a packet on a
//! full queue are all absorbed by the components themselves (a synchronous
//! load, a resync, an [`Enqueued::Dropped`](crate::Enqueued::Dropped) return);
//! they show up in the component statistics, not here.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: missing callbacks, invalid tuning, unreadable config files
//! - **Callback Errors**: a loader or sink returned an error or panicked
//! - **Lifecycle Errors**: halted prefetchers, failed thread spawns, double finalization
//!
//! ## Recovery
//!
//! ```rust
//! use packetflow::PipelineError;
//!
//! let error = PipelineError::callback_failed("load", 42, "disk unplugged");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Packet {operation} callback failed for index {index}")]
    Callback {
        operation: &'static str,
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("{component} halted after a callback failure; restart it to resume")]
    Halted { component: &'static str },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Completion value was already finalized")]
    AlreadyFinalized,

    #[error("Operation '{operation}' is not supported by {target}")]
    UnsupportedOperation { operation: &'static str, target: &'static str },

    #[error("Packet shape describes {expected} bytes but data holds {actual} bytes")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Failed to spawn {component} thread")]
    Spawn {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration parse error in {context}: {details}")]
    ConfigParse { context: String, details: String },
}

impl PipelineError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Callback { .. } => true,
            PipelineError::Halted { .. } => true,
            PipelineError::Timeout { .. } => true,
            PipelineError::Spawn { .. } => true,
            PipelineError::InvalidConfiguration { .. } => false,
            PipelineError::AlreadyFinalized => false,
            PipelineError::UnsupportedOperation { .. } => false,
            PipelineError::ShapeMismatch { .. } => false,
            PipelineError::ConfigFile { .. } => false,
            PipelineError::ConfigParse { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PipelineError::InvalidConfiguration { .. } => vec![
                "Supply a loader or sink callback before building",
                "Use non-zero timeouts and worker counts",
                "Keep the low-water ratio within (0, 1]",
            ],
            PipelineError::Callback { .. } => vec![
                "Check that the packet source or destination is reachable",
                "Verify the callback is idempotent for a given index",
                "Restart the component once the callback is healthy",
            ],
            PipelineError::Halted { .. } => vec![
                "Call stop() then start() to begin a fresh session",
                "Inspect the earlier callback error for the root cause",
            ],
            PipelineError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check that the owner finalizes its counter",
            ],
            PipelineError::AlreadyFinalized => vec![
                "Create a fresh counter per unit of work",
                "Finalize each counter from its owner only",
            ],
            PipelineError::UnsupportedOperation { .. } => vec![
                "Increment and finalize leaf counters only",
                "Read aggregates through read_now() or read_blocking()",
            ],
            PipelineError::ShapeMismatch { .. } => vec![
                "Check width, height and element size against the data length",
                "Construct the packet without a shape if none applies",
            ],
            PipelineError::Spawn { .. } => vec![
                "Check process thread limits",
                "Reduce the number of writer workers",
            ],
            PipelineError::ConfigFile { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            PipelineError::ConfigParse { .. } => vec![
                "Check YAML syntax",
                "Remove unknown fields from the configuration",
            ],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration { reason: reason.into() }
    }

    /// Helper constructor for callback failures.
    pub fn callback_failed(
        operation: &'static str,
        index: usize,
        source: impl Into<BoxError>,
    ) -> Self {
        PipelineError::Callback { operation, index, source: source.into() }
    }

    /// Helper constructor for thread spawn failures.
    pub fn spawn_failed(component: &'static str, source: std::io::Error) -> Self {
        PipelineError::Spawn { component, source }
    }

    /// Helper constructor for configuration parse errors.
    pub fn config_parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        PipelineError::ConfigParse { context: context.into(), details: details.into() }
    }
}
