//! File and directory integrity monitoring.
//!
//! A resource (file or directory tree) is registered, fingerprinted with
//! SHA-256, and the fingerprint stored as a trusted baseline. Later checks
//! recompute the fingerprint and classify each resource as passed, failed,
//! unavailable or lacking a baseline. A background scheduler re-runs the
//! check at a fixed interval and halts on the first detected violation.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Monitor (facade used by the CLI / embedder)  │
//! │  ├── Registry   (SQLite resource store)       │
//! │  ├── Verifier   (batch update / check)        │
//! │  │   └── fingerprint (SHA-256 calculator)     │
//! │  └── Scheduler  (cancellable background loop) │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Batch operations take a [`CancelToken`] polled once per resource, so a
//! foreground run and the scheduler's background run share one cancellation
//! contract. The scheduler reports through [`MonitorEvent`]s on a channel
//! rather than callbacks, leaving thread marshalling to the consumer.

pub mod cancel;
pub mod fingerprint;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod verify;

pub use cancel::CancelToken;
pub use fingerprint::fingerprint;
pub use models::{Classification, Resource, ResourceKind};
pub use monitor::Monitor;
pub use registry::Registry;
pub use scheduler::{MonitorEvent, Scheduler, StartStatus, StopReason};
pub use verify::Verifier;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by the monitoring core
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already registered: {0}")]
    DuplicatePath(String),

    #[error("Resource is neither a file nor a directory: {0}")]
    UnsupportedResource(String),

    #[error("Check interval must be positive")]
    InvalidInterval,
}
