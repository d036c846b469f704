//! Data models for monitored resources and verification outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a monitored resource, fixed when it is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Directory,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "directory" => Self::Directory,
            _ => Self::File,
        }
    }
}

/// Outcome of verifying one resource against its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Current fingerprint matches the stored baseline
    Passed,
    /// Current fingerprint differs from the stored baseline
    Failed,
    /// The resource could not be fingerprinted at all
    Unavailable,
    /// No baseline has been recorded yet
    NoHash,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
            Self::NoHash => "no_hash",
        }
    }
}

/// A registered resource under integrity monitoring.
///
/// `path` is the unique key. `name` and `kind` are fixed at registration
/// time and never re-derived from the filesystem afterwards. The baseline
/// pair is absent until the first successful baseline update and is only
/// ever written by the baseline update path, both fields together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub name: String,
    pub kind: ResourceKind,
    pub added_at: DateTime<Utc>,
    pub baseline_hash: Option<String>,
    pub baseline_checked_at: Option<DateTime<Utc>>,
}
