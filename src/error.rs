//! Error taxonomy for an update run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("no mirror responded successfully")]
    NoReachableMirror,

    #[error("no builds found in the same branch as local build {major}")]
    NoBuildsInBranch { major: u64 },

    #[error("build {build} not found on server")]
    BuildNotFound { build: String },

    #[error("build {build} exists but is incomplete or in another branch")]
    BuildUnavailable { build: String },

    #[error("required baseline build {build} not found on server")]
    RequiredBaselineMissing { build: String },

    #[error("incomplete artifact set: {0}")]
    IncompleteArtifactSet(String),

    #[error("installation of {package} failed with code {code}")]
    Install {
        package: String,
        code: i32,
        fatal: bool,
    },

    #[error("host information unavailable: {0}")]
    HostInfo(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether the failure ends the run, as opposed to being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        match self {
            UpdateError::Install { fatal, .. } => *fatal,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
