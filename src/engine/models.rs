use std::fmt;
use std::path::PathBuf;

use crate::version::Version;

/// One candidate build folder found on the index page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildFolder {
    pub short_name: String,
    pub version: Version,
}

impl fmt::Display for BuildFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name)
    }
}

/// Per-run filtering state of a build folder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildEligibility {
    pub same_branch: bool,
    pub complete: bool,
    pub is_baseline: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    ServicingStack,
    CumulativeUpdate,
    StandaloneUpdate,
    FrameworkUpdate,
}

impl ArtifactRole {
    pub fn label(self) -> &'static str {
        match self {
            ArtifactRole::ServicingStack => "servicing stack",
            ArtifactRole::CumulativeUpdate => "cumulative update",
            ArtifactRole::StandaloneUpdate => "standalone update",
            ArtifactRole::FrameworkUpdate => "framework update",
        }
    }
}

/// Artifacts chosen for installation, in the order they must be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactPlan {
    Standalone {
        update: String,
        framework: Option<String>,
    },
    Combined {
        servicing_stack: String,
        cumulative: String,
        framework: Option<String>,
    },
}

impl ArtifactPlan {
    pub fn ordered(&self) -> Vec<(ArtifactRole, &str)> {
        let mut out = Vec::with_capacity(3);
        match self {
            ArtifactPlan::Standalone { update, framework } => {
                out.push((ArtifactRole::StandaloneUpdate, update.as_str()));
                if let Some(ndp) = framework {
                    out.push((ArtifactRole::FrameworkUpdate, ndp.as_str()));
                }
            }
            ArtifactPlan::Combined {
                servicing_stack,
                cumulative,
                framework,
            } => {
                out.push((ArtifactRole::ServicingStack, servicing_stack.as_str()));
                out.push((ArtifactRole::CumulativeUpdate, cumulative.as_str()));
                if let Some(ndp) = framework {
                    out.push((ArtifactRole::FrameworkUpdate, ndp.as_str()));
                }
            }
        }
        out
    }
}

/// A fetched artifact on disk and the digest the server published for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRecord {
    pub path: PathBuf,
    pub checksum: Option<String>,
    /// False when the local copy was reused without transfer.
    pub transferred: bool,
}
