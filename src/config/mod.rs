use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{Result, UpdateError};
use crate::host::Arch;
use crate::networking::Credentials;
use crate::version::parse_short;

const LOCAL_CONFIG: &str = "updater.json";
const EMBEDDED_CONFIG: &str = include_str!("../../updater.json");

/// Server layout and per-branch rules.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterConfig {
    pub mirrors: Vec<String>,
    pub failsafe_url: String,
    #[serde(default = "default_probe_file")]
    pub probe_file: String,
    #[serde(default = "default_marker")]
    pub incomplete_marker: String,
    #[serde(default)]
    pub baselines: Vec<BaselineRule>,
    #[serde(default)]
    pub enablement_packages: Vec<EnablementRule>,
}

/// Intermediate build every host of `branch` must pass through.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BaselineRule {
    pub branch: u64,
    pub build: String,
    /// Local revisions below this are forced onto `build`. Defaults to the
    /// revision of `build` itself.
    #[serde(default)]
    pub below: Option<u64>,
}

impl BaselineRule {
    pub fn threshold(&self) -> Option<u64> {
        self.below.or_else(|| {
            parse_short(&self.build)
                .ok()
                .and_then(|(_, version)| version.minor())
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EnablementRule {
    pub branch: u64,
    /// Release the package switches on, e.g. `25H2`.
    pub release: String,
    /// Channel the host must currently report.
    pub from_channel: String,
    pub min_build: u64,
    pub urls: HashMap<String, String>,
}

impl EnablementRule {
    pub fn url_for(&self, arch: Arch) -> Option<&str> {
        self.urls.get(arch.as_str()).map(String::as_str)
    }
}

fn default_probe_file() -> String {
    "speed.test".into()
}

fn default_marker() -> String {
    "non_complete".into()
}

impl UpdaterConfig {
    pub fn embedded() -> Result<Self> {
        serde_json::from_str(EMBEDDED_CONFIG)
            .map_err(|e| UpdateError::Config(format!("embedded updater.json: {e}")))
    }

    /// Load rules from `explicit`, else `<data_dir>/updater.json`, else the embedded copy.
    ///
    /// An unreadable explicit file is an error; a broken file in the data
    /// directory only triggers a warning.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            info!("config: loading {}", path.display());
            let text = fs::read_to_string(path).map_err(|e| {
                UpdateError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            return serde_json::from_str(&text)
                .map_err(|e| UpdateError::Config(format!("{} parse error: {e}", path.display())));
        }

        let local = data_dir.join(LOCAL_CONFIG);
        match fs::read_to_string(&local) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    info!("config: using {}", local.display());
                    return Ok(config);
                }
                Err(err) => warn!(
                    "config: {} parse error ({err}); using embedded copy",
                    local.display()
                ),
            },
            Err(err) => debug!("config: no local {} ({err})", local.display()),
        }
        Self::embedded()
    }

    pub fn baseline_for(&self, branch: u64) -> Option<&BaselineRule> {
        self.baselines.iter().find(|rule| rule.branch == branch)
    }

    pub fn enablement_for(&self, branch: u64) -> Option<&EnablementRule> {
        self.enablement_packages
            .iter()
            .find(|rule| rule.branch == branch)
    }
}

/// Everything one run needs to know, passed explicitly to each component.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub data_dir: PathBuf,
    pub credentials: Option<Credentials>,
    pub mirrors: Vec<String>,
    /// Pick the mirror by measured speed rather than first answer.
    pub speed_test: bool,
    pub downgrade_https: bool,
    pub dry_run: bool,
    pub build_override: Option<String>,
    pub rules: UpdaterConfig,
}
