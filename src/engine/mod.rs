use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::{BaselineRule, RunContext};
use crate::engine::models::{
    ArtifactPlan, ArtifactRole, BuildEligibility, BuildFolder, DownloadRecord,
};
use crate::engine::state::{ResolverState, RunOutcome};
use crate::env;
use crate::error::{Result, UpdateError};
use crate::host::HostInfo;
use crate::index;
use crate::networking::mirror::MirrorSelector;
use crate::networking::{
    Fetcher, PROBE_TIMEOUT, RetryPolicy, TEXT_TIMEOUT, TransportPolicy, join_url,
};
use crate::process::PackageInstaller;
use crate::prompt::OperatorPrompt;
use crate::storage::StorageManager;
use crate::version::{Version, parse_short};

pub mod artifacts;
pub mod enablement;
pub mod models;
pub mod state;

pub struct UpdateResolver {
    pub state: ResolverState,
    ctx: RunContext,
    fetcher: Fetcher,
    storage: StorageManager,
    host: Arc<dyn HostInfo>,
    installer: Arc<dyn PackageInstaller>,
    prompt: Arc<dyn OperatorPrompt>,
}

impl UpdateResolver {
    pub fn new(
        ctx: RunContext,
        host: Arc<dyn HostInfo>,
        installer: Arc<dyn PackageInstaller>,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Self {
        let fetcher = Fetcher::new(
            ctx.credentials.clone(),
            TransportPolicy {
                downgrade_https: ctx.downgrade_https,
            },
            RetryPolicy::default(),
        );
        let storage = StorageManager::new(ctx.data_dir.clone());
        Self {
            state: ResolverState::Init,
            ctx,
            fetcher,
            storage,
            host,
            installer,
            prompt,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Run the whole update. Clean early exits are `Ok`; fatal failures are
    /// logged and returned.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let result = self.resolve().await;
        match &result {
            Ok(outcome) => debug!("run finished in state {}: {outcome:?}", self.state.label()),
            Err(err) => {
                let failed_in = self.state;
                self.enter(ResolverState::Aborted);
                error!("Update aborted after {}: {err}", failed_in.label());
            }
        }
        result
    }

    async fn resolve(&mut self) -> Result<RunOutcome> {
        self.enter(ResolverState::Init);
        if !self.confirm("Proceed with checking for updates?") {
            info!("Update cancelled by user.");
            return Ok(RunOutcome::Cancelled { checkpoint: "check" });
        }

        let raw = self
            .host
            .local_version()
            .ok_or_else(|| UpdateError::HostInfo("could not read the installed build".into()))?;
        let (short_local, local) = parse_short(&raw)?;
        info!("Local build: {short_local}");

        let base = self.select_mirror().await?;
        self.enter(ResolverState::MirrorSelected);

        let html = self.fetcher.fetch_text(&base, TEXT_TIMEOUT).await?;
        info!("Using update server: {base}");
        let folders = index::list_build_folders(&html);
        if folders.is_empty() {
            return Err(UpdateError::Parse(format!(
                "no build-like folders found at {base}"
            )));
        }
        self.enter(ResolverState::IndexFetched);

        let baseline = self.ctx.rules.baseline_for(local.major()).cloned();
        let same_branch = filter_branch(&folders, &local, baseline.as_ref())?;
        let shown: Vec<&str> = same_branch
            .iter()
            .filter(|(_, eligibility)| !eligibility.is_baseline)
            .map(|(f, _)| f.short_name.as_str())
            .collect();
        info!("Remote candidate builds: {}", shown.join(", "));
        self.enter(ResolverState::BranchFiltered);

        let complete = self.filter_complete(&base, same_branch).await;
        if complete.is_empty() {
            info!("No builds found that have been completely uploaded to the server.");
            return Ok(RunOutcome::ServerMidUpload);
        }
        self.enter(ResolverState::CompletenessFiltered);

        let target = select_build(
            &folders,
            &complete,
            &local,
            self.ctx.build_override.as_deref(),
            baseline.as_ref(),
        )?;
        info!("Selected remote build: {target}");
        self.enter(ResolverState::BuildSelected);

        let overridden = self.ctx.build_override.is_some();
        match target.version.cmp(&local) {
            Ordering::Equal if !overridden => {
                if !self.confirm("Local build equals remote build. Reinstall anyway?") {
                    info!("Checking for Enablement Package applicability...");
                    self.offer_enablement(&local).await?;
                    return Ok(RunOutcome::UpToDate {
                        build: target.short_name,
                    });
                }
                info!("User chose to reinstall the same build.");
            }
            Ordering::Less if !overridden => {
                info!("Local build newer than remote, exiting.");
                return Ok(RunOutcome::LocalNewer {
                    local: short_local,
                    remote: target.short_name,
                });
            }
            _ => {}
        }
        self.enter(ResolverState::VersionCompared);

        if !self.confirm(&format!("Do you want to download {target} updates?")) {
            info!("Update cancelled before downloading files.");
            return Ok(RunOutcome::Cancelled {
                checkpoint: "download",
            });
        }

        let arch = self.host.architecture();
        info!("Detected architecture: {arch}");
        let folder = join_url(&base, &format!("{}/{arch}/", target.short_name))?;
        info!("Accessing {folder}");
        let listing = self.fetcher.fetch_text(&folder, TEXT_TIMEOUT).await?;
        let files = index::list_files(&listing);
        if files.is_empty() {
            return Err(UpdateError::IncompleteArtifactSet(format!(
                "no files found in {folder}"
            )));
        }
        let plan = artifacts::plan(&files)?;
        self.enter(ResolverState::ArtifactsClassified);

        self.enter(ResolverState::Fetching);
        let downloads = self.fetch_plan(&folder, &plan).await?;

        if self.ctx.dry_run {
            info!(
                "Dry run: {} package(s) downloaded, skipping installation.",
                downloads.len()
            );
            self.offer_enablement(&local).await?;
            return Ok(RunOutcome::Downloaded {
                build: target.short_name,
            });
        }

        self.enter(ResolverState::Installing);
        if !self.confirm("Do you want to install the updates now?") {
            info!("Installation of downloaded updates cancelled by user.");
            return Ok(RunOutcome::Cancelled {
                checkpoint: "install",
            });
        }
        self.install_plan(&downloads).await?;

        self.enter(ResolverState::Done);
        self.offer_enablement(&local).await?;
        info!("Update finished successfully. A reboot is required.");
        self.offer_cleanup().await;
        self.offer_reboot();

        Ok(RunOutcome::Installed {
            build: target.short_name,
        })
    }

    async fn select_mirror(&self) -> Result<String> {
        let selector = MirrorSelector::new(&self.fetcher, self.ctx.rules.probe_file.as_str());
        if self.ctx.speed_test {
            selector.pick_fastest(&self.ctx.mirrors).await
        } else {
            selector.pick_first_reachable(&self.ctx.mirrors).await
        }
    }

    /// Drop builds whose upload-in-progress marker is present.
    async fn filter_complete(
        &self,
        base: &str,
        same_branch: Vec<(BuildFolder, BuildEligibility)>,
    ) -> Vec<BuildFolder> {
        let marker = &self.ctx.rules.incomplete_marker;
        let mut complete = Vec::with_capacity(same_branch.len());
        for (folder, mut eligibility) in same_branch {
            let uploading = match join_url(base, &format!("{}/{marker}", folder.short_name)) {
                Ok(url) => self.fetcher.exists(&url, PROBE_TIMEOUT).await,
                Err(err) => {
                    warn!("Cannot probe {folder} for an upload marker: {err}");
                    false
                }
            };
            eligibility.complete = !uploading;
            debug!("build {folder}: {eligibility:?}");
            if !eligibility.complete {
                info!("Skipping build {folder}: It is currently being uploaded to the server.");
                continue;
            }
            complete.push(folder);
        }
        complete
    }

    async fn fetch_plan(
        &self,
        folder: &str,
        plan: &ArtifactPlan,
    ) -> Result<Vec<(ArtifactRole, DownloadRecord)>> {
        let mut downloads = Vec::new();
        for (role, name) in plan.ordered() {
            let url = join_url(folder, &urlencoding::encode(name))?;
            info!("Fetching {} {name}", role.label());
            let record = self
                .fetcher
                .download(&url, &self.ctx.data_dir, self.prompt.as_ref())
                .await?;
            debug!(
                "{name}: {} (md5 {})",
                if record.transferred { "downloaded" } else { "reused" },
                record.checksum.as_deref().unwrap_or("unverified")
            );
            downloads.push((role, record));
        }
        Ok(downloads)
    }

    /// Install in fetch order. Only the framework update may fail without
    /// aborting the run.
    async fn install_plan(&self, downloads: &[(ArtifactRole, DownloadRecord)]) -> Result<()> {
        for (role, record) in downloads {
            let package = record
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let fatal = *role != ArtifactRole::FrameworkUpdate;
            let path = record.path.clone();
            let code = match self.blocking(move |installer| installer.install(&path)).await? {
                Ok(code) => code,
                Err(err) if !fatal => {
                    warn!("{} installation could not start: {err}", role.label());
                    continue;
                }
                Err(err) => return Err(err),
            };
            if code != 0 {
                let err = UpdateError::Install {
                    package,
                    code,
                    fatal,
                };
                if err.is_fatal() {
                    return Err(err);
                }
                warn!("{err}");
                continue;
            }
            if *role == ArtifactRole::ServicingStack {
                self.blocking(|installer| installer.settle()).await?;
            }
        }
        Ok(())
    }

    /// Run an installer call on the blocking pool; package tools take minutes.
    async fn blocking<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PackageInstaller) -> T + Send + 'static,
    {
        let installer = Arc::clone(&self.installer);
        tokio::task::spawn_blocking(move || job(installer.as_ref()))
            .await
            .map_err(|err| UpdateError::Io(std::io::Error::other(err)))
    }

    async fn offer_cleanup(&self) {
        if !self.confirm("Do you want to remove downloaded update files?") {
            return;
        }
        if let Err(err) = self
            .storage
            .remove_downloads(&[env::log_file_name(), "updater.json"])
            .await
        {
            warn!("Failed to clean {}: {err}", self.storage.base_dir().display());
        }
    }

    fn offer_reboot(&self) {
        if !self.confirm("Reboot now?") {
            info!("Reboot postponed.");
            return;
        }
        if let Err(err) = self.installer.schedule_reboot() {
            warn!("Failed to schedule reboot: {err}");
        }
    }

    fn confirm(&self, question: &str) -> bool {
        self.prompt.confirm(question)
    }

    fn enter(&mut self, next: ResolverState) {
        debug!("resolver: {} -> {}", self.state.label(), next.label());
        self.state = next;
    }
}

/// Initial eligibility of a listed build. Completeness is settled later by
/// probing the upload marker.
pub fn assess(
    folder: &BuildFolder,
    local: &Version,
    baseline: Option<&BaselineRule>,
) -> BuildEligibility {
    BuildEligibility {
        same_branch: folder.version.major() == local.major(),
        complete: true,
        is_baseline: baseline.is_some_and(|rule| rule.build == folder.short_name),
    }
}

/// Builds of the local branch with their eligibility.
///
/// # Errors
/// [`UpdateError::NoBuildsInBranch`] when none share the local major.
pub fn filter_branch(
    folders: &[BuildFolder],
    local: &Version,
    baseline: Option<&BaselineRule>,
) -> Result<Vec<(BuildFolder, BuildEligibility)>> {
    let same: Vec<(BuildFolder, BuildEligibility)> = folders
        .iter()
        .map(|f| (f.clone(), assess(f, local, baseline)))
        .filter(|(_, eligibility)| eligibility.same_branch)
        .collect();
    if same.is_empty() {
        return Err(UpdateError::NoBuildsInBranch {
            major: local.major(),
        });
    }
    Ok(same)
}

/// Pick the build to install from the complete same-branch builds.
///
/// Precedence: explicit override, then the branch baseline when the local
/// revision is below its threshold, then the newest build.
pub fn select_build(
    all: &[BuildFolder],
    eligible: &[BuildFolder],
    local: &Version,
    build_override: Option<&str>,
    baseline: Option<&BaselineRule>,
) -> Result<BuildFolder> {
    if let Some(raw) = build_override {
        let wanted = raw.trim();
        if let Some(found) = eligible.iter().find(|f| f.short_name == wanted) {
            info!("Build override active: forcing installation of {wanted}");
            return Ok(found.clone());
        }
        if all.iter().any(|f| f.short_name == wanted) {
            error!(
                "Available fully uploaded builds in branch: {}",
                join_names(eligible)
            );
            return Err(UpdateError::BuildUnavailable {
                build: wanted.to_owned(),
            });
        }
        error!("Available builds: {}", join_names(all));
        return Err(UpdateError::BuildNotFound {
            build: wanted.to_owned(),
        });
    }

    if let Some(rule) = baseline
        && let (Some(threshold), Some(minor)) = (rule.threshold(), local.minor())
        && minor < threshold
    {
        return match eligible.iter().find(|f| f.short_name == rule.build) {
            Some(found) => {
                info!("Forcing update to baseline build {}", rule.build);
                Ok(found.clone())
            }
            None => Err(UpdateError::RequiredBaselineMissing {
                build: rule.build.clone(),
            }),
        };
    }

    eligible
        .iter()
        .max_by(|a, b| a.version.cmp(&b.version))
        .cloned()
        .ok_or(UpdateError::NoBuildsInBranch {
            major: local.major(),
        })
}

fn join_names(folders: &[BuildFolder]) -> String {
    folders
        .iter()
        .map(|f| f.short_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
