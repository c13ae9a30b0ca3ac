// Progress of one update run; every transition is logged by the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolverState {
    Init,
    MirrorSelected,
    IndexFetched,
    BranchFiltered,
    CompletenessFiltered,
    BuildSelected,
    VersionCompared,
    ArtifactsClassified,
    Fetching,
    Installing,
    Done,
    Aborted,
}

impl ResolverState {
    pub fn label(self) -> &'static str {
        match self {
            ResolverState::Init => "init",
            ResolverState::MirrorSelected => "mirror selected",
            ResolverState::IndexFetched => "index fetched",
            ResolverState::BranchFiltered => "branch filtered",
            ResolverState::CompletenessFiltered => "completeness filtered",
            ResolverState::BuildSelected => "build selected",
            ResolverState::VersionCompared => "version compared",
            ResolverState::ArtifactsClassified => "artifacts classified",
            ResolverState::Fetching => "fetching",
            ResolverState::Installing => "installing",
            ResolverState::Done => "done",
            ResolverState::Aborted => "aborted",
        }
    }
}

// How a run ended without a fatal error. All of these exit with status 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operator declined at the named checkpoint.
    Cancelled { checkpoint: &'static str },
    /// Every same-branch build is still being uploaded.
    ServerMidUpload,
    /// Local build equals the selected one and reinstall was declined.
    UpToDate { build: String },
    /// Local build is newer than anything on the server.
    LocalNewer { local: String, remote: String },
    /// Packages fetched but not installed (dry run).
    Downloaded { build: String },
    Installed { build: String },
}
