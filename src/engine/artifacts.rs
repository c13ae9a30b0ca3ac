use log::{debug, info};

use crate::engine::models::{ArtifactPlan, ArtifactRole};
use crate::error::{Result, UpdateError};

/// Role of a single file name, if it matches any known pattern.
///
/// Matching is case-insensitive. Cumulative updates are only ever `.esd`
/// images; a plain KB cabinet that is neither a servicing stack nor a
/// framework update plays no role.
pub fn classify(name: &str) -> Option<ArtifactRole> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".msu") {
        return Some(ArtifactRole::StandaloneUpdate);
    }
    if lower.ends_with(".cab") && word_at(&lower, "ssu") {
        return Some(ArtifactRole::ServicingStack);
    }
    if lower.ends_with(".cab") && lower.contains("ndp") {
        return Some(ArtifactRole::FrameworkUpdate);
    }
    if lower.ends_with(".esd") && (word_at(&lower, "windows") || word_at(&lower, "kb"))
    {
        return Some(ArtifactRole::CumulativeUpdate);
    }
    None
}

/// First file in listing order that plays `role`.
pub fn first_of(files: &[String], role: ArtifactRole) -> Option<&str> {
    files
        .iter()
        .find(|name| classify(name) == Some(role))
        .map(String::as_str)
}

/// Build the installation plan for a folder listing.
///
/// A standalone package wins over the stack + cumulative pair. Without one,
/// both halves of the pair are required.
///
/// # Errors
/// Returns [`UpdateError::IncompleteArtifactSet`] when the pair is incomplete.
pub fn plan(files: &[String]) -> Result<ArtifactPlan> {
    for name in files {
        debug!("artifacts: {name} -> {:?}", classify(name));
    }
    let framework = first_of(files, ArtifactRole::FrameworkUpdate).map(str::to_owned);

    if let Some(update) = first_of(files, ArtifactRole::StandaloneUpdate) {
        info!("artifacts: standalone package {update} detected, installing it alone");
        return Ok(ArtifactPlan::Standalone {
            update: update.to_owned(),
            framework,
        });
    }

    let servicing_stack = first_of(files, ArtifactRole::ServicingStack);
    let cumulative = first_of(files, ArtifactRole::CumulativeUpdate);
    match (servicing_stack, cumulative) {
        (Some(stack), Some(cu)) => Ok(ArtifactPlan::Combined {
            servicing_stack: stack.to_owned(),
            cumulative: cu.to_owned(),
            framework,
        }),
        (None, None) => Err(UpdateError::IncompleteArtifactSet(
            "missing servicing stack and cumulative update".into(),
        )),
        (None, Some(_)) => Err(UpdateError::IncompleteArtifactSet(
            "missing servicing stack package".into(),
        )),
        (Some(_), None) => Err(UpdateError::IncompleteArtifactSet(
            "missing cumulative update package".into(),
        )),
    }
}

/// True when `word` starts at a word boundary somewhere in `haystack`.
fn word_at(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .is_none_or(|prev| !(prev.is_alphanumeric() || prev == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn classifies_known_patterns() {
        assert_eq!(
            classify("SSU-26100.1738-x64.cab"),
            Some(ArtifactRole::ServicingStack)
        );
        assert_eq!(
            classify("Windows11.0-KB5043080-x64.esd"),
            Some(ArtifactRole::CumulativeUpdate)
        );
        assert_eq!(
            classify("kb5043080-ARM64.ESD"),
            Some(ArtifactRole::CumulativeUpdate)
        );
        assert_eq!(
            classify("windows11.0-kb5043080-x64.msu"),
            Some(ArtifactRole::StandaloneUpdate)
        );
        assert_eq!(
            classify("Windows11.0-KB5054979-x64-NDP481.cab"),
            Some(ArtifactRole::FrameworkUpdate)
        );
        assert_eq!(classify("readme.txt"), None);
        assert_eq!(classify("x64_ssu.cab"), None);
    }

    #[test]
    fn builds_combined_plan() {
        let listing = files(&[
            "SSU-26100.1738-x64.cab",
            "Windows11.0-KB5043080-x64.esd",
            "Windows11.0-KB5054979-x64-NDP481.cab",
            "Windows11.0-KB5043080-x64.esd.md5",
        ]);
        assert_eq!(
            plan(&listing).unwrap(),
            ArtifactPlan::Combined {
                servicing_stack: "SSU-26100.1738-x64.cab".into(),
                cumulative: "Windows11.0-KB5043080-x64.esd".into(),
                framework: Some("Windows11.0-KB5054979-x64-NDP481.cab".into()),
            }
        );
    }

    #[test]
    fn standalone_skips_pair_requirement() {
        let listing = files(&["Windows11.0-KB5065426-x64.msu"]);
        assert_eq!(
            plan(&listing).unwrap(),
            ArtifactPlan::Standalone {
                update: "Windows11.0-KB5065426-x64.msu".into(),
                framework: None,
            }
        );
    }

    #[test]
    fn standalone_wins_over_pair() {
        let listing = files(&[
            "SSU-26100.1738-x64.cab",
            "Windows11.0-KB5043080-x64.esd",
            "Windows11.0-KB5065426-x64.msu",
        ]);
        assert!(matches!(
            plan(&listing).unwrap(),
            ArtifactPlan::Standalone { .. }
        ));
    }

    #[test]
    fn missing_half_of_pair_is_fatal() {
        let only_stack = files(&["SSU-26100.1738-x64.cab"]);
        assert!(matches!(
            plan(&only_stack),
            Err(UpdateError::IncompleteArtifactSet(_))
        ));
        let only_cu = files(&["Windows11.0-KB5043080-x64.esd"]);
        assert!(matches!(
            plan(&only_cu),
            Err(UpdateError::IncompleteArtifactSet(_))
        ));
        assert!(plan(&[]).is_err());
    }

    #[test]
    fn kb_cabinet_is_not_a_cumulative_update() {
        assert_eq!(classify("Windows11.0-KB5043080-x64.cab"), None);
        let listing = files(&["SSU-26100.1738-x64.cab", "Windows11.0-KB5043080-x64.cab"]);
        assert!(matches!(
            plan(&listing),
            Err(UpdateError::IncompleteArtifactSet(msg)) if msg.contains("cumulative")
        ));
    }

    #[test]
    fn first_match_wins() {
        let listing = files(&[
            "SSU-26100.1738-x64.cab",
            "Windows11.0-KB5043080-x64.esd",
            "Windows11.0-KB5044284-x64.esd",
        ]);
        assert_eq!(
            first_of(&listing, ArtifactRole::CumulativeUpdate),
            Some("Windows11.0-KB5043080-x64.esd")
        );
    }
}
