use log::{info, warn};

use crate::config::EnablementRule;
use crate::engine::UpdateResolver;
use crate::error::{Result, UpdateError};
use crate::version::Version;

#[derive(Debug, PartialEq, Eq)]
pub enum EnablementDecision<'r> {
    Offer(&'r EnablementRule),
    Skip(String),
}

/// Whether the host qualifies for the branch's enablement package.
///
/// It must report the rule's source channel and be at least on its minimum
/// revision.
pub fn decide<'r>(
    rule: Option<&'r EnablementRule>,
    channel: Option<&str>,
    local: &Version,
) -> EnablementDecision<'r> {
    let Some(rule) = rule else {
        return EnablementDecision::Skip(format!(
            "no enablement package for branch {}",
            local.major()
        ));
    };
    let Some(channel) = channel else {
        return EnablementDecision::Skip("unknown display version".into());
    };
    let minor = local.minor();

    if channel.eq_ignore_ascii_case(&rule.from_channel)
        && minor.is_some_and(|m| m >= rule.min_build)
    {
        return EnablementDecision::Offer(rule);
    }
    if channel.eq_ignore_ascii_case(&rule.release) {
        return EnablementDecision::Skip(format!("already being on {channel}"));
    }
    if minor.is_some_and(|m| m < rule.min_build) {
        return EnablementDecision::Skip(format!(
            "currently installed build below {}.{}",
            rule.branch, rule.min_build
        ));
    }
    EnablementDecision::Skip("unknown reason".into())
}

impl UpdateResolver {
    /// Offer the enablement package when the host qualifies.
    ///
    /// Install failures are only logged; a failed download is returned.
    pub(super) async fn offer_enablement(&self, local: &Version) -> Result<()> {
        let channel = self.host.display_channel();
        let rule = self.ctx.rules.enablement_for(local.major());
        let rule = match decide(rule, channel.as_deref(), local) {
            EnablementDecision::Offer(rule) => rule,
            EnablementDecision::Skip(reason) => {
                info!("Not offering Enablement Package due to {reason}");
                return Ok(());
            }
        };

        let question = format!("Do you want to install the {} Enablement Package?", rule.release);
        if !self.prompt.confirm(&question) {
            info!("{} Enablement Package declined.", rule.release);
            return Ok(());
        }

        let arch = self.host.architecture();
        let url = rule.url_for(arch).ok_or_else(|| {
            UpdateError::Config(format!(
                "no {} enablement package configured for {arch}",
                rule.release
            ))
        })?;
        let record = self
            .fetcher
            .download(url, &self.ctx.data_dir, self.prompt.as_ref())
            .await?;

        if self.ctx.dry_run {
            info!(
                "Dry run: {} Enablement Package downloaded, not installed.",
                rule.release
            );
            return Ok(());
        }
        let path = record.path;
        match self.blocking(move |installer| installer.install(&path)).await? {
            Ok(0) => info!("{} Enablement Package installed.", rule.release),
            Ok(code) => warn!(
                "{} Enablement Package installation failed with code {code}",
                rule.release
            ),
            Err(err) => warn!("{} Enablement Package installation failed: {err}", rule.release),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::version::parse_short;

    fn rule() -> EnablementRule {
        EnablementRule {
            branch: 22621,
            release: "23H2".into(),
            from_channel: "22H2".into(),
            min_build: 2506,
            urls: HashMap::new(),
        }
    }

    fn local(raw: &str) -> Version {
        parse_short(raw).unwrap().1
    }

    #[test]
    fn offers_on_source_channel_at_minimum() {
        let rule = rule();
        assert_eq!(
            decide(Some(&rule), Some("22H2"), &local("22621.2506")),
            EnablementDecision::Offer(&rule)
        );
    }

    #[test]
    fn skip_reasons() {
        let rule = rule();
        assert_eq!(
            decide(Some(&rule), Some("23H2"), &local("22621.3000")),
            EnablementDecision::Skip("already being on 23H2".into())
        );
        assert_eq!(
            decide(Some(&rule), Some("22H2"), &local("22621.2500")),
            EnablementDecision::Skip("currently installed build below 22621.2506".into())
        );
        assert_eq!(
            decide(Some(&rule), Some("21H2"), &local("22621.3000")),
            EnablementDecision::Skip("unknown reason".into())
        );
        assert!(matches!(
            decide(None, Some("22H2"), &local("22000.100")),
            EnablementDecision::Skip(_)
        ));
        assert!(matches!(
            decide(Some(&rule), None, &local("22621.3000")),
            EnablementDecision::Skip(_)
        ));
    }
}
