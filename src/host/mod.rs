use std::fmt;
use std::process::Command;

use log::{debug, warn};

const CURRENT_VERSION_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Arch {
    #[default]
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x64" | "x86_64" => Some(Arch::Amd64),
            "arm64" | "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the machine being updated.
pub trait HostInfo: Send + Sync {
    /// Installed build as `major.minor`, if it can be determined.
    fn local_version(&self) -> Option<String>;
    /// Marketing channel such as `24H2`.
    fn display_channel(&self) -> Option<String>;
    /// Falls back to amd64 when unknown.
    fn architecture(&self) -> Arch;
}

/// Host facts supplied up front, from the command line or a test.
#[derive(Clone, Debug, Default)]
pub struct StaticHostInfo {
    pub version: Option<String>,
    pub display_channel: Option<String>,
    pub arch: Option<Arch>,
}

impl HostInfo for StaticHostInfo {
    fn local_version(&self) -> Option<String> {
        self.version.clone()
    }

    fn display_channel(&self) -> Option<String> {
        self.display_channel.clone()
    }

    fn architecture(&self) -> Arch {
        self.arch.unwrap_or_default()
    }
}

/// Reads the `CurrentVersion` registry key through `reg query`.
/// Values given in `overrides` take precedence.
#[derive(Clone, Debug, Default)]
pub struct RegistryHostInfo {
    pub overrides: StaticHostInfo,
}

impl RegistryHostInfo {
    pub fn new(overrides: StaticHostInfo) -> Self {
        Self { overrides }
    }

    fn query(&self, value: &str) -> Option<String> {
        let output = Command::new("reg")
            .arg("query")
            .arg(CURRENT_VERSION_KEY)
            .arg("/v")
            .arg(value)
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                let parsed = parse_reg_value(&text, value);
                debug!("host: {value} = {parsed:?}");
                parsed
            }
            Ok(out) => {
                warn!("host: reg query {value} exited with {}", out.status);
                None
            }
            Err(err) => {
                warn!("host: failed to read {value} from registry: {err}");
                None
            }
        }
    }
}

impl HostInfo for RegistryHostInfo {
    fn local_version(&self) -> Option<String> {
        if let Some(version) = self.overrides.local_version() {
            return Some(version);
        }
        let build_lab = self.query("BuildLab")?;
        let ubr = self.query("UBR")?;
        let version = compose_version(&build_lab, &ubr);
        if version.is_none() {
            warn!("host: unexpected BuildLab format: {build_lab}");
        }
        version
    }

    fn display_channel(&self) -> Option<String> {
        self.overrides
            .display_channel()
            .or_else(|| self.query("DisplayVersion"))
    }

    fn architecture(&self) -> Arch {
        if let Some(arch) = self.overrides.arch {
            return arch;
        }
        match self.query("BuildLabEx") {
            Some(lab) if lab.to_ascii_lowercase().contains("arm64") => Arch::Arm64,
            Some(_) => Arch::Amd64,
            None => {
                warn!("host: architecture unknown, assuming amd64");
                Arch::Amd64
            }
        }
    }
}

/// Data column of a `reg query` line for `value`. `REG_DWORD` values are
/// converted from hex to decimal.
fn parse_reg_value(output: &str, value: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if !parts.next()?.eq_ignore_ascii_case(value) {
            return None;
        }
        let kind = parts.next()?;
        let data = parts.collect::<Vec<_>>().join(" ");
        if kind.eq_ignore_ascii_case("REG_DWORD") {
            let hex = data.trim_start_matches("0x");
            return u64::from_str_radix(hex, 16).ok().map(|n| n.to_string());
        }
        Some(data)
    })
}

/// `26100.1.amd64fre...` + UBR `6130` -> `26100.6130`.
fn compose_version(build_lab: &str, ubr: &str) -> Option<String> {
    let (major, _) = build_lab.split_once('.')?;
    if major.is_empty() || !major.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{major}.{}", ubr.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REG_OUTPUT: &str = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\r\n    UBR    REG_DWORD    0x17f2\r\n\r\n";

    #[test]
    fn parses_dword_values() {
        assert_eq!(parse_reg_value(REG_OUTPUT, "UBR").as_deref(), Some("6130"));
        assert_eq!(parse_reg_value(REG_OUTPUT, "BuildLab"), None);
    }

    #[test]
    fn parses_string_values() {
        let out = "    BuildLabEx    REG_SZ    26100.1.arm64fre.ge_release.240331-1435\r\n";
        assert_eq!(
            parse_reg_value(out, "BuildLabEx").as_deref(),
            Some("26100.1.arm64fre.ge_release.240331-1435")
        );
    }

    #[test]
    fn composes_version_from_build_lab() {
        assert_eq!(
            compose_version("26100.ge_release.240331-1435", "6130").as_deref(),
            Some("26100.6130")
        );
        assert_eq!(compose_version("garbage", "1"), None);
    }

    #[test]
    fn arch_parsing_and_default() {
        assert_eq!(Arch::parse("ARM64"), Some(Arch::Arm64));
        assert_eq!(Arch::parse("x64"), Some(Arch::Amd64));
        assert_eq!(Arch::parse("mips"), None);
        assert_eq!(StaticHostInfo::default().architecture(), Arch::Amd64);
    }

    #[test]
    fn overrides_take_precedence() {
        let host = RegistryHostInfo::new(StaticHostInfo {
            version: Some("26100.1500".into()),
            display_channel: Some("24H2".into()),
            arch: Some(Arch::Arm64),
        });
        assert_eq!(host.local_version().as_deref(), Some("26100.1500"));
        assert_eq!(host.display_channel().as_deref(), Some("24H2"));
        assert_eq!(host.architecture(), Arch::Arm64);
    }
}
