use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::error::Result;

/// Pause after the servicing stack so the component store settles.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// External tool that applies update packages to the running system.
pub trait PackageInstaller: Send + Sync {
    /// Apply one package and return the installer's exit code.
    fn install(&self, package: &Path) -> Result<i32>;

    /// Called between the servicing stack and the cumulative update.
    fn settle(&self) {}

    fn schedule_reboot(&self) -> Result<()>;
}

/// Applies packages with `Add-WindowsPackage` in a hidden PowerShell.
#[derive(Clone, Default)]
pub struct PowerShellInstaller;

impl PowerShellInstaller {
    pub fn new() -> Self {
        Self
    }
}

impl PackageInstaller for PowerShellInstaller {
    fn install(&self, package: &Path) -> Result<i32> {
        let name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| package.display().to_string());
        let script = format!(
            "& {{Add-WindowsPackage -Online -PackagePath '{}' -NoRestart}}",
            package.display().to_string().replace('\'', "''")
        );

        let mut cmd = Command::new("powershell");
        cmd.args([
            "-NoProfile",
            "-NonInteractive",
            "-WindowStyle",
            "Hidden",
            "-Command",
            script.as_str(),
        ]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x08000000);
        }

        info!("Installing {name}...");
        let child = cmd.spawn()?;
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("Installing {msg} {spinner}") {
            spinner.set_style(style.tick_chars("|/-\\ "));
        }
        spinner.set_message(name.clone());
        spinner.enable_steady_tick(Duration::from_millis(100));
        let waited = child.wait_with_output();
        spinner.finish_and_clear();

        let output = waited?;
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("install: {name} exited with {code}: {}", stderr.trim());
        } else {
            debug!(
                "install: {name} output: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        info!("Finished installing {name}");
        Ok(code)
    }

    fn settle(&self) {
        thread::sleep(SETTLE_DELAY);
        let status = Command::new("dism")
            .args(["/Online", "/Get-Packages"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = status {
            warn!("install: dism package refresh failed: {err}");
        }
    }

    fn schedule_reboot(&self) -> Result<()> {
        info!("Rebooting...");
        Command::new("shutdown").args(["/r", "/t", "5"]).status()?;
        Ok(())
    }
}

#[cfg(test)]
pub mod recording {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    use super::PackageInstaller;
    use crate::error::Result;

    /// Records installed packages and the threads the calls ran on; exit
    /// codes are looked up by file name.
    #[derive(Default)]
    pub struct RecordingInstaller {
        pub installed: Mutex<Vec<PathBuf>>,
        pub codes: HashMap<String, i32>,
        pub reboots: Mutex<u32>,
        pub settles: Mutex<u32>,
        pub threads: Mutex<Vec<ThreadId>>,
    }

    impl RecordingInstaller {
        pub fn failing(name: &str, code: i32) -> Self {
            Self {
                codes: HashMap::from([(name.to_owned(), code)]),
                ..Default::default()
            }
        }

        pub fn names(&self) -> Vec<String> {
            self.installed
                .lock()
                .unwrap()
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect()
        }
    }

    impl PackageInstaller for RecordingInstaller {
        fn install(&self, package: &Path) -> Result<i32> {
            self.threads.lock().unwrap().push(thread::current().id());
            self.installed.lock().unwrap().push(package.to_path_buf());
            let name = package
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(self.codes.get(&name).copied().unwrap_or(0))
        }

        fn settle(&self) {
            self.threads.lock().unwrap().push(thread::current().id());
            *self.settles.lock().unwrap() += 1;
        }

        fn schedule_reboot(&self) -> Result<()> {
            *self.reboots.lock().unwrap() += 1;
            Ok(())
        }
    }
}
