use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio::fs;

/// Owns the download directory of a run.
#[derive(Clone)]
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Remove downloaded files and folders, keeping entries named in `keep`.
    ///
    /// Individual failures are logged and skipped. Returns what was removed.
    pub async fn remove_downloads(&self, keep: &[&str]) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut removed = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if keep.iter().any(|k| k.eq_ignore_ascii_case(&name)) {
                continue;
            }
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let result = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    if is_dir {
                        info!("Removed folder: {}", path.display());
                    } else {
                        info!("Removed file: {}", path.display());
                    }
                    removed.push(path);
                }
                Err(err) => warn!("Failed to remove {}: {err}", path.display()),
            }
        }
        info!("Downloaded files removed.");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_log_file_and_removes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("triquetra.log"), "log").unwrap();
        std::fs::write(dir.path().join("kb.esd"), "payload").unwrap();
        std::fs::create_dir(dir.path().join("partial")).unwrap();
        std::fs::write(dir.path().join("partial").join("x"), "x").unwrap();

        let storage = StorageManager::new(dir.path());
        let removed = storage.remove_downloads(&["TRIQUETRA.LOG"]).await.unwrap();

        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("triquetra.log").exists());
        assert!(!dir.path().join("kb.esd").exists());
        assert!(!dir.path().join("partial").exists());
    }
}
