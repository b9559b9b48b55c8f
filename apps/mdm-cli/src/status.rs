use anyhow::{Context, Result};
use mdm_core::StatusSnapshot;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// JSON status export, replaced atomically on every store.
#[derive(Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, snapshot: &StatusSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context(format!("create {}", dir.display()))?;
        }
        let data = serde_json::to_vec_pretty(snapshot).context("encode status snapshot")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &data).context(format!("write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).context(format!("commit {}", self.path.display()))
    }

    /// Removes the export and any half-written temp file left by an
    /// interrupted store.
    pub fn clear(&self) -> Result<()> {
        for path in [self.path.with_extension("tmp"), self.path.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = ?path, "status file removed"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).context(format!("remove status file {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdm_core::LifecycleState;
    use serde_json::Value;
    use tempfile::tempdir;

    fn snapshot(ready: bool) -> StatusSnapshot {
        StatusSnapshot {
            subsystem: "external_modem".to_string(),
            state: if ready {
                LifecycleState::Ready
            } else {
                LifecycleState::AwaitingBoot
            },
            ready,
            debug: false,
            boot_status: "ok".to_string(),
            dump_status: "ok".to_string(),
            errmsg: None,
            restarts: 0,
        }
    }

    #[test]
    fn store_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run").join("mdm.json");
        let status = StatusFile::new(path.clone());

        status.store(&snapshot(false)).unwrap();
        status.store(&snapshot(true)).unwrap();

        let value: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["ready"], Value::Bool(true));
        assert_eq!(value["state"], "ready");
        assert_eq!(value["errmsg"], Value::Null);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn clear_removes_export_and_stale_temp_file() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("mdm.json"));
        status.clear().unwrap();

        status.store(&snapshot(true)).unwrap();
        let tmp = status.path().with_extension("tmp");
        fs::write(&tmp, b"{").unwrap();
        status.clear().unwrap();
        assert!(!status.path().exists());
        assert!(!tmp.exists());
    }
}
