//! Append-only change log stored as JSONL under `.planwright/`.

use crate::config::PROJECT_DIR;
use anyhow::{Context, Result};
use async_trait::async_trait;
use planwright_core::{
    ChangeLog, ChangeLogEntry, CollabResult, CollaboratorError, WorkspaceFs,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CHANGES_FILE: &str = "changes.jsonl";

/// What [`JsonlChangeLog::revert_last_run`] undid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertSummary {
    pub run_id: String,
    pub restored: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

pub struct JsonlChangeLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlChangeLog {
    pub fn new(project_root: &Path) -> Self {
        Self::at(project_root.join(PROJECT_DIR).join(CHANGES_FILE))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable entry, oldest first. Malformed rows are skipped.
    pub async fn load_all(&self) -> Result<Vec<ChangeLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ChangeLogEntry>(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping malformed change-log row");
                    None
                }
            })
            .collect())
    }

    /// Undo every change of the most recent run, newest first, and drop its
    /// rows from the log. Returns `None` when the log is empty.
    pub async fn revert_last_run(&self, fs: &dyn WorkspaceFs) -> Result<Option<RevertSummary>> {
        let _guard = self.write_lock.lock().await;
        let entries = self.load_all().await?;
        let Some(run_id) = entries.last().map(|e| e.run_id.clone()) else {
            return Ok(None);
        };

        let (undo, keep): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.run_id == run_id);
        let mut summary = RevertSummary {
            run_id: run_id.clone(),
            ..RevertSummary::default()
        };

        for entry in undo.iter().rev() {
            match fs.read_to_string(&entry.path).await {
                Ok(current) if current != entry.after => {
                    warn!(path = %entry.path.display(), "file changed since the run; restoring anyway");
                }
                _ => {}
            }
            match &entry.before {
                Some(before) => {
                    fs.write(&entry.path, before)
                        .await
                        .with_context(|| format!("failed to restore {}", entry.path.display()))?;
                    push_unique(&mut summary.restored, &entry.path);
                }
                None => match fs.remove_file(&entry.path).await {
                    Ok(()) | Err(CollaboratorError::NotFound(_)) => {
                        push_unique(&mut summary.removed, &entry.path);
                    }
                    Err(err) => {
                        return Err(anyhow::anyhow!(
                            "failed to remove {}: {}",
                            entry.path.display(),
                            err
                        ))
                    }
                },
            }
        }
        // A created-then-modified file ends up removed, not restored.
        summary.restored.retain(|p| !summary.removed.contains(p));

        self.rewrite(&keep).await?;
        info!(run_id = %run_id, restored = summary.restored.len(), removed = summary.removed.len(), "reverted run");
        Ok(Some(summary))
    }

    async fn rewrite(&self, entries: &[ChangeLogEntry]) -> Result<()> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }

    async fn append_row(&self, entry: &ChangeLogEntry) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let row = serde_json::to_string(entry)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", row).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: &Path) {
    if !list.iter().any(|p| p == path) {
        list.push(path.to_path_buf());
    }
}

#[async_trait]
impl ChangeLog for JsonlChangeLog {
    async fn append(&self, entry: ChangeLogEntry) -> CollabResult<()> {
        let _guard = self.write_lock.lock().await;
        self.append_row(&entry)
            .await
            .map_err(|e| CollaboratorError::other(format!("change log: {:#}", e)))
    }

    async fn recent(&self, limit: usize) -> CollabResult<Vec<ChangeLogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut entries = self
            .load_all()
            .await
            .map_err(|e| CollaboratorError::other(format!("change log: {:#}", e)))?;
        if entries.len() > limit {
            let split = entries.len() - limit;
            entries.drain(0..split);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalWorkspace;
    use chrono::Utc;
    use planwright_core::ChangeType;

    fn entry(run: &str, path: &str, before: Option<&str>, after: &str) -> ChangeLogEntry {
        ChangeLogEntry {
            run_id: run.to_string(),
            path: PathBuf::from(path),
            change_type: if before.is_some() {
                ChangeType::Modified
            } else {
                ChangeType::Created
            },
            summary: format!("edit {}", path),
            diff: String::new(),
            before: before.map(str::to_string),
            after: after.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recent_returns_newest_last_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlChangeLog::new(dir.path());
        log.append(entry("r1", "a.ts", None, "a")).await.unwrap();
        log.append(entry("r1", "b.ts", None, "b")).await.unwrap();
        let mut raw = tokio::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .await
            .unwrap();
        raw.write_all(b"not json\n").await.unwrap();
        raw.flush().await.unwrap();
        drop(raw);
        log.append(entry("r2", "c.ts", None, "c")).await.unwrap();

        let recent = log.recent(2).await.unwrap();
        let paths: Vec<_> = recent.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("b.ts"), PathBuf::from("c.ts")]);
        assert!(log.path().starts_with(dir.path().join(".planwright")));
    }

    #[tokio::test]
    async fn revert_undoes_only_the_last_run() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let log = JsonlChangeLog::new(dir.path());

        ws.write(Path::new("keep.ts"), "v1").await.unwrap();
        log.append(entry("r1", "keep.ts", Some("v0"), "v1")).await.unwrap();

        ws.write(Path::new("keep.ts"), "v3").await.unwrap();
        log.append(entry("r2", "keep.ts", Some("v1"), "v2")).await.unwrap();
        log.append(entry("r2", "keep.ts", Some("v2"), "v3")).await.unwrap();
        ws.write(Path::new("new.ts"), "fresh").await.unwrap();
        log.append(entry("r2", "new.ts", None, "fresh")).await.unwrap();

        let summary = log.revert_last_run(&ws).await.unwrap().unwrap();
        assert_eq!(summary.run_id, "r2");
        assert_eq!(summary.restored, vec![PathBuf::from("keep.ts")]);
        assert_eq!(summary.removed, vec![PathBuf::from("new.ts")]);

        assert_eq!(ws.read_to_string(Path::new("keep.ts")).await.unwrap(), "v1");
        assert!(!dir.path().join("new.ts").exists());
        let remaining = log.load_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].run_id, "r1");
    }

    #[tokio::test]
    async fn revert_on_empty_log_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let log = JsonlChangeLog::new(dir.path());
        assert_eq!(log.revert_last_run(&ws).await.unwrap(), None);
    }
}
