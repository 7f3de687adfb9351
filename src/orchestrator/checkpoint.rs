//! Durable run progress.
//!
//! The checkpoint is a pretty-printed JSON document rewritten after every
//! target transition. A target id is never in both `completed_targets` and
//! `failed_targets`, and `in_progress` is cleared in the same save that
//! moves a target into either set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-target counters folded into the cumulative totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounters {
    pub scraped: u64,
    pub created: u64,
    pub updated: u64,
    pub delisted: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointState {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_targets: Vec<String>,
    pub failed_targets: Vec<String>,
    pub in_progress: Option<String>,
    pub total_scraped: u64,
    pub total_created: u64,
    pub total_updated: u64,
    pub total_delisted: u64,
    pub total_errors: u64,
    pub config: Value,
}

impl Default for CheckpointState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            completed_targets: Vec::new(),
            failed_targets: Vec::new(),
            in_progress: None,
            total_scraped: 0,
            total_created: 0,
            total_updated: 0,
            total_delisted: 0,
            total_errors: 0,
            config: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointSummary {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub in_progress: Option<String>,
    pub total_scraped: u64,
    pub total_created: u64,
    pub total_updated: u64,
    pub total_delisted: u64,
    pub total_errors: u64,
}

/// Serialises every checkpoint mutation behind one lock.
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    state: Mutex<CheckpointState>,
}

impl CheckpointManager {
    /// Open the checkpoint at `path`. A missing or unreadable file yields a
    /// fresh state; nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::read_state(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn read_state(path: &Path) -> Option<CheckpointState> {
        if !path.exists() {
            return None;
        }
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!("cannot read checkpoint {}: {err}; starting fresh", path.display());
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("corrupt checkpoint {}: {err}; starting fresh", path.display());
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CheckpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Write `state` to a sibling temp file, then rename it into place.
    fn persist(&self, state: &mut CheckpointState) -> CheckpointResult<()> {
        state.updated_at = Utc::now();
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.io_err(err))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|err| self.io_err(err))?;
        fs::rename(&tmp, &self.path).map_err(|err| self.io_err(err))?;
        Ok(())
    }

    /// Apply `mutate` and persist before the lock is released.
    fn mutate<F>(&self, mutate: F) -> CheckpointResult<()>
    where
        F: FnOnce(&mut CheckpointState),
    {
        let mut state = self.lock();
        mutate(&mut state);
        self.persist(&mut state)
    }

    /// Discard previous progress and record the configuration of a new run.
    pub fn start_new_run(&self, config: Value) -> CheckpointResult<()> {
        self.mutate(|state| {
            *state = CheckpointState {
                config,
                ..CheckpointState::default()
            };
        })
    }

    pub fn completed(&self) -> HashSet<String> {
        self.lock().completed_targets.iter().cloned().collect()
    }

    pub fn failed(&self) -> HashSet<String> {
        self.lock().failed_targets.iter().cloned().collect()
    }

    pub fn in_progress(&self) -> Option<String> {
        self.lock().in_progress.clone()
    }

    pub fn state(&self) -> CheckpointState {
        self.lock().clone()
    }

    pub fn mark_started(&self, target_id: &str) -> CheckpointResult<()> {
        self.mutate(|state| state.in_progress = Some(target_id.to_string()))
    }

    pub fn mark_completed(&self, target_id: &str, counters: &TargetCounters) -> CheckpointResult<()> {
        self.mutate(|state| {
            state.in_progress = None;
            state.failed_targets.retain(|id| id != target_id);
            if !state.completed_targets.iter().any(|id| id == target_id) {
                state.completed_targets.push(target_id.to_string());
            }
            state.total_scraped += counters.scraped;
            state.total_created += counters.created;
            state.total_updated += counters.updated;
            state.total_delisted += counters.delisted;
            state.total_errors += counters.errors;
        })
    }

    pub fn mark_failed(&self, target_id: &str, error: &str) -> CheckpointResult<()> {
        log::warn!("target {target_id} failed: {error}");
        self.mutate(|state| {
            state.in_progress = None;
            state.completed_targets.retain(|id| id != target_id);
            if !state.failed_targets.iter().any(|id| id == target_id) {
                state.failed_targets.push(target_id.to_string());
            }
        })
    }

    /// Move a target left `in_progress` by an interrupted run into
    /// `failed_targets`. Returns the recovered id, if any.
    pub fn recover_interrupted(&self) -> CheckpointResult<Option<String>> {
        let mut state = self.lock();
        let Some(target_id) = state.in_progress.take() else {
            return Ok(None);
        };
        state.completed_targets.retain(|id| id != &target_id);
        if !state.failed_targets.contains(&target_id) {
            state.failed_targets.push(target_id.clone());
        }
        self.persist(&mut state)?;
        log::warn!("target {target_id} was interrupted by a previous run; marked as failed");
        Ok(Some(target_id))
    }

    pub fn summary(&self) -> CheckpointSummary {
        let state = self.lock();
        CheckpointSummary {
            started_at: state.started_at,
            updated_at: state.updated_at,
            completed_count: state.completed_targets.len(),
            failed_count: state.failed_targets.len(),
            in_progress: state.in_progress.clone(),
            total_scraped: state.total_scraped,
            total_created: state.total_created,
            total_updated: state.total_updated,
            total_delisted: state.total_delisted,
            total_errors: state.total_errors,
        }
    }

    /// Delete the file and reset to a fresh state.
    pub fn clear(&self) -> CheckpointResult<()> {
        let mut state = self.lock();
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|err| self.io_err(err))?;
        }
        *state = CheckpointState::default();
        log::info!("checkpoint {} cleared", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counters(scraped: u64) -> TargetCounters {
        TargetCounters {
            scraped,
            created: scraped,
            ..Default::default()
        }
    }

    #[test]
    fn transitions_persist_and_keep_sets_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints").join("run.json");
        let manager = CheckpointManager::open(&path);
        manager.start_new_run(json!({"workers": 2})).unwrap();

        manager.mark_started("T1").unwrap();
        assert_eq!(CheckpointManager::open(&path).in_progress().as_deref(), Some("T1"));

        manager.mark_failed("T1", "challenge timeout").unwrap();
        manager.mark_started("T1").unwrap();
        manager.mark_completed("T1", &counters(12)).unwrap();
        manager.mark_started("T2").unwrap();
        manager.mark_failed("T2", "exhausted").unwrap();

        let reopened = CheckpointManager::open(&path);
        let state = reopened.state();
        assert_eq!(state.completed_targets, vec!["T1".to_string()]);
        assert_eq!(state.failed_targets, vec!["T2".to_string()]);
        assert_eq!(state.in_progress, None);
        assert_eq!(state.total_scraped, 12);
        assert_eq!(state.config["workers"], 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_attempts_do_not_touch_totals() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::open(dir.path().join("cp.json"));
        manager.mark_completed("T1", &counters(5)).unwrap();
        manager.mark_failed("T2", "boom").unwrap();
        let summary = manager.summary();
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_scraped, 5);
    }

    #[test]
    fn interrupted_target_is_recovered_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let manager = CheckpointManager::open(&path);
        manager.mark_completed("T1", &counters(3)).unwrap();
        manager.mark_started("T2").unwrap();
        drop(manager);

        let reopened = CheckpointManager::open(&path);
        assert_eq!(reopened.recover_interrupted().unwrap().as_deref(), Some("T2"));
        assert_eq!(reopened.recover_interrupted().unwrap(), None);

        let state = CheckpointManager::open(&path).state();
        assert_eq!(state.in_progress, None);
        assert_eq!(state.failed_targets, vec!["T2".to_string()]);
        assert_eq!(state.completed_targets, vec!["T1".to_string()]);
    }

    #[test]
    fn corrupt_file_starts_fresh_and_clear_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        fs::write(&path, "{not json").unwrap();
        let manager = CheckpointManager::open(&path);
        assert!(manager.completed().is_empty());

        manager.mark_completed("T9", &counters(1)).unwrap();
        assert!(path.exists());
        manager.clear().unwrap();
        assert!(!path.exists());
        assert!(manager.completed().is_empty());
    }
}
