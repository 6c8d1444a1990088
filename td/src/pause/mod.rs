//! Rate-limit pause/resume state machine (C8, spec.md §4.8).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::invoker::{LimitKind, RateLimitInfo};

#[derive(Debug, Error)]
pub enum PauseError {
    #[error("pause state io error: {0}")]
    Io(String),

    #[error("pause state serialization error: {0}")]
    Serialization(String),

    #[error("no pause state for session {0}")]
    NotFound(String),
}

/// Rate-limit descriptor persisted alongside a PauseState (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDescriptor {
    pub label: String,
    pub raw_message: String,
}

impl From<&RateLimitInfo> for RateLimitDescriptor {
    fn from(info: &RateLimitInfo) -> Self {
        let label = match info.kind {
            LimitKind::RequestsPerMinute => "requests_per_minute",
            LimitKind::DailyQuota => "daily_quota",
            LimitKind::TokenBudget => "token_budget",
        };
        Self {
            label: label.to_string(),
            raw_message: info.raw_message.clone(),
        }
    }
}

/// Persisted checkpoint created the moment a rate-limit is detected during a
/// task (spec.md §3, §6 "PauseState file layout"). Tolerant of unknown
/// fields for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseState {
    pub session_id: String,
    pub plan_file: String,
    pub paused_at: DateTime<Utc>,
    pub resume_at: DateTime<Utc>,
    pub rate_limit_info: RateLimitDescriptor,
    pub pending_task_numbers: Vec<String>,
    pub completed_task_numbers: Vec<String>,
}

impl Default for PauseState {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            plan_file: String::new(),
            paused_at: Utc::now(),
            resume_at: Utc::now(),
            rate_limit_info: RateLimitDescriptor {
                label: String::new(),
                raw_message: String::new(),
            },
            pending_task_numbers: vec![],
            completed_task_numbers: vec![],
        }
    }
}

impl PauseState {
    pub fn new(
        plan_file: String,
        rate_limit_info: &RateLimitInfo,
        pending_task_numbers: Vec<String>,
        completed_task_numbers: Vec<String>,
    ) -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            plan_file,
            paused_at: Utc::now(),
            resume_at: rate_limit_info.resume_at,
            rate_limit_info: rate_limit_info.into(),
            pending_task_numbers,
            completed_task_numbers,
        }
    }

    pub fn is_ready(&self, now: SystemTime) -> bool {
        self.resume_at <= DateTime::<Utc>::from(now)
    }
}

/// Directory-backed store of PauseState files, one per session id
/// (spec.md §4.8 Query API).
pub struct PauseStore {
    dir: PathBuf,
}

impl PauseStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.yml"))
    }

    /// Writes atomically via a temp-file-then-rename sequence so a reader
    /// never observes a partially written state file.
    pub fn save(&self, state: &PauseState) -> Result<(), PauseError> {
        fs::create_dir_all(&self.dir).map_err(|e| PauseError::Io(e.to_string()))?;
        let yaml = serde_yaml::to_string(state).map_err(|e| PauseError::Serialization(e.to_string()))?;

        let final_path = self.path_for(&state.session_id);
        let tmp_path = self.dir.join(format!("{}.tmp", state.session_id));
        fs::write(&tmp_path, yaml).map_err(|e| PauseError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| PauseError::Io(e.to_string()))?;

        debug!(session_id = %state.session_id, "PauseStore::save: checkpoint written");
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<PauseState, PauseError> {
        let path = self.path_for(session_id);
        let content = fs::read_to_string(&path).map_err(|_| PauseError::NotFound(session_id.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| PauseError::Serialization(e.to_string()))
    }

    pub fn delete(&self, session_id: &str) -> Result<(), PauseError> {
        let path = self.path_for(session_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| PauseError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<PauseState>, PauseError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| PauseError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| PauseError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_yaml::from_str::<PauseState>(&content) {
                    Ok(state) => states.push(state),
                    Err(e) => warn!(?path, error = %e, "pause::PauseStore::all: skipping unparseable state file"),
                },
                Err(e) => warn!(?path, error = %e, "pause::PauseStore::all: failed to read state file"),
            }
        }
        Ok(states)
    }

    /// All checkpoints whose `resume_at` is still in the future.
    pub fn list_paused(&self) -> Result<Vec<PauseState>, PauseError> {
        let now = SystemTime::now();
        Ok(self.all()?.into_iter().filter(|s| !s.is_ready(now)).collect())
    }

    /// All checkpoints whose `resume_at` has passed.
    pub fn list_ready(&self) -> Result<Vec<PauseState>, PauseError> {
        let now = SystemTime::now();
        Ok(self.all()?.into_iter().filter(|s| s.is_ready(now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn rate_limit_info(delta: ChronoDuration) -> RateLimitInfo {
        RateLimitInfo {
            kind: LimitKind::DailyQuota,
            resume_at: Utc::now() + delta,
            raw_message: "daily quota exceeded".into(),
        }
    }

    #[test]
    fn round_trip_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = PauseStore::new(dir.path());
        let info = rate_limit_info(ChronoDuration::hours(1));
        let state = PauseState::new(
            "plan.yml".into(),
            &info,
            vec!["T2".into(), "T3".into()],
            vec!["T1".into()],
        );
        store.save(&state).unwrap();

        let loaded = store.load(&state.session_id).unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.pending_task_numbers, vec!["T2", "T3"]);
        assert_eq!(loaded.completed_task_numbers, vec!["T1"]);
    }

    #[test]
    fn list_paused_and_ready_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = PauseStore::new(dir.path());

        let future = PauseState::new("plan.yml".into(), &rate_limit_info(ChronoDuration::hours(2)), vec!["T1".into()], vec![]);
        let past = PauseState::new("plan.yml".into(), &rate_limit_info(ChronoDuration::seconds(-10)), vec!["T2".into()], vec![]);
        store.save(&future).unwrap();
        store.save(&past).unwrap();

        let paused = store.list_paused().unwrap();
        let ready = store.list_ready().unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(ready.len(), 1);
        assert_eq!(paused[0].session_id, future.session_id);
        assert_eq!(ready[0].session_id, past.session_id);
    }

    #[test]
    fn delete_removes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PauseStore::new(dir.path());
        let state = PauseState::new("plan.yml".into(), &rate_limit_info(ChronoDuration::hours(1)), vec![], vec![]);
        store.save(&state).unwrap();
        store.delete(&state.session_id).unwrap();
        assert!(matches!(store.load(&state.session_id), Err(PauseError::NotFound(_))));
    }

    #[test]
    fn load_missing_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = PauseStore::new(dir.path());
        assert!(matches!(store.load("nonexistent"), Err(PauseError::NotFound(_))));
    }
}
