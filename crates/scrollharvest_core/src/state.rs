use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedupe::DedupeMode;
use crate::error::HarvestError;

pub const CHECKPOINT_VERSION: u32 = 1;
pub const DEFAULT_CHECKPOINT_INTERVAL: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Interrupted,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Forward transitions only. `Interrupted -> Running` is the resume edge and
    /// goes through `CollectionState::reopen` instead.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Interrupted)
        )
    }

    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Interrupted | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub container_selector: String,
    pub line_selector: String,
    #[serde(default)]
    pub text_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_selector: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub loop_count: u64,
    #[serde(alias = "scroll_top")]
    pub scroll_position: i64,
    pub total_lines_seen: u64,
    pub unique_lines_seen: u64,
    pub idle_scroll_count: u32,
    pub last_new_line_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Files {
    pub raw_output: PathBuf,
    pub final_output: PathBuf,
    pub log_file: PathBuf,
}

/// Effective configuration captured when the run started. Resumes reuse it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub max_idle_scrolls: u32,
    pub scroll_step: i64,
    pub scroll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_wait_ms: u64,
    pub dedupe_mode: DedupeMode,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

fn default_checkpoint_interval() -> u32 {
    DEFAULT_CHECKPOINT_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub code: String,
    pub message: String,
    #[serde(rename = "at")]
    pub occurred_at: DateTime<Utc>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub version: u32,
    pub run_id: String,
    pub status: RunStatus,
    pub target: Target,
    pub progress: Progress,
    pub files: Files,
    pub runtime: RuntimeSnapshot,
    pub timestamps: Timestamps,
    pub last_error: Option<LastError>,
}

impl CollectionState {
    pub fn new(run_id: String, target: Target, files: Files, runtime: RuntimeSnapshot) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            run_id,
            status: RunStatus::Running,
            target,
            progress: Progress::default(),
            files,
            runtime,
            timestamps: Timestamps {
                started_at: now,
                updated_at: now,
            },
            last_error: None,
        }
    }

    pub fn touch(&mut self) {
        self.timestamps.updated_at = Utc::now();
    }

    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), HarvestError> {
        if !self.status.can_transition_to(next) {
            return Err(HarvestError::Unexpected(format!(
                "illegal status transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Re-enters `running` for a resumed process. A checkpoint still marked
    /// `running` belongs to a process that died before its terminal write.
    pub fn reopen(&mut self) -> Result<(), HarvestError> {
        if !self.status.is_resumable() {
            return Err(HarvestError::Configuration(format!(
                "run {} is {} and cannot be resumed",
                self.run_id,
                self.status.as_str()
            )));
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Counts a record that has already been flushed to the raw output.
    pub fn record_appended(&mut self) {
        self.progress.total_lines_seen += 1;
        self.progress.unique_lines_seen += 1;
        self.progress.idle_scroll_count = 0;
        self.progress.last_new_line_at = Some(Utc::now());
    }

    pub fn record_idle_cycle(&mut self) {
        self.progress.idle_scroll_count += 1;
    }

    /// Moves the run into the terminal status dictated by `error` and records it.
    pub fn fail_with(&mut self, error: &HarvestError) {
        let now = Utc::now();
        if self.status == RunStatus::Running {
            self.status = error.terminal_status();
        }
        self.last_error = Some(LastError {
            code: error.code().to_string(),
            message: error.to_string(),
            occurred_at: now,
            retry_count: error.retry_count(),
        });
        self.timestamps.updated_at = now;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.run_id.trim().is_empty() {
            return Err("run_id is empty".to_string());
        }
        if self.target.container_selector.trim().is_empty() {
            return Err("target.container_selector is empty".to_string());
        }
        if self.target.line_selector.trim().is_empty() {
            return Err("target.line_selector is empty".to_string());
        }
        if self.progress.unique_lines_seen > self.progress.total_lines_seen {
            return Err(format!(
                "progress.unique_lines_seen ({}) exceeds progress.total_lines_seen ({})",
                self.progress.unique_lines_seen, self.progress.total_lines_seen
            ));
        }
        if self.runtime.max_idle_scrolls == 0 {
            return Err("runtime.max_idle_scrolls must be at least 1".to_string());
        }
        if self.runtime.checkpoint_interval == 0 {
            return Err("runtime.checkpoint_interval must be at least 1".to_string());
        }
        Ok(())
    }
}

/// `YYYYMMDDTHHMMSSZ_xxxxxx`: UTC start time plus six random hex characters.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}_{}", &suffix[..6])
}

#[cfg(test)]
pub(crate) fn sample_state() -> CollectionState {
    CollectionState::new(
        "20260101T000000Z_abc123".to_string(),
        Target {
            url: Some("https://example.test/transcript".to_string()),
            container_selector: "#chat".to_string(),
            line_selector: ".text".to_string(),
            text_only: false,
            entry_selector: Some(".entry".to_string()),
            speaker_selector: Some(".speaker".to_string()),
        },
        Files {
            raw_output: PathBuf::from("raw_output.txt"),
            final_output: PathBuf::from("final_output.txt"),
            log_file: PathBuf::from("run.log"),
        },
        RuntimeSnapshot {
            max_idle_scrolls: 3,
            scroll_step: 400,
            scroll_interval_ms: 600,
            max_retries: 3,
            retry_wait_ms: 1000,
            dedupe_mode: DedupeMode::Exact,
            checkpoint_interval: 1,
        },
    )
}
