use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::{CheckpointError, HarvestError};
use crate::state::{CHECKPOINT_VERSION, CollectionState};

/// Owns the recovery file of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the checkpoint atomically: the state is written and synced to
    /// `<name>.tmp`, then renamed over the previous file.
    pub fn save(&self, state: &CollectionState) -> Result<(), HarvestError> {
        let rendered = serde_json::to_vec_pretty(state)
            .map_err(|error| HarvestError::Unexpected(format!("failed to encode checkpoint: {error}")))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| HarvestError::write_failure(parent, error))?;
        }

        let temp_path = self.temp_path();
        let written = write_synced(&temp_path, &rendered)
            .map_err(|error| HarvestError::write_failure(&temp_path, error))
            .and_then(|()| {
                fs::rename(&temp_path, &self.path)
                    .map_err(|error| HarvestError::write_failure(&self.path, error))
            });
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written?;

        debug!(
            path = %self.path.display(),
            status = state.status.as_str(),
            loop_count = state.progress.loop_count,
            total_lines_seen = state.progress.total_lines_seen,
            "checkpoint saved"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Parses and validates a checkpoint. Never falls back to a fresh state.
pub fn load(path: &Path) -> Result<CollectionState, CheckpointError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(CheckpointError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: Value =
        serde_json::from_str(&content).map_err(|source| CheckpointError::Unparsable {
            path: path.to_path_buf(),
            source,
        })?;

    let invalid = |reason: String| CheckpointError::Invalid {
        path: path.to_path_buf(),
        reason,
    };

    if !value.is_object() {
        return Err(invalid("top-level value must be an object".to_string()));
    }
    let version = value
        .get("version")
        .ok_or_else(|| invalid("missing field `version`".to_string()))?
        .as_u64()
        .ok_or_else(|| invalid("`version` must be a non-negative integer".to_string()))?;
    if version != u64::from(CHECKPOINT_VERSION) {
        return Err(CheckpointError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            expected: CHECKPOINT_VERSION,
        });
    }

    let state: CollectionState =
        serde_json::from_value(value).map_err(|error| invalid(error.to_string()))?;
    state.validate().map_err(invalid)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RunStatus, sample_state};
    use tempfile::tempdir;

    #[test]
    fn save_then_load_preserves_state() {
        let temp = tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("state").join("state.json"));
        let mut state = sample_state();
        state.progress.loop_count = 12;
        state.progress.scroll_position = 4800;
        state.record_appended();

        store.save(&state).expect("save");
        let loaded = load(store.path()).expect("load");
        assert_eq!(loaded, state);
        assert!(!temp.path().join("state").join("state.json.tmp").exists());
    }

    #[test]
    fn save_replaces_previous_checkpoint() {
        let temp = tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("state.json"));
        let mut state = sample_state();
        store.save(&state).expect("first save");
        state.transition_to(RunStatus::Completed).expect("complete");
        store.save(&state).expect("second save");
        assert_eq!(load(store.path()).expect("load").status, RunStatus::Completed);
    }

    #[test]
    fn missing_file_is_reported() {
        let temp = tempdir().expect("tempdir");
        let error = load(&temp.path().join("absent.json")).expect_err("must fail");
        assert!(matches!(error, CheckpointError::Missing { .. }));
    }

    #[test]
    fn corrupted_file_is_unparsable() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "{\"version\": 1, \"run_id\": ").expect("write");
        let error = load(&path).expect_err("must fail");
        assert!(matches!(error, CheckpointError::Unparsable { .. }));
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut value = serde_json::to_value(sample_state()).expect("to value");
        value
            .as_object_mut()
            .expect("object")
            .remove("run_id");
        fs::write(&path, value.to_string()).expect("write");

        match load(&path).expect_err("must fail") {
            CheckpointError::Invalid { reason, .. } => assert!(reason.contains("run_id")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut value = serde_json::to_value(sample_state()).expect("to value");
        value["version"] = Value::from(7);
        fs::write(&path, value.to_string()).expect("write");
        assert!(matches!(
            load(&path).expect_err("must fail"),
            CheckpointError::UnsupportedVersion { found: 7, .. }
        ));
    }

    #[test]
    fn legacy_scroll_top_key_is_accepted() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut value = serde_json::to_value(sample_state()).expect("to value");
        let progress = value["progress"].as_object_mut().expect("progress");
        progress.remove("scroll_position");
        progress.insert("scroll_top".to_string(), Value::from(1200));
        fs::write(&path, value.to_string()).expect("write");
        assert_eq!(load(&path).expect("load").progress.scroll_position, 1200);
    }
}
