use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::checkpoint;
use crate::error::HarvestError;
use crate::raw::{RawAppender, read_raw_lines};
use crate::record::SeenSet;
use crate::state::CollectionState;

/// Everything a resumed collection loop needs, rebuilt from disk.
#[derive(Debug)]
pub struct ResumedRun {
    pub state: CollectionState,
    pub seen: SeenSet,
    pub appender: RawAppender,
}

/// Reloads an interrupted run. The raw output is authoritative for what was
/// already collected; the checkpoint supplies position and runtime settings.
///
/// `raw_output` overrides the path recorded in the checkpoint when given.
pub fn resume(
    checkpoint_path: &Path,
    raw_output: Option<&Path>,
) -> Result<ResumedRun, HarvestError> {
    let mut state = checkpoint::load(checkpoint_path)?;
    state.reopen()?;

    if let Some(path) = raw_output
        && path != state.files.raw_output
    {
        info!(
            recorded = %state.files.raw_output.display(),
            using = %path.display(),
            "raw output path overridden on resume"
        );
        state.files.raw_output = PathBuf::from(path);
    }

    let raw_path = state.files.raw_output.clone();
    let lines = read_raw_lines(&raw_path).map_err(|error| {
        HarvestError::Configuration(format!(
            "failed to read raw output {}: {error}",
            raw_path.display()
        ))
    })?;
    let total = u64::try_from(lines.len()).unwrap_or(u64::MAX);
    let seen: SeenSet = lines.into_iter().collect();
    let unique = u64::try_from(seen.len()).unwrap_or(u64::MAX);

    if total != state.progress.total_lines_seen {
        warn!(
            checkpoint_total = state.progress.total_lines_seen,
            raw_total = total,
            "raw output and checkpoint disagree, trusting raw output"
        );
    }
    state.progress.total_lines_seen = total;
    state.progress.unique_lines_seen = unique;

    let appender = RawAppender::open(&raw_path)?;
    info!(
        run_id = %state.run_id,
        loop_count = state.progress.loop_count,
        scroll_position = state.progress.scroll_position,
        total_lines_seen = total,
        unique_lines_seen = unique,
        "resuming run"
    );

    Ok(ResumedRun {
        state,
        seen,
        appender,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::collect::{CancelToken, CollectionLoop};
    use crate::dedupe::{DedupeMode, finalize};
    use crate::error::CheckpointError;
    use crate::page::testing::{CONTAINER, ENTRY, SPEAKER, ScriptedPage, TEXT};
    use crate::state::{RunStatus, sample_state};

    fn state_for(raw: &Path) -> CollectionState {
        let mut state = sample_state();
        state.target.container_selector = CONTAINER.to_string();
        state.target.line_selector = TEXT.to_string();
        state.target.entry_selector = Some(ENTRY.to_string());
        state.target.speaker_selector = Some(SPEAKER.to_string());
        state.files.raw_output = raw.to_path_buf();
        state.runtime.max_idle_scrolls = 2;
        state.runtime.scroll_step = 100;
        state.runtime.retry_wait_ms = 1;
        state.runtime.checkpoint_interval = 2;
        state
    }

    #[test]
    fn interrupted_then_resumed_run_matches_uninterrupted_run() {
        let temp = tempdir().expect("tempdir");

        let straight_raw = temp.path().join("straight.txt");
        let straight_checkpoint = temp.path().join("straight.json");
        let mut page = ScriptedPage::numbered(20, 4);
        let outcome = CollectionLoop::new(
            &mut page,
            CheckpointStore::new(&straight_checkpoint),
            RawAppender::new(&straight_raw),
            CancelToken::new(),
        )
        .run(state_for(&straight_raw), SeenSet::default());
        assert!(outcome.is_completed(), "{:?}", outcome.error);

        let split_raw = temp.path().join("split.txt");
        let split_checkpoint = temp.path().join("split.json");
        let mut page = ScriptedPage::numbered(20, 4);
        let token = CancelToken::new();
        page.cancel_after_scrolls(5, token.clone());
        let interrupted = CollectionLoop::new(
            &mut page,
            CheckpointStore::new(&split_checkpoint),
            RawAppender::new(&split_raw),
            token,
        )
        .run(state_for(&split_raw), SeenSet::default());
        assert_eq!(interrupted.exit_code(), 30);

        // The second process starts with a fresh page scrolled to the top.
        let resumed = resume(&split_checkpoint, None).expect("resume");
        assert_eq!(resumed.state.status, RunStatus::Running);
        assert_eq!(resumed.state.progress.scroll_position, 500);
        let mut page = ScriptedPage::numbered(20, 4);
        let outcome = CollectionLoop::new(
            &mut page,
            CheckpointStore::new(&split_checkpoint),
            resumed.appender,
            CancelToken::new(),
        )
        .resuming(true)
        .run(resumed.state, resumed.seen);
        assert!(outcome.is_completed(), "{:?}", outcome.error);
        assert!(page.queries < 20);

        let straight_final = temp.path().join("straight_final.txt");
        let split_final = temp.path().join("split_final.txt");
        finalize(&straight_raw, &straight_final, DedupeMode::Exact).expect("finalize straight");
        finalize(&split_raw, &split_final, DedupeMode::Exact).expect("finalize split");
        assert_eq!(
            fs::read(&straight_final).expect("straight"),
            fs::read(&split_final).expect("split")
        );
        assert_eq!(fs::read(&straight_raw).expect("raw"), fs::read(&split_raw).expect("raw"));
    }

    #[test]
    fn raw_output_wins_over_stale_checkpoint_counters() {
        let temp = tempdir().expect("tempdir");
        let raw = temp.path().join("raw.txt");
        let checkpoint_path = temp.path().join("state.json");

        // Simulates a crash after two appends that never reached a checkpoint.
        let mut state = state_for(&raw);
        state.progress.loop_count = 1;
        state.progress.total_lines_seen = 1;
        state.progress.unique_lines_seen = 1;
        CheckpointStore::new(&checkpoint_path)
            .save(&state)
            .expect("save");
        fs::write(&raw, "Alice\tline 0\nBob\tline 1\nAlice\tline 2\n").expect("raw");

        let resumed = resume(&checkpoint_path, None).expect("resume");
        assert_eq!(resumed.state.progress.total_lines_seen, 3);
        assert_eq!(resumed.state.progress.unique_lines_seen, 3);
        assert!(resumed.seen.contains("Alice\tline 2"));
        assert_eq!(resumed.state.progress.loop_count, 1);
    }

    #[test]
    fn raw_path_override_is_recorded() {
        let temp = tempdir().expect("tempdir");
        let checkpoint_path = temp.path().join("state.json");
        let moved = temp.path().join("moved.txt");
        fs::write(&moved, "kept\n").expect("raw");
        let mut state = state_for(&temp.path().join("original.txt"));
        state.status = RunStatus::Interrupted;
        state.progress.total_lines_seen = 1;
        state.progress.unique_lines_seen = 1;
        CheckpointStore::new(&checkpoint_path)
            .save(&state)
            .expect("save");

        let resumed = resume(&checkpoint_path, Some(&moved)).expect("resume");
        assert_eq!(resumed.state.files.raw_output, moved);
        assert_eq!(resumed.appender.path(), moved.as_path());
        assert!(resumed.seen.contains("kept"));
    }

    #[test]
    fn corrupted_checkpoint_is_a_load_error() {
        let temp = tempdir().expect("tempdir");
        let checkpoint_path = temp.path().join("state.json");
        fs::write(&checkpoint_path, "{ not json").expect("write");

        let error = resume(&checkpoint_path, None).expect_err("must fail");
        assert!(matches!(
            error,
            HarvestError::CheckpointLoad(CheckpointError::Unparsable { .. })
        ));
        assert_eq!(error.exit_code(), 10);
    }

    #[test]
    fn completed_runs_cannot_be_resumed() {
        let temp = tempdir().expect("tempdir");
        let checkpoint_path = temp.path().join("state.json");
        let mut state = state_for(&temp.path().join("raw.txt"));
        state.transition_to(RunStatus::Completed).expect("complete");
        CheckpointStore::new(&checkpoint_path)
            .save(&state)
            .expect("save");

        let error = resume(&checkpoint_path, None).expect_err("must fail");
        assert_eq!(error.exit_code(), 10);
    }
}
