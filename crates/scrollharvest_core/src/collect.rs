use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{EXIT_OK, HarvestError};
use crate::extract::ExtractionMode;
use crate::idle::should_stop;
use crate::page::{ElementHandle, PageAdapter};
use crate::raw::RawAppender;
use crate::record::SeenSet;
use crate::retry::RetryPolicy;
use crate::state::{CollectionState, RunStatus};

/// Cooperative stop request, honoured at the next cycle boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Continue,
    EndOfContent,
}

/// Final state of a run plus the error that ended it, if any. The terminal
/// checkpoint has already been written (or attempted) when this is returned.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: CollectionState,
    pub error: Option<HarvestError>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.error.is_none() && self.state.status == RunStatus::Completed
    }

    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map_or(EXIT_OK, HarvestError::exit_code)
    }
}

pub struct CollectionLoop<'a, A: PageAdapter + ?Sized> {
    adapter: &'a mut A,
    store: CheckpointStore,
    appender: RawAppender,
    cancel: CancelToken,
    restore_scroll: bool,
}

impl<'a, A: PageAdapter + ?Sized> CollectionLoop<'a, A> {
    pub fn new(
        adapter: &'a mut A,
        store: CheckpointStore,
        appender: RawAppender,
        cancel: CancelToken,
    ) -> Self {
        Self {
            adapter,
            store,
            appender,
            cancel,
            restore_scroll: false,
        }
    }

    /// Scroll back to the checkpointed offset before the first cycle.
    pub fn resuming(mut self, restore_scroll: bool) -> Self {
        self.restore_scroll = restore_scroll;
        self
    }

    /// Drives cycles until the content ends, the run is cancelled, or a
    /// non-recoverable error occurs. Every exit path writes a terminal checkpoint.
    pub fn run(mut self, mut state: CollectionState, mut seen: SeenSet) -> RunOutcome {
        info!(
            run_id = %state.run_id,
            raw_output = %self.appender.path().display(),
            checkpoint = %self.store.path().display(),
            "collection started"
        );

        let result = self
            .store
            .save(&state)
            .and_then(|()| self.drive(&mut state, &mut seen));

        let mut failure = result.err();
        if let Some(error) = &failure {
            state.fail_with(error);
        }
        state.touch();

        if let Err(save_error) = self.store.save(&state) {
            error!(error = %save_error, "failed to write terminal checkpoint");
            if failure.is_none() {
                state.fail_with(&save_error);
                failure = Some(save_error);
            }
        }

        match &failure {
            None => info!(
                run_id = %state.run_id,
                loops = state.progress.loop_count,
                total_lines_seen = state.progress.total_lines_seen,
                "collection completed"
            ),
            Some(error) => warn!(
                run_id = %state.run_id,
                status = state.status.as_str(),
                code = error.code(),
                error = %error,
                "collection stopped"
            ),
        }

        RunOutcome {
            state,
            error: failure,
        }
    }

    fn drive(
        &mut self,
        state: &mut CollectionState,
        seen: &mut SeenSet,
    ) -> Result<(), HarvestError> {
        let retry = RetryPolicy::from_runtime(&state.runtime);
        let extraction = ExtractionMode::from_target(&state.target);

        if let Some(url) = state.target.url.clone() {
            let current = retry.run(&mut *self.adapter, "current_url", |page| page.current_url())?;
            if current != url {
                info!(url = %url, "navigating");
                retry.run(&mut *self.adapter, "navigate", |page| page.open(&url))?;
            }
        }

        let container_selector = state.target.container_selector.clone();
        let container = retry
            .run(&mut *self.adapter, "find_container", |page| {
                page.find_container(&container_selector)
            })?
            .ok_or_else(|| {
                HarvestError::TargetNotFound(format!("container not found: {container_selector}"))
            })?;

        if self.restore_scroll && state.progress.scroll_position != 0 {
            let target = state.progress.scroll_position;
            let restored = retry.run(&mut *self.adapter, "restore_scroll", |page| {
                page.scroll_to(&container, target)
            })?;
            info!(requested = target, restored, "restored scroll position");
            state.progress.scroll_position = restored;
        }

        let checkpoint_every = u64::from(state.runtime.checkpoint_interval.max(1));
        loop {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            if self.cycle(state, seen, &container, &extraction, &retry)?
                == CycleOutcome::EndOfContent
            {
                state.transition_to(RunStatus::Completed)?;
                return Ok(());
            }
            if state.progress.loop_count % checkpoint_every == 0 {
                state.touch();
                self.store.save(state)?;
            }
        }
    }

    fn cycle(
        &mut self,
        state: &mut CollectionState,
        seen: &mut SeenSet,
        container: &ElementHandle,
        extraction: &ExtractionMode,
        retry: &RetryPolicy,
    ) -> Result<CycleOutcome, HarvestError> {
        let extracted = retry.run(&mut *self.adapter, "query", |page| {
            extraction.extract(page, container)
        })?;

        if extracted.matched_elements == 0
            && state.progress.loop_count == 0
            && state.progress.total_lines_seen == 0
        {
            return Err(HarvestError::TargetNotFound(format!(
                "no elements matched {} inside {}",
                extraction.line_selector(),
                state.target.container_selector
            )));
        }

        let mut new_records = 0usize;
        for record in extracted.records {
            let key = record.raw_line();
            if seen.contains(&key) {
                continue;
            }
            let record = record.at_index(state.progress.total_lines_seen);
            self.appender.append(&record)?;
            seen.insert(key);
            state.record_appended();
            new_records += 1;
        }
        if new_records == 0 {
            state.record_idle_cycle();
        }

        debug!(
            loop_count = state.progress.loop_count,
            visible = extracted.matched_elements,
            new_records,
            idle_scroll_count = state.progress.idle_scroll_count,
            "cycle finished"
        );

        if should_stop(
            state.progress.idle_scroll_count,
            state.runtime.max_idle_scrolls,
        ) {
            info!(
                idle_scroll_count = state.progress.idle_scroll_count,
                "no new content, treating as end of content"
            );
            return Ok(CycleOutcome::EndOfContent);
        }

        let step = state.runtime.scroll_step;
        state.progress.scroll_position =
            retry.run(&mut *self.adapter, "scroll", |page| page.scroll_by(container, step))?;
        self.adapter
            .wait(Duration::from_millis(state.runtime.scroll_interval_ms));
        state.progress.loop_count += 1;
        Ok(CycleOutcome::Continue)
    }
}
