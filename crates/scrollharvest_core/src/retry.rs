use std::time::Duration;

use tracing::warn;

use crate::error::HarvestError;
use crate::page::{AdapterError, PageAdapter};
use crate::state::RuntimeSnapshot;

/// Fixed-wait retry for transient adapter operations. One initial attempt plus
/// up to `max_retries` retries; non-transient failures are returned at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    pub fn from_runtime(runtime: &RuntimeSnapshot) -> Self {
        Self::new(
            runtime.max_retries,
            Duration::from_millis(runtime.retry_wait_ms),
        )
    }

    pub fn run<A, T, F>(
        &self,
        adapter: &mut A,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, HarvestError>
    where
        A: PageAdapter + ?Sized,
        F: FnMut(&mut A) -> Result<T, AdapterError>,
    {
        let mut failures = 0u32;
        loop {
            match call(adapter) {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    failures += 1;
                    if failures > self.max_retries {
                        return Err(HarvestError::RetryExhausted {
                            operation,
                            attempts: failures,
                            message: error.to_string(),
                        });
                    }
                    warn!(
                        operation,
                        attempt = failures,
                        max_retries = self.max_retries,
                        error = %error,
                        "transient failure, retrying"
                    );
                    adapter.wait(self.wait);
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::testing::ScriptedPage;

    fn transient() -> AdapterError {
        AdapterError::Transient("timeout".to_string())
    }

    #[test]
    fn recovers_when_failures_stay_within_budget() {
        let mut page = ScriptedPage::numbered(1, 1);
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let mut calls = 0;
        let value = policy
            .run(&mut page, "query", |_| {
                calls += 1;
                if calls <= 2 { Err(transient()) } else { Ok(calls) }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(page.waits, vec![Duration::from_millis(250); 2]);
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let mut page = ScriptedPage::numbered(1, 1);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let error = policy
            .run(&mut page, "scroll", |_| Err::<(), _>(transient()))
            .expect_err("must exhaust");
        match error {
            HarvestError::RetryExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "scroll");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(page.waits.len(), 2);
    }

    #[test]
    fn selector_errors_are_not_retried() {
        let mut page = ScriptedPage::numbered(1, 1);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut calls = 0;
        let error = policy
            .run(&mut page, "query", |_| {
                calls += 1;
                Err::<(), _>(AdapterError::InvalidSelector("[[".to_string()))
            })
            .expect_err("must fail");
        assert_eq!(calls, 1);
        assert_eq!(error.exit_code(), 10);
        assert!(page.waits.is_empty());
    }
}
