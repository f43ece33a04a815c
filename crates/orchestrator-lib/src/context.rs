//! Per-run execution context shared by every orchestration phase

use crate::error::ErrorKind;
use crate::observability::StructuredLogger;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Used when `now + deadline` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// Deadline, cancellation and logging for one analysis run
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    deadline: Instant,
    cancel: CancellationToken,
    logger: StructuredLogger,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, deadline: Duration, cancel: CancellationToken) -> Self {
        let run_id = run_id.into();
        let now = Instant::now();
        Self {
            deadline: now
                .checked_add(deadline)
                .unwrap_or_else(|| now + FAR_FUTURE),
            logger: StructuredLogger::new(run_id.clone()),
            cancel,
            run_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Why the run must stop now, if it must
    pub fn interruption(&self) -> Option<ErrorKind> {
        if self.cancel.is_cancelled() {
            Some(ErrorKind::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(ErrorKind::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the run is cancelled or its deadline passes
    pub async fn interrupted(&self) -> ErrorKind {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => ErrorKind::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => ErrorKind::DeadlineExceeded,
        }
    }
}
