//! Status polling fallback
//!
//! For non-streaming executions the client asks the status endpoint at a
//! fixed period until `completed` is true, then stops. The poll loop owns
//! its ticker, so returning from it is what cancels the interval.
//!
//! Every intermediate report is handed to the caller as it arrives, so a
//! view can show results that are already stored while the run continues.

use crate::client::ClientError;
use crate::store::models::StatusReport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default polling period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Read side of the execution status
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    /// Current status report of an execution
    async fn fetch_status(&self, execution_id: &str) -> Result<StatusReport, ClientError>;
}

/// `GET /api/prompts/:id/status` over HTTP
#[derive(Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    /// Source for a server base URL
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn status_url(&self, execution_id: &str) -> String {
        format!(
            "{}/api/prompts/{}/status",
            self.base_url.trim_end_matches('/'),
            execution_id
        )
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, execution_id: &str) -> Result<StatusReport, ClientError> {
        let response = self
            .client
            .get(self.status_url(execution_id))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<StatusReport>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Polls a status source until the execution completes
pub struct StatusPoller<S: StatusSource> {
    source: Arc<S>,
    period: Duration,
}

impl<S: StatusSource> Clone for StatusPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            period: self.period,
        }
    }
}

impl<S: StatusSource> StatusPoller<S> {
    /// Poller with the default one-second period
    pub fn new(source: S) -> Self {
        Self::with_period(source, DEFAULT_POLL_INTERVAL)
    }

    /// Poller with a custom period
    pub fn with_period(source: S, period: Duration) -> Self {
        Self {
            source: Arc::new(source),
            period,
        }
    }

    /// Poll until `completed` is true and return that report
    ///
    /// The first request goes out one period after the call. Any error ends
    /// polling immediately.
    pub async fn poll_until_complete(&self, execution_id: &str) -> Result<StatusReport, ClientError> {
        self.poll_with_progress(execution_id, |_| {}).await
    }

    /// Like [`poll_until_complete`](Self::poll_until_complete), calling
    /// `on_progress` with every report that is not yet complete
    pub async fn poll_with_progress<F>(
        &self,
        execution_id: &str,
        mut on_progress: F,
    ) -> Result<StatusReport, ClientError>
    where
        F: FnMut(&StatusReport) + Send,
    {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            ticker.tick().await;
            attempts += 1;

            match self.source.fetch_status(execution_id).await {
                Ok(report) if report.completed => {
                    debug!(execution_id = %execution_id, attempts, "Execution complete, polling stopped");
                    return Ok(report);
                }
                Ok(report) => {
                    debug!(
                        execution_id = %execution_id,
                        attempts,
                        results = report.results.len(),
                        "Execution still running"
                    );
                    on_progress(&report);
                }
                Err(e) => {
                    warn!(execution_id = %execution_id, attempts, error = %e, "Polling stopped on error");
                    return Err(e);
                }
            }
        }
    }

    /// Poll on a background task
    ///
    /// The handle's [`progress`](PollHandle::progress) channel holds the
    /// latest report, the final one included.
    pub fn spawn(&self, execution_id: impl Into<String>) -> PollHandle {
        let poller = self.clone();
        let execution_id = execution_id.into();
        let (progress_tx, progress) = watch::channel(None);
        let task = tokio::spawn(async move {
            let result = poller
                .poll_with_progress(&execution_id, |report| {
                    progress_tx.send_replace(Some(report.clone()));
                })
                .await;
            if let Ok(report) = &result {
                progress_tx.send_replace(Some(report.clone()));
            }
            result
        });
        PollHandle {
            task: Some(task),
            progress,
        }
    }
}

/// Handle to a background poll; dropping it cancels the poll
pub struct PollHandle {
    task: Option<JoinHandle<Result<StatusReport, ClientError>>>,
    progress: watch::Receiver<Option<StatusReport>>,
}

impl PollHandle {
    /// Latest report received, `None` before the first poll
    pub fn progress(&self) -> watch::Receiver<Option<StatusReport>> {
        self.progress.clone()
    }

    /// Stop polling now
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Whether polling has ended
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the final report
    ///
    /// Returns `None` if the poll was cancelled.
    pub async fn wait(mut self) -> Option<Result<StatusReport, ClientError>> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GenerationParams;
    use crate::store::models::{Execution, ExecutionStatus, Prompt};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: Arc<AtomicU32>,
        complete_at: u32,
        fail: bool,
    }

    fn report(completed: bool) -> StatusReport {
        let prompt = Prompt::new(
            String::new(),
            "hi".into(),
            "gpt-4o".into(),
            GenerationParams::default(),
        )
        .unwrap();
        let mut execution = Execution::new(prompt.id.clone(), 1, false).unwrap();
        if completed {
            execution.status = ExecutionStatus::Completed;
        }
        StatusReport::new(execution, prompt, vec![])
    }

    #[async_trait]
    impl StatusSource for CountingSource {
        async fn fetch_status(&self, _execution_id: &str) -> Result<StatusReport, ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ClientError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(report(call >= self.complete_at))
        }
    }

    fn source(complete_at: u32, fail: bool) -> (CountingSource, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            CountingSource {
                calls: Arc::clone(&calls),
                complete_at,
                fail,
            },
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_once_completed() {
        let (source, calls) = source(3, false);
        let poller = StatusPoller::new(source);

        let handle = poller.spawn("e1");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let report = handle.wait().await.unwrap().unwrap();
        assert!(report.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_period() {
        let (source, calls) = source(100, false);
        let poller = StatusPoller::new(source);
        let _handle = poller.spawn("e1");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_on_error() {
        let (source, calls) = source(1, true);
        let poller = StatusPoller::new(source);

        let result = poller.poll_until_complete("e1").await;
        assert!(matches!(result, Err(ClientError::Http { status: 500, .. })));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_polling() {
        let (source, calls) = source(100, false);
        let poller = StatusPoller::new(source);

        let handle = poller.spawn("e1");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_every_running_poll() {
        let (source, _calls) = source(4, false);
        let poller = StatusPoller::new(source);

        let mut running = 0;
        let report = poller
            .poll_with_progress("e1", |report| {
                assert!(!report.completed);
                running += 1;
            })
            .await
            .unwrap();

        assert!(report.completed);
        assert_eq!(running, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_exposes_latest_report() {
        let (source, _calls) = source(3, false);
        let poller = StatusPoller::new(source);
        let handle = poller.spawn("e1");
        let mut progress = handle.progress();
        assert!(progress.borrow().is_none());

        progress.changed().await.unwrap();
        assert_eq!(progress.borrow_and_update().as_ref().map(|r| r.completed), Some(false));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
        assert_eq!(progress.borrow().as_ref().map(|r| r.completed), Some(true));
    }
}
