//! Job Status Poller — drives a submitted generation job to a terminal state.
//!
//! Explicit state machine instead of a rescheduled-callback chain:
//! `InProgress → {Done, Failed}` from the backend, plus a client-side
//! `Cancelled` terminal state. Cancellation and state publication share one
//! lock, so a query that completes after cancellation is discarded, never
//! applied.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::jobs::client::{GeneratedFile, JobsApi, STATUS_DONE, STATUS_FAILED, STATUS_QUEUED};

/// Fixed delay between status queries. No backoff or retry ceiling.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Observable state of one tracked job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Any non-terminal backend status (QUEUED, PENDING, PROCESSING, ...),
    /// carried verbatim.
    InProgress { status: String },
    /// Terminal: the backend finished and the artifact list was fetched.
    Done { files: Vec<GeneratedFile> },
    /// Terminal: the backend reported failure, reason passed through unchanged.
    Failed { reason: String },
    /// Terminal: the observer cancelled; no further state will be published.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::InProgress { .. })
    }
}

/// Publication state guarded by one lock: the cancelled flag and the watch
/// sender flip together, so no backend report can land after cancellation.
struct Publisher {
    tx: watch::Sender<JobState>,
    cancelled: bool,
}

struct PollShared {
    publisher: Mutex<Publisher>,
    cancel_tx: watch::Sender<bool>,
}

impl PollShared {
    /// Applies a state unless the handle was cancelled first.
    fn publish(&self, state: JobState) -> bool {
        let mut publisher = self.publisher.lock().unwrap();
        if publisher.cancelled {
            return false;
        }
        publisher.tx.send_replace(state);
        true
    }

    fn cancel(&self) {
        {
            let mut publisher = self.publisher.lock().unwrap();
            if publisher.cancelled {
                return;
            }
            publisher.cancelled = true;
            publisher.tx.send_replace(JobState::Cancelled);
        }
        let _ = self.cancel_tx.send(true);
    }
}

/// Live handle to a tracked job. Dropping it cancels the poll, so a torn-down
/// observer can never be called back into.
pub struct JobHandle {
    job_id: String,
    rx: watch::Receiver<JobState>,
    shared: Arc<PollShared>,
    _task: JoinHandle<()>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current state, without waiting.
    pub fn state(&self) -> JobState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published state and returns it.
    pub async fn changed(&mut self) -> JobState {
        let _ = self.rx.changed().await;
        self.rx.borrow_and_update().clone()
    }

    /// Waits until the job reaches a terminal state.
    pub async fn wait_terminal(&mut self) -> JobState {
        loop {
            let state = self.rx.borrow_and_update().clone();
            if state.is_terminal() {
                return state;
            }
            if self.rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Stops the poll: no further query is scheduled and an in-flight
    /// query's result is discarded. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Factory for tracked jobs, holding the backend surface to poll against.
pub struct JobPoller {
    api: Arc<dyn JobsApi>,
    interval: Duration,
}

impl JobPoller {
    pub fn new(api: Arc<dyn JobsApi>) -> Self {
        Self {
            api,
            interval: POLL_INTERVAL,
        }
    }

    /// Begins observing a job and returns its live handle.
    pub fn track(&self, job_id: impl Into<String>) -> JobHandle {
        let job_id = job_id.into();
        // Until the first report lands, show the status the backend assigns
        // to every job at creation, never a status it does not emit.
        let (tx, rx) = watch::channel(JobState::InProgress {
            status: STATUS_QUEUED.into(),
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::new(PollShared {
            publisher: Mutex::new(Publisher {
                tx,
                cancelled: false,
            }),
            cancel_tx,
        });

        let task = tokio::spawn(poll_loop(
            self.api.clone(),
            job_id.clone(),
            shared.clone(),
            cancel_rx,
            self.interval,
        ));

        JobHandle {
            job_id,
            rx,
            shared,
            _task: task,
        }
    }
}

async fn poll_loop(
    api: Arc<dyn JobsApi>,
    job_id: String,
    shared: Arc<PollShared>,
    mut cancel_rx: watch::Receiver<bool>,
    interval: Duration,
) {
    loop {
        // `biased` so a pending cancellation always wins over other ready
        // branches: once cancelled, no further query runs.
        let report = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => return,
            report = api.status(&job_id) => report,
        };

        match report {
            // A failed query is a client-side problem, not a job verdict:
            // keep polling at the same interval.
            Err(e) => {
                warn!("Status query for job {job_id} failed, will retry: {e}");
            }
            Ok(report) if report.status == STATUS_FAILED => {
                let reason = report
                    .failure_reason
                    .unwrap_or_else(|| "unknown failure".into());
                shared.publish(JobState::Failed { reason });
                return;
            }
            Ok(report) if report.status == STATUS_DONE => {
                // Exactly one files query, issued on the first DONE observation.
                let files = tokio::select! {
                    biased;
                    _ = cancel_rx.wait_for(|cancelled| *cancelled) => return,
                    files = api.files(&job_id) => files,
                };
                let files = match files {
                    Ok(files) => files,
                    Err(e) => {
                        warn!("Files query for job {job_id} failed: {e}");
                        Vec::new()
                    }
                };
                shared.publish(JobState::Done { files });
                return;
            }
            Ok(report) => {
                debug!("Job {job_id} still in progress: {}", report.status);
                shared.publish(JobState::InProgress {
                    status: report.status,
                });
            }
        }

        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::jobs::client::{GenerateRequest, GenerateResponse, JobStatusResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn pdf_file(id: &str) -> GeneratedFile {
        GeneratedFile {
            id: id.into(),
            file_type: "PDF".into(),
            download_url: format!("https://files.example.com/{id}"),
        }
    }

    /// Backend double fed a fixed sequence of status replies. Once the
    /// script runs out it keeps answering PENDING, so over-polling shows up
    /// in the call counters rather than a panic inside the spawned task.
    struct ScriptedJobsApi {
        statuses: Mutex<VecDeque<Result<JobStatusResponse, ApiError>>>,
        files: Vec<GeneratedFile>,
        status_calls: AtomicUsize,
        files_calls: AtomicUsize,
        /// When present, each status query waits for a permit first.
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedJobsApi {
        fn new(script: Vec<Result<JobStatusResponse, ApiError>>, files: Vec<GeneratedFile>) -> Self {
            Self {
                statuses: Mutex::new(script.into()),
                files,
                status_calls: AtomicUsize::new(0),
                files_calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    fn ok(status: &str) -> Result<JobStatusResponse, ApiError> {
        Ok(JobStatusResponse {
            status: status.into(),
            failure_reason: None,
        })
    }

    fn failed(reason: &str) -> Result<JobStatusResponse, ApiError> {
        Ok(JobStatusResponse {
            status: STATUS_FAILED.into(),
            failure_reason: Some(reason.into()),
        })
    }

    fn unreachable_backend() -> Result<JobStatusResponse, ApiError> {
        Err(ApiError::Status {
            status: 503,
            message: "upstream unavailable".into(),
        })
    }

    #[async_trait]
    impl JobsApi for ScriptedJobsApi {
        async fn submit(&self, _request: &GenerateRequest) -> Result<GenerateResponse, ApiError> {
            panic!("poller tests never submit");
        }

        async fn status(&self, _job_id: &str) -> Result<JobStatusResponse, ApiError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ok("PENDING"))
        }

        async fn files(&self, _job_id: &str) -> Result<Vec<GeneratedFile>, ApiError> {
            self.files_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.files.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_pending_done_fetches_files_once() {
        let api = Arc::new(ScriptedJobsApi::new(
            vec![ok("PENDING"), ok("PENDING"), ok(STATUS_DONE)],
            vec![pdf_file("f1")],
        ));
        let mut handle = JobPoller::new(api.clone()).track("job-1");

        let terminal = handle.wait_terminal().await;
        assert_eq!(
            terminal,
            JobState::Done {
                files: vec![pdf_file("f1")]
            }
        );
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 1);

        // Terminal means terminal: nothing further is scheduled.
        tokio::time::sleep(POLL_INTERVAL * 5).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_surfaces_reason_without_files_query() {
        let api = Arc::new(ScriptedJobsApi::new(
            vec![failed("template not found")],
            vec![pdf_file("f1")],
        ));
        let mut handle = JobPoller::new(api.clone()).track("job-2");

        let terminal = handle.wait_terminal().await;
        assert_eq!(
            terminal,
            JobState::Failed {
                reason: "template not found".into()
            }
        );
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(POLL_INTERVAL * 5).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_is_retried_not_reported_as_job_failure() {
        let api = Arc::new(ScriptedJobsApi::new(
            vec![unreachable_backend(), ok("PROCESSING"), ok(STATUS_DONE)],
            vec![pdf_file("f1")],
        ));
        let mut handle = JobPoller::new(api.clone()).track("job-1");

        let terminal = handle.wait_terminal().await;
        assert!(matches!(terminal, JobState::Done { .. }));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonstandard_status_is_non_terminal() {
        let api = Arc::new(ScriptedJobsApi::new(
            vec![ok("QUEUED"), ok("RENDERING"), ok(STATUS_DONE)],
            vec![],
        ));
        let mut handle = JobPoller::new(api.clone()).track("job-1");

        let terminal = handle.wait_terminal().await;
        assert_eq!(terminal, JobState::Done { files: vec![] });
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_is_backend_creation_status() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(
            ScriptedJobsApi::new(vec![ok("PROCESSING"), ok(STATUS_DONE)], vec![])
                .gated(gate.clone()),
        );
        let mut handle = JobPoller::new(api.clone()).track("job-1");

        // Before the first report lands the handle shows QUEUED, the status
        // every job carries at creation.
        tokio::task::yield_now().await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            handle.state(),
            JobState::InProgress {
                status: STATUS_QUEUED.into()
            }
        );

        gate.add_permits(10);
        let terminal = handle.wait_terminal().await;
        assert_eq!(terminal, JobState::Done { files: vec![] });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_query() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(
            ScriptedJobsApi::new(vec![ok(STATUS_DONE)], vec![pdf_file("f1")])
                .gated(gate.clone()),
        );
        let handle = JobPoller::new(api.clone()).track("job-1");

        // Let the poll task park inside its first status query.
        tokio::task::yield_now().await;
        handle.cancel();
        assert_eq!(handle.state(), JobState::Cancelled);

        // Release the query; its DONE result must be discarded.
        gate.add_permits(10);
        tokio::time::sleep(POLL_INTERVAL * 5).await;
        assert_eq!(handle.state(), JobState::Cancelled);
        assert_eq!(api.files_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_scheduling_queries() {
        let api = Arc::new(ScriptedJobsApi::new(vec![ok("PENDING")], vec![]));
        let handle = JobPoller::new(api.clone()).track("job-1");

        // First query lands, then the observer goes away mid-interval.
        tokio::task::yield_now().await;
        handle.cancel();

        tokio::time::sleep(POLL_INTERVAL * 10).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), JobState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_poll() {
        let api = Arc::new(ScriptedJobsApi::new(vec![ok("PENDING")], vec![]));
        let handle = JobPoller::new(api.clone()).track("job-1");

        tokio::task::yield_now().await;
        drop(handle);

        tokio::time::sleep(POLL_INTERVAL * 10).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let api = Arc::new(ScriptedJobsApi::new(vec![ok("PENDING")], vec![]));
        let handle = JobPoller::new(api.clone()).track("job-1");

        handle.cancel();
        handle.cancel();
        assert_eq!(handle.state(), JobState::Cancelled);
    }
}
