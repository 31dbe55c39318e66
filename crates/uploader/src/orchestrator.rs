//! The upload state machine.
//!
//! `Pick → Hash → Dedup → Start → Upload → {Process | Poll} → Complete`,
//! with `Error` reachable from every state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use partflow_jobs::{JobBoard, JobError, JobProgressTracker, NamedJob};
use partflow_protocol::{JobRef, Progress, UploadInfo};
use partflow_transfer::{
    BytesSource, EngineState, FileSource, PartSource, PartitionModel, UploadArgs, UploadEngine,
    sha512_file, sha512_reader,
};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::host::{ProcessedItem, UploadHost};
use crate::sink::ProgressSink;

/// The file being uploaded.
#[derive(Debug, Clone)]
pub enum UploadFile {
    InMemory { name: String, data: Bytes },
    OnDisk { path: PathBuf },
}

impl UploadFile {
    pub fn name(&self) -> String {
        match self {
            Self::InMemory { name, .. } => name.clone(),
            Self::OnDisk { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    async fn size(&self) -> Result<u64, UploadError> {
        match self {
            Self::InMemory { data, .. } => Ok(data.len() as u64),
            Self::OnDisk { path } => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|e| UploadError::Client(format!("{}: {e}", path.display()))),
        }
    }

    async fn sha512(
        &self,
        on_progress: impl FnMut(u64),
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let hash = match self {
            Self::InMemory { data, .. } => sha512_reader(&data[..], on_progress, cancel).await,
            Self::OnDisk { path } => sha512_file(path, on_progress, cancel).await,
        };
        Ok(hash?)
    }

    fn source(&self) -> Arc<dyn PartSource> {
        match self {
            Self::InMemory { data, .. } => Arc::new(BytesSource::new(data.clone())),
            Self::OnDisk { path } => Arc::new(FileSource::new(path.clone())),
        }
    }
}

/// Which state the orchestrator is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Pick,
    Hash,
    Dedup,
    Start,
    Upload,
    Process,
    Poll,
    Complete,
    Error,
}

/// A state together with what it was handed by the previous one.
enum Step {
    Pick,
    Hash { size: u64 },
    Dedup { size: u64, sha512: String },
    Start { size: u64, sha512: String },
    Upload { sha512: String, info: UploadInfo },
    Process { sha512: String, job: JobRef },
    Poll { sha512: String, timeout: Duration },
    Complete(ProcessedItem),
}

impl Step {
    fn state(&self) -> UploadState {
        match self {
            Self::Pick => UploadState::Pick,
            Self::Hash { .. } => UploadState::Hash,
            Self::Dedup { .. } => UploadState::Dedup,
            Self::Start { .. } => UploadState::Start,
            Self::Upload { .. } => UploadState::Upload,
            Self::Process { .. } => UploadState::Process,
            Self::Poll { .. } => UploadState::Poll,
            Self::Complete(_) => UploadState::Complete,
        }
    }
}

/// Uploads one file and waits until the server has processed it.
pub struct UploadOrchestrator {
    host: Arc<dyn UploadHost>,
    config: UploaderConfig,
    extra_params: Map<String, Value>,
    sink: Arc<dyn ProgressSink>,
    jobs: Arc<JobBoard>,
    state_tx: watch::Sender<UploadState>,
}

impl UploadOrchestrator {
    pub fn new(
        host: Arc<dyn UploadHost>,
        config: UploaderConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(UploadState::Pick);
        Self {
            host,
            config,
            extra_params: Map::new(),
            sink,
            jobs: Arc::new(JobBoard::new()),
            state_tx,
        }
    }

    /// Extra fields merged into the start request body.
    pub fn with_extra_params(mut self, extra_params: Map<String, Value>) -> Self {
        self.extra_params = extra_params;
        self
    }

    /// Processing jobs seen while following the upload.
    pub fn job_board(&self) -> Arc<JobBoard> {
        self.jobs.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<UploadState> {
        self.state_tx.subscribe()
    }

    /// Runs the state machine to completion.
    ///
    /// Returns the processed record from the server. Cancelling `cancel`
    /// stops whichever state is active and yields
    /// [`UploadError::Cancelled`].
    pub async fn run(
        &self,
        file: UploadFile,
        cancel: &CancellationToken,
    ) -> Result<ProcessedItem, UploadError> {
        let mut step = Step::Pick;
        loop {
            let state = step.state();
            self.state_tx.send_replace(state);
            debug!(?state, "upload state");

            if let Step::Complete(item) = step {
                self.sink.report(Progress::new("complete", None));
                info!(file = %file.name(), "upload complete");
                return Ok(item);
            }

            let next = if cancel.is_cancelled() {
                Err(UploadError::Cancelled)
            } else {
                self.transition(step, &file, cancel).await
            };

            step = match next {
                Ok(next) => next,
                Err(e) => {
                    warn!(?state, error = %e, "upload failed");
                    self.state_tx.send_replace(UploadState::Error);
                    self.sink.report(Progress::new(e.to_string(), None));
                    return Err(e);
                }
            };
        }
    }

    async fn transition(
        &self,
        step: Step,
        file: &UploadFile,
        cancel: &CancellationToken,
    ) -> Result<Step, UploadError> {
        match step {
            Step::Pick => Ok(Step::Hash {
                size: file.size().await?,
            }),
            Step::Hash { size } => {
                let sha512 = self.hash(file, size, cancel).await?;
                Ok(Step::Dedup { size, sha512 })
            }
            Step::Dedup { size, sha512 } => {
                self.sink.report(Progress::spinner(
                    "checking if the file has already been processed",
                ));
                let found = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    found = self.host.poll_processed(&sha512) => found?,
                };
                Ok(match found {
                    Some(item) => {
                        info!("file was already processed");
                        Step::Complete(item)
                    }
                    None => Step::Start { size, sha512 },
                })
            }
            Step::Start { size, sha512 } => {
                self.sink.report(Progress::spinner("initializing upload"));
                let info = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    info = self.host.start_upload(size, &self.extra_params) => info?,
                };
                Ok(Step::Upload { sha512, info })
            }
            Step::Upload { sha512, info } => {
                self.upload(file, &info, cancel).await?;
                Ok(match info.progress {
                    Some(job) => Step::Process { sha512, job },
                    None => Step::Poll {
                        sha512,
                        timeout: self.config.polling.timeout(),
                    },
                })
            }
            Step::Process { sha512, job } => {
                let timeout = self.process(file, job, cancel).await?;
                Ok(Step::Poll { sha512, timeout })
            }
            Step::Poll { sha512, timeout } => {
                let item = self.poll(&sha512, timeout, cancel).await?;
                Ok(Step::Complete(item))
            }
            Step::Complete(item) => Ok(Step::Complete(item)),
        }
    }

    // -----------------------------------------------------------------------
    // States
    // -----------------------------------------------------------------------

    async fn hash(
        &self,
        file: &UploadFile,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        const MESSAGE: &str = "hashing file locally";
        self.sink.report(Progress::bar(MESSAGE, 0, size));
        let sink = &self.sink;
        let sha512 = file
            .sha512(|hashed| sink.report(Progress::bar(MESSAGE, hashed, size)), cancel)
            .await?;
        debug!(%sha512, "file hashed");
        Ok(sha512)
    }

    async fn upload(
        &self,
        file: &UploadFile,
        info: &UploadInfo,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let model = PartitionModel::from_info(info)?;
        let total = model.total_bytes();
        let end_part = model.end_part_number();
        let concurrency = self.config.engine_concurrency(end_part);
        let message = format!(
            "uploading {} ({total} bytes split into {end_part} part{}), {} part{} at a time",
            file.name(),
            plural(end_part as usize),
            concurrency.upload,
            plural(concurrency.upload),
        );
        info!(uid = %info.uid, total, parts = end_part, "starting upload");

        let handle = UploadEngine::start_with_cancel(
            UploadArgs {
                ranges: model.ranges().to_vec(),
                concurrency,
                retry: self.config.retry_policy(),
                source: file.source(),
                uploader: self.host.part_uploader(info),
            },
            cancel.child_token(),
        );

        let mut progress_rx = handle.progress();
        let mut state_rx = handle.state();
        loop {
            let (finished, failed) = {
                let snapshot = progress_rx.borrow_and_update();
                (snapshot.finished_bytes(), !snapshot.errored.is_empty())
            };
            let text = if failed {
                "upload failed, waiting for in-progress uploads to settle"
            } else {
                message.as_str()
            };
            self.sink.report(Progress::bar(text, finished, total));

            if state_rx.borrow_and_update().is_terminal() {
                break;
            }
            tokio::select! {
                changed = progress_rx.changed() => if changed.is_err() { break },
                changed = state_rx.changed() => if changed.is_err() { break },
            }
        }

        match handle.finish().await {
            EngineState::Success => Ok(()),
            _ if cancel.is_cancelled() => Err(UploadError::Cancelled),
            state => {
                let errored = progress_rx.borrow().errored_parts();
                Err(UploadError::Engine(format!(
                    "engine ended in {state:?} with {errored} of {end_part} parts errored"
                )))
            }
        }
    }

    /// Follows the processing jobs. Returns how long to poll afterwards.
    async fn process(
        &self,
        file: &UploadFile,
        job: JobRef,
        cancel: &CancellationToken,
    ) -> Result<Duration, UploadError> {
        self.sink
            .report(Progress::spinner("connecting to processing job progress report"));
        // Jobs from an earlier run of this orchestrator are not part of this upload.
        self.jobs.clear();

        let tracker = JobProgressTracker::new(self.host.job_connector(), self.jobs.clone());
        let mut jobs_rx = self.jobs.subscribe();
        let tracking = tracker.track(
            vec![NamedJob {
                name: file.name(),
                job,
            }],
            cancel,
        );
        tokio::pin!(tracking);

        let result = loop {
            tokio::select! {
                result = &mut tracking => break result,
                Ok(()) = jobs_rx.changed() => {
                    jobs_rx.mark_unchanged();
                    if let Some(job) = self.jobs.earliest() {
                        self.sink.report(job.progress);
                    }
                }
            }
        };

        match result {
            Ok(summary) if summary.all_succeeded() => {
                info!(jobs = summary.total(), "processing finished");
                Ok(self.config.polling.after_processing_timeout())
            }
            Ok(summary) => {
                warn!(failed = ?summary.failed, "processing job failed");
                Err(UploadError::ProcessingFailed)
            }
            Err(JobError::TooManyFailures(uid)) => {
                warn!(job = %uid, "lost processing job progress, falling back to polling");
                Ok(self.config.polling.timeout())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn poll(
        &self,
        sha512: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessedItem, UploadError> {
        let polling = self.config.polling;
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;
        let mut consecutive_errors = 0u32;

        loop {
            self.sink.report(Progress::spinner(poll_message(
                polling.interval_secs,
                polls,
                consecutive_errors,
            )));
            if Instant::now() >= deadline {
                return Err(UploadError::PollTimeout);
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                polled = tokio::time::timeout_at(deadline, self.host.poll_processed(sha512)) => polled,
            };
            let Ok(result) = polled else {
                return Err(UploadError::PollTimeout);
            };
            polls += 1;

            match result {
                Ok(Some(item)) => return Ok(item),
                Ok(None) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(consecutive_errors, error = %e, "poll failed");
                    if consecutive_errors >= polling.max_consecutive_errors {
                        return Err(UploadError::PollFailed(e.to_string()));
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep_until(deadline.min(Instant::now() + polling.interval())) => {}
            }
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn poll_message(interval_secs: u64, polls: u32, consecutive_errors: u32) -> String {
    if consecutive_errors > 0 {
        format!("polling every {interval_secs}s ({polls}, {consecutive_errors} consecutive errors)")
    } else {
        format!("polling every {interval_secs}s ({polls})")
    }
}
