use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use partflow_collections::OrderedDict;
use partflow_protocol::{Part, PartRange};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::{EngineState, InFlightPart, RetryStats, UploadProgress, WaitingPart};
use crate::ranges::RangeList;
use crate::retry::{Concurrency, RetryPolicy};
use crate::source::{BoxFuture, PartPayload, PartSource, PartUploader, UploadOutcome};
use crate::TransferError;

/// Everything an engine needs to upload a set of parts.
#[derive(Clone)]
pub struct UploadArgs {
    pub ranges: Vec<PartRange>,
    pub concurrency: Concurrency,
    pub retry: RetryPolicy,
    pub source: Arc<dyn PartSource>,
    pub uploader: Arc<dyn PartUploader>,
}

/// Entry point for running uploads.
pub struct UploadEngine;

impl UploadEngine {
    /// Spawns the driver task for `args` and returns its handle.
    pub fn start(args: UploadArgs) -> UploadHandle {
        Self::start_with_cancel(args, CancellationToken::new())
    }

    /// Like [`start`](Self::start), cancelled when `cancel` fires.
    pub fn start_with_cancel(args: UploadArgs, cancel: CancellationToken) -> UploadHandle {
        let driver = Driver::new(args, cancel.clone());
        let progress = driver.progress_tx.subscribe();
        let state = driver.state_tx.subscribe();
        let task = tokio::spawn(driver.run());
        UploadHandle {
            progress,
            state,
            cancel,
            task,
        }
    }
}

/// Handle to a running upload.
pub struct UploadHandle {
    progress: watch::Receiver<UploadProgress>,
    state: watch::Receiver<EngineState>,
    cancel: CancellationToken,
    task: JoinHandle<EngineState>,
}

impl UploadHandle {
    /// Live bucket snapshots.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Requests cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the engine to reach a terminal state.
    pub async fn finish(self) -> EngineState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "upload engine task failed");
                EngineState::Error
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Acquiring {
    part: Part,
    /// Set once the fetch completed; the part then waits for an upload slot.
    data: Option<Bytes>,
}

struct Uploading {
    part: Part,
    data: Bytes,
    retry_counter: u32,
}

struct Waiting {
    part: Part,
    data: Bytes,
    retry_counter: u32,
    retry_at: Instant,
}

type FetchResult = (u32, Result<Bytes, TransferError>);
type AttemptResult = (u32, Result<UploadOutcome, TransferError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFor {
    /// Any settled operation or the earliest retry deadline.
    Anything,
    /// Only a settled upload. Fetches keep progressing meanwhile.
    UploadSlot,
}

/// Owns every bucket. All state changes happen on the driver task.
struct Driver {
    concurrency: Concurrency,
    retry: RetryPolicy,
    source: Arc<dyn PartSource>,
    uploader: Arc<dyn PartUploader>,

    remaining: RangeList,
    acquiring: BTreeMap<u32, Acquiring>,
    uploading: BTreeMap<u32, Uploading>,
    waiting: OrderedDict<u32, Waiting>,
    finished: RangeList,
    errored: RangeList,
    retried: RetryStats,

    fetches: FuturesUnordered<BoxFuture<FetchResult>>,
    attempts: FuturesUnordered<BoxFuture<AttemptResult>>,
    settled: Vec<AttemptResult>,
    fetch_failures: Vec<(u32, TransferError)>,

    cancel: CancellationToken,
    progress_tx: watch::Sender<UploadProgress>,
    state_tx: watch::Sender<EngineState>,
}

impl Driver {
    fn new(args: UploadArgs, cancel: CancellationToken) -> Self {
        let remaining = RangeList::from_ranges(args.ranges);
        let initial = UploadProgress {
            remaining: remaining.as_slice().to_vec(),
            ..Default::default()
        };
        let (progress_tx, _) = watch::channel(initial);
        let (state_tx, _) = watch::channel(EngineState::Running);

        Self {
            concurrency: args.concurrency.clamped(),
            retry: args.retry,
            source: args.source,
            uploader: args.uploader,
            remaining,
            acquiring: BTreeMap::new(),
            uploading: BTreeMap::new(),
            waiting: OrderedDict::new(),
            finished: RangeList::new(),
            errored: RangeList::new(),
            retried: RetryStats::default(),
            fetches: FuturesUnordered::new(),
            attempts: FuturesUnordered::new(),
            settled: Vec::new(),
            fetch_failures: Vec::new(),
            cancel,
            progress_tx,
            state_tx,
        }
    }

    async fn run(mut self) -> EngineState {
        debug!(
            parts = self.remaining.part_count(),
            bytes = self.remaining.total_bytes(),
            upload_slots = self.concurrency.upload,
            acquire_slots = self.concurrency.acquire_data,
            "upload engine started"
        );

        loop {
            if self.cancel.is_cancelled() {
                return self.fail_everything("cancelled");
            }

            self.collect_ready();

            if let Err(reason) = self.sweep_uploading() {
                return self.fail_everything(&reason);
            }

            if self.sweep_waiting_to_retry() {
                self.publish();
                self.wait(WaitFor::UploadSlot).await;
                continue;
            }

            if let Err(reason) = self.sweep_acquiring_data() {
                return self.fail_everything(&reason);
            }

            self.sweep_remaining();
            self.publish();

            if self.uploading.len() >= self.concurrency.upload {
                self.wait(WaitFor::UploadSlot).await;
                continue;
            }

            if self.uploading.is_empty() && self.acquiring.is_empty() && self.waiting.is_empty() {
                if !self.remaining.is_empty() {
                    return self.fail_everything("no progress possible with parts remaining");
                }
                return self.succeed();
            }

            self.wait(WaitFor::Anything).await;
        }
    }

    /// Moves already-settled operations into the driver's queues without
    /// waiting.
    fn collect_ready(&mut self) {
        while let Some(Some(result)) = self.attempts.next().now_or_never() {
            self.settled.push(result);
        }
        while let Some(Some(result)) = self.fetches.next().now_or_never() {
            self.record_fetch(result);
        }
    }

    fn record_fetch(&mut self, (number, result): FetchResult) {
        match result {
            Ok(data) => {
                if let Some(entry) = self.acquiring.get_mut(&number) {
                    debug!(part = number, bytes = data.len(), "part data acquired");
                    entry.data = Some(data);
                }
            }
            Err(e) => self.fetch_failures.push((number, e)),
        }
    }

    fn sweep_uploading(&mut self) -> Result<(), String> {
        for (number, result) in std::mem::take(&mut self.settled) {
            let Some(entry) = self.uploading.remove(&number) else {
                continue;
            };

            let outcome = result.unwrap_or_else(|e| {
                warn!(part = number, error = %e, "upload attempt errored");
                UploadOutcome::NonRetryableError
            });

            match outcome {
                UploadOutcome::Success => {
                    debug!(part = number, "part uploaded");
                    self.finished.insert_part(entry.part);
                }
                UploadOutcome::RetryableError { min_retry }
                    if entry.retry_counter < self.retry.max =>
                {
                    let delay = self.retry.backoff(entry.retry_counter).max(min_retry);
                    let retry_counter = entry.retry_counter + 1;

                    self.retried.bytes += entry.part.len();
                    self.retried.parts += 1;
                    self.retried.highest_counter = self.retried.highest_counter.max(retry_counter);

                    warn!(
                        part = number,
                        retry_counter,
                        delay_ms = delay.as_millis() as u64,
                        "part upload failed, retrying"
                    );
                    self.waiting.insert_sorted_by(
                        number,
                        Waiting {
                            part: entry.part,
                            data: entry.data,
                            retry_counter,
                            retry_at: Instant::now() + delay,
                        },
                        |w| w.retry_at,
                    );
                }
                _ => {
                    self.errored.insert_part(entry.part);
                    return Err(format!(
                        "part {number} failed after {} attempt(s)",
                        entry.retry_counter + 1
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if a retry is due but every upload slot is taken.
    fn sweep_waiting_to_retry(&mut self) -> bool {
        let now = Instant::now();
        loop {
            let due = matches!(self.waiting.front(), Some((_, w)) if w.retry_at <= now);
            if !due {
                return false;
            }
            if self.uploading.len() >= self.concurrency.upload {
                return true;
            }
            let Some((_, w)) = self.waiting.pop_front() else {
                return false;
            };
            self.begin_upload(w.part, w.data, w.retry_counter);
        }
    }

    fn sweep_acquiring_data(&mut self) -> Result<(), String> {
        if let Some((number, e)) = self.fetch_failures.pop() {
            return Err(format!("failed to acquire data for part {number}: {e}"));
        }

        while self.uploading.len() < self.concurrency.upload {
            let ready = self
                .acquiring
                .iter()
                .find(|(_, a)| a.data.is_some())
                .map(|(n, _)| *n);
            let Some(number) = ready else {
                break;
            };
            let Some(Acquiring {
                part,
                data: Some(data),
            }) = self.acquiring.remove(&number)
            else {
                break;
            };
            self.begin_upload(part, data, 0);
        }
        Ok(())
    }

    fn sweep_remaining(&mut self) {
        while self.acquiring.len() < self.concurrency.acquire_data {
            let Some(part) = self.remaining.shift_part() else {
                break;
            };
            self.acquiring.insert(part.number, Acquiring { part, data: None });
            let fetch = self.source.get_data(part);
            self.fetches
                .push(Box::pin(async move { (part.number, fetch.await) }));
        }
    }

    fn begin_upload(&mut self, part: Part, data: Bytes, retry_counter: u32) {
        debug!(part = part.number, retry_counter, "uploading part");
        let attempt = self.uploader.try_upload(PartPayload {
            part,
            data: data.clone(),
            retry_counter,
        });
        self.attempts
            .push(Box::pin(async move { (part.number, attempt.await) }));
        self.uploading.insert(
            part.number,
            Uploading {
                part,
                data,
                retry_counter,
            },
        );
    }

    async fn wait(&mut self, mode: WaitFor) {
        let retry_at = match mode {
            WaitFor::Anything => self.waiting.front().map(|(_, w)| w.retry_at),
            WaitFor::UploadSlot => None,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            Some(result) = self.attempts.next(), if !self.attempts.is_empty() => {
                self.settled.push(result);
            }
            Some(result) = self.fetches.next(), if !self.fetches.is_empty() => {
                self.record_fetch(result);
            }
            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {}
        }
    }

    /// Cancels all in-flight work and moves every unfinished part to errored.
    fn fail_everything(&mut self, reason: &str) -> EngineState {
        // Dropping the futures cancels them.
        self.attempts = FuturesUnordered::new();
        self.fetches = FuturesUnordered::new();
        self.settled.clear();
        self.fetch_failures.clear();

        for (_, entry) in std::mem::take(&mut self.acquiring) {
            self.errored.insert_part(entry.part);
        }
        for (_, entry) in std::mem::take(&mut self.uploading) {
            self.errored.insert_part(entry.part);
        }
        for (_, entry) in self.waiting.drain() {
            self.errored.insert_part(entry.part);
        }
        while let Some(range) = self.remaining.pop_range() {
            self.errored.insert(range);
        }

        warn!(
            reason,
            finished = self.finished.part_count(),
            errored = self.errored.part_count(),
            "upload engine failed"
        );
        self.publish();
        self.state_tx.send_replace(EngineState::Error);
        EngineState::Error
    }

    fn succeed(&mut self) -> EngineState {
        info!(
            parts = self.finished.part_count(),
            bytes = self.finished.total_bytes(),
            retried_parts = self.retried.parts,
            "upload engine finished"
        );
        self.publish();
        self.state_tx.send_replace(EngineState::Success);
        EngineState::Success
    }

    fn snapshot(&self) -> UploadProgress {
        UploadProgress {
            remaining: self.remaining.as_slice().to_vec(),
            acquiring_data: self.acquiring.values().map(|a| a.part).collect(),
            uploading: self
                .uploading
                .values()
                .map(|u| InFlightPart {
                    part: u.part,
                    retry_counter: u.retry_counter,
                })
                .collect(),
            waiting_to_retry: self
                .waiting
                .values()
                .map(|w| WaitingPart {
                    part: w.part,
                    retry_counter: w.retry_counter,
                    retry_at: w.retry_at,
                })
                .collect(),
            finished: self.finished.as_slice().to_vec(),
            errored: self.errored.as_slice().to_vec(),
            retried: self.retried,
        }
    }

    fn publish(&self) {
        self.progress_tx.send_replace(self.snapshot());
    }
}
