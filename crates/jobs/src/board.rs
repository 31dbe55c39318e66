use std::sync::Mutex;

use chrono::{DateTime, Utc};
use partflow_collections::OrderedDict;
use partflow_protocol::Progress;
use tokio::sync::watch;

/// A tracked job as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub uid: String,
    pub name: String,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    /// `Some(true)` succeeded, `Some(false)` failed, `None` still running.
    pub result: Option<bool>,
}

/// Receives job updates from a tracker.
pub trait JobSink: Send + Sync {
    /// Latest progress of a job. The first call for a uid creates the job.
    fn update_progress(&self, uid: &str, name: &str, progress: Progress);

    /// Final result of a job.
    fn set_result(&self, uid: &str, success: bool);
}

/// Jobs ordered by start time, published as whole snapshots.
pub struct JobBoard {
    jobs: Mutex<OrderedDict<String, Job>>,
    snapshot_tx: watch::Sender<Vec<Job>>,
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBoard {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        Self {
            jobs: Mutex::new(OrderedDict::new()),
            snapshot_tx,
        }
    }

    /// Receiver for complete snapshots, sent after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Job>> {
        self.snapshot_tx.subscribe()
    }

    /// Current jobs, earliest first.
    pub fn snapshot(&self) -> Vec<Job> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn get(&self, uid: &str) -> Option<Job> {
        self.snapshot_tx
            .borrow()
            .iter()
            .find(|j| j.uid == uid)
            .cloned()
    }

    /// The job that started first.
    pub fn earliest(&self) -> Option<Job> {
        self.snapshot_tx.borrow().first().cloned()
    }

    /// Forgets every job.
    pub fn clear(&self) {
        self.mutate(|jobs| jobs.clear());
    }

    /// Applies `f` and publishes the result in one step, so subscribers
    /// never observe a partial update.
    fn mutate<R>(&self, f: impl FnOnce(&mut OrderedDict<String, Job>) -> R) -> R {
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = f(&mut jobs);
        self.snapshot_tx
            .send_replace(jobs.values().cloned().collect());
        out
    }
}

impl JobSink for JobBoard {
    fn update_progress(&self, uid: &str, name: &str, progress: Progress) {
        self.mutate(|jobs| {
            let key = uid.to_string();
            match jobs.get_mut(&key) {
                Some(job) => job.progress = progress,
                None => {
                    let job = Job {
                        uid: key.clone(),
                        name: name.to_string(),
                        progress,
                        started_at: Utc::now(),
                        result: None,
                    };
                    jobs.insert_sorted_by(key, job, |j| j.started_at);
                }
            }
        });
    }

    fn set_result(&self, uid: &str, success: bool) {
        self.mutate(|jobs| {
            if let Some(job) = jobs.get_mut(&uid.to_string()) {
                job.result = Some(success);
            }
        });
    }
}
