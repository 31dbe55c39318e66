use std::collections::HashMap;
use std::sync::Arc;

use partflow_protocol::{ClientMessage, JobEvent, JobRef, Progress, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::board::JobSink;
use crate::breaker::FailureBreaker;
use crate::channel::{JobChannel, JobConnector};
use crate::JobError;

/// A job to track, with the name shown for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedJob {
    pub name: String,
    pub job: JobRef,
}

/// Final results of a tracking operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl TrackSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// What per-job tasks report to the tracker driver.
#[derive(Debug)]
enum TrackerEvent {
    Progress { uid: String, progress: Progress },
    Spawned(NamedJob),
    Final { uid: String, success: bool },
}

/// Tracks a tree of jobs until every job is final.
pub struct JobProgressTracker {
    connector: Arc<dyn JobConnector>,
    sink: Arc<dyn JobSink>,
}

impl JobProgressTracker {
    pub fn new(connector: Arc<dyn JobConnector>, sink: Arc<dyn JobSink>) -> Self {
        Self { connector, sink }
    }

    /// Tracks `initial` and every job they spawn.
    ///
    /// The first fatal per-job error stops every other connection and is
    /// returned. Cancelling `cancel` closes all connections and returns
    /// [`JobError::Cancelled`] without marking jobs as final.
    pub async fn track(
        &self,
        initial: Vec<NamedJob>,
        cancel: &CancellationToken,
    ) -> Result<TrackSummary, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let tasks_cancel = cancel.child_token();
        let (events_tx, mut events_rx) = mpsc::channel::<TrackerEvent>(256);
        let mut tasks: JoinSet<(String, Result<(), JobError>)> = JoinSet::new();
        let mut registry: HashMap<String, String> = HashMap::new();
        let mut summary = TrackSummary::default();

        for job in initial {
            self.spawn_job(job, &mut registry, &mut tasks, &events_tx, &tasks_cancel);
        }

        let result = loop {
            while let Ok(event) = events_rx.try_recv() {
                self.apply(
                    event,
                    &mut registry,
                    &mut tasks,
                    &mut summary,
                    &events_tx,
                    &tasks_cancel,
                );
            }
            if registry.is_empty() {
                break Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(JobError::Cancelled),
                Some(event) = events_rx.recv() => {
                    self.apply(
                        event,
                        &mut registry,
                        &mut tasks,
                        &mut summary,
                        &events_tx,
                        &tasks_cancel,
                    );
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((uid, Ok(()))) => {
                        registry.remove(&uid);
                    }
                    Ok((uid, Err(e))) => {
                        warn!(job = %uid, error = %e, "job tracking failed");
                        break Err(e);
                    }
                    Err(e) => {
                        break Err(JobError::Protocol(format!("job task failed: {e}")));
                    }
                },
            }
        };

        tasks_cancel.cancel();
        tasks.shutdown().await;

        result.map(|()| {
            info!(
                succeeded = summary.succeeded.len(),
                failed = summary.failed.len(),
                "job tracking finished"
            );
            summary
        })
    }

    fn apply(
        &self,
        event: TrackerEvent,
        registry: &mut HashMap<String, String>,
        tasks: &mut JoinSet<(String, Result<(), JobError>)>,
        summary: &mut TrackSummary,
        events_tx: &mpsc::Sender<TrackerEvent>,
        cancel: &CancellationToken,
    ) {
        match event {
            TrackerEvent::Progress { uid, progress } => {
                let Some(name) = registry.get(&uid) else {
                    return;
                };
                self.sink.update_progress(&uid, name, progress);
            }
            TrackerEvent::Spawned(job) => {
                debug!(job = %job.job.uid, name = %job.name, "job spawned");
                self.spawn_job(job, registry, tasks, events_tx, cancel);
            }
            TrackerEvent::Final { uid, success } => {
                debug!(job = %uid, success, "job finished");
                registry.remove(&uid);
                self.sink.set_result(&uid, success);
                if success {
                    summary.succeeded.push(uid);
                } else {
                    summary.failed.push(uid);
                }
            }
        }
    }

    fn spawn_job(
        &self,
        job: NamedJob,
        registry: &mut HashMap<String, String>,
        tasks: &mut JoinSet<(String, Result<(), JobError>)>,
        events_tx: &mpsc::Sender<TrackerEvent>,
        cancel: &CancellationToken,
    ) {
        if registry.contains_key(&job.job.uid) {
            return;
        }
        registry.insert(job.job.uid.clone(), job.name);

        let uid = job.job.uid.clone();
        let connector = Arc::clone(&self.connector);
        let events_tx = events_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = track_individual_job(job.job, connector, events_tx, cancel).await;
            (uid, result)
        });
    }
}

/// Follows one job until it is final, reconnecting after failures until
/// the breaker trips.
async fn track_individual_job(
    job: JobRef,
    connector: Arc<dyn JobConnector>,
    events_tx: mpsc::Sender<TrackerEvent>,
    cancel: CancellationToken,
) -> Result<(), JobError> {
    let mut breaker = FailureBreaker::new();
    report(&events_tx, &job, Progress::spinner("connecting")).await?;

    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = run_connection(&job, connector.as_ref(), &events_tx) => result,
        };

        match attempt {
            Ok(success) => {
                events_tx
                    .send(TrackerEvent::Final {
                        uid: job.uid.clone(),
                        success,
                    })
                    .await
                    .map_err(|_| JobError::Cancelled)?;
                return Ok(());
            }
            Err(JobError::Cancelled) => return Err(JobError::Cancelled),
            Err(e) => {
                let tripped = breaker.record_failure(Instant::now());
                warn!(
                    job = %job.uid,
                    error = %e,
                    recent_failures = breaker.recent_failures(),
                    "job connection failed"
                );
                if tripped {
                    return Err(JobError::TooManyFailures(job.uid.clone()));
                }
                report(&events_tx, &job, Progress::spinner("reconnecting")).await?;
            }
        }
    }
}

async fn report(
    events_tx: &mpsc::Sender<TrackerEvent>,
    job: &JobRef,
    progress: Progress,
) -> Result<(), JobError> {
    events_tx
        .send(TrackerEvent::Progress {
            uid: job.uid.clone(),
            progress,
        })
        .await
        .map_err(|_| JobError::Cancelled)
}

/// One connection attempt. Returns whether the job succeeded.
async fn run_connection(
    job: &JobRef,
    connector: &dyn JobConnector,
    events_tx: &mpsc::Sender<TrackerEvent>,
) -> Result<bool, JobError> {
    let mut channel = connector.connect().await?;
    let result = follow_events(channel.as_mut(), job, events_tx).await;
    channel.close().await;
    result
}

async fn follow_events(
    channel: &mut dyn JobChannel,
    job: &JobRef,
    events_tx: &mpsc::Sender<TrackerEvent>,
) -> Result<bool, JobError> {
    channel.send(ClientMessage::authorize(job)).await?;

    match channel.recv().await {
        Some(Ok(ServerMessage::AuthResponse { success: true })) => {}
        Some(Ok(other)) => return Err(JobError::AuthRejected(format!("{other:?}"))),
        Some(Err(e)) => return Err(e),
        None => return Err(JobError::Closed),
    }

    loop {
        let message = channel.recv().await.ok_or(JobError::Closed)??;
        let ServerMessage::EventBatch { success, data } = message else {
            return Err(JobError::Protocol(
                "unexpected auth_response after authorization".into(),
            ));
        };
        if !success {
            return Err(JobError::BatchFailed);
        }
        let events = data.map(|batch| batch.events).unwrap_or_default();

        for child in events.iter().filter_map(JobEvent::spawned_job) {
            events_tx
                .send(TrackerEvent::Spawned(NamedJob {
                    name: child.name.clone(),
                    job: child.job_ref(),
                }))
                .await
                .map_err(|_| JobError::Cancelled)?;
        }

        let outcome = events.iter().find(|e| e.is_final()).map(JobEvent::succeeded);

        if let Some(last) = events.last() {
            report(events_tx, job, last.display_progress()).await?;
        }

        if let Some(success) = outcome {
            return Ok(success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use partflow_protocol::{EventBatch, EventIndicator, SpawnedJob};

    use crate::board::JobBoard;
    use crate::channel::ChannelFuture;

    /// What a scripted connection does after authorization.
    #[derive(Clone)]
    enum Step {
        Batch(Vec<JobEvent>),
        Fail,
        /// Never sends anything else.
        Hang,
    }

    #[derive(Clone)]
    struct Script {
        auth_ok: bool,
        steps: Vec<Step>,
    }

    struct ScriptedChannel {
        scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
        pending: VecDeque<Step>,
        auth_ok: bool,
        sent_auth: bool,
        closed: Arc<AtomicUsize>,
    }

    impl JobChannel for ScriptedChannel {
        fn send(&mut self, msg: ClientMessage) -> ChannelFuture<'_, Result<(), JobError>> {
            let ClientMessage::Authorize { data } = msg;
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&data.job_uid)
                .and_then(|q| q.pop_front());
            if let Some(script) = script {
                self.auth_ok = script.auth_ok;
                self.pending = script.steps.into();
            }
            Box::pin(async { Ok(()) })
        }

        fn recv(&mut self) -> ChannelFuture<'_, Option<Result<ServerMessage, JobError>>> {
            Box::pin(async move {
                if !self.sent_auth {
                    self.sent_auth = true;
                    return Some(Ok(ServerMessage::AuthResponse {
                        success: self.auth_ok,
                    }));
                }
                match self.pending.pop_front() {
                    Some(Step::Batch(events)) => Some(Ok(ServerMessage::EventBatch {
                        success: true,
                        data: Some(EventBatch { events }),
                    })),
                    Some(Step::Fail) => Some(Err(JobError::Closed)),
                    Some(Step::Hang) => std::future::pending().await,
                    None => None,
                }
            })
        }

        fn close(&mut self) -> ChannelFuture<'_, ()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
        connects: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn script(&self, uid: &str, script: Script) {
            self.scripts
                .lock()
                .unwrap()
                .entry(uid.to_string())
                .or_default()
                .push_back(script);
        }
    }

    impl JobConnector for ScriptedConnector {
        fn connect(&self) -> ChannelFuture<'_, Result<Box<dyn JobChannel>, JobError>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let channel = ScriptedChannel {
                scripts: Arc::clone(&self.scripts),
                pending: VecDeque::new(),
                auth_ok: true,
                sent_auth: false,
                closed: Arc::clone(&self.closed),
            };
            Box::pin(async move { Ok(Box::new(channel) as Box<dyn JobChannel>) })
        }
    }

    fn event(kind: &str, message: &str, indicator: Option<EventIndicator>) -> JobEvent {
        JobEvent {
            kind: kind.into(),
            message: message.into(),
            indicator,
            spawned: None,
        }
    }

    fn spawn(uid: &str) -> JobEvent {
        JobEvent {
            kind: "spawned".into(),
            message: format!("spawned {uid}"),
            indicator: None,
            spawned: Some(SpawnedJob {
                uid: uid.into(),
                jwt: format!("jwt-{uid}"),
                name: format!("job {uid}"),
            }),
        }
    }

    fn succeeded() -> JobEvent {
        event("succeeded", "done", Some(EventIndicator::Final))
    }

    fn ok_script(steps: Vec<Step>) -> Script {
        Script {
            auth_ok: true,
            steps,
        }
    }

    fn named(uid: &str) -> NamedJob {
        NamedJob {
            name: format!("job {uid}"),
            job: JobRef {
                uid: uid.into(),
                jwt: format!("jwt-{uid}"),
            },
        }
    }

    fn tracker(connector: &ScriptedConnector, board: &Arc<JobBoard>) -> JobProgressTracker {
        JobProgressTracker::new(Arc::new(connector.clone()), board.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn job_tree_is_tracked_to_completion() {
        let connector = ScriptedConnector::default();
        connector.script(
            "root",
            ok_script(vec![Step::Batch(vec![spawn("a"), spawn("b"), succeeded()])]),
        );
        for (parent, child) in [("a", "a1"), ("b", "b1")] {
            connector.script(
                parent,
                ok_script(vec![
                    Step::Batch(vec![spawn(child)]),
                    Step::Batch(vec![event(
                        "progress",
                        "working",
                        Some(EventIndicator::Bar { at: 1, of: 2 }),
                    )]),
                    Step::Batch(vec![succeeded()]),
                ]),
            );
            connector.script(
                child,
                ok_script(vec![
                    Step::Batch(vec![event("progress", "started", None)]),
                    Step::Batch(vec![succeeded()]),
                ]),
            );
        }

        let board = Arc::new(JobBoard::new());
        let summary = tracker(&connector, &board)
            .track(vec![named("root")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total(), 5);
        assert!(summary.all_succeeded());

        let jobs = board.snapshot();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().all(|j| j.result == Some(true)));
        assert_eq!(jobs[0].uid, "root");
        assert_eq!(board.get("a1").unwrap().name, "job a1");
        assert_eq!(board.get("root").unwrap().progress, Progress::new("done", None));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_jobs_with_two_children_each() {
        let connector = ScriptedConnector::default();
        connector.script(
            "p",
            ok_script(vec![Step::Batch(vec![spawn("c1"), spawn("c2"), succeeded()])]),
        );
        connector.script("c1", ok_script(vec![Step::Batch(vec![succeeded()])]));
        connector.script(
            "c2",
            ok_script(vec![Step::Batch(vec![event("failed", "boom", None)])]),
        );
        connector.script(
            "q",
            ok_script(vec![Step::Batch(vec![spawn("d1"), spawn("d2")]), Step::Batch(vec![succeeded()])]),
        );
        connector.script("d1", ok_script(vec![Step::Batch(vec![succeeded()])]));
        connector.script("d2", ok_script(vec![Step::Batch(vec![succeeded()])]));

        let board = Arc::new(JobBoard::new());
        let summary = tracker(&connector, &board)
            .track(vec![named("p"), named("q")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total(), 6);
        assert_eq!(summary.failed, vec!["c2".to_string()]);
        assert_eq!(board.get("c2").unwrap().result, Some(false));
        assert_eq!(board.get("c2").unwrap().progress.message, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_spaced_failures() {
        let connector = ScriptedConnector::default();
        // The first connection drops after one batch, the second one
        // sees the job finish.
        connector.script(
            "j",
            ok_script(vec![Step::Batch(vec![event("progress", "p", None)]), Step::Fail]),
        );
        connector.script("j", ok_script(vec![Step::Batch(vec![succeeded()])]));

        let board = Arc::new(JobBoard::new());
        let summary = tracker(&connector, &board)
            .track(vec![named("j")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, vec!["j".to_string()]);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_failures_trip_the_breaker() {
        let connector = ScriptedConnector::default();
        for _ in 0..3 {
            connector.script(
                "j",
                Script {
                    auth_ok: false,
                    steps: Vec::new(),
                },
            );
        }
        connector.script("other", ok_script(vec![Step::Hang]));

        let board = Arc::new(JobBoard::new());
        let err = tracker(&connector, &board)
            .track(vec![named("j"), named("other")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::TooManyFailures(ref uid) if uid == "j"));
        assert_eq!(board.get("j").unwrap().progress.message, "reconnecting");
        assert!(board.get("other").is_none_or(|j| j.result.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_all_connections() {
        let connector = ScriptedConnector::default();
        connector.script("a", ok_script(vec![Step::Hang]));
        connector.script("b", ok_script(vec![Step::Hang]));

        let board = Arc::new(JobBoard::new());
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel();
            })
        };

        let err = tracker(&connector, &board)
            .track(vec![named("a"), named("b")], &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, JobError::Cancelled));
        assert!(board.snapshot().iter().all(|j| j.result.is_none()));
    }

    #[tokio::test]
    async fn follow_events_reports_last_event_without_final_marker() {
        let connector = ScriptedConnector::default();
        connector.script(
            "j",
            ok_script(vec![Step::Batch(vec![
                event("progress", "a", Some(EventIndicator::Spinner)),
                event("progress", "almost", Some(EventIndicator::Final)),
            ])]),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let job = named("j").job;
        let success = run_connection(&job, &connector, &tx).await.unwrap();
        assert!(!success);

        match rx.recv().await.unwrap() {
            TrackerEvent::Progress { uid, progress } => {
                assert_eq!(uid, "j");
                assert_eq!(progress, Progress::new("almost", None));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
