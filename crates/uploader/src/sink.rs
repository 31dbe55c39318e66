use partflow_protocol::Progress;
use tokio::sync::watch;

/// Receives the orchestrator's user-facing progress.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl ProgressSink for watch::Sender<Progress> {
    fn report(&self, progress: Progress) {
        self.send_replace(progress);
    }
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        (self.0)(progress)
    }
}
