// Progress - projects (step, sub-progress) onto a monotonic fraction
use super::state::{Step, TaskState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Progress band for a step: `(start, end)`. The sub-progress fraction of a
/// step is scaled into its band, and every band ends at or before the next
/// step's start, so projection never decreases as steps advance.
fn band(step: Step) -> (f64, f64) {
    match step {
        Step::Init => (0.02, 0.02),
        Step::Writing => (0.10, 0.10),
        Step::Imaging => (0.30, 0.50),
        Step::Animating => (0.55, 0.70),
        Step::Composing => (0.70, 0.70),
        Step::Narrating => (0.85, 0.85),
        Step::AddingAudio => (0.95, 0.95),
        Step::Done => (1.0, 1.0),
        Step::Failed => (0.0, 0.0),
    }
}

/// Highest value reported before the task is done.
pub const MAX_IN_FLIGHT: f64 = 0.99;

/// Stateless projection of a step and its sub-progress.
pub fn project(step: Step, sub_progress: f64) -> f64 {
    if step == Step::Done {
        return 1.0;
    }
    let (start, end) = band(step);
    let sub = if sub_progress.is_finite() { sub_progress.clamp(0.0, 1.0) } else { 0.0 };
    (start + sub * (end - start)).min(end).min(MAX_IN_FLIGHT)
}

/// Per-task projector that never reports a lower value than before.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    last: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, step: Step, sub_progress: f64) -> f64 {
        self.last = self.last.max(project(step, sub_progress));
        self.last
    }

    pub fn current(&self) -> f64 {
        self.last
    }
}

/// Progress update emitted by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub step: Step,
    pub sub_progress: f64,
    pub progress: f64,
    pub message: String,
    /// Full state after a stage transition; absent for per-unit updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Box<TaskState>>,
}

impl ProgressUpdate {
    pub fn new(task_id: String, step: Step, sub_progress: f64, progress: f64, message: String) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            step,
            sub_progress,
            progress,
            message,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, state: &TaskState) -> Self {
        self.snapshot = Some(Box::new(state.clone()));
        self
    }
}

/// Receives progress updates; must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);
}

/// Discards everything.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Writes updates to the log.
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, update: ProgressUpdate) {
        tracing::info!(
            task_id = %update.task_id,
            step = %update.step,
            "📊 {:>5.1}% {}",
            update.progress * 100.0,
            update.message
        );
    }
}

/// Forwards updates into an unbounded channel for a streaming consumer.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, update: ProgressUpdate) {
        if let Err(e) = self.sender.send(update) {
            tracing::warn!("Progress receiver dropped for task {}", e.0.task_id);
        }
    }
}

/// Couples one task's tracker with the observer, so every emitted value
/// goes through the monotonic projection.
pub struct ProgressReporter {
    task_id: String,
    observer: Arc<dyn ProgressObserver>,
    tracker: Mutex<ProgressTracker>,
}

impl ProgressReporter {
    pub fn new(task_id: String, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            task_id,
            observer,
            tracker: Mutex::new(ProgressTracker::new()),
        }
    }

    /// Projects and emits while holding the tracker lock, so observers
    /// receive values in projection order. Observers must not block.
    fn emit(&self, step: Step, sub_progress: f64, message: String, state: Option<&TaskState>) {
        let mut tracker = self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let progress = tracker.observe(step, sub_progress);
        let mut update = ProgressUpdate::new(self.task_id.clone(), step, sub_progress, progress, message);
        if let Some(state) = state {
            update = update.with_snapshot(state);
        }
        self.observer.on_progress(update);
    }

    /// Per-unit update inside a stage.
    pub fn report(&self, step: Step, sub_progress: f64, message: impl Into<String>) {
        self.emit(step, sub_progress, message.into(), None);
    }

    /// Stage transition, carrying the full state.
    pub fn snapshot(&self, state: &TaskState, message: impl Into<String>) {
        self.emit(state.step(), 0.0, message.into(), Some(state));
    }

    pub fn current(&self) -> f64 {
        self.tracker.lock().map(|t| t.current()).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: [Step; 8] = [
        Step::Init,
        Step::Writing,
        Step::Imaging,
        Step::Animating,
        Step::Composing,
        Step::Narrating,
        Step::AddingAudio,
        Step::Done,
    ];

    #[test]
    fn test_bands_do_not_overlap() {
        for pair in ORDER.windows(2) {
            let end_of_current = project(pair[0], 1.0);
            let start_of_next = project(pair[1], 0.0);
            assert!(
                end_of_current <= start_of_next,
                "{} ends at {} after {} starts at {}",
                pair[0],
                end_of_current,
                pair[1],
                start_of_next
            );
        }
    }

    #[test]
    fn test_only_done_reaches_one() {
        for step in ORDER.iter().filter(|s| **s != Step::Done) {
            assert!(project(*step, 1.0) < 1.0);
        }
        assert_eq!(project(Step::Done, 0.0), 1.0);
    }

    #[test]
    fn test_tracker_is_monotonic_through_failure() {
        let mut tracker = ProgressTracker::new();
        let a = tracker.observe(Step::Imaging, 0.5);
        let b = tracker.observe(Step::Imaging, 0.2);
        let c = tracker.observe(Step::Failed, 0.0);
        assert!((a - 0.4).abs() < 1e-9);
        assert_eq!(b, a);
        assert_eq!(c, a);
    }

    #[test]
    fn test_sub_progress_is_clamped() {
        assert_eq!(project(Step::Animating, 7.0), project(Step::Animating, 1.0));
        assert_eq!(project(Step::Animating, f64::NAN), project(Step::Animating, 0.0));
    }

    #[tokio::test]
    async fn test_channel_observer_delivers() {
        let (observer, mut rx) = ChannelObserver::channel();
        observer.on_progress(ProgressUpdate::new("t".into(), Step::Writing, 0.0, 0.1, "writing".into()));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.step, Step::Writing);
        assert!(got.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_reporter_never_regresses() {
        let (observer, mut rx) = ChannelObserver::channel();
        let reporter = ProgressReporter::new("t".into(), Arc::new(observer));
        reporter.report(Step::Imaging, 1.0, "all images");
        reporter.report(Step::Imaging, 0.5, "late straggler");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.progress >= first.progress);
        assert_eq!(reporter.current(), first.progress);
    }

    #[test]
    fn test_tracing_observer_behind_reporter() {
        let reporter = ProgressReporter::new("t".into(), Arc::new(TracingObserver));
        reporter.report(Step::Animating, 0.5, "clip 1/2");
        reporter.report(Step::Imaging, 1.0, "late image");
        assert!((reporter.current() - project(Step::Animating, 0.5)).abs() < 1e-9);
    }
}
