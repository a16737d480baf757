use crate::clock::Clock;
use crate::domain::TimerRecovery;
use crate::store::TaskStore;
use tracing::{info, warn};

/// Per-task elapsed-time accounting robust to restarts and clock skew.
///
/// Every operation is a no-op on an invalid path rather than an error.
pub struct TimerEngine<C: Clock> {
    clock: C,
}

impl<C: Clock> TimerEngine<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Start the timer for the task at `path`. No-op if already running,
    /// completed, or the path is stale.
    pub fn start(&self, store: &mut TaskStore, path: &[usize]) {
        let now = self.clock.now_unix();
        if let Some(task) = store.task_at_mut(path) {
            if task.start_timer(now) {
                info!(title = %task.title, "Started timer");
                store.mark_changed();
            }
        }
    }

    /// Stop the timer, folding elapsed time into the accumulated total.
    pub fn stop(&self, store: &mut TaskStore, path: &[usize]) {
        let now = self.clock.now_unix();
        if let Some(task) = store.task_at_mut(path) {
            if task.stop_timer(now) {
                info!(title = %task.title, total = task.timer, "Stopped timer");
                store.mark_changed();
            }
        }
    }

    /// Zero the timer (stopping it first if running).
    pub fn reset(&self, store: &mut TaskStore, path: &[usize]) {
        if let Some(task) = store.task_at_mut(path) {
            if task.reset_timer() {
                info!(title = %task.title, "Reset timer");
                store.mark_changed();
            }
        }
    }

    /// Live timer value for display polling; pure read, no side effect.
    pub fn current_value(&self, store: &TaskStore, path: &[usize]) -> Option<f64> {
        let now = self.clock.now_unix();
        store.task_at(path).map(|t| t.current_timer_value(now))
    }

    /// Reconcile every persisted running timer (recursively, subtasks
    /// included) against wall-clock time elapsed while the process was not
    /// running. Must run once after load, before anything reads timer state.
    pub fn reconcile_on_load(&self, store: &mut TaskStore) {
        let now = self.clock.now_unix();
        let mut resumed = 0usize;
        let mut touched = false;
        store.for_each_task_mut(|task| match task.reconcile_timer(now) {
            TimerRecovery::Resumed => {
                resumed += 1;
                touched = true;
            }
            TimerRecovery::SkewCorrected => {
                warn!(title = %task.title, "Corrected timer start stamp (clock skew)");
                touched = true;
            }
            TimerRecovery::ForceStopped => {
                warn!(title = %task.title, "Stopped timer with missing start stamp on load");
                touched = true;
            }
            TimerRecovery::NotRunning => {}
        });
        if resumed > 0 {
            info!(resumed, "Resumed timers across restart");
        }
        if touched {
            store.mark_changed();
        }
    }
}

/// Format float seconds as `HH:MM:SS`, truncating fractions and clamping
/// negatives to zero.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
