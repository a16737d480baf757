use crate::clock::Clock;
use crate::domain::{Alarm, Task};
use crate::error::{Result, TempoError};
use crate::playback::AlarmSink;
use crate::store::TaskStore;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notice that a scheduled alarm reached its target time, delivered back to
/// the host loop which then calls [`AlarmScheduler::fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub task_id: Uuid,
    pub alarm_id: String,
}

/// Cancellation token for a pending one-shot callback.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimerHandle")
    }
}

/// One-shot scheduling primitive supplied by the host: run a callback after
/// a delay, returning a handle that cancels it.
pub trait AlarmTimer {
    fn schedule_once(&mut self, delay_secs: f64, event: FireEvent) -> Result<TimerHandle>;
}

/// Production timer: a spawned tokio task sleeps until the target and sends
/// the fire event back over the channel the host loop selects on.
pub struct TokioTimer {
    events: mpsc::UnboundedSender<FireEvent>,
}

impl TokioTimer {
    pub fn new(events: mpsc::UnboundedSender<FireEvent>) -> Self {
        Self { events }
    }
}

impl AlarmTimer for TokioTimer {
    fn schedule_once(&mut self, delay_secs: f64, event: FireEvent) -> Result<TimerHandle> {
        // Negative delays fire immediately; NaN and delays beyond Duration's
        // range, which a corrupt target timestamp can produce, are rejected.
        let clamped = if delay_secs < 0.0 { 0.0 } else { delay_secs };
        let delay = std::time::Duration::try_from_secs_f64(clamped)
            .map_err(|e| TempoError::Schedule(format!("Unschedulable delay {delay_secs}: {e}")))?;
        let sender = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(event);
        });
        Ok(TimerHandle::new(move || task.abort()))
    }
}

/// What [`AlarmScheduler::fire`] found when the callback came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Sound is playing; the alarm stays enabled until the user dismisses it.
    Fired,
    /// The owning task was deleted after scheduling; nothing to do.
    TaskGone,
    /// The alarm record was deleted after scheduling; nothing to do.
    AlarmGone,
    /// The alarm was disabled before the callback ran; nothing to do.
    Disabled,
    /// The sound file vanished since arming; the alarm was disabled.
    SoundMissing,
}

/// One-shot wall-clock alarms per task, bridged onto the host's scheduling
/// primitive and re-armed across restarts.
///
/// Lifecycle per alarm: armed (`enabled=true`, callback pending) fires into
/// a notification that stays until explicit dismissal sets `enabled=false`;
/// arming or re-arming an alarm whose time passed or whose sound file is
/// gone disables it instead. Disabled records are kept as history and never
/// re-armed.
pub struct AlarmScheduler<C: Clock> {
    clock: C,
    timer: Box<dyn AlarmTimer>,
    /// Pending callback handles keyed by alarm id. Exclusively owned here:
    /// entries are inserted on arm and removed on cancel or fire.
    scheduled: HashMap<String, TimerHandle>,
}

impl<C: Clock> AlarmScheduler<C> {
    pub fn new(clock: C, timer: Box<dyn AlarmTimer>) -> Self {
        Self {
            clock,
            timer,
            scheduled: HashMap::new(),
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Validate and append a new alarm to the task at `path`, then arm it.
    /// Returns the generated alarm id.
    pub fn create_alarm(
        &mut self,
        store: &mut TaskStore,
        path: &[usize],
        target_unix: f64,
        sound_file: &Path,
    ) -> Result<String> {
        let now = self.clock.now_unix();
        if target_unix <= now {
            return Err(TempoError::InvalidAlarmTime {
                target: target_unix,
                now,
            });
        }
        if !sound_file.exists() {
            return Err(TempoError::MissingResource(sound_file.to_path_buf()));
        }

        let task_index = path.first().copied().unwrap_or(0);
        let len = store.tasks.len();
        let Some(task) = store.task_at_mut(path) else {
            return Err(TempoError::IndexOutOfRange {
                index: task_index,
                len,
            });
        };
        let alarm = Alarm::new(task_index, target_unix, sound_file.to_path_buf());
        let alarm_id = alarm.id.clone();
        let task_id = task.id;
        let title = task.title.clone();
        task.alarms.push(alarm);
        store.mark_changed();

        self.arm(store, task_id, &alarm_id)?;
        info!(alarm_id = %alarm_id, task = %title, target = target_unix, "Created alarm");
        Ok(alarm_id)
    }

    /// Register the one-shot callback for an enabled alarm, replacing any
    /// previously scheduled callback for the same id. An alarm whose target
    /// already passed, whose sound file is gone, or whose scheduling request
    /// is rejected gets disabled instead of staying phantom-armed.
    pub fn arm(&mut self, store: &mut TaskStore, task_id: Uuid, alarm_id: &str) -> Result<()> {
        let now = self.clock.now_unix();

        let Some(task) = store.find_by_id_mut(&task_id) else {
            return Err(TempoError::Schedule(format!(
                "Task owning alarm {alarm_id} no longer exists"
            )));
        };
        let title = task.title.clone();
        let Some(alarm) = task.find_alarm_mut(alarm_id) else {
            return Err(TempoError::Schedule(format!(
                "Alarm {alarm_id} no longer exists on task '{title}'"
            )));
        };
        if !alarm.enabled {
            return Err(TempoError::Schedule(format!(
                "Alarm {alarm_id} is disabled and will not be armed"
            )));
        }

        let target = alarm.target_timestamp_unix;
        let delay = target - now;
        if delay <= 0.0 {
            alarm.enabled = false;
            store.mark_changed();
            warn!(alarm_id, target, "Alarm expired before arming; disabled");
            return Err(TempoError::InvalidAlarmTime { target, now });
        }
        if !alarm.sound_file.exists() {
            let sound = alarm.sound_file.clone();
            alarm.enabled = false;
            store.mark_changed();
            warn!(alarm_id, sound = %sound.display(), "Alarm sound missing; disabled");
            return Err(TempoError::MissingResource(sound));
        }

        let event = FireEvent {
            task_id,
            alarm_id: alarm_id.to_string(),
        };
        match self.timer.schedule_once(delay, event) {
            Ok(handle) => {
                if let Some(previous) = self.scheduled.insert(alarm_id.to_string(), handle) {
                    previous.cancel();
                }
                info!(alarm_id, delay_secs = delay, "Armed alarm");
                Ok(())
            }
            Err(e) => {
                if let Some(task) = store.find_by_id_mut(&task_id) {
                    if let Some(alarm) = task.find_alarm_mut(alarm_id) {
                        alarm.enabled = false;
                    }
                }
                store.mark_changed();
                warn!(alarm_id, error = %e, "Scheduling rejected; alarm disabled");
                Err(e)
            }
        }
    }

    /// Callback entry point once the target time is reached. Re-validates
    /// against the live store: alarms cancelled or deleted since scheduling
    /// abort silently, a vanished sound file disables the alarm, and a
    /// successful fire plays the sound while leaving `enabled=true` until
    /// the user dismisses.
    pub fn fire(
        &mut self,
        store: &mut TaskStore,
        event: &FireEvent,
        sink: &mut dyn AlarmSink,
    ) -> FireOutcome {
        if let Some(handle) = self.scheduled.remove(&event.alarm_id) {
            handle.cancel();
        }

        let Some(task) = store.find_by_id_mut(&event.task_id) else {
            warn!(alarm_id = %event.alarm_id, "Alarm fired for a task that no longer exists");
            return FireOutcome::TaskGone;
        };
        let title = task.title.clone();
        let Some(alarm) = task.find_alarm_mut(&event.alarm_id) else {
            warn!(alarm_id = %event.alarm_id, task = %title, "Alarm fired but its record is gone");
            return FireOutcome::AlarmGone;
        };
        if !alarm.enabled {
            debug!(alarm_id = %event.alarm_id, "Alarm fired but is disabled; ignoring");
            return FireOutcome::Disabled;
        }
        if !alarm.sound_file.exists() {
            let sound = alarm.sound_file.clone();
            alarm.enabled = false;
            store.mark_changed();
            warn!(
                alarm_id = %event.alarm_id,
                task = %title,
                sound = %sound.display(),
                "Alarm sound missing at fire time; disabled"
            );
            return FireOutcome::SoundMissing;
        }

        let sound = alarm.sound_file.clone();
        sink.play(&sound, &title);
        info!(alarm_id = %event.alarm_id, task = %title, "Alarm fired");
        FireOutcome::Fired
    }

    /// User acknowledged a fired (or still-pending) alarm: stop the sound,
    /// disable the record, and drop any callback that is still scheduled.
    pub fn dismiss(
        &mut self,
        store: &mut TaskStore,
        path: &[usize],
        alarm_id: &str,
        sink: &mut dyn AlarmSink,
    ) -> Result<()> {
        sink.stop();
        let len = store.tasks.len();
        let Some(task) = store.task_at_mut(path) else {
            return Err(TempoError::IndexOutOfRange {
                index: path.first().copied().unwrap_or(0),
                len,
            });
        };
        let title = task.title.clone();
        let Some(alarm) = task.find_alarm_mut(alarm_id) else {
            return Err(TempoError::InvalidInput(format!(
                "No alarm {alarm_id} on task '{title}'"
            )));
        };
        alarm.enabled = false;
        store.mark_changed();
        self.cancel(alarm_id);
        info!(alarm_id, task = %title, "Alarm dismissed");
        Ok(())
    }

    /// Drop the scheduled callback for an alarm id if one is pending.
    /// Idempotent: cancelling an unknown or already-fired id is a no-op.
    pub fn cancel(&mut self, alarm_id: &str) -> bool {
        match self.scheduled.remove(alarm_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every scheduled callback owned by a deleted task and its
    /// nested subtasks. The records go away with the subtree itself.
    pub fn cancel_subtree(&mut self, task: &Task) {
        task.for_each(&mut |t| {
            for alarm in &t.alarms {
                if self.cancel(&alarm.id) {
                    info!(alarm_id = %alarm.id, "Cancelled alarm for deleted task");
                }
            }
        });
    }

    /// Remove an alarm record from the task at `path` and cancel its
    /// callback. Returns whether a record was found and removed.
    pub fn delete_alarm(
        &mut self,
        store: &mut TaskStore,
        path: &[usize],
        alarm_id: &str,
    ) -> Result<bool> {
        let len = store.tasks.len();
        let Some(task) = store.task_at_mut(path) else {
            return Err(TempoError::IndexOutOfRange {
                index: path.first().copied().unwrap_or(0),
                len,
            });
        };
        let before = task.alarms.len();
        task.alarms.retain(|a| a.id != alarm_id);
        if task.alarms.len() < before {
            self.cancel(alarm_id);
            store.mark_changed();
            info!(alarm_id, "Deleted alarm");
            Ok(true)
        } else {
            warn!(alarm_id, "Could not find alarm to delete");
            Ok(false)
        }
    }

    /// Walk every task and subtask once after load, disabling stale or
    /// broken enabled alarms and arming the rest. Partial-failure tolerant:
    /// one bad record never blocks arming the others. Must run after the
    /// store is loaded and before anything reads alarm state.
    pub fn rearm_all_on_startup(&mut self, store: &mut TaskStore) {
        let now = self.clock.now_unix();
        let mut stale = 0usize;
        let mut pending: Vec<(Uuid, String)> = Vec::new();

        store.for_each_task_mut(|task| {
            for alarm in &mut task.alarms {
                if !alarm.enabled {
                    continue;
                }
                if !alarm.sound_file.exists() {
                    warn!(
                        alarm_id = %alarm.id,
                        sound = %alarm.sound_file.display(),
                        "Disabling alarm with missing sound file"
                    );
                    alarm.enabled = false;
                    stale += 1;
                } else if alarm.target_timestamp_unix <= now {
                    info!(alarm_id = %alarm.id, "Disabling past alarm");
                    alarm.enabled = false;
                    stale += 1;
                } else {
                    pending.push((task.id, alarm.id.clone()));
                }
            }
        });
        if stale > 0 {
            store.mark_changed();
        }

        let mut armed = 0usize;
        for (task_id, alarm_id) in pending {
            match self.arm(store, task_id, &alarm_id) {
                Ok(()) => armed += 1,
                Err(e) => {
                    warn!(alarm_id = %alarm_id, error = %e, "Failed to re-arm alarm")
                }
            }
        }
        if armed > 0 {
            info!(armed, "Re-armed pending alarms");
        } else {
            debug!("No pending alarms needed re-arming");
        }
    }
}

#[cfg(test)]
impl<C: Clock> AlarmScheduler<C> {
    pub fn is_scheduled(&self, alarm_id: &str) -> bool {
        self.scheduled.contains_key(alarm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::playback::RecordingSink;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ScheduledEntry {
        delay: f64,
        event: FireEvent,
        cancelled: Arc<AtomicBool>,
    }

    impl ScheduledEntry {
        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    /// Timer that records scheduling requests; tests fire them by hand.
    #[derive(Clone, Default)]
    struct ManualTimer {
        log: Rc<RefCell<Vec<ScheduledEntry>>>,
        fail_next: Rc<Cell<bool>>,
    }

    impl AlarmTimer for ManualTimer {
        fn schedule_once(&mut self, delay_secs: f64, event: FireEvent) -> Result<TimerHandle> {
            if self.fail_next.take() {
                return Err(TempoError::Schedule("injected failure".into()));
            }
            let cancelled = Arc::new(AtomicBool::new(false));
            self.log.borrow_mut().push(ScheduledEntry {
                delay: delay_secs,
                event,
                cancelled: Arc::clone(&cancelled),
            });
            Ok(TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst)))
        }
    }

    type Fixture = (
        AlarmScheduler<FixedClock>,
        FixedClock,
        Rc<RefCell<Vec<ScheduledEntry>>>,
        Rc<Cell<bool>>,
    );

    fn fixture() -> Fixture {
        let clock = FixedClock::at(1000.0);
        let timer = ManualTimer::default();
        let log = Rc::clone(&timer.log);
        let fail_next = Rc::clone(&timer.fail_next);
        let scheduler = AlarmScheduler::new(clock.clone(), Box::new(timer));
        (scheduler, clock, log, fail_next)
    }

    fn store_with(titles: &[&str]) -> TaskStore {
        let clock = FixedClock::at(1000.0);
        let mut store = TaskStore::new();
        for title in titles.iter().rev() {
            store.add_task(title, &[], 0, &clock).unwrap();
        }
        store.clear_changed();
        store
    }

    fn sound_in(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("bell.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        path
    }

    #[test]
    fn test_create_alarm_rejects_past_target() {
        let (mut scheduler, _, log, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let err = scheduler
            .create_alarm(&mut store, &[0], 999.0, &sound)
            .unwrap_err();
        assert!(matches!(err, TempoError::InvalidAlarmTime { .. }));
        assert!(store.tasks[0].alarms.is_empty());
        assert!(!store.is_changed());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_create_alarm_rejects_missing_sound() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);

        let err = scheduler
            .create_alarm(&mut store, &[0], 2000.0, Path::new("/no/such/bell.wav"))
            .unwrap_err();
        assert!(matches!(err, TempoError::MissingResource(_)));
        assert!(store.tasks[0].alarms.is_empty());
    }

    #[test]
    fn test_create_alarm_arms_immediately() {
        let (mut scheduler, _, log, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 1065.0, &sound)
            .unwrap();
        assert_eq!(store.tasks[0].alarms.len(), 1);
        assert!(store.tasks[0].alarms[0].enabled);
        assert!(store.is_changed());
        assert!(scheduler.is_scheduled(&alarm_id));

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].delay, 65.0);
        assert_eq!(log[0].event.task_id, store.tasks[0].id);
        assert_eq!(log[0].event.alarm_id, alarm_id);
    }

    #[test]
    fn test_arm_replaces_previous_callback() {
        let (mut scheduler, _, log, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        let task_id = store.tasks[0].id;
        scheduler.arm(&mut store, task_id, &alarm_id).unwrap();

        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert!(log[0].is_cancelled());
        assert!(!log[1].is_cancelled());
        assert_eq!(scheduler.scheduled_count(), 1);
    }

    #[test]
    fn test_schedule_failure_disables_alarm() {
        let (mut scheduler, _, _, fail_next) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        fail_next.set(true);
        let err = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap_err();
        assert!(matches!(err, TempoError::Schedule(_)));
        assert!(!store.tasks[0].alarms[0].enabled);
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[test]
    fn test_fire_plays_sound_and_keeps_enabled() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["Write report"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);
        let mut sink = RecordingSink::default();

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        let event = FireEvent {
            task_id: store.tasks[0].id,
            alarm_id: alarm_id.clone(),
        };

        assert_eq!(scheduler.fire(&mut store, &event, &mut sink), FireOutcome::Fired);
        assert_eq!(sink.played, vec![(sound, "Write report".to_string())]);
        // Stays enabled until the user dismisses.
        assert!(store.tasks[0].alarms[0].enabled);
        assert!(!scheduler.is_scheduled(&alarm_id));
    }

    #[test]
    fn test_fire_aborts_silently_when_task_gone() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);
        let mut sink = RecordingSink::default();

        let event = FireEvent {
            task_id: Uuid::new_v4(),
            alarm_id: "ghost".into(),
        };
        assert_eq!(
            scheduler.fire(&mut store, &event, &mut sink),
            FireOutcome::TaskGone
        );
        assert!(sink.played.is_empty());
        assert!(!store.is_changed());
    }

    #[test]
    fn test_fire_aborts_when_alarm_deleted_or_disabled() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);
        let mut sink = RecordingSink::default();

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        let task_id = store.tasks[0].id;
        let event = FireEvent {
            task_id,
            alarm_id: alarm_id.clone(),
        };

        store.tasks[0].alarms[0].enabled = false;
        assert_eq!(
            scheduler.fire(&mut store, &event, &mut sink),
            FireOutcome::Disabled
        );

        scheduler.delete_alarm(&mut store, &[0], &alarm_id).unwrap();
        assert_eq!(
            scheduler.fire(&mut store, &event, &mut sink),
            FireOutcome::AlarmGone
        );
        assert!(sink.played.is_empty());
    }

    #[test]
    fn test_fire_disables_on_missing_sound() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);
        let mut sink = RecordingSink::default();

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        std::fs::remove_file(&sound).unwrap();

        let event = FireEvent {
            task_id: store.tasks[0].id,
            alarm_id,
        };
        assert_eq!(
            scheduler.fire(&mut store, &event, &mut sink),
            FireOutcome::SoundMissing
        );
        assert!(!store.tasks[0].alarms[0].enabled);
        assert!(sink.played.is_empty());
    }

    #[test]
    fn test_dismiss_disables_and_stops_sound() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);
        let mut sink = RecordingSink::default();

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        scheduler
            .dismiss(&mut store, &[0], &alarm_id, &mut sink)
            .unwrap();

        assert!(!store.tasks[0].alarms[0].enabled);
        assert_eq!(sink.stops, 1);
        assert!(!scheduler.is_scheduled(&alarm_id));
    }

    #[test]
    fn test_delete_alarm_removes_record_and_callback() {
        let (mut scheduler, _, _, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let alarm_id = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        assert!(scheduler.delete_alarm(&mut store, &[0], &alarm_id).unwrap());
        assert!(store.tasks[0].alarms.is_empty());
        assert!(!scheduler.is_scheduled(&alarm_id));

        assert!(!scheduler.delete_alarm(&mut store, &[0], &alarm_id).unwrap());
        assert!(scheduler.delete_alarm(&mut store, &[9], "x").is_err());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut scheduler, _, _, _) = fixture();
        assert!(!scheduler.cancel("never-scheduled"));
        assert!(!scheduler.cancel("never-scheduled"));
    }

    #[test]
    fn test_delete_task_cancels_whole_subtree() {
        let (mut scheduler, clock, _, _) = fixture();
        let mut store = store_with(&["parent"]);
        store.add_task("child", &[0], 0, &clock).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let a = scheduler
            .create_alarm(&mut store, &[0], 2000.0, &sound)
            .unwrap();
        let b = scheduler
            .create_alarm(&mut store, &[0, 0], 3000.0, &sound)
            .unwrap();
        assert_eq!(scheduler.scheduled_count(), 2);

        let removed = store.delete_task(&[], 0).unwrap();
        scheduler.cancel_subtree(&removed);
        assert_eq!(scheduler.scheduled_count(), 0);
        assert!(!scheduler.is_scheduled(&a));
        assert!(!scheduler.is_scheduled(&b));
    }

    #[test]
    fn test_rearm_disables_stale_and_arms_future() {
        let (mut scheduler, _, log, _) = fixture();
        let mut store = store_with(&["stale", "future", "broken"]);
        store.add_task("nested", &[1], 0, &FixedClock::at(1000.0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        store.tasks[0].alarms.push(Alarm::new(0, 900.0, sound.clone()));
        store.tasks[1].alarms.push(Alarm::new(1, 2000.0, sound.clone()));
        store.tasks[1].subtasks[0]
            .alarms
            .push(Alarm::new(1, 2500.0, sound.clone()));
        store.tasks[2]
            .alarms
            .push(Alarm::new(2, 3000.0, PathBuf::from("/gone/bell.wav")));
        store.clear_changed();

        scheduler.rearm_all_on_startup(&mut store);

        // Past target: disabled, no callback produced.
        assert!(!store.tasks[0].alarms[0].enabled);
        assert!(!scheduler.is_scheduled(&store.tasks[0].alarms[0].id));
        // Future targets armed, recursively through subtasks.
        assert!(store.tasks[1].alarms[0].enabled);
        assert!(scheduler.is_scheduled(&store.tasks[1].alarms[0].id));
        assert!(scheduler.is_scheduled(&store.tasks[1].subtasks[0].alarms[0].id));
        // Missing sound: disabled.
        assert!(!store.tasks[2].alarms[0].enabled);
        assert!(store.is_changed());
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_rearm_tolerates_partial_failure() {
        let (mut scheduler, _, _, fail_next) = fixture();
        let mut store = store_with(&["a", "b"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        store.tasks[0].alarms.push(Alarm::new(0, 2000.0, sound.clone()));
        store.tasks[1].alarms.push(Alarm::new(1, 2000.0, sound.clone()));

        // First scheduling request is rejected; the second must still arm.
        fail_next.set(true);
        scheduler.rearm_all_on_startup(&mut store);

        assert!(!store.tasks[0].alarms[0].enabled);
        assert!(store.tasks[1].alarms[0].enabled);
        assert!(scheduler.is_scheduled(&store.tasks[1].alarms[0].id));
        assert_eq!(scheduler.scheduled_count(), 1);
    }

    #[test]
    fn test_rearm_skips_already_disabled() {
        let (mut scheduler, _, log, _) = fixture();
        let mut store = store_with(&["t"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        let mut alarm = Alarm::new(0, 2000.0, sound);
        alarm.enabled = false;
        store.tasks[0].alarms.push(alarm);
        store.clear_changed();

        scheduler.rearm_all_on_startup(&mut store);
        assert!(log.borrow().is_empty());
        assert!(!store.is_changed());
    }

    #[tokio::test]
    async fn test_tokio_timer_rejects_out_of_range_delay() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        let event = FireEvent {
            task_id: Uuid::new_v4(),
            alarm_id: "a".into(),
        };
        assert!(timer.schedule_once(1.0e30, event.clone()).is_err());
        assert!(timer.schedule_once(f64::NAN, event).is_err());
    }

    #[tokio::test]
    async fn test_rearm_survives_unschedulable_target() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler =
            AlarmScheduler::new(FixedClock::at(1000.0), Box::new(TokioTimer::new(tx)));
        let mut store = store_with(&["far", "near"]);
        let dir = tempfile::tempdir().unwrap();
        let sound = sound_in(&dir);

        store.tasks[0].alarms.push(Alarm::new(0, 1.0e30, sound.clone()));
        store.tasks[1].alarms.push(Alarm::new(1, 2000.0, sound.clone()));
        store.clear_changed();

        scheduler.rearm_all_on_startup(&mut store);

        // A target too far out to sleep on is disabled like any other
        // scheduling rejection; the valid record still arms.
        assert!(!store.tasks[0].alarms[0].enabled);
        assert!(store.tasks[1].alarms[0].enabled);
        assert!(scheduler.is_scheduled(&store.tasks[1].alarms[0].id));
        assert_eq!(scheduler.scheduled_count(), 1);
        assert!(store.is_changed());
    }

    #[tokio::test]
    async fn test_tokio_timer_delivers_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        let event = FireEvent {
            task_id: Uuid::new_v4(),
            alarm_id: "a".into(),
        };
        timer.schedule_once(0.01, event.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel_aborts_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        let handle = timer
            .schedule_once(
                1.0,
                FireEvent {
                    task_id: Uuid::new_v4(),
                    alarm_id: "a".into(),
                },
            )
            .unwrap();
        handle.cancel();

        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await;
        assert!(outcome.is_err());
    }
}
