use super::alarm::Alarm;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Maximum retained title-history entries (oldest dropped first).
pub const TITLE_HISTORY_CAP: usize = 10;

/// One entry in a task's rename log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleEntry {
    pub title: String,
    pub timestamp: String,
}

/// Free-form note attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub text: String,
    pub timestamp: String,
}

/// Outcome of reconciling a persisted running timer against wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRecovery {
    /// Timer was not running; nothing to do.
    NotRunning,
    /// Offline gap folded into `timer`, start stamp moved to now.
    Resumed,
    /// Start stamp was in the future (clock skew); re-stamped to now.
    SkewCorrected,
    /// Running flag set but no usable start stamp; force-stopped.
    ForceStopped,
}

/// A task or recursively nested subtask.
///
/// Serialized field names match the legacy on-disk document; the in-process
/// `id` is regenerated every load and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(rename = "task")]
    pub title: String,
    #[serde(rename = "titleHistory")]
    pub title_history: Vec<TitleEntry>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "localTime")]
    pub local_time: String,
    pub completed: bool,
    /// Accumulated elapsed seconds while NOT running.
    pub timer: f64,
    pub timer_running: bool,
    pub start_time_unix: Option<f64>,
    pub due_date: Option<String>,
    pub icon: Option<PathBuf>,
    pub alarms: Vec<Alarm>,
    pub annotations: Vec<Annotation>,
    pub subtasks: Vec<Task>,
    pub subtasks_visible: bool,
    pub todone: bool,
}

impl Task {
    pub fn new(title: &str, created_at: String, local_time: String) -> Self {
        let title = title.trim().to_string();
        Self {
            id: Uuid::new_v4(),
            title_history: vec![TitleEntry {
                title: title.clone(),
                timestamp: created_at.clone(),
            }],
            title,
            created_at,
            local_time,
            completed: false,
            timer: 0.0,
            timer_running: false,
            start_time_unix: None,
            due_date: None,
            icon: None,
            alarms: Vec::new(),
            annotations: Vec::new(),
            subtasks: Vec::new(),
            subtasks_visible: true,
            todone: false,
        }
    }

    /// Normalize a raw task record loaded from disk, recursively applying
    /// the same defaults and coercions to every subtask.
    ///
    /// Out-of-type fields fall back to safe defaults; malformed alarm
    /// entries are dropped with a warning. Only a non-object record is
    /// rejected outright.
    pub fn normalize(
        value: &Value,
        position: usize,
        now_iso: &str,
        local_stamp: &str,
        now_unix: f64,
    ) -> Option<Task> {
        let Some(record) = value.as_object() else {
            warn!("Skipping non-object task record at index {position}");
            return None;
        };

        let mut title_history = normalize_title_history(record.get("titleHistory"), now_iso);

        let title = match record.get("task").and_then(Value::as_str) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => match title_history.last() {
                Some(entry) if !entry.title.trim().is_empty() => entry.title.clone(),
                _ => {
                    warn!("Task {position} had missing/empty title, assigned fallback");
                    format!("Untitled Task {}", position + 1)
                }
            },
        };

        let created_at = record
            .get("createdAt")
            .and_then(Value::as_str)
            .unwrap_or(now_iso)
            .to_string();

        // Keep the history's last entry in step with the current title.
        if title_history.last().map(|e| e.title.as_str()) != Some(title.as_str()) {
            title_history.push(TitleEntry {
                title: title.clone(),
                timestamp: created_at.clone(),
            });
        }
        cap_history(&mut title_history);

        let mut start_time_unix = record.get("start_time_unix").and_then(Value::as_f64);
        // Legacy documents stored the stamp under `start_time`.
        if start_time_unix.is_none() {
            start_time_unix = record.get("start_time").and_then(Value::as_f64);
        }

        let alarms = record
            .get("alarms")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, entry)| Alarm::from_value(entry, position, i, now_unix))
                    .collect()
            })
            .unwrap_or_default();

        let subtasks = record
            .get("subtasks")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, entry)| {
                        Task::normalize(entry, i, now_iso, local_stamp, now_unix)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Task {
            id: Uuid::new_v4(),
            title,
            title_history,
            created_at,
            local_time: record
                .get("localTime")
                .and_then(Value::as_str)
                .unwrap_or(local_stamp)
                .to_string(),
            completed: record.get("completed").and_then(Value::as_bool).unwrap_or(false),
            timer: record.get("timer").and_then(Value::as_f64).unwrap_or(0.0),
            timer_running: record
                .get("timer_running")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            start_time_unix,
            due_date: record
                .get("due_date")
                .and_then(Value::as_str)
                .map(str::to_owned),
            icon: record
                .get("icon")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            alarms,
            annotations: normalize_annotations(record.get("annotations"), now_iso),
            subtasks,
            subtasks_visible: record
                .get("subtasks_visible")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            todone: record.get("todone").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Start the elapsed-time timer. No-op while running or completed.
    pub fn start_timer(&mut self, now: f64) -> bool {
        if self.timer_running || self.completed {
            return false;
        }
        self.timer_running = true;
        self.start_time_unix = Some(now);
        true
    }

    /// Stop the timer, folding the elapsed interval into `timer`. A missing
    /// start stamp or a negative interval contributes zero.
    pub fn stop_timer(&mut self, now: f64) -> bool {
        if !self.timer_running {
            return false;
        }
        if let Some(start) = self.start_time_unix {
            let elapsed = now - start;
            if elapsed > 0.0 {
                self.timer += elapsed;
            }
        }
        self.timer_running = false;
        self.start_time_unix = None;
        true
    }

    /// Zero the timer, stopping it first if running. No-op when completed.
    pub fn reset_timer(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.timer = 0.0;
        self.timer_running = false;
        self.start_time_unix = None;
        true
    }

    /// Pure read of the live timer value for display polling.
    pub fn current_timer_value(&self, now: f64) -> f64 {
        match (self.timer_running, self.start_time_unix) {
            (true, Some(start)) => self.timer + (now - start),
            _ => self.timer,
        }
    }

    /// Fold wall-clock time elapsed while the process was down into the
    /// timer, keeping it running seamlessly. Restores the
    /// running-iff-start-stamp invariant.
    pub fn reconcile_timer(&mut self, now: f64) -> TimerRecovery {
        if !self.timer_running {
            return TimerRecovery::NotRunning;
        }
        match self.start_time_unix {
            Some(start) => {
                let gap = now - start;
                if gap > 0.0 {
                    self.timer += gap;
                    self.start_time_unix = Some(now);
                    TimerRecovery::Resumed
                } else {
                    self.start_time_unix = Some(now);
                    TimerRecovery::SkewCorrected
                }
            }
            None => {
                self.timer_running = false;
                TimerRecovery::ForceStopped
            }
        }
    }

    /// Record a rename: old title then new title appended to the history,
    /// skipping consecutive duplicates, capped at the last
    /// [`TITLE_HISTORY_CAP`] entries.
    pub fn rename(&mut self, new_title: &str, now_iso: &str) {
        let new_title = new_title.trim();
        if new_title == self.title {
            return;
        }
        if self.title_history.last().map(|e| e.title.as_str()) != Some(self.title.as_str()) {
            self.title_history.push(TitleEntry {
                title: self.title.clone(),
                timestamp: now_iso.to_string(),
            });
        }
        self.title = new_title.to_string();
        if self.title_history.last().map(|e| e.title.as_str()) != Some(new_title) {
            self.title_history.push(TitleEntry {
                title: new_title.to_string(),
                timestamp: now_iso.to_string(),
            });
        }
        cap_history(&mut self.title_history);
    }

    pub fn add_annotation(&mut self, text: &str, now_iso: &str) {
        self.annotations.push(Annotation {
            text: text.trim().to_string(),
            timestamp: now_iso.to_string(),
        });
    }

    pub fn find_alarm(&self, alarm_id: &str) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.id == alarm_id)
    }

    pub fn find_alarm_mut(&mut self, alarm_id: &str) -> Option<&mut Alarm> {
        self.alarms.iter_mut().find(|a| a.id == alarm_id)
    }

    /// Locate a task anywhere in this subtree by its in-process id.
    pub fn find_by_id_mut(&mut self, id: &Uuid) -> Option<&mut Task> {
        if &self.id == id {
            return Some(self);
        }
        self.subtasks.iter_mut().find_map(|s| s.find_by_id_mut(id))
    }

    /// Visit this task and every nested subtask.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Task)) {
        f(self);
        for subtask in &mut self.subtasks {
            subtask.for_each_mut(f);
        }
    }

    pub fn for_each(&self, f: &mut impl FnMut(&Task)) {
        f(self);
        for subtask in &self.subtasks {
            subtask.for_each(f);
        }
    }
}

fn cap_history(history: &mut Vec<TitleEntry>) {
    if history.len() > TITLE_HISTORY_CAP {
        let excess = history.len() - TITLE_HISTORY_CAP;
        history.drain(..excess);
    }
}

fn normalize_title_history(value: Option<&Value>, now_iso: &str) -> Vec<TitleEntry> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let title = entry.get("title").and_then(Value::as_str)?;
                    Some(TitleEntry {
                        title: title.to_string(),
                        timestamp: entry
                            .get("timestamp")
                            .and_then(Value::as_str)
                            .unwrap_or(now_iso)
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_annotations(value: Option<&Value>, now_iso: &str) -> Vec<Annotation> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let text = entry.get("text").and_then(Value::as_str)?;
                    Some(Annotation {
                        text: text.to_string(),
                        timestamp: entry
                            .get("timestamp")
                            .and_then(Value::as_str)
                            .unwrap_or(now_iso)
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
