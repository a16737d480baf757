use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// One-shot wall-clock alarm attached to a task.
///
/// `enabled=true` means armed (or fired and awaiting dismissal); once
/// dismissed, expired, or found invalid the record is kept with
/// `enabled=false` as history and never re-armed.
#[derive(Debug, Clone, Serialize)]
pub struct Alarm {
    pub id: String,
    pub target_timestamp_unix: f64,
    pub sound_file: PathBuf,
    pub enabled: bool,
}

impl Alarm {
    pub fn new(task_index: usize, target_timestamp_unix: f64, sound_file: PathBuf) -> Self {
        Self {
            id: generate_id(task_index, target_timestamp_unix),
            target_timestamp_unix,
            sound_file,
            enabled: true,
        }
    }

    /// Normalize a raw alarm record loaded from disk.
    ///
    /// Entries missing a target timestamp or sound file are dropped with a
    /// warning rather than failing the document. A missing id gets a fresh
    /// unique one.
    pub fn from_value(
        value: &Value,
        task_index: usize,
        alarm_index: usize,
        now_unix: f64,
    ) -> Option<Alarm> {
        let Some(entry) = value.as_object() else {
            warn!("Skipping non-object alarm entry in task {task_index}");
            return None;
        };

        let target = entry.get("target_timestamp_unix").and_then(Value::as_f64);
        let sound = entry
            .get("sound_file")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        let (Some(target), Some(sound)) = (target, sound) else {
            warn!("Skipping invalid alarm entry in task {task_index}: {value}");
            return None;
        };

        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| loaded_id(task_index, alarm_index, now_unix));

        Some(Alarm {
            id,
            target_timestamp_unix: target,
            sound_file: PathBuf::from(sound),
            enabled: entry.get("enabled").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Id for a freshly created alarm: task index + target time + random suffix.
fn generate_id(task_index: usize, target: f64) -> String {
    format!("{}_{}_{}", task_index, target, uuid_suffix())
}

/// Id assigned to a loaded record that lacked one.
fn loaded_id(task_index: usize, alarm_index: usize, now_unix: f64) -> String {
    format!("{}_{}_{}_{}", task_index, alarm_index, now_unix, uuid_suffix())
}

fn uuid_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}
