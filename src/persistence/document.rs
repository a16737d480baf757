use crate::clock::Clock;
use crate::domain::Task;
use crate::error::{Result, TempoError};
use crate::persistence::files;
use crate::store::TaskStore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// RGBA color as stored in the document (components in `0.0..=1.0`).
pub type Rgba = [f64; 4];

/// Document metadata alongside the task list: display name, color settings,
/// and a verbatim bag of any top-level keys this version doesn't know about.
///
/// Keys must survive a load → mutate → save cycle unchanged. Known fields
/// are `Option` where `None` means the key was absent at load; a key that
/// was present with an empty value stays present on save. The `extra` map
/// makes the same contract hold for unknown keys without re-reading the
/// file at save time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_text_color: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_date_number_color: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_label_color: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_colors: Option<BTreeMap<String, Rgba>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timer_colors: Option<BTreeMap<String, Rgba>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_colors: Option<BTreeMap<String, Rgba>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Pull the known fields out of a raw document object, coercing
    /// malformed values to absent; whatever remains is kept verbatim in
    /// `extra`.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let user_display_name = map
            .remove("user_display_name")
            .and_then(|v| v.as_str().map(str::to_owned));
        let calendar_text_color = take_color(&mut map, "calendar_text_color");
        let calendar_date_number_color = take_color(&mut map, "calendar_date_number_color");
        let timer_label_color = take_color(&mut map, "timer_label_color");
        let timer_colors = take_color_map(&mut map, "timer_colors");
        let stop_timer_colors = take_color_map(&mut map, "stop_timer_colors");
        let date_colors = take_color_map(&mut map, "date_colors");

        Self {
            user_display_name,
            calendar_text_color,
            calendar_date_number_color,
            timer_label_color,
            timer_colors,
            stop_timer_colors,
            date_colors,
            extra: map,
        }
    }
}

fn color_from_value(value: &Value) -> Option<Rgba> {
    let parts = value.as_array()?;
    if parts.len() != 4 {
        return None;
    }
    let mut color = [0.0; 4];
    for (slot, part) in color.iter_mut().zip(parts) {
        *slot = part.as_f64()?;
    }
    Some(color)
}

fn take_color(map: &mut Map<String, Value>, key: &str) -> Option<Rgba> {
    let value = map.remove(key)?;
    let color = color_from_value(&value);
    if color.is_none() {
        warn!(key, "Ignoring malformed color in task document");
    }
    color
}

fn take_color_map(map: &mut Map<String, Value>, key: &str) -> Option<BTreeMap<String, Rgba>> {
    let value = map.remove(key)?;
    match value.as_object() {
        Some(entries) => Some(
            entries
                .iter()
                .filter_map(|(k, v)| color_from_value(v).map(|c| (k.clone(), c)))
                .collect(),
        ),
        None => {
            warn!(key, "Ignoring non-object color map in task document");
            None
        }
    }
}

/// Load the task document, tolerating the legacy bare-array shape, the
/// object-with-`tasks` shape, a missing file, and a corrupt file. Parse
/// failure is reported and yields an empty state, never a startup failure.
pub fn load_document(path: &Path, clock: &dyn Clock) -> (Vec<Task>, Metadata) {
    let raw = match files::read_file(path) {
        Ok(raw) => raw,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read task document; starting empty");
            return (Vec::new(), Metadata::default());
        }
    };
    if raw.trim().is_empty() {
        info!(path = %path.display(), "No task document found; starting with an empty list");
        return (Vec::new(), Metadata::default());
    }
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Error decoding task document; starting empty");
            return (Vec::new(), Metadata::default());
        }
    };

    let (raw_tasks, metadata) = split_document(value);
    let tasks = normalize_tasks(&raw_tasks, clock);
    info!(count = tasks.len(), path = %path.display(), "Loaded tasks");
    (tasks, metadata)
}

fn split_document(value: Value) -> (Vec<Value>, Metadata) {
    match value {
        // Legacy shape: a bare array of task records, no metadata.
        Value::Array(tasks) => (tasks, Metadata::default()),
        Value::Object(mut map) => {
            let tasks = match map.remove("tasks") {
                Some(Value::Array(tasks)) => tasks,
                Some(_) => {
                    warn!("`tasks` key in document is not an array; ignoring it");
                    Vec::new()
                }
                None => Vec::new(),
            };
            (tasks, Metadata::from_map(map))
        }
        _ => {
            warn!("Task document root is neither an array nor an object; starting empty");
            (Vec::new(), Metadata::default())
        }
    }
}

/// Run every raw task record through [`Task::normalize`], dropping only
/// records that aren't objects at all.
pub fn normalize_tasks(raw: &[Value], clock: &dyn Clock) -> Vec<Task> {
    let now_iso = clock.now_iso();
    let local_stamp = clock.local_stamp();
    let now_unix = clock.now_unix();
    raw.iter()
        .enumerate()
        .filter_map(|(i, value)| Task::normalize(value, i, &now_iso, &local_stamp, now_unix))
        .collect()
}

/// Write the store back to disk atomically. Skipped (returning `false`)
/// when nothing changed and the caller didn't force; `true` means a write
/// happened and the dirty flag was cleared.
pub fn save_document(path: &Path, store: &mut TaskStore, force: bool) -> Result<bool> {
    if !store.is_changed() && !force {
        return Ok(false);
    }

    let mut doc = match serde_json::to_value(&store.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    doc.insert("tasks".to_string(), serde_json::to_value(&store.tasks)?);
    let body = serde_json::to_string_pretty(&Value::Object(doc))?;

    files::atomic_write(path, &body).map_err(|e| TempoError::Persistence(e.to_string()))?;
    store.clear_changed();
    info!(count = store.tasks.len(), path = %path.display(), "Saved tasks");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock() -> FixedClock {
        FixedClock::at(1_700_000_000.0)
    }

    fn write_doc(dir: &tempfile::TempDir, value: &Value) -> std::path::PathBuf {
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_load_legacy_bare_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, &json!([{ "task": "legacy" }]));

        let (tasks, metadata) = load_document(&path, &clock());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "legacy");
        assert_eq!(metadata, Metadata::default());
    }

    #[test]
    fn test_load_object_shape_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(
            &dir,
            &json!({
                "tasks": [{ "task": "a" }, { "task": "b" }],
                "user_display_name": "Ada",
                "calendar_text_color": [0.1, 0.2, 0.3, 1.0],
                "date_colors": { "2026-03-05": [1.0, 0.0, 0.0, 1.0] },
                "future_feature": { "nested": true }
            }),
        );

        let (tasks, metadata) = load_document(&path, &clock());
        assert_eq!(tasks.len(), 2);
        assert_eq!(metadata.user_display_name.as_deref(), Some("Ada"));
        assert_eq!(metadata.calendar_text_color, Some([0.1, 0.2, 0.3, 1.0]));
        assert_eq!(
            metadata.date_colors.as_ref().and_then(|m| m.get("2026-03-05")),
            Some(&[1.0, 0.0, 0.0, 1.0])
        );
        assert_eq!(metadata.extra["future_feature"], json!({ "nested": true }));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let (tasks, metadata) = load_document(&path, &clock());
        assert!(tasks.is_empty());
        assert_eq!(metadata, Metadata::default());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let (tasks, metadata) = load_document(&path, &clock());
        assert!(tasks.is_empty());
        assert_eq!(metadata, Metadata::default());
    }

    #[test]
    fn test_load_coerces_bad_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(
            &dir,
            &json!({
                "tasks": "not an array",
                "calendar_text_color": "red",
                "timer_colors": [1, 2, 3]
            }),
        );

        let (tasks, metadata) = load_document(&path, &clock());
        assert!(tasks.is_empty());
        assert_eq!(metadata.calendar_text_color, None);
        assert_eq!(metadata.timer_colors, None);
    }

    #[test]
    fn test_save_skipped_unless_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = TaskStore::new();

        assert!(!save_document(&path, &mut store, false).unwrap());
        assert!(!path.exists());

        assert!(save_document(&path, &mut store, true).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_save_clears_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = TaskStore::new();
        store.add_task("t", &[], 0, &clock()).unwrap();

        assert!(store.is_changed());
        assert!(save_document(&path, &mut store, false).unwrap());
        assert!(!store.is_changed());
        assert!(!save_document(&path, &mut store, false).unwrap());
    }

    #[test]
    fn test_round_trip_preserves_metadata_keys() {
        let dir = tempfile::tempdir().unwrap();
        let original = json!({
            "tasks": [{ "task": "keep me" }],
            "user_display_name": "Ada",
            "calendar_text_color": [0.1, 0.2, 0.3, 1.0],
            "calendar_date_number_color": [0.0, 0.0, 0.0, 1.0],
            "timer_label_color": [0.5, 0.5, 0.5, 1.0],
            "timer_colors": { "0": [0.0, 1.0, 0.0, 1.0] },
            "stop_timer_colors": { "0": [1.0, 0.0, 0.0, 1.0] },
            "date_colors": { "2026-01-01": [0.2, 0.4, 0.6, 0.8] },
            "background_image_path": "backgrounds/sea.png",
            "experimental": [1, 2, 3]
        });
        let path = write_doc(&dir, &original);

        let (tasks, metadata) = load_document(&path, &clock());
        let mut store = TaskStore::from_parts(tasks, metadata);
        save_document(&path, &mut store, true).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for (key, value) in original.as_object().unwrap() {
            if key == "tasks" {
                continue;
            }
            assert_eq!(&saved[key], value, "metadata key {key} did not round-trip");
        }
        assert_eq!(saved["tasks"][0]["task"], "keep me");
    }

    #[test]
    fn test_round_trip_preserves_empty_metadata_values() {
        let dir = tempfile::tempdir().unwrap();
        let original = json!({
            "tasks": [],
            "user_display_name": "",
            "timer_colors": {},
            "date_colors": {}
        });
        let path = write_doc(&dir, &original);

        let (tasks, metadata) = load_document(&path, &clock());
        let mut store = TaskStore::from_parts(tasks, metadata);
        save_document(&path, &mut store, true).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        // Present-but-empty keys stay present; keys never seen stay absent.
        assert_eq!(saved["user_display_name"], json!(""));
        assert_eq!(saved["timer_colors"], json!({}));
        assert_eq!(saved["date_colors"], json!({}));
        let keys: Vec<&String> = saved.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec!["date_colors", "tasks", "timer_colors", "user_display_name"]
        );
    }

    #[test]
    fn test_save_omits_absent_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = TaskStore::new();
        store.add_task("t", &[], 0, &clock()).unwrap();
        save_document(&path, &mut store, false).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let keys: Vec<&String> = saved.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["tasks"]);
    }

    #[test]
    fn test_normalize_tasks_skips_non_objects() {
        let raw = vec![json!({ "task": "real" }), json!(42), json!("nope")];
        let tasks = normalize_tasks(&raw, &clock());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "real");
    }
}
