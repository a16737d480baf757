use crate::clock::Clock;
use crate::error::{Result, TempoError};
use crate::persistence::files;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Single gratitude note, kept under the calendar day it was written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GratitudeEntry {
    pub text: String,
    pub timestamp: String,
}

/// Append-only journal of daily gratitude notes, stored in its own document
/// as `"YYYY-MM-DD" -> [ {text, timestamp}, ... ]`. No deletion; a day's
/// entries only ever grow.
#[derive(Debug, Default)]
pub struct GratitudeJournal {
    entries: BTreeMap<String, Vec<GratitudeEntry>>,
    changed: bool,
}

impl GratitudeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the journal, tolerating a missing or corrupt file by starting
    /// empty. Malformed days or entries are skipped with a warning rather
    /// than failing the whole document.
    pub fn load(path: &Path) -> Self {
        let raw = match files::read_file(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read gratitude file; starting empty");
                return Self::new();
            }
        };
        if raw.trim().is_empty() {
            info!(path = %path.display(), "No gratitude file found; starting with an empty journal");
            return Self::new();
        }
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error decoding gratitude file; starting empty");
                return Self::new();
            }
        };
        let Value::Object(map) = value else {
            warn!(path = %path.display(), "Gratitude document root is not an object; starting empty");
            return Self::new();
        };

        let mut entries: BTreeMap<String, Vec<GratitudeEntry>> = BTreeMap::new();
        for (date, day) in map {
            let Some(items) = day.as_array() else {
                warn!(date = %date, "Skipping gratitude day whose value is not a list");
                continue;
            };
            let notes: Vec<GratitudeEntry> =
                items.iter().filter_map(|item| entry_from_value(&date, item)).collect();
            if !notes.is_empty() {
                entries.insert(date, notes);
            }
        }
        info!(days = entries.len(), path = %path.display(), "Loaded gratitude journal");
        Self {
            entries,
            changed: false,
        }
    }

    /// Append a note under today's date. Rejects empty or whitespace-only
    /// text.
    pub fn add(&mut self, text: &str, clock: &dyn Clock) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TempoError::InvalidInput(
                "Gratitude entry cannot be empty".into(),
            ));
        }
        let today = clock.today().format("%Y-%m-%d").to_string();
        self.entries.entry(today.clone()).or_default().push(GratitudeEntry {
            text: text.to_string(),
            timestamp: clock.now_iso(),
        });
        self.changed = true;
        info!(date = %today, "Added gratitude entry");
        Ok(())
    }

    /// Write the journal back atomically. Skipped (returning `false`) when
    /// nothing changed and the caller didn't force.
    pub fn save(&mut self, path: &Path, force: bool) -> Result<bool> {
        if !self.changed && !force {
            return Ok(false);
        }
        let body = serde_json::to_string_pretty(&self.entries)?;
        files::atomic_write(path, &body).map_err(|e| TempoError::Persistence(e.to_string()))?;
        self.changed = false;
        info!(days = self.entries.len(), path = %path.display(), "Saved gratitude journal");
        Ok(true)
    }

    pub fn entries_for(&self, date: &str) -> &[GratitudeEntry] {
        self.entries.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Days with at least one note, in calendar order.
    pub fn days(&self) -> impl Iterator<Item = (&str, &[GratitudeEntry])> {
        self.entries.iter().map(|(date, notes)| (date.as_str(), notes.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
impl GratitudeJournal {
    pub fn day_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

/// Normalize one raw journal entry. Bare strings are accepted as legacy
/// notes without a timestamp.
fn entry_from_value(date: &str, value: &Value) -> Option<GratitudeEntry> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(GratitudeEntry {
            text: text.trim().to_string(),
            timestamp: String::new(),
        }),
        Value::Object(entry) => {
            let text = entry.get("text").and_then(Value::as_str).map(str::trim);
            match text {
                Some(text) if !text.is_empty() => Some(GratitudeEntry {
                    text: text.to_string(),
                    timestamp: entry
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                _ => {
                    warn!(date, "Skipping gratitude entry without text");
                    None
                }
            }
        }
        _ => {
            warn!(date, "Skipping malformed gratitude entry: {value}");
            None
        }
    }
}
