use crate::domain::Task;
use crate::error::{Result, TempoError};
use crate::persistence::files;
use chrono::NaiveDate;
use std::path::Path;
use tracing::{info, warn};

const HEADER: [&str; 9] = [
    "TYPE",
    "CONTENT",
    "PRIORITY",
    "INDENT",
    "AUTHOR",
    "RESPONSIBLE",
    "DATE",
    "DATE_LANG",
    "TIMEZONE",
];

/// Top-level tasks flagged for sync (`todone`) that aren't done yet.
fn eligible(tasks: &[Task]) -> impl Iterator<Item = &Task> {
    tasks.iter().filter(|t| t.todone && !t.completed)
}

/// Render the Todoist import CSV for the given task list. Every exported
/// row is a top-level normal-priority task; a malformed due date drops the
/// date with a warning, not the row.
pub fn todoist_csv(tasks: &[Task]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for task in eligible(tasks) {
        let date = reformat_due_date(task.due_date.as_deref().unwrap_or(""), &task.title);
        writer.write_record([
            "task",
            task.title.as_str(),
            "1",
            "1",
            "",
            "",
            date.as_str(),
            "en",
            "UTC",
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| TempoError::Persistence(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TempoError::Persistence(e.to_string()))
}

/// Write the Todoist CSV atomically, returning how many tasks were
/// exported. Nothing is written when no task is flagged for sync.
pub fn write_todoist_csv(path: &Path, tasks: &[Task]) -> Result<usize> {
    let count = eligible(tasks).count();
    if count == 0 {
        info!("No tasks flagged for Todoist sync; skipping export");
        return Ok(0);
    }
    let body = todoist_csv(tasks)?;
    files::atomic_write(path, &body).map_err(|e| TempoError::Persistence(e.to_string()))?;
    info!(count, path = %path.display(), "Exported tasks to Todoist CSV");
    Ok(count)
}

/// Convert a stored `DD-Month-YYYY` due date into Todoist's `YYYY-MM-DD`.
fn reformat_due_date(due: &str, title: &str) -> String {
    if due.is_empty() {
        return String::new();
    }
    match NaiveDate::parse_from_str(due, "%d-%B-%Y") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => {
            warn!(task = title, due, "Invalid due date format; exporting without a date");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(title: &str) -> Task {
        Task::new(title, "2024-01-15T08:00:00".into(), "2024-01-15 08:00:00".into())
    }

    fn flagged(title: &str) -> Task {
        let mut t = task(title);
        t.todone = true;
        t
    }

    #[test]
    fn test_only_flagged_incomplete_tasks_export() {
        let mut done = flagged("done");
        done.completed = true;
        let tasks = vec![task("unflagged"), flagged("keep"), done];

        let csv = todoist_csv(&tasks).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "TYPE,CONTENT,PRIORITY,INDENT,AUTHOR,RESPONSIBLE,DATE,DATE_LANG,TIMEZONE"
        );
        assert_eq!(lines[1], "task,keep,1,1,,,,en,UTC");
    }

    #[test]
    fn test_due_date_reformatted() {
        let mut t = flagged("Ship release");
        t.due_date = Some("05-March-2024".into());
        let csv = todoist_csv(&[t]).unwrap();
        assert!(csv.contains("task,Ship release,1,1,,,2024-03-05,en,UTC"));
    }

    #[test]
    fn test_malformed_due_date_keeps_row() {
        let mut t = flagged("Fuzzy deadline");
        t.due_date = Some("sometime soon".into());
        let csv = todoist_csv(&[t]).unwrap();
        assert!(csv.contains("task,Fuzzy deadline,1,1,,,,en,UTC"));
    }

    #[test]
    fn test_titles_with_delimiters_are_quoted() {
        let t = flagged(r#"Review "final" draft, v2"#);
        let csv = todoist_csv(&[t]).unwrap();
        assert!(csv.contains(r#"task,"Review ""final"" draft, v2",1,1,,,,en,UTC"#));
    }

    #[test]
    fn test_header_only_when_nothing_flagged() {
        let csv = todoist_csv(&[task("a"), task("b")]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_write_skips_when_nothing_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todoist.csv");
        assert_eq!(write_todoist_csv(&path, &[task("a")]).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_reports_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todoist.csv");
        let tasks = vec![flagged("one"), flagged("two"), task("not this one")];

        assert_eq!(write_todoist_csv(&path, &tasks).unwrap(), 2);
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, todoist_csv(&tasks).unwrap());
    }

    #[test]
    fn test_reformat_due_date() {
        assert_eq!(reformat_due_date("25-December-2024", "t"), "2024-12-25");
        assert_eq!(reformat_due_date("1-January-2025", "t"), "2025-01-01");
        assert_eq!(reformat_due_date("", "t"), "");
        assert_eq!(reformat_due_date("2024-12-25", "t"), "");
    }
}
