use crate::clock::Clock;
use crate::domain::Task;
use crate::error::{Result, TempoError};
use crate::persistence::document::Metadata;
use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

/// Canonical ordered collection of top-level tasks plus document metadata.
///
/// All structural mutation goes through here; every mutating operation sets
/// the dirty flag that gates periodic persistence. Tasks and subtasks are
/// addressed by index paths (`[]` = root list, `[2]` = third top-level
/// task's subtask list, and so on).
#[derive(Debug, Default)]
pub struct TaskStore {
    pub tasks: Vec<Task>,
    pub metadata: Metadata,
    pub selected_index: Option<usize>,
    changed: bool,
}

impl TaskStore {
    pub fn from_parts(tasks: Vec<Task>, metadata: Metadata) -> Self {
        Self {
            tasks,
            metadata,
            selected_index: None,
            changed: false,
        }
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn task_at(&self, path: &[usize]) -> Option<&Task> {
        let (&first, rest) = path.split_first()?;
        let mut task = self.tasks.get(first)?;
        for &i in rest {
            task = task.subtasks.get(i)?;
        }
        Some(task)
    }

    pub fn task_at_mut(&mut self, path: &[usize]) -> Option<&mut Task> {
        let (&first, rest) = path.split_first()?;
        let mut task = self.tasks.get_mut(first)?;
        for &i in rest {
            task = task.subtasks.get_mut(i)?;
        }
        Some(task)
    }

    pub fn find_by_id_mut(&mut self, id: &Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find_map(|t| t.find_by_id_mut(id))
    }

    /// Visit every task and subtask in the store.
    pub fn for_each_task_mut(&mut self, mut f: impl FnMut(&mut Task)) {
        for task in &mut self.tasks {
            task.for_each_mut(&mut f);
        }
    }

    /// The sibling list addressed by a parent path (`[]` = top level).
    fn sibling_list_mut(&mut self, parent: &[usize]) -> Result<&mut Vec<Task>> {
        if parent.is_empty() {
            return Ok(&mut self.tasks);
        }
        let len = self.task_at(&parent[..parent.len() - 1]).map_or(self.tasks.len(), |t| t.subtasks.len());
        match self.task_at_mut(parent) {
            Some(task) => Ok(&mut task.subtasks),
            None => Err(TempoError::IndexOutOfRange {
                index: *parent.last().unwrap_or(&0),
                len,
            }),
        }
    }

    /// Insert a new task at `position` in the parent's (or root's) list.
    /// Rejects empty/whitespace-only titles.
    pub fn add_task(
        &mut self,
        title: &str,
        parent: &[usize],
        position: usize,
        clock: &dyn Clock,
    ) -> Result<()> {
        if title.trim().is_empty() {
            return Err(TempoError::InvalidInput("Task name cannot be empty".into()));
        }
        let task = Task::new(title, clock.now_iso(), clock.local_stamp());
        let list = self.sibling_list_mut(parent)?;
        let position = position.min(list.len());
        list.insert(position, task);
        self.mark_changed();
        info!(title = title.trim(), "Added task");
        Ok(())
    }

    /// Remove a task (and its whole subtree), returning it so the caller
    /// can cancel any scheduled alarms it owned.
    pub fn delete_task(&mut self, parent: &[usize], index: usize) -> Result<Task> {
        let list = self.sibling_list_mut(parent)?;
        if index >= list.len() {
            return Err(TempoError::IndexOutOfRange { index, len: list.len() });
        }
        let removed = list.remove(index);
        if parent.is_empty() {
            match self.selected_index {
                Some(sel) if sel == index => self.selected_index = None,
                Some(sel) if sel > index => self.selected_index = Some(sel - 1),
                _ => {}
            }
        }
        self.mark_changed();
        info!(title = %removed.title, "Deleted task");
        Ok(removed)
    }

    /// Swap a top-level task with its immediate neighbor. Returns the new
    /// index; a move past either boundary leaves the index unchanged.
    pub fn move_task(&mut self, index: usize, direction: i32) -> Result<usize> {
        if index >= self.tasks.len() {
            return Err(TempoError::IndexOutOfRange { index, len: self.tasks.len() });
        }
        let target = index as i64 + direction.signum() as i64;
        if target < 0 || target as usize >= self.tasks.len() {
            return Ok(index);
        }
        let target = target as usize;
        self.tasks.swap(index, target);
        match self.selected_index {
            Some(sel) if sel == index => self.selected_index = Some(target),
            Some(sel) if sel == target => self.selected_index = Some(index),
            _ => {}
        }
        self.mark_changed();
        Ok(target)
    }

    /// Arbitrary reposition of a top-level task (drag-and-drop target).
    /// `to_position` is clamped to `[0, len]`; the tracked selected index
    /// follows the moved or shifted entity.
    pub fn insert_at_position(&mut self, from: usize, to_position: usize) -> Result<()> {
        if from >= self.tasks.len() {
            return Err(TempoError::IndexOutOfRange { index: from, len: self.tasks.len() });
        }
        let mut to_position = to_position.min(self.tasks.len());
        if from == to_position || from + 1 == to_position {
            return Ok(());
        }
        let task = self.tasks.remove(from);
        if from < to_position {
            to_position -= 1;
        }
        self.tasks.insert(to_position, task);

        if let Some(sel) = self.selected_index {
            if sel == from {
                self.selected_index = Some(to_position);
            } else if from < sel && sel <= to_position {
                self.selected_index = Some(sel - 1);
            } else if to_position <= sel && sel < from {
                self.selected_index = Some(sel + 1);
            }
        }
        self.mark_changed();
        info!(from, to = to_position, "Repositioned task");
        Ok(())
    }

    /// Rename a task, recording old and new titles in its history.
    pub fn rename_task(&mut self, path: &[usize], new_title: &str, clock: &dyn Clock) -> Result<()> {
        if new_title.trim().is_empty() {
            return Err(TempoError::InvalidInput("Title cannot be empty".into()));
        }
        let now_iso = clock.now_iso();
        let task = self.task_for(path)?;
        task.rename(new_title, &now_iso);
        self.mark_changed();
        Ok(())
    }

    /// Flip completion. Completing a task with a running timer stops the
    /// timer first so no elapsed time is lost.
    pub fn toggle_completion(&mut self, path: &[usize], clock: &dyn Clock) -> Result<bool> {
        let now = clock.now_unix();
        let task = self.task_for(path)?;
        if !task.completed && task.timer_running {
            task.stop_timer(now);
        }
        task.completed = !task.completed;
        let completed = task.completed;
        info!(title = %task.title, completed, "Toggled completion");
        self.mark_changed();
        Ok(completed)
    }

    /// Set or clear a due date, validated against the document's
    /// `DD-Month-YYYY` display format.
    pub fn set_due_date(&mut self, path: &[usize], due_date: Option<String>) -> Result<()> {
        if let Some(ref date) = due_date {
            NaiveDate::parse_from_str(date, "%d-%B-%Y").map_err(|_| {
                TempoError::InvalidInput(format!("Invalid due date '{date}' (expected DD-Month-YYYY)"))
            })?;
        }
        let task = self.task_for(path)?;
        task.due_date = due_date;
        self.mark_changed();
        Ok(())
    }

    pub fn toggle_todone(&mut self, path: &[usize]) -> Result<bool> {
        let task = self.task_for(path)?;
        task.todone = !task.todone;
        let todone = task.todone;
        self.mark_changed();
        Ok(todone)
    }

    pub fn toggle_subtasks_visible(&mut self, path: &[usize]) -> Result<bool> {
        let task = self.task_for(path)?;
        task.subtasks_visible = !task.subtasks_visible;
        let visible = task.subtasks_visible;
        self.mark_changed();
        Ok(visible)
    }

    pub fn annotate(&mut self, path: &[usize], text: &str, clock: &dyn Clock) -> Result<()> {
        if text.trim().is_empty() {
            return Err(TempoError::InvalidInput("Annotation cannot be empty".into()));
        }
        let now_iso = clock.now_iso();
        let task = self.task_for(path)?;
        task.add_annotation(text, &now_iso);
        self.mark_changed();
        Ok(())
    }

    pub fn delete_annotation(&mut self, path: &[usize], index: usize) -> Result<()> {
        let task = self.task_for(path)?;
        if index >= task.annotations.len() {
            return Err(TempoError::IndexOutOfRange { index, len: task.annotations.len() });
        }
        task.annotations.remove(index);
        self.mark_changed();
        Ok(())
    }

    fn task_for(&mut self, path: &[usize]) -> Result<&mut Task> {
        let len = self.tasks.len();
        self.task_at_mut(path).ok_or(TempoError::IndexOutOfRange {
            index: path.first().copied().unwrap_or(0),
            len,
        })
    }
}

#[cfg(test)]
impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the selection at a top-level task for adjustment scenarios.
    pub fn select(&mut self, index: Option<usize>) {
        self.selected_index = index.filter(|&i| i < self.tasks.len());
    }
}
