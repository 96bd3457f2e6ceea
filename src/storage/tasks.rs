//! Task queries.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::Storage;
use crate::models::{Task, TaskStatus};
use crate::{Error, Result};

const TASK_COLUMNS: &str = "id, project_id, name, description, assignee_id, start_date, end_date, \
                            progress, status, created_at, updated_at";

/// Filters for [`Storage::list_tasks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub project_id: Option<i64>,
    pub assignee_id: Option<i64>,
    /// Restrict to projects this user owns or belongs to
    pub visible_to: Option<i64>,
}

impl Storage {
    /// Insert a task.
    pub fn insert_task(&mut self, task: &Task) -> Result<Task> {
        self.conn.execute(
            "INSERT INTO tasks (project_id, name, description, assignee_id, start_date, end_date,
                                progress, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.project_id,
                task.name,
                task.description,
                task.assignee_id,
                task.start_date,
                task.end_date,
                task.progress,
                task.status,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(Task {
            id: self.conn.last_insert_rowid(),
            ..task.clone()
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: i64) -> Result<Task> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [id],
                row_to_task,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", id)))
    }

    /// List tasks, oldest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks t
             WHERE (?1 IS NULL OR t.project_id = ?1)
               AND (?2 IS NULL OR t.assignee_id = ?2)
               AND (?3 IS NULL
                    OR EXISTS (SELECT 1 FROM project_members m
                               WHERE m.project_id = t.project_id AND m.user_id = ?3)
                    OR EXISTS (SELECT 1 FROM projects p
                               WHERE p.id = t.project_id AND p.owner_id = ?3))
             ORDER BY t.id",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(
                params![filter.project_id, filter.assignee_id, filter.visible_to],
                row_to_task,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Update every column of a task.
    pub fn update_task(&mut self, task: &Task) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tasks SET name = ?2, description = ?3, assignee_id = ?4, start_date = ?5,
             end_date = ?6, progress = ?7, status = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                task.id,
                task.name,
                task.description,
                task.assignee_id,
                task.start_date,
                task.end_date,
                task.progress,
                task.status,
                task.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Task not found: {}", task.id)));
        }
        Ok(())
    }

    /// Write a task's progress and the status that follows from it.
    pub fn set_task_progress(&mut self, id: i64, progress: u8, now: DateTime<Utc>) -> Result<()> {
        let progress = progress.min(100);
        let changed = self.conn.execute(
            "UPDATE tasks SET progress = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, progress, TaskStatus::from_progress(progress), now],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Task not found: {}", id)));
        }
        Ok(())
    }

    /// Delete a task with its checklists and defects.
    pub fn delete_task(&mut self, id: i64) -> Result<()> {
        let changed = self.conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Task not found: {}", id)));
        }
        Ok(())
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        assignee_id: row.get("assignee_id")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        progress: row.get("progress")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Role};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage, i64, i64) {
        let temp = TempDir::new().unwrap();
        let mut storage = Storage::init(temp.path()).unwrap();
        let owner = storage.create_user("PM", "pm@site.test", Role::ProjectManager).unwrap();
        let now = Utc::now();
        let project = storage
            .insert_project(&Project {
                id: 0,
                name: "Tower".to_string(),
                code: "T-1".to_string(),
                location: None,
                owner_id: owner.id,
                start_date: None,
                end_date: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        (temp, storage, project.id, owner.id)
    }

    fn task(project_id: i64, assignee_id: Option<i64>) -> Task {
        let now = Utc::now();
        Task {
            id: 0,
            project_id,
            name: "Formwork".to_string(),
            description: None,
            assignee_id,
            start_date: None,
            end_date: None,
            progress: 0,
            status: TaskStatus::Todo,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get_task() {
        let (_temp, mut storage, project_id, owner_id) = setup();
        let created = storage.insert_task(&task(project_id, Some(owner_id))).unwrap();
        let loaded = storage.get_task(created.id).unwrap();
        assert_eq!(loaded.name, "Formwork");
        assert_eq!(loaded.assignee_id, Some(owner_id));
        assert_eq!(loaded.status, TaskStatus::Todo);
    }

    #[test]
    fn test_progress_drives_status() {
        let (_temp, mut storage, project_id, _) = setup();
        let created = storage.insert_task(&task(project_id, None)).unwrap();

        storage.set_task_progress(created.id, 40, Utc::now()).unwrap();
        let loaded = storage.get_task(created.id).unwrap();
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.status, TaskStatus::InProgress);

        storage.set_task_progress(created.id, 100, Utc::now()).unwrap();
        assert_eq!(storage.get_task(created.id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_list_filters() {
        let (_temp, mut storage, project_id, owner_id) = setup();
        let outsider = storage.create_user("X", "x@site.test", Role::Viewer).unwrap();
        storage.insert_task(&task(project_id, Some(owner_id))).unwrap();
        storage.insert_task(&task(project_id, None)).unwrap();

        let all = storage
            .list_tasks(&TaskFilter {
                project_id: Some(project_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);

        let mine = storage
            .list_tasks(&TaskFilter {
                assignee_id: Some(owner_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mine.len(), 1);

        let hidden = storage
            .list_tasks(&TaskFilter {
                visible_to: Some(outsider.id),
                ..Default::default()
            })
            .unwrap();
        assert!(hidden.is_empty());
    }

    #[test]
    fn test_delete_missing_task() {
        let (_temp, mut storage, _, _) = setup();
        assert!(matches!(storage.delete_task(99), Err(Error::NotFound(_))));
    }
}
