//! Task procedures.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Deleted, IdInput, Output, Workspace, check_schedule, clean, required};
use crate::models::{NotificationKind, Task, TaskStatus, TaskView};
use crate::notify::NotificationDraft;
use crate::permissions::{Caller, Capability, ensure};
use crate::storage::tasks::TaskFilter;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTask {
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub assignee_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasks {
    pub project_id: Option<i64>,
    pub assignee_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub assignee_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UpdateProgress {
    pub id: i64,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskView>,
    pub count: usize,
}

fn assignment_notice(task: &Task) -> Vec<NotificationDraft> {
    task.assignee_id
        .map(|user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::TaskAssigned,
                "task",
                task.id,
                format!("Task assigned: {}", task.name),
                task.description.clone().unwrap_or_else(|| task.name.clone()),
            )
            .project(task.project_id)
        })
        .into_iter()
        .collect()
}

/// Load a task whose project the caller may see.
pub(crate) fn visible_task(ws: &Workspace, caller: &Caller, task_id: i64) -> Result<Task> {
    let task = ws.storage.get_task(task_id)?;
    ws.visible_project(caller, task.project_id)?;
    Ok(task)
}

pub fn task_create(ws: &mut Workspace, caller: &Caller, input: CreateTask) -> Result<TaskView> {
    caller.require(Capability::ManageTasks)?;
    let project = ws.visible_project(caller, input.project_id)?;
    let name = required(&input.name, "Task name")?;
    check_schedule(input.start_date, input.end_date)?;
    if let Some(assignee) = input.assignee_id {
        ws.require_member(&project, assignee)?;
    }

    let now = Utc::now();
    let task = ws.storage.insert_task(&Task {
        id: 0,
        project_id: project.id,
        name,
        description: clean(input.description),
        assignee_id: input.assignee_id,
        start_date: input.start_date,
        end_date: input.end_date,
        progress: 0,
        status: TaskStatus::Todo,
        created_at: now,
        updated_at: now,
    })?;

    ws.audit(
        caller,
        "task.create",
        "task",
        Some(task.id),
        &json!({"project_id": task.project_id, "name": task.name, "assignee_id": task.assignee_id}),
    );
    let drafts = assignment_notice(&task);
    ws.notify(caller, drafts);
    Ok(TaskView::new(task, ws.today()))
}

pub fn task_get(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<TaskView> {
    let task = visible_task(ws, caller, input.id)?;
    Ok(TaskView::new(task, ws.today()))
}

pub fn task_list(ws: &mut Workspace, caller: &Caller, input: ListTasks) -> Result<TaskList> {
    if let Some(project_id) = input.project_id {
        ws.visible_project(caller, project_id)?;
    }
    let today = ws.today();
    let tasks: Vec<TaskView> = ws
        .storage
        .list_tasks(&TaskFilter {
            project_id: input.project_id,
            assignee_id: input.assignee_id,
            visible_to: (!caller.is_admin()).then_some(caller.user_id),
        })?
        .into_iter()
        .map(|t| TaskView::new(t, today))
        .collect();
    Ok(TaskList {
        count: tasks.len(),
        tasks,
    })
}

pub fn task_update(ws: &mut Workspace, caller: &Caller, input: UpdateTask) -> Result<TaskView> {
    caller.require(Capability::ManageTasks)?;
    let mut task = visible_task(ws, caller, input.id)?;
    let previous_assignee = task.assignee_id;

    if let Some(name) = input.name {
        task.name = required(&name, "Task name")?;
    }
    if input.description.is_some() {
        task.description = clean(input.description);
    }
    if let Some(assignee) = input.assignee_id {
        let project = ws.storage.get_project(task.project_id)?;
        ws.require_member(&project, assignee)?;
        task.assignee_id = Some(assignee);
    }
    if input.start_date.is_some() {
        task.start_date = input.start_date;
    }
    if input.end_date.is_some() {
        task.end_date = input.end_date;
    }
    check_schedule(task.start_date, task.end_date)?;
    task.updated_at = Utc::now();

    ws.storage.update_task(&task)?;
    ws.audit(
        caller,
        "task.update",
        "task",
        Some(task.id),
        &json!({"name": task.name, "assignee_id": task.assignee_id,
                "start_date": task.start_date, "end_date": task.end_date}),
    );
    if task.assignee_id != previous_assignee {
        let drafts = assignment_notice(&task);
        ws.notify(caller, drafts);
    }
    Ok(TaskView::new(task, ws.today()))
}

pub fn task_delete(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<Deleted> {
    caller.require(Capability::ManageTasks)?;
    let task = visible_task(ws, caller, input.id)?;
    ws.storage.delete_task(task.id)?;
    ws.audit(
        caller,
        "task.delete",
        "task",
        Some(task.id),
        &json!({"project_id": task.project_id, "name": task.name}),
    );
    Ok(Deleted::new("task", task.id))
}

/// Set progress by hand. Field engineers may only update their own tasks.
///
/// The next checklist result recorded on the task recomputes progress and
/// overrides a manual value.
pub fn task_update_progress(
    ws: &mut Workspace,
    caller: &Caller,
    input: UpdateProgress,
) -> Result<TaskView> {
    caller.require(Capability::UpdateTaskProgress)?;
    if input.progress > 100 {
        return Err(Error::BadRequest(format!(
            "Progress must be between 0 and 100, got {}",
            input.progress
        )));
    }
    let task = visible_task(ws, caller, input.id)?;
    if !caller.can(Capability::ManageTasks) {
        ensure(
            task.assignee_id == Some(caller.user_id),
            "update progress of a task assigned to someone else",
        )?;
    }

    ws.storage
        .set_task_progress(task.id, input.progress, Utc::now())?;
    ws.audit(
        caller,
        "task.updateProgress",
        "task",
        Some(task.id),
        &json!({"from": task.progress, "to": input.progress}),
    );
    let task = ws.storage.get_task(task.id)?;
    Ok(TaskView::new(task, ws.today()))
}

impl Output for TaskView {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let t = &self.task;
        let mut lines = vec![
            format!("#{} {} (project {})", t.id, t.name, t.project_id),
            format!(
                "  Status: {}  Progress: {}%",
                self.display_status, t.progress
            ),
        ];
        if let Some(assignee) = t.assignee_id {
            lines.push(format!("  Assignee: {}", assignee));
        }
        if t.start_date.is_some() || t.end_date.is_some() {
            lines.push(format!(
                "  Schedule: {} .. {}",
                t.start_date.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
                t.end_date.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string())
            ));
        }
        if let Some(ref desc) = t.description {
            lines.push(format!("  {}", desc));
        }
        lines.join("\n")
    }
}

impl Output for TaskList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks.".to_string();
        }
        let mut lines = vec![format!("{} task(s):", self.count)];
        for view in &self.tasks {
            lines.push(format!(
                "  #{} [{}] {}% {}",
                view.task.id, view.display_status, view.task.progress, view.task.name
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayStatus;
    use crate::test_utils::Site;

    #[test]
    fn test_create_notifies_assignee() {
        let site = Site::new();
        let unread = site
            .ws
            .storage
            .list_notifications(site.engineer.user_id, true, 10)
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::TaskAssigned);
        assert_eq!(unread[0].entity_id, site.task_id);
    }

    #[test]
    fn test_assignee_must_be_member() {
        let mut site = Site::new();
        let manager = site.manager;
        let err = task_create(
            &mut site.ws,
            &manager,
            CreateTask {
                project_id: site.project_id,
                name: "Stray".to_string(),
                assignee_id: Some(site.admin.user_id),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_display_status_is_derived() {
        let mut site = Site::new();
        let manager = site.manager;
        let today = site.ws.today();
        let view = task_update(
            &mut site.ws,
            &manager,
            UpdateTask {
                id: site.task_id,
                start_date: today.checked_sub_days(chrono::Days::new(10)),
                end_date: today.checked_sub_days(chrono::Days::new(1)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(view.display_status, DisplayStatus::Delayed);
    }

    #[test]
    fn test_engineer_updates_own_progress_only() {
        let mut site = Site::new();
        let engineer = site.engineer;
        let view = task_update_progress(
            &mut site.ws,
            &engineer,
            UpdateProgress {
                id: site.task_id,
                progress: 40,
            },
        )
        .unwrap();
        assert_eq!(view.task.progress, 40);
        assert_eq!(view.task.status, TaskStatus::InProgress);

        let manager = site.manager;
        let other = task_create(
            &mut site.ws,
            &manager,
            CreateTask {
                project_id: site.project_id,
                name: "Unassigned".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let err = task_update_progress(
            &mut site.ws,
            &engineer,
            UpdateProgress {
                id: other.task.id,
                progress: 10,
            },
        );
        assert!(matches!(err, Err(Error::Forbidden(_))));

        let err = task_update_progress(
            &mut site.ws,
            &manager,
            UpdateProgress {
                id: site.task_id,
                progress: 101,
            },
        );
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_viewer_cannot_create_tasks() {
        let mut site = Site::new();
        let viewer = site.viewer;
        let err = task_create(
            &mut site.ws,
            &viewer,
            CreateTask {
                project_id: site.project_id,
                name: "Nope".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(Error::Forbidden(_))));

        let list = task_list(&mut site.ws, &viewer, ListTasks::default()).unwrap();
        assert_eq!(list.count, 1);
    }
}
