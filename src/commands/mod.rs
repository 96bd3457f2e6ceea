//! Command implementations for qcflow.
//!
//! One function per RPC procedure, grouped by resource:
//! - `user` - accounts and roles
//! - `project` - projects and membership
//! - `task` - tasks and manual progress
//! - `template` - checklist templates
//! - `checklist` - checklist instances and inspections
//! - `defect` - CAR/PAR/NCR tickets
//! - `notification` - the caller's inbox
//! - `dashboard` - aggregated statistics
//! - `activity` - the audit trail
//! - `system` - local setup and configuration (CLI only)
//!
//! Every mutating procedure follows the same order: permission gate,
//! validation, state change, audit record, notification fan-out.

pub mod activity;
pub mod checklist;
pub mod dashboard;
pub mod defect;
pub mod notification;
pub mod project;
pub mod system;
pub mod task;
pub mod template;
pub mod user;

use chrono::{Local, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::QcConfig;
use crate::models::Project;
use crate::models::progress::task_progress;
use crate::notify::{DispatchReport, Dispatcher, NotificationDraft};
use crate::permissions::{Caller, can_view_project, ensure};
use crate::storage::Storage;
use crate::{Error, Result, audit};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Everything a procedure needs: storage, the notification dispatcher and
/// the effective configuration.
pub struct Workspace {
    pub storage: Storage,
    pub dispatcher: Dispatcher,
    pub config: QcConfig,
}

impl Workspace {
    pub fn new(storage: Storage, dispatcher: Dispatcher, config: QcConfig) -> Self {
        Self {
            storage,
            dispatcher,
            config,
        }
    }

    /// Calendar date used for display status and due dates.
    pub fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    /// Resolve the caller identity supplied by the outer auth layer.
    pub fn authenticate(&self, user_id: Option<i64>) -> Result<Caller> {
        let id = user_id.ok_or_else(|| {
            Error::Unauthorized("no user identity supplied (use --as or QC_USER)".to_string())
        })?;
        let user = self
            .storage
            .find_user(id)?
            .ok_or_else(|| Error::Unauthorized(format!("unknown user: {}", id)))?;
        Ok(Caller::new(user.id, user.role))
    }

    /// Load a project the caller may see.
    pub(crate) fn visible_project(&self, caller: &Caller, project_id: i64) -> Result<Project> {
        let project = self.storage.get_project(project_id)?;
        if !caller.is_admin() {
            let members = self.storage.project_member_ids(project_id)?;
            ensure(
                can_view_project(caller, &project, &members),
                &format!("access project {}", project.code),
            )?;
        }
        Ok(project)
    }

    /// Fail unless `user_id` belongs to the project.
    pub(crate) fn require_member(&self, project: &Project, user_id: i64) -> Result<()> {
        self.storage.get_user(user_id)?;
        if self.storage.is_project_member(project.id, user_id)? {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "User {} is not a member of project {}",
                user_id, project.code
            )))
        }
    }

    /// Recompute a task's progress from its live checklists and store it.
    ///
    /// Returns the new progress, or `None` when the task has no checklist
    /// items and keeps its manual progress.
    pub(crate) fn recalculate_task_progress(&mut self, task_id: i64) -> Result<Option<u8>> {
        let tallies = self.storage.live_checklist_tallies(task_id)?;
        let Some(progress) = task_progress(&tallies) else {
            return Ok(None);
        };
        self.storage.set_task_progress(task_id, progress, Utc::now())?;
        debug!(task_id, progress, "task progress recalculated");
        Ok(Some(progress))
    }

    pub(crate) fn audit(
        &mut self,
        caller: &Caller,
        action: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        details: &Value,
    ) {
        audit::record(
            &mut self.storage,
            caller,
            action,
            entity_type,
            entity_id,
            details,
        );
    }

    pub(crate) fn notify(&mut self, caller: &Caller, drafts: Vec<NotificationDraft>) -> DispatchReport {
        if drafts.is_empty() {
            return DispatchReport::default();
        }
        self.dispatcher
            .dispatch(&mut self.storage, caller.user_id, drafts)
    }
}

/// Input naming a single entity.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdInput {
    pub id: i64,
}

/// Result of a delete.
#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub entity_type: String,
    pub id: i64,
    pub deleted: bool,
}

impl Deleted {
    pub(crate) fn new(entity_type: &str, id: i64) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id,
            deleted: true,
        }
    }
}

impl Output for Deleted {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("Deleted {} {}", self.entity_type, self.id)
    }
}

/// Every procedure reachable through [`call`].
pub const PROCEDURES: &[&str] = &[
    "user.create",
    "user.list",
    "user.me",
    "project.create",
    "project.get",
    "project.list",
    "project.update",
    "project.delete",
    "project.addMember",
    "project.removeMember",
    "task.create",
    "task.get",
    "task.list",
    "task.update",
    "task.delete",
    "task.updateProgress",
    "template.create",
    "template.addItem",
    "template.get",
    "template.list",
    "template.delete",
    "checklist.assign",
    "checklist.requestInspection",
    "checklist.recordItem",
    "checklist.submit",
    "checklist.reinspect",
    "checklist.get",
    "checklist.listByTask",
    "defect.create",
    "defect.get",
    "defect.list",
    "defect.update",
    "defect.assign",
    "defect.delete",
    "defect.addAttachment",
    "defect.listAttachments",
    "defect.requestReinspection",
    "defect.recordReinspection",
    "defect.inspections",
    "notification.list",
    "notification.markRead",
    "notification.markAllRead",
    "notification.unreadCount",
    "dashboard.projectStats",
    "dashboard.summary",
    "activity.list",
];

/// Decode procedure input. A missing body reads as an empty object.
fn input<T: DeserializeOwned>(value: Value) -> Result<T> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| Error::BadRequest(format!("Invalid input: {}", e)))
}

fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Run a procedure by name with JSON input, returning its JSON result.
pub fn call(ws: &mut Workspace, caller: &Caller, procedure: &str, params: Value) -> Result<Value> {
    debug!(procedure, user_id = caller.user_id, "rpc call");
    match procedure {
        "user.create" => reply(user::user_create(ws, caller, input(params)?)?),
        "user.list" => reply(user::user_list(ws, caller, input(params)?)?),
        "user.me" => reply(user::user_me(ws, caller)?),

        "project.create" => reply(project::project_create(ws, caller, input(params)?)?),
        "project.get" => reply(project::project_get(ws, caller, input(params)?)?),
        "project.list" => reply(project::project_list(ws, caller)?),
        "project.update" => reply(project::project_update(ws, caller, input(params)?)?),
        "project.delete" => reply(project::project_delete(ws, caller, input(params)?)?),
        "project.addMember" => reply(project::project_add_member(ws, caller, input(params)?)?),
        "project.removeMember" => {
            reply(project::project_remove_member(ws, caller, input(params)?)?)
        }

        "task.create" => reply(task::task_create(ws, caller, input(params)?)?),
        "task.get" => reply(task::task_get(ws, caller, input(params)?)?),
        "task.list" => reply(task::task_list(ws, caller, input(params)?)?),
        "task.update" => reply(task::task_update(ws, caller, input(params)?)?),
        "task.delete" => reply(task::task_delete(ws, caller, input(params)?)?),
        "task.updateProgress" => reply(task::task_update_progress(ws, caller, input(params)?)?),

        "template.create" => reply(template::template_create(ws, caller, input(params)?)?),
        "template.addItem" => reply(template::template_add_item(ws, caller, input(params)?)?),
        "template.get" => reply(template::template_get(ws, caller, input(params)?)?),
        "template.list" => reply(template::template_list(ws, caller, input(params)?)?),
        "template.delete" => reply(template::template_delete(ws, caller, input(params)?)?),

        "checklist.assign" => reply(checklist::checklist_assign(ws, caller, input(params)?)?),
        "checklist.requestInspection" => reply(checklist::checklist_request_inspection(
            ws,
            caller,
            input(params)?,
        )?),
        "checklist.recordItem" => {
            reply(checklist::checklist_record_item(ws, caller, input(params)?)?)
        }
        "checklist.submit" => reply(checklist::checklist_submit(ws, caller, input(params)?)?),
        "checklist.reinspect" => {
            reply(checklist::checklist_reinspect(ws, caller, input(params)?)?)
        }
        "checklist.get" => reply(checklist::checklist_get(ws, caller, input(params)?)?),
        "checklist.listByTask" => {
            reply(checklist::checklist_list_by_task(ws, caller, input(params)?)?)
        }

        "defect.create" => reply(defect::defect_create(ws, caller, input(params)?)?),
        "defect.get" => reply(defect::defect_get(ws, caller, input(params)?)?),
        "defect.list" => reply(defect::defect_list(ws, caller, input(params)?)?),
        "defect.update" => reply(defect::defect_update(ws, caller, input(params)?)?),
        "defect.assign" => reply(defect::defect_assign(ws, caller, input(params)?)?),
        "defect.delete" => reply(defect::defect_delete(ws, caller, input(params)?)?),
        "defect.addAttachment" => {
            reply(defect::defect_add_attachment(ws, caller, input(params)?)?)
        }
        "defect.listAttachments" => {
            reply(defect::defect_list_attachments(ws, caller, input(params)?)?)
        }
        "defect.requestReinspection" => reply(defect::defect_request_reinspection(
            ws,
            caller,
            input(params)?,
        )?),
        "defect.recordReinspection" => reply(defect::defect_record_reinspection(
            ws,
            caller,
            input(params)?,
        )?),
        "defect.inspections" => reply(defect::defect_inspections(ws, caller, input(params)?)?),

        "notification.list" => {
            reply(notification::notification_list(ws, caller, input(params)?)?)
        }
        "notification.markRead" => {
            reply(notification::notification_mark_read(ws, caller, input(params)?)?)
        }
        "notification.markAllRead" => reply(notification::notification_mark_all_read(ws, caller)?),
        "notification.unreadCount" => reply(notification::notification_unread_count(ws, caller)?),

        "dashboard.projectStats" => {
            reply(dashboard::dashboard_project_stats(ws, caller, input(params)?)?)
        }
        "dashboard.summary" => reply(dashboard::dashboard_summary(ws, caller)?),

        "activity.list" => reply(activity::activity_list(ws, caller, input(params)?)?),

        other => Err(Error::NotFound(format!("Unknown procedure: {}", other))),
    }
}

/// Trim an optional string, treating blank as absent.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Require a non-blank string field.
pub(crate) fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::BadRequest(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Reject a schedule that ends before it starts.
pub(crate) fn check_schedule(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(Error::BadRequest(format!(
            "End date {} is before start date {}",
            end, start
        ))),
        _ => Ok(()),
    }
}

/// Drop blank entries from a photo list.
pub(crate) fn clean_photos(photos: Vec<String>) -> Vec<String> {
    photos
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Site;
    use serde_json::json;

    #[test]
    fn test_authenticate() {
        let site = Site::new();
        let caller = site.ws.authenticate(Some(site.inspector.user_id)).unwrap();
        assert_eq!(caller, site.inspector);

        assert!(matches!(
            site.ws.authenticate(None),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            site.ws.authenticate(Some(9999)),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_call_dispatches_by_name() {
        let mut site = Site::new();
        let caller = site.manager;
        let result = call(&mut site.ws, &caller, "project.get", json!({"id": site.project_id})).unwrap();
        assert_eq!(result["code"], "RT-01");
        assert_eq!(result["status"], "not_started");

        let me = call(&mut site.ws, &caller, "user.me", Value::Null).unwrap();
        assert_eq!(me["role"], "project_manager");
    }

    #[test]
    fn test_call_rejects_bad_input_and_unknown_procedures() {
        let mut site = Site::new();
        let caller = site.manager;
        let err = call(&mut site.ws, &caller, "task.get", json!({"id": "seven"})).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadRequest);

        let err = call(&mut site.ws, &caller, "task.explode", Value::Null).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::NotFound);
    }

    #[test]
    fn test_every_procedure_is_routed() {
        let mut site = Site::new();
        let caller = site.admin;
        for procedure in PROCEDURES {
            if let Err(Error::NotFound(msg)) = call(&mut site.ws, &caller, procedure, Value::Null) {
                assert!(!msg.starts_with("Unknown procedure"), "{} not routed", procedure);
            }
        }
    }

    #[test]
    fn test_check_schedule() {
        let a = NaiveDate::from_ymd_opt(2026, 1, 1);
        let b = NaiveDate::from_ymd_opt(2026, 2, 1);
        assert!(check_schedule(a, b).is_ok());
        assert!(check_schedule(b, a).is_err());
        assert!(check_schedule(None, a).is_ok());
    }
}
