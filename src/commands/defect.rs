//! Defect (CAR/PAR/NCR) procedures.

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{Deleted, IdInput, Output, Workspace, clean, clean_photos, required};
use crate::models::{
    AttachmentType, Defect, DefectAttachment, DefectInspection, DefectSeverity, DefectStatus,
    DefectType, InspectionOutcome, Project, Role,
};
use crate::permissions::{Caller, Capability, can_delete_defect, can_edit_defect, ensure};
use crate::storage::defects::DefectFilter;
use crate::workflow::bilingual;
use crate::workflow::defect as machine;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDefect {
    /// Optional; must match the task's project when given
    pub project_id: Option<i64>,
    pub task_id: i64,
    pub checklist_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type", alias = "defect_type")]
    pub defect_type: Option<DefectType>,
    pub severity: Option<DefectSeverity>,
    pub assigned_to: Option<i64>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub before_photos: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDefects {
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub status: Option<DefectStatus>,
    pub severity: Option<DefectSeverity>,
    #[serde(rename = "type", alias = "defect_type")]
    pub defect_type: Option<DefectType>,
    pub assigned_to: Option<i64>,
}

/// Field edits plus an optional status change, applied in that order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDefect {
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Option<DefectSeverity>,
    pub due_date: Option<NaiveDate>,
    pub root_cause: Option<String>,
    pub corrective_action: Option<String>,
    pub preventive_action: Option<String>,
    pub implementation_method: Option<String>,
    pub resolution_notes: Option<String>,
    pub before_photos: Option<Vec<String>>,
    pub after_photos: Option<Vec<String>>,
    pub status: Option<DefectStatus>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AssignDefect {
    pub id: i64,
    pub assigned_to: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddAttachment {
    pub defect_id: i64,
    pub attachment_type: AttachmentType,
    pub file_url: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DefectIdInput {
    pub defect_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordReinspection {
    pub id: i64,
    pub result: InspectionOutcome,
    pub comments: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

/// A defect with the moves currently open to it.
#[derive(Debug, Clone, Serialize)]
pub struct DefectDetail {
    #[serde(flatten)]
    pub defect: Defect,
    pub next_statuses: Vec<DefectStatus>,
    pub overdue: bool,
}

impl DefectDetail {
    pub fn new(defect: Defect, today: NaiveDate) -> Self {
        Self {
            next_statuses: machine::next_statuses(defect.status),
            overdue: defect.is_overdue(today),
            defect,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DefectList {
    pub defects: Vec<DefectDetail>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentList {
    pub defect_id: i64,
    pub attachments: Vec<DefectAttachment>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionList {
    pub defect_id: i64,
    pub inspections: Vec<DefectInspection>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReinspectionRecorded {
    pub inspection: DefectInspection,
    pub defect: DefectDetail,
}

/// Load a defect whose project the caller may see.
fn visible_defect(ws: &Workspace, caller: &Caller, id: i64) -> Result<(Defect, Project)> {
    let defect = ws.storage.get_defect(id)?;
    let project = ws.visible_project(caller, defect.project_id)?;
    Ok((defect, project))
}

fn editable_defect(ws: &Workspace, caller: &Caller, id: i64) -> Result<(Defect, Project)> {
    let (defect, project) = visible_defect(ws, caller, id)?;
    ensure(
        can_edit_defect(caller, &defect),
        &format!("edit {} #{}", defect.defect_type, defect.id),
    )?;
    Ok((defect, project))
}

/// Record a defect edit in `changes` when `value` was supplied.
fn merge_text(
    field: &mut Option<String>,
    value: Option<String>,
    name: &str,
    changes: &mut Map<String, Value>,
) {
    if value.is_some() {
        *field = clean(value);
        changes.insert(name.to_string(), json!(field));
    }
}

pub fn defect_create(ws: &mut Workspace, caller: &Caller, input: CreateDefect) -> Result<DefectDetail> {
    caller.require(Capability::ReportDefect)?;
    let task = ws.storage.get_task(input.task_id)?;
    if let Some(project_id) = input.project_id.filter(|&p| p != task.project_id) {
        return Err(Error::BadRequest(format!(
            "Task {} does not belong to project {}",
            task.id, project_id
        )));
    }
    let project = ws.visible_project(caller, task.project_id)?;
    if let Some(checklist_id) = input.checklist_id {
        let checklist = ws.storage.get_checklist(checklist_id)?;
        if checklist.task_id != task.id {
            return Err(Error::BadRequest(format!(
                "Checklist {} does not belong to task {}",
                checklist_id, task.id
            )));
        }
    }
    let title = required(&input.title, "Defect title")?;
    let defect_type = input
        .defect_type
        .ok_or_else(|| Error::BadRequest("Defect type is required (CAR, PAR or NCR)".to_string()))?;
    if let Some(assignee) = input.assigned_to {
        ws.require_member(&project, assignee)?;
    }

    let severity = input.severity.unwrap_or_default();
    let today = ws.today();
    let due_date = input.due_date.or_else(|| {
        today.checked_add_days(Days::new(u64::from(ws.config.due_days_for(severity))))
    });
    let now = Utc::now();
    let defect = ws.storage.insert_defect(&Defect {
        id: 0,
        project_id: project.id,
        task_id: task.id,
        checklist_id: input.checklist_id,
        title,
        description: clean(input.description),
        defect_type,
        severity,
        status: DefectStatus::Reported,
        reported_by: caller.user_id,
        assigned_to: input.assigned_to,
        root_cause: None,
        corrective_action: None,
        preventive_action: None,
        implementation_method: None,
        resolution_notes: None,
        before_photos: clean_photos(input.before_photos),
        after_photos: Vec::new(),
        due_date,
        resolved_at: None,
        verified_by: None,
        verified_at: None,
        created_at: now,
        updated_at: now,
    })?;

    ws.audit(
        caller,
        "defect.create",
        "defect",
        Some(defect.id),
        &json!({"type": defect.defect_type, "severity": defect.severity,
                "task_id": defect.task_id, "title": defect.title}),
    );
    if let Some(assignee) = defect.assigned_to {
        let drafts = machine::assignment_notices(&defect, assignee);
        ws.notify(caller, drafts);
    }
    Ok(DefectDetail::new(defect, today))
}

pub fn defect_get(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<DefectDetail> {
    let (defect, _) = visible_defect(ws, caller, input.id)?;
    Ok(DefectDetail::new(defect, ws.today()))
}

pub fn defect_list(ws: &mut Workspace, caller: &Caller, input: ListDefects) -> Result<DefectList> {
    if let Some(project_id) = input.project_id {
        ws.visible_project(caller, project_id)?;
    }
    let today = ws.today();
    let defects: Vec<DefectDetail> = ws
        .storage
        .list_defects(&DefectFilter {
            project_id: input.project_id,
            task_id: input.task_id,
            status: input.status,
            severity: input.severity,
            defect_type: input.defect_type,
            assigned_to: input.assigned_to,
            visible_to: (!caller.is_admin()).then_some(caller.user_id),
        })?
        .into_iter()
        .map(|d| DefectDetail::new(d, today))
        .collect();
    Ok(DefectList {
        count: defects.len(),
        defects,
    })
}

/// Merge field edits, then apply the requested status change.
///
/// Guards see the merged defect, so a root cause and the move to
/// `analysis` can arrive together.
pub fn defect_update(ws: &mut Workspace, caller: &Caller, input: UpdateDefect) -> Result<DefectDetail> {
    let (mut defect, project) = editable_defect(ws, caller, input.id)?;
    let mut changes = Map::new();

    if let Some(title) = input.title {
        defect.title = required(&title, "Defect title")?;
        changes.insert("title".to_string(), json!(defect.title));
    }
    if let Some(severity) = input.severity {
        defect.severity = severity;
        changes.insert("severity".to_string(), json!(severity));
    }
    if let Some(due) = input.due_date {
        defect.due_date = Some(due);
        changes.insert("due_date".to_string(), json!(due));
    }
    merge_text(&mut defect.description, input.description, "description", &mut changes);
    merge_text(&mut defect.root_cause, input.root_cause, "root_cause", &mut changes);
    merge_text(
        &mut defect.corrective_action,
        input.corrective_action,
        "corrective_action",
        &mut changes,
    );
    merge_text(
        &mut defect.preventive_action,
        input.preventive_action,
        "preventive_action",
        &mut changes,
    );
    merge_text(
        &mut defect.implementation_method,
        input.implementation_method,
        "implementation_method",
        &mut changes,
    );
    merge_text(
        &mut defect.resolution_notes,
        input.resolution_notes,
        "resolution_notes",
        &mut changes,
    );
    if let Some(photos) = input.before_photos {
        let photos = clean_photos(photos);
        // Past `reported`, before photos may grow but not shrink.
        if defect.status != DefectStatus::Reported
            && defect.before_photos.iter().any(|p| !photos.contains(p))
        {
            return Err(Error::BadRequest(bilingual(
                "Before photos cannot be removed after the defect is reported",
                "ไม่สามารถลบรูปภาพก่อนแก้ไขหลังจากรายงานแล้ว",
            )));
        }
        defect.before_photos = photos;
        changes.insert("before_photos".to_string(), json!(defect.before_photos));
    }
    if let Some(photos) = input.after_photos {
        defect.after_photos = clean_photos(photos);
        changes.insert("after_photos".to_string(), json!(defect.after_photos));
    }

    let now = Utc::now();
    let mut moved = None;
    match input.status {
        Some(to) if to != defect.status => {
            let verifier = if to == DefectStatus::Closed {
                caller.require(Capability::VerifyDefect)?;
                Some(caller.user_id)
            } else {
                None
            };
            let from = machine::transition(&mut defect, to, verifier, now)?;
            changes.insert("from".to_string(), json!(from));
            changes.insert("to".to_string(), json!(to));
            moved = Some(from);
        }
        _ => defect.updated_at = now,
    }

    ws.storage.update_defect(&defect)?;
    ws.audit(
        caller,
        "defect.update",
        "defect",
        Some(defect.id),
        &Value::Object(changes),
    );
    if let Some(from) = moved {
        let mut drafts = machine::status_change_notices(&defect, from, project.owner_id);
        if defect.status == DefectStatus::PendingReinspection {
            let inspectors = ws
                .storage
                .project_members_with_role(project.id, Role::QcInspector)?;
            drafts.extend(machine::reinspection_request_notices(&defect, &inspectors));
        }
        ws.notify(caller, drafts);
    }
    Ok(DefectDetail::new(defect, ws.today()))
}

pub fn defect_assign(ws: &mut Workspace, caller: &Caller, input: AssignDefect) -> Result<DefectDetail> {
    caller.require(Capability::EditDefect)?;
    let (mut defect, project) = editable_defect(ws, caller, input.id)?;
    ws.require_member(&project, input.assigned_to)?;

    let previous = defect.assigned_to;
    defect.assigned_to = Some(input.assigned_to);
    defect.updated_at = Utc::now();
    ws.storage.update_defect(&defect)?;

    ws.audit(
        caller,
        "defect.assign",
        "defect",
        Some(defect.id),
        &json!({"from": previous, "to": input.assigned_to}),
    );
    if previous != defect.assigned_to {
        let drafts = machine::assignment_notices(&defect, input.assigned_to);
        ws.notify(caller, drafts);
    }
    Ok(DefectDetail::new(defect, ws.today()))
}

pub fn defect_delete(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<Deleted> {
    let (defect, project) = visible_defect(ws, caller, input.id)?;
    ensure(
        can_delete_defect(caller, &defect, &project),
        &format!("delete {} #{}", defect.defect_type, defect.id),
    )?;
    ws.storage.delete_defect(defect.id)?;
    ws.audit(
        caller,
        "defect.delete",
        "defect",
        Some(defect.id),
        &json!({"type": defect.defect_type, "title": defect.title, "status": defect.status}),
    );
    Ok(Deleted::new("defect", defect.id))
}

/// Attach a file by URL. Before/after attachments also extend the
/// defect's photo lists.
pub fn defect_add_attachment(
    ws: &mut Workspace,
    caller: &Caller,
    input: AddAttachment,
) -> Result<DefectAttachment> {
    let (defect, _) = editable_defect(ws, caller, input.defect_id)?;
    let file_url = required(&input.file_url, "File URL")?;
    let attachment = ws.storage.insert_attachment(&DefectAttachment {
        id: 0,
        defect_id: defect.id,
        attachment_type: input.attachment_type,
        file_url,
        file_name: clean(input.file_name),
        uploaded_by: caller.user_id,
        created_at: Utc::now(),
    })?;

    ws.audit(
        caller,
        "defect.addAttachment",
        "defect",
        Some(defect.id),
        &json!({"attachment_type": attachment.attachment_type, "file_url": attachment.file_url}),
    );
    Ok(attachment)
}

pub fn defect_list_attachments(
    ws: &mut Workspace,
    caller: &Caller,
    input: DefectIdInput,
) -> Result<AttachmentList> {
    let (defect, _) = visible_defect(ws, caller, input.defect_id)?;
    let attachments = ws.storage.list_attachments(defect.id)?;
    Ok(AttachmentList {
        defect_id: defect.id,
        count: attachments.len(),
        attachments,
    })
}

/// Move a resolved defect to `pending_reinspection` and call the inspectors.
pub fn defect_request_reinspection(
    ws: &mut Workspace,
    caller: &Caller,
    input: IdInput,
) -> Result<DefectDetail> {
    let (mut defect, project) = editable_defect(ws, caller, input.id)?;
    let from = machine::transition(&mut defect, DefectStatus::PendingReinspection, None, Utc::now())?;
    ws.storage.update_defect(&defect)?;

    ws.audit(
        caller,
        "defect.requestReinspection",
        "defect",
        Some(defect.id),
        &json!({"from": from, "to": defect.status}),
    );
    let inspectors = ws
        .storage
        .project_members_with_role(project.id, Role::QcInspector)?;
    let mut drafts = machine::reinspection_request_notices(&defect, &inspectors);
    drafts.extend(machine::status_change_notices(&defect, from, project.owner_id));
    ws.notify(caller, drafts);
    Ok(DefectDetail::new(defect, ws.today()))
}

/// Record a reinspection: `passed` closes the defect with the inspector as
/// verifier, `failed` sends it back to `in_progress`.
pub fn defect_record_reinspection(
    ws: &mut Workspace,
    caller: &Caller,
    input: RecordReinspection,
) -> Result<ReinspectionRecorded> {
    caller.require(Capability::VerifyDefect)?;
    let (mut defect, project) = editable_defect(ws, caller, input.id)?;
    if defect.status != DefectStatus::PendingReinspection {
        return Err(Error::BadRequest(bilingual(
            &format!(
                "Defect is {}, not awaiting reinspection",
                defect.status
            ),
            "รายการนี้ไม่ได้อยู่ระหว่างรอตรวจซ้ำ",
        )));
    }

    let now = Utc::now();
    let target = machine::reinspection_target(input.result);
    let from = machine::transition(&mut defect, target, Some(caller.user_id), now)?;
    let inspection = ws.storage.insert_defect_inspection(
        &defect,
        &DefectInspection {
            id: 0,
            defect_id: defect.id,
            inspector_id: caller.user_id,
            result: input.result,
            comments: clean(input.comments),
            photo_urls: clean_photos(input.photo_urls),
            inspected_at: now,
        },
    )?;

    ws.audit(
        caller,
        "defect.recordReinspection",
        "defect",
        Some(defect.id),
        &json!({"result": inspection.result, "from": from, "to": defect.status}),
    );
    let drafts = machine::status_change_notices(&defect, from, project.owner_id);
    ws.notify(caller, drafts);
    Ok(ReinspectionRecorded {
        inspection,
        defect: DefectDetail::new(defect, ws.today()),
    })
}

pub fn defect_inspections(
    ws: &mut Workspace,
    caller: &Caller,
    input: IdInput,
) -> Result<InspectionList> {
    let (defect, _) = visible_defect(ws, caller, input.id)?;
    let inspections = ws.storage.list_defect_inspections(defect.id)?;
    Ok(InspectionList {
        defect_id: defect.id,
        count: inspections.len(),
        inspections,
    })
}

impl Output for DefectDetail {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let d = &self.defect;
        let mut lines = vec![
            format!("{} #{} {}", d.defect_type, d.id, d.title),
            format!(
                "  Status: {}  Severity: {}  Task: {}",
                d.status, d.severity, d.task_id
            ),
        ];
        if let Some(assignee) = d.assigned_to {
            lines.push(format!("  Assigned to: {}", assignee));
        }
        if let Some(due) = d.due_date {
            let flag = if self.overdue { " (OVERDUE)" } else { "" };
            lines.push(format!("  Due: {}{}", due, flag));
        }
        for (label, value) in [
            ("Root cause", &d.root_cause),
            ("Corrective action", &d.corrective_action),
            ("Preventive action", &d.preventive_action),
            ("Implementation", &d.implementation_method),
            ("Resolution", &d.resolution_notes),
        ] {
            if let Some(text) = value {
                lines.push(format!("  {}: {}", label, text));
            }
        }
        if !d.before_photos.is_empty() || !d.after_photos.is_empty() {
            lines.push(format!(
                "  Photos: {} before, {} after",
                d.before_photos.len(),
                d.after_photos.len()
            ));
        }
        if !self.next_statuses.is_empty() {
            let next: Vec<&str> = self.next_statuses.iter().map(|s| s.as_str()).collect();
            lines.push(format!("  Next: {}", next.join(", ")));
        }
        lines.join("\n")
    }
}

impl Output for DefectList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.defects.is_empty() {
            return "No defects.".to_string();
        }
        let mut lines = vec![format!("{} defect(s):", self.count)];
        for detail in &self.defects {
            let d = &detail.defect;
            let flag = if detail.overdue { " !" } else { "" };
            lines.push(format!(
                "  {} #{} [{}] ({}) {}{}",
                d.defect_type, d.id, d.status, d.severity, d.title, flag
            ));
        }
        lines.join("\n")
    }
}

impl Output for DefectAttachment {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!(
            "Attachment #{} [{}] {}",
            self.id, self.attachment_type, self.file_url
        )
    }
}

impl Output for AttachmentList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.attachments.is_empty() {
            return format!("No attachments on defect {}.", self.defect_id);
        }
        let lines: Vec<String> = self.attachments.iter().map(|a| format!("  {}", a.to_human())).collect();
        format!("{} attachment(s):\n{}", self.count, lines.join("\n"))
    }
}

impl Output for InspectionList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.inspections.is_empty() {
            return format!("No reinspections of defect {}.", self.defect_id);
        }
        let mut lines = vec![format!("{} reinspection(s):", self.count)];
        for i in &self.inspections {
            lines.push(format!(
                "  #{} {} by user {} at {}",
                i.id,
                i.result,
                i.inspector_id,
                i.inspected_at.format("%Y-%m-%d %H:%M")
            ));
        }
        lines.join("\n")
    }
}

impl Output for ReinspectionRecorded {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!(
            "Reinspection {}: defect #{} is now {}",
            self.inspection.result, self.defect.defect.id, self.defect.defect.status
        )
    }
}
