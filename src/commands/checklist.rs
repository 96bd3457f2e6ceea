//! Checklist instance procedures: assignment, inspection and re-inspection.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::task::visible_task;
use super::{IdInput, Output, Workspace, clean, clean_photos};
use crate::models::progress::ResultTally;
use crate::models::{
    ChecklistItemResult, ChecklistStatus, ChecklistTemplate, ChecklistTemplateItem, ItemResult,
    Role, Task, TaskChecklist,
};
use crate::permissions::{Caller, Capability};
use crate::workflow::checklist::{self as machine, ChecklistAction};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AssignChecklist {
    pub task_id: i64,
    pub template_id: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TaskIdInput {
    pub task_id: i64,
}

/// One scored item.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemInput {
    pub template_item_id: i64,
    pub result: ItemResult,
    pub comments: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordItem {
    pub checklist_id: i64,
    #[serde(flatten)]
    pub item: ItemInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitChecklist {
    pub checklist_id: i64,
    #[serde(default)]
    pub results: Vec<ItemInput>,
    pub general_comments: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    pub signature: Option<String>,
}

/// A template item with whatever result it has on this instance.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistItemView {
    #[serde(flatten)]
    pub item: ChecklistTemplateItem,
    pub result: Option<ChecklistItemResult>,
}

/// A checklist instance with its items and completion figures.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistDetail {
    #[serde(flatten)]
    pub checklist: TaskChecklist,
    pub template_name: String,
    pub items: Vec<ChecklistItemView>,
    pub tally: ResultTally,
    pub completion_percentage: f64,
    pub pass_rate: Option<f64>,
    /// True once a re-inspection instance replaced this one
    pub superseded: bool,
    /// Progress of the owning task after this operation
    pub task_progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistSummary {
    #[serde(flatten)]
    pub checklist: TaskChecklist,
    pub template_name: String,
    pub completion_percentage: f64,
    pub superseded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistList {
    pub task_id: i64,
    pub checklists: Vec<ChecklistSummary>,
    pub count: usize,
}

fn load(ws: &Workspace, caller: &Caller, checklist_id: i64) -> Result<(TaskChecklist, Task)> {
    let checklist = ws.storage.get_checklist(checklist_id)?;
    let task = visible_task(ws, caller, checklist.task_id)?;
    Ok((checklist, task))
}

fn check_item(template: &ChecklistTemplate, item_id: i64) -> Result<()> {
    if template.items.iter().any(|i| i.id == item_id) {
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "Item {} is not part of checklist template \"{}\"",
            item_id, template.name
        )))
    }
}

fn to_result(checklist_id: i64, caller: &Caller, input: ItemInput) -> ChecklistItemResult {
    ChecklistItemResult {
        id: 0,
        task_checklist_id: checklist_id,
        template_item_id: input.template_item_id,
        result: input.result,
        comments: clean(input.comments),
        photo_urls: clean_photos(input.photo_urls),
        recorded_by: caller.user_id,
        recorded_at: Utc::now(),
    }
}

fn inspector_ids(ws: &Workspace, project_id: i64) -> Result<Vec<i64>> {
    ws.storage
        .project_members_with_role(project_id, Role::QcInspector)
}

pub(crate) fn checklist_detail(ws: &Workspace, checklist_id: i64) -> Result<ChecklistDetail> {
    let checklist = ws.storage.get_checklist(checklist_id)?;
    let template = ws.storage.get_template(checklist.template_id)?;
    let results = ws.storage.list_item_results(checklist_id)?;
    let tally = ResultTally::from_results(template.items.len(), results.iter().map(|r| r.result));

    let mut by_item: HashMap<i64, ChecklistItemResult> = results
        .into_iter()
        .map(|r| (r.template_item_id, r))
        .collect();
    let items = template
        .items
        .into_iter()
        .map(|item| ChecklistItemView {
            result: by_item.remove(&item.id),
            item,
        })
        .collect();

    Ok(ChecklistDetail {
        superseded: ws.storage.is_superseded(checklist_id)?,
        task_progress: ws.storage.get_task(checklist.task_id)?.progress,
        checklist,
        template_name: template.name,
        items,
        completion_percentage: tally.completion_percentage(),
        pass_rate: tally.pass_rate(),
        tally,
    })
}

/// Assign a template to a task as a new, unscored checklist.
pub fn checklist_assign(
    ws: &mut Workspace,
    caller: &Caller,
    input: AssignChecklist,
) -> Result<ChecklistDetail> {
    if !caller.can(Capability::ManageTasks) {
        caller.require(Capability::Inspect)?;
    }
    let task = visible_task(ws, caller, input.task_id)?;
    let template = ws.storage.get_template(input.template_id)?;
    if ws
        .storage
        .find_live_checklist(task.id, template.id)?
        .is_some()
    {
        return Err(Error::BadRequest(format!(
            "Checklist \"{}\" is already assigned to task \"{}\"",
            template.name, task.name
        )));
    }

    let now = Utc::now();
    let checklist = ws.storage.insert_checklist(&TaskChecklist {
        id: 0,
        task_id: task.id,
        template_id: template.id,
        stage: template.stage,
        status: ChecklistStatus::NotStarted,
        inspected_by: None,
        inspected_at: None,
        general_comments: None,
        photo_urls: Vec::new(),
        signature: None,
        reinspection_of: None,
        created_at: now,
        updated_at: now,
    })?;
    ws.recalculate_task_progress(task.id)?;

    ws.audit(
        caller,
        "checklist.assign",
        "checklist",
        Some(checklist.id),
        &json!({"task_id": task.id, "template_id": template.id}),
    );
    checklist_detail(ws, checklist.id)
}

/// Ask the project's inspectors to inspect a checklist.
pub fn checklist_request_inspection(
    ws: &mut Workspace,
    caller: &Caller,
    input: IdInput,
) -> Result<ChecklistDetail> {
    caller.require(Capability::RequestInspection)?;
    let (mut checklist, task) = load(ws, caller, input.id)?;
    checklist.status = machine::apply(checklist.status, ChecklistAction::RequestInspection)?;
    checklist.updated_at = Utc::now();
    ws.storage.save_checklist_results(&checklist, &[])?;

    ws.audit(
        caller,
        "checklist.requestInspection",
        "checklist",
        Some(checklist.id),
        &json!({"task_id": task.id}),
    );
    let template = ws.storage.get_template(checklist.template_id)?;
    let inspectors = inspector_ids(ws, task.project_id)?;
    let drafts = machine::inspection_request_notices(&checklist, &task, &template.name, &inspectors);
    ws.notify(caller, drafts);
    checklist_detail(ws, checklist.id)
}

/// Score one item and recompute task progress.
pub fn checklist_record_item(
    ws: &mut Workspace,
    caller: &Caller,
    input: RecordItem,
) -> Result<ChecklistDetail> {
    caller.require(Capability::Inspect)?;
    let (mut checklist, task) = load(ws, caller, input.checklist_id)?;
    let template = ws.storage.get_template(checklist.template_id)?;
    check_item(&template, input.item.template_item_id)?;
    checklist.status = machine::apply(checklist.status, ChecklistAction::RecordItem)?;
    checklist.updated_at = Utc::now();

    let result = to_result(checklist.id, caller, input.item);
    ws.storage
        .save_checklist_results(&checklist, std::slice::from_ref(&result))?;
    ws.recalculate_task_progress(task.id)?;

    ws.audit(
        caller,
        "checklist.recordItem",
        "checklist",
        Some(checklist.id),
        &json!({"template_item_id": result.template_item_id, "result": result.result}),
    );
    checklist_detail(ws, checklist.id)
}

/// Submit an inspection. Any failed item fails the checklist.
pub fn checklist_submit(
    ws: &mut Workspace,
    caller: &Caller,
    input: SubmitChecklist,
) -> Result<ChecklistDetail> {
    caller.require(Capability::Inspect)?;
    let (mut checklist, task) = load(ws, caller, input.checklist_id)?;
    let template = ws.storage.get_template(checklist.template_id)?;
    for item in &input.results {
        check_item(&template, item.template_item_id)?;
    }

    let mut merged: HashMap<i64, ItemResult> = ws
        .storage
        .list_item_results(checklist.id)?
        .into_iter()
        .map(|r| (r.template_item_id, r.result))
        .collect();
    for item in &input.results {
        merged.insert(item.template_item_id, item.result);
    }
    let tally = ResultTally::from_results(template.items.len(), merged.values().copied());
    let status = machine::submit(checklist.status, &tally)?;

    let now = Utc::now();
    checklist.status = status;
    checklist.inspected_by = Some(caller.user_id);
    checklist.inspected_at = Some(now);
    if let Some(comments) = clean(input.general_comments) {
        checklist.general_comments = Some(comments);
    }
    for url in clean_photos(input.photo_urls) {
        if !checklist.photo_urls.contains(&url) {
            checklist.photo_urls.push(url);
        }
    }
    if let Some(signature) = clean(input.signature) {
        checklist.signature = Some(signature);
    }
    checklist.updated_at = now;

    let results: Vec<ChecklistItemResult> = input
        .results
        .into_iter()
        .map(|item| to_result(checklist.id, caller, item))
        .collect();
    ws.storage.save_checklist_results(&checklist, &results)?;
    ws.recalculate_task_progress(task.id)?;
    info!(checklist_id = checklist.id, %status, fail = tally.fail, "inspection submitted");

    ws.audit(
        caller,
        "checklist.submit",
        "checklist",
        Some(checklist.id),
        &json!({"status": status, "pass": tally.pass, "fail": tally.fail, "na": tally.na}),
    );
    let drafts = if status == ChecklistStatus::Failed {
        let project = ws.storage.get_project(task.project_id)?;
        machine::failure_notices(&checklist, &task, &template.name, project.owner_id, tally.fail)
    } else {
        machine::passed_notices(&checklist, &task, &template.name)
    };
    ws.notify(caller, drafts);
    checklist_detail(ws, checklist.id)
}

/// Spawn a re-inspection of a failed checklist.
pub fn checklist_reinspect(
    ws: &mut Workspace,
    caller: &Caller,
    input: IdInput,
) -> Result<ChecklistDetail> {
    caller.require(Capability::RequestInspection)?;
    let (failed, task) = load(ws, caller, input.id)?;
    if ws.storage.is_superseded(failed.id)? {
        return Err(Error::BadRequest(format!(
            "Checklist {} already has a re-inspection",
            failed.id
        )));
    }
    let status = machine::apply(failed.status, ChecklistAction::Reinspect)?;

    let now = Utc::now();
    let checklist = ws.storage.insert_checklist(&TaskChecklist {
        id: 0,
        task_id: failed.task_id,
        template_id: failed.template_id,
        stage: failed.stage,
        status,
        inspected_by: None,
        inspected_at: None,
        general_comments: None,
        photo_urls: Vec::new(),
        signature: None,
        reinspection_of: Some(failed.id),
        created_at: now,
        updated_at: now,
    })?;
    ws.recalculate_task_progress(task.id)?;

    ws.audit(
        caller,
        "checklist.reinspect",
        "checklist",
        Some(checklist.id),
        &json!({"reinspection_of": failed.id}),
    );
    let template = ws.storage.get_template(checklist.template_id)?;
    let inspectors = inspector_ids(ws, task.project_id)?;
    let drafts = machine::inspection_request_notices(&checklist, &task, &template.name, &inspectors);
    ws.notify(caller, drafts);
    checklist_detail(ws, checklist.id)
}

pub fn checklist_get(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<ChecklistDetail> {
    load(ws, caller, input.id)?;
    checklist_detail(ws, input.id)
}

/// Every checklist of a task, superseded ones included.
pub fn checklist_list_by_task(
    ws: &mut Workspace,
    caller: &Caller,
    input: TaskIdInput,
) -> Result<ChecklistList> {
    let task = visible_task(ws, caller, input.task_id)?;
    let mut templates: HashMap<i64, ChecklistTemplate> = HashMap::new();
    let mut checklists = Vec::new();

    for checklist in ws.storage.list_checklists(task.id)? {
        if !templates.contains_key(&checklist.template_id) {
            let template = ws.storage.get_template(checklist.template_id)?;
            templates.insert(template.id, template);
        }
        let template_name = templates
            .get(&checklist.template_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        let tally = ws.storage.checklist_tally(checklist.id)?;
        checklists.push(ChecklistSummary {
            superseded: ws.storage.is_superseded(checklist.id)?,
            completion_percentage: tally.completion_percentage(),
            template_name,
            checklist,
        });
    }

    Ok(ChecklistList {
        task_id: task.id,
        count: checklists.len(),
        checklists,
    })
}

impl Output for ChecklistDetail {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let c = &self.checklist;
        let mut lines = vec![
            format!(
                "Checklist #{} {} [{}] task {}",
                c.id, self.template_name, c.status, c.task_id
            ),
            format!(
                "  Scored {}/{} ({:.0}%)  pass {}  fail {}  n/a {}",
                self.tally.scored(),
                self.tally.total,
                self.completion_percentage,
                self.tally.pass,
                self.tally.fail,
                self.tally.na
            ),
        ];
        if let Some(original) = c.reinspection_of {
            lines.push(format!("  Re-inspection of #{}", original));
        }
        if self.superseded {
            lines.push("  Superseded by a re-inspection".to_string());
        }
        for view in &self.items {
            let mark = view
                .result
                .as_ref()
                .map(|r| r.result.as_str())
                .unwrap_or("-");
            lines.push(format!("  {:>4}  {}. {}", mark, view.item.position, view.item.title));
        }
        lines.join("\n")
    }
}

impl Output for ChecklistList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.checklists.is_empty() {
            return format!("No checklists on task {}.", self.task_id);
        }
        let mut lines = vec![format!("{} checklist(s) on task {}:", self.count, self.task_id)];
        for s in &self.checklists {
            let note = if s.superseded { " (superseded)" } else { "" };
            lines.push(format!(
                "  #{} {} [{}] {:.0}%{}",
                s.checklist.id, s.template_name, s.checklist.status, s.completion_percentage, note
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationKind, NotificationPriority, TaskStatus};
    use crate::test_utils::Site;

    fn assign(site: &mut Site) -> i64 {
        let inspector = site.inspector;
        checklist_assign(
            &mut site.ws,
            &inspector,
            AssignChecklist {
                task_id: site.task_id,
                template_id: site.template_id,
            },
        )
        .unwrap()
        .checklist
        .id
    }

    fn score(item_id: i64, result: ItemResult) -> ItemInput {
        ItemInput {
            template_item_id: item_id,
            result,
            comments: None,
            photo_urls: Vec::new(),
        }
    }

    fn request(site: &mut Site, id: i64) {
        let engineer = site.engineer;
        checklist_request_inspection(&mut site.ws, &engineer, IdInput { id }).unwrap();
    }

    #[test]
    fn test_assign_once_per_task() {
        let mut site = Site::new();
        assign(&mut site);
        let inspector = site.inspector;
        let err = checklist_assign(
            &mut site.ws,
            &inspector,
            AssignChecklist {
                task_id: site.task_id,
                template_id: site.template_id,
            },
        );
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_record_requires_open_inspection() {
        let mut site = Site::new();
        let id = assign(&mut site);
        let inspector = site.inspector;
        let err = checklist_record_item(
            &mut site.ws,
            &inspector,
            RecordItem {
                checklist_id: id,
                item: score(site.item_ids[0], ItemResult::Pass),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("request an inspection first"));
    }

    #[test]
    fn test_request_notifies_project_inspectors() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);

        let detail = checklist_get(&mut site.ws, &site.viewer.clone(), IdInput { id }).unwrap();
        assert_eq!(detail.checklist.status, ChecklistStatus::PendingInspection);

        let inbox = site
            .ws
            .storage
            .list_notifications(site.inspector.user_id, true, 10)
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::InspectionRequested);
    }

    #[test]
    fn test_recording_items_drives_task_progress() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);
        let inspector = site.inspector;

        let detail = checklist_record_item(
            &mut site.ws,
            &inspector,
            RecordItem {
                checklist_id: id,
                item: score(site.item_ids[0], ItemResult::Pass),
            },
        )
        .unwrap();
        assert_eq!(detail.checklist.status, ChecklistStatus::InProgress);
        assert_eq!(detail.task_progress, 33);

        let detail = checklist_record_item(
            &mut site.ws,
            &inspector,
            RecordItem {
                checklist_id: id,
                item: score(site.item_ids[1], ItemResult::Na),
            },
        )
        .unwrap();
        assert_eq!(detail.task_progress, 66);
        assert_eq!(detail.tally.scored(), 2);
    }

    #[test]
    fn test_submit_requires_every_item() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);
        let inspector = site.inspector;
        let err = checklist_submit(
            &mut site.ws,
            &inspector,
            SubmitChecklist {
                checklist_id: id,
                results: vec![score(site.item_ids[0], ItemResult::Pass)],
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("1 of 3 scored"));
    }

    #[test]
    fn test_failed_submission_then_reinspection() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);
        let inspector = site.inspector;

        let detail = checklist_submit(
            &mut site.ws,
            &inspector,
            SubmitChecklist {
                checklist_id: id,
                results: vec![
                    score(site.item_ids[0], ItemResult::Pass),
                    score(site.item_ids[1], ItemResult::Fail),
                    score(site.item_ids[2], ItemResult::Pass),
                ],
                general_comments: Some("Formwork out of level".to_string()),
                signature: Some("sig.png".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(detail.checklist.status, ChecklistStatus::Failed);
        assert_eq!(detail.checklist.inspected_by, Some(inspector.user_id));
        assert!(detail.checklist.inspected_at.is_some());
        assert_eq!(detail.task_progress, 66);

        for user in [site.engineer.user_id, site.manager.user_id] {
            let inbox = site.ws.storage.list_notifications(user, true, 10).unwrap();
            let failed = inbox
                .iter()
                .find(|n| n.kind == NotificationKind::InspectionFailed)
                .unwrap();
            assert_eq!(failed.priority, NotificationPriority::High);
            assert!(failed.send_email);
        }

        let engineer = site.engineer;
        let again = checklist_reinspect(&mut site.ws, &engineer, IdInput { id }).unwrap();
        assert_eq!(again.checklist.status, ChecklistStatus::PendingInspection);
        assert_eq!(again.checklist.reinspection_of, Some(id));
        assert_eq!(again.task_progress, 0);

        let twice = checklist_reinspect(&mut site.ws, &engineer, IdInput { id });
        assert!(matches!(twice, Err(Error::BadRequest(_))));

        let done = checklist_submit(
            &mut site.ws,
            &inspector,
            SubmitChecklist {
                checklist_id: again.checklist.id,
                results: site
                    .item_ids
                    .iter()
                    .map(|i| score(*i, ItemResult::Pass))
                    .collect(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(done.checklist.status, ChecklistStatus::Completed);
        assert_eq!(done.task_progress, 100);
        assert_eq!(
            site.ws.storage.get_task(site.task_id).unwrap().status,
            TaskStatus::Completed
        );

        let viewer = site.viewer;
        let list = checklist_list_by_task(
            &mut site.ws,
            &viewer,
            TaskIdInput {
                task_id: site.task_id,
            },
        )
        .unwrap();
        assert_eq!(list.count, 2);
        assert!(list.checklists[0].superseded);
        assert!(!list.checklists[1].superseded);
    }

    #[test]
    fn test_only_failed_checklists_are_reinspected() {
        let mut site = Site::new();
        let id = assign(&mut site);
        let engineer = site.engineer;
        let err = checklist_reinspect(&mut site.ws, &engineer, IdInput { id });
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_engineer_cannot_score() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);
        let engineer = site.engineer;
        let err = checklist_record_item(
            &mut site.ws,
            &engineer,
            RecordItem {
                checklist_id: id,
                item: score(site.item_ids[0], ItemResult::Pass),
            },
        );
        assert!(matches!(err, Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_unknown_item_is_rejected() {
        let mut site = Site::new();
        let id = assign(&mut site);
        request(&mut site, id);
        let inspector = site.inspector;
        let err = checklist_record_item(
            &mut site.ws,
            &inspector,
            RecordItem {
                checklist_id: id,
                item: score(9999, ItemResult::Pass),
            },
        );
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }
}
