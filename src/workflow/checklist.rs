//! Checklist inspection state machine.
//!
//! ```text
//! not_started ──request──▶ pending_inspection ──record item──▶ in_progress
//!                                  │                               │
//!                                  └───────────submit──────────────┤
//!                                                                  ▼
//!                                                      completed | failed
//!                                                                  │
//!                                  failed ──reinspect──▶ new instance (pending_inspection)
//! ```

use crate::models::progress::ResultTally;
use crate::models::{
    ChecklistStatus, NotificationKind, NotificationPriority, Task, TaskChecklist,
};
use crate::notify::NotificationDraft;
use crate::{Error, Result};

use super::bilingual;

/// Something a user does to a checklist instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistAction {
    RequestInspection,
    RecordItem,
    Reinspect,
}

/// Status reached by applying `action` to a checklist in `current`.
///
/// For `Reinspect` this is the status of the newly spawned instance; the
/// failed original keeps its status.
pub fn apply(current: ChecklistStatus, action: ChecklistAction) -> Result<ChecklistStatus> {
    use ChecklistStatus::*;

    match (action, current) {
        (ChecklistAction::RequestInspection, NotStarted) => Ok(PendingInspection),
        (ChecklistAction::RequestInspection, _) => Err(Error::BadRequest(bilingual(
            "Inspection can only be requested for a checklist that has not started",
            "ขอตรวจได้เฉพาะรายการตรวจที่ยังไม่เริ่มเท่านั้น",
        ))),
        (ChecklistAction::RecordItem, PendingInspection | InProgress) => Ok(InProgress),
        (ChecklistAction::RecordItem, status) => Err(closed_for_inspection(status)),
        (ChecklistAction::Reinspect, Failed) => Ok(PendingInspection),
        (ChecklistAction::Reinspect, _) => Err(Error::BadRequest(bilingual(
            "Only failed checklists can be re-inspected",
            "ตรวจซ้ำได้เฉพาะรายการตรวจที่ไม่ผ่านเท่านั้น",
        ))),
    }
}

/// Final status of a submitted inspection.
///
/// Every item must carry a result. Any `fail` makes the whole checklist fail.
pub fn submit(current: ChecklistStatus, tally: &ResultTally) -> Result<ChecklistStatus> {
    match current {
        ChecklistStatus::PendingInspection | ChecklistStatus::InProgress => {}
        status => return Err(closed_for_inspection(status)),
    }

    if !tally.is_fully_scored() {
        return Err(Error::BadRequest(bilingual(
            &format!(
                "All checklist items must be scored before submission ({} of {} scored)",
                tally.scored(),
                tally.total
            ),
            "กรุณาตรวจให้ครบทุกรายการก่อนส่งผล",
        )));
    }

    if tally.has_failure() {
        Ok(ChecklistStatus::Failed)
    } else {
        Ok(ChecklistStatus::Completed)
    }
}

fn closed_for_inspection(status: ChecklistStatus) -> Error {
    if status.is_final() {
        Error::BadRequest(bilingual(
            "Checklist inspection is already closed",
            "การตรวจรายการนี้เสร็จสิ้นแล้ว",
        ))
    } else {
        Error::BadRequest(bilingual(
            "Checklist is not open for inspection; request an inspection first",
            "รายการตรวจนี้ยังไม่เปิดให้ตรวจ กรุณาขอตรวจก่อน",
        ))
    }
}

/// Notices for a failed inspection: task assignee and project owner, high priority, email.
pub fn failure_notices(
    checklist: &TaskChecklist,
    task: &Task,
    template_name: &str,
    project_owner_id: i64,
    failed_items: usize,
) -> Vec<NotificationDraft> {
    let title = format!("Inspection failed: {}", template_name);
    let message = format!(
        "{} item(s) failed on \"{}\" for task \"{}\"",
        failed_items, template_name, task.name
    );

    task.assignee_id
        .into_iter()
        .chain(std::iter::once(project_owner_id))
        .map(|user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::InspectionFailed,
                "checklist",
                checklist.id,
                title.clone(),
                message.clone(),
            )
            .priority(NotificationPriority::High)
            .email(true)
            .project(task.project_id)
        })
        .collect()
}

/// Notice to the task assignee that an inspection passed.
pub fn passed_notices(
    checklist: &TaskChecklist,
    task: &Task,
    template_name: &str,
) -> Vec<NotificationDraft> {
    task.assignee_id
        .map(|user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::InspectionPassed,
                "checklist",
                checklist.id,
                format!("Inspection passed: {}", template_name),
                format!("\"{}\" passed for task \"{}\"", template_name, task.name),
            )
            .project(task.project_id)
        })
        .into_iter()
        .collect()
}

/// Notices asking the project's inspectors to come and inspect.
pub fn inspection_request_notices(
    checklist: &TaskChecklist,
    task: &Task,
    template_name: &str,
    inspector_ids: &[i64],
) -> Vec<NotificationDraft> {
    inspector_ids
        .iter()
        .map(|&user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::InspectionRequested,
                "checklist",
                checklist.id,
                format!("Inspection requested: {}", template_name),
                format!("Task \"{}\" is ready for \"{}\"", task.name, template_name),
            )
            .project(task.project_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChecklistStage, ItemResult, TaskStatus};
    use chrono::Utc;

    fn checklist(status: ChecklistStatus) -> TaskChecklist {
        let now = Utc::now();
        TaskChecklist {
            id: 7,
            task_id: 3,
            template_id: 1,
            stage: ChecklistStage::PreExecution,
            status,
            inspected_by: None,
            inspected_at: None,
            general_comments: None,
            photo_urls: Vec::new(),
            signature: None,
            reinspection_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn task(assignee: Option<i64>) -> Task {
        let now = Utc::now();
        Task {
            id: 3,
            project_id: 1,
            name: "Columns C1-C8".to_string(),
            description: None,
            assignee_id: assignee,
            start_date: None,
            end_date: None,
            progress: 0,
            status: TaskStatus::Todo,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_happy_path() {
        let s = apply(ChecklistStatus::NotStarted, ChecklistAction::RequestInspection).unwrap();
        assert_eq!(s, ChecklistStatus::PendingInspection);
        let s = apply(s, ChecklistAction::RecordItem).unwrap();
        assert_eq!(s, ChecklistStatus::InProgress);
        let tally = ResultTally::from_results(2, [ItemResult::Pass, ItemResult::Na]);
        assert_eq!(submit(s, &tally).unwrap(), ChecklistStatus::Completed);
    }

    #[test]
    fn test_any_fail_fails_checklist() {
        let tally = ResultTally::from_results(
            3,
            [ItemResult::Pass, ItemResult::Fail, ItemResult::Pass],
        );
        assert_eq!(
            submit(ChecklistStatus::InProgress, &tally).unwrap(),
            ChecklistStatus::Failed
        );
    }

    #[test]
    fn test_submit_requires_every_item() {
        let tally = ResultTally::from_results(3, [ItemResult::Pass]);
        let err = submit(ChecklistStatus::InProgress, &tally).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(err.to_string().contains("1 of 3 scored"));
    }

    #[test]
    fn test_cannot_record_before_request() {
        let err = apply(ChecklistStatus::NotStarted, ChecklistAction::RecordItem).unwrap_err();
        assert!(err.to_string().contains("request an inspection first"));
    }

    #[test]
    fn test_cannot_touch_closed_checklist() {
        for status in [ChecklistStatus::Completed, ChecklistStatus::Failed] {
            assert!(apply(status, ChecklistAction::RecordItem).is_err());
            let tally = ResultTally::from_results(1, [ItemResult::Pass]);
            let err = submit(status, &tally).unwrap_err();
            assert!(err.to_string().contains("already closed"));
        }
    }

    #[test]
    fn test_reinspect_only_failed() {
        assert_eq!(
            apply(ChecklistStatus::Failed, ChecklistAction::Reinspect).unwrap(),
            ChecklistStatus::PendingInspection
        );
        assert!(apply(ChecklistStatus::Completed, ChecklistAction::Reinspect).is_err());
        assert!(apply(ChecklistStatus::InProgress, ChecklistAction::Reinspect).is_err());
    }

    #[test]
    fn test_request_twice_is_rejected() {
        assert!(
            apply(
                ChecklistStatus::PendingInspection,
                ChecklistAction::RequestInspection
            )
            .is_err()
        );
    }

    #[test]
    fn test_failure_notices_target_assignee_and_owner() {
        let notices = failure_notices(&checklist(ChecklistStatus::Failed), &task(Some(4)), "Rebar", 9, 2);
        let users: Vec<i64> = notices.iter().map(|n| n.user_id).collect();
        assert_eq!(users, vec![4, 9]);
        assert!(notices.iter().all(|n| n.send_email));
        assert!(
            notices
                .iter()
                .all(|n| n.priority == NotificationPriority::High)
        );
        assert!(notices[0].message.contains("2 item(s) failed"));
    }

    #[test]
    fn test_failure_notices_without_assignee() {
        let notices = failure_notices(&checklist(ChecklistStatus::Failed), &task(None), "Rebar", 9, 1);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].user_id, 9);
    }

    #[test]
    fn test_passed_notice_is_in_app_only() {
        let notices = passed_notices(&checklist(ChecklistStatus::Completed), &task(Some(4)), "Rebar");
        assert_eq!(notices.len(), 1);
        assert!(!notices[0].send_email);
    }
}
