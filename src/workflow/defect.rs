//! Defect (CAR/PAR/NCR) state machine.
//!
//! ```text
//! reported → analysis → in_progress → resolved ─────────────→ closed
//!                           ▲            │                      ▲
//!                           │            ▼                      │
//!                           └──── pending_reinspection ─────────┘
//! ```
//!
//! Guards are evaluated against the defect *after* any field edits in the
//! same update have been merged, so a caller can supply the root cause and
//! the move to `analysis` in one request.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{
    Defect, DefectStatus, InspectionOutcome, NotificationKind, NotificationPriority, has_photos,
};
use crate::notify::NotificationDraft;
use crate::{Error, Result};

use super::{bilingual, is_filled};

/// Returns true if the lifecycle has an edge from `from` to `to`.
pub fn can_transition(from: DefectStatus, to: DefectStatus) -> bool {
    use DefectStatus::*;

    matches!(
        (from, to),
        (Reported, Analysis)
            | (Analysis, InProgress)
            | (InProgress, Resolved)
            | (Resolved, PendingReinspection)
            | (Resolved, Closed)
            | (PendingReinspection, Closed)
            | (PendingReinspection, InProgress)
    )
}

/// Statuses reachable from `from` in one step.
pub fn next_statuses(from: DefectStatus) -> Vec<DefectStatus> {
    DefectStatus::all()
        .iter()
        .copied()
        .filter(|to| can_transition(from, *to))
        .collect()
}

/// Check that `defect` may move to `to`.
///
/// `verifier` is the user who would close the defect; only consulted for
/// `closed`.
pub fn check_guards(defect: &Defect, to: DefectStatus, verifier: Option<i64>) -> Result<()> {
    if !can_transition(defect.status, to) {
        return Err(Error::BadRequest(bilingual(
            &format!(
                "Cannot change defect status from {} to {}",
                defect.status, to
            ),
            &format!("ไม่สามารถเปลี่ยนสถานะจาก {} เป็น {}", defect.status, to),
        )));
    }

    match to {
        DefectStatus::Analysis => {
            if !is_filled(&defect.root_cause) {
                return Err(Error::BadRequest(bilingual(
                    "Root cause is required before analysis",
                    "กรุณาระบุสาเหตุของปัญหา",
                )));
            }
        }
        DefectStatus::InProgress => require_corrective_action(defect)?,
        DefectStatus::Resolved => {
            require_corrective_action(defect)?;
            if has_photos(&defect.before_photos) && !has_photos(&defect.after_photos) {
                return Err(Error::BadRequest(bilingual(
                    "After photos are required when before photos exist",
                    "ต้องแนบรูปภาพหลังแก้ไขเมื่อมีรูปภาพก่อนแก้ไข",
                )));
            }
            if !is_filled(&defect.implementation_method) || !is_filled(&defect.resolution_notes) {
                return Err(Error::BadRequest(bilingual(
                    "Implementation method and resolution notes are required to resolve a defect",
                    "กรุณาระบุวิธีการดำเนินการและบันทึกผลการแก้ไข",
                )));
            }
        }
        DefectStatus::Closed => {
            if verifier.is_none() {
                return Err(Error::BadRequest(bilingual(
                    "A verifier is required to close a defect",
                    "ต้องมีผู้ตรวจสอบยืนยันก่อนปิดรายการ",
                )));
            }
        }
        DefectStatus::Reported | DefectStatus::PendingReinspection => {}
    }

    Ok(())
}

fn require_corrective_action(defect: &Defect) -> Result<()> {
    if is_filled(&defect.corrective_action) {
        Ok(())
    } else {
        Err(Error::BadRequest(bilingual(
            "Corrective action is required",
            "กรุณาระบุแนวทางการแก้ไข",
        )))
    }
}

/// Move `defect` to `to`, stamping the lifecycle timestamps.
///
/// Returns the previous status.
pub fn transition(
    defect: &mut Defect,
    to: DefectStatus,
    verifier: Option<i64>,
    now: DateTime<Utc>,
) -> Result<DefectStatus> {
    check_guards(defect, to, verifier)?;

    let from = defect.status;
    match to {
        DefectStatus::Resolved => defect.resolved_at = Some(now),
        DefectStatus::InProgress => defect.resolved_at = None,
        DefectStatus::Closed => {
            defect.verified_by = verifier;
            defect.verified_at = Some(now);
        }
        _ => {}
    }
    defect.status = to;
    defect.updated_at = now;

    info!(defect_id = defect.id, %from, %to, "defect transition");
    Ok(from)
}

/// Status a reinspection outcome sends a pending defect to.
pub fn reinspection_target(outcome: InspectionOutcome) -> DefectStatus {
    match outcome {
        InspectionOutcome::Passed => DefectStatus::Closed,
        InspectionOutcome::Failed => DefectStatus::InProgress,
    }
}

fn label(defect: &Defect) -> String {
    format!("{} #{}", defect.defect_type, defect.id)
}

/// Notice to a newly assigned user. Assignments always go out by email.
pub fn assignment_notices(defect: &Defect, assignee_id: i64) -> Vec<NotificationDraft> {
    let priority = if defect.severity.is_urgent() {
        NotificationPriority::High
    } else {
        NotificationPriority::Normal
    };
    vec![
        NotificationDraft::new(
            assignee_id,
            NotificationKind::DefectAssigned,
            "defect",
            defect.id,
            format!("Defect assigned: {}", label(defect)),
            format!("{} ({} severity)", defect.title, defect.severity),
        )
        .priority(priority)
        .email(true)
        .project(defect.project_id),
    ]
}

/// Notices for a status change: reporter and assignee, plus the project
/// owner when the defect is resolved.
pub fn status_change_notices(
    defect: &Defect,
    from: DefectStatus,
    project_owner_id: i64,
) -> Vec<NotificationDraft> {
    let urgent = defect.severity.is_urgent();
    let priority = if urgent {
        NotificationPriority::High
    } else {
        NotificationPriority::Normal
    };
    let title = format!("{}: {} → {}", label(defect), from, defect.status);

    let mut recipients = vec![defect.reported_by];
    if let Some(assignee) = defect.assigned_to {
        recipients.push(assignee);
    }

    let mut drafts: Vec<NotificationDraft> = recipients
        .iter()
        .map(|&user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::DefectStatusChanged,
                "defect",
                defect.id,
                title.clone(),
                defect.title.clone(),
            )
            .priority(priority)
            .email(urgent)
            .project(defect.project_id)
        })
        .collect();

    if defect.status == DefectStatus::Resolved && !recipients.contains(&project_owner_id) {
        drafts.push(
            NotificationDraft::new(
                project_owner_id,
                NotificationKind::DefectResolved,
                "defect",
                defect.id,
                format!("Defect resolved: {}", label(defect)),
                format!("\"{}\" is ready for verification", defect.title),
            )
            .priority(priority)
            .email(urgent)
            .project(defect.project_id),
        );
    }

    drafts
}

/// Notices asking inspectors to re-check a resolved defect.
pub fn reinspection_request_notices(
    defect: &Defect,
    inspector_ids: &[i64],
) -> Vec<NotificationDraft> {
    inspector_ids
        .iter()
        .map(|&user_id| {
            NotificationDraft::new(
                user_id,
                NotificationKind::ReinspectionRequested,
                "defect",
                defect.id,
                format!("Reinspection requested: {}", label(defect)),
                defect.title.clone(),
            )
            .email(defect.severity.is_urgent())
            .project(defect.project_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DefectSeverity, DefectType};

    fn defect() -> Defect {
        let now = Utc::now();
        Defect {
            id: 1,
            project_id: 1,
            task_id: 1,
            checklist_id: None,
            title: "Honeycombing on column C4".to_string(),
            description: None,
            defect_type: DefectType::Ncr,
            severity: DefectSeverity::Medium,
            status: DefectStatus::Reported,
            reported_by: 10,
            assigned_to: Some(20),
            root_cause: None,
            corrective_action: None,
            preventive_action: None,
            implementation_method: None,
            resolution_notes: None,
            before_photos: Vec::new(),
            after_photos: Vec::new(),
            due_date: None,
            resolved_at: None,
            verified_by: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(err: Error) -> String {
        match err {
            Error::BadRequest(msg) => msg,
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_ncr_walkthrough() {
        let now = Utc::now();
        let mut d = defect();
        d.before_photos = vec!["a.jpg".to_string()];

        d.root_cause = Some("X".to_string());
        transition(&mut d, DefectStatus::Analysis, None, now).unwrap();

        d.corrective_action = Some("Y".to_string());
        transition(&mut d, DefectStatus::InProgress, None, now).unwrap();

        let err = transition(&mut d, DefectStatus::Resolved, None, now).unwrap_err();
        let msg = message(err);
        assert!(msg.starts_with("After photos are required"));
        assert!(msg.contains("(ต้องแนบรูปภาพหลังแก้ไข"));
        assert_eq!(d.status, DefectStatus::InProgress);
    }

    #[test]
    fn test_analysis_needs_root_cause() {
        let mut d = defect();
        d.root_cause = Some("   ".to_string());
        let err = transition(&mut d, DefectStatus::Analysis, None, Utc::now()).unwrap_err();
        assert!(message(err).contains("Root cause"));
    }

    #[test]
    fn test_resolved_needs_corrective_action_first() {
        let mut d = defect();
        d.status = DefectStatus::InProgress;
        d.implementation_method = Some("Grout".to_string());
        d.resolution_notes = Some("Done".to_string());
        let err = check_guards(&d, DefectStatus::Resolved, None).unwrap_err();
        assert!(message(err).contains("Corrective action"));
    }

    #[test]
    fn test_resolved_needs_implementation_and_notes() {
        let mut d = defect();
        d.status = DefectStatus::InProgress;
        d.corrective_action = Some("Patch".to_string());
        d.implementation_method = Some("Grout".to_string());
        let err = check_guards(&d, DefectStatus::Resolved, None).unwrap_err();
        assert!(message(err).contains("resolution notes"));
    }

    #[test]
    fn test_resolve_and_reopen_stamps() {
        let now = Utc::now();
        let mut d = defect();
        d.status = DefectStatus::InProgress;
        d.corrective_action = Some("Patch".to_string());
        d.implementation_method = Some("Grout".to_string());
        d.resolution_notes = Some("Done".to_string());
        d.before_photos = vec!["before.jpg".to_string()];
        d.after_photos = vec!["after.jpg".to_string()];

        transition(&mut d, DefectStatus::Resolved, None, now).unwrap();
        assert_eq!(d.resolved_at, Some(now));

        transition(&mut d, DefectStatus::InProgress, None, now).unwrap();
        assert_eq!(d.resolved_at, None);
    }

    #[test]
    fn test_close_requires_verifier_and_resolution() {
        let now = Utc::now();
        let mut d = defect();
        d.status = DefectStatus::InProgress;
        d.corrective_action = Some("Patch".to_string());
        let err = transition(&mut d, DefectStatus::Closed, Some(30), now).unwrap_err();
        assert!(message(err).contains("Cannot change defect status from in_progress to closed"));

        d.status = DefectStatus::Resolved;
        let err = transition(&mut d, DefectStatus::Closed, None, now).unwrap_err();
        assert!(message(err).contains("verifier"));

        let from = transition(&mut d, DefectStatus::Closed, Some(30), now).unwrap();
        assert_eq!(from, DefectStatus::Resolved);
        assert_eq!(d.verified_by, Some(30));
        assert_eq!(d.verified_at, Some(now));
    }

    #[test]
    fn test_transition_table() {
        use DefectStatus::*;
        assert_eq!(next_statuses(Reported), vec![Analysis]);
        assert_eq!(next_statuses(Resolved), vec![PendingReinspection, Closed]);
        assert!(!can_transition(Resolved, InProgress));
        assert_eq!(next_statuses(PendingReinspection), vec![InProgress, Closed]);
        assert!(next_statuses(Closed).is_empty());
        assert!(!can_transition(Reported, Reported));
        assert!(!can_transition(Analysis, Resolved));
    }

    #[test]
    fn test_reinspection_targets() {
        assert_eq!(reinspection_target(InspectionOutcome::Passed), DefectStatus::Closed);
        assert_eq!(
            reinspection_target(InspectionOutcome::Failed),
            DefectStatus::InProgress
        );
    }

    #[test]
    fn test_urgent_status_change_goes_by_email() {
        let mut d = defect();
        d.severity = DefectSeverity::Critical;
        d.status = DefectStatus::Analysis;
        let drafts = status_change_notices(&d, DefectStatus::Reported, 99);
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|n| n.send_email));
        assert!(drafts.iter().all(|n| n.priority == NotificationPriority::High));
    }

    #[test]
    fn test_resolution_notifies_owner() {
        let mut d = defect();
        d.status = DefectStatus::Resolved;
        let drafts = status_change_notices(&d, DefectStatus::InProgress, 99);
        let owner = drafts.iter().find(|n| n.user_id == 99).unwrap();
        assert_eq!(owner.kind, NotificationKind::DefectResolved);
        assert!(!owner.send_email);
    }

    #[test]
    fn test_assignment_is_always_emailed() {
        let drafts = assignment_notices(&defect(), 20);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].send_email);
        assert_eq!(drafts[0].title, "Defect assigned: NCR #1");
    }
}
