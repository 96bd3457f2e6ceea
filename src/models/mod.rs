//! Data models for qcflow entities.
//!
//! This module defines the core data structures:
//! - `User` - People on site, each with a single `Role`
//! - `Project` - A construction project owned by a manager
//! - `Task` - Scheduled work items with progress tracking
//! - `ChecklistTemplate` / `TaskChecklist` - Inspection checklists and their per-task instances
//! - `Defect` - CAR/PAR/NCR tickets with root-cause and action-plan fields
//! - `Notification` / `ActivityEntry` - Outbound notices and the audit trail

pub mod display_status;
pub mod progress;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Implements string conversion, SQL mapping and listing for a fieldless enum.
macro_rules! string_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Canonical string form (as stored and serialized).
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Every variant, in declaration order.
            pub fn all() -> &'static [$name] {
                &[$($name::$variant,)+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let normalized = s.trim().replace('-', "_");
                $(
                    if normalized.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", $label, s))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Role of a user. Capabilities per role live in [`crate::permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    ProjectManager,
    QcInspector,
    FieldEngineer,
    Viewer,
}

string_enum!(Role, "role" {
    Admin => "admin",
    ProjectManager => "project_manager",
    QcInspector => "qc_inspector",
    FieldEngineer => "field_engineer",
    Viewer => "viewer",
});

/// Persisted task workflow status. Kept in step with `progress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

string_enum!(TaskStatus, "task status" {
    Todo => "todo",
    InProgress => "in_progress",
    Completed => "completed",
});

impl TaskStatus {
    /// Status implied by a progress value.
    pub fn from_progress(progress: u8) -> Self {
        match progress {
            0 => TaskStatus::Todo,
            100..=u8::MAX => TaskStatus::Completed,
            _ => TaskStatus::InProgress,
        }
    }
}

/// Status computed on read from dates and progress. Also used for projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    NotStarted,
    InProgress,
    Delayed,
    Completed,
}

string_enum!(DisplayStatus, "display status" {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Delayed => "delayed",
    Completed => "completed",
});

/// Construction stage a checklist belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStage {
    PreExecution,
    InProgress,
    PostExecution,
}

string_enum!(ChecklistStage, "checklist stage" {
    PreExecution => "pre_execution",
    InProgress => "in_progress",
    PostExecution => "post_execution",
});

/// Status of a checklist instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    #[default]
    NotStarted,
    PendingInspection,
    InProgress,
    Completed,
    Failed,
}

string_enum!(ChecklistStatus, "checklist status" {
    NotStarted => "not_started",
    PendingInspection => "pending_inspection",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

impl ChecklistStatus {
    /// Returns true once the inspection has a final outcome.
    pub fn is_final(&self) -> bool {
        matches!(self, ChecklistStatus::Completed | ChecklistStatus::Failed)
    }
}

/// Result recorded for a single checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemResult {
    Pass,
    Fail,
    Na,
}

string_enum!(ItemResult, "item result" {
    Pass => "pass",
    Fail => "fail",
    Na => "na",
});

/// Defect ticket subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefectType {
    /// Corrective Action Request
    #[serde(rename = "CAR", alias = "car")]
    Car,
    /// Preventive Action Request
    #[serde(rename = "PAR", alias = "par")]
    Par,
    /// Non-Conformance Report
    #[serde(rename = "NCR", alias = "ncr")]
    Ncr,
}

string_enum!(DefectType, "defect type" {
    Car => "CAR",
    Par => "PAR",
    Ncr => "NCR",
});

/// Defect severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

string_enum!(DefectSeverity, "severity" {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl DefectSeverity {
    /// High and critical defects escalate notifications to email.
    pub fn is_urgent(&self) -> bool {
        matches!(self, DefectSeverity::High | DefectSeverity::Critical)
    }
}

/// Defect lifecycle status. Transitions live in [`crate::workflow::defect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    #[default]
    Reported,
    Analysis,
    InProgress,
    Resolved,
    PendingReinspection,
    Closed,
}

string_enum!(DefectStatus, "defect status" {
    Reported => "reported",
    Analysis => "analysis",
    InProgress => "in_progress",
    Resolved => "resolved",
    PendingReinspection => "pending_reinspection",
    Closed => "closed",
});

/// Kind of file attached to a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Before,
    After,
    Supporting,
}

string_enum!(AttachmentType, "attachment type" {
    Before => "before",
    After => "after",
    Supporting => "supporting",
});

/// Outcome of a defect reinspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionOutcome {
    Passed,
    Failed,
}

string_enum!(InspectionOutcome, "inspection result" {
    Passed => "passed",
    Failed => "failed",
});

/// Notification priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

string_enum!(NotificationPriority, "notification priority" {
    Low => "low",
    Normal => "normal",
    High => "high",
});

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskAssigned,
    InspectionRequested,
    InspectionPassed,
    InspectionFailed,
    DefectAssigned,
    DefectStatusChanged,
    DefectResolved,
    ReinspectionRequested,
}

string_enum!(NotificationKind, "notification kind" {
    TaskAssigned => "task_assigned",
    InspectionRequested => "inspection_requested",
    InspectionPassed => "inspection_passed",
    InspectionFailed => "inspection_failed",
    DefectAssigned => "defect_assigned",
    DefectStatusChanged => "defect_status_changed",
    DefectResolved => "defect_resolved",
    ReinspectionRequested => "reinspection_requested",
});

/// A person using the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// A construction project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,

    pub name: String,

    /// Short unique code (e.g., "RT-01")
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Managing user; receives escalations for the whole project
    pub owner_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A project together with its derived state.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub status: DisplayStatus,
    pub progress: u8,
    pub task_count: usize,
    pub member_ids: Vec<i64>,
}

/// A scheduled piece of work inside a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// Completion percentage (0-100)
    pub progress: u8,

    #[serde(default)]
    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Status shown to users, derived from progress and schedule.
    pub fn display_status(&self, today: NaiveDate) -> DisplayStatus {
        display_status::display_status(self.progress, self.start_date, self.end_date, today)
    }
}

/// A task together with its derived display status.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub display_status: DisplayStatus,
}

impl TaskView {
    pub fn new(task: Task, today: NaiveDate) -> Self {
        let display_status = task.display_status(today);
        Self {
            task,
            display_status,
        }
    }
}

/// A reusable inspection checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistTemplate {
    pub id: i64,
    pub name: String,
    pub stage: ChecklistStage,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_by: i64,
    pub created_at: DateTime<Utc>,

    /// Items ordered by position
    #[serde(default)]
    pub items: Vec<ChecklistTemplateItem>,
}

/// One line of a checklist template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistTemplateItem {
    pub id: i64,
    pub template_id: i64,
    pub position: u32,
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A checklist template assigned to a task, scored during inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskChecklist {
    pub id: i64,
    pub task_id: i64,
    pub template_id: i64,
    pub stage: ChecklistStage,

    #[serde(default)]
    pub status: ChecklistStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspected_by: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspected_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub general_comments: Option<String>,

    #[serde(default)]
    pub photo_urls: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// The failed instance this one re-inspects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reinspection_of: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The score given to one template item within a checklist instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItemResult {
    pub id: i64,
    pub task_checklist_id: i64,
    pub template_item_id: i64,
    pub result: ItemResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    #[serde(default)]
    pub photo_urls: Vec<String>,

    pub recorded_by: i64,
    pub recorded_at: DateTime<Utc>,
}

/// A CAR/PAR/NCR ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub id: i64,
    pub project_id: i64,
    pub task_id: i64,

    /// Checklist instance the defect was raised from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist_id: Option<i64>,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub defect_type: DefectType,

    #[serde(default)]
    pub severity: DefectSeverity,

    #[serde(default)]
    pub status: DefectStatus,

    pub reported_by: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrective_action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preventive_action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,

    #[serde(default)]
    pub before_photos: Vec<String>,

    #[serde(default)]
    pub after_photos: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Defect {
    /// Returns true if the defect is past due and still open.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != DefectStatus::Closed && self.due_date.is_some_and(|due| due < today)
    }
}

/// A file linked to a defect, stored externally and referenced by URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectAttachment {
    pub id: i64,
    pub defect_id: i64,
    pub attachment_type: AttachmentType,
    pub file_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    pub uploaded_by: i64,
    pub created_at: DateTime<Utc>,
}

/// A recorded reinspection of a resolved defect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectInspection {
    pub id: i64,
    pub defect_id: i64,
    pub inspector_id: i64,
    pub result: InspectionOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    #[serde(default)]
    pub photo_urls: Vec<String>,

    pub inspected_at: DateTime<Utc>,
}

/// An in-app notification addressed to a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,

    #[serde(default)]
    pub priority: NotificationPriority,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,

    /// Entity type the notification links to (e.g., "defect")
    pub entity_type: String,
    pub entity_id: i64,

    /// Whether the email channel should also carry it
    pub send_email: bool,

    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// One row of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: i64,

    /// Procedure name (e.g., "defect.update")
    pub action: String,

    pub entity_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,

    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Returns true if a photo list holds at least one non-blank URL.
pub fn has_photos(photos: &[String]) -> bool {
    photos.iter().any(|p| !p.trim().is_empty())
}
