//! Role-based permission gate.
//!
//! Roles are a closed set; each maps to a fixed list of [`Capability`]s.
//! Entity-scoped checks (project membership, defect ownership) sit on top of
//! the capability table and are the only authorization decisions made in the
//! crate.

use crate::models::{Defect, DefectStatus, Project, Role};
use crate::{Error, Result};

/// Something a role may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageUsers,
    CreateProject,
    ManageProject,
    DeleteProject,
    ManageTasks,
    UpdateTaskProgress,
    ManageTemplates,
    Inspect,
    RequestInspection,
    ReportDefect,
    EditDefect,
    DeleteDefect,
    VerifyDefect,
    ViewAnalytics,
}

impl Capability {
    fn describe(&self) -> &'static str {
        match self {
            Capability::ManageUsers => "manage users",
            Capability::CreateProject => "create projects",
            Capability::ManageProject => "manage projects",
            Capability::DeleteProject => "delete projects",
            Capability::ManageTasks => "manage tasks",
            Capability::UpdateTaskProgress => "update task progress",
            Capability::ManageTemplates => "manage checklist templates",
            Capability::Inspect => "record inspections",
            Capability::RequestInspection => "request inspections",
            Capability::ReportDefect => "report defects",
            Capability::EditDefect => "edit defects",
            Capability::DeleteDefect => "delete defects",
            Capability::VerifyDefect => "verify defects",
            Capability::ViewAnalytics => "view analytics",
        }
    }
}

const PROJECT_MANAGER: &[Capability] = &[
    Capability::CreateProject,
    Capability::ManageProject,
    Capability::DeleteProject,
    Capability::ManageTasks,
    Capability::UpdateTaskProgress,
    Capability::ManageTemplates,
    Capability::Inspect,
    Capability::RequestInspection,
    Capability::ReportDefect,
    Capability::EditDefect,
    Capability::DeleteDefect,
    Capability::VerifyDefect,
    Capability::ViewAnalytics,
];

const QC_INSPECTOR: &[Capability] = &[
    Capability::ManageTemplates,
    Capability::Inspect,
    Capability::RequestInspection,
    Capability::ReportDefect,
    Capability::EditDefect,
    Capability::VerifyDefect,
    Capability::ViewAnalytics,
];

const FIELD_ENGINEER: &[Capability] = &[
    Capability::UpdateTaskProgress,
    Capability::RequestInspection,
    Capability::ReportDefect,
];

const VIEWER: &[Capability] = &[Capability::ViewAnalytics];

/// Returns true if `role` carries `capability`.
pub fn role_can(role: Role, capability: Capability) -> bool {
    match role {
        Role::Admin => true,
        Role::ProjectManager => PROJECT_MANAGER.contains(&capability),
        Role::QcInspector => QC_INSPECTOR.contains(&capability),
        Role::FieldEngineer => FIELD_ENGINEER.contains(&capability),
        Role::Viewer => VIEWER.contains(&capability),
    }
}

/// The authenticated user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can(&self, capability: Capability) -> bool {
        role_can(self.role, capability)
    }

    /// Fail with FORBIDDEN unless the caller's role carries `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role {} cannot {}",
                self.role,
                capability.describe()
            )))
        }
    }
}

/// Admins see everything; everyone else sees projects they own or belong to.
pub fn can_view_project(caller: &Caller, project: &Project, member_ids: &[i64]) -> bool {
    caller.is_admin()
        || project.owner_id == caller.user_id
        || member_ids.contains(&caller.user_id)
}

/// Admins, or the owning manager.
pub fn can_edit_project(caller: &Caller, project: &Project) -> bool {
    caller.is_admin()
        || (caller.can(Capability::ManageProject) && project.owner_id == caller.user_id)
}

/// Who may change a defect's fields or status.
///
/// Closed defects are frozen for everyone but admins. Otherwise QC staff and
/// managers may edit any defect they can see, and the reporter and assignee
/// may edit their own.
pub fn can_edit_defect(caller: &Caller, defect: &Defect) -> bool {
    if caller.is_admin() {
        return true;
    }
    if defect.status == DefectStatus::Closed {
        return false;
    }
    caller.can(Capability::EditDefect)
        || defect.reported_by == caller.user_id
        || defect.assigned_to == Some(caller.user_id)
}

/// Who may delete a defect: admins, the owning manager, or the reporter
/// while the defect is still freshly reported.
pub fn can_delete_defect(caller: &Caller, defect: &Defect, project: &Project) -> bool {
    if caller.is_admin() {
        return true;
    }
    if caller.can(Capability::DeleteDefect) && project.owner_id == caller.user_id {
        return true;
    }
    defect.reported_by == caller.user_id && defect.status == DefectStatus::Reported
}

/// FORBIDDEN unless `allowed`.
pub fn ensure(allowed: bool, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden(format!("not allowed to {}", action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DefectSeverity, DefectType};
    use chrono::Utc;

    fn project(owner_id: i64) -> Project {
        let now = Utc::now();
        Project {
            id: 1,
            name: "Riverside Tower".to_string(),
            code: "RT-01".to_string(),
            location: None,
            owner_id,
            start_date: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn defect(reported_by: i64, assigned_to: Option<i64>, status: DefectStatus) -> Defect {
        let now = Utc::now();
        Defect {
            id: 1,
            project_id: 1,
            task_id: 1,
            checklist_id: None,
            title: "Crack".to_string(),
            description: None,
            defect_type: DefectType::Car,
            severity: DefectSeverity::Low,
            status,
            reported_by,
            assigned_to,
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

    #[test]
    fn test_capability_table() {
        assert!(role_can(Role::Admin, Capability::ManageUsers));
        assert!(!role_can(Role::ProjectManager, Capability::ManageUsers));
        assert!(role_can(Role::ProjectManager, Capability::DeleteProject));
        assert!(!role_can(Role::QcInspector, Capability::DeleteProject));
        assert!(role_can(Role::QcInspector, Capability::Inspect));
        assert!(!role_can(Role::QcInspector, Capability::ManageTasks));
        assert!(role_can(Role::FieldEngineer, Capability::ReportDefect));
        assert!(!role_can(Role::FieldEngineer, Capability::Inspect));
        assert!(!role_can(Role::Viewer, Capability::ReportDefect));
        assert!(role_can(Role::Viewer, Capability::ViewAnalytics));
    }

    #[test]
    fn test_require_is_forbidden() {
        let viewer = Caller::new(5, Role::Viewer);
        let err = viewer.require(Capability::ReportDefect).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Forbidden);
        assert!(err.to_string().contains("viewer cannot report defects"));
    }

    #[test]
    fn test_project_visibility() {
        let p = project(2);
        assert!(can_view_project(&Caller::new(1, Role::Admin), &p, &[]));
        assert!(can_view_project(&Caller::new(2, Role::ProjectManager), &p, &[]));
        assert!(can_view_project(&Caller::new(3, Role::Viewer), &p, &[3]));
        assert!(!can_view_project(&Caller::new(4, Role::QcInspector), &p, &[3]));
    }

    #[test]
    fn test_only_owning_manager_edits_project() {
        let p = project(2);
        assert!(can_edit_project(&Caller::new(2, Role::ProjectManager), &p));
        assert!(!can_edit_project(&Caller::new(9, Role::ProjectManager), &p));
        assert!(!can_edit_project(&Caller::new(2, Role::QcInspector), &p));
    }

    #[test]
    fn test_defect_edit_rules() {
        let d = defect(10, Some(20), DefectStatus::Analysis);
        assert!(can_edit_defect(&Caller::new(10, Role::FieldEngineer), &d));
        assert!(can_edit_defect(&Caller::new(20, Role::FieldEngineer), &d));
        assert!(!can_edit_defect(&Caller::new(30, Role::FieldEngineer), &d));
        assert!(can_edit_defect(&Caller::new(30, Role::QcInspector), &d));
        assert!(!can_edit_defect(&Caller::new(30, Role::Viewer), &d));

        let closed = defect(10, Some(20), DefectStatus::Closed);
        assert!(!can_edit_defect(&Caller::new(30, Role::QcInspector), &closed));
        assert!(!can_edit_defect(&Caller::new(10, Role::FieldEngineer), &closed));
        assert!(can_edit_defect(&Caller::new(1, Role::Admin), &closed));
    }

    #[test]
    fn test_defect_delete_rules() {
        let p = project(2);
        let fresh = defect(10, None, DefectStatus::Reported);
        let worked = defect(10, None, DefectStatus::Analysis);

        assert!(can_delete_defect(&Caller::new(10, Role::FieldEngineer), &fresh, &p));
        assert!(!can_delete_defect(&Caller::new(10, Role::FieldEngineer), &worked, &p));
        assert!(can_delete_defect(&Caller::new(2, Role::ProjectManager), &worked, &p));
        assert!(!can_delete_defect(&Caller::new(9, Role::ProjectManager), &worked, &p));
        assert!(!can_delete_defect(&Caller::new(30, Role::QcInspector), &worked, &p));
    }
}
