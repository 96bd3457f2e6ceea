//! Project procedures.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Deleted, IdInput, Output, Workspace, check_schedule, clean, required};
use crate::models::display_status::{project_progress, project_status};
use crate::models::{Project, ProjectView, Role};
use crate::permissions::{Caller, Capability, can_edit_project, ensure};
use crate::storage::tasks::TaskFilter;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub code: String,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Managing user; defaults to the caller
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    pub id: i64,
    pub name: Option<String>,
    pub code: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MemberInput {
    pub project_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectView>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembershipChange {
    pub project_id: i64,
    pub user_id: i64,
    /// False when the membership was already in the requested state
    pub changed: bool,
    pub member_ids: Vec<i64>,
}

/// Attach derived status, progress and members to a project.
pub(crate) fn project_view(ws: &Workspace, project: Project) -> Result<ProjectView> {
    let today = ws.today();
    let tasks = ws.storage.list_tasks(&TaskFilter {
        project_id: Some(project.id),
        ..Default::default()
    })?;
    let statuses: Vec<_> = tasks.iter().map(|t| t.display_status(today)).collect();
    let progress: Vec<u8> = tasks.iter().map(|t| t.progress).collect();
    let member_ids = ws.storage.project_member_ids(project.id)?;

    Ok(ProjectView {
        status: project_status(&statuses),
        progress: project_progress(&progress),
        task_count: tasks.len(),
        member_ids,
        project,
    })
}

/// Check that a proposed owner exists and can manage projects.
fn check_owner(ws: &Workspace, owner_id: i64) -> Result<()> {
    let owner = ws.storage.get_user(owner_id)?;
    if matches!(owner.role, Role::Admin | Role::ProjectManager) {
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "Project owner must be an admin or project manager, {} is {}",
            owner.name, owner.role
        )))
    }
}

pub fn project_create(
    ws: &mut Workspace,
    caller: &Caller,
    input: CreateProject,
) -> Result<ProjectView> {
    caller.require(Capability::CreateProject)?;
    let name = required(&input.name, "Project name")?;
    let code = required(&input.code, "Project code")?;
    check_schedule(input.start_date, input.end_date)?;

    let owner_id = input.owner_id.unwrap_or(caller.user_id);
    if owner_id != caller.user_id {
        ensure(caller.is_admin(), "create projects on behalf of another user")?;
    }
    check_owner(ws, owner_id)?;

    let now = Utc::now();
    let project = ws.storage.insert_project(&Project {
        id: 0,
        name,
        code,
        location: clean(input.location),
        owner_id,
        start_date: input.start_date,
        end_date: input.end_date,
        created_at: now,
        updated_at: now,
    })?;

    ws.audit(
        caller,
        "project.create",
        "project",
        Some(project.id),
        &json!({"name": project.name, "code": project.code, "owner_id": project.owner_id}),
    );
    project_view(ws, project)
}

pub fn project_get(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<ProjectView> {
    let project = ws.visible_project(caller, input.id)?;
    project_view(ws, project)
}

/// Projects visible to the caller.
pub fn project_list(ws: &mut Workspace, caller: &Caller) -> Result<ProjectList> {
    let member_of = (!caller.is_admin()).then_some(caller.user_id);
    let projects = ws
        .storage
        .list_projects(member_of)?
        .into_iter()
        .map(|p| project_view(ws, p))
        .collect::<Result<Vec<_>>>()?;
    Ok(ProjectList {
        count: projects.len(),
        projects,
    })
}

pub fn project_update(
    ws: &mut Workspace,
    caller: &Caller,
    input: UpdateProject,
) -> Result<ProjectView> {
    let mut project = ws.visible_project(caller, input.id)?;
    ensure(can_edit_project(caller, &project), "edit this project")?;

    if let Some(name) = input.name {
        project.name = required(&name, "Project name")?;
    }
    if let Some(code) = input.code {
        project.code = required(&code, "Project code")?;
    }
    if input.location.is_some() {
        project.location = clean(input.location);
    }
    if input.start_date.is_some() {
        project.start_date = input.start_date;
    }
    if input.end_date.is_some() {
        project.end_date = input.end_date;
    }
    if let Some(owner_id) = input.owner_id {
        if owner_id != project.owner_id {
            ensure(caller.is_admin(), "transfer project ownership")?;
            check_owner(ws, owner_id)?;
            project.owner_id = owner_id;
            ws.storage.add_project_member(project.id, owner_id)?;
        }
    }
    check_schedule(project.start_date, project.end_date)?;
    project.updated_at = Utc::now();

    ws.storage.update_project(&project)?;
    ws.audit(
        caller,
        "project.update",
        "project",
        Some(project.id),
        &json!({"name": project.name, "code": project.code, "owner_id": project.owner_id}),
    );
    project_view(ws, project)
}

/// Delete a project with its tasks, checklists and defects.
pub fn project_delete(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<Deleted> {
    caller.require(Capability::DeleteProject)?;
    let project = ws.visible_project(caller, input.id)?;
    ensure(can_edit_project(caller, &project), "delete this project")?;

    ws.storage.delete_project(project.id)?;
    ws.audit(
        caller,
        "project.delete",
        "project",
        Some(project.id),
        &json!({"code": project.code}),
    );
    Ok(Deleted::new("project", project.id))
}

pub fn project_add_member(
    ws: &mut Workspace,
    caller: &Caller,
    input: MemberInput,
) -> Result<MembershipChange> {
    let project = ws.visible_project(caller, input.project_id)?;
    ensure(can_edit_project(caller, &project), "manage project members")?;
    ws.storage.get_user(input.user_id)?;

    let changed = ws.storage.add_project_member(project.id, input.user_id)?;
    if changed {
        ws.audit(
            caller,
            "project.addMember",
            "project",
            Some(project.id),
            &json!({"user_id": input.user_id}),
        );
    }
    Ok(MembershipChange {
        project_id: project.id,
        user_id: input.user_id,
        changed,
        member_ids: ws.storage.project_member_ids(project.id)?,
    })
}

pub fn project_remove_member(
    ws: &mut Workspace,
    caller: &Caller,
    input: MemberInput,
) -> Result<MembershipChange> {
    let project = ws.visible_project(caller, input.project_id)?;
    ensure(can_edit_project(caller, &project), "manage project members")?;
    if input.user_id == project.owner_id {
        return Err(Error::BadRequest(
            "The project owner cannot be removed from the project".to_string(),
        ));
    }

    let changed = ws.storage.remove_project_member(project.id, input.user_id)?;
    if changed {
        ws.audit(
            caller,
            "project.removeMember",
            "project",
            Some(project.id),
            &json!({"user_id": input.user_id}),
        );
    }
    Ok(MembershipChange {
        project_id: project.id,
        user_id: input.user_id,
        changed,
        member_ids: ws.storage.project_member_ids(project.id)?,
    })
}

impl Output for ProjectView {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let p = &self.project;
        let mut lines = vec![
            format!("{} {} (#{})", p.code, p.name, p.id),
            format!(
                "  Status: {}  Progress: {}%  Tasks: {}",
                self.status, self.progress, self.task_count
            ),
            format!("  Owner: {}  Members: {}", p.owner_id, self.member_ids.len()),
        ];
        if let Some(ref location) = p.location {
            lines.push(format!("  Location: {}", location));
        }
        if p.start_date.is_some() || p.end_date.is_some() {
            lines.push(format!(
                "  Schedule: {} .. {}",
                p.start_date.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
                p.end_date.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string())
            ));
        }
        lines.join("\n")
    }
}

impl Output for ProjectList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.projects.is_empty() {
            return "No projects.".to_string();
        }
        let mut lines = vec![format!("{} project(s):", self.count)];
        for view in &self.projects {
            lines.push(format!(
                "  #{} {} {} [{}] {}%",
                view.project.id, view.project.code, view.project.name, view.status, view.progress
            ));
        }
        lines.join("\n")
    }
}

impl Output for MembershipChange {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let state = if self.changed { "updated" } else { "unchanged" };
        format!(
            "Project {} membership {} ({} member(s))",
            self.project_id,
            state,
            self.member_ids.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayStatus;
    use crate::test_utils::Site;

    #[test]
    fn test_create_registers_owner_as_member() {
        let mut site = Site::new();
        let manager = site.manager;
        let view = project_get(&mut site.ws, &manager, IdInput { id: site.project_id }).unwrap();
        assert_eq!(view.project.owner_id, site.manager.user_id);
        assert!(view.member_ids.contains(&site.manager.user_id));
        assert_eq!(view.task_count, 1);
        assert_eq!(view.status, DisplayStatus::NotStarted);
    }

    #[test]
    fn test_engineer_cannot_create_project() {
        let mut site = Site::new();
        let engineer = site.engineer;
        let err = project_create(
            &mut site.ws,
            &engineer,
            CreateProject {
                name: "Annex".to_string(),
                code: "AX".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_duplicate_code_and_bad_schedule() {
        let mut site = Site::new();
        let manager = site.manager;
        let dup = project_create(
            &mut site.ws,
            &manager,
            CreateProject {
                name: "Copy".to_string(),
                code: "RT-01".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(dup, Err(Error::BadRequest(_))));

        let backwards = project_create(
            &mut site.ws,
            &manager,
            CreateProject {
                name: "Backwards".to_string(),
                code: "BW".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 5, 1),
                end_date: NaiveDate::from_ymd_opt(2026, 4, 1),
                ..Default::default()
            },
        );
        assert!(matches!(backwards, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_list_is_scoped_to_membership() {
        let mut site = Site::new();
        let admin = site.admin;
        let other_manager = super::super::user::user_create(
            &mut site.ws,
            &admin,
            super::super::user::CreateUser {
                name: "Other".to_string(),
                email: "other@site.test".to_string(),
                role: Role::ProjectManager,
            },
        )
        .unwrap();
        let outsider = Caller::new(other_manager.id, Role::ProjectManager);

        assert_eq!(project_list(&mut site.ws, &outsider).unwrap().count, 0);
        assert_eq!(project_list(&mut site.ws, &admin).unwrap().count, 1);
        let engineer = site.engineer;
        assert_eq!(project_list(&mut site.ws, &engineer).unwrap().count, 1);

        let err = project_get(&mut site.ws, &outsider, IdInput { id: site.project_id });
        assert!(matches!(err, Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_only_owner_edits_and_members() {
        let mut site = Site::new();
        let inspector = site.inspector;
        let err = project_update(
            &mut site.ws,
            &inspector,
            UpdateProject {
                id: site.project_id,
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(Error::Forbidden(_))));

        let manager = site.manager;
        let view = project_update(
            &mut site.ws,
            &manager,
            UpdateProject {
                id: site.project_id,
                location: Some("Bangkok".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(view.project.location.as_deref(), Some("Bangkok"));

        let removed = project_remove_member(
            &mut site.ws,
            &manager,
            MemberInput {
                project_id: site.project_id,
                user_id: site.viewer.user_id,
            },
        )
        .unwrap();
        assert!(removed.changed);
        assert!(!removed.member_ids.contains(&site.viewer.user_id));

        let owner = project_remove_member(
            &mut site.ws,
            &manager,
            MemberInput {
                project_id: site.project_id,
                user_id: manager.user_id,
            },
        );
        assert!(matches!(owner, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_delete_requires_owner() {
        let mut site = Site::new();
        let inspector = site.inspector;
        let err = project_delete(&mut site.ws, &inspector, IdInput { id: site.project_id });
        assert!(matches!(err, Err(Error::Forbidden(_))));

        let other = site
            .ws
            .storage
            .create_user("Other PM", "other.pm@site.test", Role::ProjectManager)
            .unwrap();
        let manager = site.manager;
        project_add_member(
            &mut site.ws,
            &manager,
            MemberInput {
                project_id: site.project_id,
                user_id: other.id,
            },
        )
        .unwrap();
        let other = Caller::new(other.id, Role::ProjectManager);
        let err = project_delete(&mut site.ws, &other, IdInput { id: site.project_id });
        assert!(matches!(err, Err(Error::Forbidden(_))));

        project_delete(&mut site.ws, &manager, IdInput { id: site.project_id }).unwrap();
        assert!(matches!(
            site.ws.storage.get_project(site.project_id),
            Err(Error::NotFound(_))
        ));
    }
}
