//! Project and membership queries.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{Storage, placeholders, unique_violation};
use crate::models::{Project, Role};
use crate::{Error, Result};

const PROJECT_COLUMNS: &str =
    "id, name, code, location, owner_id, start_date, end_date, created_at, updated_at";

impl Storage {
    /// Insert a project and register its owner as a member.
    pub fn insert_project(&mut self, project: &Project) -> Result<Project> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (name, code, location, owner_id, start_date, end_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project.name,
                project.code,
                project.location,
                project.owner_id,
                project.start_date,
                project.end_date,
                project.created_at,
                project.updated_at,
            ],
        )
        .map_err(|e| unique_violation(e, format!("Project code already in use: {}", project.code)))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
            params![id, project.owner_id],
        )?;
        tx.commit()?;

        Ok(Project {
            id,
            ..project.clone()
        })
    }

    /// Get a project by ID.
    pub fn get_project(&self, id: i64) -> Result<Project> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                [id],
                row_to_project,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", id)))
    }

    /// List projects. With `member_of`, only projects the user owns or belongs to.
    pub fn list_projects(&self, member_of: Option<i64>) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects p
             WHERE ?1 IS NULL
                OR p.owner_id = ?1
                OR EXISTS (SELECT 1 FROM project_members m WHERE m.project_id = p.id AND m.user_id = ?1)
             ORDER BY p.id",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map([member_of], row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Fetch several projects at once, in ID order. Unknown IDs are skipped.
    pub fn get_projects(&self, ids: &[i64]) -> Result<Vec<Project>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects WHERE id IN ({}) ORDER BY id",
            PROJECT_COLUMNS,
            placeholders(ids.len())
        ))?;
        let projects = stmt
            .query_map(params_from_iter(ids), row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Update a project.
    pub fn update_project(&mut self, project: &Project) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET name = ?2, code = ?3, location = ?4, owner_id = ?5,
                 start_date = ?6, end_date = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    project.id,
                    project.name,
                    project.code,
                    project.location,
                    project.owner_id,
                    project.start_date,
                    project.end_date,
                    project.updated_at,
                ],
            )
            .map_err(|e| unique_violation(e, format!("Project code already in use: {}", project.code)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Project not found: {}", project.id)));
        }
        Ok(())
    }

    /// Delete a project and everything under it.
    pub fn delete_project(&mut self, id: i64) -> Result<()> {
        let changed = self.conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Project not found: {}", id)));
        }
        Ok(())
    }

    /// Add a member. Returns false if they already were one.
    pub fn add_project_member(&mut self, project_id: i64, user_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
            params![project_id, user_id],
        )?;
        if inserted > 0 {
            self.touch_project(project_id)?;
        }
        Ok(inserted > 0)
    }

    /// Remove a member. Returns false if they were not one.
    pub fn remove_project_member(&mut self, project_id: i64, user_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        if removed > 0 {
            self.touch_project(project_id)?;
        }
        Ok(removed > 0)
    }

    fn touch_project(&mut self, project_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET updated_at = ?2 WHERE id = ?1",
            params![project_id, Utc::now()],
        )?;
        Ok(())
    }

    /// User IDs of a project's members.
    pub fn project_member_ids(&self, project_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY user_id",
        )?;
        let ids = stmt
            .query_map([project_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Members of a project holding `role`.
    pub fn project_members_with_role(&self, project_id: i64, role: Role) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id FROM project_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.project_id = ?1 AND u.role = ?2
             ORDER BY u.id",
        )?;
        let ids = stmt
            .query_map(params![project_id, role], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Returns true if the user owns or belongs to the project.
    pub fn is_project_member(&self, project_id: i64, user_id: i64) -> Result<bool> {
        let member: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM project_members WHERE project_id = ?1 AND user_id = ?2)
                 OR EXISTS (SELECT 1 FROM projects WHERE id = ?1 AND owner_id = ?2)",
            params![project_id, user_id],
            |row| row.get(0),
        )?;
        Ok(member)
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        code: row.get("code")?,
        location: row.get("location")?,
        owner_id: row.get("owner_id")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
