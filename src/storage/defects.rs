//! Defect, attachment and reinspection queries.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Storage, decode_photos, encode_photos};
use crate::models::{
    AttachmentType, Defect, DefectAttachment, DefectInspection, DefectSeverity, DefectStatus,
    DefectType,
};
use crate::{Error, Result};

const DEFECT_COLUMNS: &str = "id, project_id, task_id, checklist_id, title, description, type, \
                              severity, status, reported_by, assigned_to, root_cause, \
                              corrective_action, preventive_action, implementation_method, \
                              resolution_notes, before_photos, after_photos, due_date, \
                              resolved_at, verified_by, verified_at, created_at, updated_at";

/// Filters for [`Storage::list_defects`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefectFilter {
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub status: Option<DefectStatus>,
    pub severity: Option<DefectSeverity>,
    pub defect_type: Option<DefectType>,
    pub assigned_to: Option<i64>,
    /// Restrict to projects this user owns or belongs to
    pub visible_to: Option<i64>,
}

impl Storage {
    /// Insert a defect.
    pub fn insert_defect(&mut self, defect: &Defect) -> Result<Defect> {
        self.conn.execute(
            "INSERT INTO defects (project_id, task_id, checklist_id, title, description, type,
                 severity, status, reported_by, assigned_to, root_cause, corrective_action,
                 preventive_action, implementation_method, resolution_notes, before_photos,
                 after_photos, due_date, resolved_at, verified_by, verified_at, created_at,
                 updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                defect.project_id,
                defect.task_id,
                defect.checklist_id,
                defect.title,
                defect.description,
                defect.defect_type,
                defect.severity,
                defect.status,
                defect.reported_by,
                defect.assigned_to,
                defect.root_cause,
                defect.corrective_action,
                defect.preventive_action,
                defect.implementation_method,
                defect.resolution_notes,
                encode_photos(&defect.before_photos)?,
                encode_photos(&defect.after_photos)?,
                defect.due_date,
                defect.resolved_at,
                defect.verified_by,
                defect.verified_at,
                defect.created_at,
                defect.updated_at,
            ],
        )?;
        Ok(Defect {
            id: self.conn.last_insert_rowid(),
            ..defect.clone()
        })
    }

    /// Get a defect by ID.
    pub fn get_defect(&self, id: i64) -> Result<Defect> {
        load_defect(&self.conn, id)
    }

    /// List defects, newest first.
    pub fn list_defects(&self, filter: &DefectFilter) -> Result<Vec<Defect>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM defects d
             WHERE (?1 IS NULL OR d.project_id = ?1)
               AND (?2 IS NULL OR d.task_id = ?2)
               AND (?3 IS NULL OR d.status = ?3)
               AND (?4 IS NULL OR d.severity = ?4)
               AND (?5 IS NULL OR d.type = ?5)
               AND (?6 IS NULL OR d.assigned_to = ?6)
               AND (?7 IS NULL
                    OR EXISTS (SELECT 1 FROM project_members m
                               WHERE m.project_id = d.project_id AND m.user_id = ?7)
                    OR EXISTS (SELECT 1 FROM projects p
                               WHERE p.id = d.project_id AND p.owner_id = ?7))
             ORDER BY d.id DESC",
            DEFECT_COLUMNS
        ))?;
        let defects = stmt
            .query_map(
                params![
                    filter.project_id,
                    filter.task_id,
                    filter.status,
                    filter.severity,
                    filter.defect_type,
                    filter.assigned_to,
                    filter.visible_to,
                ],
                row_to_defect,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defects)
    }

    /// Update every mutable column of a defect.
    pub fn update_defect(&mut self, defect: &Defect) -> Result<()> {
        write_defect(&self.conn, defect)
    }

    /// Delete a defect with its attachments and inspections.
    pub fn delete_defect(&mut self, id: i64) -> Result<()> {
        let changed = self.conn.execute("DELETE FROM defects WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Defect not found: {}", id)));
        }
        Ok(())
    }

    /// Attach a file. Before and after photos are also appended to the
    /// defect's matching photo list, in the same transaction.
    pub fn insert_attachment(&mut self, attachment: &DefectAttachment) -> Result<DefectAttachment> {
        let tx = self.conn.transaction()?;
        let mut defect = load_defect(&tx, attachment.defect_id)?;

        tx.execute(
            "INSERT INTO defect_attachments (defect_id, attachment_type, file_url, file_name,
                 uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.defect_id,
                attachment.attachment_type,
                attachment.file_url,
                attachment.file_name,
                attachment.uploaded_by,
                attachment.created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let photos = match attachment.attachment_type {
            AttachmentType::Before => Some(&mut defect.before_photos),
            AttachmentType::After => Some(&mut defect.after_photos),
            AttachmentType::Supporting => None,
        };
        if let Some(photos) = photos {
            if !photos.contains(&attachment.file_url) {
                photos.push(attachment.file_url.clone());
            }
            defect.updated_at = attachment.created_at;
            write_defect(&tx, &defect)?;
        }
        tx.commit()?;

        Ok(DefectAttachment {
            id,
            ..attachment.clone()
        })
    }

    /// Attachments of a defect, oldest first.
    pub fn list_attachments(&self, defect_id: i64) -> Result<Vec<DefectAttachment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, defect_id, attachment_type, file_url, file_name, uploaded_by, created_at
             FROM defect_attachments WHERE defect_id = ?1 ORDER BY id",
        )?;
        let attachments = stmt
            .query_map([defect_id], |row| {
                Ok(DefectAttachment {
                    id: row.get("id")?,
                    defect_id: row.get("defect_id")?,
                    attachment_type: row.get("attachment_type")?,
                    file_url: row.get("file_url")?,
                    file_name: row.get("file_name")?,
                    uploaded_by: row.get("uploaded_by")?,
                    created_at: row.get("created_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    /// Record a reinspection and the defect state it produced, atomically.
    pub fn insert_defect_inspection(
        &mut self,
        defect: &Defect,
        inspection: &DefectInspection,
    ) -> Result<DefectInspection> {
        let tx = self.conn.transaction()?;
        write_defect(&tx, defect)?;
        tx.execute(
            "INSERT INTO defect_inspections (defect_id, inspector_id, result, comments,
                 photo_urls, inspected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                inspection.defect_id,
                inspection.inspector_id,
                inspection.result,
                inspection.comments,
                encode_photos(&inspection.photo_urls)?,
                inspection.inspected_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(DefectInspection {
            id,
            ..inspection.clone()
        })
    }

    /// Reinspection history of a defect, oldest first.
    pub fn list_defect_inspections(&self, defect_id: i64) -> Result<Vec<DefectInspection>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, defect_id, inspector_id, result, comments, photo_urls, inspected_at
             FROM defect_inspections WHERE defect_id = ?1 ORDER BY id",
        )?;
        let inspections = stmt
            .query_map([defect_id], |row| {
                Ok(DefectInspection {
                    id: row.get("id")?,
                    defect_id: row.get("defect_id")?,
                    inspector_id: row.get("inspector_id")?,
                    result: row.get("result")?,
                    comments: row.get("comments")?,
                    photo_urls: decode_photos(row.get("photo_urls")?),
                    inspected_at: row.get("inspected_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(inspections)
    }
}

fn load_defect(conn: &Connection, id: i64) -> Result<Defect> {
    conn.query_row(
        &format!("SELECT {} FROM defects WHERE id = ?1", DEFECT_COLUMNS),
        [id],
        row_to_defect,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Defect not found: {}", id)))
}

fn write_defect(conn: &Connection, defect: &Defect) -> Result<()> {
    let changed = conn.execute(
        "UPDATE defects SET checklist_id = ?2, title = ?3, description = ?4, type = ?5,
             severity = ?6, status = ?7, assigned_to = ?8, root_cause = ?9,
             corrective_action = ?10, preventive_action = ?11, implementation_method = ?12,
             resolution_notes = ?13, before_photos = ?14, after_photos = ?15, due_date = ?16,
             resolved_at = ?17, verified_by = ?18, verified_at = ?19, updated_at = ?20
         WHERE id = ?1",
        params![
            defect.id,
            defect.checklist_id,
            defect.title,
            defect.description,
            defect.defect_type,
            defect.severity,
            defect.status,
            defect.assigned_to,
            defect.root_cause,
            defect.corrective_action,
            defect.preventive_action,
            defect.implementation_method,
            defect.resolution_notes,
            encode_photos(&defect.before_photos)?,
            encode_photos(&defect.after_photos)?,
            defect.due_date,
            defect.resolved_at,
            defect.verified_by,
            defect.verified_at,
            defect.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Defect not found: {}", defect.id)));
    }
    Ok(())
}

fn row_to_defect(row: &Row<'_>) -> rusqlite::Result<Defect> {
    Ok(Defect {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        task_id: row.get("task_id")?,
        checklist_id: row.get("checklist_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        defect_type: row.get("type")?,
        severity: row.get("severity")?,
        status: row.get("status")?,
        reported_by: row.get("reported_by")?,
        assigned_to: row.get("assigned_to")?,
        root_cause: row.get("root_cause")?,
        corrective_action: row.get("corrective_action")?,
        preventive_action: row.get("preventive_action")?,
        implementation_method: row.get("implementation_method")?,
        resolution_notes: row.get("resolution_notes")?,
        before_photos: decode_photos(row.get("before_photos")?),
        after_photos: decode_photos(row.get("after_photos")?),
        due_date: row.get("due_date")?,
        resolved_at: row.get("resolved_at")?,
        verified_by: row.get("verified_by")?,
        verified_at: row.get("verified_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
