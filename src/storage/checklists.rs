//! Checklist templates, checklist instances and item results.
//!
//! A checklist instance is *live* unless a re-inspection instance points back
//! at it. Only live instances count toward task progress.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Storage, decode_photos, encode_photos};
use crate::models::progress::ResultTally;
use crate::models::{
    ChecklistItemResult, ChecklistStage, ChecklistTemplate, ChecklistTemplateItem, ItemResult,
    TaskChecklist,
};
use crate::{Error, Result};

const CHECKLIST_COLUMNS: &str = "id, task_id, template_id, stage, status, inspected_by, inspected_at, \
                                 general_comments, photo_urls, signature, reinspection_of, \
                                 created_at, updated_at";

const LIVE: &str =
    "NOT EXISTS (SELECT 1 FROM task_checklists s WHERE s.reinspection_of = c.id)";

impl Storage {
    // === Templates ===

    /// Insert a template with its items.
    pub fn insert_template(&mut self, template: &ChecklistTemplate) -> Result<ChecklistTemplate> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO checklist_templates (name, stage, description, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                template.name,
                template.stage,
                template.description,
                template.created_by,
                template.created_at,
            ],
        )?;
        let template_id = tx.last_insert_rowid();

        let mut items = Vec::with_capacity(template.items.len());
        for item in &template.items {
            items.push(insert_item(&tx, template_id, item)?);
        }
        tx.commit()?;

        Ok(ChecklistTemplate {
            id: template_id,
            items,
            ..template.clone()
        })
    }

    /// Get a template with its items.
    pub fn get_template(&self, id: i64) -> Result<ChecklistTemplate> {
        let mut template = self
            .conn
            .query_row(
                "SELECT id, name, stage, description, created_by, created_at
                 FROM checklist_templates WHERE id = ?1",
                [id],
                row_to_template,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Checklist template not found: {}", id)))?;
        template.items = self.template_items(id)?;
        Ok(template)
    }

    /// List templates, optionally for one stage.
    pub fn list_templates(&self, stage: Option<ChecklistStage>) -> Result<Vec<ChecklistTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, stage, description, created_by, created_at
             FROM checklist_templates
             WHERE ?1 IS NULL OR stage = ?1
             ORDER BY id",
        )?;
        let mut templates = stmt
            .query_map([stage], row_to_template)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for template in &mut templates {
            template.items = self.template_items(template.id)?;
        }
        Ok(templates)
    }

    fn template_items(&self, template_id: i64) -> Result<Vec<ChecklistTemplateItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, template_id, position, title, description, required
             FROM checklist_template_items
             WHERE template_id = ?1
             ORDER BY position, id",
        )?;
        let items = stmt
            .query_map([template_id], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Append an item to the end of a template.
    pub fn append_template_item(
        &mut self,
        template_id: i64,
        title: &str,
        description: Option<&str>,
        required: bool,
    ) -> Result<ChecklistTemplateItem> {
        let next: u32 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM checklist_template_items WHERE template_id = ?1",
            [template_id],
            |row| row.get(0),
        )?;
        let item = ChecklistTemplateItem {
            id: 0,
            template_id,
            position: next,
            title: title.to_string(),
            description: description.map(str::to_string),
            required,
        };
        insert_item(&self.conn, template_id, &item)
    }

    /// Number of checklist instances created from a template.
    pub fn count_template_instances(&self, template_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM task_checklists WHERE template_id = ?1",
            [template_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a template and its items.
    pub fn delete_template(&mut self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM checklist_templates WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Checklist template not found: {}", id)));
        }
        Ok(())
    }

    // === Checklist instances ===

    /// Insert a checklist instance.
    pub fn insert_checklist(&mut self, checklist: &TaskChecklist) -> Result<TaskChecklist> {
        self.conn.execute(
            "INSERT INTO task_checklists (task_id, template_id, stage, status, inspected_by,
                 inspected_at, general_comments, photo_urls, signature, reinspection_of,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                checklist.task_id,
                checklist.template_id,
                checklist.stage,
                checklist.status,
                checklist.inspected_by,
                checklist.inspected_at,
                checklist.general_comments,
                encode_photos(&checklist.photo_urls)?,
                checklist.signature,
                checklist.reinspection_of,
                checklist.created_at,
                checklist.updated_at,
            ],
        )?;
        Ok(TaskChecklist {
            id: self.conn.last_insert_rowid(),
            ..checklist.clone()
        })
    }

    /// Get a checklist instance by ID.
    pub fn get_checklist(&self, id: i64) -> Result<TaskChecklist> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM task_checklists WHERE id = ?1", CHECKLIST_COLUMNS),
                [id],
                row_to_checklist,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Checklist not found: {}", id)))
    }

    /// All checklist instances of a task, including superseded ones.
    pub fn list_checklists(&self, task_id: i64) -> Result<Vec<TaskChecklist>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM task_checklists WHERE task_id = ?1 ORDER BY id",
            CHECKLIST_COLUMNS
        ))?;
        let checklists = stmt
            .query_map([task_id], row_to_checklist)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checklists)
    }

    /// The live instance of `template_id` on `task_id`, if any.
    pub fn find_live_checklist(
        &self,
        task_id: i64,
        template_id: i64,
    ) -> Result<Option<TaskChecklist>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM task_checklists c
                     WHERE c.task_id = ?1 AND c.template_id = ?2 AND {}
                     ORDER BY c.id DESC LIMIT 1",
                    CHECKLIST_COLUMNS, LIVE
                ),
                params![task_id, template_id],
                row_to_checklist,
            )
            .optional()?)
    }

    /// Returns true if a re-inspection instance already supersedes `checklist_id`.
    pub fn is_superseded(&self, checklist_id: i64) -> Result<bool> {
        let superseded: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM task_checklists WHERE reinspection_of = ?1)",
            [checklist_id],
            |row| row.get(0),
        )?;
        Ok(superseded)
    }

    /// Persist a checklist and a batch of item results in one transaction.
    pub fn save_checklist_results(
        &mut self,
        checklist: &TaskChecklist,
        results: &[ChecklistItemResult],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for result in results {
            upsert_result(&tx, result)?;
        }
        write_checklist(&tx, checklist)?;
        tx.commit()?;
        Ok(())
    }

    /// Item results recorded on a checklist instance.
    pub fn list_item_results(&self, checklist_id: i64) -> Result<Vec<ChecklistItemResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.task_checklist_id, r.template_item_id, r.result, r.comments,
                    r.photo_urls, r.recorded_by, r.recorded_at
             FROM checklist_item_results r
             JOIN checklist_template_items i ON i.id = r.template_item_id
             WHERE r.task_checklist_id = ?1
             ORDER BY i.position, i.id",
        )?;
        let results = stmt
            .query_map([checklist_id], row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Result counts for one checklist instance.
    pub fn checklist_tally(&self, checklist_id: i64) -> Result<ResultTally> {
        let checklist = self.get_checklist(checklist_id)?;
        let total = self.template_item_count(checklist.template_id)?;
        let results = self.list_item_results(checklist_id)?;
        Ok(ResultTally::from_results(
            total,
            results.iter().map(|r| r.result),
        ))
    }

    /// Result counts for every live checklist of a task.
    pub fn live_checklist_tallies(&self, task_id: i64) -> Result<Vec<ResultTally>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.id,
                    (SELECT COUNT(*) FROM checklist_template_items i WHERE i.template_id = c.template_id),
                    SUM(CASE WHEN r.result = 'pass' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN r.result = 'fail' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN r.result = 'na' THEN 1 ELSE 0 END)
             FROM task_checklists c
             LEFT JOIN checklist_item_results r ON r.task_checklist_id = c.id
             WHERE c.task_id = ?1 AND {}
             GROUP BY c.id",
            LIVE
        ))?;
        let tallies = stmt
            .query_map([task_id], |row| {
                Ok(ResultTally {
                    total: row.get::<_, i64>(1)? as usize,
                    pass: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
                    fail: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as usize,
                    na: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tallies)
    }

    fn template_item_count(&self, template_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checklist_template_items WHERE template_id = ?1",
            [template_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn insert_item(
    conn: &Connection,
    template_id: i64,
    item: &ChecklistTemplateItem,
) -> Result<ChecklistTemplateItem> {
    conn.execute(
        "INSERT INTO checklist_template_items (template_id, position, title, description, required)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            template_id,
            item.position,
            item.title,
            item.description,
            item.required
        ],
    )?;
    Ok(ChecklistTemplateItem {
        id: conn.last_insert_rowid(),
        template_id,
        ..item.clone()
    })
}

fn write_checklist(conn: &Connection, checklist: &TaskChecklist) -> Result<()> {
    let changed = conn.execute(
        "UPDATE task_checklists SET status = ?2, inspected_by = ?3, inspected_at = ?4,
             general_comments = ?5, photo_urls = ?6, signature = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            checklist.id,
            checklist.status,
            checklist.inspected_by,
            checklist.inspected_at,
            checklist.general_comments,
            encode_photos(&checklist.photo_urls)?,
            checklist.signature,
            checklist.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Checklist not found: {}", checklist.id)));
    }
    Ok(())
}

fn upsert_result(conn: &Connection, result: &ChecklistItemResult) -> Result<()> {
    conn.execute(
        "INSERT INTO checklist_item_results (task_checklist_id, template_item_id, result, comments,
             photo_urls, recorded_by, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (task_checklist_id, template_item_id) DO UPDATE SET
             result = excluded.result,
             comments = excluded.comments,
             photo_urls = excluded.photo_urls,
             recorded_by = excluded.recorded_by,
             recorded_at = excluded.recorded_at",
        params![
            result.task_checklist_id,
            result.template_item_id,
            result.result,
            result.comments,
            encode_photos(&result.photo_urls)?,
            result.recorded_by,
            result.recorded_at,
        ],
    )?;
    Ok(())
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<ChecklistTemplate> {
    Ok(ChecklistTemplate {
        id: row.get("id")?,
        name: row.get("name")?,
        stage: row.get("stage")?,
        description: row.get("description")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        items: Vec::new(),
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ChecklistTemplateItem> {
    Ok(ChecklistTemplateItem {
        id: row.get("id")?,
        template_id: row.get("template_id")?,
        position: row.get("position")?,
        title: row.get("title")?,
        description: row.get("description")?,
        required: row.get("required")?,
    })
}

fn row_to_checklist(row: &Row<'_>) -> rusqlite::Result<TaskChecklist> {
    Ok(TaskChecklist {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        template_id: row.get("template_id")?,
        stage: row.get("stage")?,
        status: row.get("status")?,
        inspected_by: row.get("inspected_by")?,
        inspected_at: row.get("inspected_at")?,
        general_comments: row.get("general_comments")?,
        photo_urls: decode_photos(row.get("photo_urls")?),
        signature: row.get("signature")?,
        reinspection_of: row.get("reinspection_of")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<ChecklistItemResult> {
    let result: ItemResult = row.get("result")?;
    Ok(ChecklistItemResult {
        id: row.get("id")?,
        task_checklist_id: row.get("task_checklist_id")?,
        template_item_id: row.get("template_item_id")?,
        result,
        comments: row.get("comments")?,
        photo_urls: decode_photos(row.get("photo_urls")?),
        recorded_by: row.get("recorded_by")?,
        recorded_at: row.get("recorded_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChecklistStatus, Project, Role, Task, TaskStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        storage: Storage,
        user_id: i64,
        task_id: i64,
        template: ChecklistTemplate,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut storage = Storage::init(temp.path()).unwrap();
        let user = storage.create_user("QC", "qc@site.test", Role::QcInspector).unwrap();
        let now = Utc::now();
        let project = storage
            .insert_project(&Project {
                id: 0,
                name: "Tower".to_string(),
                code: "T-1".to_string(),
                location: None,
                owner_id: user.id,
                start_date: None,
                end_date: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        let task = storage
            .insert_task(&Task {
                id: 0,
                project_id: project.id,
                name: "Slab".to_string(),
                description: None,
                assignee_id: None,
                start_date: None,
                end_date: None,
                progress: 0,
                status: TaskStatus::Todo,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        let items = ["Rebar", "Cover", "Formwork", "Conduits"]
            .iter()
            .enumerate()
            .map(|(i, title)| ChecklistTemplateItem {
                id: 0,
                template_id: 0,
                position: i as u32 + 1,
                title: title.to_string(),
                description: None,
                required: true,
            })
            .collect();
        let template = storage
            .insert_template(&ChecklistTemplate {
                id: 0,
                name: "Pre-pour".to_string(),
                stage: ChecklistStage::PreExecution,
                description: None,
                created_by: user.id,
                created_at: now,
                items,
            })
            .unwrap();
        Fixture {
            _temp: temp,
            storage,
            user_id: user.id,
            task_id: task.id,
            template,
        }
    }

    fn instance(f: &Fixture, reinspection_of: Option<i64>) -> TaskChecklist {
        let now = Utc::now();
        TaskChecklist {
            id: 0,
            task_id: f.task_id,
            template_id: f.template.id,
            stage: f.template.stage,
            status: ChecklistStatus::NotStarted,
            inspected_by: None,
            inspected_at: None,
            general_comments: None,
            photo_urls: Vec::new(),
            signature: None,
            reinspection_of,
            created_at: now,
            updated_at: now,
        }
    }

    fn result(f: &Fixture, checklist_id: i64, index: usize, value: ItemResult) -> ChecklistItemResult {
        ChecklistItemResult {
            id: 0,
            task_checklist_id: checklist_id,
            template_item_id: f.template.items[index].id,
            result: value,
            comments: None,
            photo_urls: vec!["item.jpg".to_string()],
            recorded_by: f.user_id,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_template_round_trip_keeps_item_order() {
        let mut f = fixture();
        let loaded = f.storage.get_template(f.template.id).unwrap();
        let titles: Vec<&str> = loaded.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Rebar", "Cover", "Formwork", "Conduits"]);

        let template_id = f.template.id;
        let appended = f
            .storage
            .append_template_item(template_id, "Cleanliness", None, false)
            .unwrap();
        assert_eq!(appended.position, 5);
        assert_eq!(f.storage.get_template(f.template.id).unwrap().items.len(), 5);
    }

    #[test]
    fn test_results_upsert_and_tally() {
        let mut f = fixture();
        let new = instance(&f, None);
        let mut c = f.storage.insert_checklist(&new).unwrap();
        c.status = ChecklistStatus::InProgress;

        let first = vec![result(&f, c.id, 0, ItemResult::Fail)];
        f.storage.save_checklist_results(&c, &first).unwrap();
        let rescored = vec![
            result(&f, c.id, 0, ItemResult::Pass),
            result(&f, c.id, 1, ItemResult::Na),
        ];
        f.storage.save_checklist_results(&c, &rescored).unwrap();

        let results = f.storage.list_item_results(c.id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result, ItemResult::Pass);
        assert_eq!(results[0].photo_urls, vec!["item.jpg".to_string()]);

        let tally = f.storage.checklist_tally(c.id).unwrap();
        assert_eq!(tally, ResultTally { total: 4, pass: 1, fail: 0, na: 1 });
        assert_eq!(
            f.storage.get_checklist(c.id).unwrap().status,
            ChecklistStatus::InProgress
        );
    }

    #[test]
    fn test_reinspection_supersedes_original() {
        let mut f = fixture();
        let new = instance(&f, None);
        let original = f.storage.insert_checklist(&new).unwrap();
        let failed = vec![result(&f, original.id, 0, ItemResult::Fail)];
        f.storage.save_checklist_results(&original, &failed).unwrap();
        assert_eq!(f.storage.live_checklist_tallies(f.task_id).unwrap().len(), 1);
        assert!(!f.storage.is_superseded(original.id).unwrap());

        let new = instance(&f, Some(original.id));
        let redo = f.storage.insert_checklist(&new).unwrap();

        assert!(f.storage.is_superseded(original.id).unwrap());
        let live = f
            .storage
            .find_live_checklist(f.task_id, f.template.id)
            .unwrap()
            .unwrap();
        assert_eq!(live.id, redo.id);
        assert_eq!(live.reinspection_of, Some(original.id));

        let tallies = f.storage.live_checklist_tallies(f.task_id).unwrap();
        assert_eq!(tallies, vec![ResultTally { total: 4, pass: 0, fail: 0, na: 0 }]);
        assert_eq!(f.storage.list_checklists(f.task_id).unwrap().len(), 2);
        assert_eq!(f.storage.count_template_instances(f.template.id).unwrap(), 2);
    }
}
