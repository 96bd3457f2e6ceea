//! Inbox notifications and the activity log.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::Storage;
use crate::models::{ActivityEntry, Notification};
use crate::notify::NotificationDraft;
use crate::{Error, Result};

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, priority, project_id, \
                                    entity_type, entity_id, send_email, is_read, created_at";

/// Filters for [`Storage::list_activity`].
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
    pub limit: usize,
}

impl Storage {
    /// Store a notification in its recipient's inbox.
    pub fn insert_notification(&mut self, draft: &NotificationDraft) -> Result<Notification> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO notifications (user_id, kind, title, message, priority, project_id,
                 entity_type, entity_id, send_email, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
            params![
                draft.user_id,
                draft.kind,
                draft.title,
                draft.message,
                draft.priority,
                draft.project_id,
                draft.entity_type,
                draft.entity_id,
                draft.send_email,
                now,
            ],
        )?;

        Ok(Notification {
            id: self.conn.last_insert_rowid(),
            user_id: draft.user_id,
            kind: draft.kind,
            title: draft.title.clone(),
            message: draft.message.clone(),
            priority: draft.priority,
            project_id: draft.project_id,
            entity_type: draft.entity_type.clone(),
            entity_id: draft.entity_id,
            send_email: draft.send_email,
            is_read: false,
            created_at: now,
        })
    }

    /// A user's notifications, newest first.
    pub fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY id DESC
             LIMIT ?3",
            NOTIFICATION_COLUMNS
        ))?;
        let notifications = stmt
            .query_map(params![user_id, unread_only, limit as i64], row_to_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    /// Mark one of a user's notifications read.
    ///
    /// A notification belonging to someone else is reported as not found.
    pub fn mark_notification_read(&mut self, user_id: i64, id: i64) -> Result<Notification> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Notification not found: {}", id)));
        }
        Ok(self.conn.query_row(
            &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
            [id],
            row_to_notification,
        )?)
    }

    /// Mark all of a user's notifications read. Returns how many changed.
    pub fn mark_all_notifications_read(&mut self, user_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            [user_id],
        )?)
    }

    pub fn count_unread_notifications(&self, user_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Activity Log ===

    /// Append an activity entry.
    pub fn insert_activity(
        &mut self,
        user_id: i64,
        action: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        details: &serde_json::Value,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO activity_log (user_id, action, entity_type, entity_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                action,
                entity_type,
                entity_id,
                serde_json::to_string(details)?,
                Utc::now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Activity entries, newest first.
    pub fn list_activity(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, action, entity_type, entity_id, details, created_at
             FROM activity_log
             WHERE (?1 IS NULL OR entity_type = ?1)
               AND (?2 IS NULL OR entity_id = ?2)
               AND (?3 IS NULL OR user_id = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let entries = stmt
            .query_map(
                params![
                    filter.entity_type,
                    filter.entity_id,
                    filter.user_id,
                    filter.limit as i64
                ],
                row_to_activity,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Most recent activity entry, if any.
    pub fn last_activity(&self) -> Result<Option<ActivityEntry>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, action, entity_type, entity_id, details, created_at
                 FROM activity_log ORDER BY id DESC LIMIT 1",
                [],
                row_to_activity,
            )
            .optional()?)
    }
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind: row.get("kind")?,
        title: row.get("title")?,
        message: row.get("message")?,
        priority: row.get("priority")?,
        project_id: row.get("project_id")?,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        send_email: row.get("send_email")?,
        is_read: row.get("is_read")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let raw: String = row.get("details")?;
    Ok(ActivityEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        action: row.get("action")?,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        details: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
    })
}
