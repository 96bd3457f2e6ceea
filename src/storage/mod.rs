//! Storage layer for qcflow data.
//!
//! Everything lives in a single SQLite database (`qc.db`) inside the data
//! directory, next to the optional `config.kdl`. The data directory is
//! resolved, in order, from an explicit path, `QC_DATA_DIR`, or
//! `~/.local/share/qcflow/<hash>/` keyed on the working directory.
//!
//! Queries are grouped by entity:
//! - [`projects`] - projects and membership
//! - [`tasks`] - tasks and progress writes
//! - [`checklists`] - templates, checklist instances and item results
//! - [`defects`] - defects, attachments and reinspections
//! - [`notifications`] - inbox rows and the activity log
//! - [`stats`] - dashboard aggregation

pub mod checklists;
pub mod defects;
pub mod notifications;
pub mod projects;
pub mod stats;
pub mod tasks;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode as SqliteCode, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::{Role, User};
use crate::{Error, Result};

/// Database file name inside the data directory.
pub const DB_FILE: &str = "qc.db";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "QC_DATA_DIR";

/// Storage manager for one qcflow data directory.
pub struct Storage {
    /// Data directory holding the database and config
    pub root: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open existing storage in `root`.
    pub fn open(root: &Path) -> Result<Self> {
        if !Self::exists(root) {
            return Err(Error::NotInitialized);
        }
        let conn = Self::connect(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            conn,
        })
    }

    /// Create (or reopen) storage in `root`.
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let conn = Self::connect(root)?;
        debug!(root = %root.display(), "storage initialized");
        Ok(Self {
            root: root.to_path_buf(),
            conn,
        })
    }

    /// Check if storage has been initialized in `root`.
    pub fn exists(root: &Path) -> bool {
        root.join(DB_FILE).exists()
    }

    fn connect(root: &Path) -> Result<Connection> {
        let conn = Connection::open(root.join(DB_FILE))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Self::init_schema(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(conn)
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,
                location TEXT,
                owner_id INTEGER NOT NULL REFERENCES users(id),
                start_date TEXT,
                end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_members (
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (project_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                start_date TEXT,
                end_date TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'todo',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checklist_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                stage TEXT NOT NULL,
                description TEXT,
                created_by INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checklist_template_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER NOT NULL REFERENCES checklist_templates(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                required INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS task_checklists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                template_id INTEGER NOT NULL REFERENCES checklist_templates(id),
                stage TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'not_started',
                inspected_by INTEGER REFERENCES users(id),
                inspected_at TEXT,
                general_comments TEXT,
                photo_urls TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checklist_item_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_checklist_id INTEGER NOT NULL REFERENCES task_checklists(id) ON DELETE CASCADE,
                template_item_id INTEGER NOT NULL REFERENCES checklist_template_items(id) ON DELETE CASCADE,
                result TEXT NOT NULL,
                comments TEXT,
                photo_urls TEXT NOT NULL DEFAULT '[]',
                recorded_by INTEGER NOT NULL REFERENCES users(id),
                recorded_at TEXT NOT NULL,
                UNIQUE (task_checklist_id, template_item_id)
            );

            CREATE TABLE IF NOT EXISTS defects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                checklist_id INTEGER REFERENCES task_checklists(id) ON DELETE SET NULL,
                title TEXT NOT NULL,
                description TEXT,
                type TEXT NOT NULL,
                severity TEXT NOT NULL DEFAULT 'medium',
                status TEXT NOT NULL DEFAULT 'reported',
                reported_by INTEGER NOT NULL REFERENCES users(id),
                assigned_to INTEGER REFERENCES users(id) ON DELETE SET NULL,
                root_cause TEXT,
                corrective_action TEXT,
                preventive_action TEXT,
                implementation_method TEXT,
                resolution_notes TEXT,
                before_photos TEXT NOT NULL DEFAULT '[]',
                after_photos TEXT NOT NULL DEFAULT '[]',
                due_date TEXT,
                resolved_at TEXT,
                verified_by INTEGER REFERENCES users(id),
                verified_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS defect_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                defect_id INTEGER NOT NULL REFERENCES defects(id) ON DELETE CASCADE,
                attachment_type TEXT NOT NULL,
                file_url TEXT NOT NULL,
                file_name TEXT,
                uploaded_by INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS defect_inspections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                defect_id INTEGER NOT NULL REFERENCES defects(id) ON DELETE CASCADE,
                inspector_id INTEGER NOT NULL REFERENCES users(id),
                result TEXT NOT NULL,
                comments TEXT,
                photo_urls TEXT NOT NULL DEFAULT '[]',
                inspected_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                project_id INTEGER,
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                send_email INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id INTEGER,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
            CREATE INDEX IF NOT EXISTS idx_checklists_task ON task_checklists(task_id);
            CREATE INDEX IF NOT EXISTS idx_results_checklist ON checklist_item_results(task_checklist_id);
            CREATE INDEX IF NOT EXISTS idx_defects_project ON defects(project_id);
            CREATE INDEX IF NOT EXISTS idx_defects_status ON defects(status);
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
            CREATE INDEX IF NOT EXISTS idx_activity_entity ON activity_log(entity_type, entity_id);
            "#,
        )?;

        Ok(())
    }

    /// Run database migrations for schema changes.
    ///
    /// Columns added after the first release are checked individually, since
    /// SQLite has no `ADD COLUMN IF NOT EXISTS`.
    fn run_migrations(conn: &Connection) -> Result<()> {
        const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
            ("task_checklists", "signature", "TEXT"),
            (
                "task_checklists",
                "reinspection_of",
                "INTEGER REFERENCES task_checklists(id) ON DELETE SET NULL",
            ),
        ];

        for (table, column, decl) in ADDED_COLUMNS {
            let present: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |row| row.get(0),
            )?;
            if !present {
                debug!(table, column, "adding column");
                conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
                    [],
                )?;
            }
        }

        Ok(())
    }

    // === User Operations ===

    /// Create a user. Email addresses are unique.
    pub fn create_user(&mut self, name: &str, email: &str, role: Role) -> Result<User> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO users (name, email, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, email, role, now],
            )
            .map_err(|e| unique_violation(e, format!("Email already registered: {}", email)))?;

        Ok(User {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            created_at: now,
        })
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: i64) -> Result<User> {
        self.find_user(id)?
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))
    }

    /// Look up a user, returning `None` if absent.
    pub fn find_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, email, role, created_at FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .optional()?)
    }

    /// List users, optionally restricted to one role.
    pub fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, role, created_at FROM users
             WHERE ?1 IS NULL OR role = ?1
             ORDER BY id",
        )?;
        let users = stmt
            .query_map([role], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        role: row.get("role")?,
        created_at: row.get("created_at")?,
    })
}

/// Turn a UNIQUE constraint failure into a user-facing BAD_REQUEST.
pub(crate) fn unique_violation(err: rusqlite::Error, message: String) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == SqliteCode::ConstraintViolation => {
            Error::BadRequest(message)
        }
        _ => Error::Database(err),
    }
}

/// Encode a photo list for a JSON text column.
pub(crate) fn encode_photos(photos: &[String]) -> Result<String> {
    Ok(serde_json::to_string(photos)?)
}

/// Decode a photo list column. Malformed values read as an empty list.
pub(crate) fn decode_photos(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(photos) => photos,
        Err(e) => {
            warn!("ignoring malformed photo list: {}", e);
            Vec::new()
        }
    }
}

/// `?1, ?2, ...` placeholders for an `IN (...)` clause.
pub(crate) fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve the data directory.
///
/// Precedence: `explicit` > `QC_DATA_DIR` > `<data_dir>/qcflow/<hash of workspace>`.
pub fn resolve_data_dir(explicit: Option<&Path>, workspace: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    get_storage_dir(workspace)
}

/// Get the default storage directory for a workspace.
///
/// Uses a hash of the workspace path to create a unique directory
/// under `~/.local/share/qcflow/`.
pub fn get_storage_dir(workspace: &Path) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;

    let canonical = workspace
        .canonicalize()
        .map_err(|e| Error::Other(format!("Could not canonicalize workspace path: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());

    Ok(data_dir.join("qcflow").join(&hash_hex[..12]))
}
