//! Local setup, status and configuration. CLI only; not exposed over RPC.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::user::validate_email;
use super::{Output, Workspace, required};
use crate::config::{CONFIG_FILE, ConfigOverrides, QcConfig, ResolvedConfig, resolve_config};
use crate::models::{ActivityEntry, Role, User};
use crate::permissions::Caller;
use crate::storage::Storage;
use crate::{Result, audit};

/// The first administrator, created by `qc system init`.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub data_dir: PathBuf,
    /// False when the database already existed
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<User>,
    pub user_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub data_dir: PathBuf,
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_commit: &'static str,
    pub build_profile: &'static str,
    pub user_count: usize,
    pub project_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSet {
    pub key: String,
    pub value: String,
    pub path: PathBuf,
}

/// Create the storage in `data_dir` and, on an empty database, its first admin.
pub fn system_init(data_dir: &Path, seed: Option<AdminSeed>) -> Result<InitResult> {
    let created = !Storage::exists(data_dir);
    let mut storage = Storage::init(data_dir)?;

    let mut admin = None;
    if storage.count_users()? == 0 {
        if let Some(seed) = seed {
            let name = required(&seed.name, "Admin name")?;
            let email = validate_email(&seed.email)?;
            let user = storage.create_user(&name, &email, Role::Admin)?;
            let caller = Caller::new(user.id, user.role);
            audit::record(
                &mut storage,
                &caller,
                "system.init",
                "user",
                Some(user.id),
                &json!({"name": user.name, "email": user.email}),
            );
            info!(user_id = user.id, "created first admin");
            admin = Some(user);
        }
    }

    if !data_dir.join(CONFIG_FILE).exists() {
        QcConfig::default().save(data_dir)?;
    }

    Ok(InitResult {
        data_dir: data_dir.to_path_buf(),
        created,
        user_count: storage.count_users()?,
        admin,
    })
}

pub fn system_status(ws: &Workspace) -> Result<StatusInfo> {
    Ok(StatusInfo {
        data_dir: ws.storage.root.clone(),
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("QC_BUILD_TIMESTAMP"),
        git_commit: env!("QC_GIT_COMMIT"),
        build_profile: env!("QC_BUILD_PROFILE"),
        user_count: ws.storage.count_users()?,
        project_count: ws.storage.list_projects(None)?.len(),
        last_activity: ws.storage.last_activity()?,
    })
}

/// Effective configuration with the source of every value.
pub fn config_show(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file = QcConfig::load(data_dir)?;
    resolve_config(&file, overrides)
}

/// Write one key to `config.kdl`.
pub fn config_set(data_dir: &Path, key: &str, value: &str) -> Result<ConfigSet> {
    let mut config = QcConfig::load(data_dir)?;
    config.set(key, value)?;
    config.save(data_dir)?;
    Ok(ConfigSet {
        key: key.to_string(),
        value: value.to_string(),
        path: data_dir.join(CONFIG_FILE),
    })
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![if self.created {
            format!("Initialized qcflow in {}", self.data_dir.display())
        } else {
            format!("qcflow already initialized in {}", self.data_dir.display())
        }];
        match &self.admin {
            Some(admin) => lines.push(format!(
                "Created admin #{} {} <{}>; pass --as {} to act as them",
                admin.id, admin.name, admin.email, admin.id
            )),
            None if self.user_count == 0 => {
                lines.push("No users yet: rerun with --admin-name and --admin-email".to_string())
            }
            None => lines.push(format!("{} user(s)", self.user_count)),
        }
        lines.join("\n")
    }
}

impl Output for StatusInfo {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!(
                "qc {} ({} {} built {})",
                self.version, self.git_commit, self.build_profile, self.build_timestamp
            ),
            format!("Data: {}", self.data_dir.display()),
            format!("{} user(s), {} project(s)", self.user_count, self.project_count),
        ];
        if let Some(ref last) = self.last_activity {
            lines.push(format!(
                "Last activity: {} by user {} at {}",
                last.action,
                last.user_id,
                last.created_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.join("\n")
    }
}

impl Output for ResolvedConfig {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!(
                "output-format        {} ({})",
                self.output_format.value, self.output_format.source
            ),
            format!(
                "email-notifications  {} ({})",
                self.email_notifications.value, self.email_notifications.source
            ),
            format!(
                "server.host          {} ({})",
                self.server_host.value, self.server_host.source
            ),
            format!(
                "server.port          {} ({})",
                self.server_port.value, self.server_port.source
            ),
        ];
        for (severity, days) in &self.due_days {
            lines.push(format!(
                "due-days.{:<12} {} ({})",
                severity.as_str(),
                days.value,
                days.source
            ));
        }
        lines.join("\n")
    }
}

impl Output for ConfigSet {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path.display())
    }
}
