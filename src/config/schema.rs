//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The [`QcConfig`] struct mirroring the file
//! - Serialization to and from KDL
//! - Validation and built-in defaults

use std::collections::BTreeMap;
use std::path::Path;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::models::DefectSeverity;
use crate::{Error, Result};

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.kdl";

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Days until a new defect is due, by severity, when the reporter gives no date.
pub fn default_due_days(severity: DefectSeverity) -> u32 {
    match severity {
        DefectSeverity::Critical => 1,
        DefectSeverity::High => 3,
        DefectSeverity::Medium => 7,
        DefectSeverity::Low => 14,
    }
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// output-format "human"
/// email-notifications #true
/// server host="0.0.0.0" port=8080
/// due-days critical=1 high=3 medium=7 low=14
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcConfig {
    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,

    /// Whether flagged notifications also go out by email
    pub email_notifications: Option<bool>,

    /// Address the RPC server binds to
    pub server_host: Option<String>,

    pub server_port: Option<u16>,

    /// Per-severity overrides of [`default_due_days`]
    #[serde(default)]
    pub due_days: BTreeMap<DefectSeverity, u32>,
}

impl QcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.server_port == Some(0) {
            return Err("server port must be 1-65535, got 0".to_string());
        }
        for (severity, days) in &self.due_days {
            if *days > 365 {
                return Err(format!(
                    "due-days {} must be at most 365, got {}",
                    severity, days
                ));
            }
        }
        Ok(())
    }

    /// Days until a defect of `severity` is due.
    pub fn due_days_for(&self, severity: DefectSeverity) -> u32 {
        self.due_days
            .get(&severity)
            .copied()
            .unwrap_or_else(|| default_due_days(severity))
    }

    /// Parse config from a KDL document. Unknown nodes and bad values are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(node) = doc.get("output-format") {
            if let Some(s) = first_value(node).and_then(|v| v.as_string()) {
                config.output_format = OutputFormat::parse(s);
            }
        }

        if let Some(node) = doc.get("email-notifications") {
            config.email_notifications = first_value(node).and_then(|v| v.as_bool());
        }

        if let Some(node) = doc.get("server") {
            config.server_host = property(node, "host")
                .and_then(|v| v.as_string())
                .map(str::to_string);
            config.server_port = property(node, "port")
                .and_then(|v| v.as_integer())
                .and_then(|i| u16::try_from(i).ok());
        }

        if let Some(node) = doc.get("due-days") {
            for entry in node.entries() {
                let Some(name) = entry.name() else {
                    continue;
                };
                let Ok(severity) = name.value().parse::<DefectSeverity>() else {
                    continue;
                };
                if let Some(days) = entry.value().as_integer().and_then(|i| u32::try_from(i).ok())
                {
                    config.due_days.insert(severity, days);
                }
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(format) = self.output_format {
            let mut node = KdlNode::new("output-format");
            node.push(KdlEntry::new(KdlValue::String(format.as_str().to_string())));
            doc.nodes_mut().push(node);
        }

        if let Some(enabled) = self.email_notifications {
            let mut node = KdlNode::new("email-notifications");
            node.push(KdlEntry::new(KdlValue::Bool(enabled)));
            doc.nodes_mut().push(node);
        }

        if self.server_host.is_some() || self.server_port.is_some() {
            let mut node = KdlNode::new("server");
            if let Some(ref host) = self.server_host {
                node.push(KdlEntry::new_prop("host", KdlValue::String(host.clone())));
            }
            if let Some(port) = self.server_port {
                node.push(KdlEntry::new_prop("port", KdlValue::Integer(port as i128)));
            }
            doc.nodes_mut().push(node);
        }

        if !self.due_days.is_empty() {
            let mut node = KdlNode::new("due-days");
            for (severity, days) in &self.due_days {
                node.push(KdlEntry::new_prop(
                    severity.as_str(),
                    KdlValue::Integer(*days as i128),
                ));
            }
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Load config.kdl from `dir`. A missing file is an empty config.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        let config = Self::from_kdl(&doc);
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Write config.kdl into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate().map_err(Error::Config)?;
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(CONFIG_FILE), self.to_kdl().to_string())?;
        Ok(())
    }

    /// Set one key from its string form, as used by `qc config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "output-format" => {
                self.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    Error::BadRequest(format!("output-format must be json or human, got {}", value))
                })?);
            }
            "email-notifications" => {
                self.email_notifications = Some(parse_bool(value).ok_or_else(|| {
                    Error::BadRequest(format!("email-notifications must be true or false, got {}", value))
                })?);
            }
            "server.host" => self.server_host = Some(value.to_string()),
            "server.port" => {
                self.server_port = Some(value.parse().map_err(|_| {
                    Error::BadRequest(format!("server.port must be a port number, got {}", value))
                })?);
            }
            other => {
                let Some(severity) = other.strip_prefix("due-days.") else {
                    return Err(Error::BadRequest(format!("Unknown config key: {}", key)));
                };
                let severity: DefectSeverity = severity.parse().map_err(Error::BadRequest)?;
                let days: u32 = value.parse().map_err(|_| {
                    Error::BadRequest(format!("{} must be a number of days, got {}", key, value))
                })?;
                self.due_days.insert(severity, days);
            }
        }
        self.validate().map_err(Error::BadRequest)
    }
}

fn first_value(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn property<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(name))
        .map(|e| e.value())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("human"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }

    #[test]
    fn test_config_from_kdl_empty() {
        let doc: KdlDocument = "".parse().unwrap();
        assert_eq!(QcConfig::from_kdl(&doc), QcConfig::default());
    }

    #[test]
    fn test_config_from_kdl_full() {
        let doc: KdlDocument = r#"
output-format "human"
email-notifications #true
server host="0.0.0.0" port=8080
due-days critical=2 low=30 bogus=4
"#
        .parse()
        .unwrap();
        let config = QcConfig::from_kdl(&doc);
        assert_eq!(config.output_format, Some(OutputFormat::Human));
        assert_eq!(config.email_notifications, Some(true));
        assert_eq!(config.server_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.server_port, Some(8080));
        assert_eq!(config.due_days_for(DefectSeverity::Critical), 2);
        assert_eq!(config.due_days_for(DefectSeverity::Low), 30);
        assert_eq!(config.due_days_for(DefectSeverity::High), 3);
        assert_eq!(config.due_days.len(), 2);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp = TempDir::new().unwrap();
        let mut config = QcConfig::new();
        config.set("output-format", "human").unwrap();
        config.set("server.port", "9000").unwrap();
        config.set("due-days.medium", "10").unwrap();
        config.save(temp.path()).unwrap();

        let loaded = QcConfig::load(temp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert_eq!(QcConfig::load(temp.path()).unwrap(), QcConfig::default());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = QcConfig::new();
        assert!(config.set("server.port", "http").is_err());
        assert!(config.set("server.port", "0").is_err());
        assert!(config.set("due-days.urgent", "1").is_err());
        assert!(config.set("editor", "vim").is_err());
        assert!(config.set("email-notifications", "maybe").is_err());
    }
}
