//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. `QC_*` environment variables
//! 3. config.kdl in the data directory
//! 4. Built-in defaults

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{OutputFormat, QcConfig, default_due_days};
use crate::models::DefectSeverity;
use crate::{Error, Result};

pub const OUTPUT_FORMAT_ENV: &str = "QC_OUTPUT_FORMAT";
pub const EMAIL_NOTIFICATIONS_ENV: &str = "QC_EMAIL_NOTIFICATIONS";
pub const SERVER_HOST_ENV: &str = "QC_HOST";
pub const SERVER_PORT_ENV: &str = "QC_PORT";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub output_format: Resolved<OutputFormat>,
    pub email_notifications: Resolved<bool>,
    pub server_host: Resolved<String>,
    pub server_port: Resolved<u16>,
    pub due_days: BTreeMap<DefectSeverity, Resolved<u32>>,
}

impl ResolvedConfig {
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    /// Bind address for the RPC server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host.value, self.server_port.value)
    }

    /// Collapse back into a plain config, as used by the workspace.
    pub fn to_config(&self) -> QcConfig {
        QcConfig {
            output_format: Some(self.output_format.value),
            email_notifications: Some(self.email_notifications.value),
            server_host: Some(self.server_host.value.clone()),
            server_port: Some(self.server_port.value),
            due_days: self
                .due_days
                .iter()
                .map(|(severity, days)| (*severity, days.value))
                .collect(),
        }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = Some(host.into());
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }
}

/// Resolve configuration against the process environment.
pub fn resolve_config(file: &QcConfig, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with_env(file, overrides, |name| std::env::var(name).ok())
}

/// Resolve configuration with an explicit environment lookup.
pub fn resolve_config_with_env<F>(
    file: &QcConfig,
    overrides: &ConfigOverrides,
    env: F,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let output_format = pick(
        overrides.output_format,
        env_value(&env, OUTPUT_FORMAT_ENV, OutputFormat::parse)?,
        file.output_format,
        OutputFormat::default(),
    );

    let email_notifications = pick(
        None,
        env_value(&env, EMAIL_NOTIFICATIONS_ENV, |s| match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })?,
        file.email_notifications,
        false,
    );

    let server_host = pick(
        overrides.server_host.clone(),
        env_value(&env, SERVER_HOST_ENV, |s| Some(s.to_string()))?,
        file.server_host.clone(),
        DEFAULT_HOST.to_string(),
    );

    let server_port = pick(
        overrides.server_port,
        env_value(&env, SERVER_PORT_ENV, |s| s.parse::<u16>().ok().filter(|p| *p > 0))?,
        file.server_port,
        DEFAULT_PORT,
    );

    let due_days = DefectSeverity::all()
        .iter()
        .map(|severity| {
            let resolved = match file.due_days.get(severity) {
                Some(days) => Resolved::new(*days, ValueSource::ConfigFile),
                None => Resolved::new(default_due_days(*severity), ValueSource::Default),
            };
            (*severity, resolved)
        })
        .collect();

    Ok(ResolvedConfig {
        output_format,
        email_notifications,
        server_host,
        server_port,
        due_days,
    })
}

/// Read and parse an environment variable. A set but unparseable value is an error.
fn env_value<T, F, P>(env: &F, name: &str, parse: P) -> Result<Option<(T, String)>>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    match env(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse(raw.trim())
            .map(|v| Some((v, name.to_string())))
            .ok_or_else(|| Error::Config(format!("invalid value for {}: {}", name, raw))),
    }
}

fn pick<T>(cli: Option<T>, env: Option<(T, String)>, file: Option<T>, default: T) -> Resolved<T> {
    if let Some(v) = cli {
        Resolved::new(v, ValueSource::CliFlag)
    } else if let Some((v, name)) = env {
        Resolved::new(v, ValueSource::EnvVar(name))
    } else if let Some(v) = file {
        Resolved::new(v, ValueSource::ConfigFile)
    } else {
        Resolved::new(default, ValueSource::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let resolved =
            resolve_config_with_env(&QcConfig::default(), &ConfigOverrides::new(), env_of(&[]))
                .unwrap();
        assert_eq!(resolved.output_format(), OutputFormat::Json);
        assert_eq!(resolved.output_format.source, ValueSource::Default);
        assert!(!resolved.email_notifications.value);
        assert_eq!(resolved.server_addr(), "127.0.0.1:3000");
        assert_eq!(resolved.due_days[&DefectSeverity::Critical].value, 1);
    }

    #[test]
    fn test_precedence_cli_env_file() {
        let file = QcConfig {
            output_format: Some(OutputFormat::Human),
            server_port: Some(8000),
            server_host: Some("0.0.0.0".to_string()),
            ..Default::default()
        };
        let env = env_of(&[(SERVER_PORT_ENV, "9000"), (EMAIL_NOTIFICATIONS_ENV, "yes")]);
        let overrides = ConfigOverrides::new().with_server_port(9100);

        let resolved = resolve_config_with_env(&file, &overrides, env).unwrap();
        assert_eq!(resolved.server_port.value, 9100);
        assert_eq!(resolved.server_port.source, ValueSource::CliFlag);
        assert_eq!(resolved.output_format.source, ValueSource::ConfigFile);
        assert!(resolved.email_notifications.value);
        assert_eq!(
            resolved.email_notifications.source.to_string(),
            "env:QC_EMAIL_NOTIFICATIONS"
        );
        assert_eq!(resolved.server_host.value, "0.0.0.0");
    }

    #[test]
    fn test_invalid_env_is_an_error() {
        let result = resolve_config_with_env(
            &QcConfig::default(),
            &ConfigOverrides::new(),
            env_of(&[(OUTPUT_FORMAT_ENV, "xml")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_file_due_days_are_tracked() {
        let mut file = QcConfig::default();
        file.due_days.insert(DefectSeverity::Low, 21);
        let resolved =
            resolve_config_with_env(&file, &ConfigOverrides::new(), env_of(&[])).unwrap();
        assert_eq!(resolved.due_days[&DefectSeverity::Low].value, 21);
        assert_eq!(resolved.due_days[&DefectSeverity::Low].source, ValueSource::ConfigFile);
        assert_eq!(resolved.to_config().due_days_for(DefectSeverity::Low), 21);
    }
}
