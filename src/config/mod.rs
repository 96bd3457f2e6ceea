//! Configuration for qcflow.
//!
//! Settings live in `config.kdl` inside the data directory:
//! - `output-format` - "json" or "human"
//! - `email-notifications` - whether flagged notifications are also emailed
//! - `server` - `host` and `port` for `qc serve`
//! - `due-days` - default days until a new defect is due, per severity
//!
//! Use the [`resolver`] module for precedence resolution against CLI flags
//! and environment variables.

pub mod resolver;
pub mod schema;

pub use resolver::{ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config};
pub use schema::{CONFIG_FILE, OutputFormat, QcConfig, default_due_days};
