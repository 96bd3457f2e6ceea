//! Common test utilities for qcflow integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/qcflow/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
pub use tempfile::TempDir;

/// User ids created by [`TestEnv::site`], in creation order.
pub const ADMIN: i64 = 1;
pub const MANAGER: i64 = 2;
pub const INSPECTOR: i64 = 3;
pub const ENGINEER: i64 = 4;
pub const VIEWER: i64 = 5;

/// A test environment with isolated data storage.
///
/// The `qc()` method returns a `Command` that sets `QC_DATA_DIR`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub work_dir: TempDir,
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            work_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment with an initialized database and admin.
    pub fn init() -> Self {
        let env = Self::new();
        env.qc()
            .args([
                "system",
                "init",
                "--admin-name",
                "Admin",
                "--admin-email",
                "admin@site.test",
            ])
            .assert()
            .success();
        env
    }

    /// An initialized environment with one user per role, project RT-01
    /// (id 1) owned by the manager, task 1 assigned to the engineer and a
    /// three-item pre-execution template (id 1, items 1-3).
    pub fn site() -> Self {
        let env = Self::init();
        for (name, role) in [
            ("Manager", "project_manager"),
            ("Inspector", "qc_inspector"),
            ("Engineer", "field_engineer"),
            ("Viewer", "viewer"),
        ] {
            let email = format!("{}@site.test", name.to_lowercase());
            env.run_as(ADMIN, &["user", "create", name, "--email", &email, "--role", role]);
        }
        env.run_as(
            MANAGER,
            &["project", "create", "Riverside Tower", "--code", "RT-01"],
        );
        for member in [INSPECTOR, ENGINEER, VIEWER] {
            env.run_as(MANAGER, &["project", "add-member", "1", &member.to_string()]);
        }
        env.run_as(
            MANAGER,
            &[
                "task",
                "create",
                "Pour level 3 slab",
                "--project",
                "1",
                "--assignee",
                &ENGINEER.to_string(),
            ],
        );
        env.run_as(
            INSPECTOR,
            &[
                "template",
                "create",
                "Slab pre-pour",
                "--stage",
                "pre_execution",
                "--item",
                "Rebar spacing",
                "--item",
                "Formwork level",
                "--item",
                "Embedded conduits",
            ],
        );
        env
    }

    /// Get a Command for the qc binary with isolated data directory.
    pub fn qc(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_qc"));
        cmd.current_dir(self.work_dir.path());
        cmd.env("QC_DATA_DIR", self.data_dir.path());
        cmd.env_remove("QC_USER");
        cmd.env_remove("QC_OUTPUT_FORMAT");
        cmd
    }

    /// A Command acting as `user_id`.
    pub fn qc_as(&self, user_id: i64) -> Command {
        let mut cmd = self.qc();
        cmd.env("QC_USER", user_id.to_string());
        cmd
    }

    /// Run a command as `user_id`, assert success and parse its JSON output.
    pub fn run_as(&self, user_id: i64, args: &[&str]) -> Value {
        let output = self.qc_as(user_id).args(args).assert().success();
        parse_json(&output.get_output().stdout)
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(stdout)
        )
    })
}
