//! CLI argument definitions for qcflow.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::models::{
    AttachmentType, ChecklistStage, DefectSeverity, DefectStatus, DefectType, InspectionOutcome,
    ItemResult, Role,
};

/// qc - Quality-control workflow for construction projects.
///
/// Start with `qc system init --admin-name .. --admin-email ..`, then act as
/// a user with `--as <user-id>` (or `QC_USER`).
#[derive(Parser, Debug)]
#[command(name = "qc")]
#[command(author, version, about = "Inspections, defects and dashboards for construction QC", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory holding qc.db and config.kdl
    #[arg(long = "data-dir", global = true, env = "QC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// User id to act as
    #[arg(long = "as", global = true, env = "QC_USER")]
    pub as_user: Option<i64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Setup and health (human-operated)
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// Configuration in config.kdl
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// User accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Projects and membership
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Scheduled work inside a project
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Checklist templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Checklists assigned to tasks, and their inspections
    Checklist {
        #[command(subcommand)]
        command: ChecklistCommands,
    },

    /// CAR/PAR/NCR defect tickets
    Defect {
        #[command(subcommand)]
        command: DefectCommands,
    },

    /// Your notification inbox
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },

    /// Aggregated statistics
    Dashboard {
        #[command(subcommand)]
        command: DashboardCommands,
    },

    /// Show the audit trail
    Activity(ActivityArgs),

    /// Call any procedure with a JSON input, as the server would
    Rpc {
        /// Procedure name (e.g., defect.update)
        procedure: String,

        /// JSON input (defaults to {})
        params: Option<String>,
    },

    /// List every RPC procedure
    Procedures,

    /// Start the RPC server (requires 'server' feature)
    #[cfg(feature = "server")]
    Serve {
        /// Host address to bind to (default 127.0.0.1, or QC_HOST / config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default 3000, or QC_PORT / config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// System subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Create the data directory and the first admin
    Init {
        /// Name of the first admin (only used on an empty database)
        #[arg(long, requires = "admin_email")]
        admin_name: Option<String>,

        /// Email of the first admin
        #[arg(long, requires = "admin_name")]
        admin_email: Option<String>,
    },

    /// Show data location, build and usage counts
    Status,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective values and where each came from
    Show,

    /// Set a value (output-format, email-notifications, server.host,
    /// server.port, due-days.<severity>)
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a user (admin only)
    Create {
        /// Display name
        name: String,

        /// Email address
        #[arg(long)]
        email: String,

        /// Role (admin, project_manager, qc_inspector, field_engineer, viewer)
        #[arg(long)]
        role: Role,
    },

    /// List users
    List {
        /// Filter by role
        #[arg(long)]
        role: Option<Role>,
    },

    /// Show the acting user
    Me,
}

/// Project subcommands
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project
    Create {
        /// Project name
        name: String,

        /// Short unique code (e.g., RT-01)
        #[arg(long)]
        code: String,

        #[arg(long)]
        location: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Owning manager (admin only; defaults to you)
        #[arg(long)]
        owner: Option<i64>,
    },

    /// Show a project with derived status and progress
    Show { id: i64 },

    /// List visible projects
    List,

    /// Update a project
    Update {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        code: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        /// New owner (admin only)
        #[arg(long)]
        owner: Option<i64>,
    },

    /// Delete a project and everything in it
    Delete { id: i64 },

    /// Add a member
    AddMember { project_id: i64, user_id: i64 },

    /// Remove a member
    RemoveMember { project_id: i64, user_id: i64 },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Create {
        /// Task name
        name: String,

        /// Project the task belongs to
        #[arg(short, long)]
        project: i64,

        #[arg(short, long)]
        description: Option<String>,

        /// Assignee (must be a project member)
        #[arg(short, long)]
        assignee: Option<i64>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Show a task
    Show { id: i64 },

    /// List tasks
    List {
        #[arg(short, long)]
        project: Option<i64>,

        #[arg(short, long)]
        assignee: Option<i64>,
    },

    /// Update a task
    Update {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        assignee: Option<i64>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Delete a task
    Delete { id: i64 },

    /// Set progress by hand (0-100)
    Progress { id: i64, progress: u8 },
}

/// Template subcommands
#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Create a template
    Create {
        /// Template name
        name: String,

        /// Stage (pre_execution, in_progress, post_execution)
        #[arg(short, long)]
        stage: ChecklistStage,

        #[arg(short, long)]
        description: Option<String>,

        /// Item title (repeatable, in order)
        #[arg(short, long = "item", required = true)]
        items: Vec<String>,
    },

    /// Append an item
    AddItem {
        template_id: i64,

        /// Item title
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Mark the item optional
        #[arg(long)]
        optional: bool,
    },

    /// Show a template with its items
    Show { id: i64 },

    /// List templates
    List {
        #[arg(short, long)]
        stage: Option<ChecklistStage>,
    },

    /// Delete an unused template
    Delete { id: i64 },
}

/// Checklist subcommands
#[derive(Subcommand, Debug)]
pub enum ChecklistCommands {
    /// Assign a template to a task
    Assign { task_id: i64, template_id: i64 },

    /// Ask the project's inspectors to inspect
    Request { id: i64 },

    /// Score one item
    Record {
        checklist_id: i64,

        /// Template item id
        item_id: i64,

        /// pass, fail or na
        result: ItemResult,

        #[arg(short, long)]
        comments: Option<String>,

        /// Photo URL (repeatable)
        #[arg(long = "photo")]
        photos: Vec<String>,
    },

    /// Submit the inspection
    Submit {
        checklist_id: i64,

        /// ITEM_ID=RESULT (repeatable); merged over already recorded results
        #[arg(short, long = "result", value_parser = parse_item_result)]
        results: Vec<(i64, ItemResult)>,

        #[arg(short, long)]
        comments: Option<String>,

        /// Photo URL (repeatable)
        #[arg(long = "photo")]
        photos: Vec<String>,

        /// Signature image URL
        #[arg(long)]
        signature: Option<String>,
    },

    /// Start a re-inspection of a failed checklist
    Reinspect { id: i64 },

    /// Show a checklist with its items and results
    Show { id: i64 },

    /// List checklists of a task
    List { task_id: i64 },
}

/// Defect subcommands
#[derive(Subcommand, Debug)]
pub enum DefectCommands {
    /// Report a defect
    Create {
        /// Short title
        title: String,

        /// Task the defect was found on
        #[arg(short, long)]
        task: i64,

        /// CAR, PAR or NCR
        #[arg(long = "type")]
        defect_type: DefectType,

        /// low, medium, high or critical
        #[arg(short, long)]
        severity: Option<DefectSeverity>,

        #[arg(short, long)]
        description: Option<String>,

        /// Checklist the defect was raised from
        #[arg(long)]
        checklist: Option<i64>,

        /// Assignee (must be a project member)
        #[arg(short, long)]
        assign: Option<i64>,

        /// Due date (defaults per severity)
        #[arg(long)]
        due: Option<NaiveDate>,

        /// Before photo URL (repeatable)
        #[arg(long = "before-photo")]
        before_photos: Vec<String>,
    },

    /// Show a defect
    Show { id: i64 },

    /// List defects
    List {
        #[arg(short, long)]
        project: Option<i64>,

        #[arg(short, long)]
        task: Option<i64>,

        #[arg(long)]
        status: Option<DefectStatus>,

        #[arg(short, long)]
        severity: Option<DefectSeverity>,

        #[arg(long = "type")]
        defect_type: Option<DefectType>,

        #[arg(short, long)]
        assignee: Option<i64>,
    },

    /// Edit fields and optionally move the defect to a new status
    Update(DefectUpdateArgs),

    /// Assign a defect
    Assign { id: i64, user_id: i64 },

    /// Delete a defect
    Delete { id: i64 },

    /// Attach a file by URL
    Attach {
        defect_id: i64,

        /// File URL
        url: String,

        /// before, after or supporting
        #[arg(long = "type", default_value = "supporting")]
        attachment_type: AttachmentType,

        #[arg(long)]
        name: Option<String>,
    },

    /// List attachments
    Attachments { defect_id: i64 },

    /// Ask inspectors to re-check a resolved defect
    RequestReinspection { id: i64 },

    /// Record a reinspection outcome (passed or failed)
    Reinspect {
        id: i64,

        result: InspectionOutcome,

        #[arg(short, long)]
        comments: Option<String>,

        /// Photo URL (repeatable)
        #[arg(long = "photo")]
        photos: Vec<String>,
    },

    /// Reinspection history
    Inspections { id: i64 },
}

/// Arguments of `qc defect update`
#[derive(Args, Debug)]
pub struct DefectUpdateArgs {
    pub id: i64,

    /// New status (reported, analysis, in_progress, resolved,
    /// pending_reinspection, closed)
    #[arg(long)]
    pub status: Option<DefectStatus>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(short, long)]
    pub severity: Option<DefectSeverity>,

    #[arg(long)]
    pub due: Option<NaiveDate>,

    #[arg(long)]
    pub root_cause: Option<String>,

    #[arg(long)]
    pub corrective_action: Option<String>,

    #[arg(long)]
    pub preventive_action: Option<String>,

    #[arg(long)]
    pub implementation_method: Option<String>,

    #[arg(long)]
    pub resolution_notes: Option<String>,

    /// Replace before photos (repeatable)
    #[arg(long = "before-photo")]
    pub before_photos: Vec<String>,

    /// Replace after photos (repeatable)
    #[arg(long = "after-photo")]
    pub after_photos: Vec<String>,
}

/// Notification subcommands
#[derive(Subcommand, Debug)]
pub enum NotificationCommands {
    /// List your notifications
    List {
        /// Only unread
        #[arg(short, long)]
        unread: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Mark one read
    Read { id: i64 },

    /// Mark all read
    ReadAll,

    /// Count unread
    Count,
}

/// Dashboard subcommands
#[derive(Subcommand, Debug)]
pub enum DashboardCommands {
    /// Per-project statistics (all visible projects when none given)
    Stats { project_ids: Vec<i64> },

    /// Totals across visible projects
    Summary,
}

/// Arguments of `qc activity`
#[derive(Args, Debug)]
pub struct ActivityArgs {
    /// Entity type (e.g., defect)
    #[arg(long = "type")]
    pub entity_type: Option<String>,

    #[arg(long = "id")]
    pub entity_id: Option<i64>,

    /// Actor (admins only for other users)
    #[arg(long)]
    pub user: Option<i64>,

    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Parse `ITEM_ID=RESULT`.
pub fn parse_item_result(s: &str) -> Result<(i64, ItemResult), String> {
    let (id, result) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ITEM_ID=RESULT, got '{}'", s))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid item id '{}'", id))?;
    Ok((id, result.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_item_result() {
        assert_eq!(parse_item_result("4=pass").unwrap(), (4, ItemResult::Pass));
        assert_eq!(parse_item_result(" 5 =NA").unwrap(), (5, ItemResult::Na));
        assert!(parse_item_result("pass").is_err());
        assert!(parse_item_result("x=pass").is_err());
        assert!(parse_item_result("4=maybe").is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["qc", "--as", "3", "-H", "defect", "show", "9"]).unwrap();
        assert_eq!(cli.as_user, Some(3));
        assert!(cli.human_readable);
        assert!(matches!(
            cli.command,
            Commands::Defect {
                command: DefectCommands::Show { id: 9 }
            }
        ));
    }
}
