//! qc CLI - Quality-control workflow for construction projects.

use clap::Parser;
use qcflow::cli::{
    ActivityArgs, ChecklistCommands, Cli, Commands, ConfigCommands, DashboardCommands,
    DefectCommands, DefectUpdateArgs, NotificationCommands, ProjectCommands, SystemCommands,
    TaskCommands, TemplateCommands, UserCommands,
};
use qcflow::commands::{
    self, IdInput, Output, Workspace, activity, checklist, dashboard, defect, notification,
    project, system, task, template, user,
};
use qcflow::config::{ConfigOverrides, OutputFormat, QcConfig, resolve_config};
use qcflow::notify::Dispatcher;
use qcflow::storage::{Storage, resolve_data_dir};
use serde_json::{Value, json};
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g., `QC_LOG=debug`).
const LOG_ENV: &str = "QC_LOG";

/// Set to `json` for one JSON object per log line.
const LOG_FORMAT_ENV: &str = "QC_LOG_FORMAT";

fn main() {
    let cli = Cli::parse();
    init_logging(is_serve(&cli.command));

    let mut human = cli.human_readable;
    let result = run(cli, &mut human);

    if let Err(e) = result {
        report_error(&e, human);
        process::exit(1);
    }
}

#[cfg(feature = "server")]
fn is_serve(command: &Commands) -> bool {
    matches!(command, Commands::Serve { .. })
}

#[cfg(not(feature = "server"))]
fn is_serve(_command: &Commands) -> bool {
    false
}

/// `--host`/`--port` on `qc serve` outrank env and config.
#[cfg(feature = "server")]
fn serve_overrides(command: &Commands, mut overrides: ConfigOverrides) -> ConfigOverrides {
    if let Commands::Serve { host, port } = command {
        if let Some(host) = host {
            overrides = overrides.with_server_host(host.clone());
        }
        if let Some(port) = port {
            overrides = overrides.with_server_port(*port);
        }
    }
    overrides
}

#[cfg(not(feature = "server"))]
fn serve_overrides(_command: &Commands, overrides: ConfigOverrides) -> ConfigOverrides {
    overrides
}

/// Log to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let json = env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn report_error(e: &qcflow::Error, human: bool) {
    if human {
        eprintln!("Error: {}", e);
        if matches!(e, qcflow::Error::NotInitialized) {
            eprintln!("\nTo initialize a new data directory:");
            eprintln!("    qc system init --admin-name <name> --admin-email <email>");
        }
    } else {
        let err = json!({
            "error": e.to_string(),
            "code": e.code().as_str(),
        });
        eprintln!("{}", err);
    }
}

fn run(cli: Cli, human: &mut bool) -> Result<(), qcflow::Error> {
    let cwd = env::current_dir()?;
    let data_dir = resolve_data_dir(cli.data_dir.as_deref(), &cwd)?;

    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    overrides = serve_overrides(&cli.command, overrides);

    // Setup commands work before (or without) a database.
    match &cli.command {
        Commands::System {
            command:
                SystemCommands::Init {
                    admin_name,
                    admin_email,
                },
        } => {
            let seed = match (admin_name, admin_email) {
                (Some(name), Some(email)) => Some(system::AdminSeed {
                    name: name.clone(),
                    email: email.clone(),
                }),
                _ => None,
            };
            let result = system::system_init(&data_dir, seed)?;
            output(&result, *human);
            return Ok(());
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => output(&system::config_show(&data_dir, &overrides)?, *human),
                ConfigCommands::Set { key, value } => {
                    output(&system::config_set(&data_dir, key, value)?, *human)
                }
            }
            return Ok(());
        }
        Commands::Procedures => {
            let list = json!({ "procedures": commands::PROCEDURES });
            if *human {
                println!("{}", commands::PROCEDURES.join("\n"));
            } else {
                println!("{}", list);
            }
            return Ok(());
        }
        _ => {}
    }

    let file_config = QcConfig::load(&data_dir)?;
    let resolved = resolve_config(&file_config, &overrides)?;
    *human = resolved.output_format() == OutputFormat::Human;

    let storage = Storage::open(&data_dir)?;
    let dispatcher = Dispatcher::new(resolved.email_notifications.value);
    let mut ws = Workspace::new(storage, dispatcher, resolved.to_config());

    match &cli.command {
        Commands::System {
            command: SystemCommands::Status,
        } => {
            output(&system::system_status(&ws)?, *human);
            return Ok(());
        }
        #[cfg(feature = "server")]
        Commands::Serve { .. } => return qcflow::server::serve(ws, &resolved.server_addr()),
        _ => {}
    }

    let caller = ws.authenticate(cli.as_user)?;
    run_command(cli.command, &mut ws, &caller, *human)
}

fn run_command(
    command: Commands,
    ws: &mut Workspace,
    caller: &qcflow::permissions::Caller,
    human: bool,
) -> Result<(), qcflow::Error> {
    match command {
        Commands::User { command } => match command {
            UserCommands::Create { name, email, role } => {
                let result = user::user_create(ws, caller, user::CreateUser { name, email, role })?;
                output(&result, human);
            }
            UserCommands::List { role } => {
                output(&user::user_list(ws, caller, user::ListUsers { role })?, human);
            }
            UserCommands::Me => output(&user::user_me(ws, caller)?, human),
        },

        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                code,
                location,
                start,
                end,
                owner,
            } => {
                let input = project::CreateProject {
                    name,
                    code,
                    location,
                    start_date: start,
                    end_date: end,
                    owner_id: owner,
                };
                output(&project::project_create(ws, caller, input)?, human);
            }
            ProjectCommands::Show { id } => {
                output(&project::project_get(ws, caller, IdInput { id })?, human);
            }
            ProjectCommands::List => output(&project::project_list(ws, caller)?, human),
            ProjectCommands::Update {
                id,
                name,
                code,
                location,
                start,
                end,
                owner,
            } => {
                let input = project::UpdateProject {
                    id,
                    name,
                    code,
                    location,
                    start_date: start,
                    end_date: end,
                    owner_id: owner,
                };
                output(&project::project_update(ws, caller, input)?, human);
            }
            ProjectCommands::Delete { id } => {
                output(&project::project_delete(ws, caller, IdInput { id })?, human);
            }
            ProjectCommands::AddMember {
                project_id,
                user_id,
            } => {
                let input = project::MemberInput {
                    project_id,
                    user_id,
                };
                output(&project::project_add_member(ws, caller, input)?, human);
            }
            ProjectCommands::RemoveMember {
                project_id,
                user_id,
            } => {
                let input = project::MemberInput {
                    project_id,
                    user_id,
                };
                output(&project::project_remove_member(ws, caller, input)?, human);
            }
        },

        Commands::Task { command } => match command {
            TaskCommands::Create {
                name,
                project,
                description,
                assignee,
                start,
                end,
            } => {
                let input = task::CreateTask {
                    project_id: project,
                    name,
                    description,
                    assignee_id: assignee,
                    start_date: start,
                    end_date: end,
                };
                output(&task::task_create(ws, caller, input)?, human);
            }
            TaskCommands::Show { id } => output(&task::task_get(ws, caller, IdInput { id })?, human),
            TaskCommands::List { project, assignee } => {
                let input = task::ListTasks {
                    project_id: project,
                    assignee_id: assignee,
                };
                output(&task::task_list(ws, caller, input)?, human);
            }
            TaskCommands::Update {
                id,
                name,
                description,
                assignee,
                start,
                end,
            } => {
                let input = task::UpdateTask {
                    id,
                    name,
                    description,
                    assignee_id: assignee,
                    start_date: start,
                    end_date: end,
                };
                output(&task::task_update(ws, caller, input)?, human);
            }
            TaskCommands::Delete { id } => {
                output(&task::task_delete(ws, caller, IdInput { id })?, human);
            }
            TaskCommands::Progress { id, progress } => {
                let input = task::UpdateProgress { id, progress };
                output(&task::task_update_progress(ws, caller, input)?, human);
            }
        },

        Commands::Template { command } => match command {
            TemplateCommands::Create {
                name,
                stage,
                description,
                items,
            } => {
                let input = template::CreateTemplate {
                    name,
                    stage,
                    description,
                    items,
                };
                output(&template::template_create(ws, caller, input)?, human);
            }
            TemplateCommands::AddItem {
                template_id,
                title,
                description,
                optional,
            } => {
                let input = template::AddTemplateItem {
                    template_id,
                    title,
                    description,
                    required: !optional,
                };
                output(&template::template_add_item(ws, caller, input)?, human);
            }
            TemplateCommands::Show { id } => {
                output(&template::template_get(ws, caller, IdInput { id })?, human);
            }
            TemplateCommands::List { stage } => {
                let input = template::ListTemplates { stage };
                output(&template::template_list(ws, caller, input)?, human);
            }
            TemplateCommands::Delete { id } => {
                output(&template::template_delete(ws, caller, IdInput { id })?, human);
            }
        },

        Commands::Checklist { command } => match command {
            ChecklistCommands::Assign {
                task_id,
                template_id,
            } => {
                let input = checklist::AssignChecklist {
                    task_id,
                    template_id,
                };
                output(&checklist::checklist_assign(ws, caller, input)?, human);
            }
            ChecklistCommands::Request { id } => {
                let result = checklist::checklist_request_inspection(ws, caller, IdInput { id })?;
                output(&result, human);
            }
            ChecklistCommands::Record {
                checklist_id,
                item_id,
                result,
                comments,
                photos,
            } => {
                let input = checklist::RecordItem {
                    checklist_id,
                    item: checklist::ItemInput {
                        template_item_id: item_id,
                        result,
                        comments,
                        photo_urls: photos,
                    },
                };
                output(&checklist::checklist_record_item(ws, caller, input)?, human);
            }
            ChecklistCommands::Submit {
                checklist_id,
                results,
                comments,
                photos,
                signature,
            } => {
                let input = checklist::SubmitChecklist {
                    checklist_id,
                    results: results
                        .into_iter()
                        .map(|(template_item_id, result)| checklist::ItemInput {
                            template_item_id,
                            result,
                            comments: None,
                            photo_urls: Vec::new(),
                        })
                        .collect(),
                    general_comments: comments,
                    photo_urls: photos,
                    signature,
                };
                output(&checklist::checklist_submit(ws, caller, input)?, human);
            }
            ChecklistCommands::Reinspect { id } => {
                output(&checklist::checklist_reinspect(ws, caller, IdInput { id })?, human);
            }
            ChecklistCommands::Show { id } => {
                output(&checklist::checklist_get(ws, caller, IdInput { id })?, human);
            }
            ChecklistCommands::List { task_id } => {
                let input = checklist::TaskIdInput { task_id };
                output(&checklist::checklist_list_by_task(ws, caller, input)?, human);
            }
        },

        Commands::Defect { command } => run_defect(command, ws, caller, human)?,

        Commands::Notification { command } => match command {
            NotificationCommands::List { unread, limit } => {
                let input = notification::ListNotifications {
                    unread_only: unread,
                    limit,
                };
                output(&notification::notification_list(ws, caller, input)?, human);
            }
            NotificationCommands::Read { id } => {
                let result = notification::notification_mark_read(ws, caller, IdInput { id })?;
                output(&result, human);
            }
            NotificationCommands::ReadAll => {
                output(&notification::notification_mark_all_read(ws, caller)?, human);
            }
            NotificationCommands::Count => {
                output(&notification::notification_unread_count(ws, caller)?, human);
            }
        },

        Commands::Dashboard { command } => match command {
            DashboardCommands::Stats { project_ids } => {
                let input = dashboard::ProjectStatsInput { project_ids };
                output(&dashboard::dashboard_project_stats(ws, caller, input)?, human);
            }
            DashboardCommands::Summary => {
                output(&dashboard::dashboard_summary(ws, caller)?, human);
            }
        },

        Commands::Activity(ActivityArgs {
            entity_type,
            entity_id,
            user,
            limit,
        }) => {
            let input = activity::ListActivity {
                entity_type,
                entity_id,
                user_id: user,
                limit,
            };
            output(&activity::activity_list(ws, caller, input)?, human);
        }

        Commands::Rpc { procedure, params } => {
            let params = match params {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                    qcflow::Error::BadRequest(format!("Invalid JSON params: {}", e))
                })?,
                None => Value::Null,
            };
            let value = commands::call(ws, caller, &procedure, params)?;
            if human {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", json!({ "result": value }));
            }
        }

        // Handled before authentication.
        Commands::System { .. } | Commands::Config { .. } | Commands::Procedures => {}
        #[cfg(feature = "server")]
        Commands::Serve { .. } => {}
    }

    Ok(())
}

fn run_defect(
    command: DefectCommands,
    ws: &mut Workspace,
    caller: &qcflow::permissions::Caller,
    human: bool,
) -> Result<(), qcflow::Error> {
    match command {
        DefectCommands::Create {
            title,
            task,
            defect_type,
            severity,
            description,
            checklist,
            assign,
            due,
            before_photos,
        } => {
            let input = defect::CreateDefect {
                project_id: None,
                task_id: task,
                checklist_id: checklist,
                title,
                description,
                defect_type: Some(defect_type),
                severity,
                assigned_to: assign,
                due_date: due,
                before_photos,
            };
            output(&defect::defect_create(ws, caller, input)?, human);
        }
        DefectCommands::Show { id } => {
            output(&defect::defect_get(ws, caller, IdInput { id })?, human);
        }
        DefectCommands::List {
            project,
            task,
            status,
            severity,
            defect_type,
            assignee,
        } => {
            let input = defect::ListDefects {
                project_id: project,
                task_id: task,
                status,
                severity,
                defect_type,
                assigned_to: assignee,
            };
            output(&defect::defect_list(ws, caller, input)?, human);
        }
        DefectCommands::Update(args) => {
            output(&defect::defect_update(ws, caller, update_input(args))?, human);
        }
        DefectCommands::Assign { id, user_id } => {
            let input = defect::AssignDefect {
                id,
                assigned_to: user_id,
            };
            output(&defect::defect_assign(ws, caller, input)?, human);
        }
        DefectCommands::Delete { id } => {
            output(&defect::defect_delete(ws, caller, IdInput { id })?, human);
        }
        DefectCommands::Attach {
            defect_id,
            url,
            attachment_type,
            name,
        } => {
            let input = defect::AddAttachment {
                defect_id,
                attachment_type,
                file_url: url,
                file_name: name,
            };
            output(&defect::defect_add_attachment(ws, caller, input)?, human);
        }
        DefectCommands::Attachments { defect_id } => {
            let input = defect::DefectIdInput { defect_id };
            output(&defect::defect_list_attachments(ws, caller, input)?, human);
        }
        DefectCommands::RequestReinspection { id } => {
            let result = defect::defect_request_reinspection(ws, caller, IdInput { id })?;
            output(&result, human);
        }
        DefectCommands::Reinspect {
            id,
            result,
            comments,
            photos,
        } => {
            let input = defect::RecordReinspection {
                id,
                result,
                comments,
                photo_urls: photos,
            };
            output(&defect::defect_record_reinspection(ws, caller, input)?, human);
        }
        DefectCommands::Inspections { id } => {
            output(&defect::defect_inspections(ws, caller, IdInput { id })?, human);
        }
    }
    Ok(())
}

/// Repeated photo flags replace the list; none given leaves it alone.
fn update_input(args: DefectUpdateArgs) -> defect::UpdateDefect {
    let photos = |v: Vec<String>| if v.is_empty() { None } else { Some(v) };
    defect::UpdateDefect {
        id: args.id,
        title: args.title,
        description: args.description,
        severity: args.severity,
        due_date: args.due,
        root_cause: args.root_cause,
        corrective_action: args.corrective_action,
        preventive_action: args.preventive_action,
        implementation_method: args.implementation_method,
        resolution_notes: args.resolution_notes,
        before_photos: photos(args.before_photos),
        after_photos: photos(args.after_photos),
        status: args.status,
    }
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
