//! `taskboard` subcommands.
//!
//! Every one-shot command builds a [`Session`] and an [`ApiClient`] from the
//! resolved [`ClientConfig`], makes its REST calls and prints plain text.
//! `watch` mounts a [`TaskView`] instead and prints every change until
//! Ctrl-C. While watching, lines typed on stdin are turned into
//! [`ViewCommand`]s (see [`parse_watch_line`]).

use std::fmt::Write as _;

use chrono::NaiveDate;
use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{Task, TaskId, TaskStatus};
use taskboard_proto::user::{User, UserDetails};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::{ApiClient, ApiError, TaskApi};
use crate::channel::EventChannel;
use crate::config::{ClientConfig, ConfigError};
use crate::notify::{self, Notification};
use crate::session::{FileSessionStore, Session, SessionError};
use crate::view::{TaskView, ViewCommand, ViewError, ViewEvent, ViewOptions};

/// Errors that end a CLI invocation.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session store could not be used.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The REST client could not be built.
    #[error("{0}")]
    Client(ApiError),

    /// A REST call failed; shown as the server's message or `context`.
    #[error("{}", .source.user_message(.context))]
    Api {
        /// Fallback message for this call.
        context: &'static str,
        /// What went wrong.
        source: ApiError,
    },

    /// The mounted view went away.
    #[error(transparent)]
    View(#[from] ViewError),

    /// The command cannot be carried out as given.
    #[error("{0}")]
    Invalid(String),
}

impl CliError {
    fn api(context: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| Self::Api { context, source }
    }
}

/// A `taskboard` subcommand.
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in and remember the session.
    SignIn {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Register a new account and sign in.
    SignUp {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
        password: String,
        /// Repeat of the password.
        #[arg(long)]
        password_confirmation: String,
    },
    /// Sign out and forget the session.
    SignOut,
    /// Show the signed-in user.
    Whoami,
    /// List users.
    Users {
        /// Only users whose email matches.
        #[arg(short, long = "q", default_value = "")]
        query: String,
    },
    /// Show a user and their tasks.
    User {
        /// User id.
        id: u64,
    },
    /// List tasks once.
    Tasks(FilterArgs),
    /// Show one task.
    Task {
        /// Task id.
        id: TaskId,
    },
    /// Create a task.
    Create(CreateArgs),
    /// Edit a task.
    Update {
        /// Task id.
        id: TaskId,
        #[command(flatten)]
        fields: UpdateArgs,
    },
    /// Move a task to its next status.
    Move {
        /// Task id.
        id: TaskId,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: TaskId,
    },
    /// Follow the task list live until Ctrl-C.
    Watch(FilterArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Watch(FilterArgs::default())
    }
}

/// Task list filters.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Free-text search.
    #[arg(short, long = "q")]
    pub query: Option<String>,
    /// Only tasks with this status.
    #[arg(long)]
    pub status: Option<TaskStatus>,
    /// Due on or after (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Due on or before (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

impl From<FilterArgs> for TaskFilters {
    fn from(args: FilterArgs) -> Self {
        Self {
            query: args.query.unwrap_or_default(),
            status: args.status,
            start_date: args.from,
            end_date: args.to,
        }
    }
}

/// Fields of a new task.
#[derive(clap::Args, Debug, Clone)]
pub struct CreateArgs {
    /// Title.
    #[arg(long)]
    pub title: String,
    /// Description.
    #[arg(long)]
    pub description: Option<String>,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    pub due: Option<NaiveDate>,
    /// Id of the user to assign.
    #[arg(long)]
    pub assign_to: Option<u64>,
}

impl From<CreateArgs> for NewTask {
    fn from(args: CreateArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            due_date: args.due,
            assigned_to_id: args.assign_to,
        }
    }
}

/// Fields to change on an existing task.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    /// New title.
    #[arg(long)]
    pub title: Option<String>,
    /// New description.
    #[arg(long)]
    pub description: Option<String>,
    /// New status.
    #[arg(long)]
    pub status: Option<TaskStatus>,
    /// New due date (YYYY-MM-DD).
    #[arg(long)]
    pub due: Option<NaiveDate>,
    /// Id of the user to assign.
    #[arg(long)]
    pub assign_to: Option<u64>,
}

impl From<UpdateArgs> for TaskUpdate {
    fn from(args: UpdateArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            status: args.status,
            due_date: args.due,
            assigned_to_id: args.assign_to,
        }
    }
}

/// Runs one subcommand to completion.
///
/// A credential the server rejects is forgotten locally so the next
/// command starts signed out.
///
/// # Errors
///
/// Returns [`CliError`] if the command fails; the caller prints it.
pub async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let session = open_session(config)?;
    let client = ApiClient::new(&config.api_url, session.clone(), config.request_timeout)
        .map_err(CliError::Client)?;

    let result = dispatch(command, config, &session, client).await;
    if let Err(CliError::Api {
        source: ApiError::Unauthorized { .. },
        ..
    }) = &result
    {
        tracing::warn!("credential rejected, clearing session");
        session.invalidate()?;
    }
    result
}

fn open_session(config: &ClientConfig) -> Result<Session, CliError> {
    let path = match &config.session_file {
        Some(path) => path.clone(),
        None => FileSessionStore::default_path()?,
    };
    Ok(Session::restore(FileSessionStore::new(path))?)
}

async fn dispatch(
    command: Command,
    config: &ClientConfig,
    session: &Session,
    client: ApiClient,
) -> Result<(), CliError> {
    match command {
        Command::SignIn { email, password } => {
            let user = client
                .sign_in(&email, &password)
                .await
                .map_err(CliError::api("Failed to sign in"))?;
            println!("Signed in as {}", format_user(&user));
        }
        Command::SignUp {
            email,
            password,
            password_confirmation,
        } => {
            let user = client
                .sign_up(&email, &password, &password_confirmation)
                .await
                .map_err(CliError::api("Failed to sign up"))?;
            println!("Signed up as {}", format_user(&user));
        }
        Command::SignOut => {
            client.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => match session.principal() {
            Some(user) => println!("{}", format_user(&user)),
            None => println!("Not signed in"),
        },
        Command::Users { query } => {
            let users = client
                .list_users(&query)
                .await
                .map_err(CliError::api("Failed to fetch users"))?;
            for user in &users {
                println!("{}", format_user(user));
            }
        }
        Command::User { id } => {
            let details = client
                .fetch_user(id)
                .await
                .map_err(CliError::api("Failed to fetch user"))?;
            print!("{}", format_user_details(&details));
        }
        Command::Tasks(filters) => {
            let tasks = client
                .list_tasks(&filters.into())
                .await
                .map_err(CliError::api(notify::FETCH_FAILED))?;
            print!("{}", format_task_list(&tasks));
        }
        Command::Task { id } => {
            let task = client
                .fetch_task(id)
                .await
                .map_err(CliError::api("Failed to fetch task"))?;
            print!("{}", format_task_details(&task));
        }
        Command::Create(args) => {
            let task = client
                .create_task(&args.into())
                .await
                .map_err(CliError::api(notify::TASK_OPERATION_FAILED))?;
            println!("{}", Notification::task_created(&task));
            println!("{}", format_task(&task));
        }
        Command::Update { id, fields } => {
            let update = TaskUpdate::from(fields);
            if update == TaskUpdate::default() {
                return Err(CliError::Invalid("nothing to update".to_string()));
            }
            let task = client
                .update_task(id, &update)
                .await
                .map_err(CliError::api(notify::TASK_OPERATION_FAILED))?;
            println!("{}", Notification::task_updated(&task));
        }
        Command::Move { id } => move_status(&client, id).await?,
        Command::Delete { id } => {
            client
                .delete_task(id)
                .await
                .map_err(CliError::api(notify::DELETE_FAILED))?;
            println!("{}", Notification::task_deleted());
        }
        Command::Watch(filters) => watch(config, session, client, filters.into()).await?,
    }
    Ok(())
}

async fn move_status(client: &ApiClient, id: TaskId) -> Result<(), CliError> {
    let task = client
        .fetch_task(id)
        .await
        .map_err(CliError::api("Failed to fetch task"))?;
    let next = task
        .status
        .next()
        .ok_or_else(|| CliError::Invalid(format!("Task {id} is already {}", task.status)))?;
    client
        .update_status(id, next)
        .await
        .map_err(CliError::api(notify::STATUS_UPDATE_FAILED))?;
    println!("{}", Notification::status_moved(next));
    Ok(())
}

async fn watch(
    config: &ClientConfig,
    session: &Session,
    client: ApiClient,
    filters: TaskFilters,
) -> Result<(), CliError> {
    let channel = EventChannel::new(
        config.cable_endpoint()?,
        session.clone(),
        config.cable_options(),
    );
    let options = ViewOptions {
        event_capacity: config.channel_capacity,
    };
    let (mut handle, mut events) = TaskView::mount(client, channel, filters, options);
    if !handle.is_live() {
        eprintln!("Live updates unavailable, showing fetched tasks only");
    }

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Some(event) => print!("{}", format_view_event(&event)),
                None => break,
            },
            line = input.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_watch_line(&line) {
                    Ok(Some(WatchInput::View(command))) => handle.send(command)?,
                    Ok(Some(WatchInput::Help)) => print!("{WATCH_HELP}"),
                    Ok(Some(WatchInput::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    handle.unmount();
    Ok(())
}

const WATCH_HELP: &str = "\
commands:
  refresh                  fetch again
  search <text>            filter by text (empty clears)
  status <status>|all      filter by status
  range <from>|- <to>|-    filter by due date (YYYY-MM-DD)
  create <title>           create a task
  rename <id> <title>      change a task's title
  move <id>                move a task to its next status
  delete <id>              delete a task
  quit                     stop watching
";

/// A line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchInput {
    /// Forward to the view.
    View(ViewCommand),
    /// Print the command list.
    Help,
    /// Stop watching.
    Quit,
}

/// Parses one line typed while watching. Blank lines yield `None`.
///
/// # Errors
///
/// Returns a message naming the problem for unknown commands or bad
/// arguments.
pub fn parse_watch_line(line: &str) -> Result<Option<WatchInput>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    let input = match word {
        "help" | "?" => WatchInput::Help,
        "quit" | "exit" => WatchInput::Quit,
        "refresh" => WatchInput::View(ViewCommand::Refresh),
        "search" => WatchInput::View(ViewCommand::SetQuery(rest.to_string())),
        "status" => {
            let status = match rest {
                "all" | "" => None,
                other => Some(other.parse::<TaskStatus>().map_err(|e| e.to_string())?),
            };
            WatchInput::View(ViewCommand::SetStatusFilter(status))
        }
        "range" => {
            let mut bounds = rest.split_whitespace();
            let from = parse_bound(bounds.next())?;
            let to = parse_bound(bounds.next())?;
            WatchInput::View(ViewCommand::SetDateRange(from, to))
        }
        "create" if !rest.is_empty() => WatchInput::View(ViewCommand::Create(NewTask {
            title: rest.to_string(),
            ..NewTask::default()
        })),
        "rename" => {
            let (id, title) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: rename <id> <title>".to_string())?;
            let update = TaskUpdate {
                title: Some(title.trim().to_string()),
                ..TaskUpdate::default()
            };
            WatchInput::View(ViewCommand::Update(parse_id(id)?, update))
        }
        "move" => WatchInput::View(ViewCommand::MoveStatus(parse_id(rest)?)),
        "delete" => WatchInput::View(ViewCommand::Delete(parse_id(rest)?)),
        "create" => return Err("usage: create <title>".to_string()),
        other => return Err(format!("unknown command {other:?}, try \"help\"")),
    };
    Ok(Some(input))
}

fn parse_id(text: &str) -> Result<TaskId, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("invalid task id {text:?}"))
}

fn parse_bound(text: Option<&str>) -> Result<Option<NaiveDate>, String> {
    match text {
        None | Some("-") => Ok(None),
        Some(date) => date
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid date {date:?}, expected YYYY-MM-DD")),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One-line summary of a user.
#[must_use]
pub fn format_user(user: &User) -> String {
    format!("#{} {} ({})", user.id, user.email, user.role)
}

/// One-line summary of a task.
#[must_use]
pub fn format_task(task: &Task) -> String {
    let mut line = format!("#{} [{}] {}", task.id, task.status, task.title);
    if let Some(due) = task.due_date {
        let _ = write!(line, " (due {due})");
    }
    if let Some(assignee) = &task.assigned_to {
        let _ = write!(line, " -> {}", assignee.email);
    }
    line
}

fn format_task_list(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No tasks\n".to_string();
    }
    tasks.iter().fold(String::new(), |mut out, task| {
        let _ = writeln!(out, "{}", format_task(task));
        out
    })
}

fn format_task_details(task: &Task) -> String {
    let mut out = format!("{}\n", format_task(task));
    if let Some(description) = &task.description {
        let _ = writeln!(out, "  {description}");
    }
    if let Some(assigner) = &task.assigned_by {
        let _ = writeln!(out, "  assigned by {}", assigner.email);
    }
    out
}

fn format_user_details(details: &UserDetails) -> String {
    let mut out = format!("#{} {} ({})\n", details.id, details.email, details.role);
    for task in &details.tasks {
        let _ = writeln!(out, "  {}", format_task(task));
    }
    out
}

/// Text printed for one view event.
#[must_use]
pub fn format_view_event(event: &ViewEvent) -> String {
    match event {
        ViewEvent::TasksChanged(tasks) => format!("--\n{}", format_task_list(tasks)),
        ViewEvent::Loading(true) => "Loading tasks...\n".to_string(),
        ViewEvent::Loading(false) => String::new(),
        ViewEvent::Notification(notification) => format!("{notification}\n"),
    }
}
