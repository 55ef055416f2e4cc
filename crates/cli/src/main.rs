//! `comfyqueue` -- command-line front end for the ComfyQueue backend.
//!
//! Logs in, shows the job queue and node pool, follows realtime
//! updates, and drives the admin actions (nodes and users). The session
//! is persisted between invocations, so `login` once and run the other
//! commands afterwards.
//!
//! # Environment variables
//!
//! | Variable                  | Default                                | Description                  |
//! |---------------------------|----------------------------------------|------------------------------|
//! | `COMFYQUEUE_URL`          | `http://localhost:5000`                | Backend base URL             |
//! | `COMFYQUEUE_SESSION_FILE` | `<config dir>/comfyqueue/session.json` | Persisted session            |
//! | `COMFYQUEUE_PASSWORD`     | --                                     | Password for `login`         |
//! | `REQUEST_TIMEOUT_SECS`    | `30`                                   | Per-request HTTP timeout     |
//! | `RECONNECT_INITIAL_MS`    | `1000`                                 | First realtime retry delay   |
//! | `RECONNECT_MAX_SECS`      | `30`                                   | Realtime retry delay ceiling |

mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use comfyqueue_client::config::ClientConfig;
use comfyqueue_client::console::{Console, ConsoleError};
use comfyqueue_client::events::{ChannelEvent, ChannelState};
use comfyqueue_core::access::Route;
use comfyqueue_core::models::node::UpdateNode;
use comfyqueue_core::models::user::{CreateUser, UpdateUser};
use comfyqueue_core::roles::Role;
use comfyqueue_core::theme::Theme;
use comfyqueue_core::types::DbId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "comfyqueue")]
#[command(version)]
#[command(about = "Monitor and manage a ComfyQueue job queue")]
#[command(propagate_version = true)]
struct Cli {
    /// Backend base URL (overrides COMFYQUEUE_URL).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Session file (overrides COMFYQUEUE_SESSION_FILE).
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and persist the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "COMFYQUEUE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Clear the persisted session
    Logout,
    /// Show the identity behind the current session
    Whoami,
    /// Show nodes and the job queue
    Dashboard,
    /// List jobs
    Jobs,
    /// List nodes
    Nodes,
    /// Manage nodes (admin)
    #[command(subcommand)]
    Node(NodeCommands),
    /// Upload a workflow JSON file as a new job
    Upload { path: PathBuf },
    /// Manage users (admin)
    #[command(subcommand)]
    Users(UserCommands),
    /// Show or change the theme preference
    Theme { value: Option<ThemeArg> },
    /// Follow the dashboard live until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
enum NodeCommands {
    /// Enable or disable a node by name
    Toggle {
        name: String,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Register a node
    Add { name: String, url: String },
    /// Change a node's name, URL or enabled flag
    Update {
        id: DbId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Remove a node
    Delete { id: DbId },
}

#[derive(Subcommand, Debug)]
enum UserCommands {
    /// List users
    List,
    /// Create a user
    Create {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, value_enum, default_value = "editor")]
        role: RoleArg,
    },
    /// Update a user's name, role or password
    Update {
        id: DbId,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Delete a user
    Delete { id: DbId },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Admin,
    Editor,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Admin => Role::Admin,
            RoleArg::Editor => Role::Editor,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ThemeArg {
    Light,
    Dark,
    Toggle,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyqueue_cli=info,comfyqueue_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<ConsoleError>() {
            Some(err) => {
                eprintln!("Error: {}", err.user_message());
                if err.redirect() == Some(Route::Login) {
                    eprintln!("Hint: run `comfyqueue login -u <username>` first.");
                }
            }
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = &cli.url {
        config = config.with_base_url(url).context("Invalid --url")?;
    }
    if let Some(path) = &cli.session_file {
        config.session_file = path.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(
        url = %config.base_url,
        session_file = %config.session_file.display(),
        "Configuration loaded"
    );
    let console = Console::from_config(config)?;

    match cli.command {
        Commands::Login { username, password } => {
            let landing = console.login(&username, &password).await?;
            let role = console.session().current_role().map(|r| r.to_string());
            println!(
                "Logged in as {username} ({}). Landing page: {landing}",
                role.unwrap_or_default()
            );
        }
        Commands::Logout => {
            console.logout().await?;
            println!("Logged out.");
        }
        Commands::Whoami => {
            let me = console.whoami().await?;
            println!("{} ({})", me.username, me.role);
        }
        Commands::Dashboard => {
            let view = console.load_dashboard().await?;
            render::print_dashboard(&view);
        }
        Commands::Jobs => {
            let view = console.load_dashboard().await?;
            render::print_jobs(&view.jobs);
        }
        Commands::Nodes => {
            let view = console.load_dashboard().await?;
            render::print_nodes(&view.nodes);
        }
        Commands::Node(command) => run_node(&console, command).await?,
        Commands::Upload { path } => {
            console.load_dashboard().await?;
            console.upload(&path).await?;
            println!("Uploaded {}.", path.display());
            render::print_jobs(&console.view().jobs);
        }
        Commands::Users(command) => run_users(&console, command).await?,
        Commands::Theme { value } => {
            let theme = match value {
                None => console.theme(),
                Some(ThemeArg::Toggle) => console.toggle_theme()?,
                Some(ThemeArg::Light) => {
                    console.set_theme(Theme::Light)?;
                    Theme::Light
                }
                Some(ThemeArg::Dark) => {
                    console.set_theme(Theme::Dark)?;
                    Theme::Dark
                }
            };
            println!("Theme: {theme}");
        }
        Commands::Watch => watch(&console).await?,
    }

    Ok(())
}

async fn run_node(console: &Console, command: NodeCommands) -> anyhow::Result<()> {
    // Mutations refresh the node list, which needs a loaded view.
    console.load_dashboard().await?;

    match command {
        NodeCommands::Toggle { name, enabled } => {
            console.toggle_node(&name, enabled).await?;
        }
        NodeCommands::Add { name, url } => {
            let id = console.add_node(&name, &url).await?;
            println!("Added node #{id}.");
        }
        NodeCommands::Update {
            id,
            name,
            url,
            enabled,
        } => {
            let input = UpdateNode { name, url, enabled };
            console.update_node(id, &input).await?;
        }
        NodeCommands::Delete { id } => {
            console.delete_node(id).await?;
            println!("Deleted node #{id}.");
        }
    }

    render::print_nodes(&console.view().nodes);
    console.unmount().await;
    Ok(())
}

async fn run_users(console: &Console, command: UserCommands) -> anyhow::Result<()> {
    match command {
        UserCommands::List => {}
        UserCommands::Create {
            username,
            password,
            role,
        } => {
            let input = CreateUser {
                username,
                password,
                role: role.into(),
            };
            console.create_user(&input).await?;
            println!("Created user {}.", input.username);
        }
        UserCommands::Update {
            id,
            username,
            role,
            password,
        } => {
            let input = UpdateUser {
                username,
                role: role.map(Into::into),
            };
            console.update_user(id, &input, password.as_deref()).await?;
            println!("Updated user #{id}.");
        }
        UserCommands::Delete { id } => {
            console.delete_user(id).await?;
            println!("Deleted user #{id}.");
        }
    }

    let users = console.list_users().await?;
    render::print_users(&users);
    Ok(())
}

/// What the live view does once an event has been handled.
#[derive(Debug, PartialEq, Eq)]
enum WatchStep {
    Redraw,
    Notice(String),
    Stop,
}

/// Only auth failures end the live view; anything else is reported and
/// the view keeps following the channel.
fn watch_step(
    event: &ChannelEvent,
    handled: Result<(), ConsoleError>,
) -> Result<WatchStep, ConsoleError> {
    if let Err(err) = handled {
        // Auth errors have already torn the session down.
        if err.redirect().is_some() {
            return Err(err);
        }
        return Ok(WatchStep::Notice(err.user_message()));
    }
    Ok(match event {
        // Terminal: the channel does not retry from here.
        ChannelEvent::StateChanged(ChannelState::Disconnected) => WatchStep::Stop,
        ChannelEvent::StateChanged(state) => WatchStep::Notice(format!("realtime: {state:?}")),
        _ => WatchStep::Redraw,
    })
}

/// Mount the dashboard and reprint it whenever the job list changes.
async fn watch(console: &Console) -> anyhow::Result<()> {
    let mut events = console.mount_dashboard().await?;
    render::print_dashboard(&console.view());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing realtime channel");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let handled = console.handle_event(&event).await;
                match watch_step(&event, handled)? {
                    WatchStep::Redraw => {
                        println!();
                        render::print_dashboard(&console.view());
                    }
                    WatchStep::Notice(text) => eprintln!("-- {text}"),
                    WatchStep::Stop => {
                        eprintln!("-- realtime: disconnected");
                        break;
                    }
                }
            }
        }
    }

    console.unmount().await;
    Ok(())
}
