//! Control room CLI
//!
//! Chat with the agent runtime and manage its sessions, cron jobs,
//! heartbeat, skills and config from the terminal.

mod cmd_chat;
mod cmd_events;
mod cmd_manage;
mod logging;
mod paths;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use controlroom_client::{ClientConfig, ConfigOverrides};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "controlroom", version, about = "Agent runtime control room")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command; each may also come from the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Control-room server base URL (env: CONTROLROOM_URL)
    #[arg(long, global = true, env = "CONTROLROOM_URL")]
    pub url: Option<String>,

    /// Bearer token for REST and the stream socket (env: CONTROLROOM_TOKEN)
    #[arg(long, global = true, env = "CONTROLROOM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Data directory (env: CONTROLROOM_DATA_DIR, default: ~/.controlroom)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Channel attached to outgoing chat (env: CONTROLROOM_CHANNEL)
    #[arg(long, global = true, env = "CONTROLROOM_CHANNEL")]
    pub channel: Option<String>,

    /// Chat id attached to outgoing chat (env: CONTROLROOM_CHAT_ID)
    #[arg(long, global = true, env = "CONTROLROOM_CHAT_ID")]
    pub chat_id: Option<String>,
}

impl GlobalOpts {
    fn overrides(&self, session_key: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.url.clone(),
            token: self.token.clone(),
            channel: self.channel.clone(),
            chat_id: self.chat_id.clone(),
            session_key,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive streaming chat with the selected session
    Chat {
        /// Session to open (default: from config)
        #[arg(long)]
        session: Option<String>,
    },

    /// Tail the raw event stream as JSON lines
    Events {
        /// Subscribe to this session first
        #[arg(long)]
        session: Option<String>,
    },

    /// Conversation threads
    #[command(subcommand)]
    Sessions(SessionsCommand),

    /// Scheduled jobs
    #[command(subcommand)]
    Cron(CronCommand),

    /// Heartbeat file
    #[command(subcommand)]
    Heartbeat(HeartbeatCommand),

    /// Skill toggles
    #[command(subcommand)]
    Skills(SkillsCommand),

    /// Runtime config document
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Show gateway status
    Status,

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List sessions
    List,
    /// Show a session's messages
    Show { key: String },
    /// Delete a session
    Delete { key: String },
}

#[derive(Subcommand, Debug)]
pub enum CronCommand {
    /// List jobs
    List,
    /// Create a job
    Add(CronAddArgs),
    /// Enable a job
    Enable { id: String },
    /// Disable a job
    Disable { id: String },
    /// Run a job now
    Run { id: String },
    /// Delete a job
    Remove { id: String },
}

#[derive(Args, Debug)]
pub struct CronAddArgs {
    /// Job name
    pub name: String,

    /// Message sent to the agent when the job fires
    pub message: String,

    /// Run every N seconds
    #[arg(long, group = "schedule", value_name = "SECS")]
    pub every: Option<u64>,

    /// Cron expression
    #[arg(long, group = "schedule", value_name = "EXPR")]
    pub cron: Option<String>,

    /// Run once at this ISO timestamp
    #[arg(long, group = "schedule", value_name = "ISO")]
    pub at: Option<String>,

    /// Deliver the response to a channel
    #[arg(long)]
    pub deliver: bool,

    #[arg(long)]
    pub channel: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    /// Delete the job after it runs once
    #[arg(long)]
    pub delete_after_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum HeartbeatCommand {
    /// Show heartbeat settings and content
    Show,
    /// Replace the heartbeat file with the contents of FILE
    Save { file: PathBuf },
    /// Trigger a heartbeat now
    Trigger,
}

#[derive(Subcommand, Debug)]
pub enum SkillsCommand {
    /// List skills
    List,
    /// Update one skill's toggles
    Set {
        name: String,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        always: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config document
    Show,
    /// Replace the config document with a JSON object
    Set { json: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "controlroom", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = paths::init_data_dir(cli.opts.data_dir.as_deref())?;
    paths::ensure_dirs()
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let _logging = logging::init_logging(&paths::log_dir())?;

    let session = match &cli.command {
        Command::Chat { session } | Command::Events { session } => session.clone(),
        _ => None,
    };
    let config = ClientConfig::load(&paths::config_path())?.with_overrides(cli.opts.overrides(session));

    tracing::info!(
        component = "cli",
        event = "cli.start",
        version = VERSION,
        data_dir = %data_dir.display(),
        base_url = %config.base_url,
        "controlroom starting"
    );

    match cli.command {
        Command::Chat { .. } => cmd_chat::run(&config).await,
        Command::Events { session } => cmd_events::run(&config, session).await,
        Command::Sessions(cmd) => cmd_manage::sessions(&config, cmd).await,
        Command::Cron(cmd) => cmd_manage::cron(&config, cmd).await,
        Command::Heartbeat(cmd) => cmd_manage::heartbeat(&config, cmd).await,
        Command::Skills(cmd) => cmd_manage::skills(&config, cmd).await,
        Command::Config(cmd) => cmd_manage::config(&config, cmd).await,
        Command::Status => cmd_manage::status(&config, &data_dir).await,
        Command::Completions { .. } => Ok(()),
    }
}
