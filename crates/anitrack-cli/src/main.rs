use anime_sync_config::PathManager;
use clap::{ArgAction, Parser, Subcommand};
use commands::{clear, config, daemon, status, sync};

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "anitrack")]
#[command(about = "AniTrack - keep your watched-episode history in sync everywhere")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the local watch history with the cloud (one-time)
    #[command(
        long_about = "Pull the cloud copy of your watch history, reconcile it with local state, and push the result back. A failed pull leaves local state untouched and reports a 'not synced' status instead of blocking."
    )]
    Sync,

    /// Run as daemon, syncing on an interval
    #[command(
        long_about = "Run AniTrack as a background daemon that periodically reconciles local and cloud state. The daemon performs an initial sync on startup unless --no-startup-sync is specified."
    )]
    Daemon {
        /// Minutes between scheduled syncs (overrides the configured value)
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,

        /// Skip initial sync on startup
        #[arg(long, action = ArgAction::SetTrue)]
        no_startup_sync: bool,

        /// Run in foreground (don't daemonize)
        #[arg(long, action = ArgAction::SetTrue)]
        foreground: bool,
    },

    /// Show tracked series and sync status
    Status {
        /// Also list in-flight playback positions
        #[arg(long, action = ArgAction::SetTrue)]
        progress: bool,
    },

    /// Configure the cloud connection and account
    #[command(
        long_about = "Manage the cloud document store settings and account credentials. Running without a subcommand shows the current configuration."
    )]
    Config {
        #[command(subcommand)]
        cmd: Option<ConfigCommands>,
    },

    /// Clear local data or stored credentials
    Clear {
        /// Clear everything
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "credentials")]
        all: bool,

        /// Clear the on-device watch history store
        #[arg(long, action = ArgAction::SetTrue)]
        data: bool,

        /// Clear stored credentials
        #[arg(long, action = ArgAction::SetTrue)]
        credentials: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration (masks sensitive data)
    Show,

    /// Configure the cloud document store
    #[command(
        long_about = "Set the cloud database URL, API key, and collection used for the per-user document. The database URL looks like https://<project>-default-rtdb.firebaseio.com."
    )]
    Remote {
        /// Database base URL
        #[arg(long)]
        database_url: Option<String>,

        /// Web API key of the project
        #[arg(long)]
        api_key: Option<String>,

        /// Collection the per-user documents live under
        #[arg(long)]
        collection: Option<String>,

        /// Disable cloud sync without discarding the settings
        #[arg(long, action = ArgAction::SetTrue)]
        disable: bool,
    },

    /// Store the account refresh token used for cloud authentication
    Account {
        /// Long-lived refresh token for the signed-in user
        #[arg(long)]
        refresh_token: String,

        /// Account email, shown in status output
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // A backgrounded daemon loses its terminal; its logs go to a rolling file.
    let log_file = match &cli.command {
        Commands::Daemon { foreground, .. } if !foreground => {
            Some(PathManager::default().daemon_log_file())
        }
        _ => None,
    };
    logging::init_logging_with_file(cli.verbose, cli.quiet, log_file)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::Sync => sync::run_sync(&output).await,
        Commands::Daemon {
            interval,
            no_startup_sync,
            foreground,
        } => daemon::run_daemon(interval, no_startup_sync, foreground, &output).await,
        Commands::Status { progress } => status::run_status(progress, &output).await,
        Commands::Config { cmd } => config::run_config(cmd, &output).await,
        Commands::Clear {
            all,
            data,
            credentials,
        } => clear::run_clear(all, data, credentials, &output).await,
    }
}
