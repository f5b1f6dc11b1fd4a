use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use confide_gateway::limits::MAX_RETENTION_DAYS;
use confide_gateway::{Config, Daemon, Stores};

/// Confide - a voice listening companion for Telegram
#[derive(Parser)]
#[command(name = "confide", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot (default)
    Serve,
    /// List blocked users
    Blocked,
    /// Remove a user's block
    Unblock {
        /// Telegram user id
        user_id: i64,
    },
    /// Remove every block
    ClearBlocks,
    /// Remove blocks older than a number of days
    CleanupBlocks {
        /// Age in days; defaults to the configured retention
        #[arg(
            short,
            long,
            value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_RETENTION_DAYS))
        )]
        days: Option<u32>,
    },
    /// Show the session limits, or set both
    Limits {
        /// Voice messages per session
        #[arg(long, requires = "minutes")]
        messages: Option<u32>,
        /// Session length in minutes
        #[arg(long, requires = "messages")]
        minutes: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,confide_gateway=info",
        1 => "info,confide_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(data_dir = %config.data_dir.display(), "starting confide gateway");
            Daemon::new(config).run().await?;
        }
        Command::Blocked => cmd_blocked(&config)?,
        Command::Unblock { user_id } => {
            let stores = Stores::open(&config)?;
            if stores.limits.unblock(user_id)? {
                println!("User {user_id} unblocked");
            } else {
                println!("User {user_id} is not blocked");
            }
        }
        Command::ClearBlocks => {
            let stores = Stores::open(&config)?;
            let removed = stores.limits.clear_all()?;
            println!("Cleared {removed} block(s)");
        }
        Command::CleanupBlocks { days } => {
            let stores = Stores::open(&config)?;
            let days = days.unwrap_or(config.block_retention_days);
            let removed = stores.limits.cleanup_old(days)?;
            println!("Removed {removed} block(s) older than {days} day(s)");
        }
        Command::Limits { messages, minutes } => cmd_limits(&config, messages.zip(minutes))?,
    }

    Ok(())
}

/// Print the block list
fn cmd_blocked(config: &Config) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    let records = stores.limits.list_blocked();
    if records.is_empty() {
        println!("No users are blocked");
        return Ok(());
    }

    println!("{:<14} {:<20} {:<25} REASON", "USER ID", "NAME", "BLOCKED AT");
    for r in records {
        let name = r
            .username
            .as_deref()
            .map(|u| format!("@{u}"))
            .or(r.first_name)
            .unwrap_or_default();
        println!(
            "{:<14} {:<20} {:<25} {}",
            r.user_id,
            name,
            r.blocked_at.format("%Y-%m-%d %H:%M:%S UTC"),
            r.reason
        );
    }
    Ok(())
}

/// Show or update the session limits
fn cmd_limits(config: &Config, update: Option<(u32, u32)>) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    if let Some((messages, minutes)) = update {
        stores.settings.set_limits(messages, minutes)?;
    }

    let (messages, minutes) = stores.settings.limits();
    println!("Messages per session: {messages}");
    println!("Session duration: {minutes} min");
    Ok(())
}
