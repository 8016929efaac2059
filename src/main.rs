//! vigil - declarative process supervisor and launcher.
//!
//! This is the main entry point for the vigil CLI. It provides commands for:
//!
//! - Starting and stopping supervised processes (`vigil start`, `vigil stop`)
//! - Inspecting them (`vigil ps`, `vigil logs`, `vigil stats`, `vigil inspect`)
//! - Running the supervisor daemon (`vigil daemon run`)
//! - Launching a server in the foreground with exec semantics (`vigil launch`)
//!
//! See `vigil --help` for full usage information.

#![allow(clippy::redundant_pub_crate)] // Explicit pub(crate) documents intent, aids refactoring

// Use mimalloc for better multi-core performance (especially important for musl builds)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Generator, Shell};
use std::path::PathBuf;

mod commands;

const AFTER_HELP: &str = "\
COMMON WORKFLOWS:
  # Supervise the apps declared in vigil.toml
  vigil start
  vigil ps
  vigil logs api -f

  # Production profile
  vigil start --profile production

  # Run the server in the foreground (first-run bootstrap + exec)
  vigil launch --name api

EXAMPLES:
  vigil start vigil.toml            Start all apps from a descriptor
  vigil stop api                    Stop one app gracefully
  vigil restart api                 Restart (also revives errored apps)
  vigil ps --json                   Machine-readable process list";

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "vigil - keep your server processes alive")]
#[command(
    long_about = "Declarative process supervisor and launcher.\n\nDeclare processes in vigil.toml; vigil starts them, captures their logs, restarts them on crash within a bounded budget, and stops them gracefully."
)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose/debug output for any command
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    // =========================================================================
    // Process Management
    // =========================================================================
    /// Start supervising apps from a descriptor
    ///
    /// Auto-starts the daemon if it isn't running. Without --name, every
    /// app in the descriptor is started.
    ///
    /// Examples:
    ///   vigil start                          # vigil.toml in current dir
    ///   vigil start deploy/vigil.toml        # Explicit descriptor
    ///   vigil start --name api               # One app only
    ///   vigil start --profile production     # With env profile
    Start {
        /// Path to the descriptor (default: vigil.toml)
        #[arg(default_value = "vigil.toml")]
        spec: PathBuf,
        /// App name to start (default: all apps in the descriptor)
        #[arg(short, long)]
        name: Option<String>,
        /// Environment profile to overlay (e.g. production, development)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Stop a supervised process
    ///
    /// Sends SIGTERM, waits the configured kill timeout, then SIGKILL.
    ///
    /// Examples:
    ///   vigil stop api
    Stop {
        /// Process name to stop
        name: String,
    },
    /// Restart a supervised process
    ///
    /// Manual restarts don't count toward the restart limit. Errored
    /// processes come back with a fresh budget.
    ///
    /// Examples:
    ///   vigil restart api
    Restart {
        /// Process name to restart
        name: String,
    },
    /// List supervised processes
    ///
    /// Shows status, PID, restart count, and uptime for each process.
    ///
    /// Examples:
    ///   vigil ps                   # Table output
    ///   vigil ps --json            # JSON for scripting
    Ps {
        /// Output as JSON for scripting and automation
        #[arg(long)]
        json: bool,
    },
    /// Show real-time process statistics
    ///
    /// Displays live CPU and memory usage. Updates every second.
    /// Press Ctrl+C to exit.
    Stats,
    /// View process logs
    ///
    /// Shows log output from a running or stopped process.
    ///
    /// Examples:
    ///   vigil logs api             # Last 50 stdout lines
    ///   vigil logs api -f          # Follow (tail -f)
    ///   vigil logs api --err       # Stderr target
    Logs {
        /// Process name
        name: String,
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show (default: 50)
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
        /// Read the stderr log target instead of stdout
        #[arg(long)]
        err: bool,
    },
    /// Show detailed process information
    ///
    /// Displays status, restart bookkeeping, log targets, and resource use.
    ///
    /// Examples:
    ///   vigil inspect api
    Inspect {
        /// Process name to inspect
        name: String,
    },
    /// Remove records of stopped processes
    ///
    /// Cleans up state for processes that are no longer running.
    Prune,

    // =========================================================================
    // Daemon & Launcher
    // =========================================================================
    /// Manage the supervisor daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Launch an app in the foreground, replacing this process
    ///
    /// Runs first-run bootstrap (env file from template, database init),
    /// applies the environment, and execs the app. The PID doesn't change,
    /// so an external supervisor tracking vigil tracks the real server.
    ///
    /// Examples:
    ///   vigil launch                         # Sole app in vigil.toml
    ///   vigil launch --name api --profile production
    Launch {
        /// Path to the descriptor (default: vigil.toml)
        #[arg(default_value = "vigil.toml")]
        spec: PathBuf,
        /// App to launch (required when the descriptor has several)
        #[arg(short, long)]
        name: Option<String>,
        /// Environment profile to overlay
        #[arg(short, long)]
        profile: Option<String>,
        /// Skip first-run bootstrap steps
        #[arg(long)]
        skip_bootstrap: bool,
    },
    /// Generate shell completions
    ///
    /// Outputs shell completion script to stdout.
    ///
    /// Examples:
    ///   vigil completions bash > ~/.bash_completion.d/vigil
    ///   vigil completions zsh > ~/.zfunc/_vigil
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run the daemon in the foreground
    ///
    /// `vigil start` spawns this automatically; run it directly under
    /// systemd or in a terminal for debugging.
    Run {
        /// Port for the daemon API (overrides ~/.vigil/daemon.toml)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Stop the daemon and all supervised processes
    Stop,
    /// Show daemon status
    Status,
}

fn print_completions<G: Generator>(generator: G, cmd: &mut clap::Command) {
    clap_complete::generate(
        generator,
        cmd,
        cmd.get_name().to_string(),
        &mut std::io::stdout(),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --verbose flag: set RUST_LOG=debug if not already set.
    // Runs at startup before any threads are spawned.
    if cli.verbose && std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug");
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!("Run 'vigil --help' for usage information");
        std::process::exit(1);
    };

    match command {
        Commands::Start {
            spec,
            name,
            profile,
        } => {
            commands::process::start(&spec, name.as_deref(), profile.as_deref()).await?;
        },
        Commands::Stop { name } => {
            commands::process::stop(&name).await?;
        },
        Commands::Restart { name } => {
            commands::process::restart(&name).await?;
        },
        Commands::Ps { json } => {
            commands::process::ps(json)?;
        },
        Commands::Stats => {
            commands::process::stats().await?;
        },
        Commands::Logs {
            name,
            follow,
            lines,
            err,
        } => {
            commands::process::logs(&name, follow, lines, err).await?;
        },
        Commands::Inspect { name } => {
            commands::process::inspect(&name)?;
        },
        Commands::Prune => {
            commands::process::prune()?;
        },
        Commands::Daemon { action } => match action {
            DaemonAction::Run { port } => {
                commands::daemon::run(port).await?;
            },
            DaemonAction::Stop => {
                commands::daemon::stop()?;
            },
            DaemonAction::Status => {
                commands::daemon::status().await?;
            },
        },
        Commands::Launch {
            spec,
            name,
            profile,
            skip_bootstrap,
        } => {
            let opts = vigil::launcher::LaunchOptions {
                spec_path: spec,
                name,
                profile,
                skip_bootstrap,
            };
            // Only returns on error (exec replaces the process)
            vigil::launcher::launch(&opts)?;
        },
        Commands::Completions { shell } => {
            print_completions(shell, &mut Cli::command());
        },
    }

    Ok(())
}
