//! reposync CLI
//!
//! Maintenance tools for a file-backed reposync depot.
//!
//! # Commands
//!
//! - `gc` - Remove objects no branch head reaches
//! - `inspect` - Display repos, branches and object counts
//! - `verify` - Rehash every object and check branch heads are complete

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use reposync_core::RepoId;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// reposync depot maintenance tools.
#[derive(Parser)]
#[command(name = "reposync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the depot directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove unreachable objects
    Gc {
        /// Only collect this repo (all repos if omitted)
        #[arg(short, long)]
        repo: Option<RepoId>,

        /// Also remove unreachable fs-objects and commits
        #[arg(short, long)]
        full: bool,

        /// Dry run - count what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Display repos, branches and object counts
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Verify stored objects and branch heads
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Gc { repo, full, dry_run } => {
            let path = cli.path.ok_or("Depot path required for gc")?;
            commands::gc::run(&path, repo, full, dry_run)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Depot path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Depot path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("reposync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("reposync core v{}", reposync_core::VERSION);
        }
    }

    Ok(())
}
