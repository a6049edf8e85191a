//! NTCore CLI: log in, archive trained models and manage workspaces from the
//! terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NTCore: experiment capture and model archiving
#[derive(Parser, Debug)]
#[command(name = "ntcore", version, about, long_about = None)]
struct Cli {
    /// NTCore server endpoint (overrides configuration)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Project directory holding `.ntcore/config.toml`
    #[arg(short = 'C', long, default_value = ".", global = true)]
    dir: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Upload a serialized model file as a new experiment
    ArchiveModel {
        /// Target workspace id
        #[arg(short, long)]
        workspace_id: String,
        /// Framework of the model: sklearn, tensorflow or pytorch
        #[arg(short, long)]
        framework: String,
        /// Model file or SavedModel directory
        #[arg(short, long)]
        model: PathBuf,
    },
    /// Log in and store the access token
    Login {
        #[arg(short, long)]
        username: String,
        /// Read from a prompt when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Manage the registered model of a workspace
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Deploy the registered model of a workspace
    Deploy {
        #[arg(short, long)]
        workspace_id: String,
    },
    /// Download a model archive
    Download {
        #[arg(short, long)]
        workspace_id: String,
        /// Experiment version; 0 selects the registered version
        #[arg(long, default_value_t = 0)]
        version: u64,
        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Publish monitoring data for a deployed model
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkspaceAction {
    /// Create an API workspace
    Create { name: String },
    /// Show one workspace
    Get { workspace_id: String },
    /// List workspaces
    List,
    /// Delete a workspace
    Delete { workspace_id: String },
}

#[derive(clap::Subcommand, Debug)]
enum RegistryAction {
    /// Register an experiment version
    Register {
        workspace_id: String,
        version: u64,
    },
    /// Show the registered experiment
    Show { workspace_id: String },
    /// Remove the registered experiment
    Unregister { workspace_id: String },
}

#[derive(clap::Subcommand, Debug)]
enum MonitorAction {
    /// Record one metric sample
    Metric {
        #[arg(short, long)]
        workspace_id: Option<String>,
        name: String,
        value: f64,
    },
    /// Publish host metrics until interrupted
    System {
        #[arg(short, long)]
        workspace_id: Option<String>,
        /// Seconds between rounds (overrides configuration)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.ntcore/config.toml`
    Init,
    /// Print the effective configuration with secrets redacted
    Show,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("NTCORE_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let dir = cli
        .dir
        .canonicalize()
        .unwrap_or_else(|_| cli.dir.clone());
    commands::handle_command(cli.command, &dir, cli.server.as_deref())
}
