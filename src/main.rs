use std::{path::PathBuf, process::ExitCode};

use bedguard::{BackupKind, BedrockManager, ManagerSettings, OperationResult};
use clap::{Parser, Subcommand};
use tracing::{Level, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Bedrock Dedicated Server manager")]
struct Args {
    /// Path to the JSON settings file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Print the full result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start a server (no-op if already running)
    Start { server: String },
    /// Stop a server gracefully (no-op if already stopped)
    Stop { server: String },
    /// Stop then start a server
    Restart { server: String },
    /// Write one line to the server console
    Send {
        server: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Update a server to its configured target version
    Update { server: String },
    /// Take a backup: world, properties or json
    Backup {
        server: String,
        kind: BackupKind,
        /// Config file name inside the install directory
        #[arg(long)]
        file: Option<String>,
    },
    /// List backups of one kind, newest first
    Backups { server: String, kind: BackupKind },
    /// Keep the newest N backups of each kind
    Prune { server: String, keep: i64 },
    /// Put a backup back in place
    Restore {
        server: String,
        kind: BackupKind,
        path: PathBuf,
    },
    /// Pid, memory and CPU of a running server
    Status { server: String },
}

fn setup_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let settings = match &args.config {
        Some(path) => match ManagerSettings::load(path).await {
            Ok(settings) => settings,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => ManagerSettings::default(),
    };
    let manager = BedrockManager::builder(settings).build();

    let result = run(&manager, args.cmd).await;
    print_result(&result, args.json);

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(manager: &BedrockManager, cmd: Cmd) -> OperationResult {
    match cmd {
        Cmd::Start { server } => manager.start(&server).await,
        Cmd::Stop { server } => manager.stop(&server).await,
        Cmd::Restart { server } => manager.restart(&server).await,
        Cmd::Send { server, command } => manager.send_command(&server, &command.join(" ")).await,
        Cmd::Update { server } => manager.update(&server).await,
        Cmd::Backup { server, kind, file } => manager.backup(&server, kind, file.as_deref()).await,
        Cmd::Backups { server, kind } => manager.list_backups(&server, kind).await,
        Cmd::Prune { server, keep } => manager.prune_backups(&server, keep).await,
        Cmd::Restore { server, kind, path } => manager.restore(&server, &path, kind).await,
        Cmd::Status { server } => manager.probe_status(&server).await,
    }
}

fn print_result(result: &OperationResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(out) => println!("{out}"),
            Err(e) => error!("Failed to encode result: {e}"),
        }
        return;
    }

    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("error: {}", result.message);
    }
    if let Some(status) = &result.status {
        println!(
            "pid {}  cpu {:.1}%  mem {:.1} MB  up {}s",
            status.pid, status.cpu_percent, status.memory_mb, status.uptime_secs
        );
    }
    for record in &result.backups {
        println!(
            "{}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.path.display()
        );
    }
}
