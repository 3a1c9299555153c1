use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use pocket_core::config::ServerConfig;
use pocket_core::host::LogHost;
use pocket_core::server::ServerRuntime;
use pocket_core::util::init_logging;
use pocket_core::workspace::{
    LocalDocumentTree, SyncEngine, SyncEvent, SyncOutcome, SyncStream, Workspace, WorkspaceStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "CodePocket sandbox mirror and local editor server")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root of all state (workspaces, plugins, settings, logs)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the local HTTP server until Ctrl-C
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        public_dir: Option<PathBuf>,
    },
    /// Copy an external folder into a new sandbox workspace
    Mirror {
        /// Path or file:// URI of the external folder
        source: String,
    },
    /// Write sandbox edits back to the original folder
    Export { workspace_id: String },
    /// Replace the sandbox with a fresh copy of the original folder
    Refresh { workspace_id: String },
    /// Look for sandbox edits newer than the last sync
    Check { workspace_id: String },
    /// List saved workspaces
    List,
    /// Forget a workspace
    Delete {
        workspace_id: String,
        /// Also remove the sandbox directory
        #[arg(long)]
        with_files: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(dir);
    }

    let log_dir = config.log_dir();
    init_logging(config.file_log.then_some(log_dir.as_path()));

    match cli.command {
        Command::Serve {
            port,
            host,
            token,
            public_dir,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.set_host(&host)?;
            }
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                config.auth_token = Some(token);
            }
            if let Some(dir) = public_dir {
                config.public_dir = dir;
            }
            serve(config).await
        }
        Command::Mirror { source } => {
            let engine = sync_engine(&config)?;
            let reference = source_reference(&source);
            let outcome = drive(engine.mirror_to_sandbox(&reference)).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Export { workspace_id } => {
            let engine = sync_engine(&config)?;
            let workspace = find_workspace(&engine, &workspace_id)?;
            let outcome = drive(engine.export_to_original(&workspace)).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Refresh { workspace_id } => {
            let engine = sync_engine(&config)?;
            let workspace = find_workspace(&engine, &workspace_id)?;
            let outcome = drive(engine.refresh_from_original(&workspace)).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Check { workspace_id } => {
            let engine = sync_engine(&config)?;
            let workspace = find_workspace(&engine, &workspace_id)?;
            let checked = engine.check_unsynced_changes(&workspace).await;
            if checked.has_unsynced_changes() {
                println!(
                    "{}: unsynced changes (last edited {})",
                    checked.id, checked.last_edited_at
                );
            } else {
                println!("{}: in sync", checked.id);
            }
            Ok(())
        }
        Command::List => {
            let store = WorkspaceStore::from_config(&config)?;
            let workspaces = store.all()?;
            if workspaces.is_empty() {
                println!("No workspaces");
            }
            for w in workspaces {
                let marker = if w.has_unsynced_changes() { "*" } else { " " };
                println!(
                    "{} {}  {}  {} files  {}",
                    marker, w.id, w.name, w.file_count, w.original_location
                );
            }
            Ok(())
        }
        Command::Delete {
            workspace_id,
            with_files,
        } => {
            let store = WorkspaceStore::from_config(&config)?;
            if with_files {
                if !store.delete_with_files(&workspace_id)? {
                    bail!("Unknown workspace: {}", workspace_id);
                }
            } else {
                if store.get(&workspace_id)?.is_none() {
                    bail!("Unknown workspace: {}", workspace_id);
                }
                store.delete(&workspace_id)?;
            }
            println!("Deleted {}", workspace_id);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!(
        "Starting pocket-core on {}:{} (data dir {:?})",
        config.host, config.port, config.data_dir
    );
    let runtime = ServerRuntime::new(config, Arc::new(LogHost));
    let running = runtime.start().await.context("failed to start server")?;
    running
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server failed")?;
    Ok(())
}

fn sync_engine(config: &ServerConfig) -> Result<SyncEngine> {
    let store = WorkspaceStore::from_config(config).context("failed to open workspace store")?;
    Ok(SyncEngine::new(
        Arc::new(LocalDocumentTree::new()),
        Arc::new(store),
    ))
}

fn find_workspace(engine: &SyncEngine, id: &str) -> Result<Workspace> {
    engine
        .store()
        .get(id)?
        .with_context(|| format!("Unknown workspace: {}", id))
}

/// Local paths are turned into `file://` references; anything else is passed through
fn source_reference(source: &str) -> String {
    if source.contains("://") {
        return source.to_string();
    }
    LocalDocumentTree::reference_for(Path::new(source)).unwrap_or_else(|_| source.to_string())
}

/// Print progress lines until the terminal event
async fn drive(mut stream: SyncStream) -> Result<SyncOutcome> {
    while let Some(event) = stream.next().await {
        match event {
            SyncEvent::Progress {
                current,
                total,
                path,
            } => println!("[{}/{}] {}", current, total, path),
            SyncEvent::Completed(outcome) => return Ok(outcome),
            SyncEvent::Failed(message) => bail!(message),
        }
    }
    bail!("operation ended without a result")
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Mirrored(w) => println!(
            "Mirrored {} into {} ({} entries) as {}",
            w.original_location,
            w.sandbox_path.display(),
            w.file_count,
            w.id
        ),
        SyncOutcome::Exported { count, workspace } => {
            println!("Exported {} file(s) from {}", count, workspace.id)
        }
        SyncOutcome::Refreshed(w) => {
            println!("Refreshed {} ({} entries)", w.id, w.file_count)
        }
    }
}
