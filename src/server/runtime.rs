//! Server lifecycle
//!
//! `ServerRuntime` owns the configuration and publishes a `ServiceStatus`
//! on a watch channel. `start` binds the listener and returns a
//! `RunningServer`, which is the only way to stop it again.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::host::HostBridge;
use crate::server::context::AppContext;
use crate::server::router::build_router;
use crate::server::terminal_registry::TerminalManager;
use crate::workspace::{StoreError, WorkspaceStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running { addr: SocketAddr },
    Stopping,
    Failed(String),
}

impl ServiceStatus {
    pub fn describe(&self) -> String {
        match self {
            ServiceStatus::Stopped => "Stopped".to_string(),
            ServiceStatus::Starting => "Starting".to_string(),
            ServiceStatus::Running { addr } => format!("Running on http://{}", addr),
            ServiceStatus::Stopping => "Stopping".to_string(),
            ServiceStatus::Failed(msg) => format!("Failed: {}", msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("Failed to open workspace store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
    #[error("Server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct ServerRuntime {
    config: ServerConfig,
    host: Arc<dyn HostBridge>,
    status_tx: watch::Sender<ServiceStatus>,
}

impl ServerRuntime {
    pub fn new(config: ServerConfig, host: Arc<dyn HostBridge>) -> Self {
        let (status_tx, _) = watch::channel(ServiceStatus::Stopped);
        Self {
            config,
            host,
            status_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self, status: ServiceStatus) {
        publish(&self.status_tx, self.host.as_ref(), status);
    }

    /// Open the store, start the terminal writer, bind and serve
    pub async fn start(&self) -> Result<RunningServer, RuntimeError> {
        let already = matches!(
            *self.status_tx.borrow(),
            ServiceStatus::Starting | ServiceStatus::Running { .. } | ServiceStatus::Stopping
        );
        if already {
            return Err(RuntimeError::AlreadyRunning);
        }

        self.publish(ServiceStatus::Starting);
        self.host.keep_alive(true);

        match self.bind().await {
            Ok(running) => {
                self.publish(ServiceStatus::Running {
                    addr: running.addr,
                });
                Ok(running)
            }
            Err(e) => {
                error!("Server failed to start: {}", e);
                self.host.keep_alive(false);
                self.publish(ServiceStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn bind(&self) -> Result<RunningServer, RuntimeError> {
        let store = Arc::new(WorkspaceStore::from_config(&self.config)?);
        let terminals =
            TerminalManager::start(self.config.shell.clone(), self.config.workspaces_root());
        let ctx = AppContext::new(self.config.clone(), store, terminals);

        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RuntimeError::Bind { addr, source })?;
        let addr = listener.local_addr()?;

        let app = build_router(ctx.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Listening on http://{}", addr);
        Ok(RunningServer {
            addr,
            ctx,
            shutdown_tx,
            task,
            status_tx: self.status_tx.clone(),
            host: self.host.clone(),
        })
    }
}

fn publish(tx: &watch::Sender<ServiceStatus>, host: &dyn HostBridge, status: ServiceStatus) {
    host.set_status(&status.describe());
    tx.send_replace(status);
}

pub struct RunningServer {
    addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
    status_tx: watch::Sender<ServiceStatus>,
    host: Arc<dyn HostBridge>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Serve until `signal` resolves (or the server dies), then shut down
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        let finished = tokio::select! {
            _ = signal => None,
            result = &mut self.task => Some(result),
        };
        match finished {
            None => {
                info!("Shutdown requested");
                self.shutdown().await
            }
            Some(result) => {
                self.finish().await;
                result??;
                Ok(())
            }
        }
    }

    /// Stop accepting connections, wait for in-flight requests, kill terminals
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        publish(&self.status_tx, self.host.as_ref(), ServiceStatus::Stopping);
        let _ = self.shutdown_tx.send(());
        let result = self.task.await;
        self.ctx.terminals.close_all().await;
        self.host.keep_alive(false);
        publish(&self.status_tx, self.host.as_ref(), ServiceStatus::Stopped);
        result??;
        Ok(())
    }

    async fn finish(&self) {
        self.ctx.terminals.close_all().await;
        self.host.keep_alive(false);
        publish(&self.status_tx, self.host.as_ref(), ServiceStatus::Stopped);
    }
}
