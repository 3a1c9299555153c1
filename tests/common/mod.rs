//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;

use pocket_core::config::ServerConfig;
use pocket_core::host::{HostBridge, LogHost};
use pocket_core::server::{RunningServer, ServerRuntime};

/// A server bound to an ephemeral loopback port over a throwaway data dir
pub struct TestServer {
    pub data: TempDir,
    pub runtime: ServerRuntime,
    pub running: RunningServer,
    pub base: String,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn start(token: Option<&str>) -> Self {
        Self::start_with_host(token, Arc::new(LogHost)).await
    }

    pub async fn start_with_host(token: Option<&str>, host: Arc<dyn HostBridge>) -> Self {
        let data = TempDir::new().unwrap();
        let runtime = ServerRuntime::new(test_config(&data, token), host);
        let running = runtime.start().await.unwrap();
        let base = format!("http://{}", running.local_addr());
        Self {
            data,
            runtime,
            running,
            base,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn workspaces_root(&self) -> std::path::PathBuf {
        self.running.context().workspaces_root()
    }

    /// Create `<workspaces_root>/<ws>` and return it
    pub fn workspace_dir(&self, ws: &str) -> std::path::PathBuf {
        let dir = self.workspaces_root().join(ws);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

pub fn test_config(data: &TempDir, token: Option<&str>) -> ServerConfig {
    let mut config = ServerConfig::with_data_dir(data.path());
    config.port = 0;
    config.auth_token = token.map(|t| t.to_string());
    config.shell = "/bin/sh".to_string();
    config.file_log = false;
    config
}
