//! Server configuration (pocket.toml + environment)

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default loopback port the editor front-end expects
pub const DEFAULT_PORT: u16 = 13337;

/// Default listen address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Name of the optional token file inside the data directory
pub const AUTH_TOKEN_FILE: &str = ".auth_token";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Host must be a loopback address: {0}")]
    InvalidHost(String),
    #[error("Cannot determine home directory")]
    NoHome,
}

/// Settings as they appear in the TOML file. Every field is optional so a
/// partial file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub public_dir: Option<PathBuf>,
    pub auth_token: Option<String>,
    pub shell: Option<String>,
    #[serde(default = "default_true")]
    pub file_log: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            data_dir: None,
            public_dir: None,
            auth_token: None,
            shell: None,
            file_log: default_true(),
        }
    }
}

/// Effective configuration shared by the server, the sync engine and the CLI
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: IpAddr,
    /// Root of all state: workspaces/, plugins/, settings.json, prefs/, logs/
    pub data_dir: PathBuf,
    pub public_dir: PathBuf,
    pub auth_token: Option<String>,
    pub shell: String,
    pub file_log: bool,
}

impl ServerConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::from([127, 0, 0, 1]),
            public_dir: data_dir.join("public"),
            data_dir,
            auth_token: None,
            shell: default_shell(),
            file_log: true,
        }
    }

    /// Load configuration: defaults, then the TOML file (if any), then env vars.
    /// CLI flags are applied by the caller on top of the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let mut config = Self::from_file_config(file)?;
        config.apply_env()?;
        if config.auth_token.is_none() {
            config.auth_token = read_token_file(&config.data_dir);
        }
        Ok(config)
    }

    fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let data_dir = match file.data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        let mut config = Self::with_data_dir(data_dir);
        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(host) = file.host {
            config.set_host(&host)?;
        }
        if let Some(public_dir) = file.public_dir {
            config.public_dir = public_dir;
        }
        if let Some(shell) = file.shell {
            config.shell = shell;
        }
        config.auth_token = file.auth_token.filter(|t| !t.is_empty());
        config.file_log = file.file_log;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = std::env::var("POCKET_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        {
            self.port = port;
        }
        if let Ok(host) = std::env::var("POCKET_HOST") {
            self.set_host(&host)?;
        }
        if let Ok(dir) = std::env::var("POCKET_DATA_DIR") {
            self.set_data_dir(PathBuf::from(dir));
        }
        if let Ok(token) = std::env::var("POCKET_AUTH_TOKEN") {
            if !token.is_empty() {
                self.auth_token = Some(token);
            }
        }
        if let Ok(shell) = std::env::var("POCKET_SHELL") {
            self.shell = shell;
        }
        Ok(())
    }

    /// Only loopback addresses are accepted; the API has no other protection.
    pub fn set_host(&mut self, host: &str) -> Result<(), ConfigError> {
        let addr: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(host.to_string()))?;
        if !addr.is_loopback() {
            return Err(ConfigError::InvalidHost(host.to_string()));
        }
        self.host = addr;
        Ok(())
    }

    /// Move the data directory; the public dir follows unless it was set
    /// explicitly somewhere else.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        if self.public_dir == self.data_dir.join("public") {
            self.public_dir = data_dir.join("public");
        }
        self.data_dir = data_dir;
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn prefs_dir(&self) -> PathBuf {
        self.data_dir.join("prefs")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".codepocket"))
        .ok_or(ConfigError::NoHome)
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty() && Path::new(s).exists())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

fn read_token_file(data_dir: &Path) -> Option<String> {
    let token = fs::read_to_string(data_dir.join(AUTH_TOKEN_FILE)).ok()?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
