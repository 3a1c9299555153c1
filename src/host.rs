//! Host integration points
//!
//! The embedding process (a mobile shell, a desktop tray app, or the CLI)
//! only has to keep the process alive while the server runs and show a
//! one-line status.

use std::sync::Mutex;
use tracing::info;

pub trait HostBridge: Send + Sync {
    /// Hold (or release) whatever keeps the process from being suspended
    fn keep_alive(&self, active: bool);

    /// Human-readable service status, e.g. "Running on http://127.0.0.1:13337"
    fn set_status(&self, status: &str);
}

/// Host that only logs; used by the CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHost;

impl HostBridge for LogHost {
    fn keep_alive(&self, active: bool) {
        info!(active, "Host keep-alive");
    }

    fn set_status(&self, status: &str) {
        info!("Service status: {}", status);
    }
}

/// Host that remembers every call, for embedding tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingHost {
    keep_alive: Mutex<Vec<bool>>,
    statuses: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn keep_alive_calls(&self) -> Vec<bool> {
        self.keep_alive.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl HostBridge for RecordingHost {
    fn keep_alive(&self, active: bool) {
        if let Ok(mut calls) = self.keep_alive.lock() {
            calls.push(active);
        }
    }

    fn set_status(&self, status: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(status.to_string());
        }
    }
}
