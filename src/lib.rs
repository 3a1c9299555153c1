pub mod config;
pub mod host;
pub mod pty;
pub mod server;
pub mod util;
pub mod workspace;
