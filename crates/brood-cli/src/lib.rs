//! Server launcher built on the `brood` supervisor.

pub mod commands;
pub mod config;
pub mod logging;
pub mod server;

pub use commands::ConfigFormat;
pub use config::LauncherConfig;
