//! # hearth-config
//!
//! Configuration system for the Hearth host. Reads from `hearth.toml`, then
//! applies environment variable overrides.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    ConfigWarning, HearthConfig, HostConfig, HotReloadConfig, LoadMode, LoggingConfig,
    NotifyConfig, PerformanceConfig, SandboxConfig, WarningSeverity,
};
