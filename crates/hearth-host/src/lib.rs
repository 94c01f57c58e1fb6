//! # hearth-host
//!
//! The module host runtime: finds module bundles on disk, loads each behind
//! its own loader, drives it through its lifecycle under a supervising
//! sandbox, reloads it when its bundle changes, and tracks its resource use.
//!
//! ```no_run
//! # async fn run() -> hearth_core::Result<()> {
//! use std::sync::Arc;
//! use hearth_host::{HostLoader, ModuleManager};
//!
//! let config = hearth_config::HearthConfig::default();
//! let classes = Arc::new(HostLoader::new(config.host.shared_api_prefixes.clone()));
//! let manager = ModuleManager::builder(config).host_loader(classes).build()?;
//! let report = manager.start().await?;
//! println!("{} modules loaded", report.loaded.len());
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod archive;
pub mod collaborators;
pub mod contract;
pub mod coordinator;
pub mod loader;
pub mod main_context;
pub mod performance;
pub mod registry;
pub mod sandbox;
#[cfg(feature = "wasm")]
pub mod wasm;
pub mod watcher;

pub use admin::{Admin, ModuleSummary};
pub use archive::{InspectError, ModuleMetadata, inspect, list_archives};
pub use collaborators::{CommandTable, LogBroadcaster, PermissionTable};
pub use contract::{Contract, DispatchTable};
pub use coordinator::{HostBuilder, ModuleManager, ScanFailure, ScanReport};
pub use loader::{HostLoader, ModuleClass, ModuleLoader};
pub use main_context::MainContext;
pub use performance::{CriticalEvent, ModulePerformanceSample, PerformanceStatus, PerformanceTracker};
pub use registry::{ModuleRecord, ModuleRegistry, ModuleState};
pub use sandbox::{CrashReport, RestartOutcome, Sandbox, SandboxFailure, SandboxPolicy};
pub use watcher::{ModuleWatcher, ReloadRequest};
