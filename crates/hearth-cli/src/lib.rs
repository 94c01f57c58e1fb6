//! # hearth-cli
//!
//! Command-line interface for the Hearth module host.
//!
//! ## Commands
//!
//! - `hearth run`: Start the host with an interactive admin console
//! - `hearth inspect <bundle>`: Read a module bundle's manifest
//! - `hearth config`: Show the effective configuration
//! - `hearth doctor`: Audit the configuration
//! - `hearth completions <shell>`: Generate shell completions

pub mod commands;

pub use commands::Cli;
