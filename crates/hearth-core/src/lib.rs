//! # hearth-core
//!
//! Core types, traits, and primitives for the Hearth module host.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace, and is the only crate module authors need to depend on.

pub mod api;
pub mod collaborator;
pub mod context;
pub mod error;
pub mod event;
pub mod module;
pub mod shared;

pub use api::{HostServices, ModuleApi, ModulePaths};
pub use collaborator::{
    Broadcaster, CommandRegistrar, CommandSpec, PermissionDefault, PermissionRegistrar,
    PermissionSpec,
};
pub use error::{FailureKind, HearthError, Result};
pub use event::{Event, EventBus};
pub use module::{
    Arg, CommandSender, MethodShape, Module, ModuleConfig, ParamKind, ReflectiveModule,
};
pub use shared::{Listener, ListenerRegistry, SharedData};
