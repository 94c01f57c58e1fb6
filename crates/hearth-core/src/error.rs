use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a sandboxed invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The module returned an error or panicked.
    Exception,
    /// The module did not finish within the configured execution time.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Exception => write!(f, "EXCEPTION"),
            FailureKind::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Unified error type for the entire Hearth runtime.
#[derive(Error, Debug)]
pub enum HearthError {
    // ── Validation ─────────────────────────────────────────────
    #[error("manifest invalid: {archive}: {reason}")]
    ManifestInvalid { archive: String, reason: String },

    #[error("duplicate module: {0} is already loaded")]
    DuplicateModule(String),

    #[error("module {0} is disabled in its configuration")]
    ModuleDisabled(String),

    #[error("module {module} depends on missing module {dependency}")]
    DependencyMissing { module: String, dependency: String },

    #[error("module {0} is part of a dependency cycle")]
    DependencyCycle(String),

    // ── Instantiation ──────────────────────────────────────────
    #[error("contract missing: {module}: {reason}")]
    ContractMissing { module: String, reason: String },

    #[error("construction failed: {module}: {reason}")]
    ConstructionFailed { module: String, reason: String },

    // ── Lifecycle ──────────────────────────────────────────────
    #[error("initialization failed ({kind}): {module}: {reason}")]
    InitializationFailed {
        module: String,
        kind: FailureKind,
        reason: String,
    },

    #[error("disable failed: {module}: {reason}")]
    DisableFailed { module: String, reason: String },

    #[error("loader close failed: {module}: {reason}")]
    LoaderCloseFailed { module: String, reason: String },

    #[error("restart limit reached: {module} after {attempts} attempts")]
    RestartLimitReached { module: String, attempts: u32 },

    #[error("module not loaded: {0}")]
    NotLoaded(String),

    #[error("invocation cancelled: {0}")]
    Cancelled(String),

    // ── Module-raised errors ───────────────────────────────────
    #[error("module error: {module}: {reason}")]
    Module { module: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HearthError {
    /// Stable, machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HearthError::ManifestInvalid { .. } => "ManifestInvalid",
            HearthError::DuplicateModule(_) => "DuplicateModule",
            HearthError::ModuleDisabled(_) => "Skipped",
            HearthError::DependencyMissing { .. } => "DependencyMissing",
            HearthError::DependencyCycle(_) => "DependencyCycle",
            HearthError::ContractMissing { .. } => "ContractMissing",
            HearthError::ConstructionFailed { .. } => "ConstructionFailed",
            HearthError::InitializationFailed {
                kind: FailureKind::Exception,
                ..
            } => "InitializationFailed(Exception)",
            HearthError::InitializationFailed {
                kind: FailureKind::Timeout,
                ..
            } => "InitializationFailed(Timeout)",
            HearthError::DisableFailed { .. } => "DisableFailed",
            HearthError::LoaderCloseFailed { .. } => "LoaderCloseFailed",
            HearthError::RestartLimitReached { .. } => "RestartLimitReached",
            HearthError::NotLoaded(_) => "NotLoaded",
            HearthError::Cancelled(_) => "Cancelled",
            HearthError::Module { .. } => "ModuleError",
            HearthError::Config(_) => "Config",
            HearthError::Io(_) => "Io",
            HearthError::Serialization(_) => "Serialization",
            HearthError::Other(_) => "Other",
        }
    }

    /// Non-fatal kinds are logged and never stop an unload or reload.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HearthError::DisableFailed { .. } | HearthError::LoaderCloseFailed { .. }
        )
    }

    /// Shorthand for errors raised from module code.
    pub fn module(module: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HearthError::Module {
            module: module.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HearthError>;
