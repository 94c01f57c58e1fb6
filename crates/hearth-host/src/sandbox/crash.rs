//! Structured crash reports, the durable postmortem record of a failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use hearth_core::FailureKind;

use crate::registry::ModuleRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub version: Option<String>,
    pub main: Option<String>,
    pub archive: Option<PathBuf>,
    pub operation: String,
    pub failure: FailureKind,
    pub message: String,
    pub trace: Option<String>,
    pub context: RuntimeContext,
}

/// Host state at the moment of the crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub host_version: String,
    pub os: String,
    pub arch: String,
    pub thread: Option<String>,
    pub sandbox_enabled: bool,
    pub trusted: bool,
    pub loaded_modules: Vec<String>,
}

impl RuntimeContext {
    pub fn capture(sandbox_enabled: bool, trusted: bool, loaded_modules: Vec<String>) -> Self {
        Self {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            thread: std::thread::current().name().map(String::from),
            sandbox_enabled,
            trusted,
            loaded_modules,
        }
    }
}

impl CrashReport {
    pub fn new(
        module: &str,
        record: Option<&ModuleRecord>,
        operation: &str,
        failure: FailureKind,
        message: &str,
        trace: Option<String>,
        context: RuntimeContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            module: module.to_string(),
            version: record.map(|r| r.metadata.version.clone()),
            main: record.map(|r| r.metadata.main.clone()),
            archive: record.map(|r| r.archive.clone()),
            operation: operation.to_string(),
            failure,
            message: message.to_string(),
            trace,
            context,
        }
    }

    /// `<module>_<YYYY-MM-DD_HH-MM-SS>.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.module,
            self.timestamp.format("%Y-%m-%d_%H-%M-%S")
        )
    }

    /// Write the report as pretty JSON under `dir`. A report from the same
    /// second is kept alongside with a numeric suffix.
    pub fn write(&self, dir: &Path) -> hearth_core::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let mut path = dir.join(self.file_name());
        let mut n = 1;
        while path.exists() {
            let stem = self.file_name().trim_end_matches(".json").to_string();
            path = dir.join(format!("{}_{}.json", stem, n));
            n += 1;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> CrashReport {
        CrashReport::new(
            "Foo",
            None,
            "initialize",
            FailureKind::Timeout,
            "initialize exceeded 50 ms",
            None,
            RuntimeContext::capture(true, false, vec!["Bar".into()]),
        )
    }

    #[test]
    fn file_name_has_module_and_timestamp() {
        let r = report();
        let name = r.file_name();
        assert!(name.starts_with("Foo_"));
        assert!(name.ends_with(".json"));
        // Foo_YYYY-MM-DD_HH-MM-SS.json
        assert_eq!(name.len(), "Foo_".len() + 19 + ".json".len());
    }

    #[test]
    fn same_second_reports_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let r = report();
        let first = r.write(dir.path()).unwrap();
        let second = r.write(dir.path()).unwrap();
        assert_ne!(first, second);

        let json = std::fs::read_to_string(&first).unwrap();
        let parsed: CrashReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.failure, FailureKind::Timeout);
        assert_eq!(parsed.context.loaded_modules, vec!["Bar"]);
    }
}
