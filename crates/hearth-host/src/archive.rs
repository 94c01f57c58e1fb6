//! Archive inspection.
//!
//! A module archive is a bundle directory holding a `module.toml` manifest
//! and the module's local code and resources:
//!
//! ```toml
//! [module]
//! name = "Greeter"
//! main = "Greeter"
//! version = "1.2.0"
//! description = "Says hello"
//! depends = ["Core"]
//!
//! [[commands]]
//! name = "greet"
//! usage = "/greet <who>"
//! aliases = ["hi"]
//!
//! [permissions.greet]
//! description = "Allows greeting"
//! default = "op"
//! ```
//!
//! Inspection only reads the manifest; no module code is touched.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hearth_core::{CommandSpec, HearthError, PermissionDefault, PermissionSpec};
use semver::Version;

pub const MANIFEST_FILE: &str = "module.toml";

/// Conventional manifest locations, canonical root first.
const MANIFEST_PATHS: &[&str] = &[
    "module.toml",
    "META-INF/module.toml",
    "resources/module.toml",
    "src/main/resources/module.toml",
];

const SCAN_DEPTH: usize = 8;

/// Why an archive's manifest could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InspectError {
    #[error("no {MANIFEST_FILE} found in archive")]
    EntryMissing,
    #[error("required field `{0}` is missing")]
    FieldMissing(String),
    #[error("failed to parse manifest: {0}")]
    Parse(String),
    #[error("archive unreadable: {0}")]
    Unreadable(String),
}

impl InspectError {
    pub fn into_error(self, archive: &Path) -> HearthError {
        HearthError::ManifestInvalid {
            archive: archive.display().to_string(),
            reason: self.to_string(),
        }
    }
}

/// Parsed manifest. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub name: String,
    /// Entry class resolved through the module's loader.
    pub main: String,
    pub version: String,
    pub description: String,
    pub depends: Vec<String>,
    /// BLAKE3 hash of the local code unit, if the author pinned one.
    pub checksum: Option<String>,
    pub commands: Vec<CommandSpec>,
    /// Namespaced as `<lowercase name>.<key>`.
    pub permissions: Vec<PermissionSpec>,
}

#[derive(Deserialize)]
struct RawManifest {
    module: RawModule,
    #[serde(default)]
    commands: Vec<CommandSpec>,
    #[serde(default)]
    permissions: BTreeMap<String, RawPermission>,
}

#[derive(Deserialize)]
struct RawModule {
    name: String,
    main: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    checksum: Option<String>,
}

#[derive(Deserialize)]
struct RawPermission {
    #[serde(default)]
    description: String,
    #[serde(default)]
    default: PermissionDefault,
}

impl ModuleMetadata {
    /// Parse from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, InspectError> {
        let table: toml::Table = s.parse().map_err(|e: toml::de::Error| {
            InspectError::Parse(e.message().to_string())
        })?;

        let module = table
            .get("module")
            .and_then(|v| v.as_table())
            .ok_or_else(|| InspectError::FieldMissing("module".into()))?;
        for field in ["name", "main", "version"] {
            match module.get(field) {
                Some(toml::Value::String(s)) if !s.trim().is_empty() => {}
                Some(toml::Value::String(_)) | None => {
                    return Err(InspectError::FieldMissing(field.into()));
                }
                Some(other) => {
                    return Err(InspectError::Parse(format!(
                        "`{}` must be a string, found {}",
                        field,
                        other.type_str()
                    )));
                }
            }
        }

        let raw: RawManifest = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| InspectError::Parse(e.message().to_string()))?;

        let name = raw.module.name.trim().to_string();
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(InspectError::Parse(format!(
                "module name '{}' is not a valid directory name",
                name
            )));
        }

        let prefix = name.to_lowercase();
        let permissions = raw
            .permissions
            .into_iter()
            .map(|(key, p)| PermissionSpec {
                name: format!("{}.{}", prefix, key),
                description: p.description,
                default: p.default,
            })
            .collect();

        Ok(Self {
            name,
            main: raw.module.main.trim().to_string(),
            version: raw.module.version.trim().to_string(),
            description: raw.module.description,
            depends: raw.module.depends,
            checksum: raw.module.checksum,
            commands: raw.commands,
            permissions,
        })
    }

    /// Get the semver version, when the manifest uses one.
    pub fn semver(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// Verify a code unit against the pinned checksum.
    pub fn verify_checksum(&self, code: &[u8]) -> bool {
        checksum_matches(self.checksum.as_deref(), code)
    }
}

/// BLAKE3 check of a code unit. An unpinned unit always matches.
pub fn checksum_matches(expected: Option<&str>, code: &[u8]) -> bool {
    match expected {
        Some(expected) => blake3::hash(code).to_hex().as_str() == expected,
        None => true,
    }
}

/// Find the manifest inside an archive: conventional paths first, then a
/// bounded recursive scan for any file named `module.toml`.
pub fn locate_manifest(archive: &Path) -> Result<PathBuf, InspectError> {
    if !archive.is_dir() {
        return Err(InspectError::Unreadable(format!(
            "{} is not a module bundle directory",
            archive.display()
        )));
    }
    for rel in MANIFEST_PATHS {
        let candidate = archive.join(rel);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    scan_for_manifest(archive, 0).ok_or(InspectError::EntryMissing)
}

fn scan_for_manifest(dir: &Path, depth: usize) -> Option<PathBuf> {
    if depth > SCAN_DEPTH {
        return None;
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    if let Some(found) = entries
        .iter()
        .find(|p| p.is_file() && p.file_name().is_some_and(|n| n == MANIFEST_FILE))
    {
        return Some(found.clone());
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| scan_for_manifest(p, depth + 1))
}

/// Read and validate an archive's manifest without touching its code.
pub fn inspect(archive: &Path) -> Result<ModuleMetadata, InspectError> {
    let manifest = locate_manifest(archive)?;
    let raw = std::fs::read_to_string(&manifest)
        .map_err(|e| InspectError::Unreadable(format!("{}: {}", manifest.display(), e)))?;
    ModuleMetadata::from_toml(&raw)
}

/// Bundle directories directly under `modules_dir`, sorted by path.
pub fn list_archives(modules_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !modules_dir.exists() {
        return Ok(Vec::new());
    }
    let mut archives: Vec<PathBuf> = std::fs::read_dir(modules_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    archives.sort();
    Ok(archives)
}
