//! Per-module data directory bootstrap.

use std::path::Path;
use tracing::debug;

use hearth_core::{ModuleConfig, ModulePaths, Result};

/// Load the module's `config.toml`, writing the defaults on first load and
/// keeping the recorded version in step with the manifest.
pub fn bootstrap_config(paths: &ModulePaths, version: &str) -> Result<ModuleConfig> {
    let fresh = !paths.config.exists();
    let mut config = ModuleConfig::load(&paths.config)?;
    if fresh {
        config.set("enabled", true);
        config.set("version", version);
        config.save()?;
        debug!(path = ?paths.config, "wrote default module config");
    } else if config.version() != Some(version) {
        config.set("version", version);
        config.save()?;
    }
    Ok(config)
}

/// Copy the bundle's `resources/` tree into `dest`. Files that already exist
/// are left alone so operator edits survive reloads. Returns how many files
/// were copied.
pub fn extract_resources(archive: &Path, dest: &Path) -> Result<usize> {
    let source = archive.join("resources");
    if !source.is_dir() {
        return Ok(0);
    }
    copy_missing(&source, dest)
}

fn copy_missing(from: &Path, to: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        if path.is_dir() {
            copied += copy_missing(&path, &target)?;
        } else if !target.exists() {
            std::fs::create_dir_all(to)?;
            std::fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults_and_version_follows_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModulePaths::new(dir.path(), "Foo");

        let config = bootstrap_config(&paths, "1.0").unwrap();
        assert!(config.enabled());
        assert!(paths.config.is_file());

        let mut edited = ModuleConfig::load(&paths.config).unwrap();
        edited.set("greeting", "hi");
        edited.save().unwrap();

        let config = bootstrap_config(&paths, "1.1").unwrap();
        assert_eq!(config.version(), Some("1.1"));
        assert_eq!(config.get_str("greeting"), Some("hi"));
    }

    #[test]
    fn resources_do_not_overwrite_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Foo");
        std::fs::create_dir_all(archive.join("resources/lang")).unwrap();
        std::fs::write(archive.join("resources/motd.txt"), "default").unwrap();
        std::fs::write(archive.join("resources/lang/en.txt"), "hello").unwrap();

        let dest = dir.path().join("data/Foo/resources");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("motd.txt"), "edited").unwrap();

        assert_eq!(extract_resources(&archive, &dest).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(dest.join("motd.txt")).unwrap(), "edited");
        assert_eq!(std::fs::read_to_string(dest.join("lang/en.txt")).unwrap(), "hello");
        assert_eq!(extract_resources(&archive, &dest).unwrap(), 0);
    }

    #[test]
    fn bundle_without_resources_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        assert_eq!(extract_resources(dir.path(), &dest).unwrap(), 0);
        assert!(!dest.exists());
    }
}
