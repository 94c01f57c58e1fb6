use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::HearthConfig;

/// Loads and optionally hot-reloads the Hearth configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<HearthConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > HEARTH_CONFIG env > ~/.hearth/hearth.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("HEARTH_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hearth")
            .join("hearth.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> hearth_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            HearthConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(hearth_core::HearthError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn read(path: &Path) -> hearth_core::Result<HearthConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<HearthConfig>(&raw).map_err(|e| {
            hearth_core::HearthError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> HearthConfig {
        self.config.read().clone()
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (HEARTH_MODULES_DIR, HEARTH_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: HearthConfig) -> HearthConfig {
        if let Ok(v) = std::env::var("HEARTH_MODULES_DIR") {
            config.host.modules_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HEARTH_DATA_DIR") {
            config.host.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HEARTH_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("HEARTH_SANDBOX_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                config.sandbox.enabled = enabled;
            }
        }
        // Webhook URL: config file takes priority, env is the fallback.
        if config.sandbox.notify.webhook_url.is_empty() {
            if let Ok(v) = std::env::var("HEARTH_WEBHOOK_URL") {
                config.sandbox.notify.webhook_url = v;
            }
        }
        config
    }

    /// Read `path`, apply env overrides and reject configs with errors.
    fn read_validated(path: &Path) -> hearth_core::Result<HearthConfig> {
        let config = Self::apply_env_overrides(Self::read(path)?);
        config.validate().map_err(hearth_core::HearthError::Config)?;
        Ok(config)
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> hearth_core::Result<()> {
        if !self.config_path.exists() {
            return Err(hearth_core::HearthError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        *self.config.write() = Self::read_validated(&self.config_path)?;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads the config when the file
    /// changes and hands each accepted config to `on_reload`. A file with
    /// errors is logged and the current config kept.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(
        &self,
        on_reload: impl Fn(&HearthConfig) + Send + 'static,
    ) -> hearth_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    match ConfigLoader::read_validated(&path_for_event) {
                        Ok(new_config) => {
                            *config.write() = new_config.clone();
                            on_reload(&new_config);
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            })
            .map_err(|e| {
                hearth_core::HearthError::Config(format!("failed to create file watcher: {}", e))
            })?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                hearth_core::HearthError::Config(format!(
                    "failed to watch config directory: {}",
                    e
                ))
            })?;

        Ok(watcher)
    }
}
