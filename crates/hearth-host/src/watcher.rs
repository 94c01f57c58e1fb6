//! Hot-reload watcher for the modules directory.
//!
//! Filesystem events are collected on a dedicated thread, debounced, mapped
//! to their module bundle, and handed to the coordinator's task over a tokio
//! channel. No lifecycle work ever runs on the watcher thread itself.

use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

use hearth_config::HotReloadConfig;
use hearth_core::{HearthError, Result};

/// A bundle that changed on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReloadRequest {
    pub archive: PathBuf,
    /// The bundle no longer exists.
    pub removed: bool,
}

pub struct ModuleWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: notify::RecommendedWatcher,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ModuleWatcher {
    pub fn start(
        modules_dir: &Path,
        config: &HotReloadConfig,
        sink: tokio_mpsc::Sender<ReloadRequest>,
    ) -> Result<Self> {
        std::fs::create_dir_all(modules_dir)?;
        let root = modules_dir.to_path_buf();
        let (tx, rx) = mpsc::channel::<notify::Event>();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => warn!(error = %e, "module watcher error"),
            })
            .map_err(|e| HearthError::Other(anyhow::anyhow!("failed to create watcher: {}", e)))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| HearthError::Other(anyhow::anyhow!("failed to watch {}: {}", root.display(), e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let poll = config.poll_interval();
        let settle = config.settle();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("hearth-watcher".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let first = match rx.recv_timeout(poll) {
                        Ok(event) => event,
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };
                    // Let a copy or build finish writing before acting on it.
                    std::thread::sleep(settle);
                    let mut paths: Vec<PathBuf> = first.paths;
                    while let Ok(event) = rx.try_recv() {
                        paths.extend(event.paths);
                    }
                    for request in requests_for(&root, &paths) {
                        debug!(archive = ?request.archive, removed = request.removed, "module bundle changed");
                        if sink.blocking_send(request).is_err() {
                            return;
                        }
                    }
                }
                debug!("module watcher stopped");
            })?;

        info!(dir = ?modules_dir, "watching modules directory");
        Ok(Self {
            _watcher: watcher,
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Map changed paths to the distinct bundles under `root` they belong to.
pub fn requests_for(root: &Path, paths: &[PathBuf]) -> Vec<ReloadRequest> {
    let mut bundles = BTreeSet::new();
    for path in paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(Component::Normal(first)) = relative.components().next() else {
            continue;
        };
        if first.to_string_lossy().starts_with('.') {
            continue;
        }
        let bundle = root.join(first);
        // A plain file directly in the modules directory is not a bundle.
        if bundle.is_file() {
            continue;
        }
        bundles.insert(bundle);
    }
    bundles
        .into_iter()
        .map(|archive| ReloadRequest {
            removed: !archive.exists(),
            archive,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn paths_map_to_distinct_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Foo/resources")).unwrap();
        std::fs::write(root.join("notes.txt"), "x").unwrap();

        let requests = requests_for(
            root,
            &[
                root.join("Foo/module.toml"),
                root.join("Foo/resources/a.txt"),
                root.join(".cache/x"),
                root.join("notes.txt"),
                root.join("Gone/module.toml"),
                PathBuf::from("/elsewhere/Bar/module.toml"),
            ],
        );
        assert_eq!(
            requests,
            vec![
                ReloadRequest {
                    archive: root.join("Foo"),
                    removed: false
                },
                ReloadRequest {
                    archive: root.join("Gone"),
                    removed: true
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watcher_reports_new_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio_mpsc::channel(16);
        let config = HotReloadConfig {
            enabled: true,
            poll_interval_secs: 1,
            settle_ms: 50,
        };
        let mut watcher = ModuleWatcher::start(dir.path(), &config, tx).unwrap();

        let bundle = dir.path().join("Foo");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("module.toml"), "[module]\n").unwrap();

        let request = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        assert_eq!(canonical(&request.archive), canonical(&bundle));
        assert!(!request.removed);
        tokio::task::spawn_blocking(move || watcher.stop()).await.unwrap();
    }
}
