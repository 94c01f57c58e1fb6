//! Discovery scans, full reloads and per-archive hot reloads.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use hearth_core::{Event, HearthError, Result};

use super::order::{self, Candidate};
use super::{ModuleManager, canonical, report_failure};
use crate::archive::{inspect, list_archives};

/// One archive that did not load during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub module: String,
    pub archive: PathBuf,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub loaded: Vec<String>,
    pub failed: Vec<ScanFailure>,
}

impl ScanReport {
    fn absorb(&mut self, outcomes: Vec<(Candidate, Result<()>)>) {
        for (candidate, outcome) in outcomes {
            match outcome {
                Ok(()) => self.loaded.push(candidate.metadata.name),
                Err(e) => self.failed.push(ScanFailure {
                    module: candidate.metadata.name,
                    archive: candidate.archive,
                    kind: e.kind(),
                    reason: e.to_string(),
                }),
            }
        }
    }
}

impl ModuleManager {
    // ── Discovery ──────────────────────────────────────────────

    /// Inspect every bundle in the modules directory, skipping the ones
    /// already loaded. Unreadable manifests are reported, not returned.
    fn scan(&self, report: &mut ScanReport) -> Vec<Candidate> {
        let archives = match list_archives(&self.modules_dir) {
            Ok(archives) => archives,
            Err(e) => {
                warn!(dir = ?self.modules_dir, error = %e, "cannot list modules directory");
                return Vec::new();
            }
        };
        let mut candidates = Vec::new();
        for archive in archives {
            let archive = canonical(&archive);
            if self.registry.find_by_archive(&archive).is_some() {
                continue;
            }
            match inspect(&archive) {
                Ok(metadata) => candidates.push(Candidate { archive, metadata }),
                Err(e) => {
                    let err = e.into_error(&archive);
                    let module = archive
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    report_failure(&module, &err);
                    report.failed.push(ScanFailure {
                        module,
                        archive,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        candidates
    }

    /// Plan and load `candidates` layer by layer; members of a layer load
    /// concurrently.
    async fn load_candidates(&self, candidates: Vec<Candidate>) -> Vec<(Candidate, Result<()>)> {
        let loaded: HashSet<String> = self.registry.enabled_names().into_iter().collect();
        let plan = order::plan(
            candidates,
            &loaded,
            self.config.host.ignore_failed_dependencies,
        );

        let mut outcomes = Vec::new();
        for (candidate, err) in plan.rejected {
            report_failure(candidate.name(), &err);
            outcomes.push((candidate, Err(err)));
        }
        for layer in plan.layers {
            let loads = layer.into_iter().map(|candidate| async move {
                let outcome = self
                    .load_validated(candidate.metadata.clone(), candidate.archive.clone())
                    .await;
                (candidate, outcome)
            });
            outcomes.extend(futures::future::join_all(loads).await);
        }
        outcomes
    }

    /// Scan the modules directory and load everything found, dependencies
    /// first.
    pub async fn discover_and_load_all(&self) -> Result<ScanReport> {
        std::fs::create_dir_all(&self.modules_dir)?;
        let mut report = ScanReport::default();
        let candidates = self.scan(&mut report);
        debug!(candidates = candidates.len(), "discovered module archives");
        let outcomes = self.load_candidates(candidates).await;
        report.absorb(outcomes);
        Ok(report)
    }

    /// Archives on disk whose module name is not registered.
    pub fn available_but_not_loaded(&self) -> Vec<Candidate> {
        let mut ignored = ScanReport::default();
        self.scan(&mut ignored)
            .into_iter()
            .filter(|c| !self.registry.contains(c.name()))
            .collect()
    }

    /// Load archives that appeared since the last scan.
    pub async fn check_for_new_modules(&self) -> ScanReport {
        let candidates = self.available_but_not_loaded();
        let mut report = ScanReport::default();
        if candidates.is_empty() {
            return report;
        }
        let outcomes = self.load_candidates(candidates).await;
        report.absorb(outcomes);
        report
    }

    // ── Single archive ─────────────────────────────────────────

    /// Load one archive, pulling in any unloaded dependencies found in the
    /// modules directory first. Returns the module's name.
    pub async fn load_archive(&self, path: &Path) -> Result<String> {
        let archive = canonical(path);
        let metadata = match inspect(&archive) {
            Ok(metadata) => metadata,
            Err(e) => {
                let err = e.into_error(&archive);
                report_failure(&archive.display().to_string(), &err);
                return Err(err);
            }
        };
        let name = metadata.name.clone();

        let mut candidates = vec![Candidate {
            archive: archive.clone(),
            metadata,
        }];
        if candidates[0].metadata.depends.iter().any(|d| !self.registry.contains(d)) {
            let available: HashMap<String, Candidate> = self
                .available_but_not_loaded()
                .into_iter()
                .filter(|c| c.archive != archive)
                .map(|c| (c.name().to_string(), c))
                .collect();
            let mut wanted: Vec<String> = candidates[0].metadata.depends.clone();
            let mut seen = HashSet::from([name.clone()]);
            while let Some(dependency) = wanted.pop() {
                if !seen.insert(dependency.clone()) {
                    continue;
                }
                if let Some(found) = available.get(&dependency) {
                    wanted.extend(found.metadata.depends.iter().cloned());
                    candidates.insert(0, found.clone());
                }
            }
        }

        let outcomes = self.load_candidates(candidates).await;
        outcomes
            .into_iter()
            .find(|(c, _)| c.archive == archive)
            .map(|(_, outcome)| outcome.map(|()| name.clone()))
            .unwrap_or_else(|| Err(HearthError::NotLoaded(name)))
    }

    /// Synchronous [`load_archive`](Self::load_archive) for callers outside
    /// the async runtime. Blocks until every cross-context step completes.
    pub fn load_blocking(&self, path: &Path) -> Result<String> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(HearthError::Other(anyhow::anyhow!(
                "load_blocking called from inside the runtime, use load_archive"
            )));
        }
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            HearthError::Other(anyhow::anyhow!("host was built outside a tokio runtime"))
        })?;
        runtime.block_on(self.load_archive(path))
    }

    // ── Reload ─────────────────────────────────────────────────

    /// Unload every enabled module in reverse registration order, pause,
    /// then rescan and load everything again.
    pub async fn reload_all(&self) -> Result<ScanReport> {
        let records = self.registry.snapshot();
        info!(modules = records.len(), "reloading all modules");
        for record in records.into_iter().rev() {
            let name = record.name().to_string();
            if let Err(e) = self.unload(&name).await {
                debug!(module = %name, error = %e, "already gone before reload");
            }
        }

        tokio::time::sleep(self.config.host.reload_pause()).await;

        let report = self.discover_and_load_all().await?;
        self.events.publish(Event::ModulesReloaded {
            module_count: report.loaded.len(),
        });
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "reload complete"
        );
        Ok(report)
    }

    /// React to one changed bundle: unload what it provided, then load it
    /// again if it still exists. Returns the module now loaded from it.
    pub async fn hot_reload(&self, path: &Path) -> Result<Option<String>> {
        let archive = canonical(path);
        let previous = self.registry.find_by_archive(&archive);

        if !archive.exists() {
            if let Some(record) = previous {
                info!(module = record.name(), "module bundle removed, unloading");
                self.unload(record.name()).await?;
            }
            return Ok(None);
        }

        let metadata = match inspect(&archive) {
            Ok(metadata) => metadata,
            Err(e) => {
                // A half-written manifest; the settled write raises another event.
                let err = e.into_error(&archive);
                debug!(archive = ?archive, error = %err, "skipping unreadable bundle");
                return Err(err);
            }
        };
        let name = metadata.name.clone();

        match previous {
            Some(record) if record.name() != name => {
                info!(old = record.name(), new = %name, "module renamed in place");
                self.unload(record.name()).await?;
            }
            Some(record) => {
                if let (Some(from), Some(to)) = (record.metadata.semver(), metadata.semver()) {
                    if to < from {
                        warn!(module = %name, %from, %to, "hot reload downgrades module");
                    }
                }
            }
            None => {}
        }

        let outcome = self
            .with_name_lock(&name, async {
                if let Some(current) = self.registry.get(&name) {
                    if current.archive != archive {
                        return Err(HearthError::DuplicateModule(name.clone()));
                    }
                    self.teardown(&name, false).await;
                }
                self.load_locked(metadata, archive.clone()).await
            })
            .await;
        match outcome {
            Ok(()) => {
                info!(module = %name, "hot reloaded");
                Ok(Some(name))
            }
            Err(e) => {
                report_failure(&name, &e);
                Err(e)
            }
        }
    }
}
