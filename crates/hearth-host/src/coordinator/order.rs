//! Dependency-aware load ordering for one discovery scan.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use hearth_core::HearthError;

use crate::archive::ModuleMetadata;

/// An inspected archive waiting to be loaded.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub archive: PathBuf,
    pub metadata: ModuleMetadata,
}

impl Candidate {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Default)]
pub struct LoadPlan {
    /// Each layer only depends on earlier layers; members of one layer may
    /// load concurrently.
    pub layers: Vec<Vec<Candidate>>,
    pub rejected: Vec<(Candidate, HearthError)>,
}

/// Order `candidates` by their `depends` lists.
///
/// Later archives reusing an earlier name are rejected as duplicates.
/// `loaded` names count as satisfied. With `ignore_missing`, unsatisfiable
/// dependencies are ignored for ordering; otherwise the dependent (and,
/// transitively, its own dependents) is rejected.
pub fn plan(candidates: Vec<Candidate>, loaded: &HashSet<String>, ignore_missing: bool) -> LoadPlan {
    let mut rejected = Vec::new();

    let mut seen = HashSet::new();
    let mut remaining = Vec::new();
    for candidate in candidates {
        if seen.insert(candidate.metadata.name.clone()) {
            remaining.push(candidate);
        } else {
            let err = HearthError::DuplicateModule(candidate.metadata.name.clone());
            rejected.push((candidate, err));
        }
    }

    if !ignore_missing {
        loop {
            let names: HashSet<String> = remaining.iter().map(|c| c.name().to_string()).collect();
            let (ok, missing): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|c| {
                c.metadata
                    .depends
                    .iter()
                    .all(|d| loaded.contains(d) || names.contains(d))
            });
            remaining = ok;
            if missing.is_empty() {
                break;
            }
            for candidate in missing {
                let dependency = candidate
                    .metadata
                    .depends
                    .iter()
                    .find(|d| !loaded.contains(*d) && !names.contains(*d))
                    .cloned()
                    .unwrap_or_default();
                let err = HearthError::DependencyMissing {
                    module: candidate.metadata.name.clone(),
                    dependency,
                };
                rejected.push((candidate, err));
            }
        }
    }

    let names: HashSet<String> = remaining.iter().map(|c| c.name().to_string()).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut layers = Vec::new();
    loop {
        let (ready, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|c| {
            c.metadata
                .depends
                .iter()
                .all(|d| !names.contains(d) || placed.contains(d) || d == c.name())
        });
        remaining = rest;
        if ready.is_empty() {
            break;
        }
        placed.extend(ready.iter().map(|c| c.name().to_string()));
        layers.push(ready);
    }

    if !remaining.is_empty() {
        let graph: HashMap<String, Vec<String>> = remaining
            .iter()
            .map(|c| (c.name().to_string(), c.metadata.depends.clone()))
            .collect();
        let mut stragglers = Vec::new();
        for candidate in remaining {
            if in_cycle(candidate.name(), &graph) {
                let err = HearthError::DependencyCycle(candidate.metadata.name.clone());
                rejected.push((candidate, err));
            } else if ignore_missing {
                stragglers.push(candidate);
            } else {
                let dependency = candidate
                    .metadata
                    .depends
                    .iter()
                    .find(|d| graph.contains_key(*d))
                    .cloned()
                    .unwrap_or_default();
                let err = HearthError::DependencyMissing {
                    module: candidate.metadata.name.clone(),
                    dependency,
                };
                rejected.push((candidate, err));
            }
        }
        // Dependents of a cycle load last, their missing dependency ignored.
        if !stragglers.is_empty() {
            layers.push(stragglers);
        }
    }

    LoadPlan { layers, rejected }
}

/// Whether `start` can reach itself through unplaced dependencies.
fn in_cycle(start: &str, graph: &HashMap<String, Vec<String>>) -> bool {
    let mut stack: Vec<&str> = graph
        .get(start)
        .map(|deps| deps.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(deps) = graph.get(node) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    false
}
