use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::event::Event;

/// Key/value store shared between modules. Entries are owned by the module
/// that wrote them and dropped when that module unloads.
#[derive(Default)]
pub struct SharedData {
    entries: RwLock<HashMap<String, (String, serde_json::Value)>>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, owner: &str, key: impl Into<String>, value: serde_json::Value) {
        self.entries
            .write()
            .insert(key.into(), (owner.to_string(), value));
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.read().get(key).map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.write().remove(key).map(|(_, v)| v)
    }

    /// Drop every entry written by `owner`. Returns how many were removed.
    pub fn clear_owner(&self, owner: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (o, _)| o != owner);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Event listeners registered by modules, keyed by owning module.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<(String, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `kind` (see [`Event::kind`]); `"*"` matches all.
    pub fn register(&self, owner: &str, kind: impl Into<String>, listener: Listener) {
        self.listeners
            .write()
            .entry(owner.to_string())
            .or_default()
            .push((kind.into(), listener));
    }

    /// Remove all listeners owned by `owner`. Returns how many were removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        self.listeners
            .write()
            .remove(owner)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    pub fn count(&self, owner: &str) -> usize {
        self.listeners.read().get(owner).map(|l| l.len()).unwrap_or(0)
    }

    /// Matching listeners for `event`, paired with their owner.
    pub fn matching(&self, event: &Event) -> Vec<(String, Listener)> {
        let kind = event.kind();
        self.listeners
            .read()
            .iter()
            .flat_map(|(owner, ls)| {
                ls.iter()
                    .filter(|(k, _)| k == "*" || k == kind)
                    .map(move |(_, l)| (owner.clone(), Arc::clone(l)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn shared_data_is_cleared_per_owner() {
        let data = SharedData::new();
        data.set("a", "a.key", serde_json::json!(1));
        data.set("b", "b.key", serde_json::json!("two"));
        assert_eq!(data.get("a.key"), Some(serde_json::json!(1)));
        assert_eq!(data.clear_owner("a"), 1);
        assert!(data.get("a.key").is_none());
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn listeners_match_kind_and_wildcard() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        registry.register(
            "a",
            "module_loaded",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.register("b", "*", Arc::new(|_| {}));

        let event = Event::ModuleLoaded {
            module: "x".into(),
            version: "1".into(),
        };
        let matching = registry.matching(&event);
        assert_eq!(matching.len(), 2);
        for (_, l) in &matching {
            l(&event);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.matching(&Event::Shutdown).len() == 1);
        assert_eq!(registry.remove_owner("a"), 1);
        assert_eq!(registry.count("a"), 0);
    }
}
