//! In-memory command, permission and broadcast collaborators.
//!
//! Used when the embedding application does not supply its own. All three
//! are idempotent and remove their entries cleanly.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use hearth_core::{
    Broadcaster, CommandRegistrar, CommandSpec, PermissionRegistrar, PermissionSpec, Result,
};

/// Registered command labels (names and aliases, lowercased).
#[derive(Default)]
pub struct CommandTable {
    labels: DashMap<String, (String, CommandSpec)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owning module and spec for a label.
    pub fn lookup(&self, label: &str) -> Option<(String, CommandSpec)> {
        self.labels
            .get(&label.to_lowercase())
            .map(|e| e.value().clone())
    }

    /// Distinct commands registered by `module`, sorted by name.
    pub fn commands_for(&self, module: &str) -> Vec<CommandSpec> {
        let mut specs: Vec<CommandSpec> = self
            .labels
            .iter()
            .filter(|e| e.value().0 == module && e.key() == &e.value().1.name.to_lowercase())
            .map(|e| e.value().1.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of registered labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn labels(spec: &CommandSpec) -> impl Iterator<Item = String> + '_ {
    std::iter::once(spec.name.to_lowercase()).chain(spec.aliases.iter().map(|a| a.to_lowercase()))
}

impl CommandRegistrar for CommandTable {
    fn register_commands(&self, module: &str, commands: &[CommandSpec]) -> Result<()> {
        for spec in commands {
            for label in labels(spec) {
                if let Some(existing) = self.labels.get(&label) {
                    if existing.0 != module {
                        warn!(
                            module,
                            label = %label,
                            owner = %existing.0,
                            "command label already registered by another module, skipping"
                        );
                        continue;
                    }
                }
                self.labels
                    .insert(label, (module.to_string(), spec.clone()));
            }
        }
        debug!(module, count = commands.len(), "commands registered");
        Ok(())
    }

    fn unregister_commands(&self, module: &str, commands: &[CommandSpec]) -> Result<()> {
        for spec in commands {
            for label in labels(spec) {
                self.labels.remove_if(&label, |_, (owner, _)| owner == module);
            }
        }
        debug!(module, count = commands.len(), "commands unregistered");
        Ok(())
    }
}

/// Registered permissions by full name.
#[derive(Default)]
pub struct PermissionTable {
    permissions: DashMap<String, (String, PermissionSpec)>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<PermissionSpec> {
        self.permissions.get(name).map(|e| e.value().1.clone())
    }

    pub fn permissions_for(&self, module: &str) -> Vec<PermissionSpec> {
        let mut specs: Vec<PermissionSpec> = self
            .permissions
            .iter()
            .filter(|e| e.value().0 == module)
            .map(|e| e.value().1.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

impl PermissionRegistrar for PermissionTable {
    fn register_permissions(&self, module: &str, permissions: &[PermissionSpec]) -> Result<()> {
        for spec in permissions {
            self.permissions
                .insert(spec.name.clone(), (module.to_string(), spec.clone()));
        }
        Ok(())
    }

    fn unregister_permissions(&self, module: &str, permissions: &[PermissionSpec]) -> Result<()> {
        for spec in permissions {
            self.permissions
                .remove_if(&spec.name, |_, (owner, _)| owner == module);
        }
        Ok(())
    }
}

const INBOX_CAPACITY: usize = 100;

/// Logs broadcasts and keeps the most recent ones for inspection.
#[derive(Default)]
pub struct LogBroadcaster {
    inbox: Mutex<VecDeque<String>>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recent broadcasts, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.inbox.lock().iter().cloned().collect()
    }
}

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, message: &str) -> Result<()> {
        info!(target: "hearth::broadcast", "{}", message);
        let mut inbox = self.inbox.lock();
        if inbox.len() == INBOX_CAPACITY {
            inbox.pop_front();
        }
        inbox.push_back(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::PermissionDefault;

    fn spec(name: &str, aliases: &[&str]) -> CommandSpec {
        CommandSpec {
            name: name.into(),
            description: String::new(),
            usage: String::new(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            permission: None,
            tab_completions: Default::default(),
        }
    }

    #[test]
    fn register_is_idempotent_and_removal_is_clean() {
        let table = CommandTable::new();
        let cmds = vec![spec("Greet", &["hi"])];
        table.register_commands("Foo", &cmds).unwrap();
        table.register_commands("Foo", &cmds).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("GREET").unwrap().0, "Foo");
        assert_eq!(table.commands_for("Foo").len(), 1);

        table.unregister_commands("Foo", &cmds).unwrap();
        table.unregister_commands("Foo", &cmds).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn conflicting_label_keeps_first_owner() {
        let table = CommandTable::new();
        table.register_commands("Foo", &[spec("greet", &[])]).unwrap();
        table.register_commands("Bar", &[spec("greet", &["wave"])]).unwrap();
        assert_eq!(table.lookup("greet").unwrap().0, "Foo");
        assert_eq!(table.lookup("wave").unwrap().0, "Bar");

        // Bar's removal must not take Foo's label with it.
        table.unregister_commands("Bar", &[spec("greet", &["wave"])]).unwrap();
        assert_eq!(table.lookup("greet").unwrap().0, "Foo");
        assert!(table.lookup("wave").is_none());
    }

    #[test]
    fn permissions_round_trip() {
        let table = PermissionTable::new();
        let perms = vec![PermissionSpec {
            name: "foo.greet".into(),
            description: "greet".into(),
            default: PermissionDefault::Everyone,
        }];
        table.register_permissions("Foo", &perms).unwrap();
        assert_eq!(table.permissions_for("Foo"), perms);
        assert_eq!(table.get("foo.greet").unwrap().default, PermissionDefault::Everyone);
        table.unregister_permissions("Foo", &perms).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn broadcaster_inbox_is_bounded() {
        let b = LogBroadcaster::new();
        for i in 0..(INBOX_CAPACITY + 5) {
            b.broadcast(&format!("msg {}", i)).unwrap();
        }
        let messages = b.messages();
        assert_eq!(messages.len(), INBOX_CAPACITY);
        assert_eq!(messages[0], "msg 5");
    }
}
