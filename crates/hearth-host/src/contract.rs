//! Module capability contract.
//!
//! A class is accepted if it implements [`Module`] (structural) or, for
//! legacy modules, declares methods shaped like `initialize(api, config)` and
//! `disable()`. The check runs once at load time; its result is a
//! [`DispatchTable`] kept on the module's record for the rest of its life.

use std::panic::{AssertUnwindSafe, catch_unwind};

use hearth_core::{
    Arg, CommandSender, HearthError, MethodShape, Module, ModuleApi, ModuleConfig, ParamKind,
    ReflectiveModule, Result,
};

use crate::loader::ModuleClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contract {
    Structural,
    Legacy,
}

/// Entry points found for one module, resolved once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTable {
    pub contract: Contract,
    pub initialize: String,
    pub disable: String,
    pub on_enable: Option<String>,
    pub save_data: Option<String>,
    pub on_command: Option<String>,
    pub on_tab_complete: Option<String>,
}

impl DispatchTable {
    fn structural() -> Self {
        Self {
            contract: Contract::Structural,
            initialize: "initialize".into(),
            disable: "disable".into(),
            on_enable: Some("on_enable".into()),
            save_data: Some("save_data".into()),
            on_command: Some("on_command".into()),
            on_tab_complete: Some("on_tab_complete".into()),
        }
    }
}

const INITIALIZE: (&[&str], &[ParamKind]) =
    (&["initialize", "init"], &[ParamKind::Api, ParamKind::Config]);
const DISABLE: (&[&str], &[ParamKind]) = (&["disable", "on_disable", "onDisable"], &[]);
const ON_ENABLE: (&[&str], &[ParamKind]) = (&["on_enable", "onEnable", "enable"], &[]);
const SAVE_DATA: (&[&str], &[ParamKind]) = (&["save_data", "saveData"], &[]);
const ON_COMMAND: (&[&str], &[ParamKind]) = (
    &["on_command", "onCommand"],
    &[ParamKind::Sender, ParamKind::Text, ParamKind::TextList],
);
const ON_TAB_COMPLETE: (&[&str], &[ParamKind]) = (
    &["on_tab_complete", "onTabComplete", "tab_complete"],
    &[ParamKind::Sender, ParamKind::Text, ParamKind::TextList],
);

fn find_shape(shapes: &[MethodShape], (names, params): (&[&str], &[ParamKind])) -> Option<String> {
    names.iter().find_map(|name| {
        shapes
            .iter()
            .find(|s| s.name == *name && s.params == params)
            .map(|s| s.name.clone())
    })
}

/// Check a resolved class against the contract, preferring structural.
pub fn check(module: &str, class: &ModuleClass) -> Result<DispatchTable> {
    match class {
        ModuleClass::Structural(_) => Ok(DispatchTable::structural()),
        ModuleClass::Reflective { shapes, .. } => {
            let missing = |what: &str| HearthError::ContractMissing {
                module: module.to_string(),
                reason: format!(
                    "does not implement Module and declares no {} method",
                    what
                ),
            };
            let initialize =
                find_shape(shapes, INITIALIZE).ok_or_else(|| missing("initialize(api, config)"))?;
            let disable = find_shape(shapes, DISABLE).ok_or_else(|| missing("disable()"))?;
            Ok(DispatchTable {
                contract: Contract::Legacy,
                initialize,
                disable,
                on_enable: find_shape(shapes, ON_ENABLE),
                save_data: find_shape(shapes, SAVE_DATA),
                on_command: find_shape(shapes, ON_COMMAND),
                on_tab_complete: find_shape(shapes, ON_TAB_COMPLETE),
            })
        }
        #[cfg(feature = "wasm")]
        ModuleClass::Wasm(code) => code.dispatch_table().ok_or_else(|| {
            HearthError::ContractMissing {
                module: module.to_string(),
                reason: "wasm exports match neither hearth_initialize/hearth_disable \
                         nor init/on_disable"
                    .into(),
            }
        }),
        ModuleClass::Opaque => Err(HearthError::ContractMissing {
            module: module.to_string(),
            reason: "entry class is a shared API type, not a module".into(),
        }),
    }
}

/// Zero-argument construction of a checked class. Panics in the constructor
/// are reported as `ConstructionFailed`.
pub fn construct(module: &str, class: &ModuleClass, table: &DispatchTable) -> Result<Box<dyn Module>> {
    let failed = |reason: String| HearthError::ConstructionFailed {
        module: module.to_string(),
        reason,
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<Box<dyn Module>> {
        match class {
            ModuleClass::Structural(ctor) => ctor(),
            ModuleClass::Reflective { construct, .. } => Ok(Box::new(LegacyModule {
                inner: construct()?,
                table: table.clone(),
            })),
            #[cfg(feature = "wasm")]
            ModuleClass::Wasm(code) => Ok(Box::new(code.instantiate(module, table)?)),
            ModuleClass::Opaque => Err(HearthError::module(module, "not constructible")),
        }
    }));
    match outcome {
        Ok(Ok(instance)) => Ok(instance),
        Ok(Err(e)) => Err(failed(e.to_string())),
        Err(panic) => Err(failed(crate::sandbox::panic_message(panic.as_ref()))),
    }
}

/// Adapts a [`ReflectiveModule`] to [`Module`] through its dispatch table.
struct LegacyModule {
    inner: Box<dyn ReflectiveModule>,
    table: DispatchTable,
}

impl Module for LegacyModule {
    fn initialize(&mut self, api: ModuleApi, config: &ModuleConfig) -> Result<()> {
        self.inner.invoke(
            &self.table.initialize,
            vec![Arg::Api(api), Arg::Config(config.clone())],
        )
    }

    fn disable(&mut self) -> Result<()> {
        self.inner.invoke(&self.table.disable, Vec::new())
    }

    fn on_enable(&mut self) -> Result<()> {
        match &self.table.on_enable {
            Some(method) => self.inner.invoke(method, Vec::new()),
            None => Ok(()),
        }
    }

    fn on_command(&mut self, sender: &CommandSender, command: &str, args: &[String]) -> Result<bool> {
        match &self.table.on_command {
            Some(method) => {
                self.inner.invoke(
                    method,
                    vec![
                        Arg::Sender(sender.clone()),
                        Arg::Text(command.to_string()),
                        Arg::TextList(args.to_vec()),
                    ],
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn on_tab_complete(
        &mut self,
        sender: &CommandSender,
        command: &str,
        args: &[String],
    ) -> Result<Vec<String>> {
        match &self.table.on_tab_complete {
            Some(method) => self.inner.invoke_for_list(
                method,
                vec![
                    Arg::Sender(sender.clone()),
                    Arg::Text(command.to_string()),
                    Arg::TextList(args.to_vec()),
                ],
            ),
            None => Ok(Vec::new()),
        }
    }

    fn save_data(&mut self) -> Result<()> {
        match &self.table.save_data {
            Some(method) => self.inner.invoke(method, Vec::new()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ReflectiveModule for Recorder {
        fn invoke(&mut self, method: &str, args: Vec<Arg>) -> Result<()> {
            self.calls.lock().push(format!("{}/{}", method, args.len()));
            Ok(())
        }

        fn invoke_for_list(&mut self, method: &str, args: Vec<Arg>) -> Result<Vec<String>> {
            let typed = match args.last() {
                Some(Arg::TextList(words)) => words.last().cloned().unwrap_or_default(),
                _ => String::new(),
            };
            self.calls.lock().push(format!("{}/{}", method, args.len()));
            Ok(["alpha", "beta"]
                .iter()
                .filter(|c| c.starts_with(&typed))
                .map(|c| c.to_string())
                .collect())
        }
    }

    fn legacy(shapes: Vec<MethodShape>, calls: Arc<Mutex<Vec<String>>>) -> ModuleClass {
        ModuleClass::Reflective {
            shapes,
            construct: Arc::new(move || -> Result<Box<dyn ReflectiveModule>> {
                Ok(Box::new(Recorder {
                    calls: calls.clone(),
                }) as Box<dyn ReflectiveModule>)
            }),
        }
    }

    #[test]
    fn legacy_shapes_are_checked_once_into_table() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let class = legacy(
            vec![
                MethodShape::new("init", &[ParamKind::Api, ParamKind::Config]),
                MethodShape::new("onDisable", &[]),
                MethodShape::new("saveData", &[]),
            ],
            calls.clone(),
        );
        let table = check("Old", &class).unwrap();
        assert_eq!(table.contract, Contract::Legacy);
        assert_eq!(table.initialize, "init");
        assert_eq!(table.disable, "onDisable");
        assert_eq!(table.save_data.as_deref(), Some("saveData"));
        assert!(table.on_enable.is_none());

        let mut module = construct("Old", &class, &table).unwrap();
        module.disable().unwrap();
        module.save_data().unwrap();
        module.on_enable().unwrap();
        assert_eq!(*calls.lock(), vec!["onDisable/0", "saveData/0"]);
    }

    #[test]
    fn legacy_tab_completion_routes_through_table() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let class = legacy(
            vec![
                MethodShape::new("init", &[ParamKind::Api, ParamKind::Config]),
                MethodShape::new("onDisable", &[]),
                MethodShape::new(
                    "onTabComplete",
                    &[ParamKind::Sender, ParamKind::Text, ParamKind::TextList],
                ),
            ],
            calls.clone(),
        );
        let table = check("Old", &class).unwrap();
        assert_eq!(table.on_tab_complete.as_deref(), Some("onTabComplete"));
        assert!(table.on_command.is_none());

        let mut module = construct("Old", &class, &table).unwrap();
        let sender = CommandSender::console();
        let completions = module
            .on_tab_complete(&sender, "pick", &["b".to_string()])
            .unwrap();
        assert_eq!(completions, vec!["beta"]);
        assert!(!module.on_command(&sender, "pick", &[]).unwrap());
        assert_eq!(*calls.lock(), vec!["onTabComplete/3"]);
    }

    #[test]
    fn tab_completion_shape_must_match() {
        let class = legacy(
            vec![
                MethodShape::new("init", &[ParamKind::Api, ParamKind::Config]),
                MethodShape::new("disable", &[]),
                MethodShape::new("onTabComplete", &[ParamKind::Text]),
            ],
            Arc::new(Mutex::new(Vec::new())),
        );
        let table = check("Old", &class).unwrap();
        assert!(table.on_tab_complete.is_none());

        let mut module = construct("Old", &class, &table).unwrap();
        let completions = module
            .on_tab_complete(&CommandSender::console(), "pick", &[])
            .unwrap();
        assert!(completions.is_empty());
    }

    #[test]
    fn wrong_shape_is_contract_missing() {
        let class = legacy(
            vec![
                MethodShape::new("initialize", &[ParamKind::Api]),
                MethodShape::new("disable", &[]),
            ],
            Arc::new(Mutex::new(Vec::new())),
        );
        let err = check("Old", &class).unwrap_err();
        assert_eq!(err.kind(), "ContractMissing");
        assert!(err.to_string().contains("initialize(api, config)"));
    }

    #[test]
    fn opaque_class_is_contract_missing() {
        assert_eq!(
            check("Api", &ModuleClass::Opaque).unwrap_err().kind(),
            "ContractMissing"
        );
    }

    #[test]
    fn panicking_constructor_is_construction_failed() {
        let class = ModuleClass::Structural(Arc::new(|| -> Result<Box<dyn Module>> {
            panic!("no default config")
        }));
        let table = check("Boom", &class).unwrap();
        let err = construct("Boom", &class, &table).err().unwrap();
        assert_eq!(err.kind(), "ConstructionFailed");
        assert!(err.to_string().contains("no default config"));
    }

    #[test]
    fn failing_constructor_is_construction_failed() {
        let class = ModuleClass::Structural(Arc::new(|| -> Result<Box<dyn Module>> {
            Err(HearthError::module("Boom", "missing native library"))
        }));
        let table = check("Boom", &class).unwrap();
        let err = construct("Boom", &class, &table).err().unwrap();
        assert_eq!(err.kind(), "ConstructionFailed");
    }
}
