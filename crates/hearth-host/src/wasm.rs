//! WebAssembly module code.
//!
//! ## Module ABI
//!
//! Structural modules export:
//!
//! - `memory`: exported linear memory
//! - `hearth_alloc(size: u32) -> u32`: allocate `size` bytes in guest memory
//! - `hearth_initialize(ptr: u32, len: u32) -> i32`: input is JSON at `ptr`,
//!   `{ "module": "...", "config": { ... } }`; non-zero return is an error code
//! - `hearth_disable() -> i32`
//! - optional `hearth_save_data() -> i32`, `hearth_on_enable() -> i32`
//!
//! Legacy modules export `init(ptr: u32, len: u32) -> i32` and `on_disable()`
//! instead (plus `memory` and `hearth_alloc`).
//!
//! Each loader compiles its code with its own engine, so interrupting one
//! module's call never affects another's.

use wasmtime::{Config, Engine, ExternType, FuncType, Instance, Linker, Store, ValType};

use hearth_core::{HearthError, Module, ModuleApi, ModuleConfig, Result};

use crate::contract::{Contract, DispatchTable};

/// Fuel granted to every guest call.
const FUEL_PER_CALL: u64 = 10_000_000;

pub fn new_engine(module: &str) -> Result<Engine> {
    let mut config = Config::new();
    config.consume_fuel(true);
    config.epoch_interruption(true);
    Engine::new(&config).map_err(|e| HearthError::ConstructionFailed {
        module: module.to_string(),
        reason: format!("failed to create WASM engine: {}", e),
    })
}

/// Compiled code from a module archive.
pub struct WasmCode {
    engine: Engine,
    module: wasmtime::Module,
}

fn is_func(ty: &ExternType, params: &[ValType], results: &[ValType]) -> bool {
    let ExternType::Func(f) = ty else {
        return false;
    };
    same_types(f, params, results)
}

fn same_types(f: &FuncType, params: &[ValType], results: &[ValType]) -> bool {
    let same = |actual: Vec<ValType>, expected: &[ValType]| {
        actual.len() == expected.len()
            && actual
                .iter()
                .zip(expected)
                .all(|(a, e)| matches!((a, e), (ValType::I32, ValType::I32)))
    };
    same(f.params().collect(), params) && same(f.results().collect(), results)
}

impl WasmCode {
    pub fn compile(engine: &Engine, module: &str, bytes: &[u8]) -> Result<Self> {
        let compiled =
            wasmtime::Module::new(engine, bytes).map_err(|e| HearthError::ConstructionFailed {
                module: module.to_string(),
                reason: format!("failed to compile wasm: {}", e),
            })?;
        Ok(Self {
            engine: engine.clone(),
            module: compiled,
        })
    }

    fn has_export(&self, name: &str, params: &[ValType], results: &[ValType]) -> bool {
        self.module
            .exports()
            .any(|e| e.name() == name && is_func(&e.ty(), params, results))
    }

    /// Match exports against the structural ABI first, then the legacy one.
    pub fn dispatch_table(&self) -> Option<DispatchTable> {
        use ValType::I32;
        if self.has_export("hearth_initialize", &[I32, I32], &[I32])
            && self.has_export("hearth_disable", &[], &[I32])
        {
            return Some(DispatchTable {
                contract: Contract::Structural,
                initialize: "hearth_initialize".into(),
                disable: "hearth_disable".into(),
                on_enable: self
                    .has_export("hearth_on_enable", &[], &[I32])
                    .then(|| "hearth_on_enable".into()),
                save_data: self
                    .has_export("hearth_save_data", &[], &[I32])
                    .then(|| "hearth_save_data".into()),
                on_command: None,
                on_tab_complete: None,
            });
        }
        if self.has_export("init", &[I32, I32], &[I32]) && self.has_export("on_disable", &[], &[])
        {
            return Some(DispatchTable {
                contract: Contract::Legacy,
                initialize: "init".into(),
                disable: "on_disable".into(),
                on_enable: None,
                save_data: None,
                on_command: None,
                on_tab_complete: None,
            });
        }
        None
    }

    /// Instantiate with an empty linker (no host imports).
    pub fn instantiate(&self, module: &str, table: &DispatchTable) -> Result<WasmModule> {
        let mut store = Store::new(&self.engine, ());
        store.set_epoch_deadline(1);
        store
            .set_fuel(FUEL_PER_CALL)
            .map_err(|e| HearthError::module(module, format!("failed to set fuel: {}", e)))?;
        let linker = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| HearthError::ConstructionFailed {
                module: module.to_string(),
                reason: format!("failed to instantiate WASM module: {}", e),
            })?;
        Ok(WasmModule {
            name: module.to_string(),
            engine: self.engine.clone(),
            store,
            instance,
            table: table.clone(),
        })
    }
}

/// A live guest instance driven through the [`Module`] trait.
pub struct WasmModule {
    name: String,
    engine: Engine,
    store: Store<()>,
    instance: Instance,
    table: DispatchTable,
}

impl WasmModule {
    /// Refill fuel, reset the epoch deadline, and let the sandbox interrupt us.
    fn arm(&mut self) -> Result<()> {
        self.store
            .set_fuel(FUEL_PER_CALL)
            .map_err(|e| HearthError::module(&self.name, e))?;
        self.store.set_epoch_deadline(1);
        if let Some(frame) = hearth_core::context::current() {
            let engine = self.engine.clone();
            frame.interrupt.on_interrupt(move || engine.increment_epoch());
        }
        Ok(())
    }

    fn call_status(&mut self, export: &str) -> Result<()> {
        self.arm()?;
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, export)
            .map_err(|e| HearthError::module(&self.name, format!("missing export '{}': {}", export, e)))?;
        let code = func
            .call(&mut self.store, ())
            .map_err(|e| HearthError::module(&self.name, format!("{} trapped: {}", export, e)))?;
        status(&self.name, export, code)
    }

    fn call_unit(&mut self, export: &str) -> Result<()> {
        self.arm()?;
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, export)
            .map_err(|e| HearthError::module(&self.name, format!("missing export '{}': {}", export, e)))?;
        func.call(&mut self.store, ())
            .map_err(|e| HearthError::module(&self.name, format!("{} trapped: {}", export, e)))
    }

    fn write_input(&mut self, input: &[u8]) -> Result<u32> {
        let alloc = self
            .instance
            .get_typed_func::<u32, u32>(&mut self.store, "hearth_alloc")
            .map_err(|e| HearthError::module(&self.name, format!("missing export 'hearth_alloc': {}", e)))?;
        let ptr = alloc
            .call(&mut self.store, input.len() as u32)
            .map_err(|e| HearthError::module(&self.name, format!("hearth_alloc failed: {}", e)))?;
        let memory = self
            .instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| HearthError::module(&self.name, "module does not export 'memory'"))?;
        let data = memory.data_mut(&mut self.store);
        let end = ptr as usize + input.len();
        if end > data.len() {
            return Err(HearthError::module(&self.name, "input exceeds guest memory bounds"));
        }
        data[ptr as usize..end].copy_from_slice(input);
        Ok(ptr)
    }
}

fn status(module: &str, export: &str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(HearthError::module(module, format!("{} returned error code {}", export, code)))
    }
}

impl Module for WasmModule {
    fn initialize(&mut self, api: ModuleApi, config: &ModuleConfig) -> Result<()> {
        let input = serde_json::json!({
            "module": api.name(),
            "config": config.table(),
        })
        .to_string();
        self.arm()?;
        let ptr = self.write_input(input.as_bytes())?;
        let export = self.table.initialize.clone();
        let func = self
            .instance
            .get_typed_func::<(u32, u32), i32>(&mut self.store, &export)
            .map_err(|e| HearthError::module(&self.name, format!("missing export '{}': {}", export, e)))?;
        let code = func
            .call(&mut self.store, (ptr, input.len() as u32))
            .map_err(|e| HearthError::module(&self.name, format!("{} trapped: {}", export, e)))?;
        status(&self.name, &export, code)
    }

    fn disable(&mut self) -> Result<()> {
        let export = self.table.disable.clone();
        match self.table.contract {
            Contract::Structural => self.call_status(&export),
            Contract::Legacy => self.call_unit(&export),
        }
    }

    fn on_enable(&mut self) -> Result<()> {
        match self.table.on_enable.clone() {
            Some(export) => self.call_status(&export),
            None => Ok(()),
        }
    }

    fn save_data(&mut self) -> Result<()> {
        match self.table.save_data.clone() {
            Some(export) => self.call_status(&export),
            None => Ok(()),
        }
    }
}
