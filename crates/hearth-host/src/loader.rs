//! Isolated loading.
//!
//! The [`HostLoader`] owns every class the embedding application links in:
//! native module implementations plus the shared API types. Each loaded
//! module gets its own [`ModuleLoader`], scoped to its archive, which
//! resolves names against the archive's local code and delegates to the host
//! loader. Names under a shared-API prefix always go to the host first, so
//! every module observes identical API types.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use hearth_core::{HearthError, MethodShape, Module, ReflectiveModule, Result};

pub type StructuralCtor = Arc<dyn Fn() -> Result<Box<dyn Module>> + Send + Sync>;
pub type ReflectiveCtor = Arc<dyn Fn() -> Result<Box<dyn ReflectiveModule>> + Send + Sync>;

/// Something a loader can resolve a name to.
#[derive(Clone)]
pub enum ModuleClass {
    /// Implements [`Module`] directly.
    Structural(StructuralCtor),
    /// Exposes named methods; accepted if the right shapes are declared.
    Reflective {
        shapes: Vec<MethodShape>,
        construct: ReflectiveCtor,
    },
    /// Compiled WebAssembly from the module's own archive.
    #[cfg(feature = "wasm")]
    Wasm(Arc<crate::wasm::WasmCode>),
    /// A type with no module entry points (shared API types).
    Opaque,
}

impl std::fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleClass::Structural(_) => write!(f, "Structural"),
            ModuleClass::Reflective { shapes, .. } => {
                f.debug_struct("Reflective").field("shapes", shapes).finish()
            }
            #[cfg(feature = "wasm")]
            ModuleClass::Wasm(_) => write!(f, "Wasm"),
            ModuleClass::Opaque => write!(f, "Opaque"),
        }
    }
}

/// Where a name was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Host,
    Local,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub class: ModuleClass,
    pub origin: Origin,
}

// ── Host loader ────────────────────────────────────────────────

/// The host's own class table; parent of every [`ModuleLoader`].
pub struct HostLoader {
    classes: RwLock<HashMap<String, ModuleClass>>,
    shared_prefixes: Vec<String>,
}

impl HostLoader {
    pub fn new(shared_prefixes: Vec<String>) -> Self {
        let loader = Self {
            classes: RwLock::new(HashMap::new()),
            shared_prefixes,
        };
        for api_type in [
            "hearth::api::Module",
            "hearth::api::ModuleApi",
            "hearth::api::ModuleConfig",
            "hearth::api::CommandSender",
        ] {
            loader.register(api_type, ModuleClass::Opaque);
        }
        loader
    }

    pub fn register(&self, name: impl Into<String>, class: ModuleClass) {
        self.classes.write().insert(name.into(), class);
    }

    /// Register a native module constructed with `Default`.
    pub fn register_module<M>(&self, name: impl Into<String>)
    where
        M: Module + Default + 'static,
    {
        self.register_with(name, || Ok(Box::new(M::default()) as Box<dyn Module>));
    }

    /// Register a native module with a custom zero-argument constructor.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        construct: impl Fn() -> Result<Box<dyn Module>> + Send + Sync + 'static,
    ) {
        self.register(name, ModuleClass::Structural(Arc::new(construct)));
    }

    /// Register a legacy module that declares its methods by shape.
    pub fn register_reflective(
        &self,
        name: impl Into<String>,
        shapes: Vec<MethodShape>,
        construct: impl Fn() -> Result<Box<dyn ReflectiveModule>> + Send + Sync + 'static,
    ) {
        self.register(
            name,
            ModuleClass::Reflective {
                shapes,
                construct: Arc::new(construct),
            },
        );
    }

    pub fn find(&self, name: &str) -> Option<ModuleClass> {
        self.classes.read().get(name).cloned()
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared_prefixes.iter().any(|p| name.starts_with(p))
    }
}

impl Default for HostLoader {
    fn default() -> Self {
        Self::new(vec!["hearth::api::".into()])
    }
}

// ── Per-module loader ──────────────────────────────────────────

/// One per loaded module, owned exclusively by its registry record.
///
/// Closing drops the memoised resolutions and any compiled local code.
/// Instances already constructed from that code stay alive until their last
/// reference is gone; callers must not keep module references past unload.
pub struct ModuleLoader {
    id: u64,
    module: String,
    archive: PathBuf,
    parent: Arc<HostLoader>,
    #[cfg_attr(not(feature = "wasm"), allow(dead_code))]
    checksum: Option<String>,
    cache: Mutex<HashMap<String, Resolved>>,
    footprint: AtomicU64,
    closed: AtomicBool,
    #[cfg(feature = "wasm")]
    engine: Mutex<Option<wasmtime::Engine>>,
}

impl ModuleLoader {
    pub fn new(
        id: u64,
        module: &str,
        archive: &Path,
        parent: Arc<HostLoader>,
        checksum: Option<String>,
    ) -> Self {
        Self {
            id,
            module: module.to_string(),
            archive: archive.to_path_buf(),
            parent,
            checksum,
            cache: Mutex::new(HashMap::new()),
            footprint: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            #[cfg(feature = "wasm")]
            engine: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bytes of local code loaded through this loader.
    pub fn code_footprint(&self) -> u64 {
        self.footprint.load(Ordering::Relaxed)
    }

    /// Resolve `name`: shared-API names from the host first, everything else
    /// from the archive first. Results are memoised until [`close`](Self::close).
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        if self.is_closed() {
            return Err(HearthError::module(&self.module, "loader is closed"));
        }
        if let Some(hit) = self.cache.lock().get(name) {
            return Ok(hit.clone());
        }

        let resolved = if self.parent.is_shared(name) {
            match self.parent.find(name) {
                Some(class) => Some(Resolved {
                    class,
                    origin: Origin::Host,
                }),
                None => self.find_local(name)?,
            }
        } else {
            match self.find_local(name)? {
                Some(local) => Some(local),
                None => self.parent.find(name).map(|class| Resolved {
                    class,
                    origin: Origin::Host,
                }),
            }
        };

        let resolved = resolved.ok_or_else(|| HearthError::ContractMissing {
            module: self.module.clone(),
            reason: format!("class '{}' not found in archive or host", name),
        })?;
        debug!(module = %self.module, class = name, origin = ?resolved.origin, "resolved class");
        self.cache.lock().insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Local code units a name may live in: the full path form and the last segment.
    fn local_candidates(&self, name: &str) -> Vec<PathBuf> {
        let path_form = name.replace("::", "/").replace('.', "/");
        let mut candidates = vec![self.archive.join(format!("{}.wasm", path_form))];
        if let Some(last) = path_form.rsplit('/').next() {
            let short = self.archive.join(format!("{}.wasm", last));
            if !candidates.contains(&short) {
                candidates.push(short);
            }
        }
        candidates
    }

    #[cfg(feature = "wasm")]
    fn find_local(&self, name: &str) -> Result<Option<Resolved>> {
        let Some(path) = self.local_candidates(name).into_iter().find(|p| p.is_file()) else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path)?;
        if !crate::archive::checksum_matches(self.checksum.as_deref(), &bytes) {
            return Err(HearthError::ConstructionFailed {
                module: self.module.clone(),
                reason: format!("checksum mismatch for {}", path.display()),
            });
        }
        let engine = {
            let mut slot = self.engine.lock();
            match slot.as_ref() {
                Some(engine) => engine.clone(),
                None => {
                    let engine = crate::wasm::new_engine(&self.module)?;
                    *slot = Some(engine.clone());
                    engine
                }
            }
        };
        let code = crate::wasm::WasmCode::compile(&engine, &self.module, &bytes)?;
        self.footprint
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(Some(Resolved {
            class: ModuleClass::Wasm(Arc::new(code)),
            origin: Origin::Local,
        }))
    }

    #[cfg(not(feature = "wasm"))]
    fn find_local(&self, name: &str) -> Result<Option<Resolved>> {
        if let Some(path) = self.local_candidates(name).into_iter().find(|p| p.is_file()) {
            return Err(HearthError::ConstructionFailed {
                module: self.module.clone(),
                reason: format!(
                    "WASM support not enabled, rebuild with `--features wasm` to load {}",
                    path.display()
                ),
            });
        }
        Ok(None)
    }

    /// Release cached resolutions and compiled code. Runs once; a second call
    /// reports `LoaderCloseFailed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(HearthError::LoaderCloseFailed {
                module: self.module.clone(),
                reason: "loader already closed".into(),
            });
        }
        self.cache.lock().clear();
        #[cfg(feature = "wasm")]
        self.engine.lock().take();
        self.footprint.store(0, Ordering::Relaxed);
        debug!(module = %self.module, loader = self.id, "loader closed");
        Ok(())
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("archive", &self.archive)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{ModuleApi, ModuleConfig};

    #[derive(Default)]
    struct Noop;

    impl Module for Noop {
        fn initialize(&mut self, _api: ModuleApi, _config: &ModuleConfig) -> Result<()> {
            Ok(())
        }
        fn disable(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn loader(dir: &Path, host: Arc<HostLoader>) -> ModuleLoader {
        ModuleLoader::new(1, "Foo", dir, host, None)
    }

    #[test]
    fn resolves_host_class_when_absent_locally() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(HostLoader::default());
        host.register_module::<Noop>("Foo");
        let l = loader(dir.path(), host);
        let r = l.resolve("Foo").unwrap();
        assert_eq!(r.origin, Origin::Host);
        assert!(matches!(r.class, ModuleClass::Structural(_)));
    }

    #[test]
    fn shared_api_names_come_from_host() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("hearth/api")).unwrap();
        std::fs::write(dir.path().join("hearth/api/ModuleApi.wasm"), b"\0asm").unwrap();
        let l = loader(dir.path(), Arc::new(HostLoader::default()));
        let r = l.resolve("hearth::api::ModuleApi").unwrap();
        assert_eq!(r.origin, Origin::Host);
        assert!(matches!(r.class, ModuleClass::Opaque));
    }

    #[test]
    fn unknown_class_is_contract_missing() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(dir.path(), Arc::new(HostLoader::default()));
        let err = l.resolve("Nope").unwrap_err();
        assert_eq!(err.kind(), "ContractMissing");
    }

    #[cfg(not(feature = "wasm"))]
    #[test]
    fn local_code_without_wasm_feature_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Foo.wasm"), b"\0asm").unwrap();
        let host = Arc::new(HostLoader::default());
        host.register_module::<Noop>("Foo");
        let l = loader(dir.path(), host);
        let err = l.resolve("Foo").unwrap_err();
        assert!(err.to_string().contains("--features wasm"));
    }

    #[test]
    fn close_runs_once_and_blocks_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(HostLoader::default());
        host.register_module::<Noop>("Foo");
        let l = loader(dir.path(), host);
        l.resolve("Foo").unwrap();
        l.close().unwrap();
        assert!(l.is_closed());
        assert_eq!(l.close().unwrap_err().kind(), "LoaderCloseFailed");
        assert!(l.resolve("Foo").is_err());
    }

    #[test]
    fn local_candidates_cover_path_and_short_name() {
        let l = loader(Path::new("/m/foo"), Arc::new(HostLoader::default()));
        let c = l.local_candidates("com.example.Foo");
        assert_eq!(
            c,
            vec![
                PathBuf::from("/m/foo/com/example/Foo.wasm"),
                PathBuf::from("/m/foo/Foo.wasm")
            ]
        );
        assert_eq!(l.local_candidates("Foo").len(), 1);
    }
}
