use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RuntimeError};
use crate::service::ServiceHandle;

/// Four-entry-point ABI a native service module implements. Method names
/// mirror the original C-ABI symbols prefixed by the module's bare name
/// (last dotted component): `create` -> `<name>_create`, and so on.
pub trait ServiceModule: Send + Sync {
    /// Allocate the module's private instance state. Default instances that
    /// need no state may return `Box::new(())`.
    fn create(&self) -> Box<dyn Any + Send>;

    /// Initialize `instance` for `service`, typically registering the
    /// service's message callback via [`ServiceHandle::set_callback`].
    fn init(
        &self,
        instance: &mut dyn Any,
        service: &ServiceHandle,
        param: &str,
    ) -> Result<()>;

    /// Tear down `instance`. Called once the service's refcount reaches
    /// zero.
    fn release(&self, instance: Box<dyn Any + Send>);

    /// Deliver an out-of-band signal (distinct from the message stream) into
    /// the module instance.
    fn signal(&self, instance: &mut dyn Any, signal: i32);
}

/// Cached descriptor for a resolved module. A static, in-process
/// `ServiceModule` and a `libloading`-resolved native library share this one
/// representation, so the dispatcher and `context_new` do not need to know
/// which path produced it.
pub struct ModuleDescriptor {
    pub name: String,
    pub module: Arc<dyn ServiceModule>,
    /// Held for its lifetime only when this descriptor wraps a dynamically
    /// loaded library; kept alongside the resolved trait object so the
    /// library is not unloaded while services still reference it.
    _library: Option<Arc<libloading::Library>>,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("dynamic", &self._library.is_some())
            .finish()
    }
}

/// Fixed-size (by default) table of resolved modules, deduplicated by name.
/// The 32-entry cap in the original design is treated as a configurable
/// default rather than a hard limit.
pub struct ModuleRegistry {
    cpath: Option<String>,
    max_modules: usize,
    modules: Mutex<HashMap<String, Arc<ModuleDescriptor>>>,
}

impl ModuleRegistry {
    pub fn new(cpath: Option<String>) -> Self {
        Self {
            cpath,
            max_modules: 32,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_modules(mut self, max_modules: usize) -> Self {
        self.max_modules = max_modules;
        self
    }

    /// Register a compile-time module ahead of any dynamic lookup.
    pub fn register_static(&self, name: impl Into<String>, module: Arc<dyn ServiceModule>) {
        let name = name.into();
        self.modules.lock().insert(
            name.clone(),
            Arc::new(ModuleDescriptor {
                name,
                module,
                _library: None,
            }),
        );
    }

    /// Resolve `name`, consulting the static table first and falling back to
    /// `cpath`-templated dynamic loading (`?` substituted with `name`) when
    /// configured and the name is not already cached.
    pub fn resolve(&self, name: &str) -> Result<Arc<ModuleDescriptor>> {
        if let Some(desc) = self.modules.lock().get(name) {
            return Ok(desc.clone());
        }

        let mut modules = self.modules.lock();
        if let Some(desc) = modules.get(name) {
            return Ok(desc.clone());
        }
        if modules.len() >= self.max_modules {
            return Err(RuntimeError::ModuleTableFull {
                max: self.max_modules,
            });
        }

        let Some(template) = &self.cpath else {
            return Err(RuntimeError::ModuleNotFound(name.to_string()));
        };

        let path = template.replace('?', name);
        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|source| RuntimeError::DynamicLoad { path, source })?;
        let library = Arc::new(library);
        let dynamic = Arc::new(DynamicModule::load(name, library.clone())?);

        let desc = Arc::new(ModuleDescriptor {
            name: name.to_string(),
            module: dynamic,
            _library: Some(library),
        });
        modules.insert(name.to_string(), desc.clone());
        Ok(desc)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modules.try_lock() {
            Some(m) => f
                .debug_struct("ModuleRegistry")
                .field("cpath", &self.cpath)
                .field("loaded", &m.len())
                .finish(),
            None => f.debug_struct("ModuleRegistry").finish(),
        }
    }
}

type CreateFn = unsafe extern "C" fn() -> *mut std::ffi::c_void;
type InitFn =
    unsafe extern "C" fn(*mut std::ffi::c_void, u32, *const std::ffi::c_char) -> i32;
type ReleaseFn = unsafe extern "C" fn(*mut std::ffi::c_void);
type SignalFn = unsafe extern "C" fn(*mut std::ffi::c_void, i32);

/// Adapts a dynamically loaded native library's four C-ABI symbols
/// (`<name>_create`, `<name>_init`, `<name>_release`, `<name>_signal`) to the
/// in-process [`ServiceModule`] trait, so the dispatcher's view of a module
/// is identical whether it was registered statically or loaded from disk.
struct DynamicModule {
    create: CreateFn,
    init: InitFn,
    release: ReleaseFn,
    signal: SignalFn,
}

/// Opaque pointer returned by a native module's `create`. Boxed so release
/// still runs through `ServiceModule::release`'s owned-instance contract.
struct RawInstance(*mut std::ffi::c_void);
unsafe impl Send for RawInstance {}

impl DynamicModule {
    fn load(name: &str, library: Arc<libloading::Library>) -> Result<Self> {
        unsafe {
            let create = *library
                .get::<CreateFn>(format!("{name}_create\0").as_bytes())
                .map_err(|e| RuntimeError::SymbolResolution(format!("{name}_create: {e}")))?;
            let init = *library
                .get::<InitFn>(format!("{name}_init\0").as_bytes())
                .map_err(|e| RuntimeError::SymbolResolution(format!("{name}_init: {e}")))?;
            let release = *library
                .get::<ReleaseFn>(format!("{name}_release\0").as_bytes())
                .map_err(|e| RuntimeError::SymbolResolution(format!("{name}_release: {e}")))?;
            let signal = *library
                .get::<SignalFn>(format!("{name}_signal\0").as_bytes())
                .map_err(|e| RuntimeError::SymbolResolution(format!("{name}_signal: {e}")))?;
            Ok(Self {
                create,
                init,
                release,
                signal,
            })
        }
    }
}

impl ServiceModule for DynamicModule {
    fn create(&self) -> Box<dyn Any + Send> {
        let ptr = unsafe { (self.create)() };
        Box::new(RawInstance(ptr))
    }

    fn init(&self, instance: &mut dyn Any, service: &ServiceHandle, param: &str) -> Result<()> {
        let raw = instance
            .downcast_mut::<RawInstance>()
            .expect("dynamic module instance type mismatch");
        let cparam = std::ffi::CString::new(param).unwrap_or_default();
        let rc = unsafe { (self.init)(raw.0, service.handle().raw(), cparam.as_ptr()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(RuntimeError::InitFailed {
                module: "dynamic".to_string(),
                reason: format!("native init returned {rc}"),
            })
        }
    }

    fn release(&self, instance: Box<dyn Any + Send>) {
        if let Ok(raw) = instance.downcast::<RawInstance>() {
            unsafe { (self.release)(raw.0) };
        }
    }

    fn signal(&self, instance: &mut dyn Any, signal: i32) {
        if let Some(raw) = instance.downcast_mut::<RawInstance>() {
            unsafe { (self.signal)(raw.0, signal) };
        }
    }
}
