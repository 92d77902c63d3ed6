//! Embedded-runtime bridge - implementations hosted in an in-process runtime
//!
//! Architecture:
//! - `details.rs` - which module to load (`ImplDetails`) and its legacy string form
//! - `marshal.rs` - tagged arguments to runtime values, arrays as zero-copy views
//! - `callback.rs` - native function pointers as runtime callables, cached per callback
//! - `python.rs` - the Python runtime (feature `python`)
//!
//! The bridge owns its runtime outright. Every operation locks the bridge
//! state, so the runtime is only ever entered by one thread at a time.

mod callback;
mod details;
mod marshal;
#[cfg(feature = "python")]
mod python;

pub use details::ImplDetails;
#[cfg(feature = "python")]
pub use python::PythonRuntime;

use core::ffi::c_void;
use core::fmt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::lifecycle::{ensure_kind, next_impl_id, Backend, BackendKind, ImplConfig, ImplHandle, ImplId, Version};
use crate::protocol::{ArgVector, Direction, Lang};

/// Name of the zero-argument constructor every implementation module exposes
pub const SELF_CONSTRUCTOR: &str = "Self";

/// Factory in the callback module turning a C function pointer into a callable
pub const WRAPPER_FACTORY: &str = "make_wrapper_over_c_callback";

/// Exception raised inside the embedded runtime, rendered to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeException {
    pub message: String,
}

impl RuntimeException {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeException {}

/// What a method call returned, as far as status mapping cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returned {
    Nothing,
    Int(i64),
    /// Any other value; carries the runtime's type name
    Other(String),
}

/// Capabilities the bridge needs from a hosted runtime.
///
/// Values are the runtime's own references. Methods that can raise return
/// the exception text; the bridge decides which error category it becomes.
pub trait EmbeddedRuntime: Send + 'static {
    type Value: Clone + Send;

    fn lang(&self) -> Lang;

    /// Bring the runtime up. Called at most once.
    fn initialize(&mut self) -> core::result::Result<(), RuntimeException>;

    /// Execute the module at `path` under `name` and return its namespace.
    fn load_module(&mut self, path: &Path, name: &str) -> core::result::Result<Self::Value, RuntimeException>;

    /// Callable `name` in `namespace`, or `None` if it does not exist.
    fn lookup_function(
        &mut self,
        namespace: &Self::Value,
        name: &str,
    ) -> core::result::Result<Option<Self::Value>, RuntimeException>;

    fn call(
        &mut self,
        function: &Self::Value,
        args: &[Self::Value],
    ) -> core::result::Result<Self::Value, RuntimeException>;

    fn box_f64(&mut self, value: f64) -> core::result::Result<Self::Value, RuntimeException>;

    /// Opaque foreign pointer value
    fn box_pointer(&mut self, ptr: *mut c_void) -> core::result::Result<Self::Value, RuntimeException>;

    /// Array value over `data` with the given row-major shape, without copying.
    ///
    /// # Safety
    /// `data` must address the product of `shape` doubles (or be unused when
    /// that product is zero) for as long as the runtime may touch the view.
    unsafe fn array_view(
        &mut self,
        data: *mut f64,
        shape: &[usize],
    ) -> core::result::Result<Self::Value, RuntimeException>;

    /// Namespace holding the callback wrapper factory
    fn load_callback_module(&mut self) -> core::result::Result<Self::Value, RuntimeException>;

    fn classify_return(&mut self, value: &Self::Value) -> Returned;

    /// Leak a reference to `value` as a raw pointer that outlives this call.
    fn into_raw(&mut self, value: Self::Value) -> *mut c_void;

    /// New reference to a value previously leaked with `into_raw`.
    ///
    /// # Safety
    /// `raw` must come from `into_raw` on this runtime and still be leaked.
    unsafe fn from_raw(&mut self, raw: *mut c_void) -> Self::Value;

    /// Teardown hook; runs once, with no handles live.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Pending,
    Ready,
    /// A failed start is never retried
    Failed(String),
    ShutDown,
}

/// Loaded module and its instance
struct EmbeddedImpl<V> {
    module: String,
    namespace: V,
    instance: V,
}

struct BridgeState<R: EmbeddedRuntime> {
    runtime: R,
    init: InitState,
    callback_module: Option<R::Value>,
    impls: HashMap<ImplId, EmbeddedImpl<R::Value>>,
    wrappers_built: usize,
}

impl<R: EmbeddedRuntime> BridgeState<R> {
    fn ensure_initialized(&mut self) -> Result<()> {
        match &self.init {
            InitState::Ready => Ok(()),
            InitState::Pending => match self.runtime.initialize() {
                Ok(()) => {
                    tracing::info!(lang = %self.runtime.lang(), "embedded runtime initialized");
                    self.init = InitState::Ready;
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(lang = %self.runtime.lang(), error = %e, "embedded runtime failed to start");
                    self.init = InitState::Failed(e.message.clone());
                    Err(DispatchError::new(ErrorKind::RuntimeInit { detail: e.message }))
                }
            },
            InitState::Failed(detail) => Err(DispatchError::new(ErrorKind::RuntimeInit {
                detail: detail.clone(),
            })),
            InitState::ShutDown => Err(DispatchError::new(ErrorKind::RuntimeInit {
                detail: "runtime has been shut down".to_string(),
            })),
        }
    }
}

/// Backend hosting implementations inside an embedded runtime
pub struct EmbeddedBridge<R: EmbeddedRuntime> {
    lang: Lang,
    config: DispatchConfig,
    state: Mutex<BridgeState<R>>,
}

impl<R: EmbeddedRuntime> EmbeddedBridge<R> {
    /// Take ownership of `runtime`; it is started on the first load.
    pub fn new(runtime: R, config: DispatchConfig) -> Self {
        Self {
            lang: runtime.lang(),
            config,
            state: Mutex::new(BridgeState {
                runtime,
                init: InitState::Pending,
                callback_module: None,
                impls: HashMap::new(),
                wrappers_built: 0,
            }),
        }
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    /// Load the module described by `details` and instantiate its `Self`.
    pub fn load_module(&self, details: &ImplDetails, version: Version) -> Result<ImplHandle> {
        version.check(self.interface_version())?;

        let path = details.resolve(&self.config.impl_dir()?);
        if !path.is_file() {
            return Err(DispatchError::new(ErrorKind::ModuleNotFound { path }));
        }

        let mut state = self.state.lock();
        state.ensure_initialized()?;

        let module = details.qualified_name.as_str();
        let load_err = |e: RuntimeException| {
            DispatchError::new(ErrorKind::ModuleLoad {
                module: module.to_string(),
                detail: e.message,
            })
        };

        let namespace = state.runtime.load_module(&path, module).map_err(load_err)?;
        let constructor = state
            .runtime
            .lookup_function(&namespace, SELF_CONSTRUCTOR)
            .map_err(load_err)?
            .ok_or_else(|| DispatchError::new(ErrorKind::MissingConstructor { module: module.to_string() }))?;
        let instance = state.runtime.call(&constructor, &[]).map_err(load_err)?;

        let id = next_impl_id()?;
        state.impls.insert(
            id,
            EmbeddedImpl {
                module: module.to_string(),
                namespace,
                instance,
            },
        );

        tracing::info!(module, path = %path.display(), id = id.0, "embedded implementation loaded");
        Ok(ImplHandle::new(self.kind(), id))
    }

    /// Run the runtime's teardown hook.
    ///
    /// Refused while any handle is live; afterwards the bridge rejects all work.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.impls.is_empty() {
            return Err(DispatchError::new(ErrorKind::LiveHandles { count: state.impls.len() }));
        }
        if state.init == InitState::Ready {
            state.callback_module = None;
            state.runtime.shutdown();
            tracing::info!(lang = %self.lang, "embedded runtime shut down");
        }
        state.init = InitState::ShutDown;
        Ok(())
    }

    /// Number of callback wrappers constructed so far
    pub fn callback_wrappers_built(&self) -> usize {
        self.state.lock().wrappers_built
    }

    /// Module names of the live handles, sorted by id
    pub fn loaded(&self) -> Vec<(ImplId, String)> {
        let state = self.state.lock();
        let mut loaded: Vec<_> = state.impls.iter().map(|(id, i)| (*id, i.module.clone())).collect();
        loaded.sort();
        loaded
    }

    /// Run `f` against the runtime under the bridge lock.
    pub fn with_runtime<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.state.lock().runtime)
    }
}

impl<R: EmbeddedRuntime> Backend for EmbeddedBridge<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded(self.lang)
    }

    fn load_impl(&self, config: &ImplConfig, version: Version) -> Result<ImplHandle> {
        match config {
            ImplConfig::Embedded(details) => self.load_module(details, version),
            ImplConfig::Native { .. } => Err(DispatchError::new(ErrorKind::BackendMismatch {
                expected: self.kind().to_string(),
                found: BackendKind::Native.to_string(),
            })),
        }
    }

    fn call_impl(
        &self,
        handle: ImplHandle,
        method: &str,
        in_args: &ArgVector<'_>,
        out_args: &ArgVector<'_>,
    ) -> Result<i32> {
        ensure_kind(self.kind(), handle)?;
        let inputs = in_args.decode(Direction::Input)?;
        let outputs = out_args.decode(Direction::Output)?;

        // The receiver takes the first slot.
        let count = 1 + inputs.len() + outputs.len();
        if count > i32::MAX as usize {
            return Err(DispatchError::new(ErrorKind::TooManyArgs { count }));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (namespace, instance) = state
            .impls
            .get(&handle.id)
            .map(|i| (i.namespace.clone(), i.instance.clone()))
            .ok_or_else(|| DispatchError::new(ErrorKind::UnknownHandle { id: handle.id.0 }))?;

        let function = state
            .runtime
            .lookup_function(&namespace, method)
            .map_err(|e| DispatchError::runtime_exception(e.message))?
            .ok_or_else(|| {
                DispatchError::new(ErrorKind::MissingMethod {
                    method: method.to_string(),
                    handle: handle.id.0,
                })
            })?;

        let mut args = Vec::with_capacity(count);
        args.push(instance);
        marshal::convert_all(state, &inputs, Direction::Input, &mut args)?;
        marshal::convert_all(state, &outputs, Direction::Output, &mut args)?;

        tracing::debug!(method, id = handle.id.0, num_args = args.len(), "calling embedded method");
        let result = state.runtime.call(&function, &args).map_err(|e| {
            tracing::warn!(method, id = handle.id.0, "embedded method raised");
            DispatchError::runtime_exception(e.message)
        })?;

        match state.runtime.classify_return(&result) {
            Returned::Nothing => Ok(0),
            Returned::Int(status) => i32::try_from(status).map_err(|_| {
                DispatchError::new(ErrorKind::UnsupportedReturn {
                    method: method.to_string(),
                    found: format!("integer {} outside the status range", status),
                })
            }),
            Returned::Other(found) => Err(DispatchError::new(ErrorKind::UnsupportedReturn {
                method: method.to_string(),
                found,
            })),
        }
    }

    fn unload_impl(&self, handle: ImplHandle) -> Result<i32> {
        ensure_kind(self.kind(), handle)?;
        let record = self
            .state
            .lock()
            .impls
            .remove(&handle.id)
            .ok_or_else(|| DispatchError::new(ErrorKind::UnknownHandle { id: handle.id.0 }))?;

        tracing::info!(module = %record.module, id = handle.id.0, "embedded implementation unloaded");
        Ok(0)
    }
}

impl<R: EmbeddedRuntime> fmt::Debug for EmbeddedBridge<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EmbeddedBridge")
            .field("lang", &self.lang)
            .field("init", &state.init)
            .field("live_handles", &state.impls.len())
            .field("wrappers_built", &state.wrappers_built)
            .finish()
    }
}
