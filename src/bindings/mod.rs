//! Foreign-language entry points
//!
//! The C surface works on integer handle ids; this module owns the
//! process-global dispatcher behind them and the id to handle table.

pub mod c_api;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::ffi::{c_char, CStr};

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::lifecycle::{Dispatcher, ImplHandle};
use crate::logging;

static DISPATCHER: OnceCell<Dispatcher> = OnceCell::new();

/// Handles handed out across the C ABI, keyed by their integer id
static HANDLES: Lazy<DashMap<i32, ImplHandle>> = Lazy::new(DashMap::new);

/// Process-global dispatcher, configured from the environment on first use.
pub fn dispatcher() -> Result<&'static Dispatcher> {
    DISPATCHER.get_or_try_init(|| {
        logging::init();
        let config = DispatchConfig::from_env()?;
        build_dispatcher(config)
    })
}

#[cfg(not(feature = "python"))]
fn build_dispatcher(config: DispatchConfig) -> Result<Dispatcher> {
    Dispatcher::new(&config)
}

#[cfg(feature = "python")]
fn build_dispatcher(config: DispatchConfig) -> Result<Dispatcher> {
    use crate::bridge::{EmbeddedBridge, PythonRuntime};

    let runtime = PythonRuntime::acquire()?;
    let dispatcher = Dispatcher::new(&config)?;
    Ok(dispatcher.with_embedded(Box::new(EmbeddedBridge::new(runtime, config))))
}

pub(crate) fn register(handle: ImplHandle) -> i32 {
    HANDLES.insert(handle.id.0, handle);
    handle.id.0
}

pub(crate) fn lookup(id: i32) -> Result<ImplHandle> {
    HANDLES
        .get(&id)
        .map(|h| *h)
        .ok_or_else(|| DispatchError::new(ErrorKind::UnknownHandle { id }))
}

pub(crate) fn forget(id: i32) {
    HANDLES.remove(&id);
}

/// Borrow a NUL-terminated UTF-8 string from C.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string valid for `'a`.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    let invalid = |reason: &str| {
        DispatchError::new(ErrorKind::InvalidString {
            what: what.to_string(),
            reason: reason.to_string(),
        })
    };
    if ptr.is_null() {
        return Err(invalid("null pointer"));
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| invalid("not valid UTF-8"))
}
