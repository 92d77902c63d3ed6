//! C API for hosts written in C, C++ or any language with a C FFI
//!
//! Design: every entry point returns an `int`. Non-negative values are
//! results (backend codes, handle ids, method statuses); `OIF_ERROR` and
//! `OIF_IMPL_INIT_ERROR` report failures, which are logged with their full
//! message. Panics never cross the boundary.

use std::any::Any;
use std::ffi::c_char;
use std::panic::{self, AssertUnwindSafe};

use super::{c_str, dispatcher, forget, lookup, register};
use crate::errors::{DispatchError, ErrorKind, Result, OIF_ERROR};
use crate::lifecycle::{BackendKind, ImplConfig, Version};
use crate::logging;
use crate::protocol::{ArgPosition, ArgVector, Direction, OifArgs};

fn guarded(entry_point: &str, f: impl FnOnce() -> Result<i32>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            logging::log_call_failure(entry_point, &err);
            err.status_code()
        }
        Err(payload) => {
            logging::log_panic(entry_point, panic_message(payload.as_ref()));
            OIF_ERROR
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

fn version(major: usize, minor: usize) -> Version {
    // Out-of-range requests can never be compatible; saturating keeps them so.
    Version::new(
        u32::try_from(major).unwrap_or(u32::MAX),
        u32::try_from(minor).unwrap_or(u32::MAX),
    )
}

/// # Safety
/// `raw` must be null or point at a valid argument vector for `'a`.
unsafe fn arg_vector<'a>(raw: *const OifArgs, direction: Direction) -> Result<ArgVector<'a>> {
    match raw.as_ref() {
        Some(raw) => ArgVector::from_raw(raw, direction),
        None => Err(DispatchError::new(ErrorKind::NullArgument {
            position: ArgPosition::new(direction, 0),
        })),
    }
}

/// Select the backend implementing `operation`.
///
/// Returns the backend's language code (1 for native libraries).
///
/// # Safety
/// `operation` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn oif_load_backend(
    operation: *const c_char,
    version_major: usize,
    version_minor: usize,
) -> i32 {
    guarded("oif_load_backend", || {
        let operation = c_str(operation, "operation name")?;
        let requested = version(version_major, version_minor);
        let kind = dispatcher()?.load_backend(operation, requested.major, requested.minor)?;
        Ok(kind.code())
    })
}

/// Load an implementation through backend `backend` and return its handle id.
///
/// `details` is the operation name for native libraries and
/// `"<module-path> <qualified-name>"` for embedded runtimes.
///
/// # Safety
/// `details` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn oif_load_impl(
    backend: i32,
    details: *const c_char,
    version_major: usize,
    version_minor: usize,
) -> i32 {
    guarded("oif_load_impl", || {
        let details = c_str(details, "implementation details")?;
        let kind = BackendKind::from_code(backend).ok_or_else(|| {
            DispatchError::new(ErrorKind::UnregisteredBackend {
                backend: format!("code {}", backend),
            })
        })?;
        let config = ImplConfig::from_legacy(kind, details)?;
        let handle = dispatcher()?.load_impl_as(kind, &config, version(version_major, version_minor))?;
        Ok(register(handle))
    })
}

/// Call `method` on a loaded implementation and return its status.
///
/// # Safety
/// `method` must be a NUL-terminated string; `in_args` and `out_args` must
/// describe valid argument vectors whose storage outlives the call.
#[no_mangle]
pub unsafe extern "C" fn oif_call_impl(
    handle: i32,
    method: *const c_char,
    in_args: *const OifArgs,
    out_args: *const OifArgs,
) -> i32 {
    guarded("oif_call_impl", || {
        let method = c_str(method, "method name")?;
        let handle = lookup(handle)?;
        let in_args = arg_vector(in_args, Direction::Input)?;
        let out_args = arg_vector(out_args, Direction::Output)?;
        dispatcher()?.call_impl(handle, method, &in_args, &out_args)
    })
}

/// Release a handle. A second unload of the same id fails.
#[no_mangle]
pub extern "C" fn oif_unload_impl(handle: i32) -> i32 {
    guarded("oif_unload_impl", || {
        let id = handle;
        let handle = lookup(id)?;
        let status = dispatcher()?.unload_impl(handle)?;
        forget(id);
        Ok(status)
    })
}

/// Resolve `operation` to its native library and call the function of the same name.
///
/// # Safety
/// Same as [`oif_call_impl`].
#[no_mangle]
pub unsafe extern "C" fn oif_run_interface_method(
    operation: *const c_char,
    in_args: *const OifArgs,
    out_args: *const OifArgs,
) -> i32 {
    guarded("oif_run_interface_method", || {
        let operation = c_str(operation, "operation name")?;
        let in_args = arg_vector(in_args, Direction::Input)?;
        let out_args = arg_vector(out_args, Direction::Output)?;
        dispatcher()?
            .native()
            .run_interface_method(operation, &in_args, &out_args)
    })
}
