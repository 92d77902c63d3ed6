//! Callbacks crossing into the embedded runtime
//!
//! A native function pointer becomes a runtime callable through the factory
//! in the callback module. The module is loaded once per bridge and the
//! wrapper is stored on the `OifCallback`, so each callback is wrapped once.
//! A callback that already belongs to the runtime passes through unwrapped.
//! Callbacks from any other runtime are refused.

use super::{BridgeState, EmbeddedRuntime, WRAPPER_FACTORY};
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::protocol::{ArgPosition, Lang, OifCallback};

pub(super) fn to_runtime<R: EmbeddedRuntime>(
    state: &mut BridgeState<R>,
    callback: &mut OifCallback,
    position: ArgPosition,
) -> Result<R::Value> {
    let lang = state.runtime.lang();

    match callback.origin() {
        None => {
            return Err(DispatchError::new(ErrorKind::UnknownOrigin {
                position,
                raw: callback.origin,
            }))
        }
        Some(origin) if origin == lang => {
            if !callback.has_runtime_value() {
                return Err(DispatchError::new(ErrorKind::SameOriginCallback {
                    position,
                    lang: lang.to_string(),
                }));
            }
            tracing::trace!(%position, "same-origin callback passed through");
            // SAFETY: a same-origin callback carries a reference leaked by this runtime.
            return Ok(unsafe { state.runtime.from_raw(callback.runtime_fn) });
        }
        Some(Lang::C | Lang::Cxx) => {}
        Some(origin) => {
            return Err(DispatchError::new(ErrorKind::ForeignCallback {
                position,
                origin: origin.to_string(),
                target: lang.to_string(),
            }))
        }
    }

    if callback.has_runtime_value() {
        // SAFETY: only `wrap` below fills `runtime_fn` on a C-ABI callback.
        return Ok(unsafe { state.runtime.from_raw(callback.runtime_fn) });
    }
    if callback.native_fn.is_null() {
        return Err(DispatchError::new(ErrorKind::NullCallback { position }));
    }

    let wrapper = wrap(state, callback)?;
    callback.runtime_fn = state.runtime.into_raw(wrapper.clone());
    state.wrappers_built += 1;

    tracing::debug!(%position, native_fn = ?callback.native_fn, "callback wrapped");
    Ok(wrapper)
}

fn wrap<R: EmbeddedRuntime>(state: &mut BridgeState<R>, callback: &OifCallback) -> Result<R::Value> {
    let raised = |e: super::RuntimeException| DispatchError::runtime_exception(e.message);

    let module = match &state.callback_module {
        Some(module) => module.clone(),
        None => {
            let module = state.runtime.load_callback_module().map_err(raised)?;
            state.callback_module = Some(module.clone());
            module
        }
    };

    let factory = state
        .runtime
        .lookup_function(&module, WRAPPER_FACTORY)
        .map_err(raised)?
        .ok_or_else(|| {
            DispatchError::runtime_exception(format!("callback module has no '{}'", WRAPPER_FACTORY))
        })?;

    let fn_ptr = state.runtime.box_pointer(callback.native_fn).map_err(raised)?;
    state.runtime.call(&factory, &[fn_ptr]).map_err(raised)
}
