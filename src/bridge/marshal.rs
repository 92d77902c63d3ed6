//! Tagged arguments to embedded-runtime values

use super::{callback, BridgeState, EmbeddedRuntime};
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::protocol::{ArgPosition, ArgRef, Direction};

/// Convert decoded arguments in order, appending to `into`.
pub(super) fn convert_all<R: EmbeddedRuntime>(
    state: &mut BridgeState<R>,
    args: &[ArgRef],
    direction: Direction,
    into: &mut Vec<R::Value>,
) -> Result<()> {
    for (index, &arg) in args.iter().enumerate() {
        let position = ArgPosition::new(direction, index);
        into.push(convert(state, arg, position)?);
    }
    Ok(())
}

fn convert<R: EmbeddedRuntime>(
    state: &mut BridgeState<R>,
    arg: ArgRef,
    position: ArgPosition,
) -> Result<R::Value> {
    let raised = |e: super::RuntimeException| DispatchError::runtime_exception(e.message);

    match arg {
        // SAFETY: decoded pointers are non-null and address storage of their tag.
        ArgRef::Float64(value) => state.runtime.box_f64(unsafe { *value }).map_err(raised),
        ArgRef::ArrayF64(array) => {
            let array = unsafe { *array };
            let shape = unsafe { array.shape() }.map_err(|e| {
                DispatchError::new(ErrorKind::MalformedArray {
                    position,
                    detail: e.to_string(),
                })
            })?;
            tracing::trace!(%position, ?shape, "array view");
            // SAFETY: `shape` validated the descriptor; the caller keeps the buffer
            // alive for the call.
            unsafe { state.runtime.array_view(array.data, &shape) }.map_err(raised)
        }
        ArgRef::Callback(cb) => callback::to_runtime(state, unsafe { &mut *cb }, position),
        other => Err(DispatchError::new(ErrorKind::UnsupportedTag {
            position,
            tag: other.tag(),
        })),
    }
}
