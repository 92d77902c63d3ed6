//! Generic calls into C-ABI functions
//!
//! The call interface is built at runtime from the argument tags, so any
//! exported `int f(double..., OIFArrayF64*...)` can be reached without a
//! compiled-in binding.

use core::ffi::c_void;
use core::ptr::{self, addr_of_mut};

use libffi::low::{
    call, ffi_abi_FFI_DEFAULT_ABI, ffi_arg, ffi_cif, ffi_type, prep_cif, types, CodePtr,
};
use smallvec::SmallVec;

use crate::errors::{DispatchError, ErrorKind, Result};
use crate::protocol::{ArgPosition, ArgRef, ArgVector, Direction};

/// Most interface methods take a handful of arguments
type ArgBuf<T> = SmallVec<[T; 8]>;

/// Native type descriptor for one decoded argument.
///
/// Only `double` and pointer-to-descriptor arguments are reachable through
/// the C ABI; everything else is rejected with its position.
fn ffi_type_for(arg: &ArgRef, position: ArgPosition) -> Result<*mut ffi_type> {
    // SAFETY: libffi's builtin descriptors are statics that are only read.
    unsafe {
        match arg {
            ArgRef::Float64(_) => Ok(addr_of_mut!(types::double)),
            ArgRef::ArrayF64(_) => Ok(addr_of_mut!(types::pointer)),
            other => Err(DispatchError::new(ErrorKind::UnsupportedTag {
                position,
                tag: other.tag(),
            })),
        }
    }
}

fn collect_types(
    args: &ArgVector<'_>,
    direction: Direction,
    into: &mut ArgBuf<*mut ffi_type>,
) -> Result<()> {
    for (index, arg) in args.decode(direction)?.iter().enumerate() {
        into.push(ffi_type_for(arg, ArgPosition::new(direction, index))?);
    }
    Ok(())
}

/// Call `symbol` with inputs followed by outputs and return its status.
///
/// Argument addresses are the caller's own value pointers: doubles are read
/// in place and output arrays are written through the same descriptors.
///
/// # Safety
/// `symbol` must be a function with the C signature implied by the tags,
/// returning `int`, and every value pointer must be valid for the call.
pub unsafe fn invoke(
    symbol: *const c_void,
    in_args: &ArgVector<'_>,
    out_args: &ArgVector<'_>,
) -> Result<i32> {
    let total = in_args.len() + out_args.len();
    if total > i32::MAX as usize {
        return Err(DispatchError::new(ErrorKind::TooManyArgs { count: total }));
    }

    let mut arg_types: ArgBuf<*mut ffi_type> = SmallVec::with_capacity(total);
    collect_types(in_args, Direction::Input, &mut arg_types)?;
    collect_types(out_args, Direction::Output, &mut arg_types)?;

    let mut arg_values: ArgBuf<*mut c_void> = SmallVec::with_capacity(total);
    arg_values.extend_from_slice(in_args.values());
    arg_values.extend_from_slice(out_args.values());

    // `cif` keeps a pointer into `arg_types`; both stay put until the call returns.
    let mut cif: ffi_cif = core::mem::zeroed();
    let atypes = if total > 0 { arg_types.as_mut_ptr() } else { ptr::null_mut() };
    prep_cif(
        &mut cif,
        ffi_abi_FFI_DEFAULT_ABI,
        total,
        addr_of_mut!(types::uint32),
        atypes,
    )
    .map_err(|e| DispatchError::new(ErrorKind::CallInterface { detail: format!("{:?}", e) }))?;

    let values = if total > 0 { arg_values.as_mut_ptr() } else { ptr::null_mut() };
    // Integral returns narrower than a register are widened into a full `ffi_arg`.
    let raw: ffi_arg = call::<ffi_arg>(&mut cif, CodePtr::from_ptr(symbol), values);

    tracing::trace!(num_args = total, status = raw as u32, "native call returned");
    Ok(raw as u32 as i32)
}
