//! Callback values crossing runtime boundaries

use core::ffi::c_void;
use core::fmt;
use core::ptr;

/// Language a value originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Lang {
    C = 1,
    Cxx = 2,
    Python = 3,
    Julia = 4,
    R = 5,
}

impl Lang {
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::C => "C",
            Self::Cxx => "C++",
            Self::Python => "Python",
            Self::Julia => "Julia",
            Self::R => "R",
        }
    }
}

impl TryFrom<i32> for Lang {
    type Error = i32;

    fn try_from(raw: i32) -> Result<Self, i32> {
        [Self::C, Self::Cxx, Self::Python, Self::Julia, Self::R]
            .into_iter()
            .find(|l| l.code() == raw)
            .ok_or(raw)
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A function value usable from both sides of a bridge.
///
/// Exactly one pointer is set on construction, the one matching `origin`.
/// The other is filled in the first time the callback crosses into the
/// other runtime and reused afterwards.
#[repr(C)]
#[derive(Debug)]
pub struct OifCallback {
    /// `Lang` code of the function's origin
    pub origin: i32,
    /// Callable value owned by the embedded runtime
    pub runtime_fn: *mut c_void,
    /// C-ABI function pointer
    pub native_fn: *mut c_void,
}

impl OifCallback {
    /// Wrap a C-callable function pointer.
    pub fn from_native(native_fn: *mut c_void) -> Self {
        Self {
            origin: Lang::C.code(),
            runtime_fn: ptr::null_mut(),
            native_fn,
        }
    }

    /// Wrap a value owned by an embedded runtime.
    pub fn from_runtime(lang: Lang, runtime_fn: *mut c_void) -> Self {
        Self {
            origin: lang.code(),
            runtime_fn,
            native_fn: ptr::null_mut(),
        }
    }

    pub fn origin(&self) -> Option<Lang> {
        Lang::try_from(self.origin).ok()
    }

    pub fn has_runtime_value(&self) -> bool {
        !self.runtime_fn.is_null()
    }
}
