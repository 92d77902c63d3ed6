//! Dynamic library loading and symbol resolution
//!
//! Thin wrapper over `libloading` that remembers where a library came from,
//! so missing symbols can be reported against a path.

use core::ffi::c_void;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Handle to a dynamically loaded library; closed on drop
pub struct Library {
    inner: libloading::Library,
    path: PathBuf,
}

impl Library {
    /// Load a library from `path` with lazy binding and local symbol scope.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        if path.as_os_str().is_empty() {
            return Err(LoadError::InvalidName);
        }
        Self::open_impl(path).map(|inner| Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    fn open_impl(path: &Path) -> Result<libloading::Library, LoadError> {
        use libloading::os::unix;

        // SAFETY: running a library's initializers is the point of loading it.
        unsafe {
            unix::Library::open(Some(path), unix::RTLD_LAZY | unix::RTLD_LOCAL)
                .map(libloading::Library::from)
                .map_err(|e| LoadError::LoadFailed(e.to_string()))
        }
    }

    #[cfg(not(unix))]
    fn open_impl(path: &Path) -> Result<libloading::Library, LoadError> {
        // SAFETY: see the unix variant.
        unsafe { libloading::Library::new(path).map_err(|e| LoadError::LoadFailed(e.to_string())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a function pointer by symbol name
    pub fn symbol(&self, name: &str) -> Result<*const c_void, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;

        // SAFETY: the address is only handed out as an untyped pointer; callers
        // decide its signature and keep `self` alive while using it.
        let ptr = unsafe {
            self.inner
                .get::<*const c_void>(cname.as_bytes_with_nul())
                .map(|sym| *sym)
                .map_err(|_| SymbolError::NotFound)?
        };

        if ptr.is_null() {
            Err(SymbolError::NotFound)
        } else {
            Ok(ptr)
        }
    }
}

impl core::fmt::Debug for Library {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

/// Library loading errors
#[derive(Debug)]
pub enum LoadError {
    InvalidName,
    LoadFailed(String),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid library name"),
            Self::LoadFailed(msg) => write!(f, "Failed to load library: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug, PartialEq, Eq)]
pub enum SymbolError {
    InvalidName,
    NotFound,
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid symbol name"),
            Self::NotFound => write!(f, "Symbol not found"),
        }
    }
}

impl std::error::Error for SymbolError {}
