//! Native backend - implementations in plain shared libraries
//!
//! Architecture:
//! - `library.rs` - dynamic library loading (libloading)
//! - `call.rs` - generic calls through runtime-built call interfaces (libffi)
//!
//! Native calls take no global lock: handle records live in a concurrent
//! map and each call only borrows the caller's argument storage.

mod call;
mod library;

pub use call::invoke;
pub use library::{Library, LoadError, SymbolError};

use dashmap::DashMap;
use std::sync::Arc;

use crate::errors::{DispatchError, ErrorKind, Result};
use crate::lifecycle::{ensure_kind, next_impl_id, Backend, BackendKind, ImplConfig, ImplHandle, ImplId, Version};
use crate::protocol::ArgVector;
use crate::resolver::BackendResolver;

/// Loaded native implementation; pins its library while alive
struct NativeImpl {
    operation: String,
    library: Arc<Library>,
}

pub struct NativeBackend {
    resolver: Arc<BackendResolver>,
    impls: DashMap<ImplId, NativeImpl>,
}

impl NativeBackend {
    pub fn new(resolver: Arc<BackendResolver>) -> Self {
        Self {
            resolver,
            impls: DashMap::new(),
        }
    }

    /// Number of handles not yet unloaded
    pub fn live_handles(&self) -> usize {
        self.impls.len()
    }

    /// Resolve `operation` and call the symbol of the same name in its library.
    pub fn run_interface_method(
        &self,
        operation: &str,
        in_args: &ArgVector<'_>,
        out_args: &ArgVector<'_>,
    ) -> Result<i32> {
        let library = self.resolver.load_library(operation)?;
        call_symbol(&library, operation, in_args, out_args).map_err(|e| e.in_context(operation))
    }
}

fn call_symbol(
    library: &Library,
    symbol: &str,
    in_args: &ArgVector<'_>,
    out_args: &ArgVector<'_>,
) -> Result<i32> {
    let ptr = library.symbol(symbol).map_err(|_| {
        DispatchError::new(ErrorKind::MissingSymbol {
            library: library.path().to_path_buf(),
            symbol: symbol.to_string(),
        })
    })?;

    tracing::debug!(
        symbol,
        library = %library.path().display(),
        num_in = in_args.len(),
        num_out = out_args.len(),
        "calling native method"
    );

    // SAFETY: the symbol was exported by the library, which `library` keeps
    // mapped for the call; its signature is the caller's contract.
    unsafe { invoke(ptr, in_args, out_args) }
}

impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn load_impl(&self, config: &ImplConfig, version: Version) -> Result<ImplHandle> {
        let operation = match config {
            ImplConfig::Native { operation } => operation,
            ImplConfig::Embedded(_) => {
                return Err(DispatchError::new(ErrorKind::BackendMismatch {
                    expected: BackendKind::Native.to_string(),
                    found: "embedded".to_string(),
                }))
            }
        };
        version.check(self.interface_version())?;

        let library = self.resolver.load_library(operation)?;
        let id = next_impl_id()?;
        self.impls.insert(
            id,
            NativeImpl {
                operation: operation.clone(),
                library,
            },
        );

        tracing::info!(operation = %operation, id = id.0, "native implementation loaded");
        Ok(ImplHandle::new(BackendKind::Native, id))
    }

    fn call_impl(
        &self,
        handle: ImplHandle,
        method: &str,
        in_args: &ArgVector<'_>,
        out_args: &ArgVector<'_>,
    ) -> Result<i32> {
        ensure_kind(BackendKind::Native, handle)?;
        // Clone out of the map so the shard is not held across the foreign call.
        let library = self
            .impls
            .get(&handle.id)
            .map(|record| Arc::clone(&record.library))
            .ok_or_else(|| DispatchError::new(ErrorKind::UnknownHandle { id: handle.id.0 }))?;

        call_symbol(&library, method, in_args, out_args)
    }

    fn unload_impl(&self, handle: ImplHandle) -> Result<i32> {
        ensure_kind(BackendKind::Native, handle)?;
        let (_, record) = self
            .impls
            .remove(&handle.id)
            .ok_or_else(|| DispatchError::new(ErrorKind::UnknownHandle { id: handle.id.0 }))?;

        tracing::info!(operation = %record.operation, id = handle.id.0, "native implementation unloaded");
        Ok(0)
    }
}
