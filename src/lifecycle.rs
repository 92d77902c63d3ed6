//! Implementation handle lifecycle - `load_impl` / `call_impl` / `unload_impl`
//!
//! Every backend satisfies [`Backend`]; callers hold an opaque [`ImplHandle`]
//! and go through a [`Dispatcher`], which routes by backend kind.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::bridge::ImplDetails;
use crate::config::DispatchConfig;
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::native::NativeBackend;
use crate::protocol::{ArgVector, Lang};
use crate::resolver::{Artifact, BackendResolver};

/// Which runtime family an implementation was loaded through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Plain shared libraries reached through the C ABI
    Native,
    /// A high-level runtime hosted inside this process
    Embedded(Lang),
}

impl BackendKind {
    /// Numeric identifier used across the C ABI (the backend's language code)
    pub const fn code(self) -> i32 {
        match self {
            Self::Native => Lang::C.code(),
            Self::Embedded(lang) => lang.code(),
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match Lang::try_from(code).ok()? {
            Lang::C => Some(Self::Native),
            lang => Some(Self::Embedded(lang)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Embedded(lang) => write!(f, "embedded {}", lang),
        }
    }
}

/// Identifier of a loaded implementation, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImplId(pub i32);

static NEXT_IMPL_ID: AtomicI32 = AtomicI32::new(1);

pub(crate) fn next_impl_id() -> Result<ImplId> {
    allocate_id(&NEXT_IMPL_ID)
}

/// Ids stay positive and are never reused; running out is an error.
fn allocate_id(counter: &AtomicI32) -> Result<ImplId> {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        .map(ImplId)
        .map_err(|_| DispatchError::new(ErrorKind::HandlesExhausted))
}

impl fmt::Display for ImplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a loaded implementation.
///
/// The record behind it lives in the owning backend's table, so unloading
/// twice is reported instead of freeing twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImplHandle {
    pub kind: BackendKind,
    pub id: ImplId,
}

impl ImplHandle {
    pub(crate) fn new(kind: BackendKind, id: ImplId) -> Self {
        Self { kind, id }
    }
}

/// Interface version requested by a caller or supported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Same major, and no newer minor than what is supported
    pub fn is_compatible_with(self, supported: Version) -> bool {
        self.major == supported.major && self.minor <= supported.minor
    }

    pub fn check(self, supported: Version) -> Result<()> {
        if self.is_compatible_with(supported) {
            Ok(())
        } else {
            Err(DispatchError::new(ErrorKind::VersionMismatch {
                requested: self.to_string(),
                supported: supported.to_string(),
            }))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Structured description of what to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImplConfig {
    /// Operation resolved through the native library table
    Native { operation: String },
    /// Module hosted by the embedded runtime
    Embedded(ImplDetails),
}

impl ImplConfig {
    /// Decode the legacy string form for the given backend kind.
    pub fn from_legacy(kind: BackendKind, details: &str) -> Result<Self> {
        match kind {
            BackendKind::Native => {
                if details.is_empty() || details.contains(char::is_whitespace) {
                    return Err(DispatchError::new(ErrorKind::MalformedDetails {
                        details: details.to_string(),
                        reason: "expected a single operation name".to_string(),
                    }));
                }
                Ok(Self::Native { operation: details.to_string() })
            }
            BackendKind::Embedded(_) => ImplDetails::parse(details).map(Self::Embedded),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Native { operation } => operation.clone(),
            Self::Embedded(details) => details.qualified_name.clone(),
        }
    }
}

/// Contract shared by every backend kind
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn interface_version(&self) -> Version {
        Version::new(1, 0)
    }

    fn load_impl(&self, config: &ImplConfig, version: Version) -> Result<ImplHandle>;

    fn call_impl(
        &self,
        handle: ImplHandle,
        method: &str,
        in_args: &ArgVector<'_>,
        out_args: &ArgVector<'_>,
    ) -> Result<i32>;

    fn unload_impl(&self, handle: ImplHandle) -> Result<i32>;
}

/// Reject a handle that was produced by a different backend kind.
pub(crate) fn ensure_kind(expected: BackendKind, handle: ImplHandle) -> Result<()> {
    if handle.kind == expected {
        Ok(())
    } else {
        Err(DispatchError::new(ErrorKind::BackendMismatch {
            expected: expected.to_string(),
            found: handle.kind.to_string(),
        }))
    }
}

/// Caller-facing entry point routing handles to their backends
pub struct Dispatcher {
    resolver: Arc<BackendResolver>,
    native: Arc<NativeBackend>,
    embedded: Option<Box<dyn Backend>>,
}

impl Dispatcher {
    /// Dispatcher with the native backend only
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let resolver = Arc::new(BackendResolver::new(config)?);
        let native = Arc::new(NativeBackend::new(Arc::clone(&resolver)));
        Ok(Self {
            resolver,
            native,
            embedded: None,
        })
    }

    /// Register the embedded-runtime backend; one per process.
    pub fn with_embedded(mut self, backend: Box<dyn Backend>) -> Self {
        self.embedded = Some(backend);
        self
    }

    pub fn resolver(&self) -> &BackendResolver {
        &self.resolver
    }

    pub fn native(&self) -> &NativeBackend {
        &self.native
    }

    fn backend(&self, kind: BackendKind) -> Result<&dyn Backend> {
        match kind {
            BackendKind::Native => Ok(self.native.as_ref()),
            BackendKind::Embedded(_) => match &self.embedded {
                Some(backend) if backend.kind() == kind => Ok(backend.as_ref()),
                _ => Err(DispatchError::new(ErrorKind::UnregisteredBackend {
                    backend: kind.to_string(),
                })),
            },
        }
    }

    fn embedded_backend(&self) -> Result<&dyn Backend> {
        self.embedded.as_deref().ok_or_else(|| {
            DispatchError::new(ErrorKind::UnregisteredBackend {
                backend: "embedded".to_string(),
            })
        })
    }

    /// Pick the backend implementing `operation` and check the requested version.
    pub fn load_backend(&self, operation: &str, major: u32, minor: u32) -> Result<BackendKind> {
        let backend = match self.resolver.artifact(operation)? {
            Artifact::Native { .. } => self.native.as_ref() as &dyn Backend,
            Artifact::Embedded { .. } => self.embedded_backend().map_err(|e| e.in_context(operation))?,
        };

        Version::new(major, minor)
            .check(backend.interface_version())
            .map_err(|e| e.in_context(operation))?;

        tracing::debug!(operation, backend = %backend.kind(), "backend selected");
        Ok(backend.kind())
    }

    /// Load through whichever backend handles `config`'s kind.
    pub fn load_impl(&self, config: &ImplConfig, version: Version) -> Result<ImplHandle> {
        let kind = match config {
            ImplConfig::Native { .. } => BackendKind::Native,
            ImplConfig::Embedded(_) => self.embedded_backend()?.kind(),
        };
        self.load_impl_as(kind, config, version)
    }

    /// Load through the backend of exactly `kind`, failing if none is registered.
    pub fn load_impl_as(&self, kind: BackendKind, config: &ImplConfig, version: Version) -> Result<ImplHandle> {
        self.backend(kind)
            .and_then(|backend| backend.load_impl(config, version))
            .map_err(|e| e.in_context(config.label()))
    }

    /// Resolve `operation` through the table and load it.
    pub fn load_operation(&self, operation: &str, version: Version) -> Result<ImplHandle> {
        let config = match self.resolver.artifact(operation)? {
            Artifact::Native { .. } => ImplConfig::Native {
                operation: operation.to_string(),
            },
            Artifact::Embedded { details } => ImplConfig::Embedded(details.clone()),
        };
        self.load_impl(&config, version)
            .map_err(|e| e.in_context(operation))
    }

    pub fn call_impl(
        &self,
        handle: ImplHandle,
        method: &str,
        in_args: &ArgVector<'_>,
        out_args: &ArgVector<'_>,
    ) -> Result<i32> {
        self.backend(handle.kind)?
            .call_impl(handle, method, in_args, out_args)
            .map_err(|e| e.in_context(method))
    }

    pub fn unload_impl(&self, handle: ImplHandle) -> Result<i32> {
        self.backend(handle.kind)?.unload_impl(handle)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("operations", &self.resolver.operations().count())
            .field("embedded", &self.embedded.as_ref().map(|b| b.kind()))
            .finish()
    }
}
