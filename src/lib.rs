//! OIF Dispatch - call named operations without knowing their language
//!
//! A caller loads an implementation, gets an opaque handle, and calls
//! methods on it with tagged argument vectors. Implementations live either
//! in native shared libraries reached through the C ABI or in an embedded
//! runtime hosted in-process.

// Core modules
pub mod errors;
pub mod protocol;
pub mod config;
pub mod logging;
pub mod resolver;
pub mod native;
pub mod bridge;
pub mod lifecycle;
pub mod bindings;

// Re-export commonly used items
pub use errors::{DispatchError, ErrorCategory, ErrorKind, Result, OIF_ERROR, OIF_IMPL_INIT_ERROR};
pub use protocol::{ArgType, ArgVector, Direction, Lang, OifArgs, OifArrayF64, OifCallback};
pub use config::{DispatchConfig, OperationConfig};
pub use resolver::{Artifact, BackendResolver};
pub use native::NativeBackend;
pub use bridge::{EmbeddedBridge, EmbeddedRuntime, ImplDetails, Returned, RuntimeException};
pub use lifecycle::{Backend, BackendKind, Dispatcher, ImplConfig, ImplHandle, ImplId, Version};

#[cfg(feature = "python")]
pub use bridge::PythonRuntime;
