use std::fmt;
use std::path::PathBuf;

use crate::protocol::{ArgPosition, ArgType};

/// Status returned across the C ABI for a failed call.
pub const OIF_ERROR: i32 = -1;
/// Status returned across the C ABI when an implementation could not be loaded.
pub const OIF_IMPL_INIT_ERROR: i32 = -2;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Coarse error taxonomy used for reporting and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Resolution,
    Argument,
    RuntimeLoad,
    RuntimeCall,
    Callback,
    RuntimeInit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MissingImplRoot,
    InvalidConfig { detail: String },
    UnknownOperation { operation: String },
    UnregisteredBackend { backend: String },
    VersionMismatch { requested: String, supported: String },
    LibraryLoad { library: PathBuf, detail: String },
    MissingSymbol { library: PathBuf, symbol: String },
    ModuleNotFound { path: PathBuf },
    UnknownTag { position: ArgPosition, raw: i32 },
    UnsupportedTag { position: ArgPosition, tag: ArgType },
    NullArgument { position: ArgPosition },
    MalformedArray { position: ArgPosition, detail: String },
    TooManyArgs { count: usize },
    InvalidString { what: String, reason: String },
    MalformedDetails { details: String, reason: String },
    BackendMismatch { expected: String, found: String },
    UnknownHandle { id: i32 },
    LiveHandles { count: usize },
    ModuleLoad { module: String, detail: String },
    MissingConstructor { module: String },
    MissingMethod { method: String, handle: i32 },
    RuntimeException { detail: String },
    UnsupportedReturn { method: String, found: String },
    CallInterface { detail: String },
    NullCallback { position: ArgPosition },
    SameOriginCallback { position: ArgPosition, lang: String },
    UnknownOrigin { position: ArgPosition, raw: i32 },
    ForeignCallback { position: ArgPosition, origin: String, target: String },
    HandlesExhausted,
    RuntimeInit { detail: String },
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingImplRoot | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::UnknownOperation { .. }
            | Self::UnregisteredBackend { .. }
            | Self::VersionMismatch { .. }
            | Self::LibraryLoad { .. }
            | Self::MissingSymbol { .. }
            | Self::ModuleNotFound { .. } => ErrorCategory::Resolution,
            Self::UnknownTag { .. }
            | Self::UnsupportedTag { .. }
            | Self::NullArgument { .. }
            | Self::MalformedArray { .. }
            | Self::TooManyArgs { .. }
            | Self::InvalidString { .. }
            | Self::MalformedDetails { .. }
            | Self::BackendMismatch { .. }
            | Self::UnknownHandle { .. }
            | Self::LiveHandles { .. } => ErrorCategory::Argument,
            Self::ModuleLoad { .. } | Self::MissingConstructor { .. } | Self::HandlesExhausted => {
                ErrorCategory::RuntimeLoad
            }
            Self::MissingMethod { .. }
            | Self::RuntimeException { .. }
            | Self::UnsupportedReturn { .. }
            | Self::CallInterface { .. } => ErrorCategory::RuntimeCall,
            Self::NullCallback { .. }
            | Self::SameOriginCallback { .. }
            | Self::UnknownOrigin { .. }
            | Self::ForeignCallback { .. } => ErrorCategory::Callback,
            Self::RuntimeInit { .. } => ErrorCategory::RuntimeInit,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingImplRoot => write!(
                f,
                "Implementation root directory is not configured (set OIF_IMPL_ROOT_DIR)"
            ),
            Self::InvalidConfig { detail } => write!(f, "Invalid configuration: {}", detail),
            Self::UnknownOperation { operation } => {
                write!(f, "No implementation is registered for operation '{}'", operation)
            }
            Self::UnregisteredBackend { backend } => {
                write!(f, "Backend '{}' is not available in this process", backend)
            }
            Self::VersionMismatch { requested, supported } => write!(
                f,
                "Requested interface version {} is not compatible with supported version {}",
                requested, supported
            ),
            Self::LibraryLoad { library, detail } => {
                write!(f, "Could not load library '{}': {}", library.display(), detail)
            }
            Self::MissingSymbol { library, symbol } => write!(
                f,
                "Library '{}' does not export symbol '{}'",
                library.display(),
                symbol
            ),
            Self::ModuleNotFound { path } => {
                write!(f, "Implementation module '{}' does not exist", path.display())
            }
            Self::UnknownTag { position, raw } => {
                write!(f, "Unrecognized type tag {} for {}", raw, position)
            }
            Self::UnsupportedTag { position, tag } => {
                write!(f, "Type tag {} is not supported for {} by this backend", tag, position)
            }
            Self::NullArgument { position } => write!(f, "Value pointer for {} is null", position),
            Self::MalformedArray { position, detail } => {
                write!(f, "Array descriptor for {} is malformed: {}", position, detail)
            }
            Self::TooManyArgs { count } => write!(f, "Too many arguments: {}", count),
            Self::InvalidString { what, reason } => write!(f, "Invalid {}: {}", what, reason),
            Self::MalformedDetails { details, reason } => {
                write!(f, "Malformed implementation details '{}': {}", details, reason)
            }
            Self::BackendMismatch { expected, found } => write!(
                f,
                "Handle belongs to backend '{}', not '{}'",
                found, expected
            ),
            Self::UnknownHandle { id } => {
                write!(f, "Implementation handle {} is not loaded", id)
            }
            Self::LiveHandles { count } => write!(
                f,
                "Cannot shut down the embedded runtime while {} implementation(s) are loaded",
                count
            ),
            Self::ModuleLoad { module, detail } => {
                write!(f, "Loading module '{}' failed: {}", module, detail)
            }
            Self::MissingConstructor { module } => {
                write!(f, "Module '{}' does not define a 'Self' constructor", module)
            }
            Self::MissingMethod { method, handle } => write!(
                f,
                "Could not find method '{}' in implementation with id {}",
                method, handle
            ),
            Self::RuntimeException { detail } => write!(f, "Embedded runtime raised: {}", detail),
            Self::UnsupportedReturn { method, found } => write!(
                f,
                "Return value of method '{}' has type {}; expected nothing or an integer",
                method, found
            ),
            Self::CallInterface { detail } => {
                write!(f, "Could not prepare call interface: {}", detail)
            }
            Self::NullCallback { position } => {
                write!(f, "Callback passed as {} has a null function pointer", position)
            }
            Self::SameOriginCallback { position, lang } => write!(
                f,
                "Callback passed as {} originates in {} but carries no {} value to pass through",
                position, lang, lang
            ),
            Self::UnknownOrigin { position, raw } => {
                write!(f, "Callback passed as {} has unrecognized origin code {}", position, raw)
            }
            Self::ForeignCallback { position, origin, target } => write!(
                f,
                "Callback passed as {} belongs to the {} runtime and cannot be called from {}",
                position, origin, target
            ),
            Self::HandlesExhausted => write!(f, "No implementation handle ids are left"),
            Self::RuntimeInit { detail } => {
                write!(f, "Embedded runtime initialization failed: {}", detail)
            }
        }
    }
}

/// Error reported by every dispatch operation.
///
/// `context` names the operation or method the failure belongs to, so a
/// failed call is diagnosable from the message alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub context: Option<String>,
}

impl DispatchError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// Attach the operation or method name, keeping an existing one.
    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        if self.context.is_none() {
            self.context = Some(context.into());
        }
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Only a failed embedded-runtime initialization leaves the process unusable.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::RuntimeInit
    }

    pub fn status_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::RuntimeLoad | ErrorCategory::RuntimeInit => OIF_IMPL_INIT_ERROR,
            _ => OIF_ERROR,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig { detail: detail.into() })
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(ErrorKind::UnknownOperation { operation: operation.to_string() })
            .in_context(operation)
    }

    pub fn runtime_exception(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeException { detail: detail.into() })
    }
}

impl From<ErrorKind> for DispatchError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] ", context)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Direction;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            DispatchError::new(ErrorKind::MissingImplRoot).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            DispatchError::unknown_operation("solve_qeq").category(),
            ErrorCategory::Resolution
        );
        assert_eq!(
            DispatchError::new(ErrorKind::UnknownHandle { id: 3 }).category(),
            ErrorCategory::Argument
        );
        assert!(DispatchError::new(ErrorKind::RuntimeInit { detail: "x".into() }).is_fatal());
        assert!(!DispatchError::runtime_exception("boom").is_fatal());
    }

    #[test]
    fn test_message_names_context_and_position() {
        let err = DispatchError::new(ErrorKind::UnknownTag {
            position: ArgPosition::new(Direction::Input, 2),
            raw: 42,
        })
        .in_context("solve_qeq");

        let msg = err.to_string();
        assert!(msg.starts_with("[solve_qeq]"));
        assert!(msg.contains("input argument #2"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_context_is_not_overwritten() {
        let err = DispatchError::runtime_exception("boom")
            .in_context("integrate")
            .in_context("outer");
        assert_eq!(err.context.as_deref(), Some("integrate"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DispatchError::runtime_exception("x").status_code(), OIF_ERROR);
        let load = DispatchError::new(ErrorKind::MissingConstructor { module: "M".into() });
        assert_eq!(load.status_code(), OIF_IMPL_INIT_ERROR);
        let exhausted = DispatchError::new(ErrorKind::HandlesExhausted);
        assert_eq!(exhausted.status_code(), OIF_IMPL_INIT_ERROR);
    }

    #[test]
    fn test_callback_errors_name_the_origin() {
        let position = ArgPosition::new(Direction::Input, 1);
        let unknown = DispatchError::new(ErrorKind::UnknownOrigin { position, raw: 99 });
        assert_eq!(unknown.category(), ErrorCategory::Callback);
        assert!(unknown.to_string().contains("99"));

        let foreign = DispatchError::new(ErrorKind::ForeignCallback {
            position,
            origin: "Julia".into(),
            target: "Python".into(),
        });
        assert_eq!(foreign.category(), ErrorCategory::Callback);
        assert!(foreign.to_string().contains("Julia"));
    }
}
