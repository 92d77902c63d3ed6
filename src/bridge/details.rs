//! Structured description of an embedded implementation module

use core::fmt;
use core::str::FromStr;
use std::path::{Component, Path, PathBuf};

use crate::errors::{DispatchError, ErrorKind, Result};

/// Which module to load and the name the runtime knows it by.
///
/// `module_path` is relative to the implementation directory and may not
/// leave it; `qualified_name` is a dotted identifier such as `qeq.py_qeq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImplDetails {
    pub module_path: PathBuf,
    pub qualified_name: String,
}

impl ImplDetails {
    pub fn new(module_path: impl Into<PathBuf>, qualified_name: impl Into<String>) -> Result<Self> {
        let details = Self {
            module_path: module_path.into(),
            qualified_name: qualified_name.into(),
        };
        details.check()?;
        Ok(details)
    }

    /// Decode the legacy `"<module-path> <qualified-name>"` form.
    ///
    /// The string splits at its first ASCII space. Everything before it is
    /// the path, everything after it the name, so a second space lands in
    /// the name and is rejected there.
    pub fn parse(details: &str) -> Result<Self> {
        if details.contains('\0') {
            return Err(malformed(details, "contains a NUL byte"));
        }
        let (path, name) = details
            .split_once(' ')
            .ok_or_else(|| malformed(details, "expected '<module-path> <qualified-name>'"))?;

        Self::new(path, name).map_err(|mut e| {
            if let ErrorKind::MalformedDetails { details: raw, .. } = &mut e.kind {
                *raw = details.to_string();
            }
            e
        })
    }

    fn check(&self) -> Result<()> {
        let label = self.to_string();
        check_module_path(&self.module_path).map_err(|reason| malformed(&label, reason))?;
        check_qualified_name(&self.qualified_name).map_err(|reason| malformed(&label, reason))
    }

    /// Location of the module below `impl_dir`
    pub fn resolve(&self, impl_dir: &Path) -> PathBuf {
        impl_dir.join(&self.module_path)
    }
}

fn malformed(details: &str, reason: impl Into<String>) -> DispatchError {
    DispatchError::new(ErrorKind::MalformedDetails {
        details: details.to_string(),
        reason: reason.into(),
    })
}

fn check_module_path(path: &Path) -> core::result::Result<(), &'static str> {
    if path.as_os_str().is_empty() {
        return Err("module path is empty");
    }
    if path.to_string_lossy().contains('\0') {
        return Err("module path contains a NUL byte");
    }
    if !path.is_relative() {
        return Err("module path must be relative to the implementation directory");
    }
    let escapes = path.components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    });
    if escapes {
        return Err("module path may not leave the implementation directory");
    }
    Ok(())
}

fn check_qualified_name(name: &str) -> core::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("qualified name is empty");
    }
    if name.contains(char::is_whitespace) {
        return Err("qualified name contains whitespace");
    }
    let valid = name.split('.').all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
            && chars.all(|c| c == '_' || c.is_alphanumeric())
    });
    if !valid {
        return Err("qualified name must be a dotted identifier");
    }
    Ok(())
}

impl FromStr for ImplDetails {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImplDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.module_path.display(), self.qualified_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use proptest::prelude::*;

    fn reason(details: &str) -> String {
        match ImplDetails::parse(details).unwrap_err().kind {
            ErrorKind::MalformedDetails { reason, .. } => reason,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_valid() {
        let details: ImplDetails = "qeq/py_qeq/qeq.py qeq.py_qeq".parse().unwrap();
        assert_eq!(details.module_path, PathBuf::from("qeq/py_qeq/qeq.py"));
        assert_eq!(details.qualified_name, "qeq.py_qeq");
        assert_eq!(details.to_string(), "qeq/py_qeq/qeq.py qeq.py_qeq");
    }

    #[test]
    fn test_missing_separator() {
        let err = ImplDetails::parse("qeq.py").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
        assert!(reason("qeq.py").contains("expected"));
        assert!(ImplDetails::parse("").is_err());
    }

    #[test]
    fn test_empty_tokens() {
        assert_eq!(reason(" qeq"), "module path is empty");
        assert_eq!(reason("qeq.py "), "qualified name is empty");
        assert_eq!(reason(" "), "module path is empty");
    }

    #[test]
    fn test_extra_separator_lands_in_name() {
        assert_eq!(reason("qeq.py qeq extra"), "qualified name contains whitespace");
        assert_eq!(reason("qeq.py  qeq"), "qualified name contains whitespace");
    }

    #[test]
    fn test_tab_is_not_a_separator() {
        assert!(reason("qeq.py\tqeq").contains("expected"));
    }

    #[test]
    fn test_nul_byte_rejected() {
        assert_eq!(reason("qeq.py q\0eq"), "contains a NUL byte");
    }

    #[test]
    fn test_path_may_not_escape() {
        assert!(reason("../qeq.py qeq").contains("leave"));
        assert!(reason("/etc/qeq.py qeq").contains("relative"));
    }

    #[test]
    fn test_name_must_be_identifier() {
        assert!(reason("qeq.py 1qeq").contains("dotted identifier"));
        assert!(reason("qeq.py qeq..impl").contains("dotted identifier"));
        assert!(reason("qeq.py qeq-impl").contains("dotted identifier"));
        assert!(ImplDetails::parse("qeq.py _private.mod2").is_ok());
    }

    #[test]
    fn test_resolve_joins_impl_dir() {
        let details = ImplDetails::new("ivp/euler.py", "euler").unwrap();
        assert_eq!(
            details.resolve(Path::new("/srv/oif_impl/impl")),
            PathBuf::from("/srv/oif_impl/impl/ivp/euler.py")
        );
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(
            dirs in prop::collection::vec("[a-z_][a-z0-9_]{0,6}", 1..4),
            name in "[A-Za-z_][A-Za-z0-9_]{0,8}(\\.[A-Za-z_][A-Za-z0-9_]{0,8}){0,2}",
        ) {
            let details = ImplDetails::new(dirs.join("/") + ".py", name).unwrap();
            let parsed = ImplDetails::parse(&details.to_string()).unwrap();
            prop_assert_eq!(parsed, details);
        }

        #[test]
        fn prop_parse_never_panics(s in "\\PC{0,40}") {
            let _ = ImplDetails::parse(&s);
        }
    }
}
