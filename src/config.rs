use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{DispatchError, ErrorKind, Result};

/// Environment variable naming the implementation root directory
pub const IMPL_ROOT_ENV: &str = "OIF_IMPL_ROOT_DIR";
/// Environment variable naming an optional TOML configuration file
pub const CONFIG_FILE_ENV: &str = "OIF_DISPATCH_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Root under which embedded-runtime modules live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impl_root_dir: Option<PathBuf>,

    /// Directory below the root holding implementation modules
    #[serde(default = "default_impl_subdir")]
    pub impl_subdir: PathBuf,

    #[serde(default)]
    pub native: NativeConfig,

    /// Operation table, merged over the built-in entries
    #[serde(default)]
    pub operations: BTreeMap<String, OperationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Base directory for relative library names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_dir: Option<PathBuf>,
}

/// Where an operation's implementation comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum OperationConfig {
    Native { library: PathBuf },
    Embedded { module: PathBuf, name: String },
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            impl_root_dir: None,
            impl_subdir: default_impl_subdir(),
            native: NativeConfig::default(),
            operations: default_operations(),
        }
    }
}

fn default_impl_subdir() -> PathBuf {
    PathBuf::from("oif_impl").join("impl")
}

fn default_operations() -> BTreeMap<String, OperationConfig> {
    let mut operations = BTreeMap::new();
    operations.insert(
        "solve_qeq".to_string(),
        OperationConfig::Native {
            library: PathBuf::from("./liboif_backend_c_qeq.so"),
        },
    );
    operations
}

impl DispatchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DispatchError::config(format!("failed to read '{}': {}", path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string; built-in operations stay
    /// unless the file overrides them.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| DispatchError::config(format!("failed to parse configuration: {}", e)))?;

        for (name, op) in default_operations() {
            config.operations.entry(name).or_insert(op);
        }
        Ok(config)
    }

    /// Build configuration from the process environment.
    ///
    /// `OIF_DISPATCH_CONFIG` selects a TOML file; `OIF_IMPL_ROOT_DIR` overrides its root.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(root) = std::env::var_os(IMPL_ROOT_ENV) {
            config.impl_root_dir = Some(PathBuf::from(root));
        }
        Ok(config)
    }

    pub fn with_impl_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.impl_root_dir = Some(root.into());
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.native.library_dir = Some(dir.into());
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>, op: OperationConfig) -> Self {
        self.operations.insert(name.into(), op);
        self
    }

    /// Directory holding implementation modules; fails when no root is configured.
    pub fn impl_dir(&self) -> Result<PathBuf> {
        self.impl_root_dir
            .as_ref()
            .map(|root| root.join(&self.impl_subdir))
            .ok_or_else(|| DispatchError::new(ErrorKind::MissingImplRoot))
    }

    /// Resolve a library name against `native.library_dir`.
    pub fn library_path(&self, library: &Path) -> PathBuf {
        match &self.native.library_dir {
            Some(dir) if library.is_relative() => dir.join(library),
            _ => library.to_path_buf(),
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DispatchError::config(format!("failed to serialize configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert!(config.impl_root_dir.is_none());
        assert_eq!(
            config.operations.get("solve_qeq"),
            Some(&OperationConfig::Native {
                library: PathBuf::from("./liboif_backend_c_qeq.so")
            })
        );
    }

    #[test]
    fn test_missing_root_is_configuration_error() {
        let err = DispatchConfig::default().impl_dir().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
impl_root_dir = "/opt/oif"

[native]
library_dir = "/opt/oif/lib"

[operations.ivp]
backend = "embedded"
module = "ivp/py_euler/euler.py"
name = "euler"

[operations.solve_qeq]
backend = "native"
library = "libqeq_custom.so"
"#;

        let config = DispatchConfig::parse(toml).unwrap();
        assert_eq!(config.impl_dir().unwrap(), PathBuf::from("/opt/oif/oif_impl/impl"));
        assert_eq!(
            config.operations.get("ivp"),
            Some(&OperationConfig::Embedded {
                module: PathBuf::from("ivp/py_euler/euler.py"),
                name: "euler".to_string()
            })
        );
        assert_eq!(
            config.library_path(Path::new("libqeq_custom.so")),
            PathBuf::from("/opt/oif/lib/libqeq_custom.so")
        );
        assert_eq!(
            config.library_path(Path::new("/abs/lib.so")),
            PathBuf::from("/abs/lib.so")
        );
    }

    #[test]
    fn test_parse_keeps_builtin_operations() {
        let config = DispatchConfig::parse("").unwrap();
        assert!(config.operations.contains_key("solve_qeq"));
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let toml = r#"
[operations.bad]
backend = "fortran"
library = "x.so"
"#;
        let err = DispatchConfig::parse(toml).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        let config = DispatchConfig::default().with_impl_root("/srv/impl");
        fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = DispatchConfig::load(&path).unwrap();
        assert_eq!(loaded.impl_root_dir, Some(PathBuf::from("/srv/impl")));

        let missing = DispatchConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(missing.category(), ErrorCategory::Configuration);
    }
}
