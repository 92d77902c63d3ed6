//! Backend resolver - operation name to implementing artifact
//!
//! Loaded libraries are memoized per operation, so each library is opened
//! once and stays mapped while any handle or call still refers to it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bridge::ImplDetails;
use crate::config::{DispatchConfig, OperationConfig};
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::native::{Library, LoadError};

/// What implements an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Native { library: PathBuf },
    Embedded { details: ImplDetails },
}

pub struct BackendResolver {
    table: HashMap<String, Artifact>,
    cache: DashMap<String, Arc<Library>>,
}

impl BackendResolver {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let mut table = HashMap::with_capacity(config.operations.len());
        for (name, op) in &config.operations {
            let artifact = match op {
                OperationConfig::Native { library } => Artifact::Native {
                    library: config.library_path(library),
                },
                OperationConfig::Embedded { module, name: qualified } => Artifact::Embedded {
                    details: ImplDetails::new(module.clone(), qualified.clone())
                        .map_err(|e| e.in_context(name.as_str()))?,
                },
            };
            table.insert(name.clone(), artifact);
        }

        Ok(Self::from_table(table))
    }

    pub fn from_table(table: HashMap<String, Artifact>) -> Self {
        Self {
            table,
            cache: DashMap::new(),
        }
    }

    /// Names of every registered operation
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn artifact(&self, operation: &str) -> Result<&Artifact> {
        self.table
            .get(operation)
            .ok_or_else(|| DispatchError::unknown_operation(operation))
    }

    /// Library file implementing a native operation
    pub fn library_path(&self, operation: &str) -> Result<&Path> {
        match self.artifact(operation)? {
            Artifact::Native { library } => Ok(library),
            Artifact::Embedded { .. } => Err(DispatchError::new(ErrorKind::BackendMismatch {
                expected: "native".to_string(),
                found: "embedded".to_string(),
            })
            .in_context(operation)),
        }
    }

    /// Library implementing `operation`, opened on first use and cached.
    pub fn load_library(&self, operation: &str) -> Result<Arc<Library>> {
        if let Some(library) = self.cache.get(operation).map(|r| Arc::clone(r.value())) {
            return Ok(library);
        }

        let path = self.library_path(operation)?;
        // The vacant entry keeps its shard locked, so racing first uses open the library once.
        match self.cache.entry(operation.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let library = Arc::new(open(operation, path)?);
                entry.insert(Arc::clone(&library));
                Ok(library)
            }
        }
    }

    /// Drop the cached library for `operation` and open it again.
    ///
    /// Handles loaded earlier keep the previous mapping alive until they are unloaded.
    pub fn reload(&self, operation: &str) -> Result<Arc<Library>> {
        self.cache.remove(operation);
        self.load_library(operation)
    }

    pub fn is_cached(&self, operation: &str) -> bool {
        self.cache.contains_key(operation)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

fn open(operation: &str, path: &Path) -> Result<Library> {
    let library = Library::open(path).map_err(|e| {
        let detail = match e {
            LoadError::InvalidName => "invalid library name".to_string(),
            LoadError::LoadFailed(msg) => msg,
        };
        DispatchError::new(ErrorKind::LibraryLoad {
            library: path.to_path_buf(),
            detail,
        })
        .in_context(operation)
    })?;

    tracing::debug!(operation, library = %path.display(), "library loaded");
    Ok(library)
}
