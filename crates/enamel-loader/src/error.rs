//! Error types for module loading

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while loading resource modules
///
/// Every variant is cheap to clone: a module's terminal outcome is shared by
/// all callers that coalesced onto the same load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// Fetching or applying a module failed
    #[error("Failed to load module {module_id}: {message}")]
    ModuleLoad {
        module_id: String,
        message: String,
    },

    /// Dependencies never became available (cycle, failed or unknown dependency)
    #[error("Dependencies of {module_id} unsatisfied after {waited_ms}ms: {}", .missing.join(", "))]
    DependencyUnsatisfied {
        module_id: String,
        missing: Vec<String>,
        waited_ms: u64,
    },

    /// Module id is not part of the registry
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Module id declared twice
    #[error("Duplicate module id: {0}")]
    DuplicateModule(String),

    /// Registry has no critical module, or more than one
    #[error("Registry must declare exactly one critical module, found {0}")]
    MissingCriticalModule(usize),

    /// Payload could not be fetched
    #[error("Payload fetch failed for {module_id}: {message}")]
    Fetch {
        module_id: String,
        message: String,
    },

    /// Loader or fetcher misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry document could not be parsed
    #[error("Invalid registry: {0}")]
    Registry(String),
}

impl LoaderError {
    /// Build a module load error from any displayable cause
    pub fn module_load(module_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        LoaderError::ModuleLoad {
            module_id: module_id.into(),
            message: cause.to_string(),
        }
    }

    /// Module this error refers to, if any
    pub fn module_id(&self) -> Option<&str> {
        match self {
            LoaderError::ModuleLoad { module_id, .. }
            | LoaderError::DependencyUnsatisfied { module_id, .. }
            | LoaderError::Fetch { module_id, .. } => Some(module_id),
            LoaderError::UnknownModule(id) | LoaderError::DuplicateModule(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the failure came from dependency resolution rather than the module itself
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, LoaderError::DependencyUnsatisfied { .. })
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self {
        LoaderError::Registry(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_lists_missing() {
        let err = LoaderError::DependencyUnsatisfied {
            module_id: "utilities".into(),
            missing: vec!["components".into(), "layout".into()],
            waited_ms: 5000,
        };

        assert_eq!(
            err.to_string(),
            "Dependencies of utilities unsatisfied after 5000ms: components, layout"
        );
        assert!(err.is_dependency_failure());
        assert_eq!(err.module_id(), Some("utilities"));
    }

    #[test]
    fn test_module_load_helper() {
        let err = LoaderError::module_load("layout", "boom");
        assert!(matches!(err, LoaderError::ModuleLoad { .. }));
        assert!(!err.is_dependency_failure());
    }
}
