use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FhirValidatorError, Result};

/// Switches for the validation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorConfig {
    /// Evaluate element invariants through the expression evaluator
    pub check_invariants: bool,
    /// Check coded values against bound value sets
    pub check_bindings: bool,
    /// Partition sliced elements and apply slicing rules
    pub check_slicing: bool,
    /// Lexical checks on primitive values
    pub check_primitives: bool,
    /// Parse Reference values and check their target types
    pub check_references: bool,
    /// Accept instance keys that no element definition describes
    pub allow_unknown_elements: bool,
    /// Validate against profiles listed in `meta.profile`
    pub validate_meta_profiles: bool,
    /// Nesting depth after which recursion stops with an issue
    pub max_depth: usize,
    /// Invariant keys that are never evaluated (e.g. "ele-1")
    pub ignored_invariants: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            check_invariants: true,
            check_bindings: true,
            check_slicing: true,
            check_primitives: true,
            check_references: true,
            allow_unknown_elements: false,
            validate_meta_profiles: true,
            max_depth: 64,
            ignored_invariants: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Structural checks only: no invariants, no terminology.
    pub fn structural() -> Self {
        Self {
            check_invariants: false,
            check_bindings: false,
            ..Default::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            FhirValidatorError::config(format!("{}: {e}", path.display()))
        })
    }

    pub fn with_invariants(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    pub fn with_bindings(mut self, enabled: bool) -> Self {
        self.check_bindings = enabled;
        self
    }

    pub fn with_slicing(mut self, enabled: bool) -> Self {
        self.check_slicing = enabled;
        self
    }

    pub fn with_unknown_elements(mut self, allowed: bool) -> Self {
        self.allow_unknown_elements = allowed;
        self
    }

    pub fn with_meta_profiles(mut self, enabled: bool) -> Self {
        self.validate_meta_profiles = enabled;
        self
    }

    pub fn with_references(mut self, enabled: bool) -> Self {
        self.check_references = enabled;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn ignore_invariant(mut self, key: impl Into<String>) -> Self {
        self.ignored_invariants.push(key.into());
        self
    }

    pub fn is_invariant_ignored(&self, key: &str) -> bool {
        self.ignored_invariants.iter().any(|k| k == key)
    }
}

/// Settings for the package loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Root of the local FHIR package cache (`name#version` folders)
    pub package_cache_dir: Option<PathBuf>,
    /// Artifacts larger than this are reported as failures instead of parsed
    pub max_artifact_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            package_cache_dir: dirs::home_dir().map(|home| home.join(".fhir").join("packages")),
            max_artifact_bytes: 32 * 1024 * 1024,
        }
    }
}

impl LoaderConfig {
    pub fn with_package_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_cache_dir = Some(dir.into());
        self
    }
}
