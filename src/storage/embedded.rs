//! Bundled default definitions.
//!
//! A compact FHIR R4 core subset: the common data types, the abstract
//! Resource/DomainResource bases, a handful of resources and the value sets
//! their required bindings point at.

use serde_json::Value;
use tracing::info;

use crate::error::{FhirValidatorError, Result};
use crate::storage::store::SchemaStore;

pub static CORE_R4_DEFINITIONS: &[u8] = include_bytes!("../../definitions/core-r4.json");

impl SchemaStore {
    /// Build a new store pre-populated with the bundled definitions.
    ///
    /// Every call returns an independent store.
    pub fn with_defaults() -> Result<Self> {
        let store = Self::new();
        store.load_defaults()?;
        Ok(store)
    }

    /// Add the bundled definitions to this store.
    pub fn load_defaults(&self) -> Result<usize> {
        let artifacts: Vec<Value> = serde_json::from_slice(CORE_R4_DEFINITIONS)?;
        let mut stored = 0;
        for artifact in artifacts {
            if self.put_artifact(artifact)?.is_none() {
                return Err(FhirValidatorError::config(
                    "bundled definitions contain an unsupported artifact",
                ));
            }
            stored += 1;
        }
        info!(artifacts = stored, "loaded bundled definitions");
        Ok(stored)
    }
}
