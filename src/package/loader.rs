use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::LoaderConfig;
use crate::error::Result;
use crate::package::source::{PackageSource, RawPackage, resolve_locator};
use crate::storage::{PutOutcome, SchemaStore};
use crate::utils::fingerprint::PackageFingerprint;

/// An artifact that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub file: String,
    pub reason: String,
}

/// Result of one package load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    /// `name#version` of the package
    pub package: String,
    pub loaded: usize,
    /// Artifacts whose content was already stored
    pub skipped_duplicate: usize,
    /// Resources the store does not index (examples, search parameters, ...)
    pub ignored: usize,
    pub failed: Vec<ArtifactFailure>,
    /// The whole package had been loaded before; nothing was read
    pub already_loaded: bool,
}

impl LoadSummary {
    fn new(package: String) -> Self {
        Self {
            package,
            ..Default::default()
        }
    }

    fn fail(&mut self, file: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(package = %self.package, file, reason = %reason, "artifact not loaded");
        self.failed.push(ArtifactFailure {
            file: file.to_string(),
            reason,
        });
    }
}

/// Feeds package artifacts into a [`SchemaStore`].
///
/// Loads must not overlap with each other or with validations that read the
/// same store.
pub struct PackageLoader {
    store: Arc<SchemaStore>,
    config: LoaderConfig,
}

impl PackageLoader {
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self::with_config(store, LoaderConfig::default())
    }

    pub fn with_config(store: Arc<SchemaStore>, config: LoaderConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// Load a package from a folder, a `.tgz` archive or a `name#version`
    /// entry of the local package cache.
    pub async fn load(&self, locator: &str) -> Result<LoadSummary> {
        let source = resolve_locator(locator, &self.config).await?;
        self.load_from(source.as_ref()).await
    }

    pub async fn load_from(&self, source: &dyn PackageSource) -> Result<LoadSummary> {
        info!(location = %source.location(), "loading package");
        let raw = source.read(&self.config).await?;
        Ok(self.store_package(raw))
    }

    fn store_package(&self, raw: RawPackage) -> LoadSummary {
        let manifest = &raw.manifest;
        let mut summary = LoadSummary::new(manifest.key());

        if self.store.is_package_loaded(&manifest.name, &manifest.version) {
            info!(package = %summary.package, "package already loaded, skipping");
            summary.already_loaded = true;
            return summary;
        }

        for (dependency, version) in &manifest.dependencies {
            if !self.store.is_package_loaded(dependency, version) {
                debug!(
                    package = %summary.package,
                    dependency = %format!("{dependency}#{version}"),
                    "dependency is not loaded"
                );
            }
        }

        for (file, size) in &raw.oversized {
            summary.fail(
                file,
                format!(
                    "{size} bytes exceeds the {} byte artifact limit",
                    self.config.max_artifact_bytes
                ),
            );
        }

        for (file, reason) in &raw.unreadable {
            summary.fail(file, format!("cannot read file: {reason}"));
        }

        for file in &raw.files {
            let artifact: Value = match serde_json::from_slice(&file.bytes) {
                Ok(value) => value,
                Err(e) => {
                    summary.fail(&file.name, format!("invalid JSON: {e}"));
                    continue;
                }
            };
            if artifact.get("resourceType").and_then(Value::as_str).is_none() {
                summary.fail(&file.name, "missing resourceType");
                continue;
            }

            match self.store.put_artifact(artifact) {
                Ok(Some(PutOutcome::Inserted | PutOutcome::Replaced)) => summary.loaded += 1,
                Ok(Some(PutOutcome::Duplicate)) => {
                    debug!(file = %file.name, "identical artifact already stored");
                    summary.skipped_duplicate += 1;
                }
                Ok(None) => summary.ignored += 1,
                Err(e) => summary.fail(&file.name, e.to_string()),
            }
        }

        self.store.mark_package_loaded(PackageFingerprint::new(
            &manifest.name,
            &manifest.version,
            &raw.manifest_bytes,
        ));

        info!(
            package = %summary.package,
            loaded = summary.loaded,
            duplicates = summary.skipped_duplicate,
            ignored = summary.ignored,
            failed = summary.failed.len(),
            "package loaded"
        );
        summary
    }
}
