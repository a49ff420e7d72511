//! In-memory index of conformance artifacts keyed by canonical URL.
//!
//! Each URL maps to the list of stored versions. Lists are replaced
//! wholesale on write so readers never observe a half-updated entry.

use papaya::HashMap as PapayaMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{FhirValidatorError, Result};
use crate::types::{
    CodeSystem, SchemaDocument, StructureDefinition, TerminologySource, ValueSet, split_canonical,
    version_rank,
};
use crate::utils::fingerprint::{ArtifactFingerprint, PackageFingerprint, fingerprint_json};

const CORE_PROFILE_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// What a write did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// Same URL and version with different content
    Replaced,
    /// Identical content was already stored
    Duplicate,
}

/// Artifact families the store indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    StructureDefinition,
    ValueSet,
    CodeSystem,
}

impl ArtifactKind {
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        match resource_type {
            "StructureDefinition" => Some(Self::StructureDefinition),
            "ValueSet" => Some(Self::ValueSet),
            "CodeSystem" => Some(Self::CodeSystem),
            _ => None,
        }
    }
}

struct Entry<T> {
    version: Option<String>,
    fingerprint: Option<ArtifactFingerprint>,
    artifact: Arc<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            fingerprint: self.fingerprint.clone(),
            artifact: Arc::clone(&self.artifact),
        }
    }
}

struct VersionedMap<T> {
    entries: PapayaMap<String, Arc<Vec<Entry<T>>>>,
}

impl<T: Send + Sync + 'static> VersionedMap<T> {
    fn new() -> Self {
        Self {
            entries: PapayaMap::new(),
        }
    }

    fn put(
        &self,
        url: &str,
        version: Option<String>,
        fingerprint: Option<ArtifactFingerprint>,
        artifact: T,
    ) -> PutOutcome {
        let guard = self.entries.pin();

        let outcome = match guard.get(url) {
            Some(existing) => match existing.iter().find(|e| e.version == version) {
                Some(entry) if fingerprint.is_some() && entry.fingerprint == fingerprint => {
                    return PutOutcome::Duplicate;
                }
                Some(_) => PutOutcome::Replaced,
                None => PutOutcome::Inserted,
            },
            None => PutOutcome::Inserted,
        };

        let entry = Entry {
            version,
            fingerprint,
            artifact: Arc::new(artifact),
        };
        guard.update_or_insert_with(
            url.to_string(),
            |existing| {
                let mut versions: Vec<Entry<T>> = existing
                    .iter()
                    .filter(|e| e.version != entry.version)
                    .cloned()
                    .collect();
                versions.push(entry.clone());
                Arc::new(versions)
            },
            || Arc::new(vec![entry.clone()]),
        );
        outcome
    }

    fn resolve(&self, url: &str, version: Option<&str>) -> Option<Arc<T>> {
        let guard = self.entries.pin();
        let versions = guard.get(url)?;

        if let Some(wanted) = version {
            if let Some(exact) = versions.iter().find(|e| e.version.as_deref() == Some(wanted)) {
                return Some(Arc::clone(&exact.artifact));
            }
        }

        versions
            .iter()
            .max_by_key(|e| version_rank(e.version.as_deref()))
            .map(|e| Arc::clone(&e.artifact))
    }

    fn len(&self) -> usize {
        self.entries.pin().values().map(|versions| versions.len()).sum()
    }

    fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.pin().keys().cloned().collect();
        urls.sort();
        urls
    }
}

/// Shared lookup service for StructureDefinitions, ValueSets and CodeSystems.
///
/// Safe for concurrent reads; writes are expected from one loader at a time.
pub struct SchemaStore {
    schemas: VersionedMap<SchemaDocument>,
    value_sets: VersionedMap<ValueSet>,
    code_systems: VersionedMap<CodeSystem>,
    /// Type name -> canonical URL of the defining (non-profile) document
    types: PapayaMap<String, String>,
    packages: PapayaMap<String, PackageFingerprint>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self {
            schemas: VersionedMap::new(),
            value_sets: VersionedMap::new(),
            code_systems: VersionedMap::new(),
            types: PapayaMap::new(),
            packages: PapayaMap::new(),
        }
    }

    /// Insert or overwrite a StructureDefinition by URL and version.
    pub fn put(&self, definition: StructureDefinition) -> Result<PutOutcome> {
        self.put_schema(definition, None)
    }

    fn put_schema(
        &self,
        definition: StructureDefinition,
        fingerprint: Option<ArtifactFingerprint>,
    ) -> Result<PutOutcome> {
        let document = SchemaDocument::new(definition)?;
        let url = document.url().to_string();
        let version = document.version().map(str::to_string);

        // Profiles never take over a type name
        let definition = document.definition();
        if !definition.is_profile() {
            self.types
                .pin()
                .insert(definition.type_name.clone(), url.clone());
        }

        trace!(url = %url, version = ?version, "storing StructureDefinition");
        Ok(self.schemas.put(&url, version, fingerprint, document))
    }

    pub fn put_value_set(&self, value_set: ValueSet) -> PutOutcome {
        self.put_value_set_with(value_set, None)
    }

    fn put_value_set_with(
        &self,
        value_set: ValueSet,
        fingerprint: Option<ArtifactFingerprint>,
    ) -> PutOutcome {
        let url = value_set.url.clone();
        let version = value_set.version.clone();
        trace!(url = %url, version = ?version, "storing ValueSet");
        self.value_sets.put(&url, version, fingerprint, value_set)
    }

    pub fn put_code_system(&self, code_system: CodeSystem) -> PutOutcome {
        self.put_code_system_with(code_system, None)
    }

    fn put_code_system_with(
        &self,
        code_system: CodeSystem,
        fingerprint: Option<ArtifactFingerprint>,
    ) -> PutOutcome {
        let url = code_system.url.clone();
        let version = code_system.version.clone();
        trace!(url = %url, version = ?version, "storing CodeSystem");
        self.code_systems.put(&url, version, fingerprint, code_system)
    }

    /// Store a raw JSON artifact, classified by its `resourceType`.
    ///
    /// Returns `Ok(None)` for resource types the store does not index.
    pub fn put_artifact(&self, artifact: Value) -> Result<Option<PutOutcome>> {
        let kind = artifact
            .get("resourceType")
            .and_then(Value::as_str)
            .and_then(ArtifactKind::from_resource_type);
        let Some(kind) = kind else {
            return Ok(None);
        };

        let fingerprint = Some(fingerprint_json(&artifact));
        let outcome = match kind {
            ArtifactKind::StructureDefinition => {
                self.put_schema(serde_json::from_value(artifact)?, fingerprint)?
            }
            ArtifactKind::ValueSet => {
                self.put_value_set_with(serde_json::from_value(artifact)?, fingerprint)
            }
            ArtifactKind::CodeSystem => {
                self.put_code_system_with(serde_json::from_value(artifact)?, fingerprint)
            }
        };
        Ok(Some(outcome))
    }

    /// Exact version if present, else the highest stored version.
    pub fn resolve(&self, url: &str, version: Option<&str>) -> Result<Arc<SchemaDocument>> {
        self.schemas
            .resolve(url, version)
            .ok_or_else(|| FhirValidatorError::schema_not_found(display_canonical(url, version)))
    }

    /// Resolve a canonical reference that may carry `|version`.
    pub fn resolve_canonical(&self, canonical: &str) -> Result<Arc<SchemaDocument>> {
        let (url, version) = split_canonical(canonical);
        self.resolve(url, version)
    }

    pub fn resolve_value_set(&self, url: &str, version: Option<&str>) -> Result<Arc<ValueSet>> {
        self.value_sets
            .resolve(url, version)
            .ok_or_else(|| FhirValidatorError::schema_not_found(display_canonical(url, version)))
    }

    pub fn resolve_code_system(&self, url: &str, version: Option<&str>) -> Result<Arc<CodeSystem>> {
        self.code_systems
            .resolve(url, version)
            .ok_or_else(|| FhirValidatorError::schema_not_found(display_canonical(url, version)))
    }

    /// Defining document for a resource or data type name.
    pub fn resolve_type(&self, type_name: &str) -> Option<Arc<SchemaDocument>> {
        let url = self
            .types
            .pin()
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| format!("{CORE_PROFILE_BASE}{type_name}"));
        self.schemas.resolve(&url, None)
    }

    /// Whether a type name is defined as a resource (`kind = resource`).
    pub fn is_resource_type(&self, type_name: &str) -> bool {
        self.resolve_type(type_name)
            .is_some_and(|doc| doc.definition().is_resource())
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    pub fn value_set_count(&self) -> usize {
        self.value_sets.len()
    }

    pub fn code_system_count(&self) -> usize {
        self.code_systems.len()
    }

    pub fn schema_urls(&self) -> Vec<String> {
        self.schemas.urls()
    }

    /// Record a loaded package; returns false if it was already recorded.
    pub fn mark_package_loaded(&self, fingerprint: PackageFingerprint) -> bool {
        let key = fingerprint.key();
        let guard = self.packages.pin();
        if guard.contains_key(&key) {
            return false;
        }
        debug!(package = %key, "package registered");
        guard.insert(key, fingerprint);
        true
    }

    pub fn is_package_loaded(&self, name: &str, version: &str) -> bool {
        self.packages.pin().contains_key(&format!("{name}#{version}"))
    }

    pub fn loaded_packages(&self) -> Vec<PackageFingerprint> {
        let mut packages: Vec<PackageFingerprint> =
            self.packages.pin().values().cloned().collect();
        packages.sort_by(|a, b| a.key().cmp(&b.key()));
        packages
    }
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaStore")
            .field("schemas", &self.schema_count())
            .field("value_sets", &self.value_set_count())
            .field("code_systems", &self.code_system_count())
            .field("packages", &self.packages.pin().len())
            .finish()
    }
}

impl TerminologySource for SchemaStore {
    fn value_set(&self, canonical: &str) -> Option<Arc<ValueSet>> {
        let (url, version) = split_canonical(canonical);
        self.value_sets.resolve(url, version)
    }

    fn code_system(&self, canonical: &str) -> Option<Arc<CodeSystem>> {
        let (url, version) = split_canonical(canonical);
        self.code_systems.resolve(url, version)
    }
}

fn display_canonical(url: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{url}|{version}"),
        None => url.to_string(),
    }
}
