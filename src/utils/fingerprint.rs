use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content hash of one conformance artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactFingerprint(String);

impl ArtifactFingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation for logging
    pub fn short_hash(&self) -> &str {
        &self.0[..8]
    }
}

/// Fingerprint a parsed JSON artifact.
///
/// Objects keep their document key order, so two artifacts compare equal
/// when they were written identically.
pub fn fingerprint_json(value: &Value) -> ArtifactFingerprint {
    ArtifactFingerprint::of_bytes(value.to_string().as_bytes())
}

/// Record of a package that has been loaded into a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageFingerprint {
    /// Package name (e.g., "hl7.fhir.r4.core")
    pub package_id: String,
    /// Package version (e.g., "4.0.1")
    pub package_version: String,
    /// SHA-256 of the package manifest
    pub manifest_hash: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl PackageFingerprint {
    pub fn new(package_id: &str, package_version: &str, manifest: &[u8]) -> Self {
        Self {
            package_id: package_id.to_string(),
            package_version: package_version.to_string(),
            manifest_hash: ArtifactFingerprint::of_bytes(manifest).0,
            loaded_at: chrono::Utc::now(),
        }
    }

    /// `name#version` key used for loaded-package tracking
    pub fn key(&self) -> String {
        format!("{}#{}", self.package_id, self.package_version)
    }

    pub fn matches(&self, other: &PackageFingerprint) -> bool {
        self.package_id == other.package_id
            && self.package_version == other.package_version
            && self.manifest_hash == other.manifest_hash
    }
}
