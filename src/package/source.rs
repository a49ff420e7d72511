//! Where package content comes from: unpacked folders, `.tgz` archives and
//! the local FHIR package cache.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

use crate::core::config::LoaderConfig;
use crate::error::{FhirValidatorError, Result};

const MANIFEST_FILE: &str = "package.json";
const INDEX_FILE: &str = ".index.json";
const CONCURRENT_READS: usize = 8;

/// The `package.json` of an npm-style FHIR package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl PackageManifest {
    pub fn parse(location: &str, bytes: &[u8]) -> Result<Self> {
        let manifest: PackageManifest = serde_json::from_slice(bytes)
            .map_err(|e| FhirValidatorError::manifest(location, e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(FhirValidatorError::manifest(location, "empty package name"));
        }
        if manifest.version.trim().is_empty() {
            return Err(FhirValidatorError::manifest(location, "empty package version"));
        }
        Ok(manifest)
    }

    pub fn key(&self) -> String {
        format!("{}#{}", self.name, self.version)
    }
}

/// One candidate artifact file.
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Package content as read from its source, before any parsing of artifacts.
#[derive(Debug, Clone)]
pub struct RawPackage {
    pub manifest: PackageManifest,
    pub manifest_bytes: Vec<u8>,
    /// Artifact files in name order
    pub files: Vec<PackageFile>,
    /// Files skipped for exceeding the size limit, with their size
    pub oversized: Vec<(String, u64)>,
    /// Files that could not be read, with the reason
    pub unreadable: Vec<(String, String)>,
}

impl RawPackage {
    fn new(location: &str, manifest_bytes: Vec<u8>) -> Result<Self> {
        let manifest = PackageManifest::parse(location, &manifest_bytes)?;
        Ok(Self {
            manifest,
            manifest_bytes,
            files: Vec::new(),
            oversized: Vec::new(),
            unreadable: Vec::new(),
        })
    }

    fn finish(mut self) -> Self {
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
        self.oversized.sort();
        self.unreadable.sort();
        self
    }
}

#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Human-readable location for logs and errors
    fn location(&self) -> String;

    async fn read(&self, config: &LoaderConfig) -> Result<RawPackage>;
}

fn is_artifact_name(name: &str) -> bool {
    name.ends_with(".json") && name != MANIFEST_FILE && name != INDEX_FILE
}

/// An unpacked package folder. Accepts both the folder holding
/// `package.json` and its parent containing a `package/` folder.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn content_root(&self) -> PathBuf {
        let nested = self.root.join("package");
        if tokio::fs::try_exists(nested.join(MANIFEST_FILE))
            .await
            .unwrap_or(false)
        {
            nested
        } else {
            self.root.clone()
        }
    }
}

#[async_trait]
impl PackageSource for DirectorySource {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn read(&self, config: &LoaderConfig) -> Result<RawPackage> {
        let root = self.content_root().await;
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest_bytes = tokio::fs::read(&manifest_path).await.map_err(|e| {
            FhirValidatorError::manifest(manifest_path.display().to_string(), e.to_string())
        })?;
        let mut package = RawPackage::new(&manifest_path.display().to_string(), manifest_bytes)?;

        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_artifact_name(&name) {
                continue;
            }
            // Follows symlinks, so a dangling link surfaces as an unreadable file
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    package.unreadable.push((name, e.to_string()));
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            if metadata.len() > config.max_artifact_bytes {
                package.oversized.push((name, metadata.len()));
                continue;
            }
            candidates.push((name, entry.path()));
        }

        let reads: Vec<(String, std::io::Result<Vec<u8>>)> = stream::iter(candidates)
            .map(|(name, path)| async move {
                let bytes = tokio::fs::read(&path).await;
                (name, bytes)
            })
            .buffered(CONCURRENT_READS)
            .collect()
            .await;
        for (name, bytes) in reads {
            match bytes {
                Ok(bytes) => package.files.push(PackageFile { name, bytes }),
                Err(e) => package.unreadable.push((name, e.to_string())),
            }
        }

        debug!(
            location = %self.location(),
            files = package.files.len(),
            "read package directory"
        );
        Ok(package.finish())
    }
}

/// A gzipped tarball in FHIR npm layout (`package/` prefix inside).
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PackageSource for ArchiveSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self, config: &LoaderConfig) -> Result<RawPackage> {
        let data = tokio::fs::read(&self.path).await?;
        let location = self.location();
        let max_bytes = config.max_artifact_bytes;

        tokio::task::spawn_blocking(move || extract_archive(&location, &data, max_bytes))
            .await
            .map_err(|e| FhirValidatorError::config(format!("archive reader stopped: {e}")))?
    }
}

fn extract_archive(location: &str, data: &[u8], max_bytes: u64) -> Result<RawPackage> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));

    let mut manifest_bytes = None;
    let mut files = Vec::new();
    let mut oversized = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        // Only top-level files of the package folder are artifacts
        let path = entry.path()?.into_owned();
        let Some(name) = top_level_name(&path) else {
            continue;
        };

        if name == MANIFEST_FILE {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            manifest_bytes = Some(bytes);
            continue;
        }
        if !is_artifact_name(&name) {
            continue;
        }

        let size = entry.header().size()?;
        if size > max_bytes {
            oversized.push((name, size));
            continue;
        }
        let mut bytes = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut bytes)?;
        files.push(PackageFile { name, bytes });
    }

    let manifest_bytes = manifest_bytes.ok_or_else(|| {
        FhirValidatorError::manifest(location, "archive has no package/package.json")
    })?;
    let mut package = RawPackage::new(&format!("{location}!package/package.json"), manifest_bytes)?;
    package.files = files;
    package.oversized = oversized;

    debug!(location, files = package.files.len(), "read package archive");
    Ok(package.finish())
}

fn top_level_name(path: &Path) -> Option<String> {
    let mut components = path.components();
    let folder = components.next()?.as_os_str().to_str()?;
    let file = components.next()?.as_os_str().to_str()?;
    if folder != "package" || components.next().is_some() {
        return None;
    }
    Some(file.to_string())
}

/// Turn a locator into a source.
///
/// Existing paths are used directly (`.tgz` / `.tar.gz` files as archives,
/// folders as unpacked packages); `name#version` is looked up in the local
/// package cache.
pub async fn resolve_locator(locator: &str, config: &LoaderConfig) -> Result<Box<dyn PackageSource>> {
    let path = Path::new(locator);
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        if metadata.is_dir() {
            return Ok(Box::new(DirectorySource::new(path)));
        }
        if locator.ends_with(".tgz") || locator.ends_with(".tar.gz") {
            return Ok(Box::new(ArchiveSource::new(path)));
        }
        return Err(FhirValidatorError::package_not_found(format!(
            "{locator} (not a folder or .tgz archive)"
        )));
    }

    if let Some((name, version)) = locator.split_once('#') {
        if name.is_empty() || version.is_empty() {
            return Err(FhirValidatorError::package_not_found(locator));
        }
        let Some(cache_dir) = &config.package_cache_dir else {
            return Err(FhirValidatorError::package_not_found(format!(
                "{locator} (no package cache configured)"
            )));
        };
        let folder = cache_dir.join(format!("{name}#{version}"));
        if tokio::fs::try_exists(&folder).await.unwrap_or(false) {
            return Ok(Box::new(DirectorySource::new(folder)));
        }
    }

    Err(FhirValidatorError::package_not_found(locator))
}
