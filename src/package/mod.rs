pub mod loader;
pub mod source;

pub use loader::{ArtifactFailure, LoadSummary, PackageLoader};
pub use source::{
    ArchiveSource, DirectorySource, PackageFile, PackageManifest, PackageSource, RawPackage,
    resolve_locator,
};
