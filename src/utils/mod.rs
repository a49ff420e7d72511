pub mod fingerprint;

pub use fingerprint::{ArtifactFingerprint, PackageFingerprint, fingerprint_json};
