#[cfg(feature = "embedded-definitions")]
mod embedded;
mod store;

#[cfg(feature = "embedded-definitions")]
pub use embedded::CORE_R4_DEFINITIONS;
pub use store::{ArtifactKind, PutOutcome, SchemaStore};
