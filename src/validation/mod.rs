//! Instance validation.
//!
//! [`FhirValidator`] is the entry point. It resolves the documents that apply
//! to an instance and drives the [`ElementValidator`] over each of them; the
//! remaining modules hold the individual checks.

pub mod binding;
pub mod bundle;
pub mod contained;
pub mod element;
pub mod outcome;
pub mod pattern;
pub mod primitive;
pub mod profile;
pub mod reference;
pub mod session;
pub mod slicing;

pub use bundle::BundleType;
pub use contained::{LocalReference, local_references};
pub use element::ElementValidator;
pub use outcome::{IssueCode, Outcome, Severity, ValidationIssue};
pub use profile::FhirValidator;
pub use reference::{ParsedReference, ReferenceKind, parse_reference, resolve_reference};
pub use session::{Scope, ValidationSession};
