//! # OctoFHIR FHIR Validator
//!
//! Validates FHIR resources (as JSON trees) against StructureDefinition
//! snapshots: cardinality, choice types, primitive formats, fixed and pattern
//! values, terminology bindings, slicing, references, contained resources,
//! bundle rules and invariants.
//!
//! ## Features
//!
//! - **Schema Store**: lock-free, versioned lookup of StructureDefinitions,
//!   ValueSets and CodeSystems, shared across threads
//! - **Package Loading**: FHIR npm packages from a directory, a `.tgz`
//!   archive or the local package cache
//! - **Deterministic Reports**: issues in traversal order, renderable as an
//!   OperationOutcome
//! - **Pluggable Invariants**: FHIRPath is delegated to an
//!   [`ExpressionEvaluator`] supplied by the host
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use octofhir_fhirvalidator::*;
//!
//! # fn example() -> Result<()> {
//! let store = Arc::new(SchemaStore::with_defaults()?);
//! let validator = FhirValidator::new(store);
//!
//! let patient = serde_json::json!({"resourceType": "Patient", "gender": "female"});
//! let outcome = validator.validate(&patient)?;
//! assert!(outcome.is_valid());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod evaluator;
pub mod package;
pub mod storage;
pub mod types;
pub mod utils;
pub mod validation;

pub use crate::core::{LoaderConfig, ValidatorConfig};
pub use error::{FhirValidatorError, ReferenceFormatError, Result};
pub use evaluator::{EvaluationError, EvaluationResult, ExpressionEvaluator, select_path};
pub use package::{LoadSummary, PackageLoader, PackageSource};
pub use storage::{PutOutcome, SchemaStore};
pub use types::{SchemaDocument, StructureDefinition};
pub use validation::{
    BundleType, FhirValidator, IssueCode, Outcome, ParsedReference, Severity, ValidationIssue,
    parse_reference, resolve_reference,
};
