use thiserror::Error;

/// Failures that stop a validate or load call outright.
///
/// Data-quality findings never appear here; they are reported as
/// [`ValidationIssue`](crate::validation::ValidationIssue)s inside an outcome.
#[derive(Error, Debug)]
pub enum FhirValidatorError {
    #[error("Schema not found: {url}")]
    SchemaNotFound { url: String },

    #[error("Unknown resource type: {resource_type}")]
    UnknownResourceType { resource_type: String },

    #[error("Instance has no resourceType")]
    MissingResourceType,

    #[error("Invalid schema {url}: {message}")]
    InvalidSchema { url: String, message: String },

    #[error("Corrupt package manifest at {location}: {message}")]
    Manifest { location: String, message: String },

    #[error("Package not found: {locator}")]
    PackageNotFound { locator: String },

    #[error("Expression evaluation failed for '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FhirValidatorError {
    pub fn schema_not_found(url: impl Into<String>) -> Self {
        Self::SchemaNotFound { url: url.into() }
    }

    pub fn unknown_resource_type(resource_type: impl Into<String>) -> Self {
        Self::UnknownResourceType {
            resource_type: resource_type.into(),
        }
    }

    pub fn invalid_schema(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn manifest(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Manifest {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn package_not_found(locator: impl Into<String>) -> Self {
        Self::PackageNotFound {
            locator: locator.into(),
        }
    }

    pub fn evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FhirValidatorError>;

/// A pointer value that cannot be parsed as a FHIR reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed reference '{reference}': {reason}")]
pub struct ReferenceFormatError {
    pub reference: String,
    pub reason: String,
}

impl ReferenceFormatError {
    pub fn new(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
