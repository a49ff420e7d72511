use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use std::fmt;

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Classification of a validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IssueCode {
    CardinalityViolation,
    ChoiceConflict,
    TypeMismatch,
    FixedValueViolation,
    PatternViolation,
    BindingViolation,
    /// Bound value set missing or membership not decidable locally
    BindingUndetermined,
    SlicingViolation,
    /// A failed invariant, identified by its key (e.g. `ele-1`)
    Invariant(String),
    ReferenceFormatError,
    ReferenceTarget,
    UnresolvedReference,
    DuplicateLocalId,
    DuplicateIdentifier,
    UnknownElement,
    ExpectedArray,
    UnexpectedArray,
    InvalidFormat,
    UnknownProfile,
    ProfileTypeMismatch,
    UnknownResourceType,
    /// No definition loaded for a data type
    UnknownType,
    RecursionLimit,
    BundleRule,
    ContainedRule,
}

impl IssueCode {
    /// OperationOutcome `issue.code` (http://hl7.org/fhir/issue-type).
    pub fn issue_type(&self) -> &'static str {
        match self {
            Self::CardinalityViolation => "required",
            Self::ChoiceConflict
            | Self::TypeMismatch
            | Self::UnknownElement
            | Self::ExpectedArray
            | Self::UnexpectedArray => "structure",
            Self::FixedValueViolation
            | Self::PatternViolation
            | Self::InvalidFormat
            | Self::ReferenceFormatError => "value",
            Self::BindingViolation => "code-invalid",
            Self::BindingUndetermined => "not-supported",
            Self::SlicingViolation | Self::ContainedRule | Self::BundleRule => "business-rule",
            Self::Invariant(_) => "invariant",
            Self::ReferenceTarget => "invalid",
            Self::UnresolvedReference | Self::UnknownProfile | Self::UnknownResourceType => {
                "not-found"
            }
            Self::DuplicateLocalId | Self::DuplicateIdentifier => "duplicate",
            Self::ProfileTypeMismatch => "invalid",
            Self::UnknownType => "not-supported",
            Self::RecursionLimit => "too-costly",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Invariant(key) => return f.write_str(key),
            Self::CardinalityViolation => "cardinality-violation",
            Self::ChoiceConflict => "choice-conflict",
            Self::TypeMismatch => "type-mismatch",
            Self::FixedValueViolation => "fixed-value-violation",
            Self::PatternViolation => "pattern-violation",
            Self::BindingViolation => "binding-violation",
            Self::BindingUndetermined => "binding-undetermined",
            Self::SlicingViolation => "slicing-violation",
            Self::ReferenceFormatError => "reference-format-error",
            Self::ReferenceTarget => "reference-target",
            Self::UnresolvedReference => "unresolved-reference",
            Self::DuplicateLocalId => "duplicate-local-id",
            Self::DuplicateIdentifier => "duplicate-identifier",
            Self::UnknownElement => "unknown-element",
            Self::ExpectedArray => "expected-array",
            Self::UnexpectedArray => "unexpected-array",
            Self::InvalidFormat => "invalid-format",
            Self::UnknownProfile => "unknown-profile",
            Self::ProfileTypeMismatch => "profile-type-mismatch",
            Self::UnknownResourceType => "unknown-resource-type",
            Self::UnknownType => "unknown-type",
            Self::RecursionLimit => "recursion-limit",
            Self::BundleRule => "bundle-rule",
            Self::ContainedRule => "contained-rule",
        };
        f.write_str(code)
    }
}

impl Serialize for IssueCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One finding, located by its path from the instance root
/// (`name[0].given[1]`; the root itself is the empty path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        code: IssueCode,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn error(code: IssueCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, path, message)
    }

    pub fn warning(code: IssueCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, path, message)
    }

    pub fn information(
        code: IssueCode,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Information, code, path, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn with_prefix(mut self, prefix: &str) -> Self {
        self.path = join_path(prefix, &self.path);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        write!(f, "[{}] {path}: {} ({})", self.severity, self.message, self.code)
    }
}

/// `parent.child`, tolerating an empty parent.
pub fn join_path(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => parent.to_string(),
        (false, false) if child.starts_with('[') => format!("{parent}{child}"),
        (false, false) => format!("{parent}.{child}"),
    }
}

/// `path[index]`
pub fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Ordered issue report of one validation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    /// Root resource type, used when rendering expressions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    issues: Vec<ValidationIssue>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_resource(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            issues: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    /// Append another outcome's issues with their paths moved under `prefix`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: Outcome) {
        self.issues
            .extend(other.issues.into_iter().map(|issue| issue.with_prefix(prefix)));
    }

    /// Drop repeated issues, keeping the first occurrence of each.
    pub fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.issues.retain(|issue| seen.insert(issue.clone()));
    }

    /// True iff no issue has error severity.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.is_error())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_code(&self, code: &IssueCode) -> bool {
        self.issues.iter().any(|issue| &issue.code == code)
    }

    pub fn issues_with_code<'a>(
        &'a self,
        code: &'a IssueCode,
    ) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |issue| &issue.code == code)
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn expression(&self, path: &str) -> String {
        match &self.resource_type {
            Some(resource_type) if path.starts_with('[') => format!("{resource_type}{path}"),
            Some(resource_type) => join_path(resource_type, path),
            None => path.to_string(),
        }
    }

    /// Render as a FHIR OperationOutcome resource.
    pub fn to_operation_outcome(&self) -> Value {
        let issues: Vec<Value> = if self.issues.is_empty() {
            vec![json!({
                "severity": "information",
                "code": "informational",
                "details": {"text": "No issues detected"}
            })]
        } else {
            self.issues
                .iter()
                .map(|issue| {
                    let mut entry = json!({
                        "severity": issue.severity.to_string(),
                        "code": issue.code.issue_type(),
                        "details": {
                            "coding": [{"code": issue.code.to_string()}],
                            "text": issue.message
                        }
                    });
                    let expression = self.expression(&issue.path);
                    if !expression.is_empty() {
                        entry["expression"] = json!([expression]);
                    }
                    entry
                })
                .collect()
        };

        json!({
            "resourceType": "OperationOutcome",
            "issue": issues
        })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        Ok(())
    }
}
