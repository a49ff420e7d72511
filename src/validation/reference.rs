//! Reference parsing and target-type checks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ReferenceFormatError;
use crate::storage::SchemaStore;
use crate::types::TypeRef;
use crate::validation::outcome::{IssueCode, Outcome, ValidationIssue, join_path};

const CORE_PROFILE_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

static RESOURCE_TYPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z]+$").unwrap());
static ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").unwrap());
static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:uuid:[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});
static OID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `#id` pointing into `contained` (`#` alone is the container)
    Local,
    /// `Type/id` or `Type/id/_history/vid` against the local server
    Relative,
    /// `Type?search` conditional reference
    Conditional,
    /// `http(s)://.../Type/id`
    Absolute,
    /// `urn:uuid:` / `urn:oid:`
    Urn,
    /// Only `identifier` is given
    Logical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub kind: ReferenceKind,
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
}

impl ParsedReference {
    fn new(kind: ReferenceKind) -> Self {
        Self {
            kind,
            resource_type: None,
            id: None,
            version: None,
        }
    }

    /// Whether the referenced type is one of `allowed`. References whose type
    /// is not visible in the pointer itself conform to any constraint.
    pub fn conforms_to(&self, allowed: &[String]) -> bool {
        match &self.resource_type {
            Some(resource_type) => allowed.is_empty() || allowed.iter().any(|t| t == resource_type),
            None => true,
        }
    }
}

/// Parse a literal reference string.
pub fn parse_reference(text: &str) -> Result<ParsedReference, ReferenceFormatError> {
    if text.trim().is_empty() {
        return Err(ReferenceFormatError::new(text, "empty reference"));
    }
    if text.chars().any(char::is_whitespace) {
        return Err(ReferenceFormatError::new(text, "contains whitespace"));
    }

    if let Some(fragment) = text.strip_prefix('#') {
        if !fragment.is_empty() && !ID_REGEX.is_match(fragment) {
            return Err(ReferenceFormatError::new(text, "invalid local id"));
        }
        let mut parsed = ParsedReference::new(ReferenceKind::Local);
        parsed.id = (!fragment.is_empty()).then(|| fragment.to_string());
        return Ok(parsed);
    }

    if text.starts_with("urn:") {
        if text.starts_with("urn:uuid:") && !UUID_REGEX.is_match(text) {
            return Err(ReferenceFormatError::new(text, "invalid urn:uuid"));
        }
        if text.starts_with("urn:oid:") && !OID_REGEX.is_match(text) {
            return Err(ReferenceFormatError::new(text, "invalid urn:oid"));
        }
        return Ok(ParsedReference::new(ReferenceKind::Urn));
    }

    if text.contains("://") {
        let url = url::Url::parse(text)
            .map_err(|e| ReferenceFormatError::new(text, format!("invalid URL: {e}")))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let mut parsed = ParsedReference::new(ReferenceKind::Absolute);
        if let Some((resource_type, id, version)) = trailing_resource_path(&segments) {
            parsed.resource_type = Some(resource_type.to_string());
            parsed.id = Some(id.to_string());
            parsed.version = version.map(str::to_string);
        }
        return Ok(parsed);
    }

    if let Some((resource_type, query)) = text.split_once('?') {
        if !RESOURCE_TYPE_REGEX.is_match(resource_type) || query.is_empty() {
            return Err(ReferenceFormatError::new(text, "invalid conditional reference"));
        }
        let mut parsed = ParsedReference::new(ReferenceKind::Conditional);
        parsed.resource_type = Some(resource_type.to_string());
        return Ok(parsed);
    }

    let segments: Vec<&str> = text.split('/').collect();
    match trailing_resource_path(&segments) {
        Some((resource_type, id, version)) if segments.len() == 2 || segments.len() == 4 => {
            let mut parsed = ParsedReference::new(ReferenceKind::Relative);
            parsed.resource_type = Some(resource_type.to_string());
            parsed.id = Some(id.to_string());
            parsed.version = version.map(str::to_string);
            Ok(parsed)
        }
        _ => Err(ReferenceFormatError::new(
            text,
            "expected Type/id or Type/id/_history/version",
        )),
    }
}

/// Match `.../Type/id` or `.../Type/id/_history/vid` at the end of a path.
fn trailing_resource_path<'a>(segments: &[&'a str]) -> Option<(&'a str, &'a str, Option<&'a str>)> {
    let valid = |t: &str, id: &str| RESOURCE_TYPE_REGEX.is_match(t) && ID_REGEX.is_match(id);
    match *segments {
        [.., t, id, "_history", version] if valid(t, id) && ID_REGEX.is_match(version) => {
            Some((t, id, Some(version)))
        }
        [.., t, id] if valid(t, id) => Some((t, id, None)),
        _ => None,
    }
}

/// Parse a pointer value (string or Reference object) and check it against
/// allowed target types. An empty `allowed` list accepts any type.
pub fn resolve_reference(
    pointer: &Value,
    allowed: &[String],
) -> Result<ParsedReference, ReferenceFormatError> {
    let parsed = match pointer {
        Value::String(text) => parse_reference(text)?,
        Value::Object(map) => match map.get("reference") {
            Some(Value::String(text)) => parse_reference(text)?,
            Some(other) => {
                return Err(ReferenceFormatError::new(other.to_string(), "reference must be a string"));
            }
            None if map.contains_key("identifier") => {
                let mut parsed = ParsedReference::new(ReferenceKind::Logical);
                parsed.resource_type = map.get("type").and_then(Value::as_str).map(type_name_of);
                parsed
            }
            None => {
                return Err(ReferenceFormatError::new("", "neither reference nor identifier given"));
            }
        },
        other => return Err(ReferenceFormatError::new(other.to_string(), "not a reference")),
    };

    if !parsed.conforms_to(allowed) {
        return Err(ReferenceFormatError::new(
            parsed.resource_type.clone().unwrap_or_default(),
            format!("target type is not one of {}", allowed.join(", ")),
        ));
    }
    Ok(parsed)
}

/// `Reference.type` may be a type name or an absolute StructureDefinition URL.
fn type_name_of(value: &str) -> String {
    value
        .strip_prefix(CORE_PROFILE_BASE)
        .unwrap_or(value)
        .to_string()
}

/// Resource types permitted by `targetProfile`. `None` means unrestricted.
pub fn allowed_target_types(store: &SchemaStore, type_ref: &TypeRef) -> Option<Vec<String>> {
    let mut allowed = Vec::new();
    for profile in type_ref.target_profiles() {
        let type_name = match store.resolve_canonical(profile) {
            Ok(doc) => doc.type_name().to_string(),
            Err(_) => match profile.strip_prefix(CORE_PROFILE_BASE) {
                Some(name) => name.split('|').next().unwrap_or(name).to_string(),
                // Unknown profile: the type cannot be narrowed
                None => return None,
            },
        };
        if matches!(type_name.as_str(), "Resource" | "DomainResource") {
            return None;
        }
        if !allowed.contains(&type_name) {
            allowed.push(type_name);
        }
    }
    (!allowed.is_empty()).then_some(allowed)
}

/// Resource type of a contained resource with the given local id.
fn contained_type<'v>(resource: &'v Value, id: &str) -> Option<&'v str> {
    resource
        .get("contained")?
        .as_array()?
        .iter()
        .find(|c| c.get("id").and_then(Value::as_str) == Some(id))?
        .get("resourceType")?
        .as_str()
}

/// Element-level check of a Reference value.
pub fn check_reference(
    store: &SchemaStore,
    reference: &Value,
    type_ref: &TypeRef,
    resource: &Value,
    path: &str,
    outcome: &mut Outcome,
) {
    let Some(object) = reference.as_object() else {
        return;
    };
    let declared_type = object.get("type").and_then(Value::as_str).map(type_name_of);

    let parsed = match object.get("reference") {
        Some(Value::String(text)) => match parse_reference(text) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                outcome.push(ValidationIssue::error(
                    IssueCode::ReferenceFormatError,
                    join_path(path, "reference"),
                    e.to_string(),
                ));
                return;
            }
        },
        // Non-string values are reported by the element pass
        Some(_) => return,
        None => None,
    };

    let mut actual_type = parsed.as_ref().and_then(|p| p.resource_type.clone());
    if let Some(ParsedReference {
        kind: ReferenceKind::Local,
        id: Some(id),
        ..
    }) = &parsed
    {
        actual_type = contained_type(resource, id).map(str::to_string);
    }

    if let (Some(actual), Some(declared)) = (&actual_type, &declared_type) {
        if actual != declared {
            outcome.push(ValidationIssue::error(
                IssueCode::ReferenceTarget,
                path,
                format!("Reference points to a {actual} but Reference.type says {declared}"),
            ));
        }
    }

    let Some(allowed) = allowed_target_types(store, type_ref) else {
        return;
    };
    if let Some(target) = actual_type.or(declared_type) {
        if !allowed.contains(&target) {
            outcome.push(ValidationIssue::error(
                IssueCode::ReferenceTarget,
                path,
                format!(
                    "Reference to {target} is not allowed here (expected {})",
                    allowed.join(" | ")
                ),
            ));
        }
    }
}
