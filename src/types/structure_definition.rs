//! StructureDefinition / ElementDefinition models.
//!
//! Only the parts of the FHIR conformance resources that drive validation are
//! modelled; everything else is kept in the `additional` maps so a definition
//! can be round-tripped without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// FHIR primitive type codes.
pub static PRIMITIVE_TYPES: &[&str] = &[
    "boolean",
    "integer",
    "integer64",
    "string",
    "decimal",
    "uri",
    "url",
    "canonical",
    "base64Binary",
    "instant",
    "date",
    "dateTime",
    "time",
    "code",
    "oid",
    "id",
    "markdown",
    "unsignedInt",
    "positiveInt",
    "uuid",
    "xhtml",
];

/// Complex data types that may appear in a choice (`[x]`) element.
pub static CHOICE_COMPLEX_TYPES: &[&str] = &[
    "Address",
    "Age",
    "Annotation",
    "Attachment",
    "CodeableConcept",
    "Coding",
    "ContactDetail",
    "ContactPoint",
    "Contributor",
    "Count",
    "DataRequirement",
    "Distance",
    "Dosage",
    "Duration",
    "Expression",
    "HumanName",
    "Identifier",
    "Meta",
    "Money",
    "ParameterDefinition",
    "Period",
    "Quantity",
    "Range",
    "Ratio",
    "Reference",
    "RelatedArtifact",
    "SampledData",
    "Signature",
    "Timing",
    "TriggerDefinition",
    "UsageContext",
];

const FHIRPATH_SYSTEM_PREFIX: &str = "http://hl7.org/fhirpath/System.";

pub fn is_primitive_type(code: &str) -> bool {
    PRIMITIVE_TYPES.contains(&code)
}

/// Whether `suffix` is a type name that can follow a choice element's base
/// name, as `Quantity` in `valueQuantity`.
pub fn is_choice_type_suffix(suffix: &str) -> bool {
    let mut chars = suffix.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_uppercase() {
        return false;
    }
    let primitive = first.to_ascii_lowercase().to_string() + chars.as_str();
    is_primitive_type(&primitive) || CHOICE_COMPLEX_TYPES.contains(&suffix)
}

/// A conformance definition for one resource or data type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl StructureDefinition {
    pub fn is_profile(&self) -> bool {
        self.derivation.as_deref() == Some("constraint")
    }

    pub fn is_resource(&self) -> bool {
        self.kind.as_deref() == Some("resource")
    }

    pub fn elements(&self) -> &[ElementDefinition] {
        self.snapshot
            .as_ref()
            .map(|s| s.element.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub element: Vec<ElementDefinition>,
}

/// One field position in a flattened snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementBase>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<TypeRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<Slicing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<Constraint>>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl ElementDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cardinality(mut self, min: u32, max: &str) -> Self {
        self.min = Some(min);
        self.max = Some(max.to_string());
        self
    }

    pub fn with_base(mut self, path: &str, min: u32, max: &str) -> Self {
        self.base = Some(ElementBase {
            path: path.to_string(),
            min: Some(min),
            max: Some(max.to_string()),
        });
        self
    }

    pub fn with_type(mut self, code: &str) -> Self {
        self.types
            .get_or_insert_with(Vec::new)
            .push(TypeRef::new(code));
        self
    }

    pub fn with_type_ref(mut self, type_ref: TypeRef) -> Self {
        self.types.get_or_insert_with(Vec::new).push(type_ref);
        self
    }

    pub fn with_slice_name(mut self, name: &str) -> Self {
        self.slice_name = Some(name.to_string());
        self
    }

    pub fn with_slicing(mut self, slicing: Slicing) -> Self {
        self.slicing = Some(slicing);
        self
    }

    pub fn with_binding(mut self, strength: BindingStrength, value_set: &str) -> Self {
        self.binding = Some(Binding {
            strength,
            value_set: Some(value_set.to_string()),
            description: None,
        });
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint.get_or_insert_with(Vec::new).push(constraint);
        self
    }

    /// Attach a `fixed[x]` value, e.g. `with_fixed("Uri", json!("http://loinc.org"))`.
    pub fn with_fixed(mut self, type_suffix: &str, value: Value) -> Self {
        self.additional.insert(format!("fixed{type_suffix}"), value);
        self
    }

    /// Attach a `pattern[x]` value.
    pub fn with_pattern(mut self, type_suffix: &str, value: Value) -> Self {
        self.additional.insert(format!("pattern{type_suffix}"), value);
        self
    }

    /// Last path segment, e.g. `value[x]` for `Observation.value[x]`.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    pub fn type_refs(&self) -> &[TypeRef] {
        self.types.as_deref().unwrap_or_default()
    }

    pub fn constraints(&self) -> &[Constraint] {
        self.constraint.as_deref().unwrap_or_default()
    }

    pub fn fixed_value(&self) -> Option<&Value> {
        typed_property(&self.additional, "fixed")
    }

    pub fn pattern_value(&self) -> Option<&Value> {
        typed_property(&self.additional, "pattern")
    }
}

/// Look up a `prefix[x]` property such as `fixedCode` or `patternCodeableConcept`.
fn typed_property<'a>(properties: &'a Map<String, Value>, prefix: &str) -> Option<&'a Value> {
    properties.iter().find_map(|(key, value)| {
        let rest = key.strip_prefix(prefix)?;
        rest.chars()
            .next()
            .filter(|c| c.is_ascii_uppercase())
            .map(|_| value)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,
}

impl TypeRef {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            profile: None,
            target_profile: None,
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile.get_or_insert_with(Vec::new).push(profile.to_string());
        self
    }

    pub fn with_target_profile(mut self, profile: &str) -> Self {
        self.target_profile
            .get_or_insert_with(Vec::new)
            .push(profile.to_string());
        self
    }

    /// Type code with FHIRPath system types mapped onto FHIR primitives.
    pub fn code_name(&self) -> &str {
        match self.code.strip_prefix(FHIRPATH_SYSTEM_PREFIX) {
            Some("String") => "string",
            Some("Boolean") => "boolean",
            Some("Integer") => "integer",
            Some("Decimal") => "decimal",
            Some("Date") => "date",
            Some("DateTime") => "dateTime",
            Some("Time") => "time",
            _ => &self.code,
        }
    }

    /// Suffix used by choice elements, e.g. `dateTime` -> `DateTime`.
    pub fn choice_suffix(&self) -> String {
        let code = self.code_name();
        let mut chars = code.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }

    pub fn profiles(&self) -> &[String] {
        self.profile.as_deref().unwrap_or_default()
    }

    pub fn target_profiles(&self) -> &[String] {
        self.target_profile.as_deref().unwrap_or_default()
    }
}

/// `ElementDefinition.base`: where the element was first defined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ElementBase {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

/// Upper cardinality bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxCardinality {
    Bounded(u32),
    Unbounded,
}

impl MaxCardinality {
    pub fn parse(max: &str) -> Option<Self> {
        match max.trim() {
            "*" => Some(Self::Unbounded),
            n => n.parse().ok().map(Self::Bounded),
        }
    }

    pub fn allows(&self, count: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded(max) => count <= *max as usize,
        }
    }

    /// Whether an element with this bound is carried as a JSON array.
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Self::Bounded(0 | 1))
    }
}

impl fmt::Display for MaxCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "*"),
            Self::Bounded(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    pub max: MaxCardinality,
}

impl Cardinality {
    pub fn allows(&self, count: usize) -> bool {
        count >= self.min as usize && self.max.allows(count)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Slicing {
    #[serde(default)]
    pub discriminator: Vec<Discriminator>,
    #[serde(default)]
    pub rules: SlicingRules,
    #[serde(default)]
    pub ordered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Slicing {
    pub fn new(rules: SlicingRules) -> Self {
        Self {
            discriminator: Vec::new(),
            rules,
            ordered: false,
            description: None,
        }
    }

    pub fn with_discriminator(mut self, kind: DiscriminatorKind, path: &str) -> Self {
        self.discriminator.push(Discriminator {
            kind,
            path: path.to_string(),
        });
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discriminator {
    #[serde(rename = "type")]
    pub kind: DiscriminatorKind,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorKind {
    Value,
    Pattern,
    Type,
    Exists,
    Profile,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SlicingRules {
    #[serde(rename = "closed")]
    Closed,
    #[default]
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "openAtEnd")]
    OpenAtEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub strength: BindingStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl fmt::Display for BindingStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "required",
            Self::Extensible => "extensible",
            Self::Preferred => "preferred",
            Self::Example => "example",
        };
        f.write_str(s)
    }
}

/// An element invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    pub human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Constraint {
    pub fn new(key: &str, severity: ConstraintSeverity, human: &str, expression: &str) -> Self {
        Self {
            key: key.to_string(),
            severity,
            human: human.to_string(),
            expression: Some(expression.to_string()),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}
