//! Element Validator: walks instance data against an element tree.
//!
//! For every element position the checks run in a fixed order (array shape,
//! cardinality, slicing, type, fixed/pattern, binding, reference, invariants,
//! children) and never stop at the first failure, so one pass reports every
//! defect. Children are visited in snapshot declaration order and choice
//! types in their declared order, which keeps reports reproducible.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{FhirValidatorError, Result};
use crate::types::{ConstraintSeverity, ElementKind, SchemaDocument, TypeRef, is_primitive_type};
use crate::validation::binding::{check_binding, is_coded_type};
use crate::validation::outcome::{
    IssueCode, Outcome, Severity, ValidationIssue, index_path, join_path,
};
use crate::validation::pattern::{fixed_matches, pattern_matches};
use crate::validation::primitive::{expected_json_kind, json_kind_matches, lexical_error};
use crate::validation::reference::check_reference;
use crate::validation::session::{Scope, ValidationSession};

/// One value at an element position together with its `_name` sibling.
#[derive(Debug, Clone)]
pub(crate) struct Occurrence<'v> {
    pub value: Option<&'v Value>,
    pub extension: Option<&'v Value>,
    pub path: String,
    pub extension_path: String,
}

impl<'v> Occurrence<'v> {
    pub fn of(value: &'v Value, path: &str) -> Self {
        Self {
            value: Some(value),
            extension: None,
            path: path.to_string(),
            extension_path: String::new(),
        }
    }
}

/// Validates instance values against the nodes of a [`SchemaDocument`].
#[derive(Debug, Clone, Copy)]
pub struct ElementValidator<'a> {
    session: ValidationSession<'a>,
}

impl<'a> ElementValidator<'a> {
    pub fn new(session: ValidationSession<'a>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ValidationSession<'a> {
        &self.session
    }

    /// Validate the members of `object` against the children of `node`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_children<'v>(
        &self,
        doc: &SchemaDocument,
        node: usize,
        object: &'v Map<String, Value>,
        path: &str,
        scope: Scope<'v>,
        is_resource_root: bool,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let mut claimed: HashSet<&'v str> = HashSet::new();
        if is_resource_root {
            claimed.insert("resourceType");
        }

        for &child in doc.children(node) {
            let child_node = doc.node(child);
            if let ElementKind::Choice(types) = &child_node.kind {
                self.validate_choice(doc, node, child, types, object, path, scope, &mut claimed, outcome)?;
                continue;
            }

            let name = doc.element(child).name();
            let underscore = format!("_{name}");
            let value = object.get_key_value(name);
            let extension = match child_node.kind {
                ElementKind::Primitive(_) => object.get_key_value(underscore.as_str()),
                _ => None,
            };
            if let Some((key, _)) = value {
                claimed.insert(key.as_str());
            }
            if let Some((key, _)) = extension {
                claimed.insert(key.as_str());
            }

            let child_path = join_path(path, name);
            let extension_path = join_path(path, &underscore);
            let value = value.map(|(_, v)| v);
            let extension = extension.map(|(_, v)| v);

            if is_resource_root && name == "contained" {
                // Contained resources get their own pass after the container
                let items = self.collect_occurrences(
                    child_node.repeating,
                    value,
                    None,
                    &child_path,
                    &extension_path,
                    outcome,
                );
                self.check_cardinality(doc, child, items.len(), &child_path, outcome);
                continue;
            }

            self.validate_occurrences(
                doc,
                child,
                None,
                value,
                extension,
                &child_path,
                &extension_path,
                scope,
                outcome,
            )?;
        }

        if !self.session.config.allow_unknown_elements {
            for key in object.keys() {
                if !claimed.contains(key.as_str()) {
                    outcome.push(ValidationIssue::error(
                        IssueCode::UnknownElement,
                        join_path(path, key),
                        format!("Unrecognized element '{key}'"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// A `name[x]` element: find the typed key, reject conflicting or
    /// disallowed typed keys, validate the value under its resolved type.
    #[allow(clippy::too_many_arguments)]
    fn validate_choice<'v>(
        &self,
        doc: &SchemaDocument,
        parent: usize,
        node: usize,
        types: &[TypeRef],
        object: &'v Map<String, Value>,
        path: &str,
        scope: Scope<'v>,
        claimed: &mut HashSet<&'v str>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let element = doc.element(node);
        let base = element.name().trim_end_matches("[x]");
        let choice_path = join_path(path, base);

        let mut present = Vec::new();
        for type_ref in types {
            let key = format!("{base}{}", type_ref.choice_suffix());
            let value = object.get_key_value(key.as_str());
            let extension = object.get_key_value(format!("_{key}").as_str());
            if value.is_none() && extension.is_none() {
                continue;
            }
            if let Some((k, _)) = value {
                claimed.insert(k.as_str());
            }
            if let Some((k, _)) = extension {
                claimed.insert(k.as_str());
            }
            present.push((type_ref, key, value.map(|(_, v)| v), extension.map(|(_, v)| v)));
        }

        for key in object.keys() {
            if claimed.contains(key.as_str()) {
                continue;
            }
            let bare = key.strip_prefix('_').unwrap_or(key);
            if doc.child_for_key(parent, bare) != Some(node) {
                continue;
            }
            let suffix = &bare[base.len()..];
            claimed.insert(key.as_str());
            let allowed: Vec<&str> = types.iter().map(TypeRef::code_name).collect();
            outcome.push(ValidationIssue::error(
                IssueCode::TypeMismatch,
                join_path(path, key),
                format!(
                    "Type '{suffix}' is not allowed for {} (allowed: {})",
                    element.path,
                    allowed.join(", ")
                ),
            ));
        }

        match present.len() {
            0 => self.check_cardinality(doc, node, 0, &choice_path, outcome),
            1 => {}
            _ => {
                let keys: Vec<&str> = present.iter().map(|(_, key, _, _)| key.as_str()).collect();
                outcome.push(ValidationIssue::error(
                    IssueCode::ChoiceConflict,
                    &choice_path,
                    format!(
                        "Only one of {} may be present, found {}",
                        element.path,
                        keys.join(" and ")
                    ),
                ));
            }
        }

        for (type_ref, key, value, extension) in present {
            self.validate_occurrences(
                doc,
                node,
                Some(type_ref),
                value,
                extension,
                &join_path(path, &key),
                &join_path(path, &format!("_{key}")),
                scope,
                outcome,
            )?;
        }
        Ok(())
    }

    /// Shape, cardinality and slicing of all values at one element, then
    /// each value in turn.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_occurrences<'v>(
        &self,
        doc: &SchemaDocument,
        node: usize,
        type_ref: Option<&TypeRef>,
        value: Option<&'v Value>,
        extension: Option<&'v Value>,
        path: &str,
        extension_path: &str,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let repeating = doc.node(node).repeating;
        let items =
            self.collect_occurrences(repeating, value, extension, path, extension_path, outcome);
        self.check_cardinality(doc, node, items.len(), path, outcome);

        if self.session.config.check_slicing && doc.element(node).slicing.is_some() {
            return self.validate_sliced(doc, node, type_ref, &items, path, scope, outcome);
        }
        for item in &items {
            self.validate_item(doc, node, type_ref, item, scope, outcome)?;
        }
        Ok(())
    }

    /// Pair values with their `_name` extensions and check the array shape.
    pub(crate) fn collect_occurrences<'v>(
        &self,
        repeating: bool,
        value: Option<&'v Value>,
        extension: Option<&'v Value>,
        path: &str,
        extension_path: &str,
        outcome: &mut Outcome,
    ) -> Vec<Occurrence<'v>> {
        let is_array = match (value, extension) {
            (Some(v), _) => v.is_array(),
            (None, Some(e)) => e.is_array(),
            (None, None) => return Vec::new(),
        };

        if repeating && !is_array {
            outcome.push(ValidationIssue::error(
                IssueCode::ExpectedArray,
                path,
                "Repeating element must be an array",
            ));
        } else if !repeating && is_array {
            outcome.push(ValidationIssue::error(
                IssueCode::UnexpectedArray,
                path,
                "Element cannot repeat but an array was given",
            ));
        }

        let values = spread(value, path, outcome);
        let extensions = spread(extension, extension_path, outcome);
        let count = values.len().max(extensions.len());

        (0..count)
            .filter_map(|i| {
                let value = values.get(i).copied().flatten();
                let extension = extensions.get(i).copied().flatten();
                if value.is_none() && extension.is_none() {
                    return None;
                }
                let (path, extension_path) = if is_array {
                    (index_path(path, i), index_path(extension_path, i))
                } else {
                    (path.to_string(), extension_path.to_string())
                };
                Some(Occurrence {
                    value,
                    extension,
                    path,
                    extension_path,
                })
            })
            .collect()
    }

    pub(crate) fn check_cardinality(
        &self,
        doc: &SchemaDocument,
        node: usize,
        count: usize,
        path: &str,
        outcome: &mut Outcome,
    ) {
        let cardinality = doc.node(node).cardinality;
        if cardinality.allows(count) {
            return;
        }
        let element = doc.element(node);
        let label = match &element.slice_name {
            Some(slice) => format!("{}:{slice}", element.path),
            None => element.path.clone(),
        };
        outcome.push(ValidationIssue::error(
            IssueCode::CardinalityViolation,
            path,
            format!("{label}: found {count} value(s), expected {cardinality}"),
        ));
    }

    /// All checks for one value at one node.
    pub(crate) fn validate_item<'v>(
        &self,
        doc: &SchemaDocument,
        node: usize,
        type_ref: Option<&TypeRef>,
        item: &Occurrence<'v>,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let config = self.session.config;
        if scope.depth > config.max_depth {
            outcome.push(ValidationIssue::error(
                IssueCode::RecursionLimit,
                &item.path,
                format!("Nesting exceeds {} levels; content not validated", config.max_depth),
            ));
            return Ok(());
        }

        let resolved;
        let kind = match type_ref {
            Some(type_ref) => {
                resolved = kind_of_type(type_ref);
                &resolved
            }
            None => &doc.node(node).kind,
        };

        if let ElementKind::ContentReference(target) = kind {
            let Some(target_node) = doc.find_by_path(target) else {
                return Err(FhirValidatorError::invalid_schema(
                    doc.url(),
                    format!("contentReference to unknown element '{target}'"),
                ));
            };
            return self.validate_item(doc, target_node, None, item, scope, outcome);
        }

        let Some(value) = item.value else {
            if let Some(extension) = item.extension {
                self.validate_primitive_extension(extension, &item.extension_path, scope, outcome)?;
            }
            return Ok(());
        };
        let element = doc.element(node);

        let type_code = match kind {
            ElementKind::Primitive(code) | ElementKind::Complex(code) => Some(code.as_str()),
            ElementKind::Resource => Some("Resource"),
            _ => None,
        };

        let well_formed = match kind {
            ElementKind::Primitive(code) => {
                if !json_kind_matches(code, value) {
                    outcome.push(ValidationIssue::error(
                        IssueCode::TypeMismatch,
                        &item.path,
                        format!(
                            "Expected {} for type {code}, found {}",
                            expected_json_kind(code),
                            json_kind(value)
                        ),
                    ));
                    false
                } else {
                    if config.check_primitives {
                        if let Some(problem) = lexical_error(code, value) {
                            outcome.push(ValidationIssue::error(
                                IssueCode::InvalidFormat,
                                &item.path,
                                problem,
                            ));
                        }
                    }
                    true
                }
            }
            ElementKind::Backbone | ElementKind::Complex(_) | ElementKind::Resource => {
                if value.is_object() {
                    true
                } else {
                    outcome.push(ValidationIssue::error(
                        IssueCode::TypeMismatch,
                        &item.path,
                        format!(
                            "Expected an object for {}, found {}",
                            type_code.unwrap_or("BackboneElement"),
                            json_kind(value)
                        ),
                    ));
                    false
                }
            }
            ElementKind::Choice(_) | ElementKind::ContentReference(_) => true,
        };

        if let Some(fixed) = element.fixed_value() {
            if !fixed_matches(value, fixed) {
                outcome.push(ValidationIssue::error(
                    IssueCode::FixedValueViolation,
                    &item.path,
                    format!("Value must be exactly {fixed}"),
                ));
            }
        }
        if let Some(pattern) = element.pattern_value() {
            if !pattern_matches(value, pattern) {
                outcome.push(ValidationIssue::error(
                    IssueCode::PatternViolation,
                    &item.path,
                    format!("Value does not match the required pattern {pattern}"),
                ));
            }
        }

        if well_formed {
            if let (Some(binding), Some(code)) = (&element.binding, type_code) {
                if config.check_bindings && is_coded_type(code) {
                    check_binding(self.session.store, binding, code, value, &item.path, outcome);
                }
            }
            if config.check_references && type_code == Some("Reference") {
                if let Some(reference_type) = type_ref.or_else(|| element.type_refs().first()) {
                    check_reference(
                        self.session.store,
                        value,
                        reference_type,
                        scope.resource,
                        &item.path,
                        outcome,
                    );
                }
            }
        }

        for constraint in element.constraints() {
            if self.session.check_invariant(constraint, value, scope.root)? == Some(false) {
                let severity = match constraint.severity {
                    ConstraintSeverity::Error => Severity::Error,
                    ConstraintSeverity::Warning => Severity::Warning,
                };
                outcome.push(ValidationIssue::new(
                    severity,
                    IssueCode::Invariant(constraint.key.clone()),
                    &item.path,
                    constraint.human.clone(),
                ));
            }
        }

        if well_formed {
            match (kind, value.as_object()) {
                (ElementKind::Backbone, Some(object)) => {
                    let is_root = node == doc.root();
                    let child_scope = if is_root { scope } else { scope.deeper() };
                    let is_resource_root = is_root && doc.definition().is_resource();
                    self.validate_children(
                        doc,
                        node,
                        object,
                        &item.path,
                        child_scope,
                        is_resource_root,
                        outcome,
                    )?;
                }
                (ElementKind::Complex(code), Some(object)) => {
                    if doc.children(node).is_empty() {
                        let declared = type_ref.or_else(|| element.type_refs().first());
                        self.validate_datatype(code, declared, value, &item.path, scope.deeper(), outcome)?;
                    } else {
                        self.validate_children(doc, node, object, &item.path, scope.deeper(), false, outcome)?;
                    }
                }
                (ElementKind::Resource, Some(_)) => {
                    self.validate_nested_resource(value, &item.path, scope, true, outcome)?;
                }
                _ => {}
            }
        }

        if let Some(extension) = item.extension {
            self.validate_primitive_extension(extension, &item.extension_path, scope, outcome)?;
        }
        Ok(())
    }

    /// Validate a complex value through the definition of its type, or of
    /// the first loadable profile declared on the type.
    pub(crate) fn validate_datatype<'v>(
        &self,
        code: &str,
        declared: Option<&TypeRef>,
        value: &'v Value,
        path: &str,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let store = self.session.store;
        let profiles = declared.map(TypeRef::profiles).unwrap_or_default();
        let mut document = profiles
            .iter()
            .find_map(|profile| store.resolve_canonical(profile).ok());

        if document.is_none() && !profiles.is_empty() {
            outcome.push(ValidationIssue::warning(
                IssueCode::UnknownProfile,
                path,
                format!(
                    "Profile {} is not loaded; checked against {code} only",
                    profiles.join(", ")
                ),
            ));
        }
        if document.is_none() {
            document = store.resolve_type(code);
        }
        let Some(document) = document else {
            outcome.push(ValidationIssue::warning(
                IssueCode::UnknownType,
                path,
                format!("No definition loaded for type {code}; content not checked"),
            ));
            return Ok(());
        };

        if document.definition().is_resource() {
            return self.validate_nested_resource(value, path, scope, true, outcome);
        }
        self.validate_item(
            &document,
            document.root(),
            None,
            &Occurrence::of(value, path),
            scope,
            outcome,
        )
    }

    /// `_name` objects carry only `id` and `extension`.
    fn validate_primitive_extension<'v>(
        &self,
        extension: &'v Value,
        path: &str,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let Some(object) = extension.as_object() else {
            outcome.push(ValidationIssue::error(
                IssueCode::TypeMismatch,
                path,
                format!("Primitive extension must be an object, found {}", json_kind(extension)),
            ));
            return Ok(());
        };

        for (key, member) in object {
            let member_path = join_path(path, key);
            match key.as_str() {
                "id" if !member.is_string() => {
                    outcome.push(ValidationIssue::error(
                        IssueCode::TypeMismatch,
                        member_path,
                        "Element id must be a string",
                    ));
                }
                "id" => {}
                "extension" => {
                    let Some(items) = member.as_array() else {
                        outcome.push(ValidationIssue::error(
                            IssueCode::ExpectedArray,
                            member_path,
                            "Repeating element must be an array",
                        ));
                        continue;
                    };
                    for (i, item) in items.iter().enumerate() {
                        self.validate_datatype(
                            "Extension",
                            None,
                            item,
                            &index_path(&member_path, i),
                            scope.deeper(),
                            outcome,
                        )?;
                    }
                }
                _ if self.session.config.allow_unknown_elements => {}
                _ => outcome.push(ValidationIssue::error(
                    IssueCode::UnknownElement,
                    member_path,
                    format!("Unrecognized element '{key}'"),
                )),
            }
        }
        Ok(())
    }
}

/// Element kind for a resolved choice type.
fn kind_of_type(type_ref: &TypeRef) -> ElementKind {
    match type_ref.code_name() {
        "BackboneElement" | "Element" => ElementKind::Backbone,
        "Resource" | "DomainResource" => ElementKind::Resource,
        code if is_primitive_type(code) => ElementKind::Primitive(code.to_string()),
        code => ElementKind::Complex(code.to_string()),
    }
}

/// Array items (nulls kept as gaps) or the single value.
fn spread<'v>(value: Option<&'v Value>, path: &str, outcome: &mut Outcome) -> Vec<Option<&'v Value>> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(|v| (!v.is_null()).then_some(v)).collect(),
        Some(Value::Null) => {
            outcome.push(ValidationIssue::error(
                IssueCode::TypeMismatch,
                path,
                "null is not a valid value",
            ));
            Vec::new()
        }
        Some(v) => vec![Some(v)],
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValidatorConfig;
    use crate::storage::SchemaStore;
    use crate::types::{
        BindingStrength, Constraint, ElementDefinition, Snapshot, StructureDefinition,
    };
    use crate::evaluator::{EvaluationError, EvaluationResult};
    use serde_json::json;

    fn document(type_name: &str, kind: &str, elements: Vec<ElementDefinition>) -> StructureDefinition {
        StructureDefinition {
            url: format!("http://example.org/StructureDefinition/{type_name}"),
            version: None,
            name: Some(type_name.to_string()),
            type_name: type_name.to_string(),
            kind: Some(kind.to_string()),
            is_abstract: None,
            base_definition: None,
            derivation: None,
            snapshot: Some(Snapshot { element: elements }),
            additional: Map::new(),
        }
    }

    fn widget() -> SchemaDocument {
        SchemaDocument::new(document(
            "Widget",
            "resource",
            vec![
                ElementDefinition::new("Widget"),
                ElementDefinition::new("Widget.status")
                    .with_cardinality(1, "1")
                    .with_type("code"),
                ElementDefinition::new("Widget.label")
                    .with_cardinality(0, "*")
                    .with_type("string"),
                ElementDefinition::new("Widget.size[x]")
                    .with_cardinality(0, "1")
                    .with_type("integer")
                    .with_type("string"),
                ElementDefinition::new("Widget.part")
                    .with_cardinality(0, "*")
                    .with_type("BackboneElement"),
                ElementDefinition::new("Widget.part.kind")
                    .with_cardinality(1, "1")
                    .with_type("code")
                    .with_fixed("Code", json!("bolt")),
            ],
        ))
        .unwrap()
    }

    fn run(doc: &SchemaDocument, instance: &Value, config: &ValidatorConfig) -> Outcome {
        let store = SchemaStore::new();
        let validator = ElementValidator::new(ValidationSession::new(&store, config));
        let mut outcome = Outcome::new();
        validator
            .validate_item(doc, doc.root(), None, &Occurrence::of(instance, ""), Scope::root(instance), &mut outcome)
            .unwrap();
        outcome
    }

    fn codes(outcome: &Outcome) -> Vec<(String, String)> {
        outcome
            .issues()
            .iter()
            .map(|i| (i.code.to_string(), i.path.clone()))
            .collect()
    }

    #[test]
    fn test_valid_instance() {
        let instance = json!({
            "resourceType": "Widget",
            "status": "active",
            "label": ["a", "b"],
            "sizeInteger": 3,
            "part": [{"kind": "bolt"}]
        });
        let outcome = run(&widget(), &instance, &ValidatorConfig::default());
        assert!(outcome.is_empty(), "{outcome}");
    }

    #[test]
    fn test_structural_failures() {
        let instance = json!({
            "resourceType": "Widget",
            "label": "single",
            "sizeInteger": 1,
            "sizeString": "one",
            "part": [{"kind": "nut"}, {}],
            "colour": "red"
        });
        let outcome = run(&widget(), &instance, &ValidatorConfig::default());
        assert_eq!(
            codes(&outcome),
            vec![
                ("cardinality-violation".to_string(), "status".to_string()),
                ("expected-array".to_string(), "label".to_string()),
                ("choice-conflict".to_string(), "size".to_string()),
                ("fixed-value-violation".to_string(), "part[0].kind".to_string()),
                ("cardinality-violation".to_string(), "part[1].kind".to_string()),
                ("unknown-element".to_string(), "colour".to_string()),
            ]
        );
    }

    #[test]
    fn test_disallowed_choice_type_and_primitive_kinds() {
        let instance = json!({
            "resourceType": "Widget",
            "status": 7,
            "sizeBoolean": true
        });
        let outcome = run(&widget(), &instance, &ValidatorConfig::default());
        assert_eq!(
            codes(&outcome),
            vec![
                ("type-mismatch".to_string(), "status".to_string()),
                ("type-mismatch".to_string(), "sizeBoolean".to_string()),
            ]
        );
    }

    #[test]
    fn test_primitive_extension_counts_as_present() {
        let instance = json!({
            "resourceType": "Widget",
            "_status": {"id": "s1"}
        });
        let outcome = run(&widget(), &instance, &ValidatorConfig::default());
        assert!(outcome.is_empty(), "{outcome}");
    }

    #[test]
    fn test_unknown_elements_can_be_allowed() {
        let instance = json!({"resourceType": "Widget", "status": "x", "colour": "red"});
        let config = ValidatorConfig::default().with_unknown_elements(true);
        assert!(run(&widget(), &instance, &config).is_empty());
    }

    #[test]
    fn test_recursion_limit() {
        let instance = json!({"resourceType": "Widget", "status": "x", "part": [{"kind": "bolt"}]});
        let config = ValidatorConfig::default().with_max_depth(0);
        let outcome = run(&widget(), &instance, &config);
        assert_eq!(
            codes(&outcome),
            vec![("recursion-limit".to_string(), "part[0].kind".to_string())]
        );
    }

    #[test]
    fn test_invariants_use_declared_severity() {
        let doc = SchemaDocument::new(document(
            "Gadget",
            "resource",
            vec![
                ElementDefinition::new("Gadget").with_constraint(Constraint::new(
                    "gad-1",
                    ConstraintSeverity::Warning,
                    "SHOULD have a name",
                    "name.exists()",
                )),
                ElementDefinition::new("Gadget.name")
                    .with_cardinality(0, "1")
                    .with_type("string"),
            ],
        ))
        .unwrap();

        let store = SchemaStore::new();
        let config = ValidatorConfig::default();
        let evaluator = |_: &str, context: &Value, _: &Value| {
            Ok::<_, EvaluationError>(EvaluationResult::Boolean(context.get("name").is_some()))
        };
        let validator =
            ElementValidator::new(ValidationSession::new(&store, &config).with_evaluator(&evaluator));

        let instance = json!({"resourceType": "Gadget"});
        let mut outcome = Outcome::new();
        validator
            .validate_item(&doc, 0, None, &Occurrence::of(&instance, ""), Scope::root(&instance), &mut outcome)
            .unwrap();

        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.issues()[0].severity, Severity::Warning);
        assert_eq!(outcome.issues()[0].code, IssueCode::Invariant("gad-1".to_string()));
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_missing_datatype_definition_is_a_warning() {
        let doc = SchemaDocument::new(document(
            "Holder",
            "resource",
            vec![
                ElementDefinition::new("Holder"),
                ElementDefinition::new("Holder.amount")
                    .with_cardinality(0, "1")
                    .with_type("Money")
                    .with_binding(BindingStrength::Example, "http://example.org/vs/none"),
            ],
        ))
        .unwrap();
        let instance = json!({"resourceType": "Holder", "amount": {"value": 1}});
        let outcome = run(&doc, &instance, &ValidatorConfig::default());
        assert_eq!(codes(&outcome), vec![("unknown-type".to_string(), "amount".to_string())]);
        assert!(outcome.is_valid());
    }
}
