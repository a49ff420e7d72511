//! Slice assignment and slicing rules.
//!
//! Each value of a sliced element goes to the first slice (in declaration
//! order) whose discriminators all match. Discriminators that cannot be
//! decided from the snapshot alone fall back to trial validation of the
//! value against the slice subtree.

use std::borrow::Cow;

use serde_json::Value;

use crate::error::Result;
use crate::evaluator::select_path;
use crate::types::{
    Discriminator, DiscriminatorKind, MaxCardinality, SchemaDocument, Slicing, SlicingRules,
    TypeRef, split_canonical,
};
use crate::validation::element::{ElementValidator, Occurrence};
use crate::validation::outcome::{IssueCode, Outcome, ValidationIssue};
use crate::validation::pattern::{fixed_matches, pattern_matches};
use crate::validation::session::Scope;

/// Expected discriminator value and whether it must match exactly.
struct Expected {
    value: Value,
    exact: bool,
}

impl ElementValidator<'_> {
    /// Partition `items` over the slices of `node`, check the slicing rules,
    /// then validate each value against its slice (or the base element).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_sliced<'v>(
        &self,
        doc: &SchemaDocument,
        node: usize,
        type_ref: Option<&TypeRef>,
        items: &[Occurrence<'v>],
        path: &str,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let Some(slicing) = doc.element(node).slicing.as_ref() else {
            for item in items {
                self.validate_item(doc, node, type_ref, item, scope, outcome)?;
            }
            return Ok(());
        };
        let slices = doc.slices(node);

        let mut assigned = Vec::with_capacity(items.len());
        for item in items {
            assigned.push(self.match_slice(doc, slicing, slices, type_ref, item, scope)?);
        }

        check_rules(doc, node, slicing, slices, items, &assigned, outcome);

        for (position, &slice) in slices.iter().enumerate() {
            let matched: Vec<&Occurrence<'v>> = items
                .iter()
                .zip(&assigned)
                .filter(|(_, slot)| **slot == Some(position))
                .map(|(item, _)| item)
                .collect();
            self.check_cardinality(doc, slice, matched.len(), path, outcome);
            for item in matched {
                self.validate_item(doc, slice, type_ref, item, scope, outcome)?;
            }
        }

        for (item, slot) in items.iter().zip(&assigned) {
            if slot.is_none() {
                self.validate_item(doc, node, type_ref, item, scope, outcome)?;
            }
        }
        Ok(())
    }

    fn match_slice<'v>(
        &self,
        doc: &SchemaDocument,
        slicing: &Slicing,
        slices: &[usize],
        type_ref: Option<&TypeRef>,
        item: &Occurrence<'v>,
        scope: Scope<'v>,
    ) -> Result<Option<usize>> {
        let Some(value) = item.value else {
            return Ok(None);
        };
        for (position, &slice) in slices.iter().enumerate() {
            if self.slice_matches(doc, slice, slicing, type_ref, value, scope)? {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    fn slice_matches<'v>(
        &self,
        doc: &SchemaDocument,
        slice: usize,
        slicing: &Slicing,
        type_ref: Option<&TypeRef>,
        value: &'v Value,
        scope: Scope<'v>,
    ) -> Result<bool> {
        if slicing.discriminator.is_empty() {
            return self.trial_match(doc, slice, type_ref, value, scope);
        }

        for discriminator in &slicing.discriminator {
            let actual = match discriminator.kind {
                DiscriminatorKind::Unsupported => None,
                _ => self.session().select(&discriminator.path, value, scope.root),
            };
            let verdict = match (discriminator.kind, actual) {
                (_, None) => None,
                (DiscriminatorKind::Value | DiscriminatorKind::Pattern, Some(actual)) => {
                    value_discriminator(doc, slice, discriminator, &actual)
                }
                (DiscriminatorKind::Type, Some(actual)) => {
                    type_discriminator(doc, slice, discriminator, &actual)
                }
                (DiscriminatorKind::Exists, Some(actual)) => {
                    exists_discriminator(doc, slice, discriminator, &actual)
                }
                (DiscriminatorKind::Profile, Some(actual)) => {
                    self.profile_discriminator(doc, slice, discriminator, &actual, scope)?
                }
                (DiscriminatorKind::Unsupported, Some(_)) => None,
            };
            let matched = match verdict {
                Some(matched) => matched,
                None => self.trial_match(doc, slice, type_ref, value, scope)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The value validates against the slice subtree without errors.
    fn trial_match<'v>(
        &self,
        doc: &SchemaDocument,
        slice: usize,
        type_ref: Option<&TypeRef>,
        value: &'v Value,
        scope: Scope<'v>,
    ) -> Result<bool> {
        let mut scratch = Outcome::new();
        self.validate_item(doc, slice, type_ref, &Occurrence::of(value, ""), scope, &mut scratch)?;
        Ok(scratch.is_valid())
    }

    /// The value at the discriminator path conforms to one of the profiles
    /// declared for it in the slice.
    fn profile_discriminator<'v>(
        &self,
        doc: &SchemaDocument,
        slice: usize,
        discriminator: &Discriminator,
        actual: &[Cow<'_, Value>],
        scope: Scope<'v>,
    ) -> Result<Option<bool>> {
        let target = discriminator_node(doc, slice, &discriminator.path).unwrap_or(slice);
        let profiles: Vec<_> = doc
            .element(target)
            .type_refs()
            .iter()
            .flat_map(TypeRef::profiles)
            .filter_map(|profile| self.session().store.resolve_canonical(profile).ok())
            .collect();
        if profiles.is_empty() {
            return Ok(None);
        }

        for candidate in actual.iter().map(|c| &**c) {
            let inner = if candidate.get("resourceType").is_some() {
                scope.nested(candidate)
            } else {
                scope.deeper()
            };
            for profile in &profiles {
                let mut scratch = Outcome::new();
                self.validate_item(
                    profile,
                    profile.root(),
                    None,
                    &Occurrence::of(candidate, ""),
                    inner,
                    &mut scratch,
                )?;
                if scratch.is_valid() {
                    return Ok(Some(true));
                }
            }
        }
        Ok(Some(false))
    }
}

fn check_rules(
    doc: &SchemaDocument,
    node: usize,
    slicing: &Slicing,
    slices: &[usize],
    items: &[Occurrence<'_>],
    assigned: &[Option<usize>],
    outcome: &mut Outcome,
) {
    let element_path = &doc.element(node).path;
    let slice_label = |position: usize| doc.slice_name(slices[position]).unwrap_or("?");

    match slicing.rules {
        SlicingRules::Closed => {
            for (item, slot) in items.iter().zip(assigned) {
                if slot.is_none() {
                    outcome.push(ValidationIssue::error(
                        IssueCode::SlicingViolation,
                        &item.path,
                        format!("Value matches no slice of {element_path} and the slicing is closed"),
                    ));
                }
            }
        }
        SlicingRules::OpenAtEnd => {
            if let Some(last) = assigned.iter().rposition(Option::is_some) {
                for (item, _) in items.iter().zip(assigned).take(last).filter(|(_, s)| s.is_none()) {
                    outcome.push(ValidationIssue::error(
                        IssueCode::SlicingViolation,
                        &item.path,
                        format!("Unsliced values of {element_path} must come after all slices"),
                    ));
                }
            }
        }
        SlicingRules::Open => {}
    }

    if slicing.ordered {
        let mut highest: Option<usize> = None;
        for (item, slot) in items.iter().zip(assigned) {
            let Some(position) = *slot else {
                continue;
            };
            match highest {
                Some(top) if position < top => {
                    outcome.push(ValidationIssue::error(
                        IssueCode::SlicingViolation,
                        &item.path,
                        format!(
                            "Slice '{}' appears after slice '{}' but {element_path} is ordered",
                            slice_label(position),
                            slice_label(top)
                        ),
                    ));
                }
                _ => highest = Some(position),
            }
        }
    }
}

/// Discriminator path relative to the sliced element (`$this` is empty).
fn relative_path(path: &str) -> &str {
    let path = path.trim();
    match path.strip_prefix("$this") {
        Some(rest) => rest.trim_start_matches('.'),
        None => path,
    }
}

/// Node in the subtree of `root` whose path is `path` (choice paths match
/// with or without `[x]`).
fn find_in_subtree(doc: &SchemaDocument, root: usize, path: &str) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let element_path = &doc.element(id).path;
        if element_path == path || element_path.strip_suffix("[x]") == Some(path) {
            return Some(id);
        }
        stack.extend(doc.children(id).iter().rev().copied());
    }
    None
}

fn discriminator_node(doc: &SchemaDocument, slice: usize, path: &str) -> Option<usize> {
    let relative = relative_path(path);
    if relative.is_empty() {
        return Some(slice);
    }
    if relative.contains('(') {
        return None;
    }
    find_in_subtree(doc, slice, &format!("{}.{relative}", doc.element(slice).path))
}

fn declared_value(doc: &SchemaDocument, node: usize) -> Option<Expected> {
    let element = doc.element(node);
    if let Some(value) = element.fixed_value() {
        return Some(Expected {
            value: value.clone(),
            exact: true,
        });
    }
    element.pattern_value().map(|value| Expected {
        value: value.clone(),
        exact: false,
    })
}

/// Profile URL of an extension slice, used as its implied `url`.
fn extension_profile(doc: &SchemaDocument, slice: usize) -> Option<String> {
    doc.element(slice)
        .type_refs()
        .iter()
        .find(|t| t.code_name() == "Extension")
        .and_then(|t| t.profiles().first())
        .map(|profile| split_canonical(profile).0.to_string())
}

/// Value the slice requires at the discriminator path: a fixed/pattern on
/// the node at that path, else a fixed/pattern on an ancestor navigated down
/// to the path, else the extension profile for `url`.
fn expected_value(doc: &SchemaDocument, slice: usize, path: &str) -> Option<Expected> {
    let relative = relative_path(path);
    if relative.contains('(') {
        return None;
    }
    let slice_path = &doc.element(slice).path;
    let segments: Vec<&str> = if relative.is_empty() {
        Vec::new()
    } else {
        relative.split('.').collect()
    };

    for depth in (0..=segments.len()).rev() {
        let prefix = if depth == 0 {
            slice_path.clone()
        } else {
            format!("{slice_path}.{}", segments[..depth].join("."))
        };
        let Some(found) = find_in_subtree(doc, slice, &prefix) else {
            continue;
        };
        let Some(declared) = declared_value(doc, found) else {
            continue;
        };
        if depth == segments.len() {
            return Some(declared);
        }
        let rest = segments[depth..].join(".");
        if let Some(value) = select_path(&declared.value, &rest).and_then(|v| v.first().copied()) {
            return Some(Expected {
                value: value.clone(),
                exact: declared.exact,
            });
        }
    }

    if relative == "url" {
        return extension_profile(doc, slice).map(|url| Expected {
            value: Value::String(url),
            exact: true,
        });
    }
    None
}

fn value_discriminator(
    doc: &SchemaDocument,
    slice: usize,
    discriminator: &Discriminator,
    actual: &[Cow<'_, Value>],
) -> Option<bool> {
    let expected = expected_value(doc, slice, &discriminator.path)?;
    Some(actual.iter().any(|candidate| {
        if expected.exact {
            fixed_matches(candidate, &expected.value)
        } else {
            pattern_matches(candidate, &expected.value)
        }
    }))
}

/// Decided only for resources, whose type is visible in `resourceType`.
fn type_discriminator(
    doc: &SchemaDocument,
    slice: usize,
    discriminator: &Discriminator,
    actual: &[Cow<'_, Value>],
) -> Option<bool> {
    let target = discriminator_node(doc, slice, &discriminator.path)?;
    let allowed: Vec<&str> = doc
        .element(target)
        .type_refs()
        .iter()
        .map(TypeRef::code_name)
        .collect();
    if allowed.is_empty() {
        return None;
    }
    actual
        .iter()
        .find_map(|candidate| candidate.get("resourceType").and_then(Value::as_str))
        .map(|resource_type| allowed.contains(&resource_type))
}

fn exists_discriminator(
    doc: &SchemaDocument,
    slice: usize,
    discriminator: &Discriminator,
    actual: &[Cow<'_, Value>],
) -> Option<bool> {
    let present = !actual.is_empty();
    let target = discriminator_node(doc, slice, &discriminator.path)?;
    let cardinality = doc.node(target).cardinality;
    if cardinality.min >= 1 {
        Some(present)
    } else if cardinality.max == MaxCardinality::Bounded(0) {
        Some(!present)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValidatorConfig;
    use crate::evaluator::{EvaluationError, EvaluationResult};
    use crate::storage::SchemaStore;
    use crate::types::{ElementDefinition, Snapshot, StructureDefinition};
    use crate::validation::session::ValidationSession;
    use serde_json::{Map, json};

    fn sliced(rules: SlicingRules, ordered: bool) -> SchemaDocument {
        let mut slicing = Slicing::new(rules).with_discriminator(DiscriminatorKind::Value, "system");
        if ordered {
            slicing = slicing.ordered();
        }
        let definition = StructureDefinition {
            url: "http://example.org/StructureDefinition/Card".to_string(),
            version: None,
            name: Some("Card".to_string()),
            type_name: "Card".to_string(),
            kind: Some("resource".to_string()),
            is_abstract: None,
            base_definition: None,
            derivation: None,
            snapshot: Some(Snapshot {
                element: vec![
                    ElementDefinition::new("Card"),
                    ElementDefinition::new("Card.tag")
                        .with_cardinality(0, "*")
                        .with_type("BackboneElement")
                        .with_slicing(slicing),
                    ElementDefinition::new("Card.tag.system")
                        .with_cardinality(0, "1")
                        .with_type("uri"),
                    ElementDefinition::new("Card.tag.value")
                        .with_cardinality(0, "1")
                        .with_type("string"),
                    ElementDefinition::new("Card.tag")
                        .with_slice_name("a")
                        .with_cardinality(1, "2")
                        .with_type("BackboneElement"),
                    ElementDefinition::new("Card.tag.system")
                        .with_cardinality(1, "1")
                        .with_type("uri")
                        .with_fixed("Uri", json!("urn:a")),
                    ElementDefinition::new("Card.tag.value")
                        .with_cardinality(1, "1")
                        .with_type("string"),
                    ElementDefinition::new("Card.tag")
                        .with_slice_name("b")
                        .with_cardinality(0, "1")
                        .with_type("BackboneElement"),
                    ElementDefinition::new("Card.tag.system")
                        .with_cardinality(1, "1")
                        .with_type("uri")
                        .with_pattern("Uri", json!("urn:b")),
                    ElementDefinition::new("Card.tag.value")
                        .with_cardinality(0, "1")
                        .with_type("string"),
                ],
            }),
            additional: Map::new(),
        };
        SchemaDocument::new(definition).unwrap()
    }

    fn run(doc: &SchemaDocument, instance: &Value) -> Vec<(String, String)> {
        let store = SchemaStore::new();
        let config = ValidatorConfig::default();
        let validator = ElementValidator::new(ValidationSession::new(&store, &config));
        let mut outcome = Outcome::new();
        validator
            .validate_item(doc, 0, None, &Occurrence::of(instance, ""), Scope::root(instance), &mut outcome)
            .unwrap();
        outcome
            .issues()
            .iter()
            .map(|i| (i.code.to_string(), i.path.clone()))
            .collect()
    }

    #[test]
    fn test_closed_slicing_flags_unmatched_values() {
        let instance = json!({
            "resourceType": "Card",
            "tag": [
                {"system": "urn:a", "value": "1"},
                {"system": "urn:x", "value": "2"},
                {"system": "urn:a", "value": "3"}
            ]
        });
        assert_eq!(
            run(&sliced(SlicingRules::Closed, false), &instance),
            vec![("slicing-violation".to_string(), "tag[1]".to_string())]
        );
        assert!(run(&sliced(SlicingRules::Open, false), &instance).is_empty());
    }

    #[test]
    fn test_slice_cardinality_and_content() {
        let instance = json!({
            "resourceType": "Card",
            "tag": [{"system": "urn:b"}, {"system": "urn:a"}]
        });
        assert_eq!(
            run(&sliced(SlicingRules::Open, false), &instance),
            vec![("cardinality-violation".to_string(), "tag[1].value".to_string())]
        );

        let missing = json!({"resourceType": "Card", "tag": [{"system": "urn:b"}]});
        assert_eq!(
            run(&sliced(SlicingRules::Open, false), &missing),
            vec![("cardinality-violation".to_string(), "tag".to_string())]
        );
    }

    #[test]
    fn test_open_at_end_and_ordering() {
        let instance = json!({
            "resourceType": "Card",
            "tag": [
                {"system": "urn:x"},
                {"system": "urn:b"},
                {"system": "urn:a", "value": "1"}
            ]
        });
        assert_eq!(
            run(&sliced(SlicingRules::OpenAtEnd, false), &instance),
            vec![("slicing-violation".to_string(), "tag[0]".to_string())]
        );
        assert_eq!(
            run(&sliced(SlicingRules::Open, true), &instance),
            vec![("slicing-violation".to_string(), "tag[2]".to_string())]
        );
    }

    #[test]
    fn test_discriminator_paths_go_through_evaluator() {
        let doc = sliced(SlicingRules::Closed, false);
        let instance = json!({"resourceType": "Card", "tag": [{"system": "urn:x", "value": "1"}]});
        assert_eq!(
            run(&doc, &instance),
            vec![
                ("slicing-violation".to_string(), "tag[0]".to_string()),
                ("cardinality-violation".to_string(), "tag".to_string()),
            ]
        );

        // An evaluator that sees every system as urn:a puts the value in slice a
        let evaluator = |expression: &str, _: &Value, _: &Value| {
            assert_eq!(expression, "system");
            Ok::<_, EvaluationError>(EvaluationResult::Collection(vec![json!("urn:a")]))
        };
        let store = SchemaStore::new();
        let config = ValidatorConfig::default();
        let session = ValidationSession::new(&store, &config).with_evaluator(&evaluator);
        let mut outcome = Outcome::new();
        ElementValidator::new(session)
            .validate_item(&doc, 0, None, &Occurrence::of(&instance, ""), Scope::root(&instance), &mut outcome)
            .unwrap();
        let issues: Vec<_> = outcome
            .issues()
            .iter()
            .map(|i| (i.code.to_string(), i.path.clone()))
            .collect();
        assert_eq!(issues, vec![("fixed-value-violation".to_string(), "tag[0].system".to_string())]);
    }

    #[test]
    fn test_expected_value_from_ancestor_pattern() {
        let definition = StructureDefinition {
            url: "http://example.org/StructureDefinition/Obs".to_string(),
            version: None,
            name: None,
            type_name: "Obs".to_string(),
            kind: Some("resource".to_string()),
            is_abstract: None,
            base_definition: None,
            derivation: None,
            snapshot: Some(Snapshot {
                element: vec![
                    ElementDefinition::new("Obs"),
                    ElementDefinition::new("Obs.category")
                        .with_cardinality(0, "*")
                        .with_type("CodeableConcept")
                        .with_slicing(
                            Slicing::new(SlicingRules::Open)
                                .with_discriminator(DiscriminatorKind::Pattern, "coding.code"),
                        ),
                    ElementDefinition::new("Obs.category")
                        .with_slice_name("vitals")
                        .with_cardinality(1, "1")
                        .with_type("CodeableConcept")
                        .with_pattern("CodeableConcept", json!({"coding": [{"code": "vital-signs"}]})),
                ],
            }),
            additional: Map::new(),
        };
        let doc = SchemaDocument::new(definition).unwrap();
        let expected = expected_value(&doc, 2, "coding.code").unwrap();
        assert_eq!(expected.value, json!("vital-signs"));
        assert!(!expected.exact);
    }
}
