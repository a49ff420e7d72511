//! Contained Validator: inline resources and their local references.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::Result;
use crate::validation::element::ElementValidator;
use crate::validation::outcome::{IssueCode, Outcome, ValidationIssue, index_path, join_path};
use crate::validation::session::Scope;

/// A `#fragment` reference found in a container, with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReference<'v> {
    pub path: String,
    /// Empty for `#`, which points at the container itself
    pub fragment: &'v str,
}

/// Every `reference` starting with `#` in the container and its contained
/// resources. Other nested resources (e.g. Bundle entries) are separate
/// containers and are not searched.
pub fn local_references<'v>(resource: &'v Value, path: &str) -> Vec<LocalReference<'v>> {
    let mut found = Vec::new();
    let Some(object) = resource.as_object() else {
        return found;
    };
    for (key, member) in object {
        let member_path = join_path(path, key);
        if key == "contained" {
            for (i, contained) in member.as_array().into_iter().flatten().enumerate() {
                let contained_path = index_path(&member_path, i);
                for (key, inner) in contained.as_object().into_iter().flatten() {
                    collect(inner, &join_path(&contained_path, key), &mut found);
                }
            }
        } else {
            collect(member, &member_path, &mut found);
        }
    }
    found
}

fn collect<'v>(value: &'v Value, path: &str, found: &mut Vec<LocalReference<'v>>) {
    match value {
        Value::Object(object) => {
            if object.contains_key("resourceType") {
                return;
            }
            for (key, member) in object {
                let member_path = join_path(path, key);
                match (key.as_str(), member.as_str()) {
                    ("reference", Some(text)) => {
                        if let Some(fragment) = text.strip_prefix('#') {
                            found.push(LocalReference {
                                path: member_path,
                                fragment,
                            });
                        }
                    }
                    _ => collect(member, &member_path, found),
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect(item, &index_path(path, i), found);
            }
        }
        _ => {}
    }
}

impl ElementValidator<'_> {
    /// Validate each contained resource and resolve local references.
    pub(crate) fn validate_contained<'v>(
        &self,
        resource: &'v Value,
        path: &str,
        scope: Scope<'v>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let contained_path = join_path(path, "contained");
        let contained: &[Value] = resource
            .get("contained")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (i, inline) in contained.iter().enumerate() {
            let inline_path = index_path(&contained_path, i);
            if !inline.get("id").is_some_and(Value::is_string) {
                outcome.push(ValidationIssue::error(
                    IssueCode::ContainedRule,
                    &inline_path,
                    "Contained resource must have an id",
                ));
            }
            if inline.get("contained").is_some() {
                outcome.push(ValidationIssue::error(
                    IssueCode::ContainedRule,
                    join_path(&inline_path, "contained"),
                    "Contained resources cannot contain other resources",
                ));
            }
            self.validate_nested_resource(inline, &inline_path, scope, false, outcome)?;
        }

        let ids: Vec<Option<&str>> = contained
            .iter()
            .map(|c| c.get("id").and_then(Value::as_str))
            .collect();
        let mut referenced = HashSet::new();

        for reference in local_references(resource, path) {
            if reference.fragment.is_empty() {
                continue;
            }
            let matches = ids.iter().filter(|id| **id == Some(reference.fragment)).count();
            match matches {
                0 => outcome.push(ValidationIssue::error(
                    IssueCode::UnresolvedReference,
                    &reference.path,
                    format!("No contained resource has id '{}'", reference.fragment),
                )),
                1 => {}
                n => outcome.push(ValidationIssue::error(
                    IssueCode::DuplicateLocalId,
                    &reference.path,
                    format!("{n} contained resources have id '{}'", reference.fragment),
                )),
            }
            referenced.insert(reference.fragment);
        }

        for (i, id) in ids.iter().enumerate() {
            if let Some(id) = id {
                if !referenced.contains(id) {
                    outcome.push(ValidationIssue::warning(
                        IssueCode::ContainedRule,
                        index_path(&contained_path, i),
                        format!("Contained resource '{id}' is not referenced from the container"),
                    ));
                }
            }
        }
        Ok(())
    }
}
