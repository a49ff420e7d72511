//! ValueSet and CodeSystem models plus local membership tests.
//!
//! Membership is computed from the loaded artifacts only. When an answer
//! depends on something that is not loaded (a code system, an included value
//! set) or on a filter this module does not evaluate, the result is
//! [`Membership::Undetermined`] rather than a guess.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Lookup of terminology artifacts by canonical URL (`url` or `url|version`).
pub trait TerminologySource {
    fn value_set(&self, canonical: &str) -> Option<Arc<ValueSet>>;
    fn code_system(&self, canonical: &str) -> Option<Arc<CodeSystem>>;
}

/// Answer of a membership test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    /// Cannot be decided locally; carries the reason
    Undetermined(String),
}

impl Membership {
    pub fn is_member(&self) -> bool {
        matches!(self, Self::Member)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<Compose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Expansion>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Compose {
    #[serde(default)]
    pub include: Vec<ConceptSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ConceptSet>,
}

/// One `include` / `exclude` entry of a compose.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ConceptReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<ConceptFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_set: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptReference {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptFilter {
    pub property: String,
    pub op: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Expansion {
    #[serde(default)]
    pub contains: Vec<ExpansionContains>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionContains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `complete`, `fragment`, `example`, `not-present` or `supplement`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSystemConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property: Vec<ConceptProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptProperty {
    pub code: String,
    /// `valueCode`, `valueString`, `valueBoolean`, ...
    #[serde(flatten)]
    pub value: Map<String, Value>,
}

impl ConceptProperty {
    fn value_text(&self) -> Option<String> {
        self.value
            .iter()
            .find(|(key, _)| key.starts_with("value"))
            .map(|(_, value)| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

impl CodeSystem {
    /// Whether the concept list is the whole code system.
    pub fn is_complete(&self) -> bool {
        matches!(self.content.as_deref(), None | Some("complete"))
    }

    pub fn find_concept(&self, code: &str) -> Option<&CodeSystemConcept> {
        find_in(&self.concept, code)
    }

    /// True when `code` sits strictly below `ancestor` in the hierarchy.
    pub fn is_descendant(&self, ancestor: &str, code: &str) -> bool {
        self.find_concept(ancestor)
            .is_some_and(|parent| find_in(&parent.concept, code).is_some())
    }

    fn filter(&self, filter: &ConceptFilter, code: &str) -> Membership {
        let known = self.find_concept(code).is_some();
        let result = match (filter.op.as_str(), filter.property.as_str()) {
            ("is-a", "concept" | "code") => {
                code == filter.value || self.is_descendant(&filter.value, code)
            }
            ("descendent-of", "concept" | "code") => self.is_descendant(&filter.value, code),
            ("is-not-a", "concept" | "code") => {
                known && code != filter.value && !self.is_descendant(&filter.value, code)
            }
            ("regex", "code" | "concept") => {
                match Regex::new(&format!("^(?:{})$", filter.value)) {
                    Ok(regex) => regex.is_match(code),
                    Err(e) => {
                        return Membership::Undetermined(format!(
                            "invalid regex filter '{}': {e}",
                            filter.value
                        ));
                    }
                }
            }
            ("=", "concept" | "code") => code == filter.value,
            ("=", property) => self.find_concept(code).is_some_and(|concept| {
                concept
                    .property
                    .iter()
                    .filter(|p| p.code == property)
                    .any(|p| p.value_text().as_deref() == Some(filter.value.as_str()))
            }),
            (op, property) => {
                return Membership::Undetermined(format!(
                    "unsupported filter '{property} {op} {}'",
                    filter.value
                ));
            }
        };
        if result {
            Membership::Member
        } else if !known && !self.is_complete() {
            Membership::Undetermined(format!(
                "code system {} is not complete",
                self.url
            ))
        } else {
            Membership::NotMember
        }
    }
}

fn find_in<'a>(concepts: &'a [CodeSystemConcept], code: &str) -> Option<&'a CodeSystemConcept> {
    concepts.iter().find_map(|concept| {
        if concept.code == code {
            Some(concept)
        } else {
            find_in(&concept.concept, code)
        }
    })
}

fn expansion_contains(entries: &[ExpansionContains], system: Option<&str>, code: &str) -> bool {
    entries.iter().any(|entry| {
        let matches = entry.code.as_deref() == Some(code)
            && match (system, entry.system.as_deref()) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            };
        matches || expansion_contains(&entry.contains, system, code)
    })
}

/// Combine results of alternatives: any member wins, then undetermined.
fn any_of(results: impl IntoIterator<Item = Membership>) -> Membership {
    let mut undetermined = None;
    for result in results {
        match result {
            Membership::Member => return Membership::Member,
            Membership::Undetermined(reason) => {
                undetermined.get_or_insert(reason);
            }
            Membership::NotMember => {}
        }
    }
    undetermined.map_or(Membership::NotMember, Membership::Undetermined)
}

impl ValueSet {
    /// Test whether `(system, code)` is in this value set. A missing system
    /// matches any system the value set draws from (plain `code` elements).
    pub fn membership(
        &self,
        system: Option<&str>,
        code: &str,
        source: &dyn TerminologySource,
    ) -> Membership {
        let mut visiting = vec![self.url.clone()];
        self.membership_inner(system, code, source, &mut visiting)
    }

    fn membership_inner(
        &self,
        system: Option<&str>,
        code: &str,
        source: &dyn TerminologySource,
        visiting: &mut Vec<String>,
    ) -> Membership {
        if let Some(expansion) = &self.expansion {
            if expansion_contains(&expansion.contains, system, code) {
                return Membership::Member;
            }
            if self.compose.is_none() {
                return Membership::NotMember;
            }
        }

        let Some(compose) = &self.compose else {
            return Membership::Undetermined(format!(
                "value set {} has neither compose nor expansion",
                self.url
            ));
        };

        let included = any_of(
            compose
                .include
                .iter()
                .map(|set| concept_set_membership(set, system, code, source, visiting)),
        );
        if included != Membership::Member {
            return included;
        }

        match any_of(
            compose
                .exclude
                .iter()
                .map(|set| concept_set_membership(set, system, code, source, visiting)),
        ) {
            Membership::Member => Membership::NotMember,
            Membership::NotMember => Membership::Member,
            undetermined => undetermined,
        }
    }

    /// Code systems this value set draws codes from, directly or through
    /// included value sets.
    pub fn covered_systems(&self, source: &dyn TerminologySource) -> Vec<String> {
        let mut systems = Vec::new();
        let mut visiting = vec![self.url.clone()];
        self.collect_systems(source, &mut systems, &mut visiting);
        systems
    }

    fn collect_systems(
        &self,
        source: &dyn TerminologySource,
        systems: &mut Vec<String>,
        visiting: &mut Vec<String>,
    ) {
        let mut push = |system: &str| {
            if !systems.iter().any(|s| s == system) {
                systems.push(system.to_string());
            }
        };

        if let Some(expansion) = &self.expansion {
            let mut stack: Vec<&ExpansionContains> = expansion.contains.iter().collect();
            while let Some(entry) = stack.pop() {
                if let Some(system) = &entry.system {
                    push(system);
                }
                stack.extend(entry.contains.iter());
            }
        }

        let mut nested = Vec::new();
        if let Some(compose) = &self.compose {
            for set in &compose.include {
                if let Some(system) = &set.system {
                    push(system);
                }
                nested.extend(set.value_set.iter().cloned());
            }
        }

        for canonical in nested {
            if visiting.contains(&canonical) {
                continue;
            }
            if let Some(value_set) = source.value_set(&canonical) {
                visiting.push(canonical);
                value_set.collect_systems(source, systems, visiting);
            }
        }
    }
}

fn concept_set_membership(
    set: &ConceptSet,
    system: Option<&str>,
    code: &str,
    source: &dyn TerminologySource,
    visiting: &mut Vec<String>,
) -> Membership {
    let mut results = Vec::new();

    if let Some(set_system) = set.system.as_deref() {
        if system.is_some_and(|s| s != set_system) {
            return Membership::NotMember;
        }
        results.push(system_membership(set, set_system, code, source));
    }

    // Every listed value set must contain the code as well
    for canonical in &set.value_set {
        if visiting.contains(canonical) {
            results.push(Membership::Undetermined(format!(
                "value set {canonical} includes itself"
            )));
            continue;
        }
        let Some(value_set) = source.value_set(canonical) else {
            results.push(Membership::Undetermined(format!(
                "value set {canonical} is not loaded"
            )));
            continue;
        };
        visiting.push(canonical.clone());
        results.push(value_set.membership_inner(system, code, source, visiting));
        visiting.pop();
    }

    if results.is_empty() {
        return Membership::NotMember;
    }
    if results.contains(&Membership::NotMember) {
        return Membership::NotMember;
    }
    results
        .into_iter()
        .find(|r| matches!(r, Membership::Undetermined(_)))
        .unwrap_or(Membership::Member)
}

fn system_membership(
    set: &ConceptSet,
    system: &str,
    code: &str,
    source: &dyn TerminologySource,
) -> Membership {
    if !set.concept.is_empty() {
        return if set.concept.iter().any(|c| c.code == code) {
            Membership::Member
        } else {
            Membership::NotMember
        };
    }

    let canonical = match &set.version {
        Some(version) => format!("{system}|{version}"),
        None => system.to_string(),
    };
    let Some(code_system) = source
        .code_system(&canonical)
        .or_else(|| source.code_system(system))
    else {
        return Membership::Undetermined(format!("code system {system} is not loaded"));
    };

    if set.filter.is_empty() {
        return match code_system.find_concept(code) {
            Some(_) => Membership::Member,
            None if code_system.is_complete() => Membership::NotMember,
            None => Membership::Undetermined(format!("code system {system} is not complete")),
        };
    }

    // Filters are conjunctive
    let mut undetermined = None;
    for filter in &set.filter {
        match code_system.filter(filter, code) {
            Membership::NotMember => return Membership::NotMember,
            Membership::Undetermined(reason) => {
                undetermined.get_or_insert(reason);
            }
            Membership::Member => {}
        }
    }
    undetermined.map_or(Membership::Member, Membership::Undetermined)
}
