use serde_json::Value;
use tracing::debug;

use crate::storage::SchemaStore;
use crate::types::{Binding, BindingStrength, Membership, TerminologySource};
use crate::validation::outcome::{IssueCode, Outcome, Severity, ValidationIssue};

/// Types whose values carry codes.
pub fn is_coded_type(type_code: &str) -> bool {
    matches!(
        type_code,
        "code" | "Coding" | "CodeableConcept" | "Quantity" | "string" | "uri" | "CodeableReference"
    )
}

/// A `(system, code)` pair read from an instance value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedValue {
    pub system: Option<String>,
    pub code: String,
}

/// Codes carried by a value of the given type. A CodeableConcept with only
/// `text` yields an empty list.
pub fn extract_codes(type_code: &str, value: &Value) -> Vec<CodedValue> {
    let from_coding = |coding: &Value| {
        coding.get("code").and_then(Value::as_str).map(|code| CodedValue {
            system: coding.get("system").and_then(Value::as_str).map(str::to_string),
            code: code.to_string(),
        })
    };

    match type_code {
        "code" | "string" | "uri" => value
            .as_str()
            .map(|code| CodedValue {
                system: None,
                code: code.to_string(),
            })
            .into_iter()
            .collect(),
        "Coding" | "Quantity" => from_coding(value).into_iter().collect(),
        "CodeableConcept" => value
            .get("coding")
            .and_then(Value::as_array)
            .map(|codings| codings.iter().filter_map(from_coding).collect())
            .unwrap_or_default(),
        "CodeableReference" => value
            .get("concept")
            .map(|concept| extract_codes("CodeableConcept", concept))
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn describe(code: &CodedValue) -> String {
    match &code.system {
        Some(system) => format!("{system}#{}", code.code),
        None => format!("'{}'", code.code),
    }
}

/// Check a coded value against its binding and report the outcome.
pub fn check_binding(
    store: &SchemaStore,
    binding: &Binding,
    type_code: &str,
    value: &Value,
    path: &str,
    outcome: &mut Outcome,
) {
    let Some(canonical) = binding.value_set.as_deref() else {
        return;
    };
    let strength = binding.strength;
    let enforced = matches!(strength, BindingStrength::Required | BindingStrength::Extensible);

    // Quantities without a code and CodeableReferences without a concept are not coded
    if matches!(type_code, "Quantity" | "CodeableReference")
        && extract_codes(type_code, value).is_empty()
    {
        return;
    }

    let Some(value_set) = store.value_set(canonical) else {
        if enforced {
            outcome.push(ValidationIssue::warning(
                IssueCode::BindingUndetermined,
                path,
                format!("Value set {canonical} ({strength} binding) is not available; code not checked"),
            ));
        } else {
            debug!(value_set = canonical, path, "skipping binding to unknown value set");
        }
        return;
    };

    let mut codes = extract_codes(type_code, value);
    if codes.is_empty() && type_code == "CodeableConcept" {
        // Text only
        let text = value.get("text").and_then(Value::as_str).unwrap_or_default();
        codes.push(CodedValue {
            system: None,
            code: text.to_string(),
        });
    }
    if codes.is_empty() {
        return;
    }

    let mut undetermined = None;
    for code in &codes {
        match value_set.membership(code.system.as_deref(), &code.code, store) {
            Membership::Member => return,
            Membership::Undetermined(reason) => {
                undetermined.get_or_insert(reason);
            }
            Membership::NotMember => {}
        }
    }

    if let Some(reason) = undetermined {
        if enforced {
            outcome.push(ValidationIssue::warning(
                IssueCode::BindingUndetermined,
                path,
                format!(
                    "Cannot decide whether {} is in value set {canonical}: {reason}",
                    describe(&codes[0])
                ),
            ));
        }
        return;
    }

    let severity = match strength {
        BindingStrength::Required => Severity::Error,
        BindingStrength::Extensible => {
            let covered = value_set.covered_systems(store);
            // A bare `code` belongs to the system of a single-system value set
            let implied = match (type_code, covered.as_slice()) {
                ("code", [system]) => Some(system.as_str()),
                _ => None,
            };
            let claims_system = codes.iter().any(|code| {
                code.system
                    .as_deref()
                    .or(implied)
                    .is_some_and(|system| covered.iter().any(|c| c == system))
            });
            if claims_system {
                Severity::Error
            } else {
                Severity::Warning
            }
        }
        BindingStrength::Preferred | BindingStrength::Example => Severity::Information,
    };

    let shown = codes.iter().map(describe).collect::<Vec<_>>().join(", ");
    outcome.push(ValidationIssue::new(
        severity,
        IssueCode::BindingViolation,
        path,
        format!("{shown} is not in value set {canonical} ({strength} binding)"),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SchemaStore {
        let store = SchemaStore::new();
        store
            .put_artifact(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/colors",
                "compose": {"include": [{
                    "system": "http://example.org/cs/colors",
                    "concept": [{"code": "red"}, {"code": "green"}]
                }]}
            }))
            .unwrap();
        store
    }

    fn binding(strength: BindingStrength) -> Binding {
        Binding {
            strength,
            value_set: Some("http://example.org/vs/colors".to_string()),
            description: None,
        }
    }

    fn severities(strength: BindingStrength, type_code: &str, value: Value) -> Vec<Severity> {
        let mut outcome = Outcome::new();
        check_binding(&store(), &binding(strength), type_code, &value, "color", &mut outcome);
        outcome.issues().iter().map(|i| i.severity).collect()
    }

    #[test]
    fn test_member_passes() {
        assert!(severities(BindingStrength::Required, "code", json!("red")).is_empty());
        assert!(
            severities(
                BindingStrength::Required,
                "CodeableConcept",
                json!({"coding": [{"system": "http://other.org", "code": "x"}, {"system": "http://example.org/cs/colors", "code": "green"}]})
            )
            .is_empty()
        );
    }

    #[test]
    fn test_strength_levels() {
        assert_eq!(severities(BindingStrength::Required, "code", json!("blue")), vec![Severity::Error]);
        assert_eq!(
            severities(BindingStrength::Preferred, "code", json!("blue")),
            vec![Severity::Information]
        );
        assert_eq!(
            severities(BindingStrength::Example, "code", json!("blue")),
            vec![Severity::Information]
        );
    }

    #[test]
    fn test_extensible_depends_on_system() {
        let inside = json!({"system": "http://example.org/cs/colors", "code": "blue"});
        let outside = json!({"system": "http://other.org/cs", "code": "blue"});

        assert_eq!(severities(BindingStrength::Extensible, "Coding", inside), vec![Severity::Error]);
        assert_eq!(severities(BindingStrength::Extensible, "Coding", outside), vec![Severity::Warning]);
        assert_eq!(
            severities(BindingStrength::Extensible, "CodeableConcept", json!({"text": "sky blue"})),
            vec![Severity::Warning]
        );
    }

    #[test]
    fn test_extensible_plain_code() {
        assert_eq!(severities(BindingStrength::Extensible, "code", json!("blue")), vec![Severity::Error]);

        let store = store();
        store
            .put_artifact(json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/mixed",
                "compose": {"include": [
                    {"system": "http://example.org/cs/colors", "concept": [{"code": "red"}]},
                    {"system": "http://example.org/cs/shapes", "concept": [{"code": "round"}]}
                ]}
            }))
            .unwrap();
        let mixed = Binding {
            strength: BindingStrength::Extensible,
            value_set: Some("http://example.org/vs/mixed".to_string()),
            description: None,
        };
        let mut outcome = Outcome::new();
        check_binding(&store, &mixed, "code", &json!("blue"), "color", &mut outcome);
        let severities: Vec<_> = outcome.issues().iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec![Severity::Warning]);
    }

    #[test]
    fn test_unknown_value_set() {
        let mut outcome = Outcome::new();
        let missing = Binding {
            strength: BindingStrength::Required,
            value_set: Some("http://example.org/vs/missing".to_string()),
            description: None,
        };
        check_binding(&store(), &missing, "code", &json!("x"), "color", &mut outcome);
        assert_eq!(outcome.issues()[0].code, IssueCode::BindingUndetermined);
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_extract_codes() {
        assert_eq!(
            extract_codes("Quantity", &json!({"value": 1, "system": "http://unitsofmeasure.org", "code": "mg"})),
            vec![CodedValue {
                system: Some("http://unitsofmeasure.org".to_string()),
                code: "mg".to_string()
            }]
        );
        assert!(extract_codes("CodeableConcept", &json!({"text": "free"})).is_empty());
        assert!(extract_codes("HumanName", &json!({"family": "x"})).is_empty());
    }
}
