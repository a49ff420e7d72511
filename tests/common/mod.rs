use octofhir_fhirvalidator::storage::CORE_R4_DEFINITIONS;
use octofhir_fhirvalidator::*;
use serde_json::{Value, json};
use std::sync::Arc;

pub const MRN_SYSTEM: &str = "http://hospital.example.org/mrn";
pub const MRN_PROFILE: &str = "http://example.org/fhir/StructureDefinition/mrn-patient";

#[allow(dead_code)]
pub fn core_store() -> Arc<SchemaStore> {
    Arc::new(SchemaStore::with_defaults().unwrap())
}

#[allow(dead_code)]
pub fn validator() -> FhirValidator {
    FhirValidator::new(core_store())
}

/// `(code, path)` of every issue, in report order.
#[allow(dead_code)]
pub fn codes(outcome: &Outcome) -> Vec<(String, String)> {
    outcome
        .issues()
        .iter()
        .map(|i| (i.code.to_string(), i.path.clone()))
        .collect()
}

#[allow(dead_code)]
pub fn issue(code: &str, path: &str) -> (String, String) {
    (code.to_string(), path.to_string())
}

/// A bundled core StructureDefinition as raw JSON.
#[allow(dead_code)]
pub fn core_definition(type_name: &str) -> Value {
    let artifacts: Vec<Value> = serde_json::from_slice(CORE_R4_DEFINITIONS).unwrap();
    artifacts
        .into_iter()
        .find(|a| a["resourceType"] == "StructureDefinition" && a["type"] == type_name)
        .unwrap()
}

fn element(path: &str, id: &str, min: u32, max: &str, type_code: &str) -> Value {
    json!({
        "id": id,
        "path": path,
        "min": min,
        "max": max,
        "type": [{"code": type_code}]
    })
}

/// Patient profile: at least one identifier, a closed slice of identifiers
/// discriminated by `system`, exactly one of which is the hospital MRN.
#[allow(dead_code)]
pub fn mrn_profile() -> Value {
    let mut profile = core_definition("Patient");
    profile["url"] = json!(MRN_PROFILE);
    profile["version"] = json!("1.0.0");
    profile["name"] = json!("MrnPatient");
    profile["derivation"] = json!("constraint");
    profile["baseDefinition"] = json!("http://hl7.org/fhir/StructureDefinition/Patient");

    let base = profile["snapshot"]["element"].as_array().unwrap().clone();
    let mut elements = Vec::new();
    for mut element_definition in base {
        let is_identifier = element_definition["path"] == "Patient.identifier";
        if is_identifier {
            element_definition["min"] = json!(1);
            element_definition["slicing"] = json!({
                "discriminator": [{"type": "value", "path": "system"}],
                "rules": "closed"
            });
        }
        elements.push(element_definition);
        if is_identifier {
            elements.extend(mrn_slice());
        }
    }
    profile["snapshot"]["element"] = Value::Array(elements);
    profile
}

fn mrn_slice() -> Vec<Value> {
    let slice = "Patient.identifier:mrn";
    let mut system = element(
        "Patient.identifier.system",
        &format!("{slice}.system"),
        1,
        "1",
        "uri",
    );
    system["fixedUri"] = json!(MRN_SYSTEM);

    let mut head = element("Patient.identifier", slice, 1, "1", "Identifier");
    head["sliceName"] = json!("mrn");

    vec![
        head,
        element(
            "Patient.identifier.id",
            &format!("{slice}.id"),
            0,
            "1",
            "http://hl7.org/fhirpath/System.String",
        ),
        element(
            "Patient.identifier.extension",
            &format!("{slice}.extension"),
            0,
            "*",
            "Extension",
        ),
        element("Patient.identifier.use", &format!("{slice}.use"), 0, "1", "code"),
        element(
            "Patient.identifier.type",
            &format!("{slice}.type"),
            0,
            "1",
            "CodeableConcept",
        ),
        system,
        element("Patient.identifier.value", &format!("{slice}.value"), 1, "1", "string"),
        element("Patient.identifier.period", &format!("{slice}.period"), 0, "1", "Period"),
        element(
            "Patient.identifier.assigner",
            &format!("{slice}.assigner"),
            0,
            "1",
            "Reference",
        ),
    ]
}

/// Evaluator that understands `<name>.exists()` and fails on anything else.
#[allow(dead_code)]
pub fn exists_evaluator() -> Arc<dyn ExpressionEvaluator> {
    Arc::new(|expression: &str, context: &Value, _root: &Value| {
        let Some(name) = expression.strip_suffix(".exists()") else {
            return Err(EvaluationError::new(format!("unsupported expression {expression}")));
        };
        Ok(EvaluationResult::Boolean(context.get(name).is_some()))
    })
}
