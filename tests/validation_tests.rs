// End-to-end validation against the bundled core definitions

mod common;

use common::*;
use octofhir_fhirvalidator::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

#[test]
fn test_valid_patient() {
    let patient = json!({
        "resourceType": "Patient",
        "id": "example",
        "meta": {"profile": ["http://hl7.org/fhir/StructureDefinition/Patient"]},
        "text": {
            "status": "generated",
            "div": "<div xmlns=\"http://www.w3.org/1999/xhtml\">Peter Chalmers</div>"
        },
        "identifier": [{"use": "usual", "system": "urn:oid:1.2.36.146.595.217.0.1", "value": "12345"}],
        "active": true,
        "name": [{"use": "official", "family": "Chalmers", "given": ["Peter", "James"]}],
        "telecom": [{"system": "phone", "value": "(03) 5555 6473", "use": "work"}],
        "gender": "male",
        "birthDate": "1974-12-25",
        "deceasedBoolean": false,
        "address": [{"use": "home", "line": ["534 Erewhon St"], "city": "PleasantVille", "postalCode": "3999"}],
        "contact": [{
            "name": {"family": "du Marché", "given": ["Bénédicte"]},
            "gender": "female"
        }]
    });

    let outcome = validator().validate(&patient).unwrap();
    assert!(outcome.is_empty(), "{outcome}");
    assert!(outcome.is_valid());
}

#[test]
fn test_valid_observation() {
    let observation = json!({
        "resourceType": "Observation",
        "id": "heart-rate",
        "status": "final",
        "category": [{
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/observation-category",
                "code": "vital-signs"
            }]
        }],
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}], "text": "Heart rate"},
        "subject": {"reference": "Patient/example"},
        "effectiveDateTime": "2024-03-01T10:30:00Z",
        "valueQuantity": {
            "value": 72,
            "unit": "beats/minute",
            "system": "http://unitsofmeasure.org",
            "code": "/min"
        }
    });

    let outcome = validator().validate(&observation).unwrap();
    assert!(outcome.is_empty(), "{outcome}");
}

#[test]
fn test_observation_defects_in_declaration_order() {
    let observation = json!({
        "resourceType": "Observation",
        "status": "done",
        "subject": {"reference": "Practitioner/1"},
        "effectiveDateTime": "2024-13-01",
        "valueQuantity": {"value": 72},
        "valueString": "72"
    });

    let outcome = validator().validate(&observation).unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("binding-violation", "status"),
            issue("cardinality-violation", "code"),
            issue("reference-target", "subject"),
            issue("invalid-format", "effectiveDateTime"),
            issue("choice-conflict", "value"),
        ]
    );
    assert!(!outcome.is_valid());
}

#[test]
fn test_required_binding_and_operation_outcome() {
    let patient = json!({"resourceType": "Patient", "gender": "robot"});
    let outcome = validator().validate(&patient).unwrap();

    assert_eq!(codes(&outcome), vec![issue("binding-violation", "gender")]);
    assert_eq!(outcome.issues()[0].severity, Severity::Error);

    let rendered = outcome.to_operation_outcome();
    assert_eq!(rendered["resourceType"], "OperationOutcome");
    assert_eq!(rendered["issue"][0]["severity"], "error");
    assert_eq!(rendered["issue"][0]["code"], "code-invalid");
    assert_eq!(rendered["issue"][0]["expression"], json!(["Patient.gender"]));
}

#[test]
fn test_structural_config_skips_terminology() {
    let patient = json!({"resourceType": "Patient", "gender": "robot"});
    let validator = FhirValidator::new(core_store()).with_config(ValidatorConfig::structural());
    assert!(validator.validate(&patient).unwrap().is_empty());
}

#[test]
fn test_fatal_root_errors() {
    let validator = validator();

    let missing = validator.validate(&json!({"gender": "male"}));
    assert!(matches!(missing, Err(FhirValidatorError::MissingResourceType)));

    let unknown = validator.validate(&json!({"resourceType": "Unicorn"}));
    assert!(matches!(
        unknown,
        Err(FhirValidatorError::UnknownResourceType { resource_type }) if resource_type == "Unicorn"
    ));

    let abstract_type = validator.validate(&json!({"resourceType": "DomainResource"}));
    assert!(matches!(
        abstract_type,
        Err(FhirValidatorError::UnknownResourceType { .. })
    ));
}

#[test]
fn test_shape_problems() {
    let patient = json!({
        "resourceType": "Patient",
        "name": {"family": "Chalmers"},
        "birthDate": ["1974-12-25"],
        "deceasedString": "yes",
        "active": "true",
        "favouriteColour": "blue"
    });

    let outcome = validator().validate(&patient).unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("type-mismatch", "active"),
            issue("expected-array", "name"),
            issue("unexpected-array", "birthDate"),
            issue("type-mismatch", "deceasedString"),
            issue("unknown-element", "favouriteColour"),
        ]
    );
}

#[test]
fn test_primitive_extension_without_value() {
    let patient = json!({
        "resourceType": "Patient",
        "_birthDate": {
            "extension": [{
                "url": "http://hl7.org/fhir/StructureDefinition/data-absent-reason",
                "valueCode": "unknown"
            }]
        },
        "name": [{"given": ["Jim", null], "_given": [null, {"id": "g2"}]}]
    });

    let outcome = validator().validate(&patient).unwrap();
    assert!(outcome.is_empty(), "{outcome}");
}

#[test]
fn test_contained_resources_and_local_references() {
    let patient = json!({
        "resourceType": "Patient",
        "contained": [
            {"resourceType": "Organization", "id": "org1", "name": "Clinic"},
            {"resourceType": "Practitioner", "id": "dr"}
        ],
        "managingOrganization": {"reference": "#org1"},
        "generalPractitioner": [{"reference": "#missing"}]
    });

    let outcome = validator().validate(&patient).unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("unresolved-reference", "generalPractitioner[0].reference"),
            issue("contained-rule", "contained[1]"),
        ]
    );
    assert_eq!(outcome.count(Severity::Warning), 1);
}

#[test]
fn test_local_reference_to_wrong_type() {
    let patient = json!({
        "resourceType": "Patient",
        "contained": [{"resourceType": "Practitioner", "id": "dr"}],
        "managingOrganization": {"reference": "#dr"}
    });

    let outcome = validator().validate(&patient).unwrap();
    assert_eq!(codes(&outcome), vec![issue("reference-target", "managingOrganization")]);
}

#[test]
fn test_contained_resource_without_id() {
    let patient = json!({
        "resourceType": "Patient",
        "contained": [{"resourceType": "Organization", "name": "Clinic"}]
    });

    let outcome = validator().validate(&patient).unwrap();
    assert_eq!(codes(&outcome), vec![issue("contained-rule", "contained[0]")]);
    assert!(!outcome.is_valid());
}

#[test]
fn test_malformed_reference() {
    let observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": "x"},
        "subject": {"reference": "Patient/"}
    });

    let outcome = validator().validate(&observation).unwrap();
    assert_eq!(codes(&outcome), vec![issue("reference-format-error", "subject.reference")]);
}

#[test]
fn test_transaction_bundle_with_duplicate_full_url() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "fullUrl": "urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a",
                "resource": {"resourceType": "Patient", "gender": "female"},
                "request": {"method": "POST", "url": "Patient"}
            },
            {
                "fullUrl": "urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a",
                "resource": {"resourceType": "Observation", "status": "final", "code": {"text": "x"}},
                "request": {"method": "POST", "url": "Observation"}
            }
        ]
    });

    let outcome = validator().validate(&bundle).unwrap();
    assert_eq!(codes(&outcome), vec![issue("duplicate-identifier", "entry[1]")]);
}

#[test]
fn test_bundle_entries_are_validated() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            {"resource": {"resourceType": "Patient", "gender": "robot"}},
            {"resource": {"resourceType": "Unicorn"}}
        ]
    });

    let outcome = validator().validate(&bundle).unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("binding-violation", "entry[0].resource.gender"),
            issue("unknown-resource-type", "entry[1].resource.resourceType"),
        ]
    );
}

#[test]
fn test_member_list_as_bundle() {
    let members = vec![
        json!({"resourceType": "Patient", "id": "a", "gender": "robot"}),
        json!({"resourceType": "Patient", "id": "a"}),
    ];

    let outcome = validator()
        .validate_bundle(&members, BundleType::Collection)
        .unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("binding-violation", "[0].gender"),
            issue("duplicate-identifier", "[1]"),
        ]
    );
}

#[test]
fn test_document_bundle_must_start_with_composition() {
    let members = vec![json!({"resourceType": "Patient", "id": "a"})];
    let outcome = validator()
        .validate_bundle(&members, BundleType::Document)
        .unwrap();
    assert_eq!(codes(&outcome), vec![issue("bundle-rule", "[0]")]);
}

fn mrn_store() -> Arc<SchemaStore> {
    let store = core_store();
    store.put_artifact(mrn_profile()).unwrap();
    store
}

#[test]
fn test_profile_slicing_via_meta_profile() {
    let validator = FhirValidator::new(mrn_store());
    let patient = json!({
        "resourceType": "Patient",
        "meta": {"profile": [MRN_PROFILE]},
        "identifier": [{"system": MRN_SYSTEM, "value": "12345"}],
        "name": [{"family": "Chalmers"}]
    });

    let outcome = validator.validate(&patient).unwrap();
    assert!(outcome.is_empty(), "{outcome}");
}

#[test]
fn test_closed_slicing_rejects_unmatched_identifier() {
    let validator = FhirValidator::new(mrn_store());
    let patient = json!({
        "resourceType": "Patient",
        "identifier": [{"system": "http://other.example.org", "value": "x"}]
    });

    let outcome = validator
        .validate_with_profiles(&patient, &[MRN_PROFILE])
        .unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("slicing-violation", "identifier[0]"),
            issue("cardinality-violation", "identifier"),
        ]
    );

    // The base definition alone has no slicing
    assert!(validator.validate(&patient).unwrap().is_empty());
}

#[test]
fn test_matched_slice_is_validated_against_slice_constraints() {
    let validator = FhirValidator::new(mrn_store());
    let patient = json!({
        "resourceType": "Patient",
        "identifier": [{"system": MRN_SYSTEM}]
    });

    let versioned = format!("{MRN_PROFILE}|1.0.0");
    let outcome = validator
        .validate_with_profiles(&patient, &[versioned.as_str()])
        .unwrap();
    assert_eq!(codes(&outcome), vec![issue("cardinality-violation", "identifier[0].value")]);
}

#[test]
fn test_unknown_and_mismatched_profiles() {
    let validator = FhirValidator::new(mrn_store());
    let observation = json!({
        "resourceType": "Observation",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/nothing"]},
        "status": "final",
        "code": {"text": "x"}
    });

    let outcome = validator
        .validate_with_profiles(&observation, &[MRN_PROFILE])
        .unwrap();
    assert_eq!(
        codes(&outcome),
        vec![
            issue("profile-type-mismatch", ""),
            issue("unknown-profile", "meta.profile[0]"),
        ]
    );
}

#[test]
fn test_narrowed_max_keeps_array_shape() {
    let url = "http://example.org/fhir/StructureDefinition/single-name-patient";
    let mut profile = core_definition("Patient");
    profile["url"] = json!(url);
    profile["derivation"] = json!("constraint");
    for element in profile["snapshot"]["element"].as_array_mut().unwrap() {
        if element["path"] == "Patient.name" {
            element["min"] = json!(1);
            element["max"] = json!("1");
        }
    }
    let store = core_store();
    store.put_artifact(profile).unwrap();
    let validator = FhirValidator::new(store);

    let single = json!({"resourceType": "Patient", "name": [{"family": "Doe"}]});
    let outcome = validator.validate_with_profiles(&single, &[url]).unwrap();
    assert!(outcome.is_valid(), "{outcome}");
    assert!(outcome.is_empty(), "{outcome}");

    let twice = json!({"resourceType": "Patient", "name": [{"family": "Doe"}, {"family": "Roe"}]});
    let outcome = validator.validate_with_profiles(&twice, &[url]).unwrap();
    assert_eq!(codes(&outcome), vec![issue("cardinality-violation", "name")]);

    let bare = json!({"resourceType": "Patient", "name": {"family": "Doe"}});
    let outcome = validator.validate_with_profiles(&bare, &[url]).unwrap();
    assert_eq!(codes(&outcome), vec![issue("expected-array", "name")]);
}

fn named_patient_store() -> Arc<SchemaStore> {
    let store = core_store();
    let mut profile = core_definition("Patient");
    profile["url"] = json!("http://example.org/fhir/StructureDefinition/named-patient");
    profile["derivation"] = json!("constraint");
    profile["snapshot"]["element"][0]["constraint"] = json!([{
        "key": "nam-1",
        "severity": "error",
        "human": "A patient must have a name",
        "expression": "name.exists()"
    }]);
    store.put_artifact(profile).unwrap();
    store
}

#[test]
fn test_invariants_through_evaluator() {
    let validator = FhirValidator::new(named_patient_store()).with_evaluator(exists_evaluator());
    let profiles = ["http://example.org/fhir/StructureDefinition/named-patient"];

    let anonymous = json!({"resourceType": "Patient"});
    let outcome = validator.validate_with_profiles(&anonymous, &profiles).unwrap();
    assert_eq!(codes(&outcome), vec![issue("nam-1", "")]);
    assert_eq!(outcome.issues()[0].code, IssueCode::Invariant("nam-1".to_string()));

    let named = json!({"resourceType": "Patient", "name": [{"text": "Jim"}]});
    assert!(validator.validate_with_profiles(&named, &profiles).unwrap().is_empty());
}

#[test]
fn test_ignored_invariants_and_missing_evaluator() {
    let profiles = ["http://example.org/fhir/StructureDefinition/named-patient"];
    let anonymous = json!({"resourceType": "Patient"});

    let ignoring = FhirValidator::new(named_patient_store())
        .with_evaluator(exists_evaluator())
        .with_config(ValidatorConfig::default().ignore_invariant("nam-1"));
    assert!(ignoring.validate_with_profiles(&anonymous, &profiles).unwrap().is_empty());

    let without_engine = FhirValidator::new(named_patient_store());
    assert!(
        without_engine
            .validate_with_profiles(&anonymous, &profiles)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_invariants_see_the_instance_root() {
    let url = "http://example.org/fhir/StructureDefinition/bundled-patient";
    let store = core_store();
    let mut profile = core_definition("Patient");
    profile["url"] = json!(url);
    profile["derivation"] = json!("constraint");
    profile["snapshot"]["element"][0]["constraint"] = json!([{
        "key": "bdl-p",
        "severity": "error",
        "human": "Only valid inside a bundle",
        "expression": "%rootResource is Bundle"
    }]);
    store.put_artifact(profile).unwrap();

    let in_bundle: Arc<dyn ExpressionEvaluator> = Arc::new(|_: &str, _: &Value, root: &Value| {
        Ok::<_, EvaluationError>(EvaluationResult::Boolean(root["resourceType"] == "Bundle"))
    });
    let validator = FhirValidator::new(store).with_evaluator(in_bundle);

    let patient = json!({"resourceType": "Patient", "meta": {"profile": [url]}});
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{"resource": patient.clone()}]
    });
    assert!(validator.validate(&bundle).unwrap().is_empty());
    assert_eq!(codes(&validator.validate(&patient).unwrap()), vec![issue("bdl-p", "")]);
}

#[test]
fn test_evaluator_failure_aborts() {
    let store = core_store();
    let mut profile = core_definition("Patient");
    profile["url"] = json!("http://example.org/fhir/StructureDefinition/odd-patient");
    profile["derivation"] = json!("constraint");
    profile["snapshot"]["element"][0]["constraint"] = json!([{
        "key": "odd-1",
        "severity": "error",
        "human": "Unsupported",
        "expression": "name.count() > 1"
    }]);
    store.put_artifact(profile).unwrap();

    let validator = FhirValidator::new(store).with_evaluator(exists_evaluator());
    let result = validator.validate_with_profiles(
        &json!({"resourceType": "Patient"}),
        &["http://example.org/fhir/StructureDefinition/odd-patient"],
    );
    assert!(matches!(result, Err(FhirValidatorError::Evaluation { .. })));
}

#[test]
fn test_validator_is_shared_across_threads() {
    let validator = validator();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let validator = validator.clone();
            std::thread::spawn(move || {
                let gender = if i % 2 == 0 { "female" } else { "robot" };
                let patient = json!({"resourceType": "Patient", "gender": gender});
                validator.validate(&patient).unwrap().is_valid()
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![true, false, true, false]);
}
