use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use octofhir_fhirvalidator::*;
use serde_json::{Value, json};
use std::hint::black_box;
use std::sync::Arc;

fn patient(id: usize) -> Value {
    json!({
        "resourceType": "Patient",
        "id": format!("p{id}"),
        "identifier": [{"system": "http://hospital.example.org/mrn", "value": id.to_string()}],
        "active": true,
        "name": [{"use": "official", "family": "Chalmers", "given": ["Peter", "James"]}],
        "telecom": [{"system": "phone", "value": "(03) 5555 6473", "use": "work"}],
        "gender": "male",
        "birthDate": "1974-12-25",
        "address": [{"use": "home", "line": ["534 Erewhon St"], "city": "PleasantVille"}]
    })
}

fn observation(id: usize) -> Value {
    json!({
        "resourceType": "Observation",
        "id": format!("o{id}"),
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
        "subject": {"reference": format!("Patient/p{id}")},
        "effectiveDateTime": "2024-03-01T10:30:00Z",
        "valueQuantity": {"value": 72, "unit": "beats/minute", "system": "http://unitsofmeasure.org", "code": "/min"}
    })
}

fn bundle(size: usize) -> Value {
    let entries: Vec<Value> = (0..size)
        .map(|i| {
            let resource = if i % 2 == 0 { patient(i) } else { observation(i) };
            json!({"fullUrl": format!("urn:uuid:00000000-0000-0000-0000-{i:012}"), "resource": resource})
        })
        .collect();
    json!({"resourceType": "Bundle", "type": "collection", "entry": entries})
}

fn bench_store(c: &mut Criterion) {
    c.bench_function("store_with_defaults", |b| {
        b.iter(|| black_box(SchemaStore::with_defaults().unwrap()))
    });

    let store = SchemaStore::with_defaults().unwrap();
    c.bench_function("store_resolve_type", |b| {
        b.iter(|| black_box(store.resolve_type(black_box("Patient"))))
    });
}

fn bench_resources(c: &mut Criterion) {
    let validator = FhirValidator::new(Arc::new(SchemaStore::with_defaults().unwrap()));
    let patient = patient(1);
    let observation = observation(1);

    c.bench_function("validate_patient", |b| {
        b.iter(|| black_box(validator.validate(black_box(&patient)).unwrap()))
    });
    c.bench_function("validate_observation", |b| {
        b.iter(|| black_box(validator.validate(black_box(&observation)).unwrap()))
    });

    let structural = validator.clone().with_config(ValidatorConfig::structural());
    c.bench_function("validate_patient_structural", |b| {
        b.iter(|| black_box(structural.validate(black_box(&patient)).unwrap()))
    });
}

fn bench_bundles(c: &mut Criterion) {
    let validator = FhirValidator::new(Arc::new(SchemaStore::with_defaults().unwrap()));

    let mut group = c.benchmark_group("validate_bundle");
    for size in [10usize, 100] {
        let bundle = bundle(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bundle, |b, bundle| {
            b.iter(|| black_box(validator.validate(bundle).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_store, bench_resources, bench_bundles);
criterion_main!(benches);
