//! Profile Validator: the public entry point for validating resources.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::core::ValidatorConfig;
use crate::error::{FhirValidatorError, Result};
use crate::evaluator::ExpressionEvaluator;
use crate::storage::SchemaStore;
use crate::types::SchemaDocument;
use crate::validation::bundle::check_bundle_resource;
use crate::validation::element::{ElementValidator, Occurrence};
use crate::validation::outcome::{IssueCode, Outcome, ValidationIssue, index_path, join_path};
use crate::validation::session::{Scope, ValidationSession};

/// Validates resources against their base definition and any profiles.
///
/// Cheap to clone; holds the store and evaluator behind `Arc`s so one
/// validator can serve many threads once loading has finished.
#[derive(Clone)]
pub struct FhirValidator {
    store: Arc<SchemaStore>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    config: ValidatorConfig,
}

impl FhirValidator {
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self {
            store,
            evaluator: None,
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub(crate) fn element_validator(&self) -> ElementValidator<'_> {
        let mut session = ValidationSession::new(&self.store, &self.config);
        if let Some(evaluator) = &self.evaluator {
            session = session.with_evaluator(evaluator.as_ref());
        }
        ElementValidator::new(session)
    }

    /// Validate against the base definition of the instance's `resourceType`
    /// and the profiles it declares in `meta.profile`.
    pub fn validate(&self, instance: &Value) -> Result<Outcome> {
        self.validate_with_profiles(instance, &[])
    }

    /// Like [`validate`](Self::validate), additionally checking conformance
    /// to each of `profiles` (canonical URLs, optionally `url|version`).
    ///
    /// Fails only when the root resource type cannot be resolved; every
    /// data problem is reported in the returned [`Outcome`].
    pub fn validate_with_profiles(&self, instance: &Value, profiles: &[&str]) -> Result<Outcome> {
        let resource_type = instance
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or(FhirValidatorError::MissingResourceType)?;
        let base = resource_document(&self.store, resource_type)
            .ok_or_else(|| FhirValidatorError::unknown_resource_type(resource_type))?;

        let mut outcome = Outcome::for_resource(resource_type);
        self.element_validator().validate_resource(
            &base,
            profiles,
            instance,
            "",
            Scope::root(instance),
            true,
            &mut outcome,
        )?;
        outcome.dedup();

        info!(
            resource_type,
            profiles = profiles.len(),
            issues = outcome.len(),
            valid = outcome.is_valid(),
            "validation finished"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for FhirValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirValidator")
            .field("store", &self.store)
            .field("evaluator", &self.evaluator.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Definition of a concrete resource type.
pub(crate) fn resource_document(store: &SchemaStore, resource_type: &str) -> Option<Arc<SchemaDocument>> {
    store.resolve_type(resource_type).filter(|doc| {
        let definition = doc.definition();
        definition.is_resource() && definition.is_abstract != Some(true)
    })
}

impl ElementValidator<'_> {
    /// One resource against every applicable document, followed by the
    /// contained and Bundle rules.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_resource<'v>(
        &self,
        base: &Arc<SchemaDocument>,
        profiles: &[&str],
        instance: &'v Value,
        path: &str,
        scope: Scope<'v>,
        container_rules: bool,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let documents = self.applicable_documents(base, profiles, instance, path, outcome);
        debug!(
            resource_type = base.type_name(),
            path,
            documents = documents.len(),
            "validating resource"
        );

        let root = Occurrence::of(instance, path);
        for document in &documents {
            self.validate_item(document, document.root(), None, &root, scope, outcome)?;
        }

        if container_rules {
            self.validate_contained(instance, path, scope, outcome)?;
        }
        if base.type_name() == "Bundle" {
            check_bundle_resource(instance, path, outcome);
        }
        Ok(())
    }

    /// A resource found inside another one (`Bundle.entry.resource`,
    /// `contained`, `Parameters.parameter.resource`, ...). An unknown type
    /// here is a data problem, not a fatal error.
    pub(crate) fn validate_nested_resource<'v>(
        &self,
        value: &'v Value,
        path: &str,
        scope: Scope<'v>,
        container_rules: bool,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let Some(resource_type) = value.get("resourceType").and_then(Value::as_str) else {
            outcome.push(ValidationIssue::error(
                IssueCode::UnknownResourceType,
                path,
                "Resource has no resourceType",
            ));
            return Ok(());
        };
        let Some(base) = resource_document(self.session().store, resource_type) else {
            outcome.push(ValidationIssue::error(
                IssueCode::UnknownResourceType,
                join_path(path, "resourceType"),
                format!("Unknown resource type '{resource_type}'"),
            ));
            return Ok(());
        };
        self.validate_resource(
            &base,
            &[],
            value,
            path,
            scope.nested(value),
            container_rules,
            outcome,
        )
    }

    /// Base definition, explicit profiles, then `meta.profile`; each
    /// document at most once.
    fn applicable_documents(
        &self,
        base: &Arc<SchemaDocument>,
        profiles: &[&str],
        instance: &Value,
        path: &str,
        outcome: &mut Outcome,
    ) -> Vec<Arc<SchemaDocument>> {
        let mut requested: Vec<(&str, String)> =
            profiles.iter().map(|p| (*p, path.to_string())).collect();
        if self.session().config.validate_meta_profiles {
            let declared = instance
                .pointer("/meta/profile")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let meta_path = join_path(path, "meta.profile");
            for (i, profile) in declared.iter().enumerate() {
                if let Some(profile) = profile.as_str() {
                    requested.push((profile, index_path(&meta_path, i)));
                }
            }
        }

        let mut documents = vec![Arc::clone(base)];
        for (canonical, issue_path) in requested {
            let document = match self.session().store.resolve_canonical(canonical) {
                Ok(document) => document,
                Err(_) => {
                    outcome.push(ValidationIssue::error(
                        IssueCode::UnknownProfile,
                        issue_path,
                        format!("Profile {canonical} is not loaded"),
                    ));
                    continue;
                }
            };
            if document.type_name() != base.type_name() {
                outcome.push(ValidationIssue::error(
                    IssueCode::ProfileTypeMismatch,
                    issue_path,
                    format!(
                        "Profile {canonical} constrains {} but the resource is a {}",
                        document.type_name(),
                        base.type_name()
                    ),
                ));
                continue;
            }
            let seen = documents
                .iter()
                .any(|d| d.url() == document.url() && d.version() == document.version());
            if !seen {
                documents.push(document);
            }
        }
        documents
    }
}
