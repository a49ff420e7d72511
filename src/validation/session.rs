//! Shared state of one validation call.

use std::borrow::Cow;

use serde_json::Value;
use tracing::{debug, trace};

use crate::core::ValidatorConfig;
use crate::error::{FhirValidatorError, Result};
use crate::evaluator::{EvaluationResult, ExpressionEvaluator, select_path};
use crate::storage::SchemaStore;
use crate::types::Constraint;

/// Read-only collaborators of a validation call.
#[derive(Clone, Copy)]
pub struct ValidationSession<'a> {
    pub store: &'a SchemaStore,
    pub evaluator: Option<&'a dyn ExpressionEvaluator>,
    pub config: &'a ValidatorConfig,
}

impl<'a> ValidationSession<'a> {
    pub fn new(store: &'a SchemaStore, config: &'a ValidatorConfig) -> Self {
        Self {
            store,
            evaluator: None,
            config,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Evaluate an invariant against `context`, with `root` as the instance
    /// root. `Ok(None)` means the invariant was not evaluated.
    pub fn check_invariant(
        &self,
        constraint: &Constraint,
        context: &Value,
        root: &Value,
    ) -> Result<Option<bool>> {
        if !self.config.check_invariants || self.config.is_invariant_ignored(&constraint.key) {
            return Ok(None);
        }
        let Some(expression) = constraint.expression.as_deref() else {
            return Ok(None);
        };
        let Some(evaluator) = self.evaluator else {
            trace!(key = %constraint.key, "no expression evaluator; invariant skipped");
            return Ok(None);
        };

        let result = evaluator
            .evaluate(expression, context, root)
            .map_err(|e| FhirValidatorError::evaluation(expression, e.message))?;
        Ok(Some(result.is_satisfied()))
    }

    /// Values at a slice discriminator path. The evaluator resolves the path
    /// when one is configured; [`select_path`] covers simple paths otherwise
    /// and when the evaluator rejects the path. `None` means undecidable.
    pub fn select<'v>(
        &self,
        path: &str,
        context: &'v Value,
        root: &Value,
    ) -> Option<Vec<Cow<'v, Value>>> {
        if let Some(evaluator) = self.evaluator {
            match evaluator.evaluate(path, context, root) {
                Ok(EvaluationResult::Collection(items)) => {
                    return Some(items.into_iter().map(Cow::Owned).collect());
                }
                Ok(EvaluationResult::Boolean(value)) => {
                    return Some(vec![Cow::Owned(Value::Bool(value))]);
                }
                Err(e) => debug!(path, error = %e, "discriminator path not evaluated"),
            }
        }
        select_path(context, path).map(|values| values.into_iter().map(Cow::Borrowed).collect())
    }
}

impl std::fmt::Debug for ValidationSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationSession")
            .field("store", self.store)
            .field("evaluator", &self.evaluator.is_some())
            .field("config", self.config)
            .finish()
    }
}

/// Position of the walk: the instance root (root of invariant evaluation),
/// the nearest enclosing resource (target of local references) and the
/// nesting depth.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'v> {
    pub root: &'v Value,
    pub resource: &'v Value,
    pub depth: usize,
}

impl<'v> Scope<'v> {
    pub fn root(resource: &'v Value) -> Self {
        Self {
            root: resource,
            resource,
            depth: 0,
        }
    }

    pub fn deeper(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..*self
        }
    }

    /// Scope of a resource nested inside the current one.
    pub fn nested(&self, resource: &'v Value) -> Self {
        Self {
            root: self.root,
            resource,
            depth: self.depth + 1,
        }
    }
}
