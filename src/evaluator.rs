//! Seam to an external FHIRPath engine.
//!
//! The validator never parses invariant expressions itself. It hands them to
//! an [`ExpressionEvaluator`] together with the node under test and the
//! instance root. Simple dotted paths used by slice discriminators are
//! navigated locally by [`select_path`] so slicing works without an engine.

use serde_json::Value;
use thiserror::Error;

use crate::types::is_choice_type_suffix;

/// Value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Boolean(bool),
    Collection(Vec<Value>),
}

impl EvaluationResult {
    /// Invariant semantics: an empty collection passes, a singleton boolean
    /// decides, any other non-empty collection passes.
    pub fn is_satisfied(&self) -> bool {
        match self {
            Self::Boolean(value) => *value,
            Self::Collection(items) => match items.as_slice() {
                [Value::Bool(value)] => *value,
                _ => true,
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Synchronous, side-effect free expression evaluation.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        context: &Value,
        root: &Value,
    ) -> Result<EvaluationResult, EvaluationError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &Value, &Value) -> Result<EvaluationResult, EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        expression: &str,
        context: &Value,
        root: &Value,
    ) -> Result<EvaluationResult, EvaluationError> {
        self(expression, context, root)
    }
}

enum Step<'a> {
    Field(&'a str),
    Extension(&'a str),
}

fn parse_steps(path: &str) -> Option<Vec<Step<'_>>> {
    let path = path.trim();
    if path.is_empty() || path == "$this" {
        return Some(Vec::new());
    }
    let path = path.strip_prefix("$this.").unwrap_or(path);

    let mut steps = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(args) = rest.strip_prefix("extension(") {
            let close = args.find(')')?;
            let url = args[..close].trim().trim_matches(|c| c == '\'' || c == '"');
            steps.push(Step::Extension(url));
            rest = &args[close + 1..];
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            let field = &rest[..end];
            if field.is_empty()
                || !field
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return None;
            }
            steps.push(Step::Field(field));
            rest = &rest[end..];
        }
        rest = match rest.strip_prefix('.') {
            Some(next) if !next.is_empty() => next,
            Some(_) => return None,
            None if rest.is_empty() => rest,
            None => return None,
        };
    }
    Some(steps)
}

/// Navigate a simple FHIRPath (`a.b.c`, `$this`, `extension('url').value`)
/// from `value`. Arrays are flattened at every step and `value` also
/// matches typed choice keys such as `valueQuantity`, but not other keys
/// sharing the prefix such as `valueSet`.
///
/// Returns `None` for paths outside this subset.
pub fn select_path<'a>(value: &'a Value, path: &str) -> Option<Vec<&'a Value>> {
    let steps = parse_steps(path)?;
    let mut current = flatten(vec![value]);

    for step in steps {
        let mut next = Vec::new();
        for node in current {
            let Some(object) = node.as_object() else {
                continue;
            };
            match step {
                Step::Field(name) => {
                    if let Some(found) = object.get(name) {
                        next.push(found);
                    } else if let Some((_, found)) = object.iter().find(|(key, _)| {
                        key.strip_prefix(name).is_some_and(is_choice_type_suffix)
                    }) {
                        next.push(found);
                    }
                }
                Step::Extension(url) => {
                    if let Some(Value::Array(extensions)) = object.get("extension") {
                        next.extend(extensions.iter().filter(|ext| {
                            ext.get("url").and_then(Value::as_str) == Some(url)
                        }));
                    }
                }
            }
        }
        current = flatten(next);
    }
    Some(current)
}

fn flatten(values: Vec<&Value>) -> Vec<&Value> {
    let mut flat = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Array(items) => flat.extend(items.iter()),
            other => flat.push(other),
        }
    }
    flat
}
