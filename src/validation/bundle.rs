//! Bundle Validator: rules spanning the entries of a bundle.
//!
//! Applies both to `Bundle` resources (checked after their element pass) and
//! to a bare list of members validated as a unit, where each member is a
//! resource or an entry-shaped object (`fullUrl`, `resource`, `request`,
//! `response`).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{FhirValidatorError, Result};
use crate::validation::outcome::{IssueCode, Outcome, ValidationIssue, index_path, join_path};
use crate::validation::profile::FhirValidator;
use crate::validation::session::Scope;

const HTTP_VERBS: &[&str] = &["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"];

/// `Bundle.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    History,
    Searchset,
    Collection,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Message => "message",
            Self::Transaction => "transaction",
            Self::TransactionResponse => "transaction-response",
            Self::Batch => "batch",
            Self::BatchResponse => "batch-response",
            Self::History => "history",
            Self::Searchset => "searchset",
            Self::Collection => "collection",
        }
    }

    fn requires_request(&self) -> bool {
        matches!(self, Self::Transaction | Self::Batch | Self::History)
    }

    fn requires_response(&self) -> bool {
        matches!(
            self,
            Self::TransactionResponse | Self::BatchResponse | Self::History
        )
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleType {
    type Err = FhirValidatorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "document" => Self::Document,
            "message" => Self::Message,
            "transaction" => Self::Transaction,
            "transaction-response" => Self::TransactionResponse,
            "batch" => Self::Batch,
            "batch-response" => Self::BatchResponse,
            "history" => Self::History,
            "searchset" => Self::Searchset,
            "collection" => Self::Collection,
            other => {
                return Err(FhirValidatorError::config(format!(
                    "unknown bundle type '{other}'"
                )));
            }
        })
    }
}

/// One bundle entry as seen by the bundle rules.
#[derive(Debug)]
struct Entry<'v> {
    path: String,
    resource_path: String,
    full_url: Option<&'v str>,
    resource: Option<&'v Value>,
    request: Option<&'v Value>,
    response: Option<&'v Value>,
}

impl<'v> Entry<'v> {
    fn from_entry(entry: &'v Value, path: String) -> Self {
        Self {
            resource_path: join_path(&path, "resource"),
            path,
            full_url: entry.get("fullUrl").and_then(Value::as_str),
            resource: entry.get("resource"),
            request: entry.get("request"),
            response: entry.get("response"),
        }
    }

    fn from_member(member: &'v Value, index: usize) -> Self {
        let path = format!("[{index}]");
        if member.get("resourceType").is_some() {
            Self {
                resource_path: path.clone(),
                path,
                full_url: None,
                resource: Some(member),
                request: None,
                response: None,
            }
        } else {
            Self::from_entry(member, path)
        }
    }

    /// fullUrl, else `Type/id`; history entries add the version.
    fn identity(&self, history: bool) -> Option<String> {
        let version = self
            .resource
            .and_then(|r| r.pointer("/meta/versionId"))
            .and_then(Value::as_str);
        let base = match self.full_url {
            Some(url) => url.to_string(),
            None => {
                let resource = self.resource?;
                let resource_type = resource.get("resourceType")?.as_str()?;
                let id = resource.get("id")?.as_str()?;
                format!("{resource_type}/{id}")
            }
        };
        Some(match (history, version) {
            (true, Some(version)) => format!("{base}/_history/{version}"),
            _ => base,
        })
    }

    fn resource_type(&self) -> Option<&'v str> {
        self.resource?.get("resourceType")?.as_str()
    }
}

/// Rules of a `Bundle` resource, run after its element pass.
pub(crate) fn check_bundle_resource(bundle: &Value, path: &str, outcome: &mut Outcome) {
    let entries_path = join_path(path, "entry");
    let entries: Vec<Entry<'_>> = bundle
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, entry)| Entry::from_entry(entry, index_path(&entries_path, i)))
        .collect();
    // An unknown type is already reported by the type binding
    let bundle_type = bundle
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse().ok());
    check_rules(bundle_type, &entries, path, outcome);
}

fn check_rules(
    bundle_type: Option<BundleType>,
    entries: &[Entry<'_>],
    path: &str,
    outcome: &mut Outcome,
) {
    let history = bundle_type == Some(BundleType::History);
    let mut seen: HashMap<String, &str> = HashMap::new();
    for entry in entries {
        let Some(identity) = entry.identity(history) else {
            continue;
        };
        match seen.get(identity.as_str()) {
            Some(first) => outcome.push(ValidationIssue::error(
                IssueCode::DuplicateIdentifier,
                &entry.path,
                format!("Duplicate entry identity '{identity}' (first at {first})"),
            )),
            None => {
                seen.insert(identity, entry.path.as_str());
            }
        }
    }

    let Some(bundle_type) = bundle_type else {
        return;
    };

    for entry in entries {
        let request_path = join_path(&entry.path, "request");
        match (bundle_type.requires_request(), entry.request) {
            (true, None) => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                &entry.path,
                format!("Entries of a {bundle_type} bundle must have a request"),
            )),
            (false, Some(_)) => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                &request_path,
                format!("Entries of a {bundle_type} bundle cannot have a request"),
            )),
            (true, Some(request)) => check_request(request, &request_path, outcome),
            (false, None) => {}
        }

        match (bundle_type.requires_response(), entry.response.is_some()) {
            (true, false) => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                &entry.path,
                format!("Entries of a {bundle_type} bundle must have a response"),
            )),
            (false, true) => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                join_path(&entry.path, "response"),
                format!("Entries of a {bundle_type} bundle cannot have a response"),
            )),
            _ => {}
        }
    }

    let leading = match bundle_type {
        BundleType::Document => Some("Composition"),
        BundleType::Message => Some("MessageHeader"),
        _ => None,
    };
    if let Some(expected) = leading {
        match entries.first() {
            Some(first) if first.resource_type() == Some(expected) => {}
            Some(first) => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                &first.resource_path,
                format!("The first entry of a {bundle_type} bundle must be a {expected}"),
            )),
            None => outcome.push(ValidationIssue::error(
                IssueCode::BundleRule,
                path,
                format!("A {bundle_type} bundle must start with a {expected}"),
            )),
        }
    }
}

fn check_request(request: &Value, path: &str, outcome: &mut Outcome) {
    match request.get("method").and_then(Value::as_str) {
        Some(method) if HTTP_VERBS.contains(&method) => {}
        Some(method) => outcome.push(ValidationIssue::error(
            IssueCode::BundleRule,
            join_path(path, "method"),
            format!("'{method}' is not an HTTP verb allowed in bundles"),
        )),
        None => outcome.push(ValidationIssue::error(
            IssueCode::BundleRule,
            join_path(path, "method"),
            "Request must have a method",
        )),
    }
    if !request
        .get("url")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.trim().is_empty())
    {
        outcome.push(ValidationIssue::error(
            IssueCode::BundleRule,
            join_path(path, "url"),
            "Request must have a url",
        ));
    }
}

impl FhirValidator {
    /// Validate `members` as the entries of one bundle of the given type.
    ///
    /// Each member is validated on its own with paths prefixed by its index
    /// (`[0].status`), then the bundle rules run across all members. An
    /// unknown member type is reported as an issue rather than failing.
    pub fn validate_bundle(&self, members: &[Value], bundle_type: BundleType) -> Result<Outcome> {
        let validator = self.element_validator();
        let entries: Vec<Entry<'_>> = members
            .iter()
            .enumerate()
            .map(|(i, member)| Entry::from_member(member, i))
            .collect();

        let mut outcome = Outcome::new();
        for entry in &entries {
            if let Some(resource) = entry.resource {
                let mut member = Outcome::new();
                validator.validate_nested_resource(
                    resource,
                    "",
                    Scope::root(resource),
                    true,
                    &mut member,
                )?;
                outcome.merge_prefixed(&entry.resource_path, member);
            }
        }
        check_rules(Some(bundle_type), &entries, "", &mut outcome);
        outcome.dedup();

        info!(
            bundle_type = %bundle_type,
            members = members.len(),
            issues = outcome.len(),
            valid = outcome.is_valid(),
            "bundle validation finished"
        );
        Ok(outcome)
    }
}
