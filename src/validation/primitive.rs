//! Primitive datatype checks.
//!
//! Two levels: the JSON representation (a `boolean` must be a JSON bool, an
//! `integer` a JSON integer, most others JSON strings) and the lexical form
//! of string-encoded values (dates, ids, uris, ...).

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$")
        .unwrap()
});

static DATE_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$")
        .unwrap()
});

static INSTANT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$")
        .unwrap()
});

static TIME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$").unwrap());

static ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").unwrap());

static CODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s]+( [^\s]+)*$").unwrap());

static OID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").unwrap());

static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

static BASE64_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$").unwrap()
});

/// Name of the JSON representation a primitive type expects.
pub fn expected_json_kind(type_code: &str) -> &'static str {
    match type_code {
        "boolean" => "boolean",
        "integer" | "positiveInt" | "unsignedInt" => "integer number",
        "decimal" => "number",
        "integer64" => "string or integer number",
        _ => "string",
    }
}

/// Whether the JSON representation fits the primitive type.
pub fn json_kind_matches(type_code: &str, value: &Value) -> bool {
    match type_code {
        "boolean" => value.is_boolean(),
        "integer" | "positiveInt" | "unsignedInt" => value.is_i64() || value.is_u64(),
        "decimal" => value.is_number(),
        "integer64" => value.is_i64() || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok()),
        _ => value.is_string(),
    }
}

/// Lexical check of a primitive value whose JSON kind already matched.
/// Returns a description of the problem, if any.
pub fn lexical_error(type_code: &str, value: &Value) -> Option<String> {
    if let Some(n) = value.as_i64() {
        return match type_code {
            "integer" if i32::try_from(n).is_err() => Some(format!("{n} is outside the 32-bit integer range")),
            "positiveInt" if n < 1 || n > i64::from(i32::MAX) => Some(format!("{n} is not a positive integer")),
            "unsignedInt" if n < 0 || n > i64::from(i32::MAX) => Some(format!("{n} is not an unsigned integer")),
            _ => None,
        };
    }
    if value.is_u64() {
        return matches!(type_code, "integer" | "positiveInt" | "unsignedInt")
            .then(|| format!("{value} is outside the 32-bit integer range"));
    }

    let text = value.as_str()?;
    let valid = match type_code {
        "string" | "markdown" => !text.trim().is_empty(),
        "code" => CODE_REGEX.is_match(text),
        "id" => ID_REGEX.is_match(text),
        "uri" | "canonical" => !text.is_empty() && !text.chars().any(char::is_whitespace),
        "url" => url::Url::parse(text).is_ok(),
        "oid" => OID_REGEX.is_match(text),
        "uuid" => UUID_REGEX.is_match(text),
        "base64Binary" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            BASE64_REGEX.is_match(&compact)
        }
        "date" => DATE_REGEX.is_match(text) && calendar_date_ok(text),
        "dateTime" => DATE_TIME_REGEX.is_match(text) && calendar_date_ok(text),
        "instant" => INSTANT_REGEX.is_match(text) && calendar_date_ok(text),
        "time" => TIME_REGEX.is_match(text),
        "xhtml" => {
            let trimmed = text.trim();
            trimmed.starts_with("<div") && trimmed.ends_with("</div>")
        }
        _ => true,
    };

    (!valid).then(|| format!("'{text}' is not a valid {type_code}"))
}

/// Reject dates such as 2023-02-30 that pass the pattern.
fn calendar_date_ok(text: &str) -> bool {
    match text.get(..10) {
        Some(day) if day.len() == 10 && day.as_bytes()[4] == b'-' && day.as_bytes()[7] == b'-' => {
            NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok()
        }
        _ => true,
    }
}
