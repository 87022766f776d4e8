//! Field access helpers shared by the validator, preparer and metadata builder.
//!
//! Form payloads arrive from several generations of intake forms, so the
//! same logical field can live under different keys. Each alias list below is
//! in priority order: the first key holding a non-empty string wins.

use serde_json::{Map, Value};

use crate::application::FormData;

pub const FIRST_NAME_ALIASES: &[&str] = &["firstName", "first_name"];
pub const LAST_NAME_ALIASES: &[&str] = &["lastName", "surname", "last_name"];

pub const UNKNOWN_APPLICANT: &str = "Unknown Applicant";

/// Monetary response fields: validated as non-negative numbers, printed with 2 decimals.
pub const MONEY_FIELDS: &[&str] = &["salary", "otherIncome", "monthlyExpenses", "existingLoans"];

/// Date response fields reprinted as `DD/MM/YYYY`.
pub const DATE_FIELDS: &[&str] = &["dateOfBirth", "passportExpiry", "employmentStartDate"];

/// First non-empty string value among `aliases`.
pub fn resolve_alias<'a>(data: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// `"{first} {last}"`, trimmed, or [`UNKNOWN_APPLICANT`] when both are missing.
pub fn applicant_name(data: &Map<String, Value>) -> String {
    let first = resolve_alias(data, FIRST_NAME_ALIASES).unwrap_or("");
    let last = resolve_alias(data, LAST_NAME_ALIASES).unwrap_or("");
    let full = format!("{first} {last}");
    let full = full.trim();

    if full.is_empty() {
        UNKNOWN_APPLICANT.to_string()
    } else {
        full.to_string()
    }
}

/// Whether a field counts as filled in: present, not null, not a blank
/// string, not an empty array or object.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(_)) => true,
    }
}

/// Loan terms (`amount`, `creditTerm`, `interestRate`) sit at the top of the
/// payload; older forms put them among the responses.
pub fn loan_field<'a>(form_data: &'a FormData, key: &str) -> Option<&'a Value> {
    form_data
        .get(key)
        .or_else(|| form_data.form_responses().and_then(|r| r.get(key)))
        .filter(|value| !value.is_null())
}

/// Numeric reading of a value: JSON numbers as-is, strings trimmed with an
/// optional trailing `%` stripped. `NaN` and infinities are not numbers here.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// String reading of a scalar value; numbers are rendered, other types are `None`.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
