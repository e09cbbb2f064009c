//! Structural validation of generated content.
//!
//! Every container has a fixed shape. Violations are collected, never raised:
//! the content is kept next to its error list so a reviewer can see what the
//! provider produced.

use crate::models::ContainerType;
use serde_json::Value;

/// Practice items a LEARN unit must contain.
pub const LEARN_PRACTICE_COUNT: usize = 3;
/// Worked examples an EXPERIENCE unit must contain.
pub const EXPERIENCE_EXAMPLE_COUNT: usize = 3;
/// Practice scenarios an EXPERIENCE unit must contain.
pub const EXPERIENCE_PRACTICE_COUNT: usize = 2;
/// Discovery stations a DISCOVER unit must contain.
pub const DISCOVER_STATION_COUNT: usize = 4;

/// Validates `payload` against the shape of `container`.
///
/// Returns every violation found; an empty list means the payload is valid.
#[must_use]
pub fn validate_content(container: ContainerType, payload: &Value) -> Vec<String> {
    let Some(object) = payload.as_object() else {
        return vec![format!(
            "{container} content must be a JSON object, got {}",
            type_name(payload)
        )];
    };

    let mut errors = Vec::new();
    match container {
        ContainerType::Learn => {
            expect_array_len(object.get("practice"), "practice", LEARN_PRACTICE_COUNT, &mut errors);
            expect_assessment(object.get("assessment"), true, &mut errors);
        },
        ContainerType::Experience => {
            expect_array_len(
                object.get("examples"),
                "examples",
                EXPERIENCE_EXAMPLE_COUNT,
                &mut errors,
            );
            expect_array_len(
                object.get("practice"),
                "practice",
                EXPERIENCE_PRACTICE_COUNT,
                &mut errors,
            );
            expect_assessment(object.get("assessment"), false, &mut errors);
        },
        ContainerType::Discover => {
            match object.get("scenario") {
                Some(Value::Object(_)) => {},
                Some(other) => errors.push(format!(
                    "scenario must be a single object, got {}",
                    type_name(other)
                )),
                None => errors.push("missing unifying scenario".to_string()),
            }
            expect_array_len(
                object.get("stations"),
                "stations",
                DISCOVER_STATION_COUNT,
                &mut errors,
            );
        },
    }
    errors
}

fn expect_array_len(value: Option<&Value>, field: &str, expected: usize, errors: &mut Vec<String>) {
    match value {
        Some(Value::Array(items)) if items.len() == expected => {},
        Some(Value::Array(items)) => errors.push(format!(
            "{field} must have exactly {expected} items, got {}",
            items.len()
        )),
        Some(other) => errors.push(format!("{field} must be a list, got {}", type_name(other))),
        None => errors.push(format!("missing {field}")),
    }
}

/// An assessment is one object. LEARN assessments also name their question and type.
fn expect_assessment(value: Option<&Value>, require_fields: bool, errors: &mut Vec<String>) {
    match value {
        Some(Value::Object(fields)) => {
            if require_fields {
                for field in ["question", "type"] {
                    if !fields.contains_key(field) {
                        errors.push(format!("assessment is missing '{field}'"));
                    }
                }
            }
        },
        Some(Value::Array(items)) => errors.push(format!(
            "assessment must be a single object, got a list of {}",
            items.len()
        )),
        Some(other) => errors.push(format!(
            "assessment must be a single object, got {}",
            type_name(other)
        )),
        None => errors.push("missing assessment".to_string()),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
