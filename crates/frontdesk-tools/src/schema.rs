//! Data-driven payload validation.
//!
//! Each tool declares its expected fields as a static [`FieldSpec`] slice;
//! validation is one generic pass over that slice, so adding a tool never
//! means writing new validation code. Failures always name the offending
//! field.

use frontdesk_types::{ErrorCode, ToolFailure};
use serde_json::{json, Value};

/// The accepted shape of one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string after trimming.
    Text,
    Bool,
    /// Integer within an inclusive range.
    Integer { min: i64, max: i64 },
    /// RFC 3339 timestamp string.
    Timestamp,
}

/// One expected payload field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Validates `payload` against a field schema.
///
/// `null` (no arguments) is treated as an empty object. Unknown members are
/// ignored. Every failure is `invalid_payload`: missing required fields are
/// reported together under `details.missing`, and the first type mismatch
/// names the field under `details.field`.
pub fn validate_payload(fields: &[FieldSpec], payload: &Value) -> Result<(), ToolFailure> {
    static EMPTY: Value = Value::Null;
    let object = match payload {
        Value::Object(map) => map,
        Value::Null => {
            return check_missing(fields, &EMPTY);
        }
        other => {
            return Err(ToolFailure::new(
                ErrorCode::InvalidPayload,
                format!("payload must be a JSON object, got {}", type_name(other)),
            ));
        }
    };

    check_missing(fields, payload)?;

    for spec in fields {
        let Some(value) = object.get(spec.name) else {
            continue;
        };
        if value.is_null() {
            continue; // explicit null reads as absent
        }
        if let Some(problem) = kind_mismatch(spec.kind, value) {
            return Err(ToolFailure::new(
                ErrorCode::InvalidPayload,
                format!("field `{}` {problem}", spec.name),
            )
            .with_details(json!({ "field": spec.name })));
        }
    }
    Ok(())
}

fn check_missing(fields: &[FieldSpec], payload: &Value) -> Result<(), ToolFailure> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|spec| spec.required)
        .filter(|spec| {
            payload
                .get(spec.name)
                .map(|v| v.is_null())
                .unwrap_or(true)
        })
        .map(|spec| spec.name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolFailure::new(
            ErrorCode::InvalidPayload,
            format!("missing required fields: {}", missing.join(", ")),
        )
        .with_details(json!({ "missing": missing })))
    }
}

/// Returns a description of the mismatch, or `None` if the value fits.
fn kind_mismatch(kind: FieldKind, value: &Value) -> Option<String> {
    match kind {
        FieldKind::Text => match value.as_str() {
            Some(s) if !s.trim().is_empty() => None,
            Some(_) => Some("must be a non-empty string".to_string()),
            None => Some(format!("must be a string, got {}", type_name(value))),
        },
        FieldKind::Bool => {
            if value.is_boolean() {
                None
            } else {
                Some(format!("must be a boolean, got {}", type_name(value)))
            }
        }
        FieldKind::Integer { min, max } => match value.as_i64() {
            Some(n) if (min..=max).contains(&n) => None,
            Some(n) => Some(format!("must be between {min} and {max}, got {n}")),
            None => Some(format!("must be an integer, got {}", type_name(value))),
        },
        FieldKind::Timestamp => match value.as_str() {
            Some(s) => match chrono::DateTime::parse_from_rfc3339(s) {
                Ok(_) => None,
                Err(_) => Some("must be an RFC 3339 timestamp".to_string()),
            },
            None => Some(format!("must be a string, got {}", type_name(value))),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
