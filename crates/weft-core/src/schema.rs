//! Declarative parameter schemas for event registrations.
//!
//! A schema is plain data: field name to expected JSON kind plus a required
//! flag. The bus validates publish payloads against the schema registered
//! for the exact event type; there is no prefix inheritance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Expected JSON kind for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    /// Any non-null value.
    Any,
}

impl JsonKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Number => value.is_number(),
            JsonKind::Bool => value.is_boolean(),
            JsonKind::Object => value.is_object(),
            JsonKind::Array => value.is_array(),
            JsonKind::Any => !value.is_null(),
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonKind::String => "string",
            JsonKind::Number => "number",
            JsonKind::Bool => "bool",
            JsonKind::Object => "object",
            JsonKind::Array => "array",
            JsonKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// One field of a parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub kind: JsonKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn required(kind: JsonKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    pub fn optional(kind: JsonKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }
}

/// A single schema violation, suitable for forwarding to the repair
/// capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Parameter schema for one event type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Field specs keyed by field name; BTreeMap keeps violation order
    /// stable.
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Validate a payload. The payload must be a JSON object; every
    /// required field must be present with the declared kind, and present
    /// optional fields must match their kind. Unknown fields pass through.
    pub fn validate(&self, data: &Value) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();

        let Some(object) = data.as_object() else {
            return Err(vec![SchemaViolation {
                field: "<root>".to_string(),
                message: "params must be a JSON object".to_string(),
            }]);
        };

        for (name, spec) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(SchemaViolation {
                            field: name.clone(),
                            message: format!("missing required field of kind {}", spec.kind),
                        });
                    }
                }
                Some(value) => {
                    if !spec.kind.matches(value) {
                        violations.push(SchemaViolation {
                            field: name.clone(),
                            message: format!("expected {}, got {}", spec.kind, kind_name(value)),
                        });
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
