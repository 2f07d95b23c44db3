//! Declared input schemas for evidence tools and argument validation.

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
}

impl FieldType {
    fn json_type(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
        }
    }
}

/// One named input field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub minimum: Option<i64>,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            field_type: FieldType::String,
            required: true,
            default: None,
            minimum: None,
            description,
        }
    }

    /// An optional integer field with a default and a lower bound.
    pub fn integer(name: &'static str, description: &'static str, default: i64, minimum: i64) -> Self {
        Self {
            name,
            field_type: FieldType::Integer,
            required: false,
            default: Some(json!(default)),
            minimum: Some(minimum),
            description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolSchema {
    pub fields: Vec<FieldSpec>,
}

/// Why a tool's arguments were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be of type {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' must be at least {minimum}")]
    BelowMinimum { field: &'static str, minimum: i64 },

    #[error("field '{0}' must not be blank")]
    Blank(&'static str),
}

impl ToolSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Render as a JSON Schema object, the shape LLM tool APIs accept.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": field.field_type.json_type(),
                "description": field.description,
            });
            if let Some(default) = &field.default {
                prop["default"] = default.clone();
            }
            if let Some(minimum) = field.minimum {
                prop["minimum"] = json!(minimum);
            }
            properties.insert(field.name.to_string(), prop);
            if field.required {
                required.push(field.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` against the schema and fill in defaults.
    ///
    /// `null` is treated as an empty object. Integers may arrive as numeric
    /// strings. Unknown fields are ignored.
    pub fn validate(&self, arguments: &Value) -> Result<ValidatedArgs, SchemaValidationError> {
        let empty = Map::new();
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(SchemaValidationError::NotAnObject),
        };

        let mut values = Map::new();
        for field in &self.fields {
            let raw = object.get(field.name).filter(|v| !v.is_null());
            let value = match (raw, &field.default) {
                (Some(v), _) => check_field(field, v)?,
                (None, Some(default)) => default.clone(),
                (None, None) if field.required => {
                    return Err(SchemaValidationError::MissingField(field.name))
                }
                (None, None) => continue,
            };
            values.insert(field.name.to_string(), value);
        }
        Ok(ValidatedArgs(values))
    }
}

fn check_field(field: &FieldSpec, value: &Value) -> Result<Value, SchemaValidationError> {
    let wrong_type = || SchemaValidationError::WrongType {
        field: field.name,
        expected: field.field_type.json_type(),
    };
    match field.field_type {
        FieldType::String => {
            let s = value.as_str().ok_or_else(wrong_type)?;
            if s.trim().is_empty() {
                return Err(SchemaValidationError::Blank(field.name));
            }
            Ok(Value::String(s.to_string()))
        }
        FieldType::Integer => {
            let n = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(wrong_type)?;
            if let Some(minimum) = field.minimum {
                if n < minimum {
                    return Err(SchemaValidationError::BelowMinimum {
                        field: field.name,
                        minimum,
                    });
                }
            }
            Ok(json!(n))
        }
    }
}

// ---------------------------------------------------------------------------
// ValidatedArgs
// ---------------------------------------------------------------------------

/// Arguments that passed [`ToolSchema::validate`], with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    pub fn str(&self, name: &str) -> &str {
        self.0.get(name).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn integer(&self, name: &str) -> i64 {
        self.0.get(name).and_then(Value::as_i64).unwrap_or_default()
    }

    /// An integer field clamped into `u32`.
    pub fn minutes(&self, name: &str) -> u32 {
        u32::try_from(self.integer(name)).unwrap_or(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
