//! Schema - Typed parameter declarations
//!
//! Both the fan-out tool and the result tool declare their parameters as an
//! ordered list of [`ParameterSpec`]. This module turns that list into the
//! JSON schema handed to the LLM and coerces incoming argument values to the
//! declared types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// UTF-8 text
    String,
    /// Any JSON number
    Number,
    /// Whole number
    Integer,
    /// Boolean flag
    #[serde(alias = "boolean")]
    Bool,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

impl ParameterType {
    /// Returns the JSON schema type name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Coerce a supplied value to this type.
    ///
    /// Returns a short reason on failure; callers prefix it with the
    /// parameter name.
    pub fn coerce(&self, value: &Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (Self::String, Value::String(_)) => Ok(value.clone()),
            (Self::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

            (Self::Number, Value::Number(_)) => Ok(value.clone()),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got \"{s}\"")),

            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Ok(value.clone())
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Ok(Value::from(f as i64))
                        }
                        _ => Err(format!("expected an integer, got {n}")),
                    }
                }
            }
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected an integer, got \"{s}\"")),

            (Self::Bool, Value::Bool(_)) => Ok(value.clone()),
            (Self::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected true or false, got \"{s}\"")),
            },

            (Self::Object, Value::Object(_)) | (Self::Array, Value::Array(_)) => Ok(value.clone()),
            (Self::Object | Self::Array, Value::String(s)) => {
                match serde_json::from_str::<Value>(s) {
                    Ok(parsed) if self.matches_shape(&parsed) => Ok(parsed),
                    _ => Err(format!("expected {}, got a string", self.with_article())),
                }
            }

            (_, other) => Err(format!(
                "expected {}, got {}",
                self.with_article(),
                describe(other)
            )),
        }
    }

    fn matches_shape(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Object, Value::Object(_)) | (Self::Array, Value::Array(_))
        )
    }

    fn with_article(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Bool => "a boolean",
            Self::Object => "an object",
            Self::Array => "an array",
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name as seen by the LLM
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Whether the caller must supply it
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    /// Create a new optional parameter
    #[must_use]
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the parameter as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Build the JSON schema object for an ordered parameter list.
#[must_use]
pub fn to_json_schema(params: &[ParameterSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut property = Map::new();
        property.insert("type".into(), Value::from(param.param_type.as_str()));
        if !param.description.is_empty() {
            property.insert("description".into(), Value::from(param.description.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(property));
        if param.required {
            required.push(Value::from(param.name.clone()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
