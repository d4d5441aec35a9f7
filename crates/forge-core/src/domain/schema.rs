//! Minimal JSON field schema shared by agents, steps and tools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Coarse JSON type of a top-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn placeholder(&self) -> Value {
        match self {
            Self::String | Self::Any => json!("sample"),
            Self::Number => json!(1),
            Self::Boolean => json!(true),
            Self::Array => json!([]),
            Self::Object => json!({}),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Why a payload does not fit a [`JsonFieldSchema`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' expected {expected}, found {found}")]
    WrongType {
        field: String,
        expected: FieldType,
        found: String,
    },
}

impl SchemaViolation {
    pub fn field(&self) -> &str {
        match self {
            Self::NotAnObject => "",
            Self::MissingField { field } | Self::WrongType { field, .. } => field,
        }
    }
}

/// Required top-level fields, optional per-field types, and an optional
/// example payload used to synthesize validation input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JsonFieldSchema {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_types: BTreeMap<String, FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl JsonFieldSchema {
    pub fn required<const N: usize>(fields: [&str; N]) -> Self {
        Self {
            required_fields: fields.iter().map(|f| (*f).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.field_types.insert(field.into(), ty);
        self
    }

    pub fn with_example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    /// Check `payload` against required fields first, then declared types.
    pub fn validate(&self, payload: &Value) -> Result<(), SchemaViolation> {
        if self.required_fields.is_empty() && self.field_types.is_empty() {
            return Ok(());
        }
        let obj = payload.as_object().ok_or(SchemaViolation::NotAnObject)?;
        for field in &self.required_fields {
            if !obj.contains_key(field) {
                return Err(SchemaViolation::MissingField {
                    field: field.clone(),
                });
            }
        }
        for (field, ty) in &self.field_types {
            if let Some(value) = obj.get(field) {
                if !ty.matches(value) {
                    return Err(SchemaViolation::WrongType {
                        field: field.clone(),
                        expected: *ty,
                        found: json_type_name(value).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Structural sanity: non-empty, unique required field names.
    pub fn check_well_formed(&self) -> Result<(), String> {
        let mut seen = std::collections::BTreeSet::new();
        for field in &self.required_fields {
            if field.trim().is_empty() {
                return Err("required field names must not be empty".to_string());
            }
            if !seen.insert(field.as_str()) {
                return Err(format!("required field '{field}' listed twice"));
            }
        }
        if let Some(example) = &self.example {
            let mut bare = self.clone();
            bare.example = None;
            bare.validate(example)
                .map_err(|v| format!("example does not satisfy schema: {v}"))?;
        }
        Ok(())
    }

    /// A payload that satisfies this schema: the example if present,
    /// otherwise placeholders for every required and typed field.
    pub fn synthesize(&self) -> Value {
        if let Some(example) = &self.example {
            return example.clone();
        }
        let mut obj = Map::new();
        for field in &self.required_fields {
            let ty = self.field_types.get(field).copied().unwrap_or(FieldType::Any);
            obj.insert(field.clone(), ty.placeholder());
        }
        for (field, ty) in &self.field_types {
            obj.entry(field.clone()).or_insert_with(|| ty.placeholder());
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_reported_before_type_mismatch() {
        let schema = JsonFieldSchema::required(["a", "b"]).with_type("a", FieldType::Number);
        let err = schema.validate(&json!({"a": "x"})).unwrap_err();
        assert_eq!(err, SchemaViolation::MissingField { field: "b".into() });

        let err = schema.validate(&json!({"a": "x", "b": 1})).unwrap_err();
        assert!(matches!(err, SchemaViolation::WrongType { expected: FieldType::Number, .. }));
    }

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(JsonFieldSchema::default().validate(&json!(42)).is_ok());
        assert_eq!(
            JsonFieldSchema::required(["x"]).validate(&json!(42)),
            Err(SchemaViolation::NotAnObject)
        );
    }

    #[test]
    fn synthesized_payload_validates() {
        let schema = JsonFieldSchema::required(["text", "count"])
            .with_type("count", FieldType::Number)
            .with_type("tags", FieldType::Array);
        let sample = schema.synthesize();
        assert!(schema.validate(&sample).is_ok());
        assert_eq!(sample["count"], json!(1));
        assert_eq!(sample["tags"], json!([]));
    }

    #[test]
    fn example_must_fit_schema() {
        let schema = JsonFieldSchema::required(["text"]).with_example(json!({"other": 1}));
        assert!(schema.check_well_formed().is_err());
        let schema = JsonFieldSchema::required(["text"]).with_example(json!({"text": "hi"}));
        assert!(schema.check_well_formed().is_ok());
        assert_eq!(schema.synthesize(), json!({"text": "hi"}));
    }
}
