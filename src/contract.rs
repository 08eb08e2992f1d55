//! Payload contracts: declared field schemas with validation and coercion.
//!
//! A [`Schema`] lists the fields a request body must carry. Parsing a payload
//! against it checks every field, coerces values whose JSON type does not
//! match but can be converted (`"30"` for an integer field), and reports all
//! problems at once rather than stopping at the first.
//!
//! ```rust
//! use gatehouse::{FieldType, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::new("CreateUser")
//!     .field("username", FieldType::String)
//!     .field("age", FieldType::Integer)
//!     .field_or("active", FieldType::Boolean, json!(true));
//!
//! let user = schema.parse(&json!({"username": "alice", "age": "30"})).unwrap();
//! assert_eq!(user.get("age"), Some(&json!(30)));
//! assert_eq!(user.get("active"), Some(&json!(true)));
//! ```
//!
//! Fields the schema does not declare are ignored.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::response::{IntoResponse, Response};

// ── FieldType ─────────────────────────────────────────────────────────────────

/// Declared type of a contract field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    /// Accepts any JSON value, including `null`.
    Any,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String  => "string",
            Self::Integer => "integer",
            Self::Float   => "float",
            Self::Boolean => "boolean",
            Self::Array   => "array",
            Self::Object  => "object",
            Self::Any     => "any",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String  => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float   => value.is_f64(),
            Self::Boolean => value.is_boolean(),
            Self::Array   => value.is_array(),
            Self::Object  => value.is_object(),
            Self::Any     => true,
        }
    }

    /// Single conversion attempt from a mismatched value.
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::String, Value::Bool(b))   => Some(Value::String(b.to_string())),

            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (Self::Integer, Value::Number(n)) => n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= -TWO_POW_63 && *f < TWO_POW_63)
                .map(|f| Value::from(f as i64)),

            (Self::Float, Value::Number(n)) => exact_f64(n).map(Value::from),
            (Self::Float, Value::String(s)) => s.trim().parse::<f64>().ok()
                .filter(|f| f.is_finite())
                .map(Value::from),

            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1"  => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _             => None,
            },
            (Self::Boolean, Value::Number(n)) => match n.as_u64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _       => None,
            },

            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// `n` as a float, only if converting back yields the same integer.
fn exact_f64(n: &Number) -> Option<f64> {
    if let Some(i) = n.as_i64() {
        let f = i as f64;
        return (f < TWO_POW_63 && f as i64 == i).then_some(f);
    }
    if let Some(u) = n.as_u64() {
        let f = u as f64;
        return (f < TWO_POW_64 && f as u64 == u).then_some(f);
    }
    n.as_f64()
}

/// JSON type name of `value`, as reported in type mismatches.
fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null                   => "null",
        Value::Bool(_)                => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_)              => "integer",
        Value::String(_)              => "string",
        Value::Array(_)               => "array",
        Value::Object(_)              => "object",
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// A declared field: name, type and optional default.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: String,
    ty: FieldType,
    default: Option<Value>,
}

impl Field {
    pub fn name(&self) -> &str { &self.name }
    pub fn ty(&self) -> FieldType { self.ty }
    pub fn has_default(&self) -> bool { self.default.is_some() }
}

/// An ordered list of fields a payload must satisfy.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    name: Arc<str>,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Self { name: Arc::from(name), fields: Vec::new() }
    }

    /// Declares a required field.
    pub fn field(self, name: &str, ty: FieldType) -> Self {
        self.push(Field { name: name.to_owned(), ty, default: None })
    }

    /// Declares a field that takes `default` when the payload omits it.
    pub fn field_or(self, name: &str, ty: FieldType, default: Value) -> Self {
        self.push(Field { name: name.to_owned(), ty, default: Some(default) })
    }

    // Redeclaring a name replaces the earlier field in place.
    fn push(mut self, field: Field) -> Self {
        match self.fields.iter().position(|f| f.name == field.name) {
            Some(i) => self.fields[i] = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn fields(&self) -> &[Field] { &self.fields }

    /// Validates `payload` against every declared field.
    pub fn parse(&self, payload: &Value) -> Result<Contract, SchemaError> {
        let Value::Object(source) = payload else {
            return Err(SchemaError::NotAnObject(json_type(payload)));
        };

        let mut values = Map::new();
        let mut errors = Vec::new();

        for field in &self.fields {
            match source.get(&field.name) {
                None => match &field.default {
                    Some(default) => {
                        values.insert(field.name.clone(), default.clone());
                    }
                    None => errors.push(FieldError::Missing { field: field.name.clone() }),
                },
                Some(value) if field.ty.matches(value) => {
                    values.insert(field.name.clone(), value.clone());
                }
                Some(value) => match field.ty.coerce(value) {
                    Some(coerced) => {
                        values.insert(field.name.clone(), coerced);
                    }
                    None => errors.push(FieldError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.ty,
                        actual: json_type(value),
                    }),
                },
            }
        }

        if errors.is_empty() {
            Ok(Contract { schema: Arc::clone(&self.name), values })
        } else {
            Err(SchemaError::Fields(FieldErrors(errors)))
        }
    }

    /// Parses JSON text, then validates it. A blank body reads as `{}`.
    pub fn parse_str(&self, text: &str) -> Result<Contract, SchemaError> {
        let text = text.trim();
        if text.is_empty() {
            return self.parse(&Value::Object(Map::new()));
        }
        self.parse(&serde_json::from_str(text)?)
    }
}

// ── Contract ──────────────────────────────────────────────────────────────────

/// A payload that passed validation against a [`Schema`].
///
/// Holds exactly the declared fields, with defaults filled in and coerced
/// values in their declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct Contract {
    schema: Arc<str>,
    values: Map<String, Value>,
}

impl Contract {
    pub fn schema_name(&self) -> &str { &self.schema }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn to_mapping(&self) -> &Map<String, Value> { &self.values }

    pub fn into_mapping(self) -> Map<String, Value> { self.values }

    /// Serialised JSON object. Feeding it back through the same schema yields
    /// an equal contract.
    pub fn to_json(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }

    /// Deserialises the validated fields into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.values.clone()))
    }
}

impl Serialize for Contract {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl IntoResponse for Contract {
    fn into_response(self) -> Response { Response::json(self.to_json()) }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A single field-level violation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldError {
    Missing { field: String },
    TypeMismatch { field: String, expected: FieldType, actual: &'static str },
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field } | Self::TypeMismatch { field, .. } => field,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing { .. }      => "REQUIRED",
            Self::TypeMismatch { .. } => "INVALID_TYPE",
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { field } => write!(f, "missing field `{field}`"),
            Self::TypeMismatch { field, expected, actual } => {
                write!(f, "field `{field}` must be of type {expected}, got {actual}")
            }
        }
    }
}

impl Serialize for FieldError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Rendered<'a> {
            field: &'a str,
            code: &'static str,
            message: String,
        }

        Rendered { field: self.field(), code: self.code(), message: self.to_string() }
            .serialize(serializer)
    }
}

/// Every field violation found in one pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn as_slice(&self) -> &[FieldError] { &self.0 }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Why a payload failed to parse into a [`Contract`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("{0}")]
    Fields(FieldErrors),
}

impl SchemaError {
    /// Field-level violations; empty when the payload was not an object at all.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Fields(errors) => errors.as_slice(),
            Self::InvalidJson(_) | Self::NotAnObject(_) => &[],
        }
    }
}
