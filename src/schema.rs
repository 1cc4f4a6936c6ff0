//! Schema file format and field model
//!
//! A schema file is an Avro record definition:
//!
//! ```json
//! {
//!   "type": "record",
//!   "name": "UserSignupEvent",
//!   "namespace": "com.example.events",
//!   "fields": [
//!     { "name": "userId", "type": "string" },
//!     { "name": "signupTimestamp", "type": "long" }
//!   ]
//! }
//! ```
//!
//! Bodies are validated in two passes before any registry call: a structural
//! check against an embedded JSON Schema, then a full Avro parse.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use jsonschema::JSONSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{ForgeError, Result};

/// Structural contract for uploaded schema files
const RECORD_META_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["type", "name", "fields"],
  "properties": {
    "type": { "const": "record" },
    "name": { "type": "string", "pattern": "^[A-Za-z_][A-Za-z0-9_]*$" },
    "namespace": { "type": "string" },
    "doc": { "type": "string" },
    "fields": {
      "type": "array",
      "minItems": 1,
      "items": {
        "type": "object",
        "required": ["name", "type"],
        "properties": {
          "name": { "type": "string", "pattern": "^[A-Za-z_][A-Za-z0-9_]*$" },
          "doc": { "type": "string" }
        }
      }
    }
  }
}"#;

fn subject_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").expect("static pattern"))
}

/// Check that a subject name is usable as a registry subject and a type name stem
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject_pattern().is_match(subject) {
        Ok(())
    } else {
        Err(ForgeError::InvalidSchema(vec![format!(
            "subject '{}' must start with a letter and contain only letters, digits, '_', '.' or '-'",
            subject
        )]))
    }
}

// =============================================================================
// Field Types
// =============================================================================

/// Semantic type of a record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    /// `["null", T]` union
    Nullable(Box<FieldType>),
    /// Anything the generators cannot express (arrays, maps, nested records,
    /// enums, fixed, named references, wider unions)
    Unsupported(String),
}

impl FieldType {
    /// Parse the `type` attribute of a field
    pub fn parse(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(name) => Self::from_name(name),
            serde_json::Value::Object(map) => match map.get("type") {
                // Logical types annotate a primitive, which is what travels on the wire
                Some(serde_json::Value::String(name)) => match Self::from_name(name) {
                    FieldType::Unsupported(_) => FieldType::Unsupported(name.clone()),
                    primitive => primitive,
                },
                _ => FieldType::Unsupported(value.to_string()),
            },
            serde_json::Value::Array(branches) => {
                let parsed: Vec<FieldType> = branches.iter().map(FieldType::parse).collect();
                match parsed.as_slice() {
                    [FieldType::Null, inner] | [inner, FieldType::Null]
                        if inner.is_supported() && *inner != FieldType::Null =>
                    {
                        FieldType::Nullable(Box::new(inner.clone()))
                    }
                    _ => FieldType::Unsupported(value.to_string()),
                }
            }
            other => FieldType::Unsupported(other.to_string()),
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "null" => FieldType::Null,
            "boolean" => FieldType::Boolean,
            "int" => FieldType::Int,
            "long" => FieldType::Long,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "bytes" => FieldType::Bytes,
            "string" => FieldType::String,
            other => FieldType::Unsupported(other.to_string()),
        }
    }

    /// Whether every part of this type has a generator mapping
    pub fn is_supported(&self) -> bool {
        match self {
            FieldType::Unsupported(_) => false,
            FieldType::Nullable(inner) => inner.is_supported(),
            _ => true,
        }
    }

    /// Whether data written as `self` can be read as `target` under Avro
    /// schema resolution (identity included)
    pub fn promotes_to(&self, target: &FieldType) -> bool {
        use FieldType::*;
        if self == target {
            return true;
        }
        match (self, target) {
            (Int, Long) | (Int, Float) | (Int, Double) => true,
            (Long, Float) | (Long, Double) => true,
            (Float, Double) => true,
            (String, Bytes) | (Bytes, String) => true,
            (Nullable(a), Nullable(b)) => a.promotes_to(b),
            (inner, Nullable(b)) => inner.promotes_to(b),
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Null => write!(f, "null"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::String => write!(f, "string"),
            FieldType::Nullable(inner) => write!(f, "[\"null\", {}]", inner),
            FieldType::Unsupported(raw) => write!(f, "{}", raw),
        }
    }
}

// =============================================================================
// Record Body
// =============================================================================

/// One field of a record, in registration order
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub default: Option<serde_json::Value>,
    pub doc: Option<String>,
}

impl FieldDef {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A validated record definition
///
/// The original JSON is kept verbatim as `definition`; it is what gets
/// registered, checksummed and embedded in generated packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub struct SchemaBody {
    name: String,
    namespace: Option<String>,
    doc: Option<String>,
    fields: Vec<FieldDef>,
    definition: serde_json::Value,
}

impl SchemaBody {
    /// Parse and validate a schema file's text
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ForgeError::InvalidSchema(vec![format!("not valid JSON: {}", e)]))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded schema definition
    pub fn from_value(definition: serde_json::Value) -> Result<Self> {
        validate_structure(&definition)?;

        apache_avro::Schema::parse(&definition)
            .map_err(|e| ForgeError::InvalidSchema(vec![format!("not a valid Avro record: {}", e)]))?;

        let str_attr = |key: &str| {
            definition
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        let name = str_attr("name").unwrap_or_default();
        let namespace = str_attr("namespace");
        let doc = str_attr("doc");

        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        let raw_fields = definition
            .get("fields")
            .and_then(|f| f.as_array())
            .cloned()
            .unwrap_or_default();
        for raw in &raw_fields {
            let field_name = raw.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            if !seen.insert(field_name.to_string()) {
                return Err(ForgeError::InvalidSchema(vec![format!(
                    "duplicate field '{}'",
                    field_name
                )]));
            }
            fields.push(FieldDef {
                name: field_name.to_string(),
                field_type: FieldType::parse(raw.get("type").unwrap_or(&serde_json::Value::Null)),
                default: raw.get("default").cloned(),
                doc: raw.get("doc").and_then(|d| d.as_str()).map(String::from),
            });
        }

        Ok(Self {
            name,
            namespace,
            doc,
            fields,
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `namespace.name`, or just `name`
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }

    pub fn definition(&self) -> &serde_json::Value {
        &self.definition
    }

    /// Compact, key-sorted JSON rendering of the definition
    pub fn canonical_json(&self) -> String {
        self.definition.to_string()
    }

    /// Pretty rendering used for files written to disk
    pub fn pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.definition)?)
    }

    pub fn checksum(&self) -> Checksum {
        Checksum::from_json(&self.definition)
    }

    /// The parsed Avro schema used for binary encoding
    pub fn avro_schema(&self) -> Result<apache_avro::Schema> {
        Ok(apache_avro::Schema::parse(&self.definition)?)
    }
}

impl TryFrom<serde_json::Value> for SchemaBody {
    type Error = ForgeError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<SchemaBody> for serde_json::Value {
    fn from(body: SchemaBody) -> Self {
        body.definition
    }
}

fn validate_structure(definition: &serde_json::Value) -> Result<()> {
    let meta: serde_json::Value = serde_json::from_str(RECORD_META_SCHEMA)?;
    let compiled = JSONSchema::compile(&meta)
        .map_err(|e| ForgeError::InvalidSchema(vec![format!("meta-schema: {}", e)]))?;

    let messages: Vec<String> = match compiled.validate(definition) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };

    if messages.is_empty() {
        Ok(())
    } else {
        Err(ForgeError::InvalidSchema(messages))
    }
}
