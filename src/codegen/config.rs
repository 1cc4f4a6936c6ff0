//! Codegen Configuration
//!
//! Per-language rendering configuration (`RenderProfile`): type table,
//! nullable wrapping and keyword escaping. Field classification lives in
//! [`crate::schema::FieldType`] and is config-free; only emission reads a
//! profile.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::schema::{FieldDef, FieldType};

// =============================================================================
// Language
// =============================================================================

/// Supported target languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    Python,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::TypeScript, Language::Rust];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Ok(Language::Rust),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "python" | "py" => Ok(Language::Python),
            _ => Err(ForgeError::UnsupportedTarget(s.to_string())),
        }
    }
}

// =============================================================================
// Render Profile (Per-Language)
// =============================================================================

/// Language-specific rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderProfile {
    /// Language identifier
    pub language: Language,

    /// Avro primitive -> language type
    pub types: TypeMappings,

    /// How `["null", T]` is spelled
    pub nullable: NullableRepr,

    /// Prefix applied to field names that collide with keywords
    pub keyword_escape: String,
}

/// Type mappings for the Avro primitives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMappings {
    pub null: String,
    pub boolean: String,
    pub int: String,
    pub long: String,
    pub float: String,
    pub double: String,
    pub bytes: String,
    pub string: String,
}

/// Representation of nullable values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullableRepr {
    /// Rust: Option<T>
    Option,
    /// TypeScript: T | null
    UnionNull,
    /// Python: Optional[T]
    OptionalType,
}

// =============================================================================
// Default Profiles
// =============================================================================

impl RenderProfile {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Rust => Self::rust(),
            Language::TypeScript => Self::typescript(),
            Language::Python => Self::python(),
        }
    }

    /// Rust profile; types line up with what `apache_avro`'s serde support reads and writes
    pub fn rust() -> Self {
        Self {
            language: Language::Rust,
            types: TypeMappings {
                null: "()".to_string(),
                boolean: "bool".to_string(),
                int: "i32".to_string(),
                long: "i64".to_string(),
                float: "f32".to_string(),
                double: "f64".to_string(),
                bytes: "serde_bytes::ByteBuf".to_string(),
                string: "String".to_string(),
            },
            nullable: NullableRepr::Option,
            keyword_escape: "r#".to_string(),
        }
    }

    /// TypeScript profile for the `avsc` runtime
    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
            types: TypeMappings {
                null: "null".to_string(),
                boolean: "boolean".to_string(),
                int: "number".to_string(),
                long: "number".to_string(),
                float: "number".to_string(),
                double: "number".to_string(),
                bytes: "Buffer".to_string(),
                string: "string".to_string(),
            },
            nullable: NullableRepr::UnionNull,
            keyword_escape: String::new(),
        }
    }

    /// Python profile for the `fastavro` runtime
    pub fn python() -> Self {
        Self {
            language: Language::Python,
            types: TypeMappings {
                null: "None".to_string(),
                boolean: "bool".to_string(),
                int: "int".to_string(),
                long: "int".to_string(),
                float: "float".to_string(),
                double: "float".to_string(),
                bytes: "bytes".to_string(),
                string: "str".to_string(),
            },
            nullable: NullableRepr::OptionalType,
            keyword_escape: "_".to_string(),
        }
    }
}

// =============================================================================
// Render Helpers
// =============================================================================

impl RenderProfile {
    /// Escape a keyword if needed
    pub fn escape_keyword(&self, name: &str) -> String {
        let keywords: &[&str] = match self.language {
            Language::Rust => RUST_KEYWORDS,
            // Keywords are legal property names in TypeScript
            Language::TypeScript => &[],
            Language::Python => PYTHON_KEYWORDS,
        };

        if keywords.contains(&name) {
            format!("{}{}", self.keyword_escape, name)
        } else {
            name.to_string()
        }
    }

    /// Wrap a type to make it nullable
    pub fn wrap_nullable(&self, type_str: &str) -> String {
        match self.nullable {
            NullableRepr::Option => format!("Option<{}>", type_str),
            NullableRepr::UnionNull => format!("{} | null", type_str),
            NullableRepr::OptionalType => format!("Optional[{}]", type_str),
        }
    }

    /// Type string for a field; anything outside the table is an error naming the field
    pub fn field_type(&self, field: &FieldDef) -> Result<String> {
        self.lookup(&field.field_type).ok_or_else(|| ForgeError::UnsupportedFieldType {
            field: field.name.clone(),
            field_type: field.field_type.to_string(),
        })
    }

    fn lookup(&self, field_type: &FieldType) -> Option<String> {
        let t = &self.types;
        let rendered = match field_type {
            FieldType::Null => t.null.clone(),
            FieldType::Boolean => t.boolean.clone(),
            FieldType::Int => t.int.clone(),
            FieldType::Long => t.long.clone(),
            FieldType::Float => t.float.clone(),
            FieldType::Double => t.double.clone(),
            FieldType::Bytes => t.bytes.clone(),
            FieldType::String => t.string.clone(),
            FieldType::Nullable(inner) => self.wrap_nullable(&self.lookup(inner)?),
            FieldType::Unsupported(_) => return None,
        };
        Some(rendered)
    }
}

// =============================================================================
// Keywords
// =============================================================================

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod",
    "move", "mut", "pub", "ref", "return", "static", "struct", "trait", "true",
    "type", "unsafe", "use", "where", "while", "async", "await", "dyn",
    "abstract", "become", "box", "do", "final", "macro", "override", "priv",
    "typeof", "unsized", "virtual", "yield", "try",
];

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break",
    "class", "continue", "def", "del", "elif", "else", "except", "finally",
    "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, raw: serde_json::Value) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type: FieldType::parse(&raw),
            default: None,
            doc: None,
        }
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("TS".parse::<Language>().unwrap(), Language::TypeScript);
        assert_eq!("rs".parse::<Language>().unwrap(), Language::Rust);
        let err = "cobol".parse::<Language>().unwrap_err();
        assert!(matches!(err, ForgeError::UnsupportedTarget(ref l) if l == "cobol"));
    }

    #[test]
    fn test_type_tables() {
        let long = field("signupTimestamp", json!("long"));
        assert_eq!(RenderProfile::rust().field_type(&long).unwrap(), "i64");
        assert_eq!(RenderProfile::python().field_type(&long).unwrap(), "int");
        assert_eq!(RenderProfile::typescript().field_type(&long).unwrap(), "number");
    }

    #[test]
    fn test_nullable_wrapping() {
        let referrer = field("referrer", json!(["null", "string"]));
        assert_eq!(RenderProfile::rust().field_type(&referrer).unwrap(), "Option<String>");
        assert_eq!(RenderProfile::python().field_type(&referrer).unwrap(), "Optional[str]");
        assert_eq!(
            RenderProfile::typescript().field_type(&referrer).unwrap(),
            "string | null"
        );
    }

    #[test]
    fn test_unsupported_names_field() {
        let tags = field("tags", json!({"type": "array", "items": "string"}));
        for language in Language::ALL {
            let err = RenderProfile::for_language(language).field_type(&tags).unwrap_err();
            assert!(matches!(
                err,
                ForgeError::UnsupportedFieldType { ref field, .. } if field == "tags"
            ));
        }
    }

    #[test]
    fn test_keyword_escape() {
        let rust = RenderProfile::rust();
        assert_eq!(rust.escape_keyword("type"), "r#type");
        assert_eq!(rust.escape_keyword("name"), "name");

        assert_eq!(RenderProfile::python().escape_keyword("from"), "_from");
        assert_eq!(RenderProfile::typescript().escape_keyword("class"), "class");
    }
}
