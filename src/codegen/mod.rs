//! Code Generation
//!
//! Pure, deterministic rendering of a registered schema version into source
//! for one target language.
//!
//! Architecture:
//! - `names`: subject -> `{Subject}Event`, `{Subject}EventProducer`, ...
//! - `config`: per-language `RenderProfile` (type table, keyword escaping)
//! - Emitters (`rust`, `python`, `typescript`): consume `EmitInput` only
//!
//! The key constraint: emitters never see an unresolved field. Every field
//! type is mapped through the profile before any text is produced, so an
//! unmapped type fails the whole generation instead of being dropped.

pub mod config;
pub mod names;
pub mod python;
pub mod rust;
pub mod typescript;

use std::collections::BTreeMap;

use crate::checksum::Checksum;
use crate::error::{ForgeError, Result};
use crate::version::SchemaVersion;

pub use config::{Language, RenderProfile};
pub use names::TypeNames;

// =============================================================================
// Emitter Input
// =============================================================================

/// A schema field with its target-language spelling resolved
#[derive(Debug, Clone)]
pub struct RenderedField {
    /// Name on the wire, exactly as registered
    pub wire_name: String,
    /// Identifier in generated code
    pub ident: String,
    /// Target-language type
    pub type_name: String,
    pub doc: Option<String>,
    pub default: Option<serde_json::Value>,
}

/// Broker settings generated packages fall back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDefaults {
    /// `host:port[,host:port...]`; the environment can still override it
    pub broker_address: String,
    pub send_timeout_ms: u64,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            broker_address: "localhost:9092".to_string(),
            send_timeout_ms: 5_000,
        }
    }
}

/// Everything an emitter may read
#[derive(Debug)]
pub struct EmitInput<'a> {
    pub version: &'a SchemaVersion,
    pub names: &'a TypeNames,
    pub profile: &'a RenderProfile,
    pub runtime: &'a RuntimeDefaults,
    pub fields: Vec<RenderedField>,
}

impl EmitInput<'_> {
    /// First line of every generated source file
    pub fn banner(&self) -> String {
        format!(
            "Generated by schemaforge from {} version {} (schema id {}). Do not edit.",
            self.version.subject, self.version.logical_version, self.version.sequential_id
        )
    }

    /// Compact schema JSON embedded in generated code
    pub fn schema_json(&self) -> String {
        self.version.body.canonical_json()
    }
}

// =============================================================================
// Generated Output
// =============================================================================

/// Output of one generation: the data type, producer and consumer units,
/// keyed by path relative to the package root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub language: Language,
    pub names: TypeNames,
    pub files: BTreeMap<String, String>,
}

impl GeneratedCode {
    pub fn checksum(&self) -> Checksum {
        Checksum::from_entries(
            self.files
                .iter()
                .map(|(path, contents)| (path.as_str(), contents.as_bytes())),
        )
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Render source for `version` in `language` with the stock runtime defaults
pub fn generate(version: &SchemaVersion, language: Language) -> Result<GeneratedCode> {
    generate_with(version, language, &RuntimeDefaults::default())
}

/// Render source for `version` in `language`
pub fn generate_with(
    version: &SchemaVersion,
    language: Language,
    runtime: &RuntimeDefaults,
) -> Result<GeneratedCode> {
    let profile = RenderProfile::for_language(language);
    let names = TypeNames::for_subject(&version.subject);
    let input = EmitInput {
        version,
        names: &names,
        profile: &profile,
        runtime,
        fields: resolve_fields(version, &profile)?,
    };

    let files = match language {
        Language::Rust => rust::emit(&input),
        Language::Python => python::emit(&input),
        Language::TypeScript => typescript::emit(&input),
    };

    Ok(GeneratedCode {
        language,
        names,
        files,
    })
}

/// Package manifest (`Cargo.toml`, `pyproject.toml`, `package.json`) for `version`
pub fn manifest(version: &SchemaVersion, language: Language) -> (String, String) {
    let names = TypeNames::for_subject(&version.subject);
    match language {
        Language::Rust => rust::manifest(version, &names),
        Language::Python => python::manifest(version, &names),
        Language::TypeScript => typescript::manifest(version, &names),
    }
}

fn resolve_fields(version: &SchemaVersion, profile: &RenderProfile) -> Result<Vec<RenderedField>> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    let mut fields = Vec::with_capacity(version.body.fields().len());

    for field in version.body.fields() {
        let type_name = profile.field_type(field)?;
        let ident = match profile.language {
            Language::Rust => rust::field_ident(&field.name, profile),
            Language::Python => python::field_ident(&field.name, profile),
            Language::TypeScript => profile.escape_keyword(&field.name),
        };

        if let Some(previous) = seen.insert(ident.clone(), &field.name) {
            return Err(ForgeError::InvalidSchema(vec![format!(
                "fields '{}' and '{}' both render as '{}' in {}",
                previous, field.name, ident, profile.language
            )]));
        }

        fields.push(RenderedField {
            wire_name: field.name.clone(),
            ident,
            type_name,
            doc: field.doc.clone(),
            default: field.default.clone(),
        });
    }
    Ok(fields)
}

/// Append `doc` as line comments with `prefix`, one per source line
pub(crate) fn push_doc(out: &mut String, indent: &str, prefix: &str, doc: Option<&str>) {
    if let Some(doc) = doc {
        // A bare CR ends a comment line in every target language
        let doc = doc.replace("\r\n", "\n").replace('\r', "\n");
        for line in doc.lines() {
            out.push_str(&format!("{}{} {}\n", indent, prefix, line).replace(" \n", "\n"));
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::compatibility::CompatibilityMode;
    use crate::schema::SchemaBody;
    use crate::version::{LogicalVersion, SchemaVersion, SequentialId};

    pub fn user_signup() -> SchemaVersion {
        SchemaVersion {
            subject: "UserSignupEvent".to_string(),
            sequential_id: SequentialId(4),
            logical_version: LogicalVersion::new(2).unwrap(),
            body: SchemaBody::from_value(json!({
                "type": "record",
                "name": "UserSignupEvent",
                "namespace": "com.example.events",
                "doc": "A user finished signing up",
                "fields": [
                    { "name": "userId", "type": "string" },
                    { "name": "email", "type": "string" },
                    { "name": "signupTimestamp", "type": "long" },
                    { "name": "source", "type": "string" },
                    { "name": "referrer", "type": ["null", "string"], "default": null, "doc": "Who sent them" }
                ]
            }))
            .unwrap(),
            compatibility: CompatibilityMode::Backward,
            registered_at: Utc.with_ymd_and_hms(2023, 11, 9, 21, 20, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::user_signup;
    use super::*;
    use serde_json::json;

    use crate::schema::SchemaBody;

    #[test]
    fn test_generation_is_deterministic() {
        for language in Language::ALL {
            let first = generate(&user_signup(), language).unwrap();
            let second = generate(&user_signup(), language).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.checksum(), second.checksum());
        }
    }

    #[test]
    fn test_runtime_defaults_change_the_output() {
        let runtime = RuntimeDefaults {
            broker_address: "kafka-1:9092,kafka-2:9092".to_string(),
            send_timeout_ms: 250,
        };
        for language in Language::ALL {
            let stock = generate(&user_signup(), language).unwrap();
            let configured = generate_with(&user_signup(), language, &runtime).unwrap();
            assert_ne!(stock.checksum(), configured.checksum(), "{}", language);
            assert_eq!(
                configured,
                generate_with(&user_signup(), language, &runtime).unwrap()
            );
        }
    }

    #[test]
    fn test_registration_time_does_not_leak_into_output() {
        let mut later = user_signup();
        later.registered_at = later.registered_at + chrono::Duration::days(30);
        for language in Language::ALL {
            assert_eq!(
                generate(&user_signup(), language).unwrap().checksum(),
                generate(&later, language).unwrap().checksum()
            );
        }
    }

    #[test]
    fn test_unsupported_field_fails_every_target() {
        let mut version = user_signup();
        version.body = SchemaBody::from_value(json!({
            "type": "record",
            "name": "Cart",
            "fields": [
                { "name": "id", "type": "string" },
                { "name": "items", "type": { "type": "array", "items": "string" } }
            ]
        }))
        .unwrap();

        for language in Language::ALL {
            let err = generate(&version, language).unwrap_err();
            assert!(matches!(
                err,
                ForgeError::UnsupportedFieldType { ref field, .. } if field == "items"
            ));
        }
    }

    #[test]
    fn test_identifier_collisions_are_rejected() {
        let mut version = user_signup();
        version.body = SchemaBody::from_value(json!({
            "type": "record",
            "name": "Clash",
            "fields": [
                { "name": "userId", "type": "string" },
                { "name": "user_id", "type": "string" }
            ]
        }))
        .unwrap();

        assert!(generate(&version, Language::Rust).is_err());
        assert!(generate(&version, Language::TypeScript).is_ok());
    }

    #[test]
    fn test_manifest_carries_logical_version() {
        let (path, contents) = manifest(&user_signup(), Language::Python);
        assert_eq!(path, "pyproject.toml");
        assert!(contents.contains("version = \"2.0.0\""));
    }
}
