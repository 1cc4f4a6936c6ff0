//! Rust Code Emitter
//!
//! Generates a small crate that binds to `schemaforge::runtime`.
//!
//! Key constraints:
//! - This module ONLY receives `EmitInput` - field types are already resolved
//! - Identifiers are snake_case; the wire name is kept with `#[serde(rename)]`

use std::collections::BTreeMap;

use super::names::to_snake_case;
use super::{push_doc, EmitInput, RenderProfile, TypeNames};
use crate::version::SchemaVersion;

/// Identifiers that cannot be raw identifiers
const RESERVED_PATH_SEGMENTS: &[&str] = &["self", "Self", "super", "crate"];

const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Public API
// =============================================================================

/// Rust identifier for a wire field name
pub fn field_ident(wire_name: &str, profile: &RenderProfile) -> String {
    let snake = to_snake_case(wire_name);
    if RESERVED_PATH_SEGMENTS.contains(&snake.as_str()) {
        format!("{}_", snake)
    } else {
        profile.escape_keyword(&snake)
    }
}

pub fn emit(input: &EmitInput<'_>) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    files.insert("src/lib.rs".to_string(), emit_lib(input));
    files.insert("src/event.rs".to_string(), emit_data_type(input));
    files.insert("src/producer.rs".to_string(), emit_producer(input));
    files.insert("src/consumer.rs".to_string(), emit_consumer(input));
    files
}

pub fn manifest(version: &SchemaVersion, names: &TypeNames) -> (String, String) {
    let mut out = String::new();
    out.push_str("[package]\n");
    out.push_str(&format!("name = \"{}\"\n", names.package_id('_')));
    out.push_str(&format!(
        "version = \"{}\"\n",
        version.logical_version.package_version()
    ));
    out.push_str("edition = \"2021\"\n");
    out.push_str(&format!(
        "description = \"Producer and consumer for {} (schema id {})\"\n",
        version.subject, version.sequential_id
    ));
    out.push_str("\n[dependencies]\n");
    out.push_str(&format!("schemaforge = \"{}\"\n", RUNTIME_VERSION));
    out.push_str("serde = { version = \"1.0\", features = [\"derive\"] }\n");
    out.push_str("serde_bytes = \"0.11\"\n");
    ("Cargo.toml".to_string(), out)
}

// =============================================================================
// Units
// =============================================================================

fn emit_lib(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let version = input.version;
    let mut out = String::new();

    out.push_str(&format!("//! {}\n\n", input.banner()));
    out.push_str("mod consumer;\nmod event;\nmod producer;\n\n");
    out.push_str(&format!("pub use consumer::{};\n", names.consumer));
    out.push_str(&format!("pub use event::{};\n", names.data_type));
    out.push_str(&format!("pub use producer::{};\n\n", names.producer));

    out.push_str(&format!(
        "pub const SUBJECT: &str = \"{}\";\n",
        version.subject
    ));
    out.push_str(&format!(
        "pub const SCHEMA_ID: u32 = {};\n",
        version.sequential_id
    ));
    out.push_str(&format!(
        "pub const SCHEMA_VERSION: u32 = {};\n",
        version.logical_version
    ));
    out.push_str(&format!(
        "pub const SCHEMA_JSON: &str = {};\n\n",
        raw_string_literal(&input.schema_json())
    ));

    out.push_str(&format!(
        "pub const SEND_TIMEOUT_MS: u64 = {};\n\n",
        input.runtime.send_timeout_ms
    ));

    out.push_str("/// The registered schema this crate was generated from\n");
    out.push_str("pub fn bound_schema() -> schemaforge::Result<schemaforge::runtime::BoundSchema> {\n");
    out.push_str("    schemaforge::runtime::BoundSchema::parse(SUBJECT, SCHEMA_ID, SCHEMA_JSON)\n");
    out.push_str("}\n\n");
    out.push_str("/// Producer options with the timeout this crate was generated with\n");
    out.push_str("pub fn producer_options() -> schemaforge::runtime::ProducerOptions {\n");
    out.push_str("    schemaforge::runtime::ProducerOptions {\n");
    out.push_str("        topic: None,\n");
    out.push_str("        send_timeout: std::time::Duration::from_millis(SEND_TIMEOUT_MS),\n");
    out.push_str("    }\n");
    out.push_str("}\n");
    out
}

fn emit_data_type(input: &EmitInput<'_>) -> String {
    let mut out = String::new();
    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("use serde::{Deserialize, Serialize};\n\n");

    match input.version.body.doc() {
        Some(doc) => push_doc(&mut out, "", "///", Some(doc)),
        None => out.push_str(&format!("/// {}\n", input.names.data_type)),
    }
    out.push_str("#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\n");
    out.push_str(&format!("pub struct {} {{\n", input.names.data_type));

    for field in &input.fields {
        push_doc(&mut out, "    ", "///", field.doc.as_deref());
        let bare = field.ident.trim_start_matches("r#");
        if bare != field.wire_name {
            out.push_str(&format!("    #[serde(rename = \"{}\")]\n", field.wire_name));
        }
        out.push_str(&format!("    pub {}: {},\n", field.ident, field.type_name));
    }

    out.push_str("}\n");
    out
}

fn emit_producer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("use schemaforge::runtime::{DeliveryHandle, Producer, ProducerOptions, SharedBroker};\n");
    out.push_str("use schemaforge::Result;\n\n");
    out.push_str(&format!("use crate::{};\n\n", event));

    out.push_str(&format!("/// Publishes `{}` records\n", event));
    out.push_str(&format!("pub struct {} {{\n", names.producer));
    out.push_str(&format!("    inner: Producer<{}>,\n", event));
    out.push_str("}\n\n");

    out.push_str(&format!("impl {} {{\n", names.producer));
    out.push_str("    pub fn create(broker: SharedBroker) -> Result<Self> {\n");
    out.push_str("        Self::create_with(broker, crate::producer_options())\n");
    out.push_str("    }\n\n");
    out.push_str("    pub fn create_with(broker: SharedBroker, options: ProducerOptions) -> Result<Self> {\n");
    out.push_str("        let inner = Producer::create(broker, crate::bound_schema()?, options)?;\n");
    out.push_str("        Ok(Self { inner })\n");
    out.push_str("    }\n\n");
    out.push_str("    /// Queue without blocking; the handle completes on acknowledgement\n");
    out.push_str(&format!(
        "    pub fn send(&self, event: &{}) -> Result<DeliveryHandle> {{\n",
        event
    ));
    out.push_str("        self.inner.send(event)\n");
    out.push_str("    }\n\n");
    out.push_str("    /// Block until the broker acknowledges\n");
    out.push_str(&format!(
        "    pub fn send_sync(&self, event: &{}) -> Result<u64> {{\n",
        event
    ));
    out.push_str("        self.inner.send_sync(event)\n");
    out.push_str("    }\n\n");
    out.push_str("    pub fn close(&mut self) -> Result<()> {\n");
    out.push_str("        self.inner.close()\n");
    out.push_str("    }\n");
    out.push_str("}\n");
    out
}

fn emit_consumer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("use schemaforge::runtime::{Consumer, ErrorReceiver, SharedBroker};\n");
    out.push_str("use schemaforge::Result;\n\n");
    out.push_str(&format!("use crate::{};\n\n", event));

    out.push_str(&format!("/// Receives `{}` records for one consumer group\n", event));
    out.push_str(&format!("pub struct {} {{\n", names.consumer));
    out.push_str(&format!("    inner: Consumer<{}>,\n", event));
    out.push_str("}\n\n");

    out.push_str(&format!("impl {} {{\n", names.consumer));
    out.push_str("    pub fn create(broker: SharedBroker, consumer_group: &str) -> Result<Self> {\n");
    out.push_str("        let inner = Consumer::create(broker, crate::bound_schema()?, consumer_group)?;\n");
    out.push_str("        Ok(Self { inner })\n");
    out.push_str("    }\n\n");
    out.push_str("    /// Invoke `handler` once per received event\n");
    out.push_str("    pub fn subscribe<F>(&mut self, handler: F) -> Result<()>\n");
    out.push_str("    where\n");
    out.push_str(&format!("        F: FnMut({}) + Send + 'static,\n", event));
    out.push_str("    {\n");
    out.push_str("        self.inner.subscribe(handler)\n");
    out.push_str("    }\n\n");
    out.push_str("    /// Records that could not be decoded\n");
    out.push_str("    pub fn take_errors(&mut self) -> Option<ErrorReceiver> {\n");
    out.push_str("        self.inner.take_errors()\n");
    out.push_str("    }\n\n");
    out.push_str("    pub fn close(&mut self) -> Result<()> {\n");
    out.push_str("        self.inner.close()\n");
    out.push_str("    }\n");
    out.push_str("}\n");
    out
}

// =============================================================================
// Helper Utilities
// =============================================================================

/// `r#"..."#` with enough hashes for `s`
fn raw_string_literal(s: &str) -> String {
    let mut hashes = 1;
    while s.contains(&format!("\"{}", "#".repeat(hashes))) {
        hashes += 1;
    }
    let fence = "#".repeat(hashes);
    format!("r{}\"{}\"{}", fence, s, fence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::test_support::user_signup;
    use crate::codegen::{generate, Language};

    #[test]
    fn test_field_ident() {
        let profile = RenderProfile::rust();
        assert_eq!(field_ident("userId", &profile), "user_id");
        assert_eq!(field_ident("type", &profile), "r#type");
        assert_eq!(field_ident("self", &profile), "self_");
    }

    #[test]
    fn test_raw_string_literal() {
        assert_eq!(raw_string_literal("{}"), "r#\"{}\"#");
        assert_eq!(raw_string_literal("a\"#b"), "r##\"a\"#b\"##");
    }

    #[test]
    fn test_data_type() {
        let code = generate(&user_signup(), Language::Rust).unwrap();
        let event = &code.files["src/event.rs"];
        assert!(event.contains("pub struct UserSignupEvent {"));
        assert!(event.contains("    #[serde(rename = \"userId\")]\n    pub user_id: String,"));
        assert!(event.contains("    pub signup_timestamp: i64,"));
        assert!(event.contains("    pub source: String,"));
        assert!(event.contains("    /// Who sent them\n    pub referrer: Option<String>,"));
    }

    #[test]
    fn test_wrappers_and_constants() {
        let code = generate(&user_signup(), Language::Rust).unwrap();
        let lib = &code.files["src/lib.rs"];
        assert!(lib.contains("pub const SCHEMA_ID: u32 = 4;"));
        assert!(lib.contains("pub const SCHEMA_VERSION: u32 = 2;"));
        assert!(lib.contains("pub use producer::UserSignupEventProducer;"));
        assert!(lib.contains("pub const SEND_TIMEOUT_MS: u64 = 5000;"));
        assert!(lib.contains("pub fn producer_options() -> schemaforge::runtime::ProducerOptions {"));

        let producer = &code.files["src/producer.rs"];
        assert!(producer.contains("pub fn send_sync(&self, event: &UserSignupEvent) -> Result<u64>"));
        assert!(producer.contains("Self::create_with(broker, crate::producer_options())"));
        let consumer = &code.files["src/consumer.rs"];
        assert!(consumer.contains("pub fn create(broker: SharedBroker, consumer_group: &str)"));
        assert!(consumer.contains("F: FnMut(UserSignupEvent) + Send + 'static,"));
    }

    #[test]
    fn test_manifest() {
        let (path, contents) = manifest(&user_signup(), &TypeNames::for_subject("UserSignupEvent"));
        assert_eq!(path, "Cargo.toml");
        assert!(contents.contains("name = \"user_signup_event_lib\""));
        assert!(contents.contains("version = \"2.0.0\""));
    }
}
