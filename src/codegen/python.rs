//! Python Code Emitter
//!
//! Generates a package that binds to the bundled `_runtime.py` shim
//! (`kafka-python` + `fastavro`). Attributes are snake_case; records on the
//! wire keep the registered field names.

use std::collections::BTreeMap;

use super::names::to_snake_case;
use super::{push_doc, EmitInput, RenderProfile, TypeNames};
use crate::version::SchemaVersion;

/// Python attribute name for a wire field name
pub fn field_ident(wire_name: &str, profile: &RenderProfile) -> String {
    profile.escape_keyword(&to_snake_case(wire_name))
}

pub fn emit(input: &EmitInput<'_>) -> BTreeMap<String, String> {
    let package = &input.names.package;
    let mut files = BTreeMap::new();
    files.insert(format!("{}/__init__.py", package), emit_init(input));
    files.insert(format!("{}/_schema.py", package), emit_schema_module(input));
    files.insert(format!("{}/event.py", package), emit_data_type(input));
    files.insert(format!("{}/producer.py", package), emit_producer(input));
    files.insert(format!("{}/consumer.py", package), emit_consumer(input));
    files
}

pub fn manifest(version: &SchemaVersion, names: &TypeNames) -> (String, String) {
    let mut out = String::new();
    out.push_str("[build-system]\n");
    out.push_str("requires = [\"setuptools>=61\"]\n");
    out.push_str("build-backend = \"setuptools.build_meta\"\n\n");
    out.push_str("[project]\n");
    out.push_str(&format!("name = \"{}\"\n", names.package));
    out.push_str(&format!(
        "version = \"{}\"\n",
        version.logical_version.package_version()
    ));
    out.push_str(&format!(
        "description = \"Producer and consumer for {} (schema id {})\"\n",
        version.subject, version.sequential_id
    ));
    out.push_str("requires-python = \">=3.10\"\n");
    out.push_str("dependencies = [\"kafka-python>=2.0\", \"fastavro>=1.9\"]\n\n");
    out.push_str("[tool.setuptools]\n");
    out.push_str(&format!("packages = [\"{}\"]\n", names.package));
    ("pyproject.toml".to_string(), out)
}

// =============================================================================
// Units
// =============================================================================

fn emit_init(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let mut out = String::new();
    out.push_str(&format!("\"\"\"{}\"\"\"\n\n", input.banner()));
    out.push_str("from ._schema import SCHEMA_ID, SCHEMA_VERSION, SUBJECT\n");
    out.push_str(&format!("from .consumer import {}\n", names.consumer));
    out.push_str(&format!("from .event import {}\n", names.data_type));
    out.push_str(&format!("from .producer import {}\n\n", names.producer));
    out.push_str("__all__ = [\n");
    for name in [
        "SCHEMA_ID",
        "SCHEMA_VERSION",
        "SUBJECT",
        names.consumer.as_str(),
        names.data_type.as_str(),
        names.producer.as_str(),
    ] {
        out.push_str(&format!("    \"{}\",\n", name));
    }
    out.push_str("]\n");
    out
}

/// Binding constants shared by producer and consumer
fn emit_schema_module(input: &EmitInput<'_>) -> String {
    let version = input.version;
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", input.banner()));
    out.push_str("from ._runtime import SchemaBinding\n\n");
    out.push_str(&format!("SUBJECT = {}\n", string_literal(&version.subject)));
    out.push_str(&format!("SCHEMA_ID = {}\n", version.sequential_id));
    out.push_str(&format!("SCHEMA_VERSION = {}\n", version.logical_version));
    out.push_str(&format!(
        "SCHEMA_JSON = {}\n\n",
        string_literal(&input.schema_json())
    ));
    out.push_str(&format!(
        "BROKER_ADDRESS = {}\n",
        string_literal(&input.runtime.broker_address)
    ));
    out.push_str(&format!(
        "SEND_TIMEOUT = {:.3}\n\n",
        input.runtime.send_timeout_ms as f64 / 1000.0
    ));
    out.push_str("BINDING = SchemaBinding(\n");
    out.push_str("    SUBJECT, SCHEMA_ID, SCHEMA_JSON, broker=BROKER_ADDRESS, send_timeout=SEND_TIMEOUT\n");
    out.push_str(")\n");
    out
}

fn emit_data_type(input: &EmitInput<'_>) -> String {
    let event = &input.names.data_type;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", input.banner()));
    out.push_str("from __future__ import annotations\n\n");
    out.push_str("from dataclasses import dataclass\n");
    out.push_str("from typing import Any, Optional\n\n\n");

    out.push_str("@dataclass(frozen=True, kw_only=True)\n");
    out.push_str(&format!("class {}:\n", event));
    let doc = input.version.body.doc().unwrap_or(event.as_str());
    // A plain string literal is a docstring too, and JSON escaping keeps it one
    out.push_str(&format!("    {}\n\n", string_literal(doc)));

    for field in &input.fields {
        push_doc(&mut out, "    ", "#", field.doc.as_deref());
        match &field.default {
            Some(default) => out.push_str(&format!(
                "    {}: {} = {}\n",
                field.ident,
                field.type_name,
                python_literal(default, &field.type_name)
            )),
            None => out.push_str(&format!("    {}: {}\n", field.ident, field.type_name)),
        }
    }

    out.push_str("\n    def to_record(self) -> dict[str, Any]:\n");
    out.push_str("        return {\n");
    for field in &input.fields {
        out.push_str(&format!(
            "            {}: self.{},\n",
            string_literal(&field.wire_name),
            field.ident
        ));
    }
    out.push_str("        }\n\n");

    out.push_str("    @classmethod\n");
    out.push_str(&format!(
        "    def from_record(cls, record: dict[str, Any]) -> {}:\n",
        event
    ));
    out.push_str("        return cls(\n");
    for field in &input.fields {
        out.push_str(&format!(
            "            {}=record[{}],\n",
            field.ident,
            string_literal(&field.wire_name)
        ));
    }
    out.push_str("        )\n");
    out
}

fn emit_producer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", input.banner()));
    out.push_str("from __future__ import annotations\n\n");
    out.push_str("from concurrent.futures import Future\n");
    out.push_str("from typing import Optional\n\n");
    out.push_str("from ._runtime import Producer\n");
    out.push_str("from ._schema import BINDING\n");
    out.push_str(&format!("from .event import {}\n\n\n", event));

    out.push_str(&format!("class {}:\n", names.producer));
    out.push_str(&format!("    \"\"\"Publishes {} records.\"\"\"\n\n", event));
    out.push_str("    def __init__(self, producer: Producer) -> None:\n");
    out.push_str("        self._producer = producer\n\n");
    out.push_str("    @classmethod\n");
    out.push_str("    def create(\n");
    out.push_str("        cls,\n");
    out.push_str("        bootstrap_servers: Optional[str] = None,\n");
    out.push_str("        topic: Optional[str] = None,\n");
    out.push_str(&format!("    ) -> {}:\n", names.producer));
    out.push_str("        return cls(Producer.create(BINDING, bootstrap_servers=bootstrap_servers, topic=topic))\n\n");
    out.push_str(&format!("    def send(self, event: {}) -> Future:\n", event));
    out.push_str("        \"\"\"Queue without blocking; the future resolves to the record offset.\"\"\"\n");
    out.push_str("        return self._producer.send(event.to_record())\n\n");
    out.push_str(&format!(
        "    def send_sync(self, event: {}, timeout: Optional[float] = None) -> int:\n",
        event
    ));
    out.push_str("        \"\"\"Block until the broker acknowledges.\"\"\"\n");
    out.push_str("        return self._producer.send_sync(event.to_record(), timeout)\n\n");
    out.push_str("    def close(self) -> None:\n");
    out.push_str("        self._producer.close()\n\n");
    out.push_str(&format!("    def __enter__(self) -> {}:\n", names.producer));
    out.push_str("        return self\n\n");
    out.push_str("    def __exit__(self, *exc: object) -> None:\n");
    out.push_str("        self.close()\n");
    out
}

fn emit_consumer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", input.banner()));
    out.push_str("from __future__ import annotations\n\n");
    out.push_str("import queue\n");
    out.push_str("from typing import Callable, Optional\n\n");
    out.push_str("from ._runtime import Consumer\n");
    out.push_str("from ._schema import BINDING\n");
    out.push_str(&format!("from .event import {}\n\n\n", event));

    out.push_str(&format!("class {}:\n", names.consumer));
    out.push_str(&format!(
        "    \"\"\"Receives {} records for one consumer group.\"\"\"\n\n",
        event
    ));
    out.push_str("    def __init__(self, consumer: Consumer) -> None:\n");
    out.push_str("        self._consumer = consumer\n\n");
    out.push_str("    @classmethod\n");
    out.push_str("    def create(\n");
    out.push_str("        cls,\n");
    out.push_str("        consumer_group: str,\n");
    out.push_str("        bootstrap_servers: Optional[str] = None,\n");
    out.push_str("        topic: Optional[str] = None,\n");
    out.push_str(&format!("    ) -> {}:\n", names.consumer));
    out.push_str("        return cls(\n");
    out.push_str("            Consumer.create(BINDING, consumer_group, bootstrap_servers=bootstrap_servers, topic=topic)\n");
    out.push_str("        )\n\n");
    out.push_str(&format!(
        "    def subscribe(self, handler: Callable[[{}], None]) -> None:\n",
        event
    ));
    out.push_str("        \"\"\"Invoke handler once per received event, on the receive thread.\"\"\"\n");
    out.push_str(&format!(
        "        self._consumer.subscribe(lambda record: handler({}.from_record(record)))\n\n",
        event
    ));
    out.push_str("    @property\n");
    out.push_str("    def errors(self) -> queue.Queue:\n");
    out.push_str("        \"\"\"Records that could not be decoded.\"\"\"\n");
    out.push_str("        return self._consumer.errors\n\n");
    out.push_str("    def close(self) -> None:\n");
    out.push_str("        self._consumer.close()\n\n");
    out.push_str(&format!("    def __enter__(self) -> {}:\n", names.consumer));
    out.push_str("        return self\n\n");
    out.push_str("    def __exit__(self, *exc: object) -> None:\n");
    out.push_str("        self.close()\n");
    out
}

// =============================================================================
// Helper Utilities
// =============================================================================

/// JSON string escapes are valid Python string escapes
fn string_literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn python_literal(value: &serde_json::Value, type_name: &str) -> String {
    match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        // Avro encodes bytes defaults as a string of code points 0-255
        serde_json::Value::String(s) if type_name.contains("bytes") => {
            format!("{}.encode(\"latin-1\")", string_literal(s))
        }
        serde_json::Value::String(s) => string_literal(s),
        other => string_literal(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::test_support::user_signup;
    use crate::codegen::{generate, Language};

    #[test]
    fn test_package_layout() {
        let code = generate(&user_signup(), Language::Python).unwrap();
        let paths: Vec<_> = code.files.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                "UserSignupEvent_lib/__init__.py",
                "UserSignupEvent_lib/_schema.py",
                "UserSignupEvent_lib/consumer.py",
                "UserSignupEvent_lib/event.py",
                "UserSignupEvent_lib/producer.py",
            ]
        );
    }

    #[test]
    fn test_dataclass() {
        let code = generate(&user_signup(), Language::Python).unwrap();
        let event = &code.files["UserSignupEvent_lib/event.py"];
        assert!(event.contains("@dataclass(frozen=True, kw_only=True)\nclass UserSignupEvent:"));
        assert!(event.contains("    user_id: str\n"));
        assert!(event.contains("    signup_timestamp: int\n"));
        assert!(event.contains("    # Who sent them\n    referrer: Optional[str] = None\n"));
        assert!(event.contains("            \"userId\": self.user_id,\n"));
        assert!(event.contains("            user_id=record[\"userId\"],\n"));
    }

    #[test]
    fn test_wrappers() {
        let code = generate(&user_signup(), Language::Python).unwrap();
        let producer = &code.files["UserSignupEvent_lib/producer.py"];
        assert!(producer.contains("class UserSignupEventProducer:"));
        assert!(producer.contains("    def send_sync(self, event: UserSignupEvent, timeout: Optional[float] = None) -> int:"));
        let consumer = &code.files["UserSignupEvent_lib/consumer.py"];
        assert!(consumer.contains("        consumer_group: str,\n"));
        assert!(consumer.contains("    def subscribe(self, handler: Callable[[UserSignupEvent], None]) -> None:"));

        let schema = &code.files["UserSignupEvent_lib/_schema.py"];
        assert!(schema.contains("SCHEMA_ID = 4\n"));
        assert!(schema.contains("SCHEMA_VERSION = 2\n"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(python_literal(&serde_json::json!(null), "Optional[str]"), "None");
        assert_eq!(python_literal(&serde_json::json!(true), "bool"), "True");
        assert_eq!(python_literal(&serde_json::json!("a\"b"), "str"), "\"a\\\"b\"");
        assert_eq!(
            python_literal(&serde_json::json!("\u{00ff}"), "bytes"),
            "\"\u{00ff}\".encode(\"latin-1\")"
        );
    }

    #[test]
    fn test_schema_module_carries_broker_defaults() {
        let runtime = crate::codegen::RuntimeDefaults {
            broker_address: "kafka:29092".to_string(),
            send_timeout_ms: 1_500,
        };
        let code = crate::codegen::generate_with(&user_signup(), Language::Python, &runtime).unwrap();
        let schema = &code.files["UserSignupEvent_lib/_schema.py"];
        assert!(schema.contains("BROKER_ADDRESS = \"kafka:29092\"\n"));
        assert!(schema.contains("SEND_TIMEOUT = 1.500\n"));
        assert!(schema.contains("broker=BROKER_ADDRESS, send_timeout=SEND_TIMEOUT"));
    }

    #[test]
    fn test_record_doc_with_quotes_and_backslashes() {
        let mut version = user_signup();
        version.body = crate::schema::SchemaBody::from_value(serde_json::json!({
            "type": "record",
            "name": "Greeting",
            "doc": "Says \"hi\" from C:\\temp\"",
            "fields": [
                { "name": "text", "type": "string", "doc": "line one\rline two" }
            ]
        }))
        .unwrap();
        let code = generate(&version, Language::Python).unwrap();
        let event = &code.files["UserSignupEvent_lib/event.py"];
        assert!(event.contains("    \"Says \\\"hi\\\" from C:\\\\temp\\\"\"\n"));
        assert!(event.contains("    # line one\n    # line two\n"));
    }
}
