//! TypeScript Code Emitter
//!
//! Generates a package that binds to the bundled `runtime.ts` shim
//! (`kafkajs` + `avsc`). Property names are the registered field names, so
//! events are passed to `avsc` as-is.

use std::collections::BTreeMap;

use super::{push_doc, EmitInput, TypeNames};
use crate::version::SchemaVersion;

pub fn emit(input: &EmitInput<'_>) -> BTreeMap<String, String> {
    let names = input.names;
    let mut files = BTreeMap::new();
    files.insert("src/index.ts".to_string(), emit_index(input));
    files.insert("src/schema.ts".to_string(), emit_schema_module(input));
    files.insert(format!("src/{}.ts", names.data_type), emit_data_type(input));
    files.insert(format!("src/{}.ts", names.producer), emit_producer(input));
    files.insert(format!("src/{}.ts", names.consumer), emit_consumer(input));
    files
}

pub fn manifest(version: &SchemaVersion, names: &TypeNames) -> (String, String) {
    let manifest = serde_json::json!({
        "name": names.package_id('-'),
        "version": version.logical_version.package_version().to_string(),
        "description": format!(
            "Producer and consumer for {} (schema id {})",
            version.subject, version.sequential_id
        ),
        "main": "dist/index.js",
        "types": "dist/index.d.ts",
        "scripts": { "build": "tsc" },
        "dependencies": { "avsc": "^5.7.7", "kafkajs": "^2.2.4" },
        "devDependencies": { "@types/node": "^20.0.0", "typescript": "^5.3.0" }
    });
    // serde_json sorts keys without preserve_order, which keeps this stable
    let rendered = serde_json::to_string_pretty(&manifest).unwrap_or_default();
    ("package.json".to_string(), format!("{}\n", rendered))
}

// =============================================================================
// Units
// =============================================================================

fn emit_index(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let mut out = String::new();
    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("export { SCHEMA_ID, SCHEMA_VERSION, SUBJECT } from \"./schema\";\n");
    out.push_str(&format!(
        "export type {{ {} }} from \"./{}\";\n",
        names.data_type, names.data_type
    ));
    out.push_str(&format!(
        "export {{ {} }} from \"./{}\";\n",
        names.producer, names.producer
    ));
    out.push_str(&format!(
        "export {{ {} }} from \"./{}\";\n",
        names.consumer, names.consumer
    ));
    out
}

fn emit_schema_module(input: &EmitInput<'_>) -> String {
    let version = input.version;
    let mut out = String::new();
    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("import { SchemaBinding } from \"./runtime\";\n\n");
    out.push_str(&format!(
        "export const SUBJECT = {};\n",
        string_literal(&version.subject)
    ));
    out.push_str(&format!("export const SCHEMA_ID = {};\n", version.sequential_id));
    out.push_str(&format!(
        "export const SCHEMA_VERSION = {};\n",
        version.logical_version
    ));
    out.push_str(&format!(
        "export const SCHEMA_JSON = {};\n\n",
        string_literal(&input.schema_json())
    ));
    out.push_str(&format!(
        "export const BROKER_ADDRESS = {};\n",
        string_literal(&input.runtime.broker_address)
    ));
    out.push_str(&format!(
        "export const SEND_TIMEOUT_MS = {};\n\n",
        input.runtime.send_timeout_ms
    ));
    out.push_str("export const BINDING = new SchemaBinding(SUBJECT, SCHEMA_ID, SCHEMA_JSON, {\n");
    out.push_str("  broker: BROKER_ADDRESS,\n");
    out.push_str("  sendTimeoutMs: SEND_TIMEOUT_MS,\n");
    out.push_str("});\n");
    out
}

fn emit_data_type(input: &EmitInput<'_>) -> String {
    let mut out = String::new();
    out.push_str(&format!("// {}\n\n", input.banner()));

    if let Some(doc) = input.version.body.doc() {
        out.push_str("/**\n");
        push_doc(&mut out, "", " *", Some(&doc.replace("*/", "* /")));
        out.push_str(" */\n");
    }
    out.push_str(&format!("export interface {} {{\n", input.names.data_type));
    for field in &input.fields {
        if let Some(doc) = &field.doc {
            out.push_str(&format!("  /** {} */\n", doc.replace("*/", "* /")));
        }
        out.push_str(&format!("  {}: {};\n", field.ident, field.type_name));
    }
    out.push_str("}\n");
    out
}

fn emit_producer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("import { Producer, ProducerOptions } from \"./runtime\";\n");
    out.push_str("import { BINDING } from \"./schema\";\n");
    out.push_str(&format!("import type {{ {} }} from \"./{}\";\n\n", event, event));

    out.push_str(&format!("/** Publishes {} records. */\n", event));
    out.push_str(&format!("export class {} {{\n", names.producer));
    out.push_str(&format!(
        "  private constructor(private readonly producer: Producer<{}>) {{}}\n\n",
        event
    ));
    out.push_str(&format!(
        "  static async create(options: ProducerOptions = {{}}): Promise<{}> {{\n",
        names.producer
    ));
    out.push_str(&format!(
        "    return new {}(await Producer.create<{}>(BINDING, options));\n",
        names.producer, event
    ));
    out.push_str("  }\n\n");
    out.push_str("  /** Queue without waiting; resolves to the record offset once acknowledged. */\n");
    out.push_str(&format!("  send(event: {}): Promise<number> {{\n", event));
    out.push_str("    return this.producer.send(event);\n");
    out.push_str("  }\n\n");
    out.push_str("  /** Deliver after every earlier send and wait for the acknowledgement. */\n");
    out.push_str(&format!("  sendSync(event: {}): Promise<number> {{\n", event));
    out.push_str("    return this.producer.sendSync(event);\n");
    out.push_str("  }\n\n");
    out.push_str("  close(): Promise<void> {\n");
    out.push_str("    return this.producer.close();\n");
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

fn emit_consumer(input: &EmitInput<'_>) -> String {
    let names = input.names;
    let event = &names.data_type;
    let mut out = String::new();

    out.push_str(&format!("// {}\n\n", input.banner()));
    out.push_str("import { Consumer, ConsumerOptions } from \"./runtime\";\n");
    out.push_str("import { BINDING } from \"./schema\";\n");
    out.push_str(&format!("import type {{ {} }} from \"./{}\";\n\n", event, event));

    out.push_str(&format!(
        "/** Receives {} records for one consumer group. */\n",
        event
    ));
    out.push_str(&format!("export class {} {{\n", names.consumer));
    out.push_str(&format!(
        "  private constructor(private readonly consumer: Consumer<{}>) {{}}\n\n",
        event
    ));
    out.push_str(&format!(
        "  static async create(consumerGroup: string, options: ConsumerOptions = {{}}): Promise<{}> {{\n",
        names.consumer
    ));
    out.push_str(&format!(
        "    return new {}(await Consumer.create<{}>(BINDING, consumerGroup, options));\n",
        names.consumer, event
    ));
    out.push_str("  }\n\n");
    out.push_str("  /** Invoke handler once per received event. */\n");
    out.push_str(&format!(
        "  subscribe(handler: (event: {}) => void | Promise<void>): Promise<void> {{\n",
        event
    ));
    out.push_str("    return this.consumer.subscribe(handler);\n");
    out.push_str("  }\n\n");
    out.push_str("  /** Called for records that could not be decoded. */\n");
    out.push_str("  onError(listener: (error: Error) => void): void {\n");
    out.push_str("    this.consumer.onError(listener);\n");
    out.push_str("  }\n\n");
    out.push_str("  close(): Promise<void> {\n");
    out.push_str("    return this.consumer.close();\n");
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

/// JSON string literals are valid TypeScript string literals
fn string_literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
