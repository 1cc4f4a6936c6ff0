//! schemaforge
//!
//! Turns registered event schemas into installable producer/consumer client
//! libraries bound to one exact schema version.
//!
//! ## Features
//!
//! - **Append-only Registry**: Bodies are immutable once assigned a sequential id
//! - **Logical Versions**: The Nth registration under a subject is version N
//! - **Compatibility Checking**: Backward, forward, full (and transitive) modes
//! - **Deterministic Codegen**: Rust, TypeScript and Python from one field model
//! - **Runtime**: Schema-bound producers and consumers over a broker
//!
//! ## Architecture
//!
//! ```text
//! register → compatibility → store → version
//! generate → version → codegen → package
//! generated code → runtime → broker
//! ```

pub mod checksum;
pub mod codegen;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod package;
pub mod runtime;
pub mod schema;
pub mod service;
pub mod store;
pub mod version;

pub use checksum::Checksum;
pub use codegen::{GeneratedCode, Language};
pub use compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityResult};
pub use config::ForgeConfig;
pub use error::{ForgeError, Result, Violation};
pub use package::{CleanTarget, GeneratedArtifact, PackageBuilder};
pub use schema::{FieldDef, FieldType, SchemaBody};
pub use service::{SchemaService, VersionDiff};
pub use store::SchemaStore;
pub use version::{LogicalVersion, SchemaVersion, SequentialId, VersionResolver, VersionSelector};
