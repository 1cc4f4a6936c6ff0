//! Schema Store Gateway
//!
//! Thin access to the registry that actually holds schema bodies. The registry
//! only understands subjects and sequential ids; logical versions live in
//! [`crate::version`]. Gateways never retry: transport failures surface as
//! `RegistryUnavailable` and the caller decides.

pub mod http;
pub mod local;
pub mod memory;

pub use http::HttpSchemaStore;
pub use local::LocalSchemaStore;
pub use memory::InMemorySchemaStore;

use crate::error::Result;
use crate::schema::SchemaBody;
use crate::version::SequentialId;

/// Registry operations by subject and sequential id
pub trait SchemaStore: Send {
    /// Store a body under a subject and return the id the registry assigned
    fn register(&mut self, subject: &str, body: &SchemaBody) -> Result<SequentialId>;

    /// Fetch the body registered under `id`
    fn fetch(&self, subject: &str, id: SequentialId) -> Result<SchemaBody>;

    /// Ids registered under a subject, ascending
    fn list(&self, subject: &str) -> Result<Vec<SequentialId>>;

    /// All subjects known to the registry, sorted
    fn subjects(&self) -> Result<Vec<String>>;

    /// Short description for logs
    fn describe(&self) -> String;
}
