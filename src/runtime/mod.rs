//! Producer/Consumer Runtime
//!
//! The generic library generated Rust packages bind against. Each handle owns
//! its own small tokio runtime, so callers stay synchronous:
//!
//! ```ignore
//! use schemaforge::runtime::{BoundSchema, InMemoryBroker, Producer, ProducerOptions};
//!
//! let broker = InMemoryBroker::shared();
//! let schema = BoundSchema::parse("UserSignupEvent", 1, SCHEMA_JSON)?;
//! let mut producer = Producer::create(broker, schema, ProducerOptions::default())?;
//! producer.send_sync(&event)?;
//! producer.close()?;
//! ```

pub mod broker;
pub mod codec;
pub mod consumer;
pub mod producer;

pub use broker::{Broker, BrokerRecord, InMemoryBroker, SharedBroker, Subscription};
pub use codec::BoundSchema;
pub use consumer::{Consumer, ConsumerState, ErrorReceiver};
pub use producer::{DeliveryHandle, Producer, ProducerOptions, ProducerState};
