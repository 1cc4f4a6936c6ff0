//! Consumer handle
//!
//! `Unconnected → Subscribed → Closed`. `subscribe` starts a receive loop that
//! decodes each record against the bound schema and hands it to the handler.
//! Undecodable records are reported on the error channel and committed so the
//! loop keeps going.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::SharedBroker;
use super::codec::BoundSchema;
use crate::error::{ForgeError, Result};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Receiving end of a consumer's per-message error channel
pub type ErrorReceiver = mpsc::UnboundedReceiver<ForgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Unconnected,
    Subscribed,
    Closed,
}

impl ConsumerState {
    fn name(self) -> &'static str {
        match self {
            ConsumerState::Unconnected => "unconnected",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Closed => "closed",
        }
    }
}

/// Typed consumer bound to one registered schema and one consumer group
pub struct Consumer<E> {
    schema: Arc<BoundSchema>,
    broker: SharedBroker,
    topic: String,
    group: String,
    state: ConsumerState,
    runtime: Option<Runtime>,
    receive_loop: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    member_id: Option<u64>,
    errors_tx: Option<mpsc::UnboundedSender<ForgeError>>,
    errors_rx: Option<ErrorReceiver>,
    _event: PhantomData<fn() -> E>,
}

impl<E: DeserializeOwned + Send + 'static> Consumer<E> {
    /// Build a handle for `group`, reading the topic named after the subject
    pub fn create(broker: SharedBroker, schema: BoundSchema, group: &str) -> Result<Self> {
        broker.ping()?;
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Ok(Self {
            topic: schema.subject().to_string(),
            schema: Arc::new(schema),
            broker,
            group: group.to_string(),
            state: ConsumerState::Unconnected,
            runtime: None,
            receive_loop: None,
            shutdown: None,
            member_id: None,
            errors_tx: Some(errors_tx),
            errors_rx: Some(errors_rx),
            _event: PhantomData,
        })
    }

    /// Read from a topic other than the subject name
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Per-message failures; can be taken once
    pub fn take_errors(&mut self) -> Option<ErrorReceiver> {
        self.errors_rx.take()
    }

    /// Join the group and start invoking `handler` once per decoded event
    pub fn subscribe<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(E) + Send + 'static,
    {
        if self.state != ConsumerState::Unconnected {
            return Err(ForgeError::InvalidState {
                operation: "subscribe",
                state: self.state.name(),
            });
        }

        let mut subscription = self.broker.subscribe(&self.topic, &self.group)?;
        let member_id = subscription.member_id;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("schemaforge-consumer")
            .enable_time()
            .build()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let errors = self.errors_tx.take();
        let schema = Arc::clone(&self.schema);
        let broker = Arc::clone(&self.broker);
        let topic = self.topic.clone();
        let group = self.group.clone();

        let receive_loop = runtime.spawn(async move {
            loop {
                let record = tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    record = subscription.records.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };

                match schema.decode::<E>(&record.payload) {
                    Ok(event) => tokio::task::block_in_place(|| handler(event)),
                    Err(e) => {
                        warn!(topic = %topic, offset = record.offset, error = %e, "Skipping undecodable record");
                        if let Some(errors) = &errors {
                            let _ = errors.send(e);
                        }
                    }
                }

                if let Err(e) = broker.commit(&topic, &group, record.offset) {
                    warn!(topic = %topic, offset = record.offset, error = %e, "Commit failed");
                    if let Some(errors) = &errors {
                        let _ = errors.send(e);
                    }
                }
            }
            debug!(topic = %topic, group = %group, "Receive loop stopped");
        });

        self.member_id = Some(member_id);
        self.runtime = Some(runtime);
        self.receive_loop = Some(receive_loop);
        self.shutdown = Some(shutdown_tx);
        self.state = ConsumerState::Subscribed;
        info!(
            subject = self.schema.subject(),
            schema_id = %self.schema.sequential_id(),
            topic = %self.topic,
            group = %self.group,
            "Consumer subscribed"
        );
        Ok(())
    }

    /// Stop the loop after the in-flight message and leave the group; safe to call twice
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            ConsumerState::Closed => return Ok(()),
            ConsumerState::Unconnected => {
                self.state = ConsumerState::Closed;
                return Ok(());
            }
            ConsumerState::Subscribed => {}
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let (Some(runtime), Some(receive_loop)) = (self.runtime.take(), self.receive_loop.take()) {
            if let Err(e) = runtime.block_on(receive_loop) {
                warn!(topic = %self.topic, error = %e, "Receive loop ended abnormally");
            }
            runtime.shutdown_timeout(CLOSE_GRACE);
        }
        if let Some(member_id) = self.member_id.take() {
            self.broker.unsubscribe(&self.topic, &self.group, member_id)?;
        }

        self.state = ConsumerState::Closed;
        info!(topic = %self.topic, group = %self.group, "Consumer closed");
        Ok(())
    }
}

impl<E> Drop for Consumer<E> {
    fn drop(&mut self) {
        if self.state != ConsumerState::Subscribed {
            return;
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let receive_loop = self.receive_loop.take();
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                if let Some(receive_loop) = receive_loop {
                    let _ = runtime.block_on(receive_loop);
                }
                runtime.shutdown_timeout(CLOSE_GRACE);
            }
        }
        if let Some(member_id) = self.member_id.take() {
            let _ = self.broker.unsubscribe(&self.topic, &self.group, member_id);
        }
        self.state = ConsumerState::Closed;
    }
}
