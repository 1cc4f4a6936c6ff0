//! Producer handle
//!
//! `Unconnected → Ready → Closed`. Sends are queued to a single delivery task
//! owned by the handle, so async sends from one handle reach the broker in the
//! order they were issued.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::SharedBroker;
use super::codec::BoundSchema;
use crate::error::{ForgeError, Result};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Topic to publish to; defaults to the subject name
    pub topic: Option<String>,
    /// Upper bound for `send_sync` to wait for an acknowledgement
    pub send_timeout: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            topic: None,
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unconnected,
    Ready,
    Closed,
}

impl ProducerState {
    fn name(self) -> &'static str {
        match self {
            ProducerState::Unconnected => "unconnected",
            ProducerState::Ready => "ready",
            ProducerState::Closed => "closed",
        }
    }
}

struct Outgoing {
    payload: Vec<u8>,
    ack: oneshot::Sender<Result<u64>>,
}

/// Completion signal for one async send
///
/// Resolves to the offset the broker assigned. Await it, poll it with
/// [`DeliveryHandle::try_result`], or block on it with [`DeliveryHandle::wait`].
#[derive(Debug)]
pub struct DeliveryHandle {
    topic: String,
    ack: oneshot::Receiver<Result<u64>>,
}

impl DeliveryHandle {
    fn dropped(&self) -> ForgeError {
        ForgeError::DeliveryFailed {
            topic: self.topic.clone(),
            reason: "producer shut down before acknowledgement".to_string(),
        }
    }

    /// Block the current thread until the broker answers
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<u64> {
        let dropped = self.dropped();
        self.ack.blocking_recv().unwrap_or(Err(dropped))
    }

    /// `None` while the send is still in flight
    pub fn try_result(&mut self) -> Option<Result<u64>> {
        match self.ack.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.dropped())),
        }
    }
}

impl Future for DeliveryHandle {
    type Output = Result<u64>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.ack).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Typed producer bound to one registered schema
///
/// Not meant to be shared between callers without external synchronization.
/// Blocking calls (`send_sync`, `close`) must be made from synchronous code.
pub struct Producer<E> {
    schema: Arc<BoundSchema>,
    broker: SharedBroker,
    topic: String,
    send_timeout: Duration,
    state: ProducerState,
    runtime: Option<Runtime>,
    queue: Option<mpsc::UnboundedSender<Outgoing>>,
    worker: Option<JoinHandle<()>>,
    _event: PhantomData<fn(&E)>,
}

impl<E: Serialize> Producer<E> {
    /// Build an unconnected handle
    pub fn new(broker: SharedBroker, schema: BoundSchema, options: ProducerOptions) -> Self {
        let topic = options
            .topic
            .unwrap_or_else(|| schema.subject().to_string());
        Self {
            schema: Arc::new(schema),
            broker,
            topic,
            send_timeout: options.send_timeout,
            state: ProducerState::Unconnected,
            runtime: None,
            queue: None,
            worker: None,
            _event: PhantomData,
        }
    }

    /// Build and connect in one step
    pub fn create(broker: SharedBroker, schema: BoundSchema, options: ProducerOptions) -> Result<Self> {
        let mut producer = Self::new(broker, schema, options);
        producer.connect()?;
        Ok(producer)
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Reach the broker and start the delivery task
    pub fn connect(&mut self) -> Result<()> {
        self.require(ProducerState::Unconnected, "connect")?;
        self.broker.ping()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("schemaforge-producer")
            .enable_time()
            .build()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let broker = Arc::clone(&self.broker);
        let topic = self.topic.clone();
        let worker = runtime.spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let result = broker
                    .publish(&topic, outgoing.payload)
                    .map_err(|e| ForgeError::DeliveryFailed {
                        topic: topic.clone(),
                        reason: e.to_string(),
                    });
                if let Err(e) = &result {
                    warn!(topic = %topic, error = %e, "Delivery failed");
                }
                let _ = outgoing.ack.send(result);
            }
        });

        self.runtime = Some(runtime);
        self.queue = Some(tx);
        self.worker = Some(worker);
        self.state = ProducerState::Ready;
        info!(
            subject = self.schema.subject(),
            schema_id = %self.schema.sequential_id(),
            topic = %self.topic,
            "Producer ready"
        );
        Ok(())
    }

    /// Queue one event without blocking
    pub fn send(&self, event: &E) -> Result<DeliveryHandle> {
        self.require(ProducerState::Ready, "send")?;
        let payload = self.schema.encode(event)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        let queue = self.queue.as_ref().ok_or(ForgeError::InvalidState {
            operation: "send",
            state: self.state.name(),
        })?;
        queue
            .send(Outgoing {
                payload,
                ack: ack_tx,
            })
            .map_err(|_| ForgeError::DeliveryFailed {
                topic: self.topic.clone(),
                reason: "delivery task is not running".to_string(),
            })?;

        Ok(DeliveryHandle {
            topic: self.topic.clone(),
            ack: ack_rx,
        })
    }

    /// Send and block until the broker acknowledges, fails, or the send timeout passes
    pub fn send_sync(&self, event: &E) -> Result<u64> {
        let handle = self.send(event)?;
        let runtime = self.runtime.as_ref().ok_or(ForgeError::InvalidState {
            operation: "send_sync",
            state: self.state.name(),
        })?;

        let offset = runtime
            .block_on(async { tokio::time::timeout(self.send_timeout, handle).await })
            .map_err(|_| ForgeError::DeliveryFailed {
                topic: self.topic.clone(),
                reason: format!("no acknowledgement within {:?}", self.send_timeout),
            })??;
        debug!(topic = %self.topic, offset, "Delivered");
        Ok(offset)
    }

    /// Flush queued sends and release the connection; safe to call twice
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            ProducerState::Closed => return Ok(()),
            ProducerState::Unconnected => {
                self.state = ProducerState::Closed;
                return Ok(());
            }
            ProducerState::Ready => {}
        }

        // Dropping the sender lets the worker drain the queue and exit
        self.queue.take();
        if let (Some(runtime), Some(worker)) = (self.runtime.take(), self.worker.take()) {
            if let Err(e) = runtime.block_on(worker) {
                warn!(topic = %self.topic, error = %e, "Delivery task ended abnormally");
            }
            runtime.shutdown_timeout(CLOSE_GRACE);
        }

        self.state = ProducerState::Closed;
        info!(topic = %self.topic, "Producer closed");
        Ok(())
    }

    fn require(&self, expected: ProducerState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ForgeError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }
}

impl<E> Drop for Producer<E> {
    fn drop(&mut self) {
        if self.state != ProducerState::Ready {
            return;
        }
        self.queue.take();
        let worker = self.worker.take();
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                // Cannot block inside another runtime; queued sends are abandoned
                runtime.shutdown_background();
            } else {
                if let Some(worker) = worker {
                    let _ = runtime.block_on(worker);
                }
                runtime.shutdown_timeout(CLOSE_GRACE);
            }
        }
        self.state = ProducerState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::broker::{Broker, InMemoryBroker};
    use serde::Deserialize;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "PageView",
        "fields": [
            { "name": "path", "type": "string" },
            { "name": "seq", "type": "long" }
        ]
    }"#;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct PageView {
        path: String,
        seq: i64,
    }

    fn bound() -> BoundSchema {
        BoundSchema::parse("PageView", 3, SCHEMA).unwrap()
    }

    fn view(seq: i64) -> PageView {
        PageView {
            path: "/home".to_string(),
            seq,
        }
    }

    #[test]
    fn test_send_sync_returns_offset() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer =
            Producer::<PageView>::create(broker.clone(), bound(), ProducerOptions::default())
                .unwrap();
        assert_eq!(producer.state(), ProducerState::Ready);
        assert_eq!(producer.topic(), "PageView");
        assert_eq!(producer.send_sync(&view(1)).unwrap(), 0);
        assert_eq!(producer.send_sync(&view(2)).unwrap(), 1);
        assert_eq!(broker.topic_len("PageView"), 2);
    }

    #[test]
    fn test_async_sends_keep_order_and_flush_on_close() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut producer =
            Producer::<PageView>::create(broker.clone(), bound(), ProducerOptions::default())
                .unwrap();
        let handles: Vec<_> = (0..50).map(|i| producer.send(&view(i)).unwrap()).collect();
        producer.close().unwrap();
        assert_eq!(broker.topic_len("PageView"), 50);

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().unwrap(), i as u64);
        }

        let mut sub = broker.subscribe("PageView", "check").unwrap();
        let schema = bound();
        for expected in 0..50 {
            let record = sub.records.try_recv().unwrap();
            let decoded: PageView = schema.decode(&record.payload).unwrap();
            assert_eq!(decoded.seq, expected);
        }
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let broker = InMemoryBroker::shared();
        let mut producer =
            Producer::<PageView>::create(broker, bound(), ProducerOptions::default()).unwrap();
        producer.close().unwrap();
        producer.close().unwrap();
        assert_eq!(producer.state(), ProducerState::Closed);

        let err = producer.send(&view(1)).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidState { operation: "send", state: "closed" }));
    }

    #[test]
    fn test_send_requires_connect() {
        let producer = Producer::<PageView>::new(InMemoryBroker::shared(), bound(), ProducerOptions::default());
        assert!(matches!(
            producer.send_sync(&view(1)),
            Err(ForgeError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_broker_outage() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let err = Producer::<PageView>::create(broker.clone(), bound(), ProducerOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ForgeError::BrokerUnavailable(_)));

        broker.set_available(true);
        let producer =
            Producer::<PageView>::create(broker.clone(), bound(), ProducerOptions::default())
                .unwrap();
        broker.set_available(false);
        let err = producer.send_sync(&view(1)).unwrap_err();
        assert!(matches!(err, ForgeError::DeliveryFailed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_custom_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let options = ProducerOptions {
            topic: Some("page-views".to_string()),
            ..ProducerOptions::default()
        };
        let producer = Producer::<PageView>::create(broker.clone(), bound(), options).unwrap();
        producer.send_sync(&view(1)).unwrap();
        assert_eq!(broker.topic_len("page-views"), 1);
    }
}
