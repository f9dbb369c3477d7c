//! NATS JetStream implementation of the churn `Platform`.
//!
//! Subscriptions are ephemeral pull consumers with explicit acks. The
//! consumer's `max_ack_pending` and the client's pull batch are both set to
//! the requested in-flight limit, and each delivery is acked before it is
//! handed on. Ordered delivery additionally disables redelivery, so a message
//! that misses its ack is never replayed out of sequence.
//!
//! A consumer is identified by its server-assigned name. The adapter keeps
//! track of which stream each live consumer belongs to and forgets it only
//! once the server confirms the delete, so `unreleased_consumers` counts the
//! consumers this client failed to tear down.
use async_nats::Client;
use async_nats::jetstream;
use async_nats::jetstream::ErrorCode;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull};
use async_nats::jetstream::context::CreateStreamErrorKind;
use async_nats::jetstream::stream::{self, RetentionPolicy, StorageType};
use async_trait::async_trait;
use bytes::Bytes;
use churn_engine::{
    Delivery, Platform, PlatformError, PlatformResult, Retention, StartPosition, StreamSpec,
    Subscription, SubscriptionId, SubscriptionRequest,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

// Server-side reaper for consumers whose delete never arrived.
const CONSUMER_INACTIVE_THRESHOLD: Duration = Duration::from_secs(30);

/// Live consumers and the stream each belongs to.
#[derive(Default)]
pub struct ConsumerOwners {
    inner: Mutex<HashMap<SubscriptionId, String>>,
}

impl ConsumerOwners {
    pub fn track(&self, id: SubscriptionId, stream: String) {
        self.inner.lock().insert(id, stream);
    }

    pub fn stream_of(&self, id: &SubscriptionId) -> Option<String> {
        self.inner.lock().get(id).cloned()
    }

    /// Record the outcome of a delete request. Only a confirmed delete
    /// releases the consumer.
    pub fn settle<E: std::fmt::Display>(
        &self,
        id: &SubscriptionId,
        outcome: Result<(), E>,
    ) -> PlatformResult<()> {
        match outcome {
            Ok(()) => {
                self.inner.lock().remove(id);
                Ok(())
            }
            Err(err) => Err(PlatformError::Rejected(format!("delete consumer {id}: {err}"))),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct NatsPlatform {
    client: Client,
    jetstream: jetstream::Context,
    streams: Mutex<HashMap<String, stream::Stream>>,
    owners: ConsumerOwners,
}

impl NatsPlatform {
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            streams: Mutex::new(HashMap::new()),
            owners: ConsumerOwners::default(),
        }
    }

    /// Cheap JetStream round trip used by the readiness poller.
    pub async fn probe(&self) -> PlatformResult<()> {
        self.jetstream
            .query_account()
            .await
            .map(|_| ())
            .map_err(|err| PlatformError::Unavailable(err.to_string()))
    }

    /// Consumers created here whose delete was never confirmed.
    pub fn unreleased_consumers(&self) -> usize {
        self.owners.len()
    }

    async fn stream_handle(&self, name: &str) -> PlatformResult<stream::Stream> {
        if let Some(handle) = self.streams.lock().get(name).cloned() {
            return Ok(handle);
        }
        let handle = self
            .jetstream
            .get_stream(name)
            .await
            .map_err(|err| PlatformError::Rejected(format!("stream {name}: {err}")))?;
        self.streams.lock().insert(name.to_string(), handle.clone());
        Ok(handle)
    }
}

pub fn stream_config(spec: &StreamSpec) -> stream::Config {
    stream::Config {
        name: spec.name.clone(),
        subjects: spec.subjects.clone(),
        retention: match spec.retention {
            Retention::Limits => RetentionPolicy::Limits,
            Retention::Interest => RetentionPolicy::Interest,
            Retention::WorkQueue => RetentionPolicy::WorkQueue,
        },
        max_bytes: spec.max_bytes,
        max_age: spec.max_age,
        max_messages_per_subject: spec.max_messages_per_subject,
        num_replicas: spec.replicas,
        storage: StorageType::File,
        ..Default::default()
    }
}

fn in_flight(request: &SubscriptionRequest) -> usize {
    request.delivery.max_in_flight.max(1)
}

pub fn consumer_config(request: &SubscriptionRequest) -> pull::Config {
    pull::Config {
        filter_subject: request.filter_subject.clone(),
        deliver_policy: match request.delivery.start {
            StartPosition::LastPerSubject => DeliverPolicy::LastPerSubject,
            StartPosition::New => DeliverPolicy::New,
        },
        ack_policy: AckPolicy::Explicit,
        max_ack_pending: in_flight(request) as i64,
        max_deliver: if request.delivery.ordered { 1 } else { -1 },
        inactive_threshold: CONSUMER_INACTIVE_THRESHOLD,
        ..Default::default()
    }
}

fn stream_already_exists(code: ErrorCode) -> bool {
    code == ErrorCode::STREAM_NAME_EXIST
}

fn classify_create_stream(
    kind: CreateStreamErrorKind,
    stream: &str,
    message: String,
) -> PlatformError {
    match kind {
        CreateStreamErrorKind::JetStream(err) if stream_already_exists(err.error_code()) => {
            PlatformError::AlreadyExists(stream.to_string())
        }
        CreateStreamErrorKind::JetStreamUnavailable => PlatformError::Unavailable(message),
        CreateStreamErrorKind::TimedOut => {
            PlatformError::TimedOut(format!("create stream {stream}"))
        }
        _ => PlatformError::Rejected(message),
    }
}

#[async_trait]
impl Platform for NatsPlatform {
    async fn create_stream(&self, spec: &StreamSpec) -> PlatformResult<()> {
        match self.jetstream.create_stream(stream_config(spec)).await {
            Ok(handle) => {
                self.streams.lock().insert(spec.name.clone(), handle);
                Ok(())
            }
            Err(err) => Err(classify_create_stream(
                err.kind(),
                &spec.name,
                err.to_string(),
            )),
        }
    }

    async fn subscribe(&self, request: &SubscriptionRequest) -> PlatformResult<Subscription> {
        let handle = self.stream_handle(&request.stream).await?;
        let consumer = handle
            .create_consumer(consumer_config(request))
            .await
            .map_err(|err| PlatformError::Rejected(err.to_string()))?;
        let id = SubscriptionId::new(consumer.cached_info().name.as_str());
        self.owners.track(id.clone(), request.stream.clone());
        let messages = match consumer
            .stream()
            .max_messages_per_batch(in_flight(request))
            .messages()
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                // The consumer exists server-side; do not leave it behind.
                let outcome = handle.delete_consumer(id.as_str()).await.map(|_| ());
                if let Err(cleanup) = self.owners.settle(&id, outcome) {
                    debug!(consumer = %id, error = %cleanup, "cleanup after failed attach");
                }
                return Err(PlatformError::Transport(err.into()));
            }
        };
        let deliveries = messages
            .then(|item| async move {
                let message = item.map_err(|err| PlatformError::Transport(err.into()))?;
                message
                    .ack()
                    .await
                    .map_err(|err| PlatformError::Transport(anyhow::anyhow!("ack failed: {err}")))?;
                let message = message.message;
                Ok::<_, PlatformError>(Delivery {
                    subject: message.subject.to_string(),
                    payload: message.payload,
                })
            })
            .boxed();
        Ok(Subscription { id, deliveries })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> PlatformResult<()> {
        let Some(stream) = self.owners.stream_of(id) else {
            return Ok(());
        };
        let handle = self.stream_handle(&stream).await?;
        let outcome = handle.delete_consumer(id.as_str()).await.map(|_| ());
        self.owners.settle(id, outcome)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> PlatformResult<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| PlatformError::Transport(err.into()))
    }
}
