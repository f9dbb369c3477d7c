//! Boundary between the churn engine and the messaging platform under test.
//!
//! # Purpose
//! The engine only needs four operations from the platform: provision a stream,
//! open an ephemeral subscription, tear it down, and publish. Everything else
//! (connection management, reconnects, placement) stays behind this trait.
//!
//! # Notes
//! Implementations must be cheap to share; loops hold the platform behind an
//! `Arc` and issue requests concurrently.
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PlatformResult;

/// Where delivery starts for a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Most recent message for each distinct subject matching the filter.
    LastPerSubject,
    /// Only messages published after the subscription is created.
    New,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub ordered: bool,
    pub max_in_flight: usize,
    pub start: StartPosition,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            max_in_flight: 1,
            start: StartPosition::LastPerSubject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub stream: String,
    pub filter_subject: String,
    pub delivery: DeliveryOptions,
}

/// Opaque platform-assigned identity of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Arc<str>);

impl SubscriptionId {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
}

pub type DeliveryStream = BoxStream<'static, PlatformResult<Delivery>>;

/// A freshly created subscription: its id plus the stream of deliveries.
pub struct Subscription {
    pub id: SubscriptionId,
    pub deliveries: DeliveryStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Limits,
    Interest,
    WorkQueue,
}

/// Declarative description of the durable log the consumers attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: Retention,
    pub max_bytes: i64,
    pub max_age: Duration,
    pub max_messages_per_subject: i64,
    pub replicas: usize,
}

#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Create the stream. Must return `PlatformError::AlreadyExists` when the
    /// name is already taken.
    async fn create_stream(&self, spec: &StreamSpec) -> PlatformResult<()>;

    async fn subscribe(&self, request: &SubscriptionRequest) -> PlatformResult<Subscription>;

    async fn unsubscribe(&self, id: &SubscriptionId) -> PlatformResult<()>;

    async fn publish(&self, subject: &str, payload: Bytes) -> PlatformResult<()>;
}
