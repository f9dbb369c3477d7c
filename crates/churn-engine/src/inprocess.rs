// In-process platform used to drive the engine without a live server.
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{
    Delivery, Platform, StartPosition, StreamSpec, Subscription, SubscriptionId,
    SubscriptionRequest,
};
use crate::subjects::subject_matches;

/// Platform that keeps streams and consumers in memory.
///
/// Consumers stay registered until `unsubscribe` succeeds, independent of the
/// client dropping its delivery stream, so `consumer_count` plays the role of
/// the server-side probe. Faults can be injected per operation.
///
/// Each consumer hands the client at most `max_in_flight` deliveries; the
/// rest wait in a per-consumer backlog and move over as the client pulls.
///
/// ```
/// use churn_engine::inprocess::InProcessPlatform;
/// use churn_engine::platform::{DeliveryOptions, Platform, SubscriptionRequest};
///
/// let platform = InProcessPlatform::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     platform.create_stream(&InProcessPlatform::default_stream("CHURN", "churn.>")).await.expect("stream");
///     let request = SubscriptionRequest {
///         stream: "CHURN".into(),
///         filter_subject: "churn.0.>".into(),
///         delivery: DeliveryOptions::default(),
///     };
///     let sub = platform.subscribe(&request).await.expect("subscribe");
///     assert_eq!(platform.consumer_count(), 1);
///     platform.unsubscribe(&sub.id).await.expect("unsubscribe");
///     assert_eq!(platform.consumer_count(), 0);
/// });
/// ```
#[derive(Clone, Default)]
pub struct InProcessPlatform {
    // Shared so clones observe the same server state.
    inner: Arc<Mutex<State>>,
    next_consumer: Arc<AtomicU64>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamSpec>,
    // Latest payload per subject; ordered for deterministic replay.
    last_per_subject: BTreeMap<String, Bytes>,
    consumers: HashMap<SubscriptionId, Consumer>,
    failing_stream_creates: u32,
    failing_filters: HashSet<String>,
    failing_unsubscribes: bool,
    subscribe_calls: u64,
    unsubscribe_calls: u64,
}

struct Consumer {
    filter_subject: String,
    sender: mpsc::Sender<PlatformResult<Delivery>>,
    // Matched but not yet handed to the client.
    backlog: VecDeque<PlatformResult<Delivery>>,
}

impl Consumer {
    fn offer(&mut self, item: PlatformResult<Delivery>) {
        self.backlog.push_back(item);
        self.refill();
    }

    fn refill(&mut self) {
        while let Some(item) = self.backlog.pop_front() {
            match self.sender.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    self.backlog.push_front(item);
                    break;
                }
                // Nobody pulls any more; the consumer itself stays registered.
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    break;
                }
            }
        }
    }
}

impl InProcessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_stream(name: &str, subject: &str) -> StreamSpec {
        StreamSpec {
            name: name.to_string(),
            subjects: vec![subject.to_string()],
            retention: crate::platform::Retention::Limits,
            max_bytes: 64 * 1024 * 1024,
            max_age: std::time::Duration::from_secs(3600),
            max_messages_per_subject: 1,
            replicas: 1,
        }
    }

    /// Consumers the platform still holds; the server-side view.
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().streams.len()
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.inner.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> u64 {
        self.inner.lock().unsubscribe_calls
    }

    /// Deliveries a consumer holds back because the client is at its
    /// in-flight limit. Zero for unknown consumers.
    pub fn pending_deliveries(&self, id: &SubscriptionId) -> usize {
        self.inner
            .lock()
            .consumers
            .get(id)
            .map_or(0, |consumer| consumer.backlog.len())
    }

    /// Fail the next `count` stream creations with `Unavailable`.
    pub fn fail_next_stream_creates(&self, count: u32) {
        self.inner.lock().failing_stream_creates = count;
    }

    /// Reject every subscribe whose filter equals `filter_subject`.
    pub fn fail_subscribes_for(&self, filter_subject: impl Into<String>) {
        self.inner.lock().failing_filters.insert(filter_subject.into());
    }

    /// Make unsubscribe return an error and keep the consumer alive.
    pub fn fail_unsubscribes(&self, failing: bool) {
        self.inner.lock().failing_unsubscribes = failing;
    }

    /// Push a delivery error into every open consumer.
    pub fn break_deliveries(&self) {
        let mut state = self.inner.lock();
        for consumer in state.consumers.values_mut() {
            consumer.offer(Err(PlatformError::Transport(anyhow::anyhow!(
                "delivery stream reset"
            ))));
        }
    }
}

#[async_trait]
impl Platform for InProcessPlatform {
    async fn create_stream(&self, spec: &StreamSpec) -> PlatformResult<()> {
        let mut state = self.inner.lock();
        if state.failing_stream_creates > 0 {
            state.failing_stream_creates -= 1;
            return Err(PlatformError::Unavailable("jetstream not ready".into()));
        }
        match state.streams.get(&spec.name) {
            // Identical config is accepted as-is; anything else is a name clash.
            Some(existing) if existing == spec => Ok(()),
            Some(_) => Err(PlatformError::AlreadyExists(spec.name.clone())),
            None => {
                state.streams.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn subscribe(&self, request: &SubscriptionRequest) -> PlatformResult<Subscription> {
        let mut state = self.inner.lock();
        state.subscribe_calls += 1;
        if state.failing_filters.contains(&request.filter_subject) {
            return Err(PlatformError::Rejected(format!(
                "consumer create failed for {}",
                request.filter_subject
            )));
        }
        if !state.streams.contains_key(&request.stream) {
            return Err(PlatformError::Rejected(format!(
                "stream not found: {}",
                request.stream
            )));
        }

        let (sender, mut receiver) = mpsc::channel(request.delivery.max_in_flight.max(1));
        let mut consumer = Consumer {
            filter_subject: request.filter_subject.clone(),
            sender,
            backlog: VecDeque::new(),
        };
        if request.delivery.start == StartPosition::LastPerSubject {
            for (subject, payload) in &state.last_per_subject {
                if subject_matches(&request.filter_subject, subject) {
                    consumer.offer(Ok(Delivery {
                        subject: subject.clone(),
                        payload: payload.clone(),
                    }));
                }
            }
        }
        let id = SubscriptionId::new(format!(
            "inproc-{}",
            self.next_consumer.fetch_add(1, Ordering::Relaxed)
        ));
        state.consumers.insert(id.clone(), consumer);

        // Each delivery taken by the client frees a slot for the backlog.
        let inner = Arc::clone(&self.inner);
        let consumer_id = id.clone();
        let deliveries = futures::stream::poll_fn(move |cx| {
            let next = receiver.poll_recv(cx);
            if let Poll::Ready(Some(_)) = &next
                && let Some(consumer) = inner.lock().consumers.get_mut(&consumer_id)
            {
                consumer.refill();
            }
            next
        })
        .boxed();
        Ok(Subscription { id, deliveries })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> PlatformResult<()> {
        let mut state = self.inner.lock();
        state.unsubscribe_calls += 1;
        if state.failing_unsubscribes {
            return Err(PlatformError::Rejected(format!("consumer delete failed: {id}")));
        }
        // Missing consumers are fine: delete is idempotent from the caller's side.
        state.consumers.remove(id);
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> PlatformResult<()> {
        let mut state = self.inner.lock();
        let captured = state
            .streams
            .values()
            .any(|spec| spec.subjects.iter().any(|filter| subject_matches(filter, subject)));
        if !captured {
            return Err(PlatformError::Rejected(format!("no stream for {subject}")));
        }
        state
            .last_per_subject
            .insert(subject.to_string(), payload.clone());
        for consumer in state.consumers.values_mut() {
            if subject_matches(&consumer.filter_subject, subject) {
                consumer.offer(Ok(Delivery {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DeliveryOptions;
    use futures::FutureExt;

    fn request(filter: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            stream: "CHURN".into(),
            filter_subject: filter.into(),
            delivery: DeliveryOptions::default(),
        }
    }

    async fn platform_with_stream() -> InProcessPlatform {
        let platform = InProcessPlatform::new();
        platform
            .create_stream(&InProcessPlatform::default_stream("CHURN", "churn.>"))
            .await
            .expect("stream");
        platform
    }

    #[tokio::test]
    async fn last_per_subject_replays_latest_only() {
        let platform = platform_with_stream().await;
        platform
            .publish("churn.0.1", Bytes::from_static(b"old"))
            .await
            .expect("publish");
        platform
            .publish("churn.0.1", Bytes::from_static(b"new"))
            .await
            .expect("publish");
        platform
            .publish("churn.1.1", Bytes::from_static(b"other"))
            .await
            .expect("publish");

        let mut sub = platform.subscribe(&request("churn.0.>")).await.expect("sub");
        let first = sub.deliveries.next().await.expect("item").expect("ok");
        assert_eq!(first.subject, "churn.0.1");
        assert_eq!(first.payload, Bytes::from_static(b"new"));

        platform
            .publish("churn.0.2", Bytes::from_static(b"live"))
            .await
            .expect("publish");
        let live = sub.deliveries.next().await.expect("item").expect("ok");
        assert_eq!(live.subject, "churn.0.2");
    }

    #[tokio::test]
    async fn max_in_flight_bounds_what_the_client_holds() {
        let platform = platform_with_stream().await;
        let mut sub = platform.subscribe(&request("churn.0.>")).await.expect("sub");
        for key in 0..5 {
            platform
                .publish(&format!("churn.0.{key}"), Bytes::from_static(b"x"))
                .await
                .expect("publish");
        }
        assert_eq!(platform.pending_deliveries(&sub.id), 4);

        let first = sub
            .deliveries
            .next()
            .now_or_never()
            .expect("ready")
            .expect("item")
            .expect("ok");
        assert_eq!(first.subject, "churn.0.0");
        assert_eq!(platform.pending_deliveries(&sub.id), 3);

        let mut subjects = Vec::new();
        while let Some(Some(Ok(delivery))) = sub.deliveries.next().now_or_never() {
            subjects.push(delivery.subject);
        }
        assert_eq!(subjects, vec!["churn.0.1", "churn.0.2", "churn.0.3", "churn.0.4"]);
        assert_eq!(platform.pending_deliveries(&sub.id), 0);
    }

    #[tokio::test]
    async fn wider_in_flight_window_prefetches_more() {
        let platform = platform_with_stream().await;
        let wide = SubscriptionRequest {
            delivery: DeliveryOptions {
                max_in_flight: 3,
                ..DeliveryOptions::default()
            },
            ..request("churn.0.>")
        };
        let sub = platform.subscribe(&wide).await.expect("sub");
        for key in 0..5 {
            platform
                .publish(&format!("churn.0.{key}"), Bytes::from_static(b"x"))
                .await
                .expect("publish");
        }
        assert_eq!(platform.pending_deliveries(&sub.id), 2);
    }

    #[tokio::test]
    async fn different_spec_reports_already_exists() {
        let platform = platform_with_stream().await;
        let mut spec = InProcessPlatform::default_stream("CHURN", "churn.>");
        spec.replicas = 3;
        let err = platform.create_stream(&spec).await.expect_err("clash");
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn failed_unsubscribe_keeps_consumer() {
        let platform = platform_with_stream().await;
        let sub = platform.subscribe(&request("churn.0.>")).await.expect("sub");
        platform.fail_unsubscribes(true);
        assert!(platform.unsubscribe(&sub.id).await.is_err());
        assert_eq!(platform.consumer_count(), 1);
        platform.fail_unsubscribes(false);
        platform.unsubscribe(&sub.id).await.expect("unsubscribe");
        platform.unsubscribe(&sub.id).await.expect("idempotent");
        assert_eq!(platform.consumer_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_requires_stream() {
        let platform = InProcessPlatform::new();
        let err = platform
            .subscribe(&request("churn.0.>"))
            .await
            .expect_err("no stream");
        assert!(matches!(err, PlatformError::Rejected(_)));
    }

    #[tokio::test]
    async fn publish_outside_stream_is_rejected() {
        let platform = platform_with_stream().await;
        assert!(
            platform
                .publish("other.1", Bytes::from_static(b"x"))
                .await
                .is_err()
        );
    }
}
