//! Per-slot consumer lifecycle: create, run, destroy, cool down, repeat.
//!
//! # Purpose
//! Each `ConsumerLifecycle` owns one `ConsumerSlot` for the life of the
//! process and cycles ephemeral subscriptions on it:
//!
//! ```text
//! Creating -> Running -> Destroying -> Cooldown -> Creating -> ...
//!     \______________________________/
//!       (create failed: straight to Cooldown)
//! ```
//!
//! # Design notes
//! - `step` performs exactly one transition so individual transitions can be
//!   driven from tests; `run` drives `step` and checks the cancellation token
//!   between transitions only. The lifetime and cooldown sleeps are not cut
//!   short.
//! - Deliveries are drained by a separate task with its own cancellation
//!   token. Destroying cancels that token and issues the destroy without
//!   waiting for the drain to stop, then joins the drain task.
//! - `total_closed` is bumped once the destroy request has been issued,
//!   whether or not it succeeded. A failed destroy is only visible through
//!   `destroy_errors`.
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PlatformResult;
use crate::platform::{
    DeliveryOptions, DeliveryStream, Platform, Subscription, SubscriptionId, SubscriptionRequest,
};
use crate::stats::{ActiveRecord, SlotId, StatsRegistry};

/// Create failures are logged on the first occurrence and then every Nth per slot.
pub const CREATE_ERROR_LOG_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTiming {
    /// How long a subscription stays open before it is destroyed.
    pub lifetime: Duration,
    /// Pause between a destroy and the next create.
    pub cooldown: Duration,
}

/// A permanently assigned churn identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSlot {
    pub id: SlotId,
    pub stream: String,
    pub subject_pattern: String,
}

impl ConsumerSlot {
    pub fn subscription_request(&self) -> SubscriptionRequest {
        SubscriptionRequest {
            stream: self.stream.clone(),
            filter_subject: self.subject_pattern.clone(),
            delivery: DeliveryOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Creating,
    Running,
    Destroying,
    Cooldown,
}

/// A live subscription, owned by the cycle that created it.
pub struct ActiveSubscription {
    id: SubscriptionId,
    created_at: Instant,
    delivered: Arc<AtomicU64>,
    drain: DrainTask,
}

impl ActiveSubscription {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

struct DrainTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DrainTask {
    fn spawn(
        deliveries: DeliveryStream,
        delivered: Arc<AtomicU64>,
        stats: Arc<StatsRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(drain_deliveries(
            deliveries,
            delivered,
            stats,
            cancel.clone(),
        ));
        Self { cancel, handle }
    }

    async fn join(self) {
        // Drain tasks never fail; a JoinError here can only be a panic or abort.
        if let Err(err) = self.handle.await {
            warn!(error = %err, "drain task did not finish cleanly");
        }
    }
}

async fn drain_deliveries(
    mut deliveries: DeliveryStream,
    delivered: Arc<AtomicU64>,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = deliveries.next() => match next {
                Some(Ok(_delivery)) => {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    stats.record_delivered(1);
                }
                Some(Err(err)) => {
                    debug!(error = %err, "delivery stream failed, draining stopped");
                    break;
                }
                None => break,
            },
        }
    }
}

enum LoopState {
    Creating,
    Running(ActiveSubscription),
    Destroying(ActiveSubscription),
    Cooldown,
}

pub struct ConsumerLifecycle<P: Platform> {
    slot: ConsumerSlot,
    state: LoopState,
    platform: Arc<P>,
    stats: Arc<StatsRegistry>,
    timing: LifecycleTiming,
    // Parent of every drain token handed out by this loop.
    drain_parent: CancellationToken,
}

impl<P: Platform> ConsumerLifecycle<P> {
    pub fn new(
        slot: ConsumerSlot,
        platform: Arc<P>,
        stats: Arc<StatsRegistry>,
        timing: LifecycleTiming,
    ) -> Self {
        Self {
            slot,
            state: LoopState::Creating,
            platform,
            stats,
            timing,
            drain_parent: CancellationToken::new(),
        }
    }

    pub fn slot(&self) -> &ConsumerSlot {
        &self.slot
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            LoopState::Creating => Phase::Creating,
            LoopState::Running(_) => Phase::Running,
            LoopState::Destroying(_) => Phase::Destroying,
            LoopState::Cooldown => Phase::Cooldown,
        }
    }

    pub fn active(&self) -> Option<&ActiveSubscription> {
        match &self.state {
            LoopState::Running(active) | LoopState::Destroying(active) => Some(active),
            LoopState::Creating | LoopState::Cooldown => None,
        }
    }

    /// Perform the current phase's work and move to the next phase.
    pub async fn step(&mut self) {
        let state = std::mem::replace(&mut self.state, LoopState::Cooldown);
        self.state = match state {
            LoopState::Creating => match self.create().await {
                Some(active) => LoopState::Running(active),
                None => LoopState::Cooldown,
            },
            LoopState::Running(active) => {
                sleep(self.timing.lifetime).await;
                LoopState::Destroying(active)
            }
            LoopState::Destroying(active) => {
                self.destroy(active).await;
                LoopState::Cooldown
            }
            LoopState::Cooldown => {
                sleep(self.timing.cooldown).await;
                self.stats.record_reconnect(self.slot.id);
                LoopState::Creating
            }
        };
    }

    /// Drive the loop until `cancel` fires, then tear down any live subscription.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            slot = self.slot.id,
            subject = %self.slot.subject_pattern,
            "consumer loop started"
        );
        while !cancel.is_cancelled() {
            self.step().await;
        }
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        let state = std::mem::replace(&mut self.state, LoopState::Cooldown);
        if let LoopState::Running(active) | LoopState::Destroying(active) = state {
            self.destroy(active).await;
        }
        self.drain_parent.cancel();
        info!(slot = self.slot.id, "consumer loop stopped");
    }

    async fn create(&mut self) -> Option<ActiveSubscription> {
        let request = self.slot.subscription_request();
        let subscription = match self.platform.subscribe(&request).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let errors = self.stats.record_create_error(self.slot.id);
                if errors == 1 || errors % CREATE_ERROR_LOG_EVERY == 0 {
                    warn!(
                        slot = self.slot.id,
                        subject = %self.slot.subject_pattern,
                        errors,
                        error = %err,
                        "subscription create failed"
                    );
                }
                return None;
            }
        };
        let Subscription { id, deliveries } = subscription;
        let created_at = Instant::now();
        let record = ActiveRecord {
            subscription_id: id.clone(),
            created_at,
        };
        if !self.stats.register_active(self.slot.id, record) {
            // Only reachable if two loops share a slot id. Hand the
            // subscription straight back rather than tracking it twice.
            ignore_destroy_outcome(
                &self.stats,
                self.slot.id,
                &id,
                self.platform.unsubscribe(&id).await,
            );
            return None;
        }
        let delivered = Arc::new(AtomicU64::new(0));
        let drain = DrainTask::spawn(
            deliveries,
            Arc::clone(&delivered),
            Arc::clone(&self.stats),
            self.drain_parent.child_token(),
        );
        debug!(slot = self.slot.id, subscription = %id, "subscription created");
        Some(ActiveSubscription {
            id,
            created_at,
            delivered,
            drain,
        })
    }

    async fn destroy(&mut self, active: ActiveSubscription) {
        let ActiveSubscription {
            id,
            created_at,
            delivered,
            drain,
        } = active;
        drain.cancel.cancel();
        let outcome = self.platform.unsubscribe(&id).await;
        self.stats.release_active(self.slot.id);
        ignore_destroy_outcome(&self.stats, self.slot.id, &id, outcome);
        drain.join().await;
        debug!(
            slot = self.slot.id,
            subscription = %id,
            lived_ms = created_at.elapsed().as_millis() as u64,
            delivered = delivered.load(Ordering::Relaxed),
            "subscription destroyed"
        );
    }
}

/// Drop the result of a destroy request. The close has already been counted;
/// a failure only shows up in `destroy_errors`.
fn ignore_destroy_outcome(
    stats: &StatsRegistry,
    slot: SlotId,
    id: &SubscriptionId,
    outcome: PlatformResult<()>,
) {
    if let Err(err) = outcome {
        stats.record_destroy_error(slot);
        debug!(slot, subscription = %id, error = %err, "destroy request failed");
    }
}
