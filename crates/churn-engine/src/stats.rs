//! Process-wide churn counters and the registry of live subscriptions.
//!
//! # Purpose
//! Every loop, the traffic generator, and the reporter share one
//! `StatsRegistry` behind an `Arc`. Counters only ever grow.
//!
//! # Notes
//! `total_closed` counts destroy *requests*, not confirmed teardowns. Destroy
//! failures are tracked separately in `destroy_errors` and never subtract from
//! `total_closed`, so the client-side leak figure reflects the client's belief
//! while server-side state has to be probed externally.
//!
//! Registry inserts/removes and the matching created/closed increments happen
//! under the same lock that `snapshot` takes, so a snapshot never observes a
//! half-applied transition.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::platform::SubscriptionId;

pub type SlotId = usize;

/// Registry view of a slot's current subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRecord {
    pub subscription_id: SubscriptionId,
    pub created_at: Instant,
}

#[derive(Debug, Default)]
struct SlotCounters {
    created: AtomicU64,
    closed: AtomicU64,
    create_errors: AtomicU64,
    destroy_errors: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug)]
pub struct StatsRegistry {
    started_at: Instant,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_reconnects: AtomicU64,
    create_errors: AtomicU64,
    destroy_errors: AtomicU64,
    delivered: AtomicU64,
    published: AtomicU64,
    publish_errors: AtomicU64,
    active: Mutex<HashMap<SlotId, ActiveRecord>>,
    slots: Vec<SlotCounters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub active: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub total_reconnects: u64,
    pub create_errors: u64,
    pub destroy_errors: u64,
    pub delivered: u64,
    pub published: u64,
    pub publish_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotSnapshot {
    pub created: u64,
    pub closed: u64,
    pub create_errors: u64,
    pub destroy_errors: u64,
    pub reconnects: u64,
    pub active: bool,
}

impl StatsRegistry {
    pub fn new(slot_count: usize) -> Self {
        Self {
            started_at: Instant::now(),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_reconnects: AtomicU64::new(0),
            create_errors: AtomicU64::new(0),
            destroy_errors: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
            active: Mutex::new(HashMap::with_capacity(slot_count)),
            slots: (0..slot_count).map(|_| SlotCounters::default()).collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record a successful create. Returns `false` (and changes nothing) if the
    /// slot already has a live entry.
    pub fn register_active(&self, slot: SlotId, record: ActiveRecord) -> bool {
        let mut active = self.active.lock();
        if let Some(existing) = active.get(&slot) {
            warn!(
                slot,
                existing = %existing.subscription_id,
                rejected = %record.subscription_id,
                "slot already has an active subscription"
            );
            return false;
        }
        active.insert(slot, record);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.slots.get(slot) {
            counters.created.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Remove the slot's entry and count the close. Called once per cycle end
    /// whatever the destroy outcome was.
    pub fn release_active(&self, slot: SlotId) -> Option<ActiveRecord> {
        let mut active = self.active.lock();
        let removed = active.remove(&slot)?;
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.slots.get(slot) {
            counters.closed.fetch_add(1, Ordering::Relaxed);
        }
        Some(removed)
    }

    /// Returns the slot's create error count including this one.
    pub fn record_create_error(&self, slot: SlotId) -> u64 {
        self.create_errors.fetch_add(1, Ordering::Relaxed);
        self.slots
            .get(slot)
            .map(|counters| counters.create_errors.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0)
    }

    pub fn record_destroy_error(&self, slot: SlotId) {
        self.destroy_errors.fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.slots.get(slot) {
            counters.destroy_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self, slot: SlotId) {
        self.total_reconnects.fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.slots.get(slot) {
            counters.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivered(&self, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_published(&self, count: u64) {
        self.published.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_publish_errors(&self, count: u64) {
        self.publish_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn active_record(&self, slot: SlotId) -> Option<ActiveRecord> {
        self.active.lock().get(&slot).cloned()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let active = self.active.lock();
        StatsSnapshot {
            uptime: self.uptime(),
            active: active.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_reconnects: self.total_reconnects.load(Ordering::Relaxed),
            create_errors: self.create_errors.load(Ordering::Relaxed),
            destroy_errors: self.destroy_errors.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }

    pub fn slot_snapshot(&self, slot: SlotId) -> Option<SlotSnapshot> {
        let counters = self.slots.get(slot)?;
        let active = self.active.lock().contains_key(&slot);
        Some(SlotSnapshot {
            created: counters.created.load(Ordering::Relaxed),
            closed: counters.closed.load(Ordering::Relaxed),
            create_errors: counters.create_errors.load(Ordering::Relaxed),
            destroy_errors: counters.destroy_errors.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
            active,
        })
    }
}

impl StatsSnapshot {
    /// `total_created - total_closed - active`; zero whenever the client's own
    /// bookkeeping is consistent.
    pub fn client_side_leak(&self) -> i64 {
        self.total_created as i64 - self.total_closed as i64 - self.active as i64
    }

    /// Completed cycles per minute of uptime.
    pub fn churn_rate_per_minute(&self) -> f64 {
        let minutes = self.uptime.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.total_reconnects as f64 / minutes
        } else {
            0.0
        }
    }
}
