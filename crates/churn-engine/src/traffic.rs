// Synthetic traffic that keeps the subject space populated.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::platform::Platform;
use crate::stats::StatsRegistry;
use crate::subjects::SubjectSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

/// Payload carried by every generated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficMessage {
    pub seq: u64,
    pub sent_at: DateTime<Utc>,
}

pub struct TrafficGenerator<P: Platform> {
    platform: Arc<P>,
    stats: Arc<StatsRegistry>,
    subjects: SubjectSpace,
    config: TrafficConfig,
    rng: StdRng,
    next_seq: u64,
}

impl<P: Platform> TrafficGenerator<P> {
    pub fn new(
        platform: Arc<P>,
        stats: Arc<StatsRegistry>,
        subjects: SubjectSpace,
        config: TrafficConfig,
    ) -> Self {
        Self::with_rng(platform, stats, subjects, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        platform: Arc<P>,
        stats: Arc<StatsRegistry>,
        subjects: SubjectSpace,
        config: TrafficConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            platform,
            stats,
            subjects,
            config,
            rng,
            next_seq: 1,
        }
    }

    /// Publish one batch. Failures are counted, never retried.
    pub async fn publish_batch(&mut self) {
        let mut published = 0;
        let mut failed = 0;
        for _ in 0..self.config.batch_size {
            let subject = self.subjects.random_subject(&mut self.rng);
            let message = TrafficMessage {
                seq: self.next_seq,
                sent_at: Utc::now(),
            };
            self.next_seq += 1;
            let payload = match serde_json::to_vec(&message) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };
            match self.platform.publish(&subject, payload).await {
                Ok(()) => published += 1,
                Err(_) => failed += 1,
            }
        }
        self.stats.record_published(published);
        self.stats.record_publish_errors(failed);
        debug!(published, failed, next_seq = self.next_seq, "traffic batch sent");
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            subjects = %self.subjects.stream_filter(),
            "traffic generator started"
        );
        let mut ticker = interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.publish_batch().await,
            }
        }
        info!(last_seq = self.next_seq - 1, "traffic generator stopped");
    }
}
