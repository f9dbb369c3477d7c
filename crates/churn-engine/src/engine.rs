//! Supervisor that spawns and stops the churn workload.
//!
//! # Purpose
//! Builds one `ConsumerLifecycle` per slot, plus the optional traffic
//! generator and reporter, and runs them on a `JoinSet` under a single
//! cancellation token.
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lifecycle::{ConsumerLifecycle, ConsumerSlot, LifecycleTiming};
use crate::platform::Platform;
use crate::reporter::Reporter;
use crate::stats::StatsRegistry;
use crate::subjects::SubjectSpace;
use crate::traffic::{TrafficConfig, TrafficGenerator};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub stream: String,
    pub subjects: SubjectSpace,
    /// Number of consumer lifecycle loops; zero runs no consumers.
    pub concurrency: usize,
    pub timing: LifecycleTiming,
    pub traffic: Option<TrafficConfig>,
    pub report_interval: Option<Duration>,
}

impl EngineConfig {
    pub fn slots(&self) -> Vec<ConsumerSlot> {
        (0..self.concurrency)
            .map(|id| ConsumerSlot {
                id,
                stream: self.stream.clone(),
                subject_pattern: self.subjects.slot_filter(id),
            })
            .collect()
    }
}

pub struct Engine;

pub struct EngineHandle {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Engine {
    /// Spawn the workload. `stats` must have been sized for `config.concurrency`
    /// slots for per-slot counters to be tracked.
    pub fn start<P: Platform>(
        platform: Arc<P>,
        stats: Arc<StatsRegistry>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> EngineHandle {
        if stats.slot_count() < config.concurrency {
            warn!(
                slots = stats.slot_count(),
                concurrency = config.concurrency,
                "stats registry smaller than concurrency; per-slot counters partially tracked"
            );
        }
        let mut tasks = JoinSet::new();
        for slot in config.slots() {
            let lifecycle = ConsumerLifecycle::new(
                slot,
                Arc::clone(&platform),
                Arc::clone(&stats),
                config.timing,
            );
            tasks.spawn(lifecycle.run(cancel.child_token()));
        }
        if let Some(traffic) = config.traffic {
            let generator = TrafficGenerator::new(
                Arc::clone(&platform),
                Arc::clone(&stats),
                config.subjects.clone(),
                traffic,
            );
            tasks.spawn(generator.run(cancel.child_token()));
        }
        if let Some(interval) = config.report_interval {
            let reporter = Reporter::new(Arc::clone(&stats), interval);
            let token = cancel.child_token();
            tasks.spawn(async move {
                reporter.run(token).await;
            });
        }
        info!(
            stream = %config.stream,
            concurrency = config.concurrency,
            lifetime_ms = config.timing.lifetime.as_millis() as u64,
            cooldown_ms = config.timing.cooldown.as_millis() as u64,
            traffic = config.traffic.is_some(),
            "churn engine started"
        );
        EngineHandle { tasks, cancel }
    }
}

impl EngineHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every task and wait for them to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "engine task ended abnormally");
            }
        }
        info!("churn engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_get_wrapped_subject_patterns() {
        let config = EngineConfig {
            stream: "CHURN".into(),
            subjects: SubjectSpace::new("churn", 2, 4),
            concurrency: 3,
            timing: LifecycleTiming {
                lifetime: Duration::from_secs(1),
                cooldown: Duration::from_millis(10),
            },
            traffic: None,
            report_interval: None,
        };
        let patterns: Vec<String> = config
            .slots()
            .into_iter()
            .map(|slot| slot.subject_pattern)
            .collect();
        assert_eq!(patterns, vec!["churn.0.>", "churn.1.>", "churn.0.>"]);
        assert!(config.slots().iter().all(|slot| slot.stream == "CHURN"));
    }
}
