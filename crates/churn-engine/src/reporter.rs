// Periodic snapshots of the stats registry.
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stats::{StatsRegistry, StatsSnapshot};

pub struct Reporter {
    stats: Arc<StatsRegistry>,
    interval: Duration,
}

/// What a finished reporter emitted: the number of reports, including the
/// final one, and the last snapshot.
#[derive(Debug, Clone)]
pub struct ReportTally {
    pub reports: u64,
    pub last: StatsSnapshot,
}

impl Reporter {
    pub fn new(stats: Arc<StatsRegistry>, interval: Duration) -> Self {
        Self { stats, interval }
    }

    /// Take a snapshot, log it and update gauges. Never mutates counters.
    pub fn report(&self) -> StatsSnapshot {
        let snapshot = self.stats.snapshot();
        emit(&snapshot);
        snapshot
    }

    pub async fn run(self, cancel: CancellationToken) -> ReportTally {
        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip the all-zero report.
        ticker.tick().await;
        let mut reports = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.report();
                    reports += 1;
                }
            }
        }
        let last = self.report();
        reports += 1;
        info!(reports, leaked = last.client_side_leak(), "reporter stopped");
        ReportTally { reports, last }
    }
}

fn emit(snapshot: &StatsSnapshot) {
    let leaked = snapshot.client_side_leak();
    let churn_rate = snapshot.churn_rate_per_minute();
    info!(
        uptime_s = snapshot.uptime.as_secs(),
        active = snapshot.active,
        created = snapshot.total_created,
        closed = snapshot.total_closed,
        reconnects = snapshot.total_reconnects,
        create_errors = snapshot.create_errors,
        destroy_errors = snapshot.destroy_errors,
        delivered = snapshot.delivered,
        published = snapshot.published,
        publish_errors = snapshot.publish_errors,
        leaked,
        churn_rate = format!("{churn_rate:.2}/min"),
        "churn stats"
    );

    t_gauge!("churn_uptime_seconds").set(snapshot.uptime.as_secs_f64());
    t_gauge!("churn_active").set(snapshot.active as f64);
    t_gauge!("churn_total_created").set(snapshot.total_created as f64);
    t_gauge!("churn_total_closed").set(snapshot.total_closed as f64);
    t_gauge!("churn_total_reconnects").set(snapshot.total_reconnects as f64);
    t_gauge!("churn_create_errors").set(snapshot.create_errors as f64);
    t_gauge!("churn_destroy_errors").set(snapshot.destroy_errors as f64);
    t_gauge!("churn_delivered").set(snapshot.delivered as f64);
    t_gauge!("churn_published").set(snapshot.published as f64);
    t_gauge!("churn_publish_errors").set(snapshot.publish_errors as f64);
    t_gauge!("churn_client_side_leak").set(leaked as f64);
    t_gauge!("churn_rate_per_minute").set(churn_rate);
}
