// Mode runner: connect, wait for JetStream, provision, churn until shutdown.
use anyhow::{Context, Result, bail};
use churn_engine::{Engine, StatsRegistry, ensure_stream, wait_ready};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{HarnessConfig, Mode};
use crate::gate::ConnectionGate;
use crate::nats::NatsPlatform;
use crate::observability::Readiness;

/// Run the configured mode until `shutdown` resolves or the connection is
/// permanently closed.
pub async fn run_with_shutdown<F>(
    config: HarnessConfig,
    readiness: Readiness,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    info!(
        mode = %config.mode,
        servers = %config.nats_url,
        stream = %config.stream_name,
        "starting churn harness"
    );
    let gate = ConnectionGate::connect(&config)
        .await
        .context("connect to NATS")?;
    let platform = Arc::new(NatsPlatform::new(gate.client().clone()));

    let ready = wait_ready(
        || platform.probe(),
        config.ready_max_attempts,
        config.ready_interval(),
    )
    .await;
    if !ready {
        match config.mode {
            Mode::Consumer => bail!(
                "JetStream not ready after {} attempts",
                config.ready_max_attempts
            ),
            Mode::Publisher => warn!(
                attempts = config.ready_max_attempts,
                "JetStream not ready; publishing anyway"
            ),
        }
    }

    let spec = config.stream_spec();
    ensure_stream(platform.as_ref(), &spec, config.provision_policy())
        .await
        .with_context(|| format!("provision stream {}", spec.name))?;
    readiness.mark_ready();

    let engine_config = config.engine_config();
    let stats = Arc::new(StatsRegistry::new(engine_config.concurrency));
    let engine = Engine::start(
        Arc::clone(&platform),
        Arc::clone(&stats),
        engine_config,
        CancellationToken::new(),
    );

    tokio::select! {
        _ = shutdown => info!("shutdown requested"),
        _ = gate.closed() => warn!("connection closed permanently; stopping"),
    }
    readiness.mark_not_ready();
    engine.shutdown().await;

    let snapshot = stats.snapshot();
    info!(
        uptime_s = snapshot.uptime.as_secs(),
        created = snapshot.total_created,
        closed = snapshot.total_closed,
        destroy_errors = snapshot.destroy_errors,
        leaked = snapshot.client_side_leak(),
        unreleased_consumers = platform.unreleased_consumers(),
        "churn harness stopped"
    );
    gate.close().await;
    Ok(())
}
