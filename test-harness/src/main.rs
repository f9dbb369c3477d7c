// Churn harness entry point.
use anyhow::Result;
use churn_harness::config::{HarnessConfig, Mode};
use churn_harness::{app, observability};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "churn-harness")]
#[command(about = "Churns ephemeral JetStream consumers and reports leaks")]
struct Args {
    /// YAML file overriding environment configuration
    #[arg(long)]
    config: Option<String>,

    /// Workload to run; overrides CHURN_MODE
    #[arg(long, value_enum)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let metrics_handle = observability::init_observability("churn-harness");

    let mut config = HarnessConfig::from_env_or_yaml(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let readiness = observability::Readiness::new();
    if let Some(addr) = config.metrics_bind {
        let readiness = readiness.clone();
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(metrics_handle, readiness, addr).await {
                tracing::warn!(error = %err, "metrics server exited");
            }
        });
    }

    app::run_with_shutdown(config, readiness, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
