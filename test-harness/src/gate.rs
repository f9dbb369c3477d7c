// Connection gate: one authenticated NATS connection shared by every loop.
use async_nats::{Client, ConnectOptions, Event, ServerAddr};
use churn_engine::ConnectionError;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;

pub struct ConnectionGate {
    client: Client,
    target: String,
    closed: watch::Receiver<bool>,
}

/// Split and validate a comma separated server list.
pub fn parse_targets(urls: &str) -> Result<Vec<ServerAddr>, ConnectionError> {
    let targets: Vec<ServerAddr> = urls
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| {
            url.parse::<ServerAddr>()
                .map_err(|err| ConnectionError::InvalidTarget(format!("{url}: {err}")))
        })
        .collect::<Result<_, _>>()?;
    if targets.is_empty() {
        return Err(ConnectionError::InvalidTarget(urls.to_string()));
    }
    Ok(targets)
}

impl ConnectionGate {
    /// Connect with unbounded reconnects and a fixed wait between attempts.
    ///
    /// Fails when the initial connection cannot be made; later outages are
    /// handled by the client's reconnect policy and surface through
    /// [`ConnectionGate::closed`] only once the client gives up for good.
    pub async fn connect(config: &HarnessConfig) -> Result<Self, ConnectionError> {
        let targets = parse_targets(&config.nats_url)?;
        let (closed_tx, closed) = watch::channel(false);
        let reconnect_wait = config.reconnect_wait();

        let mut options = ConnectOptions::new()
            .name("churn-harness")
            .connection_timeout(config.connect_timeout())
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .event_callback(move |event| {
                let closed_tx = closed_tx.clone();
                async move { on_event(event, &closed_tx) }
            });
        if let Some(credentials) = &config.credentials {
            options =
                options.user_and_password(credentials.user.clone(), credentials.password.clone());
        }

        let client = options
            .connect(targets.as_slice())
            .await
            .map_err(|err| ConnectionError::Connect {
                target: config.nats_url.clone(),
                source: err.into(),
            })?;
        let server = client.server_info();
        info!(
            host = %server.host,
            port = server.port,
            server_name = %server.server_name,
            version = %server.version,
            "connected to NATS"
        );
        Ok(Self {
            client,
            target: config.nats_url.clone(),
            closed,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Resolves once the connection is permanently closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Flush buffered publishes before the process exits.
    pub async fn close(self) {
        let flush = self.client.flush();
        match tokio::time::timeout(Duration::from_secs(5), flush).await {
            Ok(Ok(())) => info!(servers = %self.target, "connection flushed"),
            Ok(Err(err)) => warn!(error = %err, "flush on shutdown failed"),
            Err(_) => warn!("flush on shutdown timed out"),
        }
    }
}

fn on_event(event: Event, closed_tx: &watch::Sender<bool>) {
    match event {
        Event::Connected => info!("NATS connection (re)established"),
        Event::Disconnected => warn!("NATS connection lost; reconnecting"),
        Event::Closed => {
            warn!("NATS connection closed");
            let _ = closed_tx.send(true);
        }
        other => debug!(event = %other, "NATS client event"),
    }
}
