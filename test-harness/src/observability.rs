//! Tracing and metrics setup for the harness process.
//!
//! Log output goes through a `tracing_subscriber` registry filtered by
//! `RUST_LOG` (default `info`). Spans are additionally exported over OTLP when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set; that export is best-effort and a
//! failure leaves local logging in place. The Prometheus recorder backs the
//! `churn_*` gauges the reporter updates, and `serve_metrics` exposes them next
//! to `/live` and `/ready` probes.

use axum::http::StatusCode;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace as sdktrace;
use std::net::SocketAddr;
use std::sync::Arc;
#[cfg(test)]
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Flipped once the platform answered and the stream exists; `/ready`
/// reports 503 until then.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Installs the global subscriber and the Prometheus recorder.
///
/// Returns the handle `serve_metrics` renders from. Call once per process.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    let provider = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .and_then(|_| build_tracer_provider(service_name));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Some(provider) = provider {
        let tracer = provider.tracer(service_name.to_string());
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        init_subscriber(registry.with(otel_layer));
    } else {
        init_subscriber(registry);
    }

    install_metrics_recorder()
}

fn build_tracer_provider(service_name: &str) -> Option<opentelemetry_sdk::trace::TracerProvider> {
    let resource = Resource::new(resource_attributes(service_name));
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(sdktrace::Config::default().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .ok()
}

// Several harness instances usually run side by side; the instance id tells
// their spans apart.
fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    if let Ok(value) =
        std::env::var("CHURN_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"))
    {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    if let Ok(value) = std::env::var("CHURN_MODE") {
        attrs.push(KeyValue::new("churn.mode", value));
    }
    if let Ok(value) = std::env::var("K8S_NAMESPACE_NAME") {
        attrs.push(KeyValue::new("k8s.namespace.name", value));
    }
    if let Ok(value) = std::env::var("K8S_POD_NAME") {
        attrs.push(KeyValue::new("k8s.pod.name", value));
    }
    if let Ok(value) = std::env::var("DEPLOYMENT_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", value));
    }
    attrs
}

fn router(handle: PrometheusHandle, readiness: Readiness) -> axum::Router {
    axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/live", axum::routing::get(|| async { "ok" }))
        .route(
            "/ready",
            axum::routing::get(move || async move {
                if readiness.is_ready() {
                    (StatusCode::OK, "ok")
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, "not ready")
                }
            }),
        )
}

/// Serves `/metrics`, `/live` and `/ready` on `addr` until the task is dropped.
pub async fn serve_metrics(
    handle: PrometheusHandle,
    readiness: Readiness,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listener started");
    axum::serve(listener, router(handle, readiness).into_make_service()).await
}

fn install_metrics_recorder() -> PrometheusHandle {
    #[cfg(test)]
    {
        if let Some(handle) = METRICS_HANDLE.get() {
            return handle.clone();
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("install metrics recorder");
        let _ = METRICS_HANDLE.set(handle.clone());
        handle
    }
    #[cfg(not(test))]
    {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install metrics recorder")
    }
}

fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    #[cfg(test)]
    {
        let _ = subscriber.try_init();
    }
    #[cfg(not(test))]
    {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    fn has(attrs: &[KeyValue], key: &str) -> bool {
        attrs.iter().any(|kv| kv.key.as_str() == key)
    }

    #[test]
    #[serial]
    fn resource_attributes_include_instance_and_mode() {
        let _g1 = EnvGuard::set("CHURN_SERVICE_INSTANCE_ID", "harness-3");
        let _g2 = EnvGuard::set("CHURN_MODE", "publisher");
        let _g3 = EnvGuard::set("K8S_NAMESPACE_NAME", "load");
        let _g4 = EnvGuard::set("K8S_POD_NAME", "harness-3-abcde");
        let _g5 = EnvGuard::set("DEPLOYMENT_ENVIRONMENT", "staging");

        let attrs = resource_attributes("churn-harness");
        assert!(has(&attrs, "service.name"));
        assert!(
            attrs
                .iter()
                .any(|kv| kv.key.as_str() == "service.instance.id"
                    && kv.value.as_str() == "harness-3")
        );
        assert!(has(&attrs, "churn.mode"));
        assert!(has(&attrs, "k8s.namespace.name"));
        assert!(has(&attrs, "k8s.pod.name"));
        assert!(has(&attrs, "deployment.environment"));
    }

    #[test]
    #[serial]
    fn resource_attributes_minimal_when_env_missing() {
        let _g1 = EnvGuard::unset("CHURN_SERVICE_INSTANCE_ID");
        let _g2 = EnvGuard::unset("HOSTNAME");
        let _g3 = EnvGuard::unset("CHURN_MODE");
        let _g4 = EnvGuard::unset("K8S_NAMESPACE_NAME");
        let _g5 = EnvGuard::unset("K8S_POD_NAME");
        let _g6 = EnvGuard::unset("DEPLOYMENT_ENVIRONMENT");

        let attrs = resource_attributes("churn-harness");
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].key.as_str(), "service.name");
    }

    #[test]
    #[serial]
    fn resource_attributes_fall_back_to_hostname() {
        let _g1 = EnvGuard::unset("CHURN_SERVICE_INSTANCE_ID");
        let _g2 = EnvGuard::set("HOSTNAME", "box-7");

        let attrs = resource_attributes("churn-harness");
        assert!(
            attrs
                .iter()
                .any(|kv| kv.key.as_str() == "service.instance.id"
                    && kv.value.as_str() == "box-7")
        );
    }

    #[test]
    fn readiness_flag_toggles() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
        let shared = readiness.clone();
        shared.mark_ready();
        assert!(readiness.is_ready());
        shared.mark_not_ready();
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    #[serial]
    async fn endpoints_reflect_readiness() {
        let _otlp = EnvGuard::unset(OTLP_ENDPOINT_ENV);
        let handle = init_observability("churn-harness-test");
        let readiness = Readiness::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = router(handle, readiness.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.ok();
        });

        let base = format!("http://{addr}");
        let metrics = reqwest::get(format!("{base}/metrics"))
            .await
            .expect("metrics");
        assert_eq!(metrics.status(), 200);
        let live = reqwest::get(format!("{base}/live")).await.expect("live");
        assert_eq!(live.status(), 200);
        assert_eq!(live.text().await.expect("body"), "ok");

        let ready = reqwest::get(format!("{base}/ready")).await.expect("ready");
        assert_eq!(ready.status(), 503);
        readiness.mark_ready();
        let ready = reqwest::get(format!("{base}/ready")).await.expect("ready");
        assert_eq!(ready.status(), 200);
    }

    #[test]
    #[serial]
    fn metrics_recorder_is_cached_in_tests() {
        let first = install_metrics_recorder();
        let second = install_metrics_recorder();
        assert_eq!(first.render(), second.render());
    }
}
