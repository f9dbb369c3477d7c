use anyhow::{Context, Result, bail};
use churn_engine::{
    EngineConfig, LifecycleTiming, Retention, RetryPolicy, StreamSpec, SubjectSpace, TrafficConfig,
};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Which half of the workload this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Churn consumer lifecycle loops.
    Consumer,
    /// Only publish synthetic traffic.
    Publisher,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "consumer" => Ok(Mode::Consumer),
            "publisher" => Ok(Mode::Publisher),
            other => bail!("unknown mode {other:?} (expected consumer or publisher)"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Consumer => f.write_str("consumer"),
            Mode::Publisher => f.write_str("publisher"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

// Harness configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    // Comma separated NATS server URLs.
    pub nats_url: String,
    pub credentials: Option<Credentials>,
    pub mode: Mode,
    // Stream every consumer attaches to.
    pub stream_name: String,
    pub subject_prefix: String,
    pub subject_groups: usize,
    pub keys_per_group: usize,
    // Number of consumer lifecycle loops.
    pub concurrency: usize,
    // How long each consumer stays attached.
    pub consumer_lifetime_ms: u64,
    // Pause between destroy and the next create.
    pub reconnect_delay_ms: u64,
    pub publish_interval_ms: u64,
    pub publish_batch: usize,
    // Also publish from a consumer-mode process.
    pub inline_traffic: bool,
    pub report_interval_ms: u64,
    pub ready_max_attempts: u32,
    pub ready_interval_ms: u64,
    pub provision_max_attempts: u32,
    pub provision_retry_ms: u64,
    pub stream_replicas: usize,
    pub stream_max_age_secs: u64,
    pub stream_max_bytes: i64,
    // Fixed wait between client reconnect attempts.
    pub reconnect_wait_ms: u64,
    pub connect_timeout_ms: u64,
    // Metrics HTTP listener; disabled when unset.
    pub metrics_bind: Option<SocketAddr>,
}

const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_STREAM_NAME: &str = "CHURN";
const DEFAULT_SUBJECT_PREFIX: &str = "churn";
const DEFAULT_SUBJECT_GROUPS: usize = 16;
const DEFAULT_KEYS_PER_GROUP: usize = 64;
const DEFAULT_CONCURRENCY: usize = 50;
const DEFAULT_CONSUMER_LIFETIME_MS: u64 = 5000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 100;
const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 1000;
const DEFAULT_PUBLISH_BATCH: usize = 20;
const DEFAULT_REPORT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_READY_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_READY_INTERVAL_MS: u64 = 1000;
const DEFAULT_PROVISION_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_PROVISION_RETRY_MS: u64 = 2000;
const DEFAULT_STREAM_REPLICAS: usize = 1;
const DEFAULT_STREAM_MAX_AGE_SECS: u64 = 3600;
const DEFAULT_STREAM_MAX_BYTES: i64 = 256 * 1024 * 1024;
const DEFAULT_RECONNECT_WAIT_MS: u64 = 2000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

pub const CONFIG_PATH_ENV: &str = "CHURN_HARNESS_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HarnessConfigOverride {
    nats_url: Option<String>,
    nats_user: Option<String>,
    nats_password: Option<String>,
    mode: Option<String>,
    stream_name: Option<String>,
    subject_prefix: Option<String>,
    subject_groups: Option<usize>,
    keys_per_group: Option<usize>,
    concurrency: Option<usize>,
    consumer_lifetime_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    publish_interval_ms: Option<u64>,
    publish_batch: Option<usize>,
    inline_traffic: Option<bool>,
    report_interval_ms: Option<u64>,
    ready_max_attempts: Option<u32>,
    ready_interval_ms: Option<u64>,
    provision_max_attempts: Option<u32>,
    provision_retry_ms: Option<u64>,
    stream_replicas: Option<usize>,
    stream_max_age_secs: Option<u64>,
    stream_max_bytes: Option<i64>,
    reconnect_wait_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    metrics_bind: Option<String>,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_positive<T>(key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self> {
        let mode = match std::env::var("CHURN_MODE") {
            Ok(value) if !value.trim().is_empty() => {
                value.parse().with_context(|| "parse CHURN_MODE")?
            }
            _ => Mode::Consumer,
        };
        let user = std::env::var("NATS_USER").ok().filter(|value| !value.is_empty());
        let password = std::env::var("NATS_PASSWORD")
            .ok()
            .filter(|value| !value.is_empty());
        let credentials = match (user, password) {
            (Some(user), Some(password)) => Some(Credentials { user, password }),
            (Some(_), None) | (None, Some(_)) => {
                bail!("NATS_USER and NATS_PASSWORD must be set together")
            }
            (None, None) => None,
        };
        let metrics_bind = match std::env::var("CHURN_METRICS_BIND") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse()
                    .with_context(|| "parse CHURN_METRICS_BIND")?,
            ),
            _ => None,
        };
        Ok(Self {
            nats_url: env_string("NATS_URL", DEFAULT_NATS_URL),
            credentials,
            mode,
            stream_name: env_string("CHURN_STREAM_NAME", DEFAULT_STREAM_NAME),
            subject_prefix: env_string("CHURN_SUBJECT_PREFIX", DEFAULT_SUBJECT_PREFIX),
            subject_groups: env_positive("CHURN_SUBJECT_GROUPS", DEFAULT_SUBJECT_GROUPS),
            keys_per_group: env_positive("CHURN_KEYS_PER_GROUP", DEFAULT_KEYS_PER_GROUP),
            concurrency: env_positive("CHURN_CONCURRENCY", DEFAULT_CONCURRENCY),
            consumer_lifetime_ms: env_positive(
                "CHURN_CONSUMER_LIFETIME_MS",
                DEFAULT_CONSUMER_LIFETIME_MS,
            ),
            reconnect_delay_ms: env_positive("CHURN_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS),
            publish_interval_ms: env_positive(
                "CHURN_PUBLISH_INTERVAL_MS",
                DEFAULT_PUBLISH_INTERVAL_MS,
            ),
            publish_batch: env_positive("CHURN_PUBLISH_BATCH", DEFAULT_PUBLISH_BATCH),
            inline_traffic: env_flag("CHURN_INLINE_TRAFFIC"),
            report_interval_ms: env_positive("CHURN_REPORT_INTERVAL_MS", DEFAULT_REPORT_INTERVAL_MS),
            ready_max_attempts: env_positive("CHURN_READY_MAX_ATTEMPTS", DEFAULT_READY_MAX_ATTEMPTS),
            ready_interval_ms: env_positive("CHURN_READY_INTERVAL_MS", DEFAULT_READY_INTERVAL_MS),
            provision_max_attempts: env_positive(
                "CHURN_PROVISION_MAX_ATTEMPTS",
                DEFAULT_PROVISION_MAX_ATTEMPTS,
            ),
            provision_retry_ms: env_positive("CHURN_PROVISION_RETRY_MS", DEFAULT_PROVISION_RETRY_MS),
            stream_replicas: env_positive("CHURN_STREAM_REPLICAS", DEFAULT_STREAM_REPLICAS),
            stream_max_age_secs: env_positive(
                "CHURN_STREAM_MAX_AGE_SECS",
                DEFAULT_STREAM_MAX_AGE_SECS,
            ),
            stream_max_bytes: env_positive("CHURN_STREAM_MAX_BYTES", DEFAULT_STREAM_MAX_BYTES),
            reconnect_wait_ms: env_positive("CHURN_RECONNECT_WAIT_MS", DEFAULT_RECONNECT_WAIT_MS),
            connect_timeout_ms: env_positive("CHURN_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            metrics_bind,
        })
    }

    /// Environment first, then the YAML file at `path` (or `CHURN_HARNESS_CONFIG`)
    /// overrides individual keys.
    pub fn from_env_or_yaml(path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env()?;
        let path = match path {
            Some(path) => Some(path.to_string()),
            None => std::env::var(CONFIG_PATH_ENV).ok(),
        };
        if let Some(path) = path {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read harness config: {path}"))?;
            let override_cfg: HarnessConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse harness config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: HarnessConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.nats_url
            && !value.trim().is_empty()
        {
            self.nats_url = value;
        }
        match (override_cfg.nats_user, override_cfg.nats_password) {
            (Some(user), Some(password)) => self.credentials = Some(Credentials { user, password }),
            (Some(_), None) | (None, Some(_)) => {
                bail!("nats_user and nats_password must be set together")
            }
            (None, None) => {}
        }
        if let Some(value) = override_cfg.mode {
            self.mode = value.parse().with_context(|| "parse mode")?;
        }
        if let Some(value) = override_cfg.stream_name
            && !value.trim().is_empty()
        {
            self.stream_name = value;
        }
        if let Some(value) = override_cfg.subject_prefix
            && !value.trim().is_empty()
        {
            self.subject_prefix = value;
        }
        if let Some(value) = override_cfg.subject_groups
            && value > 0
        {
            self.subject_groups = value;
        }
        if let Some(value) = override_cfg.keys_per_group
            && value > 0
        {
            self.keys_per_group = value;
        }
        if let Some(value) = override_cfg.concurrency
            && value > 0
        {
            self.concurrency = value;
        }
        if let Some(value) = override_cfg.consumer_lifetime_ms
            && value > 0
        {
            self.consumer_lifetime_ms = value;
        }
        if let Some(value) = override_cfg.reconnect_delay_ms
            && value > 0
        {
            self.reconnect_delay_ms = value;
        }
        if let Some(value) = override_cfg.publish_interval_ms
            && value > 0
        {
            self.publish_interval_ms = value;
        }
        if let Some(value) = override_cfg.publish_batch
            && value > 0
        {
            self.publish_batch = value;
        }
        if let Some(value) = override_cfg.inline_traffic {
            self.inline_traffic = value;
        }
        if let Some(value) = override_cfg.report_interval_ms
            && value > 0
        {
            self.report_interval_ms = value;
        }
        if let Some(value) = override_cfg.ready_max_attempts
            && value > 0
        {
            self.ready_max_attempts = value;
        }
        if let Some(value) = override_cfg.ready_interval_ms
            && value > 0
        {
            self.ready_interval_ms = value;
        }
        if let Some(value) = override_cfg.provision_max_attempts
            && value > 0
        {
            self.provision_max_attempts = value;
        }
        if let Some(value) = override_cfg.provision_retry_ms
            && value > 0
        {
            self.provision_retry_ms = value;
        }
        if let Some(value) = override_cfg.stream_replicas
            && value > 0
        {
            self.stream_replicas = value;
        }
        if let Some(value) = override_cfg.stream_max_age_secs
            && value > 0
        {
            self.stream_max_age_secs = value;
        }
        if let Some(value) = override_cfg.stream_max_bytes
            && value > 0
        {
            self.stream_max_bytes = value;
        }
        if let Some(value) = override_cfg.reconnect_wait_ms
            && value > 0
        {
            self.reconnect_wait_ms = value;
        }
        if let Some(value) = override_cfg.connect_timeout_ms
            && value > 0
        {
            self.connect_timeout_ms = value;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        Ok(())
    }

    pub fn subjects(&self) -> SubjectSpace {
        SubjectSpace::new(
            self.subject_prefix.clone(),
            self.subject_groups,
            self.keys_per_group,
        )
    }

    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec {
            name: self.stream_name.clone(),
            subjects: vec![self.subjects().stream_filter()],
            retention: Retention::Limits,
            max_bytes: self.stream_max_bytes,
            max_age: Duration::from_secs(self.stream_max_age_secs),
            max_messages_per_subject: 1,
            replicas: self.stream_replicas,
        }
    }

    pub fn provision_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.provision_max_attempts,
            delay: Duration::from_millis(self.provision_retry_ms),
        }
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Engine layout for the configured mode. Publisher mode runs no
    /// lifecycle loops; consumer mode publishes only with `inline_traffic`.
    pub fn engine_config(&self) -> EngineConfig {
        let traffic = TrafficConfig {
            interval: Duration::from_millis(self.publish_interval_ms),
            batch_size: self.publish_batch,
        };
        let (concurrency, traffic) = match self.mode {
            Mode::Consumer => (self.concurrency, self.inline_traffic.then_some(traffic)),
            Mode::Publisher => (0, Some(traffic)),
        };
        EngineConfig {
            stream: self.stream_name.clone(),
            subjects: self.subjects(),
            concurrency,
            timing: LifecycleTiming {
                lifetime: Duration::from_millis(self.consumer_lifetime_ms),
                cooldown: Duration::from_millis(self.reconnect_delay_ms),
            },
            traffic,
            report_interval: Some(Duration::from_millis(self.report_interval_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: &[&str] = &[
        "NATS_URL",
        "NATS_USER",
        "NATS_PASSWORD",
        "CHURN_MODE",
        "CHURN_STREAM_NAME",
        "CHURN_SUBJECT_PREFIX",
        "CHURN_SUBJECT_GROUPS",
        "CHURN_KEYS_PER_GROUP",
        "CHURN_CONCURRENCY",
        "CHURN_CONSUMER_LIFETIME_MS",
        "CHURN_RECONNECT_DELAY_MS",
        "CHURN_PUBLISH_INTERVAL_MS",
        "CHURN_PUBLISH_BATCH",
        "CHURN_INLINE_TRAFFIC",
        "CHURN_REPORT_INTERVAL_MS",
        "CHURN_READY_MAX_ATTEMPTS",
        "CHURN_READY_INTERVAL_MS",
        "CHURN_PROVISION_MAX_ATTEMPTS",
        "CHURN_PROVISION_RETRY_MS",
        "CHURN_STREAM_REPLICAS",
        "CHURN_STREAM_MAX_AGE_SECS",
        "CHURN_STREAM_MAX_BYTES",
        "CHURN_RECONNECT_WAIT_MS",
        "CHURN_CONNECT_TIMEOUT_MS",
        "CHURN_METRICS_BIND",
        CONFIG_PATH_ENV,
    ];

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

    fn clean_env() -> Vec<EnvGuard> {
        ENV_KEYS.iter().map(|key| EnvGuard::unset(key)).collect()
    }

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write yaml");
        file
    }

    #[test]
    #[serial]
    fn defaults_when_env_is_empty() {
        let _env = clean_env();
        let config = HarnessConfig::from_env().expect("config");
        assert_eq!(config.nats_url, DEFAULT_NATS_URL);
        assert!(config.credentials.is_none());
        assert_eq!(config.mode, Mode::Consumer);
        assert_eq!(config.stream_name, "CHURN");
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.consumer_lifetime_ms, 5000);
        assert_eq!(config.reconnect_delay_ms, 100);
        assert_eq!(config.ready_max_attempts, 30);
        assert_eq!(config.provision_max_attempts, 5);
        assert_eq!(config.stream_max_bytes, 256 * 1024 * 1024);
        assert!(!config.inline_traffic);
        assert!(config.metrics_bind.is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_and_zero_falls_back() {
        let _env = clean_env();
        let _g1 = EnvGuard::set("CHURN_CONCURRENCY", "8");
        let _g2 = EnvGuard::set("CHURN_CONSUMER_LIFETIME_MS", "0");
        let _g3 = EnvGuard::set("CHURN_RECONNECT_DELAY_MS", "not-a-number");
        let _g4 = EnvGuard::set("CHURN_MODE", "Publisher");
        let _g5 = EnvGuard::set("NATS_USER", "churn");
        let _g6 = EnvGuard::set("NATS_PASSWORD", "secret");
        let _g7 = EnvGuard::set("CHURN_METRICS_BIND", "127.0.0.1:9100");
        let _g8 = EnvGuard::set("CHURN_INLINE_TRAFFIC", "yes");

        let config = HarnessConfig::from_env().expect("config");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.consumer_lifetime_ms, DEFAULT_CONSUMER_LIFETIME_MS);
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.mode, Mode::Publisher);
        assert!(config.inline_traffic);
        assert_eq!(
            config.metrics_bind,
            Some("127.0.0.1:9100".parse().expect("addr"))
        );
        let credentials = config.credentials.expect("credentials");
        assert_eq!(credentials.user, "churn");
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[test]
    #[serial]
    fn invalid_mode_and_bind_are_errors() {
        let _env = clean_env();
        {
            let _mode = EnvGuard::set("CHURN_MODE", "observer");
            assert!(HarnessConfig::from_env().is_err());
        }
        let _bind = EnvGuard::set("CHURN_METRICS_BIND", "localhost");
        assert!(HarnessConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn env_credentials_must_come_in_pairs() {
        let _env = clean_env();
        {
            let _user = EnvGuard::set("NATS_USER", "churn");
            let err = HarnessConfig::from_env().expect_err("user without password");
            assert!(err.to_string().contains("NATS_PASSWORD"));
        }
        {
            let _password = EnvGuard::set("NATS_PASSWORD", "secret");
            assert!(HarnessConfig::from_env().is_err());
        }
        let _user = EnvGuard::set("NATS_USER", "");
        let _password = EnvGuard::set("NATS_PASSWORD", "");
        let config = HarnessConfig::from_env().expect("empty pair means no auth");
        assert!(config.credentials.is_none());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        let _env = clean_env();
        let _g1 = EnvGuard::set("CHURN_CONCURRENCY", "8");
        let file = yaml_file(
            "concurrency: 12\nconsumer_lifetime_ms: 0\nmode: publisher\nstream_name: LOAD\nmetrics_bind: 127.0.0.1:9200\n",
        );
        let path = file.path().to_str().expect("utf8 path");

        let config = HarnessConfig::from_env_or_yaml(Some(path)).expect("config");
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.consumer_lifetime_ms, DEFAULT_CONSUMER_LIFETIME_MS);
        assert_eq!(config.mode, Mode::Publisher);
        assert_eq!(config.stream_name, "LOAD");
        assert_eq!(
            config.metrics_bind,
            Some("127.0.0.1:9200".parse().expect("addr"))
        );
    }

    #[test]
    #[serial]
    fn yaml_path_from_env() {
        let _env = clean_env();
        let file = yaml_file("subject_prefix: load\nsubject_groups: 4\n");
        let _g1 = EnvGuard::set(CONFIG_PATH_ENV, file.path().to_str().expect("utf8 path"));

        let config = HarnessConfig::from_env_or_yaml(None).expect("config");
        assert_eq!(config.subject_prefix, "load");
        assert_eq!(config.subjects().slot_filter(5), "load.1.>");
    }

    #[test]
    #[serial]
    fn yaml_rejects_unknown_keys_and_half_credentials() {
        let _env = clean_env();
        let unknown = yaml_file("concurency: 3\n");
        assert!(HarnessConfig::from_env_or_yaml(unknown.path().to_str()).is_err());
        let half = yaml_file("nats_user: churn\n");
        assert!(HarnessConfig::from_env_or_yaml(half.path().to_str()).is_err());
        assert!(HarnessConfig::from_env_or_yaml(Some("/nonexistent/churn.yaml")).is_err());
    }

    #[test]
    #[serial]
    fn engine_layout_follows_mode() {
        let _env = clean_env();
        let mut config = HarnessConfig::from_env().expect("config");
        let consumer = config.engine_config();
        assert_eq!(consumer.concurrency, 50);
        assert!(consumer.traffic.is_none());
        assert_eq!(consumer.timing.lifetime, Duration::from_millis(5000));
        assert_eq!(consumer.timing.cooldown, Duration::from_millis(100));

        config.mode = Mode::Publisher;
        let publisher = config.engine_config();
        assert_eq!(publisher.concurrency, 0);
        let traffic = publisher.traffic.expect("traffic");
        assert_eq!(traffic.batch_size, 20);
        assert_eq!(traffic.interval, Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn stream_spec_keeps_one_message_per_subject() {
        let _env = clean_env();
        let config = HarnessConfig::from_env().expect("config");
        let spec = config.stream_spec();
        assert_eq!(spec.name, "CHURN");
        assert_eq!(spec.subjects, vec!["churn.>".to_string()]);
        assert_eq!(spec.max_messages_per_subject, 1);
        assert_eq!(spec.max_age, Duration::from_secs(3600));
        assert_eq!(spec.replicas, 1);
        assert_eq!(config.provision_policy().max_attempts, 5);
    }
}
