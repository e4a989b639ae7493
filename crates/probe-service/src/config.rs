//! Probe configuration.
//!
//! Configuration is read from a `.properties` file and validated eagerly into
//! a typed [`Config`]. Keys the probe does not recognise are Kafka client
//! properties and are passed through to librdkafka. The basic authentication
//! password is redacted in Debug output. Certificate and key files for the
//! TLS listener must exist when TLS is enabled.

use common::properties::{self, PropertiesError};
use common::secret::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default delay before the first beacon.
pub const DEFAULT_DELAY_MS: u64 = 0;

/// Default interval between beacon rounds.
pub const DEFAULT_PERIOD_MS: u64 = 10_000;

/// Default interval between partition metadata refreshes.
pub const DEFAULT_PARTITION_REFRESH_INTERVAL_MS: u64 = 10_000;

/// Default consumer poll timeout.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;

const ID: &str = "id";
const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
const TOPIC: &str = "topic";
const DELAY_MS: &str = "delay.ms";
const PERIOD_MS: &str = "period.ms";
const METRIC_EXPIRATION_PERIOD_MS: &str = "metric.expiration.period.ms";
const LOG_RESPONSES: &str = "log.responses";
const HTTP_SERVER_ADDRESS: &str = "http.server.address";
const HTTP_SERVER_PORT: &str = "http.server.port";
const BASIC_AUTH_ENABLED: &str = "http.server.basic.authentication.enabled";
const BASIC_AUTH_USERNAME: &str = "http.server.basic.authentication.username";
const BASIC_AUTH_PASSWORD: &str = "http.server.basic.authentication.password";
const SSL_ENABLED: &str = "http.server.ssl.enabled";
const SSL_CERTIFICATE_PATH: &str = "http.server.ssl.certificate.path";
const SSL_KEY_PATH: &str = "http.server.ssl.key.path";
const PARTITION_REFRESH_INTERVAL_MS: &str = "partition.refresh.interval.ms";
const POLL_TIMEOUT_MS: &str = "poll.timeout.ms";

/// Keys consumed by the probe itself. `bootstrap.servers` is not listed: it
/// is also a client property.
const PROBE_KEYS: &[&str] = &[
    ID,
    TOPIC,
    DELAY_MS,
    PERIOD_MS,
    METRIC_EXPIRATION_PERIOD_MS,
    LOG_RESPONSES,
    HTTP_SERVER_ADDRESS,
    HTTP_SERVER_PORT,
    BASIC_AUTH_ENABLED,
    BASIC_AUTH_USERNAME,
    BASIC_AUTH_PASSWORD,
    SSL_ENABLED,
    SSL_CERTIFICATE_PATH,
    SSL_KEY_PATH,
    PARTITION_REFRESH_INTERVAL_MS,
    POLL_TIMEOUT_MS,
];

/// Client properties librdkafka only understands on a producer.
const PRODUCER_ONLY_KEYS: &[&str] = &[
    "acks",
    "request.required.acks",
    "linger.ms",
    "queue.buffering.max.ms",
    "queue.buffering.max.messages",
    "queue.buffering.max.kbytes",
    "batch.size",
    "batch.num.messages",
    "compression.type",
    "compression.codec",
    "compression.level",
    "retries",
    "message.send.max.retries",
    "retry.backoff.ms",
    "enable.idempotence",
    "transactional.id",
    "transaction.timeout.ms",
    "delivery.timeout.ms",
    "message.timeout.ms",
    "request.timeout.ms",
    "partitioner",
    "sticky.partitioning.linger.ms",
];

/// Client properties librdkafka only understands on a consumer.
const CONSUMER_ONLY_KEYS: &[&str] = &[
    "group.id",
    "group.instance.id",
    "session.timeout.ms",
    "heartbeat.interval.ms",
    "max.poll.interval.ms",
    "partition.assignment.strategy",
    "auto.offset.reset",
    "enable.auto.commit",
    "auto.commit.interval.ms",
    "enable.auto.offset.store",
    "enable.partition.eof",
    "fetch.min.bytes",
    "fetch.max.bytes",
    "fetch.wait.max.ms",
    "max.partition.fetch.bytes",
    "queued.min.messages",
    "queued.max.messages.kbytes",
    "isolation.level",
    "check.crcs",
];

/// Credentials for HTTP basic authentication on the scrape endpoint.
#[derive(Clone)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: SecretString,
}

impl BasicAuthCredentials {
    /// Whether `username`/`password` match these credentials.
    ///
    /// Both comparisons always run and are constant time.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = common::secret::constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = common::secret::constant_time_eq(
            self.password.expose_secret().as_bytes(),
            password.as_bytes(),
        );
        user_ok & pass_ok
    }
}

impl fmt::Debug for BasicAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// PEM files for serving the scrape endpoint over HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Certificate chain, leaf first.
    pub certificate_path: PathBuf,
    /// PKCS#8, PKCS#1 or SEC1 private key.
    pub key_path: PathBuf,
}

/// Probe configuration.
#[derive(Clone)]
pub struct Config {
    /// Probe instance identifier; tags every beacon and labels every sample.
    pub id: String,

    /// Kafka bootstrap servers, also the `bootstrap_servers` gauge label.
    pub bootstrap_servers: String,

    /// Topic the beacons travel through.
    pub topic: String,

    /// Delay before the first beacon round in milliseconds (default: 0).
    pub delay_ms: u64,

    /// Interval between beacon rounds in milliseconds (default: 10000).
    /// Zero sends back to back.
    pub period_ms: u64,

    /// TTL of a latency sample in milliseconds.
    pub metric_expiration_period_ms: u64,

    /// Log every measured round trip at INFO.
    pub log_responses: bool,

    /// Scrape endpoint host (IP address or host name).
    pub http_server_address: String,

    /// Scrape endpoint port.
    pub http_server_port: u16,

    /// Basic authentication for `/metrics`, when enabled.
    pub basic_auth: Option<BasicAuthCredentials>,

    /// HTTPS for the scrape endpoint, when enabled.
    pub tls: Option<TlsSettings>,

    /// Interval between partition metadata refreshes in milliseconds.
    pub partition_refresh_interval_ms: u64,

    /// Consumer poll timeout in milliseconds.
    pub poll_timeout_ms: u64,

    /// Pass-through client properties, including `bootstrap.servers`.
    pub kafka_properties: BTreeMap<String, String>,
}

/// Custom Debug implementation that redacts the basic auth password.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("topic", &self.topic)
            .field("delay_ms", &self.delay_ms)
            .field("period_ms", &self.period_ms)
            .field(
                "metric_expiration_period_ms",
                &self.metric_expiration_period_ms,
            )
            .field("log_responses", &self.log_responses)
            .field("http_server_address", &self.http_server_address)
            .field("http_server_port", &self.http_server_port)
            .field("basic_auth", &self.basic_auth)
            .field("tls", &self.tls)
            .field(
                "partition_refresh_interval_ms",
                &self.partition_refresh_interval_ms,
            )
            .field("poll_timeout_ms", &self.poll_timeout_ms)
            .field(
                "kafka_properties",
                &self
                    .kafka_properties
                    .iter()
                    .map(|(key, value)| (key.as_str(), masked(key, value)))
                    .collect::<BTreeMap<_, _>>(),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required property {0}")]
    MissingProperty(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error(transparent)]
    Properties(#[from] PropertiesError),
}

impl Config {
    /// Load configuration from a `.properties` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if
    /// its content does not validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_vars(&properties::load(path)?)
    }

    /// Build configuration from parsed properties.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing required key or an invalid value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let id = required(vars, ID)?;
        let bootstrap_servers = required(vars, BOOTSTRAP_SERVERS)?;
        let topic = required(vars, TOPIC)?;

        let delay_ms = optional_u64(vars, DELAY_MS, DEFAULT_DELAY_MS)?;
        let period_ms = optional_u64(vars, PERIOD_MS, DEFAULT_PERIOD_MS)?;

        let metric_expiration_period_ms = parse_u64(
            METRIC_EXPIRATION_PERIOD_MS,
            &required(vars, METRIC_EXPIRATION_PERIOD_MS)?,
        )?;
        positive(METRIC_EXPIRATION_PERIOD_MS, metric_expiration_period_ms)?;

        let log_responses = optional_bool(vars, LOG_RESPONSES, false)?;

        let http_server_address = required(vars, HTTP_SERVER_ADDRESS)?;
        if http_server_address.parse::<IpAddr>().is_err() && !is_valid_hostname(&http_server_address)
        {
            return Err(ConfigError::InvalidValue {
                key: HTTP_SERVER_ADDRESS.to_string(),
                reason: format!("'{http_server_address}' is neither an IP address nor a host name"),
            });
        }

        let port_str = required(vars, HTTP_SERVER_PORT)?;
        let http_server_port: u16 = port_str
            .parse()
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: HTTP_SERVER_PORT.to_string(),
                reason: format!("must be an integer in 1..=65535, got '{port_str}'"),
            })?;

        let basic_auth = if optional_bool(vars, BASIC_AUTH_ENABLED, false)? {
            Some(BasicAuthCredentials {
                username: required(vars, BASIC_AUTH_USERNAME)?,
                password: SecretString::from(required(vars, BASIC_AUTH_PASSWORD)?),
            })
        } else {
            None
        };

        let tls = if optional_bool(vars, SSL_ENABLED, false)? {
            Some(TlsSettings {
                certificate_path: existing_file(vars, SSL_CERTIFICATE_PATH)?,
                key_path: existing_file(vars, SSL_KEY_PATH)?,
            })
        } else {
            None
        };

        let partition_refresh_interval_ms = optional_u64(
            vars,
            PARTITION_REFRESH_INTERVAL_MS,
            DEFAULT_PARTITION_REFRESH_INTERVAL_MS,
        )?;
        positive(PARTITION_REFRESH_INTERVAL_MS, partition_refresh_interval_ms)?;

        let poll_timeout_ms = optional_u64(vars, POLL_TIMEOUT_MS, DEFAULT_POLL_TIMEOUT_MS)?;
        positive(POLL_TIMEOUT_MS, poll_timeout_ms)?;

        let kafka_properties = vars
            .iter()
            .filter(|(key, _)| !PROBE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Config {
            id,
            bootstrap_servers,
            topic,
            delay_ms,
            period_ms,
            metric_expiration_period_ms,
            log_responses,
            http_server_address,
            http_server_port,
            basic_auth,
            tls,
            partition_refresh_interval_ms,
            poll_timeout_ms,
            kafka_properties,
        })
    }

    /// Delay before the first beacon round.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Interval between beacon rounds.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Latency sample TTL.
    #[must_use]
    pub fn metric_expiration(&self) -> Duration {
        Duration::from_millis(self.metric_expiration_period_ms)
    }

    /// Partition refresh interval.
    #[must_use]
    pub fn partition_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.partition_refresh_interval_ms)
    }

    /// Consumer poll timeout.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Client properties for the beacon producer.
    ///
    /// Consumer-only keys are dropped; `acks=all` and `linger.ms=0` apply
    /// unless set explicitly.
    #[must_use]
    pub fn producer_properties(&self) -> BTreeMap<String, String> {
        let mut props = without(&self.kafka_properties, CONSUMER_ONLY_KEYS);
        props.entry("acks".to_string()).or_insert_with(|| "all".to_string());
        props.entry("linger.ms".to_string()).or_insert_with(|| "0".to_string());
        props
    }

    /// Client properties for the round trip consumer.
    ///
    /// Producer-only keys are dropped. Offsets are never committed and the
    /// group id defaults to the probe id.
    #[must_use]
    pub fn consumer_properties(&self) -> BTreeMap<String, String> {
        let mut props = without(&self.kafka_properties, PRODUCER_ONLY_KEYS);
        props.entry("group.id".to_string()).or_insert_with(|| self.id.clone());
        props
            .entry("enable.auto.commit".to_string())
            .or_insert_with(|| "false".to_string());
        props
            .entry("enable.partition.eof".to_string())
            .or_insert_with(|| "false".to_string());
        props
    }

    /// Every setting as `(key, value)` pairs for the startup banner, with the
    /// password masked.
    #[must_use]
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut lines = vec![
            (ID.to_string(), self.id.clone()),
            (BOOTSTRAP_SERVERS.to_string(), self.bootstrap_servers.clone()),
            (TOPIC.to_string(), self.topic.clone()),
            (DELAY_MS.to_string(), self.delay_ms.to_string()),
            (PERIOD_MS.to_string(), self.period_ms.to_string()),
            (
                METRIC_EXPIRATION_PERIOD_MS.to_string(),
                self.metric_expiration_period_ms.to_string(),
            ),
            (LOG_RESPONSES.to_string(), self.log_responses.to_string()),
            (HTTP_SERVER_ADDRESS.to_string(), self.http_server_address.clone()),
            (HTTP_SERVER_PORT.to_string(), self.http_server_port.to_string()),
            (
                BASIC_AUTH_ENABLED.to_string(),
                self.basic_auth.is_some().to_string(),
            ),
        ];
        if let Some(auth) = &self.basic_auth {
            lines.push((BASIC_AUTH_USERNAME.to_string(), auth.username.clone()));
            lines.push((BASIC_AUTH_PASSWORD.to_string(), "********".to_string()));
        }
        lines.push((SSL_ENABLED.to_string(), self.tls.is_some().to_string()));
        if let Some(tls) = &self.tls {
            lines.push((
                SSL_CERTIFICATE_PATH.to_string(),
                tls.certificate_path.display().to_string(),
            ));
            lines.push((SSL_KEY_PATH.to_string(), tls.key_path.display().to_string()));
        }
        lines.push((
            PARTITION_REFRESH_INTERVAL_MS.to_string(),
            self.partition_refresh_interval_ms.to_string(),
        ));
        lines.push((POLL_TIMEOUT_MS.to_string(), self.poll_timeout_ms.to_string()));
        lines.extend(
            self.kafka_properties
                .iter()
                .filter(|(key, _)| key.as_str() != BOOTSTRAP_SERVERS)
                .map(|(key, value)| (key.clone(), masked(key, value))),
        );
        lines
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ConfigError::MissingProperty(key.to_string()))
}

fn existing_file(vars: &HashMap<String, String>, key: &str) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(required(vars, key)?);
    if !path.is_file() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{}' is not a readable file", path.display()),
        });
    }
    Ok(path)
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("must be a non-negative integer, got '{value}': {e}"),
    })
}

fn optional_u64(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(value) => parse_u64(key, value),
        None => Ok(default),
    }
}

fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

fn optional_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = vars.get(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" => Ok(true),
        "false" | "f" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be true or false, got '{value}'"),
        }),
    }
}

fn without(props: &BTreeMap<String, String>, excluded: &[&str]) -> BTreeMap<String, String> {
    props
        .iter()
        .filter(|(key, _)| !excluded.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Client secrets such as `sasl.password` or `ssl.key.password`.
fn masked(key: &str, value: &str) -> String {
    if key.contains("password") || key.contains("secret") {
        "********".to_string()
    } else {
        value.to_string()
    }
}

/// RFC 1123 host name.
fn is_valid_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("id".to_string(), "probe-1".to_string()),
            ("bootstrap.servers".to_string(), "localhost:9092".to_string()),
            ("topic".to_string(), "latency".to_string()),
            ("metric.expiration.period.ms".to_string(), "30000".to_string()),
            ("http.server.address".to_string(), "0.0.0.0".to_string()),
            ("http.server.port".to_string(), "9999".to_string()),
        ])
    }

    fn with(key: &str, value: &str) -> HashMap<String, String> {
        let mut vars = base_vars();
        vars.insert(key.to_string(), value.to_string());
        vars
    }

    fn invalid_key(result: Result<Config, ConfigError>) -> String {
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => key,
            other => format!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.id, "probe-1");
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.topic, "latency");
        assert_eq!(config.delay_ms, DEFAULT_DELAY_MS);
        assert_eq!(config.period_ms, DEFAULT_PERIOD_MS);
        assert_eq!(config.metric_expiration_period_ms, 30_000);
        assert!(!config.log_responses);
        assert_eq!(config.http_server_address, "0.0.0.0");
        assert_eq!(config.http_server_port, 9999);
        assert!(config.basic_auth.is_none());
        assert_eq!(
            config.partition_refresh_interval_ms,
            DEFAULT_PARTITION_REFRESH_INTERVAL_MS
        );
        assert_eq!(config.poll_timeout_ms, DEFAULT_POLL_TIMEOUT_MS);
        assert_eq!(config.period(), Duration::from_secs(10));
        assert_eq!(config.metric_expiration(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_required_properties() {
        for key in [
            "id",
            "bootstrap.servers",
            "topic",
            "metric.expiration.period.ms",
            "http.server.address",
            "http.server.port",
        ] {
            let mut vars = base_vars();
            vars.remove(key);
            let result = Config::from_vars(&vars);
            assert!(
                matches!(&result, Err(ConfigError::MissingProperty(k)) if k == key),
                "{key}: {result:?}"
            );
        }
    }

    #[test]
    fn test_blank_required_property_is_missing() {
        let result = Config::from_vars(&with("id", "   "));
        assert!(matches!(result, Err(ConfigError::MissingProperty(k)) if k == "id"));
    }

    #[test]
    fn test_zero_delay_and_period_are_allowed() {
        let mut vars = with("delay.ms", "0");
        vars.insert("period.ms".to_string(), "0".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.delay(), Duration::ZERO);
        assert_eq!(config.period(), Duration::ZERO);
    }

    #[test]
    fn test_negative_or_non_numeric_durations_rejected() {
        assert_eq!(invalid_key(Config::from_vars(&with("delay.ms", "-1"))), "delay.ms");
        assert_eq!(invalid_key(Config::from_vars(&with("period.ms", "soon"))), "period.ms");
        assert_eq!(
            invalid_key(Config::from_vars(&with("metric.expiration.period.ms", "0"))),
            "metric.expiration.period.ms"
        );
        assert_eq!(
            invalid_key(Config::from_vars(&with("partition.refresh.interval.ms", "0"))),
            "partition.refresh.interval.ms"
        );
        assert_eq!(
            invalid_key(Config::from_vars(&with("poll.timeout.ms", "0"))),
            "poll.timeout.ms"
        );
    }

    #[test]
    fn test_log_responses_accepts_short_forms() {
        assert!(Config::from_vars(&with("log.responses", "t")).unwrap().log_responses);
        assert!(Config::from_vars(&with("log.responses", "TRUE")).unwrap().log_responses);
        assert!(!Config::from_vars(&with("log.responses", "f")).unwrap().log_responses);
        assert_eq!(
            invalid_key(Config::from_vars(&with("log.responses", "yes"))),
            "log.responses"
        );
    }

    #[test]
    fn test_http_server_address_validation() {
        for ok in ["127.0.0.1", "::1", "localhost", "probe-01.example.com"] {
            assert!(
                Config::from_vars(&with("http.server.address", ok)).is_ok(),
                "{ok}"
            );
        }
        for bad in ["-bad.example.com", "under_score", "a..b", "bad host"] {
            assert_eq!(
                invalid_key(Config::from_vars(&with("http.server.address", bad))),
                "http.server.address",
                "{bad}"
            );
        }
    }

    #[test]
    fn test_http_server_port_range() {
        assert_eq!(
            Config::from_vars(&with("http.server.port", "65535"))
                .unwrap()
                .http_server_port,
            65535
        );
        for bad in ["0", "65536", "-1", "http"] {
            assert_eq!(
                invalid_key(Config::from_vars(&with("http.server.port", bad))),
                "http.server.port",
                "{bad}"
            );
        }
    }

    #[test]
    fn test_basic_auth_requires_credentials() {
        let vars = with("http.server.basic.authentication.enabled", "true");
        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::MissingProperty(k)) if k == "http.server.basic.authentication.username"
        ));

        let mut vars = vars;
        vars.insert(
            "http.server.basic.authentication.username".to_string(),
            "scraper".to_string(),
        );
        vars.insert(
            "http.server.basic.authentication.password".to_string(),
            "s3cret".to_string(),
        );
        let auth = Config::from_vars(&vars).unwrap().basic_auth.unwrap();

        assert!(auth.matches("scraper", "s3cret"));
        assert!(!auth.matches("scraper", "wrong"));
        assert!(!auth.matches("other", "s3cret"));
    }

    #[test]
    fn test_basic_auth_credentials_ignored_when_disabled() {
        let mut vars = with("http.server.basic.authentication.username", "scraper");
        vars.insert(
            "http.server.basic.authentication.password".to_string(),
            "s3cret".to_string(),
        );
        assert!(Config::from_vars(&vars).unwrap().basic_auth.is_none());
    }

    #[test]
    fn test_tls_requires_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        let key = dir.path().join("tls.key");
        std::fs::write(&cert, "cert").unwrap();
        std::fs::write(&key, "key").unwrap();

        let vars = with("http.server.ssl.enabled", "true");
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingProperty(k)) if k == "http.server.ssl.certificate.path"
        ));

        let mut vars = vars;
        vars.insert(
            "http.server.ssl.certificate.path".to_string(),
            cert.display().to_string(),
        );
        vars.insert(
            "http.server.ssl.key.path".to_string(),
            dir.path().join("missing.key").display().to_string(),
        );
        assert_eq!(invalid_key(Config::from_vars(&vars)), "http.server.ssl.key.path");

        vars.insert("http.server.ssl.key.path".to_string(), key.display().to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.tls,
            Some(TlsSettings {
                certificate_path: cert.clone(),
                key_path: key.clone(),
            })
        );
        assert!(!config.kafka_properties.contains_key("http.server.ssl.enabled"));
        assert!(config
            .describe()
            .contains(&("http.server.ssl.key.path".to_string(), key.display().to_string())));

        // A directory is not a certificate file.
        vars.insert(
            "http.server.ssl.certificate.path".to_string(),
            dir.path().display().to_string(),
        );
        assert_eq!(
            invalid_key(Config::from_vars(&vars)),
            "http.server.ssl.certificate.path"
        );
    }

    #[test]
    fn test_tls_paths_ignored_when_disabled() {
        let mut vars = with("http.server.ssl.enabled", "false");
        vars.insert(
            "http.server.ssl.certificate.path".to_string(),
            "/nonexistent/tls.crt".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.tls.is_none());
        assert!(!config
            .kafka_properties
            .contains_key("http.server.ssl.certificate.path"));

        assert_eq!(
            invalid_key(Config::from_vars(&with("http.server.ssl.enabled", "yes"))),
            "http.server.ssl.enabled"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut vars = with("http.server.basic.authentication.enabled", "t");
        vars.insert(
            "http.server.basic.authentication.username".to_string(),
            "scraper".to_string(),
        );
        vars.insert(
            "http.server.basic.authentication.password".to_string(),
            "hunter2".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));

        let banner: Vec<_> = config.describe();
        assert!(banner.iter().all(|(_, value)| value != "hunter2"));
        assert!(banner.contains(&(
            "http.server.basic.authentication.password".to_string(),
            "********".to_string()
        )));
    }

    #[test]
    fn test_client_secrets_are_masked() {
        let config = Config::from_vars(&with("sasl.password", "kafka-secret")).unwrap();

        assert!(!format!("{config:?}").contains("kafka-secret"));
        assert!(config
            .describe()
            .contains(&("sasl.password".to_string(), "********".to_string())));
        assert_eq!(
            config.producer_properties().get("sasl.password").map(String::as_str),
            Some("kafka-secret")
        );
    }

    #[test]
    fn test_kafka_properties_pass_through() {
        let mut vars = with("security.protocol", "SASL_SSL");
        vars.insert("acks".to_string(), "1".to_string());
        vars.insert("session.timeout.ms".to_string(), "6000".to_string());
        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(
            config.kafka_properties.get("bootstrap.servers").map(String::as_str),
            Some("localhost:9092")
        );
        assert!(!config.kafka_properties.contains_key("id"));
        assert!(!config.kafka_properties.contains_key("topic"));
        assert!(!config.kafka_properties.contains_key("http.server.port"));

        let producer = config.producer_properties();
        assert_eq!(producer.get("acks").map(String::as_str), Some("1"));
        assert_eq!(producer.get("security.protocol").map(String::as_str), Some("SASL_SSL"));
        assert!(!producer.contains_key("session.timeout.ms"));
        assert!(!producer.contains_key("group.id"));

        let consumer = config.consumer_properties();
        assert_eq!(consumer.get("session.timeout.ms").map(String::as_str), Some("6000"));
        assert_eq!(consumer.get("security.protocol").map(String::as_str), Some("SASL_SSL"));
        assert!(!consumer.contains_key("acks"));
    }

    #[test]
    fn test_client_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        let producer = config.producer_properties();
        assert_eq!(producer.get("acks").map(String::as_str), Some("all"));
        assert_eq!(producer.get("linger.ms").map(String::as_str), Some("0"));

        let consumer = config.consumer_properties();
        assert_eq!(consumer.get("group.id").map(String::as_str), Some("probe-1"));
        assert_eq!(consumer.get("enable.auto.commit").map(String::as_str), Some("false"));
        assert_eq!(consumer.get("enable.partition.eof").map(String::as_str), Some("false"));
        assert!(!consumer.contains_key("linger.ms"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.properties");
        std::fs::write(
            &path,
            "# latency probe\n\
             id = probe-file\n\
             bootstrap.servers=broker:9092\n\
             topic: latency\n\
             metric.expiration.period.ms=5000\n\
             http.server.address=localhost\n\
             http.server.port=8080\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.id, "probe-file");
        assert_eq!(config.topic, "latency");
        assert_eq!(config.http_server_port, 8080);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/probe.properties");
        assert!(matches!(result, Err(ConfigError::Properties(_))));
    }
}
