//! Config fixtures.
//!
//! Produces probe configurations with short schedules so pipeline tests
//! observe several rounds within a few hundred milliseconds.

use probe_service::config::Config;
use std::collections::HashMap;
use std::path::Path;

pub const TEST_PROBE_ID: &str = "probe-test";
pub const TEST_BOOTSTRAP_SERVERS: &str = "mock-broker:9092";
pub const TEST_TOPIC: &str = "latency";

/// Minimal valid property set with fast schedules.
#[must_use]
pub fn base_vars() -> HashMap<String, String> {
    HashMap::from([
        ("id".to_string(), TEST_PROBE_ID.to_string()),
        (
            "bootstrap.servers".to_string(),
            TEST_BOOTSTRAP_SERVERS.to_string(),
        ),
        ("topic".to_string(), TEST_TOPIC.to_string()),
        ("delay.ms".to_string(), "0".to_string()),
        ("period.ms".to_string(), "20".to_string()),
        ("metric.expiration.period.ms".to_string(), "60000".to_string()),
        ("http.server.address".to_string(), "127.0.0.1".to_string()),
        ("http.server.port".to_string(), "8080".to_string()),
        ("partition.refresh.interval.ms".to_string(), "20".to_string()),
        ("poll.timeout.ms".to_string(), "20".to_string()),
    ])
}

/// Builder over [`base_vars`].
///
/// # Example
///
/// ```rust,ignore
/// let config = TestConfigBuilder::new()
///     .set("period.ms", "50")
///     .basic_auth("scraper", "hunter2")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    vars: HashMap<String, String>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { vars: base_vars() }
    }

    /// Set any property.
    #[must_use]
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn id(self, id: &str) -> Self {
        self.set("id", id)
    }

    #[must_use]
    pub fn topic(self, topic: &str) -> Self {
        self.set("topic", topic)
    }

    #[must_use]
    pub fn expiration_ms(self, ttl_ms: u64) -> Self {
        self.set("metric.expiration.period.ms", &ttl_ms.to_string())
    }

    /// Enable basic authentication on `/metrics`.
    #[must_use]
    pub fn basic_auth(self, username: &str, password: &str) -> Self {
        self.set("http.server.basic.authentication.enabled", "true")
            .set("http.server.basic.authentication.username", username)
            .set("http.server.basic.authentication.password", password)
    }

    /// Serve `/metrics` over HTTPS with the given PEM files.
    #[must_use]
    pub fn tls(self, certificate: &Path, key: &Path) -> Self {
        self.set("http.server.ssl.enabled", "true")
            .set(
                "http.server.ssl.certificate.path",
                &certificate.display().to_string(),
            )
            .set("http.server.ssl.key.path", &key.display().to_string())
    }

    /// Raw properties, for tests exercising validation.
    #[must_use]
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Build the config.
    ///
    /// # Panics
    ///
    /// Panics if the properties do not form a valid config.
    #[must_use]
    pub fn build(self) -> Config {
        Config::from_vars(&self.vars).expect("test config should be valid")
    }
}
