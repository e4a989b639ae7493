//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for credentials such as the scrape
//! endpoint's basic-auth password or SASL passwords passed through to the
//! Kafka client. `SecretString` implements `Debug` with redaction, so a
//! `#[derive(Debug)]` config struct holding one is safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BasicAuth {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let auth = BasicAuth {
//!     username: "prometheus".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{auth:?}").contains("hunter2"));
//! assert_eq!(auth.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Used when checking credentials so response timing does not reveal how
/// much of a guessed password was correct. Length differences are still
/// observable.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("password123");
        assert_eq!(secret.expose_secret(), "password123");
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct SaslCredentials {
            username: String,
            password: SecretString,
        }

        let json = r#"{"username": "probe", "password": "kafka-secret"}"#;
        let creds: SaslCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.password.expose_secret(), "kafka-secret");
        assert!(!format!("{creds:?}").contains("kafka-secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret!"));
        assert!(constant_time_eq(b"", b""));
    }
}
