use std::fmt;
use std::path::Path;
use std::time::Duration;

use pundun_frame::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionConfig, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT};
use crate::correlation::CORRELATION_ID_SPACE;
use crate::error::{ClientError, Result};
use crate::handshake::{Credentials, HandshakeConfig};

/// Default pundun server port.
pub const DEFAULT_PORT: u16 = 8887;

/// Everything needed to open an authenticated connection.
///
/// Deserializes from JSON; durations are given in milliseconds and every
/// field is optional:
///
/// ```json
/// { "host": "db.local", "port": 8887, "username": "admin", "password": "admin",
///   "request_timeout_ms": 10000 }
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(rename = "handshake_timeout_ms", with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// `null` waits forever.
    #[serde(rename = "request_timeout_ms", with = "opt_duration_ms")]
    pub request_timeout: Option<Duration>,
    #[serde(rename = "write_timeout_ms", with = "opt_duration_ms")]
    pub write_timeout: Option<Duration>,
    pub max_payload_size: usize,
    pub max_handshake_payload: usize,
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let handshake = HandshakeConfig::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: "admin".to_string(),
            password: String::new(),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: handshake.timeout,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            write_timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_handshake_payload: handshake.max_handshake_payload,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_payload_size", &self.max_payload_size)
            .field("max_handshake_payload", &self.max_handshake_payload)
            .field("max_pending_requests", &self.max_pending_requests)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            username: credentials.username,
            password: credentials.password,
            ..Self::default()
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ClientError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must be > 0".to_string()));
        }
        if self.username.is_empty() {
            return Err(ClientError::Config("username must not be empty".to_string()));
        }
        if self.max_pending_requests == 0 || self.max_pending_requests > CORRELATION_ID_SPACE {
            return Err(ClientError::Config(format!(
                "max_pending_requests must be in 1..={CORRELATION_ID_SPACE}"
            )));
        }
        if self.max_payload_size == 0 || self.max_handshake_payload == 0 {
            return Err(ClientError::Config(
                "payload limits must be > 0".to_string(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ClientError::Config(
                "handshake timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            timeout: self.handshake_timeout,
            max_handshake_payload: self.max_handshake_payload,
            ..HandshakeConfig::default()
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            request_timeout: self.request_timeout,
            max_pending_requests: self.max_pending_requests,
            max_payload_size: self.max_payload_size,
            write_timeout: self.write_timeout,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 8887);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_pending_requests, 4096);
    }

    #[test]
    fn parses_partial_json_with_millisecond_durations() {
        let config = ClientConfig::from_json_str(
            r#"{"host":"db.local","username":"svc","password":"pw",
                "request_timeout_ms":1500,"connect_timeout_ms":250}"#,
        )
        .unwrap();

        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.credentials(), Credentials::new("svc", "pw"));
    }

    #[test]
    fn null_request_timeout_waits_forever() {
        let config = ClientConfig::from_json_str(r#"{"request_timeout_ms":null}"#).unwrap();
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.connection_config().request_timeout, None);
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = ClientConfig::from_json_str(r#"{"hostname":"x"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Json(_)));
    }

    #[test]
    fn invalid_values_rejected() {
        for json in [
            r#"{"port":0}"#,
            r#"{"host":""}"#,
            r#"{"max_pending_requests":0}"#,
            r#"{"max_pending_requests":70000}"#,
            r#"{"handshake_timeout_ms":0}"#,
        ] {
            let err = ClientConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, ClientError::Config(_)), "{json}");
        }
    }

    #[test]
    fn password_is_not_serialized_or_printed() {
        let config = ClientConfig::new("h", 1, Credentials::new("u", "topsecret"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("topsecret"));
        assert!(json.contains("\"request_timeout_ms\":30000"));

        let dbg = format!("{config:?}");
        assert!(!dbg.contains("topsecret"));
        assert!(dbg.contains("<redacted:9 bytes>"));
    }

    #[test]
    fn from_json_file_reads_disk() {
        let dir = std::env::temp_dir().join(format!("pundun-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.json");
        std::fs::write(&path, r#"{"port":9000,"password":"x"}"#).unwrap();

        let config = ClientConfig::from_json_file(&path).unwrap();
        assert_eq!(config.port, 9000);

        let missing = ClientConfig::from_json_file(dir.join("absent.json")).unwrap_err();
        assert!(matches!(missing, ClientError::Config(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn derived_configs_carry_limits() {
        let config = ClientConfig {
            handshake_timeout: Duration::from_millis(700),
            max_handshake_payload: 1024,
            max_payload_size: 2048,
            ..ClientConfig::default()
        };
        assert_eq!(config.handshake_config().timeout, Duration::from_millis(700));
        assert_eq!(config.handshake_config().max_handshake_payload, 1024);
        assert_eq!(config.connection_config().max_payload_size, 2048);
    }
}
