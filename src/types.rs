use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::telemetry::exporter::ExportError;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opaque, externally supplied session identifier.
///
/// The pipeline never generates one. Whatever the host hands over is carried
/// through byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// The established correlation context of a call.
///
/// `correlation_id` is whatever trace/request id the caller already had; it is
/// passed through untouched and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub correlation_id: Option<String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Supplies transport-level authentication for collector requests.
///
/// Implementations receive the request builder and attach whatever they need.
/// The pipeline never inspects or logs what was attached.
pub trait CredentialProvider: Send + Sync {
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ExportError>;
}

/// Built-in credential schemes.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

impl AuthConfig {
    pub fn scheme(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Basic { .. } => "basic",
        }
    }
}

// Secrets never reach logs, even through {:?}.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"***")
                .finish(),
            other => write!(f, "AuthConfig({})", other.scheme()),
        }
    }
}

impl CredentialProvider for AuthConfig {
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ExportError> {
        Ok(match self {
            AuthConfig::None => request,
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::ApiKey { header, key } => {
                let name = reqwest::header::HeaderName::from_bytes(header.as_bytes())
                    .map_err(|_| ExportError::Credentials("invalid api key header name".into()))?;
                request.header(name, key)
            }
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        })
    }
}
