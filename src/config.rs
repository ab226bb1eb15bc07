use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::instrumentation::InstrumentationOptions;
use crate::sanitizer::rules::{DEFAULT_MARKER, DEFAULT_MAX_DEPTH};
use crate::sanitizer::SanitizationRules;
use crate::telemetry::{ExportSettings, RetryPolicy};
use crate::types::AuthConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("service_name must not be empty")]
    EmptyServiceName,
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("sample_rate must be within [0, 1], got {0}")]
    InvalidSampleRate(f64),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("retry_initial_backoff_ms ({initial_ms}) exceeds retry_max_backoff_ms ({max_ms})")]
    BackoffOrder { initial_ms: u64, max_ms: u64 },
    #[error("redaction marker must not be empty")]
    EmptyMarker,
    #[error("redact pattern '{name}' does not compile: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    #[default]
    Http,
    Console,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanitizationConfig {
    /// Start from the built-in PII and credential rules.
    #[serde(default = "default_true")]
    pub use_default_rules: bool,
    #[serde(default)]
    pub redact_fields: Vec<String>,
    #[serde(default)]
    pub redact_field_fragments: Vec<String>,
    #[serde(default)]
    pub redact_patterns: Vec<NamedPattern>,
    #[serde(default = "default_true")]
    pub credential_heuristics: bool,
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            use_default_rules: true,
            redact_fields: Vec::new(),
            redact_field_fragments: Vec::new(),
            redact_patterns: Vec::new(),
            credential_heuristics: true,
            marker: default_marker(),
            max_depth: default_max_depth(),
        }
    }
}

/// User-facing telemetry configuration. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    /// Collector URL; required to be http(s) only for the HTTP exporter.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub exporter: ExporterKind,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Fraction of sessions recorded, decided once per session.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    #[serde(default = "default_batch_max_wait_ms")]
    pub batch_max_wait_ms: u64,
    /// Export queue bound; oldest events are evicted beyond it.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Tracker intake bound; new signals are dropped beyond it.
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_session_idle_timeout_ms")]
    pub session_idle_timeout_ms: u64,
    #[serde(default = "default_idle_sweep_interval_ms")]
    pub idle_sweep_interval_ms: u64,
    #[serde(default = "default_true")]
    pub collect_arguments: bool,
    #[serde(default = "default_true")]
    pub collect_results: bool,
    #[serde(default)]
    pub sanitization: SanitizationConfig,
}

fn default_true() -> bool {
    true
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_service_name() -> String {
    "mcp-server".to_string()
}

fn default_service_version() -> String {
    "0.0.0".to_string()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:4318/v1/events".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_batch_max_size() -> usize {
    100
}

fn default_batch_max_wait_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_signal_capacity() -> usize {
    4_096
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    500
}

fn default_retry_max_backoff_ms() -> u64 {
    10_000
}

fn default_export_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_session_idle_timeout_ms() -> u64 {
    300_000
}

fn default_idle_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            endpoint: default_endpoint(),
            exporter: ExporterKind::default(),
            auth: AuthConfig::default(),
            sample_rate: default_sample_rate(),
            batch_max_size: default_batch_max_size(),
            batch_max_wait_ms: default_batch_max_wait_ms(),
            queue_capacity: default_queue_capacity(),
            signal_capacity: default_signal_capacity(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            export_timeout_ms: default_export_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            session_idle_timeout_ms: default_session_idle_timeout_ms(),
            idle_sweep_interval_ms: default_idle_sweep_interval_ms(),
            collect_arguments: true,
            collect_results: true,
            sanitization: SanitizationConfig::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Configuration that passed validation, with rules compiled and durations
/// resolved. Only `ConfigValidator` builds one.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    service_name: String,
    service_version: String,
    exporter: ExporterKind,
    endpoint: Option<Url>,
    auth: AuthConfig,
    rules: SanitizationRules,
    instrumentation: InstrumentationOptions,
    export: ExportSettings,
    queue_capacity: usize,
    signal_capacity: usize,
    export_timeout: Duration,
    session_idle_timeout: Duration,
    idle_sweep_interval: Duration,
}

impl ValidatedConfig {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn exporter(&self) -> ExporterKind {
        self.exporter
    }

    /// Present whenever the exporter is HTTP.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn rules(&self) -> &SanitizationRules {
        &self.rules
    }

    pub fn instrumentation(&self) -> InstrumentationOptions {
        self.instrumentation
    }

    pub fn export(&self) -> &ExportSettings {
        &self.export
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn signal_capacity(&self) -> usize {
        self.signal_capacity
    }

    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }

    pub fn session_idle_timeout(&self) -> Duration {
        self.session_idle_timeout
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        self.idle_sweep_interval
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Checks every field and compiles the rule set. The first problem found
    /// is returned.
    pub fn validate(config: TelemetryConfig) -> Result<ValidatedConfig, ConfigError> {
        if config.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }

        let endpoint = match config.exporter {
            ExporterKind::Http => Some(parse_endpoint(&config.endpoint)?),
            ExporterKind::Console => None,
        };

        if !config.sample_rate.is_finite() || !(0.0..=1.0).contains(&config.sample_rate) {
            return Err(ConfigError::InvalidSampleRate(config.sample_rate));
        }

        positive("batch_max_size", config.batch_max_size as u64)?;
        positive("batch_max_wait_ms", config.batch_max_wait_ms)?;
        positive("queue_capacity", config.queue_capacity as u64)?;
        positive("signal_capacity", config.signal_capacity as u64)?;
        positive("retry_max_attempts", config.retry_max_attempts as u64)?;
        positive("retry_initial_backoff_ms", config.retry_initial_backoff_ms)?;
        positive("retry_max_backoff_ms", config.retry_max_backoff_ms)?;
        positive("export_timeout_ms", config.export_timeout_ms)?;
        positive("shutdown_grace_ms", config.shutdown_grace_ms)?;
        positive("session_idle_timeout_ms", config.session_idle_timeout_ms)?;
        positive("idle_sweep_interval_ms", config.idle_sweep_interval_ms)?;
        positive("sanitization.max_depth", config.sanitization.max_depth as u64)?;

        if config.retry_initial_backoff_ms > config.retry_max_backoff_ms {
            return Err(ConfigError::BackoffOrder {
                initial_ms: config.retry_initial_backoff_ms,
                max_ms: config.retry_max_backoff_ms,
            });
        }

        let rules = build_rules(&config.sanitization)?;

        Ok(ValidatedConfig {
            instrumentation: InstrumentationOptions {
                collect_arguments: config.collect_arguments,
                collect_results: config.collect_results,
                sample_rate: config.sample_rate,
            },
            export: ExportSettings {
                batch_max_size: config.batch_max_size,
                batch_max_wait: Duration::from_millis(config.batch_max_wait_ms),
                retry: RetryPolicy::new(
                    config.retry_max_attempts,
                    Duration::from_millis(config.retry_initial_backoff_ms),
                    Duration::from_millis(config.retry_max_backoff_ms),
                ),
                shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            },
            service_name: config.service_name,
            service_version: config.service_version,
            exporter: config.exporter,
            endpoint,
            auth: config.auth,
            rules,
            queue_capacity: config.queue_capacity,
            signal_capacity: config.signal_capacity,
            export_timeout: Duration::from_millis(config.export_timeout_ms),
            session_idle_timeout: Duration::from_millis(config.session_idle_timeout_ms),
            idle_sweep_interval: Duration::from_millis(config.idle_sweep_interval_ms),
        })
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive(field));
    }
    Ok(())
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn build_rules(config: &SanitizationConfig) -> Result<SanitizationRules, ConfigError> {
    if config.marker.is_empty() {
        return Err(ConfigError::EmptyMarker);
    }

    let mut rules = if config.use_default_rules {
        SanitizationRules::pii_defaults()
    } else {
        SanitizationRules::empty()
    };
    for field in &config.redact_fields {
        rules = rules.with_field(field);
    }
    for fragment in &config.redact_field_fragments {
        rules = rules.with_field_fragment(fragment);
    }
    for named in &config.redact_patterns {
        let regex = Regex::new(&named.pattern).map_err(|source| ConfigError::InvalidPattern {
            name: named.name.clone(),
            source,
        })?;
        rules = rules.with_value_pattern(named.name.clone(), regex);
    }
    if config.credential_heuristics {
        rules = rules.with_credential_heuristics();
    }
    Ok(rules
        .with_marker(config.marker.clone())
        .with_max_depth(config.max_depth))
}
