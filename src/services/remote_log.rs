//! Remote log shipping
//!
//! Records are mirrored into `tracing` and, when an endpoint is configured,
//! posted to it on a background task. Shipping is fire-and-forget: a failed
//! post is reported through `tracing` and otherwise ignored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::LoggingConfig;

/// Time allowed for one post to the log endpoint
const SHIP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Body accepted by the log endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the record, e.g. `session`
    pub context: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogRecord {
    pub fn new(level: LogLevel, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            context: context.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Fire-and-forget client for the log endpoint
#[derive(Debug, Clone)]
pub struct RemoteLogger {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl RemoteLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SHIP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to configure log shipping client: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            endpoint: config.endpoint.clone(),
        }
    }

    /// Logger that only writes to `tracing`
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Emit a record locally and ship it when an endpoint is configured.
    ///
    /// Outside a tokio runtime the record is only emitted locally.
    pub fn log(&self, record: LogRecord) {
        emit_local(&record);

        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(endpoint = %endpoint, "No runtime, not shipping log record");
            return;
        };
        let client = self.client.clone();
        handle.spawn(async move {
            let result = client
                .post(&endpoint)
                .json(&record)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                tracing::warn!(endpoint = %endpoint, "Failed to ship log record: {}", e);
            }
        });
    }

    pub fn info(&self, context: &str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Info, context, message));
    }

    pub fn warn(&self, context: &str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Warn, context, message));
    }

    pub fn error(&self, context: &str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Error, context, message));
    }
}

fn emit_local(record: &LogRecord) {
    let context = record.context.as_str();
    let message = record.message.as_str();
    match record.level {
        LogLevel::Debug => tracing::debug!(context, "{}", message),
        LogLevel::Info => tracing::info!(context, "{}", message),
        LogLevel::Warn => tracing::warn!(context, "{}", message),
        LogLevel::Error => tracing::error!(context, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = LogRecord::new(LogLevel::Warn, "session", "login failed")
            .with_data(serde_json::json!({"status": 400}));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["level"], "warn");
        assert_eq!(json["context"], "session");
        assert_eq!(json["message"], "login failed");
        assert_eq!(json["data"]["status"], 400);
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_record_without_data_omits_field() {
        let record = LogRecord::new(LogLevel::Info, "guard", "mounted");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_disabled_logger_does_not_need_runtime() {
        let logger = RemoteLogger::disabled();
        assert!(!logger.is_enabled());
        logger.info("test", "local only");
    }

    #[test]
    fn test_enabled_logger_outside_runtime_logs_locally() {
        let logger = RemoteLogger::new(&LoggingConfig {
            endpoint: Some("http://127.0.0.1:9/logs".to_string()),
        });
        assert!(logger.is_enabled());
        logger.warn("test", "no runtime to ship from");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let logger = RemoteLogger::new(&LoggingConfig {
            endpoint: Some("http://127.0.0.1:9/logs".to_string()),
        });
        assert!(logger.is_enabled());
        logger.error("test", "nobody is listening");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
