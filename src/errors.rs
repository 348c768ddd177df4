use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The central error type for the mend recovery pipeline.
///
/// Components raise their own variants (`CircuitOpen`, `HealingFailed`,
/// `FallbackExhausted`) and the orchestrator catches them one level up,
/// converting everything into a `RecoveryResult` rather than propagating to
/// the caller.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Circuit breaker open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("All fallback strategies exhausted for '{operation_type}': {original}")]
    FallbackExhausted {
        operation_type: String,
        original: String,
    },

    #[error("Self-healing failed for {category} in '{component}': {reason}")]
    HealingFailed {
        category: String,
        component: String,
        reason: String,
    },

    #[error("Recovery timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Operation failed: {0}")]
    Operation(#[from] SystemError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error severity, as reported by the raising component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A raised error with enough context to classify, recover, and log.
///
/// Immutable once built: constructors are the only way to set fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemError {
    /// Machine-readable code, e.g. `DB_CONNECTION_LOST`
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Severity assigned at the raise site
    pub severity: Severity,
    /// Component that raised the error
    pub component: String,
    /// Free-form context captured at the raise site
    pub context: HashMap<String, serde_json::Value>,
    /// When the error was raised
    pub timestamp: DateTime<Utc>,
    /// Whether the raiser believes recovery is worth attempting
    pub recoverable: bool,
}

impl SystemError {
    pub fn new(code: &str, message: &str, severity: Severity, component: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            severity,
            component: component.to_string(),
            context: HashMap::new(),
            timestamp: Utc::now(),
            recoverable: true,
        }
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn unrecoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// Wrap an arbitrary error raised by a protected operation.
    pub fn from_operation(err: &dyn std::error::Error, component: &str) -> Self {
        Self::new("OPERATION_FAILED", &err.to_string(), Severity::Medium, component)
    }
}

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.code, self.message)
    }
}

impl std::error::Error for SystemError {}

/// Coarse error taxonomy used to route healing strategies.
///
/// Classification is best-effort substring matching on message and code
/// text, not guaranteed exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DatabaseConnection,
    ApiTimeout,
    WebsocketDisconnect,
    MemoryLeak,
    NetworkError,
    Unknown,
}

impl ErrorCategory {
    /// Classify a raised error into a coarse category.
    pub fn classify(error: &SystemError) -> Self {
        let text = format!("{} {}", error.code, error.message).to_lowercase();

        if text.contains("websocket") || text.contains("ws ") || text.contains("socket hang") {
            Self::WebsocketDisconnect
        } else if text.contains("database")
            || text.contains("db ")
            || text.contains("sql")
            || text.contains("connection pool")
            || (text.contains("connection") && !text.contains("network"))
        {
            Self::DatabaseConnection
        } else if text.contains("timeout") || text.contains("timed out") {
            Self::ApiTimeout
        } else if text.contains("memory") || text.contains("heap") || text.contains("oom") {
            Self::MemoryLeak
        } else if text.contains("network")
            || text.contains("dns")
            || text.contains("unreachable")
            || text.contains("econnrefused")
        {
            Self::NetworkError
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseConnection => "database_connection",
            Self::ApiTimeout => "api_timeout",
            Self::WebsocketDisconnect => "websocket_disconnect",
            Self::MemoryLeak => "memory_leak",
            Self::NetworkError => "network_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
