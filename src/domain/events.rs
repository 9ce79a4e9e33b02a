use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Enumerated outbound topics. The wire tag is the colon-separated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ApprovalCreated,
    ApprovalUpdated,
    KillSwitchChanged,
    PortfolioUpdated,
    PortfolioSnapshot,
    PriceUpdate,
    Alert,
    TradeSubmitted,
    TradeResult,
    SystemHealth,
    /// Synthetic frame sent once per SSE connection.
    Connected,
    /// Synthetic frame reporting dropped-frame counts to a lagging subscriber.
    Dropped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ApprovalCreated => "approval:created",
            EventKind::ApprovalUpdated => "approval:updated",
            EventKind::KillSwitchChanged => "killswitch:changed",
            EventKind::PortfolioUpdated => "portfolio:updated",
            EventKind::PortfolioSnapshot => "portfolio:snapshot",
            EventKind::PriceUpdate => "price:update",
            EventKind::Alert => "alert",
            EventKind::TradeSubmitted => "trade:submitted",
            EventKind::TradeResult => "trade:result",
            EventKind::SystemHealth => "system:health",
            EventKind::Connected => "connected",
            EventKind::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Alert subtype tags, kept in sync with the dashboard's filter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RiskBlocked,
    DataFetchError,
    RuleAction,
    RuleStatus,
    Performance,
    Risk,
    Optimization,
    IndicatorAnomaly,
    ExecutionFailed,
    CircuitBreakerTripped,
    LtvWarning,
}

/// A single bus event. Serialized to subscribers as `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Critical frames are never dropped under backpressure.
    #[serde(default)]
    pub critical: bool,
}

impl BusEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            critical: false,
        }
    }

    pub fn alert(alert: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        Self::alert_with(alert, severity, message, Value::Null)
    }

    pub fn alert_with(
        alert: AlertKind,
        severity: Severity,
        message: impl Into<String>,
        detail: Value,
    ) -> Self {
        let critical = severity == Severity::Critical;
        Self {
            kind: EventKind::Alert,
            data: json!({
                "alert": alert,
                "severity": severity,
                "message": message.into(),
                "detail": detail,
            }),
            timestamp: Utc::now(),
            critical,
        }
    }

    /// SSE frame body: `{type, data, timestamp}` with an ISO 8601 timestamp.
    pub fn to_frame(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Non-blocking in-process event handler, registered on the bus.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BusEvent);
}

/// Persisted form of a critical alert. Non-critical alerts are transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
