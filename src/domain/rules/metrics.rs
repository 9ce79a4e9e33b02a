use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evaluated outcomes for one rule version over one backtest window.
/// Appended per evaluation window, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetrics {
    pub rule_id: i64,
    pub rule_version: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub trades: usize,
    pub win_rate: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub total_return_pct: f64,
    pub created_at: DateTime<Utc>,
}
