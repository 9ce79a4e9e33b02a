//! Rolling risk counters shared by every subsystem.
//!
//! One instance lives behind a single mutex owned by the
//! `RiskStateManager`; everything here is plain data plus constant-work
//! bookkeeping so lock hold times stay bounded.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Global executions allowed in any rolling 60-minute window.
pub const GLOBAL_HOURLY_LIMIT: usize = 5;

/// Per-asset executions allowed in any rolling 60-minute window.
pub const PER_ASSET_HOURLY_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStamp {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BreakerState {
    Armed,
    Tripped {
        #[serde(with = "chrono::serde::ts_seconds")]
        at: DateTime<Utc>,
    },
}

/// A tentative hold on quantity for an accepted-but-unexecuted intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub symbol: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    /// Executions inside the trailing hour, oldest first.
    pub executions: VecDeque<ExecutionStamp>,
    /// Last execution time per rule id, for cooldown checks.
    pub last_execution: HashMap<i64, DateTime<Utc>>,
    pub daily_realized_pnl: Decimal,
    /// UTC date the daily counters refer to.
    pub pnl_date: NaiveDate,
    pub breaker: BreakerState,
    pub reservations: HashMap<Uuid, Reservation>,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            executions: VecDeque::new(),
            last_execution: HashMap::new(),
            daily_realized_pnl: Decimal::ZERO,
            pnl_date: Utc::now().date_naive(),
            breaker: BreakerState::Armed,
            reservations: HashMap::new(),
        }
    }
}

impl RiskState {
    /// Advance the rolling structures to `now`: prune the hourly window and
    /// roll the daily counters at midnight UTC (which also re-arms a
    /// tripped breaker).
    pub fn roll_forward(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(1);
        while self
            .executions
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.executions.pop_front();
        }

        let today = now.date_naive();
        if today != self.pnl_date {
            self.pnl_date = today;
            self.daily_realized_pnl = Decimal::ZERO;
            self.breaker = BreakerState::Armed;
        }
    }

    pub fn trades_last_hour(&self) -> usize {
        self.executions.len()
    }

    pub fn trades_last_hour_for(&self, symbol: &str) -> usize {
        self.executions.iter().filter(|s| s.symbol == symbol).count()
    }

    pub fn record_execution(&mut self, now: DateTime<Utc>, symbol: &str, rule_id: i64) {
        self.executions.push_back(ExecutionStamp {
            timestamp: now,
            symbol: symbol.to_string(),
        });
        self.last_execution.insert(rule_id, now);
    }

    /// Fold realized PnL into the daily total; returns true when this
    /// update tripped the breaker (the caller owns the one-shot alert).
    pub fn add_realized_pnl(
        &mut self,
        now: DateTime<Utc>,
        delta: Decimal,
        daily_loss_limit: Decimal,
    ) -> bool {
        self.roll_forward(now);
        self.daily_realized_pnl += delta;
        if self.daily_realized_pnl < -daily_loss_limit
            && matches!(self.breaker, BreakerState::Armed)
        {
            self.breaker = BreakerState::Tripped { at: now };
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self.breaker, BreakerState::Tripped { .. })
    }

    pub fn reserve(&mut self, id: Uuid, symbol: &str, quantity: Decimal) {
        self.reservations.insert(
            id,
            Reservation {
                symbol: symbol.to_string(),
                quantity,
            },
        );
    }

    pub fn release(&mut self, id: &Uuid) -> Option<Reservation> {
        self.reservations.remove(id)
    }

    /// Quantity of `symbol` currently held by open reservations.
    pub fn reserved_quantity(&self, symbol: &str) -> Decimal {
        self.reservations
            .values()
            .filter(|r| r.symbol == symbol)
            .map(|r| r.quantity)
            .sum()
    }
}
