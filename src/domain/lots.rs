use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One acquisition lot for FIFO cost-basis accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub acquired_at: DateTime<Utc>,
}

/// Per-asset FIFO lot book.
///
/// Sells consume the oldest lots first; the realized PnL of each closed
/// slice feeds the daily-loss circuit breaker. The book is persisted next
/// to executions so a restart is lossless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LotBook {
    pub lots: HashMap<String, VecDeque<Lot>>,
}

impl LotBook {
    pub fn record_buy(&mut self, asset: &str, quantity: Decimal, unit_cost: Decimal) {
        if quantity <= Decimal::ZERO {
            return;
        }
        self.lots.entry(asset.to_string()).or_default().push_back(Lot {
            quantity,
            unit_cost,
            acquired_at: Utc::now(),
        });
    }

    /// Consume lots FIFO and return the realized PnL of the closed quantity.
    ///
    /// A sell of more than the booked quantity realizes PnL only on the
    /// booked part; the remainder has no cost basis (treated as zero-cost).
    pub fn record_sell(&mut self, asset: &str, quantity: Decimal, unit_price: Decimal) -> Decimal {
        let mut remaining = quantity;
        let mut realized = Decimal::ZERO;

        if let Some(queue) = self.lots.get_mut(asset) {
            while remaining > Decimal::ZERO {
                let Some(front) = queue.front_mut() else { break };
                let closed = remaining.min(front.quantity);
                realized += closed * (unit_price - front.unit_cost);
                front.quantity -= closed;
                remaining -= closed;
                if front.quantity.is_zero() {
                    queue.pop_front();
                }
            }
        }

        // Unbooked remainder: full proceeds are realized gain.
        if remaining > Decimal::ZERO {
            realized += remaining * unit_price;
        }
        realized
    }

    /// Quantity-weighted average unit cost of the open lots.
    pub fn average_cost(&self, asset: &str) -> Option<Decimal> {
        let queue = self.lots.get(asset)?;
        let quantity: Decimal = queue.iter().map(|l| l.quantity).sum();
        if quantity.is_zero() {
            return None;
        }
        let value: Decimal = queue.iter().map(|l| l.quantity * l.unit_cost).sum();
        Some(value / quantity)
    }

    pub fn booked_quantity(&self, asset: &str) -> Decimal {
        self.lots
            .get(asset)
            .map(|q| q.iter().map(|l| l.quantity).sum())
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fifo_order() {
        let mut book = LotBook::default();
        book.record_buy("BTC", dec!(1), dec!(50000));
        book.record_buy("BTC", dec!(1), dec!(60000));

        // Sells the 50k lot first.
        let pnl = book.record_sell("BTC", dec!(1), dec!(70000));
        assert_eq!(pnl, dec!(20000));

        // Then the 60k lot.
        let pnl = book.record_sell("BTC", dec!(1), dec!(70000));
        assert_eq!(pnl, dec!(10000));
        assert_eq!(book.booked_quantity("BTC"), Decimal::ZERO);
    }

    #[test]
    fn test_partial_lot_close() {
        let mut book = LotBook::default();
        book.record_buy("XRP", dec!(100), dec!(2));

        let pnl = book.record_sell("XRP", dec!(40), dec!(3));
        assert_eq!(pnl, dec!(40));
        assert_eq!(book.booked_quantity("XRP"), dec!(60));
    }

    #[test]
    fn test_loss_is_negative() {
        let mut book = LotBook::default();
        book.record_buy("BTC", dec!(0.5), dec!(70000));
        let pnl = book.record_sell("BTC", dec!(0.5), dec!(60000));
        assert_eq!(pnl, dec!(-5000));
    }

    #[test]
    fn test_unbooked_sell_is_pure_proceeds() {
        let mut book = LotBook::default();
        let pnl = book.record_sell("BTC", dec!(0.1), dec!(70000));
        assert_eq!(pnl, dec!(7000));
    }
}
