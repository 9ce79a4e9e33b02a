//! The declarative rule DSL.
//!
//! Rules are stored and exchanged as JSON; a tagged `type` field selects
//! each condition/action variant, so dispatch is a match on an enum rather
//! than any runtime lookup. `Rule::from_json` is the single entry point
//! that both parses and validates; everything downstream can assume a
//! well-formed rule.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::errors::RuleParseError;
use crate::domain::rules::expr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    #[serde(rename_all = "camelCase")]
    Interval { every_secs: u64 },
    #[serde(rename_all = "camelCase")]
    Event { on: TriggerEvent },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Deposit,
    Withdrawal,
    PriceShock,
    Manual,
}

/// Threshold comparison; exactly one of the three forms must be set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub between: Option<[Decimal; 2]>,
}

impl Comparator {
    pub fn gt(threshold: Decimal) -> Self {
        Self {
            gt: Some(threshold),
            ..Default::default()
        }
    }

    pub fn lt(threshold: Decimal) -> Self {
        Self {
            lt: Some(threshold),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), RuleParseError> {
        let set = self.gt.is_some() as u8 + self.lt.is_some() as u8 + self.between.is_some() as u8;
        if set != 1 {
            return Err(RuleParseError::AmbiguousComparator);
        }
        Ok(())
    }

    pub fn matches(&self, value: Decimal) -> bool {
        if let Some(t) = self.gt {
            return value > t;
        }
        if let Some(t) = self.lt {
            return value < t;
        }
        if let Some([lo, hi]) = self.between {
            return value >= lo && value <= hi;
        }
        false
    }

    /// Human form for reason strings, e.g. "> 0.05".
    pub fn describe(&self) -> String {
        if let Some(t) = self.gt {
            return format!("> {t}");
        }
        if let Some(t) = self.lt {
            return format!("< {t}");
        }
        if let Some([lo, hi]) = self.between {
            return format!("in [{lo}, {hi}]");
        }
        "unset".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Ema,
    Sma,
    MacdHist,
}

/// Indicator parameters; unset fields take the conventional defaults
/// (RSI 14, EMA/SMA 20, MACD 12/26/9).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    #[serde(rename_all = "camelCase")]
    PriceChangePct {
        symbol: String,
        window_mins: i64,
        #[serde(flatten)]
        cmp: Comparator,
    },
    #[serde(rename_all = "camelCase")]
    Indicator {
        name: IndicatorKind,
        symbol: String,
        #[serde(default)]
        params: IndicatorParams,
        #[serde(flatten)]
        cmp: Comparator,
    },
    #[serde(rename_all = "camelCase")]
    Balance {
        symbol: String,
        #[serde(flatten)]
        cmp: Comparator,
    },
    /// holding - baseline >= min_pct * baseline
    #[serde(rename_all = "camelCase")]
    AboveBaseline { symbol: String, min_pct: Decimal },
    #[serde(rename_all = "camelCase")]
    PortfolioValueUsd {
        #[serde(flatten)]
        cmp: Comparator,
    },
    /// Restricted arithmetic/boolean expression over the tick context.
    #[serde(rename_all = "camelCase")]
    Custom { expr: String },
}

impl Condition {
    fn validate(&self) -> Result<(), RuleParseError> {
        match self {
            Condition::PriceChangePct { window_mins, cmp, .. } => {
                if *window_mins <= 0 {
                    return Err(RuleParseError::NonPositiveWindow { got: *window_mins });
                }
                cmp.validate()
            }
            Condition::Indicator { cmp, .. } => cmp.validate(),
            Condition::Balance { cmp, .. } => cmp.validate(),
            Condition::PortfolioValueUsd { cmp } => cmp.validate(),
            Condition::AboveBaseline { .. } => Ok(()),
            Condition::Custom { expr: text } => {
                expr::parse(text)?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    /// Buy `allocation_pct` of portfolio value worth of `symbol`.
    #[serde(rename_all = "camelCase")]
    Enter {
        symbol: String,
        allocation_pct: Decimal,
    },
    /// Sell `allocation_pct` of the current holding of `symbol`.
    #[serde(rename_all = "camelCase")]
    Exit {
        symbol: String,
        allocation_pct: Decimal,
    },
    /// Rebalance toward the given target weights (fractions summing to 1).
    #[serde(rename_all = "camelCase")]
    Rebalance {
        target_weights: BTreeMap<String, Decimal>,
    },
    #[serde(rename_all = "camelCase")]
    AlertOnly { message: String },
}

impl RuleAction {
    fn validate(&self) -> Result<(), RuleParseError> {
        match self {
            RuleAction::Enter { symbol, allocation_pct }
            | RuleAction::Exit { symbol, allocation_pct } => {
                if *allocation_pct <= Decimal::ZERO || *allocation_pct > Decimal::ONE {
                    return Err(RuleParseError::AllocationOutOfRange {
                        symbol: symbol.clone(),
                        got: *allocation_pct,
                    });
                }
                Ok(())
            }
            RuleAction::Rebalance { target_weights } => {
                let sum: Decimal = target_weights.values().copied().sum();
                if sum != Decimal::ONE {
                    return Err(RuleParseError::WeightsNotNormalized { got: sum });
                }
                Ok(())
            }
            RuleAction::AlertOnly { .. } => Ok(()),
        }
    }
}

/// Named guardrails a rule can request on top of the always-on pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuardrailKind {
    BaselineProtection,
    CollateralProtection,
    CircuitDrawdown,
    ThrottleVelocity,
    PositionSizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskBlock {
    /// Decimal fraction of portfolio value, e.g. 0.15 for 15%.
    pub max_position_pct: Decimal,
    pub cooldown_secs: u64,
    #[serde(default)]
    pub guardrails: BTreeSet<GuardrailKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub id: i64,
    #[serde(default = "default_version")]
    pub version: i64,
    pub name: String,
    pub enabled: bool,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
    pub risk: RiskBlock,
}

fn default_version() -> i64 {
    1
}

impl Rule {
    /// Parse and validate a rule from its JSON form.
    pub fn from_json(text: &str) -> Result<Rule, RuleParseError> {
        let rule: Rule =
            serde_json::from_str(text).map_err(|e| RuleParseError::Json(e.to_string()))?;
        rule.validate()?;
        Ok(rule)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("rule serialization is infallible")
    }

    pub fn validate(&self) -> Result<(), RuleParseError> {
        if self.name.trim().is_empty() {
            return Err(RuleParseError::EmptyName);
        }
        for condition in &self.conditions {
            condition.validate()?;
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_rule() -> Rule {
        Rule {
            id: 7,
            version: 3,
            name: "btc profit take".to_string(),
            enabled: true,
            trigger: Trigger::Interval { every_secs: 600 },
            conditions: vec![
                Condition::PriceChangePct {
                    symbol: "BTC".to_string(),
                    window_mins: 60,
                    cmp: Comparator::gt(dec!(0.05)),
                },
                Condition::AboveBaseline {
                    symbol: "BTC".to_string(),
                    min_pct: dec!(0.1),
                },
            ],
            actions: vec![RuleAction::Exit {
                symbol: "BTC".to_string(),
                allocation_pct: dec!(0.5),
            }],
            risk: RiskBlock {
                max_position_pct: dec!(0.25),
                cooldown_secs: 3600,
                guardrails: [GuardrailKind::BaselineProtection].into(),
            },
        }
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let rule = sample_rule();
        let parsed = Rule::from_json(&rule.to_json()).unwrap();
        assert_eq!(rule, parsed);
    }

    #[test]
    fn test_rejects_bad_allocation() {
        let mut rule = sample_rule();
        rule.actions = vec![RuleAction::Exit {
            symbol: "BTC".to_string(),
            allocation_pct: dec!(1.5),
        }];
        assert!(matches!(
            rule.validate(),
            Err(RuleParseError::AllocationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_ambiguous_comparator() {
        let mut rule = sample_rule();
        rule.conditions = vec![Condition::Balance {
            symbol: "BTC".to_string(),
            cmp: Comparator {
                gt: Some(dec!(1)),
                lt: Some(dec!(2)),
                between: None,
            },
        }];
        assert_eq!(
            rule.validate(),
            Err(RuleParseError::AmbiguousComparator)
        );
    }

    #[test]
    fn test_rejects_unnormalized_rebalance() {
        let mut rule = sample_rule();
        let mut weights = BTreeMap::new();
        weights.insert("BTC".to_string(), dec!(0.6));
        weights.insert("XRP".to_string(), dec!(0.6));
        rule.actions = vec![RuleAction::Rebalance {
            target_weights: weights,
        }];
        assert!(matches!(
            rule.validate(),
            Err(RuleParseError::WeightsNotNormalized { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_custom_expr() {
        let mut rule = sample_rule();
        rule.conditions = vec![Condition::Custom {
            expr: "price.BTC >".to_string(),
        }];
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_structured_json_error() {
        let err = Rule::from_json("{not json").unwrap_err();
        assert!(matches!(err, RuleParseError::Json(_)));
    }

    #[test]
    fn test_comparator_matches() {
        assert!(Comparator::gt(dec!(5)).matches(dec!(6)));
        assert!(!Comparator::gt(dec!(5)).matches(dec!(5)));
        assert!(Comparator::lt(dec!(5)).matches(dec!(4)));

        let between = Comparator {
            between: Some([dec!(1), dec!(2)]),
            ..Default::default()
        };
        assert!(between.matches(dec!(1)));
        assert!(between.matches(dec!(2)));
        assert!(!between.matches(dec!(2.1)));
    }
}
