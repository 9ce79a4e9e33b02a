use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-asset policy for the owner's protected ("digital gold") holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreAssetPolicy {
    /// Protected quantity floor used to seed the baseline store.
    pub baseline: Decimal,
    /// Whether policy-bound intents on this asset may execute without a human.
    pub auto_execute: bool,
    /// Raise the baseline automatically when a deposit lands.
    pub auto_increment_on_deposit: bool,
    /// Never let the holding drop below this many tokens.
    pub min_tokens: Decimal,
}

/// Which action classes always require a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalsRequired {
    pub new_coin: bool,
    pub staking: bool,
    /// Trades above this USD size are never auto-executed.
    pub large_trade_usd: Decimal,
}

/// Owner policy singleton. Mutable only by the authenticated owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objectives {
    pub core_assets: BTreeMap<String, CoreAssetPolicy>,
    pub approvals_required: ApprovalsRequired,
    pub dry_run_default: bool,
}

impl Default for Objectives {
    fn default() -> Self {
        let mut core_assets = BTreeMap::new();
        core_assets.insert(
            "BTC".to_string(),
            CoreAssetPolicy {
                baseline: Decimal::ZERO,
                auto_execute: false,
                auto_increment_on_deposit: true,
                min_tokens: Decimal::ZERO,
            },
        );
        core_assets.insert(
            "XRP".to_string(),
            CoreAssetPolicy {
                baseline: dec!(10),
                auto_execute: false,
                auto_increment_on_deposit: true,
                min_tokens: dec!(10),
            },
        );

        Self {
            core_assets,
            approvals_required: ApprovalsRequired {
                new_coin: true,
                staking: true,
                large_trade_usd: dec!(1000),
            },
            dry_run_default: true,
        }
    }
}

impl Objectives {
    pub fn is_core(&self, asset: &str) -> bool {
        self.core_assets.contains_key(asset)
    }

    pub fn auto_execute_enabled(&self, asset: &str) -> bool {
        self.core_assets
            .get(asset)
            .map(|p| p.auto_execute)
            .unwrap_or(false)
    }

    /// An asset the portfolio has never held and policy does not know about.
    pub fn is_new_coin(&self, asset: &str, known_assets: &[String]) -> bool {
        !self.is_core(asset) && !known_assets.iter().any(|a| a == asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_core_set() {
        let obj = Objectives::default();
        assert!(obj.is_core("BTC"));
        assert!(obj.is_core("XRP"));
        assert!(!obj.is_core("DOGE"));
        assert!(obj.dry_run_default);
    }

    #[test]
    fn test_auto_execute_defaults_off() {
        let obj = Objectives::default();
        assert!(!obj.auto_execute_enabled("BTC"));
        assert!(!obj.auto_execute_enabled("UNKNOWN"));
    }

    #[test]
    fn test_new_coin_detection() {
        let obj = Objectives::default();
        let held = vec!["BTC".to_string(), "USDC".to_string()];
        assert!(obj.is_new_coin("PEPE", &held));
        assert!(!obj.is_new_coin("USDC", &held));
        assert!(!obj.is_new_coin("XRP", &held));
    }
}
