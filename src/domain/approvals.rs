use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::ApprovalError;
use crate::domain::types::OrderSide;

/// Default time-to-live for a pending approval.
pub const APPROVAL_TTL_HOURS: i64 = 24;

/// Lifetime of an MFA challenge.
pub const MFA_CHALLENGE_TTL_MINS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Declined,
    Executed,
    Expired,
    Deferred,
}

impl ApprovalStatus {
    /// The transition DAG:
    /// pending -> {approved, declined, expired}
    /// approved -> {executed, deferred, declined}
    /// deferred -> {executed, expired, approved}
    /// everything else is terminal. The approved -> declined edge exists
    /// for non-transient execution failures.
    pub fn can_transition(self, to: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Declined)
                | (Pending, Expired)
                | (Approved, Executed)
                | (Approved, Deferred)
                | (Approved, Declined)
                | (Deferred, Executed)
                | (Deferred, Expired)
                | (Deferred, Approved)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Declined | ApprovalStatus::Executed | ApprovalStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalSource {
    Rule,
    Optimizer,
    Manual,
}

/// What an approval, once approved, actually does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApprovalAction {
    #[serde(rename_all = "camelCase")]
    Trade {
        symbol: String,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        value_usd: Decimal,
        dry_run: bool,
    },
    /// Optimizer proposal: a rule parameter diff plus the backtest summary.
    #[serde(rename_all = "camelCase")]
    RuleUpdate {
        rule_id: i64,
        rule_version: i64,
        diff: Value,
        backtest_summary: Value,
    },
}

impl ApprovalAction {
    pub fn value_usd(&self) -> Decimal {
        match self {
            ApprovalAction::Trade { value_usd, .. } => *value_usd,
            ApprovalAction::RuleUpdate { .. } => Decimal::ZERO,
        }
    }
}

/// One-time code gating high-value auto-executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallenge {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
}

impl MfaChallenge {
    pub fn new(code: String, now: DateTime<Utc>) -> Self {
        Self {
            code,
            expires_at: now + Duration::minutes(MFA_CHALLENGE_TTL_MINS),
            verified: false,
        }
    }

    pub fn verify(&mut self, code: &str, now: DateTime<Utc>) -> Result<(), ApprovalError> {
        if now > self.expires_at || self.code != code {
            return Err(ApprovalError::MfaRejected);
        }
        self.verified = true;
        Ok(())
    }
}

/// Durable decision record for a proposed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: Uuid,
    pub source: ApprovalSource,
    pub action: ApprovalAction,
    pub status: ApprovalStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub acted_by: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub execution_id: Option<Uuid>,
    pub mfa: Option<MfaChallenge>,
    /// Rule that proposed this action, when source is a rule.
    #[serde(default)]
    pub rule_id: Option<i64>,
    #[serde(default)]
    pub rule_version: Option<i64>,
}

impl Approval {
    pub fn new(source: ApprovalSource, action: ApprovalAction, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            action,
            status: ApprovalStatus::Pending,
            reason: reason.into(),
            created_at: now,
            expires_at: now + Duration::hours(APPROVAL_TTL_HOURS),
            acted_by: None,
            acted_at: None,
            execution_id: None,
            mfa: None,
            rule_id: None,
            rule_version: None,
        }
    }

    /// Apply a status transition, enforcing the DAG.
    pub fn transition(
        &mut self,
        to: ApprovalStatus,
        acted_by: Option<&str>,
    ) -> Result<(), ApprovalError> {
        if !self.status.can_transition(to) {
            return Err(ApprovalError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        // An unverified MFA challenge blocks the pending -> approved edge.
        if to == ApprovalStatus::Approved
            && self.status == ApprovalStatus::Pending
            && self.mfa.as_ref().is_some_and(|m| !m.verified)
        {
            return Err(ApprovalError::MfaRequired);
        }
        self.status = to;
        self.acted_by = acted_by.map(str::to_string);
        self.acted_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.expires_at
    }
}

/// Result of one attempted order. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub approval_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub fill_quantity: Decimal,
    pub fill_price: Decimal,
    pub fees: Decimal,
    pub error: Option<String>,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}
