use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::approvals::ApprovalStatus;

/// Errors surfaced by the exchange client port.
///
/// The client classifies its own failures; callers only branch on the class.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient exchange failure: {reason}")]
    Transient { reason: String },

    #[error("fatal exchange failure: {reason}")]
    Fatal { reason: String },
}

impl ExchangeError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Structured rejection raised while parsing or validating the rule DSL.
#[derive(Debug, Error, PartialEq)]
pub enum RuleParseError {
    #[error("invalid rule JSON: {0}")]
    Json(String),

    #[error("rule name must not be empty")]
    EmptyName,

    #[error("allocation percentage {got} outside (0, 1] for action on {symbol}")]
    AllocationOutOfRange { symbol: String, got: Decimal },

    #[error("rebalance weights sum to {got}, expected 1")]
    WeightsNotNormalized { got: Decimal },

    #[error("condition window must be positive, got {got}")]
    NonPositiveWindow { got: i64 },

    #[error("comparator requires exactly one of gt/lt/between")]
    AmbiguousComparator,

    #[error("custom expression error: {0}")]
    Expr(#[from] ExprError),
}

/// Errors from the restricted custom-expression grammar.
#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Errors from the approval state machine.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    #[error("approval {0} not found")]
    NotFound(String),

    #[error("owner authentication required for this transition")]
    OwnerRequired,

    #[error("MFA verification required before approval")]
    MfaRequired,

    #[error("MFA challenge expired or code mismatch")]
    MfaRejected,
}
