mod alert_repository;
mod approval_repository;
mod collateral_repository;
mod policy_repository;
mod price_repository;
mod risk_repository;
mod rule_repository;
mod snapshot_repository;

pub use alert_repository::SqliteAlertRepository;
pub use approval_repository::{SqliteApprovalRepository, SqliteExecutionRepository};
pub use collateral_repository::SqliteCollateralRepository;
pub use policy_repository::{
    SqliteBaselineRepository, SqliteKillSwitchRepository, SqliteObjectivesRepository,
};
pub use price_repository::SqlitePriceRepository;
pub use risk_repository::{SqliteLotRepository, SqliteRiskStateRepository};
pub use rule_repository::{SqliteRuleMetricsRepository, SqliteRuleRepository};
pub use snapshot_repository::SqliteSnapshotRepository;
