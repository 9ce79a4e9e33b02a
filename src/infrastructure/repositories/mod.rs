mod in_memory;

pub use in_memory::{
    InMemoryAlertRepository, InMemoryApprovalRepository, InMemoryBaselineRepository,
    InMemoryCollateralRepository, InMemoryExecutionRepository, InMemoryKillSwitchRepository,
    InMemoryLotRepository, InMemoryObjectivesRepository, InMemoryPriceRepository,
    InMemoryRiskStateRepository, InMemoryRuleMetricsRepository, InMemoryRuleRepository,
    InMemorySnapshotRepository,
};
