pub mod approvals;
pub mod errors;
pub mod events;
pub mod intent;
pub mod lots;
pub mod objectives;
pub mod ports;
pub mod repositories;
pub mod risk;
pub mod rules;
pub mod types;
