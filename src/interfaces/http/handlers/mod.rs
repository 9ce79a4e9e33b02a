pub mod approvals;
pub mod health;
pub mod monte_carlo;
pub mod portfolio;
pub mod risk;
pub mod rules;
pub mod sse;
