pub mod backtester;
pub mod monte_carlo;
pub mod nightly;
