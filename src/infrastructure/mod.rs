pub mod event_bus;
pub mod exchange;
pub mod persistence;
pub mod repositories;
