//! Cucumber features for the ECS gateway

pub mod step_definitions;

pub use support::TestWorld;
