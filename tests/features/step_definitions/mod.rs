//! Step definitions for Cucumber scenarios

pub mod renewal_steps;
