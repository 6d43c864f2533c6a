//! Shared utilities

pub mod error;
pub mod subject;
pub mod validation;

pub use error::{GatewayError, GatewayResult};
pub use subject::SubjectName;
