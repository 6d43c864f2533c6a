//! ECS CA Gateway Library
//!
//! Adapter between a generic certificate-management platform and the Entrust
//! Certificate Services (ECS) REST API.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::GatewayConfig;
pub use services::{CertificateDataReader, EcsClient, EcsGateway, InMemoryCertificateReader};
pub use utils::error::{GatewayError, GatewayResult};
