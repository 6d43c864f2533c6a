//! Gateway services

pub mod ecs_client;
pub mod enrollment;
pub mod gateway;
pub mod reader;
pub mod status;
pub mod sync;
pub mod transport;

pub use ecs_client::{EcsClient, PAGE_SIZE};
pub use enrollment::{resolve_renewal_intent, EnrollmentOrchestrator, SubjectAttributes};
pub use gateway::{validate_connection_with, EcsGateway};
pub use reader::{CertificateDataReader, InMemoryCertificateReader};
pub use status::{translate_status, translate_thumbprint_status};
pub use sync::{fetch_record, SyncSummary, Synchronizer};
pub use transport::{Credential, HttpTransport, RawResponse, RemoteRequest, Transport};
