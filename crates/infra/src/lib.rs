//! Infrastructure layer: durable job queue, background processor, Postgres
//! adapters and configuration.

pub mod config;
pub mod jobs;
pub mod storage;

pub use config::{AppConfig, ProviderConfig};
