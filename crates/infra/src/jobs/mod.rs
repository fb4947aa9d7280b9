//! Durable search jobs: lifecycle store, retry policy and the background
//! processor.
//!
//! ## Design
//!
//! - Jobs are user-scoped and persisted before any work starts
//! - The `status` column is the mutual-exclusion gate: a job is claimed by
//!   moving it `pending -> processing` atomically
//! - Failed attempts return to `pending` with a backoff gate until
//!   `max_retries` is reached, then become terminal `failed`
//! - Jobs left `processing` by a crash are requeued on startup
//!
//! ## Components
//!
//! - `SearchJob`: the job row and its lifecycle rules
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `JobProcessor`: polls, executes with a timeout and records outcomes
//! - `SearchJobRunner`: the work behind a job (the enrichment pipeline)

pub mod postgres;
pub mod processor;
pub mod runner;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use processor::{JobProcessor, ProcessorConfig, ProcessorError, ProcessorHandle, ProcessorStats, SweepReport};
pub use runner::{JobOutput, PipelineRunner, SearchJobRunner, StoreProgress};
pub use store::{InMemoryJobStore, JobDefaults, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, JobId, JobPatch, JobProgress, JobSource, JobStatus, NewSearchJob, RetryPolicy, SearchJob,
};
