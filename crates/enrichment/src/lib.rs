//! `prospector-enrichment`
//!
//! **Responsibility:** contact discovery and email enrichment.
//!
//! - [`scoring`]: the Confidence Scoring Engine (names and emails).
//! - [`providers`]: uniform adapters over the external discovery services.
//! - [`waterfall`]: per-contact tier sequencing with memoization.
//! - [`billing`]: the guard that charges a discovery at most once.
//! - [`pipeline`]: the end-to-end search a background job executes.
//!
//! Storage and the credit ledger are collaborators behind [`store::TargetStore`]
//! and [`ledger::CreditLedger`]; in-memory implementations live next to the
//! traits, durable ones in `prospector-infra`.

pub mod billing;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod request;
pub mod scoring;
pub mod store;
pub mod waterfall;

pub use billing::{BillingConfig, BillingError, BillingGuard, Settlement};
pub use discovery::{ContactDiscovery, DiscoveryReport};
pub use error::EnrichmentError;
pub use ledger::{
    CreditLedger, DeductOutcome, DeductRequest, GrantOutcome, InMemoryCreditLedger, LedgerEntry, LedgerError,
};
pub use model::{Company, CompletedSearches, Contact, TierId};
pub use pipeline::{
    CompanySummary, ContactOutcome, ContactSummary, NoopProgress, PipelineConfig, ProgressSink, SearchPhase,
    SearchPipeline, SearchProgress, SearchResults, SingleEnrichment,
};
pub use providers::{DiscoveryProvider, EmailProvider, ProviderError, ProviderSettings};
pub use request::{ContactSearchConfig, RoleTier, SearchRequest, SearchType};
pub use scoring::{EmailScorer, NameScorer, ScoringConfig};
pub use store::{InMemoryTargetStore, StoreError, TargetStore};
pub use waterfall::{EnrichmentOutcome, WaterfallConfig, WaterfallOrchestrator};
