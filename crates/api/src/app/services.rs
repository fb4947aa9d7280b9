use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use prospector_core::UserId;
use prospector_enrichment::providers::{ApolloClient, HunterClient, PerplexityClient};
use prospector_enrichment::{
    BillingGuard, ContactDiscovery, CreditLedger, DiscoveryProvider, EmailProvider, EmailScorer, GrantOutcome, InMemoryCreditLedger,
    InMemoryTargetStore, LedgerError, NameScorer, SearchPipeline, TargetStore, WaterfallOrchestrator,
};
use prospector_infra::AppConfig;
use prospector_infra::jobs::{InMemoryJobStore, JobProcessor, JobStore, PipelineRunner, PostgresJobStore};
use prospector_infra::storage::{self, PostgresCreditLedger, PostgresTargetStore};

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub jobs: Arc<dyn JobStore>,
    pub processor: Arc<JobProcessor>,
    pub pipeline: Arc<SearchPipeline>,
    pub ledger: Arc<dyn CreditLedger>,
    pub targets: Arc<dyn TargetStore>,
    starting_credits: u32,
    opened_accounts: Mutex<HashSet<UserId>>,
}

/// Storage backends the services run on.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub targets: Arc<dyn TargetStore>,
    pub ledger: Arc<dyn CreditLedger>,
}

impl Stores {
    pub fn in_memory(config: &AppConfig) -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::with_defaults(config.jobs.clone())),
            targets: InMemoryTargetStore::arc(),
            ledger: InMemoryCreditLedger::arc(),
        }
    }

    pub fn postgres(pool: PgPool, config: &AppConfig) -> Self {
        Self {
            jobs: Arc::new(PostgresJobStore::new(pool.clone()).with_defaults(config.jobs.clone())),
            targets: Arc::new(PostgresTargetStore::new(pool.clone())),
            ledger: Arc::new(PostgresCreditLedger::new(pool)),
        }
    }
}

/// External providers the pipeline calls.
pub struct Providers {
    pub discovery: Arc<dyn DiscoveryProvider>,
    pub email: Vec<Arc<dyn EmailProvider>>,
}

impl Providers {
    /// HTTP clients for every configured provider. A provider without an API
    /// key is still registered and reports itself unavailable.
    pub fn http(config: &AppConfig) -> anyhow::Result<Self> {
        let perplexity = Arc::new(
            PerplexityClient::new(config.providers.perplexity.clone()).context("failed to build Perplexity client")?,
        );
        let apollo = Arc::new(ApolloClient::new(config.providers.apollo.clone()).context("failed to build Apollo client")?);
        let hunter = Arc::new(HunterClient::new(config.providers.hunter.clone()).context("failed to build Hunter client")?);

        if config.providers.is_unconfigured() {
            warn!("no provider API keys configured; searches will fail until one is set");
        }

        Ok(Self {
            discovery: perplexity.clone(),
            email: vec![
                perplexity as Arc<dyn EmailProvider>,
                apollo as Arc<dyn EmailProvider>,
                hunter as Arc<dyn EmailProvider>,
            ],
        })
    }
}

impl AppServices {
    pub fn new(config: &AppConfig, stores: Stores, providers: Providers) -> Self {
        let waterfall = WaterfallOrchestrator::new(
            providers.email,
            stores.targets.clone(),
            EmailScorer::new(config.scoring),
            config.waterfall,
        );
        let discovery = ContactDiscovery::new(
            providers.discovery,
            stores.targets.clone(),
            NameScorer::new(config.scoring),
        );
        let pipeline = Arc::new(SearchPipeline::new(
            discovery,
            Arc::new(waterfall),
            BillingGuard::new(stores.ledger.clone(), config.billing),
            stores.targets.clone(),
            config.pipeline,
        ));
        let processor = Arc::new(JobProcessor::new(
            stores.jobs.clone(),
            Arc::new(PipelineRunner::new(pipeline.clone())),
            config.processor.clone(),
        ));

        Self {
            jobs: stores.jobs,
            processor,
            pipeline,
            ledger: stores.ledger,
            targets: stores.targets,
            starting_credits: config.starting_credits,
            opened_accounts: Mutex::new(HashSet::new()),
        }
    }

    /// Grant the starting balance the first time a user is seen.
    ///
    /// The grant is keyed per user, so concurrent first requests and restarts
    /// credit the account once.
    pub async fn ensure_account(&self, user_id: UserId) -> Result<(), LedgerError> {
        if self.starting_credits == 0 || self.is_known(user_id) {
            return Ok(());
        }
        let key = format!("starting_credits:{user_id}");
        match self
            .ledger
            .grant_once(user_id, self.starting_credits, &key, "starting balance")
            .await?
        {
            GrantOutcome::Granted { new_balance } => {
                info!(user_id = %user_id, balance = new_balance, "opened credit account")
            }
            GrantOutcome::AlreadyGranted { .. } => {}
        }
        self.opened_accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
        Ok(())
    }

    fn is_known(&self, user_id: UserId) -> bool {
        self.opened_accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id)
    }
}

/// Wire services from configuration: Postgres when `USE_PERSISTENT_STORES`
/// is set, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = if config.use_persistent_stores {
        let url = config
            .database_url
            .as_deref()
            .context("USE_PERSISTENT_STORES is set but DATABASE_URL is missing")?;
        let pool = PgPool::connect(url).await.context("failed to connect to Postgres")?;
        storage::apply_schema(&pool).await.context("failed to apply schema")?;
        info!("using Postgres stores");
        Stores::postgres(pool, config)
    } else {
        info!("using in-memory stores");
        Stores::in_memory(config)
    };

    Ok(AppServices::new(config, stores, Providers::http(config)?))
}
