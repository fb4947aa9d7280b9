//! Environment-driven service configuration.
//!
//! Every setting has a default; a value that fails to parse is logged and
//! the default is kept, so a typo never prevents startup.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use prospector_enrichment::providers::{apollo, hunter, perplexity};
use prospector_enrichment::{BillingConfig, PipelineConfig, ProviderSettings, ScoringConfig, WaterfallConfig};

use crate::jobs::{JobDefaults, ProcessorConfig};

/// Connection settings for each external provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub perplexity: ProviderSettings,
    pub apollo: ProviderSettings,
    pub hunter: ProviderSettings,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            perplexity: ProviderSettings::new(None, perplexity::DEFAULT_BASE_URL),
            apollo: ProviderSettings::new(None, apollo::DEFAULT_BASE_URL),
            hunter: ProviderSettings::new(None, hunter::DEFAULT_BASE_URL),
        }
    }
}

impl ProviderConfig {
    /// True when no provider has credentials.
    pub fn is_unconfigured(&self) -> bool {
        self.perplexity.api_key.is_none() && self.apollo.api_key.is_none() && self.hunter.api_key.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub processor: ProcessorConfig,
    pub jobs: JobDefaults,
    pub providers: ProviderConfig,
    pub pipeline: PipelineConfig,
    pub waterfall: WaterfallConfig,
    pub billing: BillingConfig,
    pub scoring: ScoringConfig,
    /// Credits granted to a user on first contact with the service.
    pub starting_credits: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: "dev-secret".to_string(),
            database_url: None,
            use_persistent_stores: false,
            processor: ProcessorConfig::default(),
            jobs: JobDefaults::default(),
            providers: ProviderConfig::default(),
            pipeline: PipelineConfig::default(),
            waterfall: WaterfallConfig::default(),
            billing: BillingConfig::default(),
            scoring: ScoringConfig::default(),
            starting_credits: 100,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup: &lookup };
        let mut config = AppConfig::default();

        if let Some(addr) = env.string("BIND_ADDR") {
            config.bind_addr = addr;
        }
        match env.string("JWT_SECRET") {
            Some(secret) => config.jwt_secret = secret,
            None => warn!("JWT_SECRET not set; using insecure dev default"),
        }
        config.database_url = env.string("DATABASE_URL");
        config.use_persistent_stores = env.flag("USE_PERSISTENT_STORES", false);

        let processor = &mut config.processor;
        processor.poll_interval = env.secs("JOB_POLL_INTERVAL_SECS", processor.poll_interval);
        let timeout = env.secs("JOB_TIMEOUT_SECS", processor.job_timeout);
        *processor = processor.clone().with_job_timeout(timeout);
        processor.retry_policy.base_delay = env.secs("JOB_RETRY_BASE_SECS", processor.retry_policy.base_delay);
        processor.retry_policy.max_delay = env.secs("JOB_RETRY_MAX_SECS", processor.retry_policy.max_delay);
        config.jobs.max_retries = env.parse("JOB_MAX_RETRIES", config.jobs.max_retries);
        processor.retry_policy.max_attempts = config.jobs.max_retries;
        let days = env.parse("JOB_RETENTION_DAYS", 7_i64);
        config.jobs.retention = chrono::Duration::days(days.max(1));

        let provider_timeout = env.secs("PROVIDER_TIMEOUT_SECS", config.waterfall.call_timeout);
        config.waterfall.call_timeout = provider_timeout;
        config.providers = ProviderConfig {
            perplexity: env.provider("PERPLEXITY", perplexity::DEFAULT_BASE_URL, provider_timeout),
            apollo: env.provider("APOLLO", apollo::DEFAULT_BASE_URL, provider_timeout),
            hunter: env.provider("HUNTER", hunter::DEFAULT_BASE_URL, provider_timeout),
        };

        let pipeline = &mut config.pipeline;
        pipeline.batch_size = env.parse("ENRICHMENT_BATCH_SIZE", pipeline.batch_size).max(1);
        pipeline.contacts_per_company = env.parse("CONTACTS_PER_COMPANY", pipeline.contacts_per_company);
        pipeline.company_limit = env.parse("COMPANY_LIMIT", pipeline.company_limit).max(1);

        config.billing.email_cost = env.parse("EMAIL_CREDIT_COST", config.billing.email_cost).max(1);
        config.billing.min_balance = env.parse("MIN_CREDIT_BALANCE", config.billing.min_balance);
        config.starting_credits = env.parse("STARTING_CREDITS", config.starting_credits);

        config.scoring.name_floor = env.parse("NAME_SCORE_FLOOR", config.scoring.name_floor);
        config.scoring.company_name_penalty = env.parse("COMPANY_NAME_PENALTY", config.scoring.company_name_penalty);

        config
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr + Copy + std::fmt::Debug>(&self, key: &str, default: T) -> T {
        match self.string(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, default = ?default, "invalid configuration value; using default");
                default
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => default,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(v) => {
                warn!(key, value = %v, "invalid boolean; using default");
                default
            }
        }
    }

    fn provider(&self, prefix: &str, default_url: &str, timeout: Duration) -> ProviderSettings {
        let base_url = self
            .string(&format!("{prefix}_BASE_URL"))
            .unwrap_or_else(|| default_url.to_string());
        ProviderSettings::new(self.string(&format!("{prefix}_API_KEY")), base_url).with_timeout(timeout)
    }
}
