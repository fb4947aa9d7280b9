//! Tier C: domain-based email finder.

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::TierId;

use super::{error_for_status, EmailProvider, ProviderError, ProviderResult, ProviderSettings, ProviderTarget};

pub const DEFAULT_BASE_URL: &str = "https://api.hunter.io";

pub struct HunterClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl HunterClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: settings.http_client()?,
            settings,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FinderResponse {
    #[serde(default)]
    data: Option<FinderData>,
}

#[derive(Debug, Deserialize)]
struct FinderData {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    position: Option<String>,
}

fn interpret(response: FinderResponse) -> ProviderResult {
    let Some(data) = response.data else {
        return ProviderResult::not_found();
    };
    match data.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()) {
        Some(email) => {
            let confidence = data.score.unwrap_or(50).min(100) as u8;
            ProviderResult::found(email, confidence).with_role(data.position)
        }
        None => ProviderResult::not_found(),
    }
}

#[async_trait]
impl EmailProvider for HunterClient {
    fn tier(&self) -> TierId {
        TierId::HunterSearch
    }

    fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    async fn search(&self, target: &ProviderTarget) -> Result<ProviderResult, ProviderError> {
        let api_key = self.settings.api_key.as_deref().ok_or(ProviderError::Unavailable)?;
        if target.domain.is_none() && target.company_name.is_none() {
            return Ok(ProviderResult::not_found());
        }

        let mut params: Vec<(&str, &str)> = vec![
            ("first_name", target.first_name.as_str()),
            ("last_name", target.last_name.as_str()),
            ("api_key", api_key),
        ];
        match (target.domain.as_deref(), target.company_name.as_deref()) {
            (Some(domain), _) => params.push(("domain", domain)),
            (None, Some(company)) => params.push(("company", company)),
            (None, None) => {}
        }

        tracing::debug!(contact_id = %target.contact_id, "hunter email finder");

        let response = self
            .http
            .get(self.settings.url("/v2/email-finder"))
            .query(&params)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProviderResult::not_found());
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        let parsed: FinderResponse = response.json().await?;
        Ok(interpret(parsed))
    }
}
