//! Tier B: people-match directory provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::TierId;

use super::{error_for_status, EmailProvider, ProviderError, ProviderResult, ProviderSettings, ProviderTarget};

pub const DEFAULT_BASE_URL: &str = "https://api.apollo.io";

/// Returned instead of an address when the account has not unlocked it.
const LOCKED_EMAIL_MARKER: &str = "email_not_unlocked@";

pub struct ApolloClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl ApolloClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: settings.http_client()?,
            settings,
        })
    }
}

#[derive(Debug, Serialize)]
struct MatchRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
    reveal_personal_emails: bool,
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    person: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct Person {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_status: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn interpret(response: MatchResponse) -> ProviderResult {
    let Some(person) = response.person else {
        return ProviderResult::not_found();
    };
    let email = person
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty() && !e.to_ascii_lowercase().starts_with(LOCKED_EMAIL_MARKER));
    match email {
        Some(email) => {
            let confidence = match person.email_status.as_deref() {
                Some("verified") => 90,
                Some("likely_to_engage") | Some("extrapolated") => 70,
                _ => 60,
            };
            ProviderResult::found(email, confidence).with_role(person.title)
        }
        None => ProviderResult::not_found(),
    }
}

#[async_trait]
impl EmailProvider for ApolloClient {
    fn tier(&self) -> TierId {
        TierId::ApolloSearch
    }

    fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    async fn search(&self, target: &ProviderTarget) -> Result<ProviderResult, ProviderError> {
        let api_key = self.settings.api_key.as_deref().ok_or(ProviderError::Unavailable)?;
        if target.first_name.is_empty() || target.last_name.is_empty() {
            return Ok(ProviderResult::not_found());
        }
        let body = MatchRequest {
            first_name: &target.first_name,
            last_name: &target.last_name,
            organization_name: target.company_name.as_deref(),
            domain: target.domain.as_deref(),
            reveal_personal_emails: false,
        };

        tracing::debug!(contact_id = %target.contact_id, "apollo people match");

        let response = self
            .http
            .post(self.settings.url("/v1/people/match"))
            .header("X-Api-Key", api_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProviderResult::not_found());
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        let parsed: MatchResponse = response.json().await?;
        Ok(interpret(parsed))
    }
}
