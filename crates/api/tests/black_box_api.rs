use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use prospector_api::app::services::{AppServices, Providers, Stores};
use prospector_auth::JwtClaims;
use prospector_core::UserId;
use prospector_enrichment::providers::{ScriptedDiscovery, ScriptedEmailProvider};
use prospector_enrichment::{EmailProvider, TierId};
use prospector_infra::AppConfig;

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig::default();
        let services = AppServices::new(&config, Stores::in_memory(&config), scripted_providers());

        // Same router as prod, bound to an ephemeral port. The background
        // processor is not started; jobs run through the execute endpoint.
        let app = prospector_api::app::build_app(SECRET, Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, serde_json::Value) {
        let res = self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(serde_json::Value::Null))
    }

    async fn post(&self, token: &str, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(serde_json::Value::Null))
    }

    async fn create_job(&self, token: &str, body: serde_json::Value) -> String {
        let (status, body) = self.post(token, "/search-jobs", body).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        body["job_id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn scripted_providers() -> Providers {
    let discovery = ScriptedDiscovery::new()
        .company("Acme", Some("https://acme.io"))
        .contact("Acme", TierId::CoreLeadership, "Ada Lovelace", "CEO", 90)
        .contact("Acme", TierId::DepartmentHeads, "Grace Hopper", "VP Engineering", 85);
    let apollo = ScriptedEmailProvider::new(TierId::ApolloSearch)
        .answer("Ada Lovelace", "ada@acme.io", 90)
        .answer("Grace Hopper", "grace@acme.io", 80);

    Providers {
        discovery: Arc::new(discovery),
        email: vec![
            Arc::new(ScriptedEmailProvider::new(TierId::ContactEnrichment)) as Arc<dyn EmailProvider>,
            Arc::new(apollo) as Arc<dyn EmailProvider>,
            Arc::new(ScriptedEmailProvider::new(TierId::HunterSearch)) as Arc<dyn EmailProvider>,
        ],
    }
}

fn mint_jwt(user: UserId) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let server = TestServer::spawn().await;

    let res = server.client.get(server.url("/search-jobs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .get(server.url("/search-jobs"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn created_job_is_visible_only_to_its_owner() {
    let server = TestServer::spawn().await;
    let owner = mint_jwt(UserId::new());
    let stranger = mint_jwt(UserId::new());

    let job_id = server
        .create_job(&owner, json!({ "query": "industrial automation", "priority": 2 }))
        .await;

    let (status, job) = server.get(&owner, &format!("/search-jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["search_type"], "companies");
    assert_eq!(job["priority"], 2);
    assert_eq!(job["max_retries"], 3);
    assert_eq!(job["progress"]["phase"], "queued");

    let (status, list) = server.get(&owner, "/search-jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["items"].as_array().unwrap().len(), 1);

    let (status, stats) = server.get(&owner, "/search-jobs/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["pending"], 1);

    let (status, _) = server.get(&stranger, &format!("/search-jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = server.get(&stranger, "/search-jobs").await;
    assert!(list["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let server = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());

    let (status, body) = server.post(&token, "/search-jobs", json!({ "query": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = server
        .post(&token, "/search-jobs", json!({ "query": "x", "search_type": "people" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = server
        .post(
            &token,
            "/search-jobs",
            json!({ "query": "x", "contact_search_config": { "interns": true } }),
        )
        .await;
    assert!(status.is_client_error());

    let (status, body) = server.get(&token, "/search-jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn execute_completes_the_job_and_charges_each_email_once() {
    let server = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());
    let job_id = server.create_job(&token, json!({ "query": "industrial automation" })).await;

    let (status, job) = server
        .post(&token, &format!("/search-jobs/{job_id}/execute"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{job}");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result_count"], 2);
    assert_eq!(job["results"]["emails_discovered"], 2);
    assert_eq!(job["results"]["credits_charged"], 10);
    assert!(job["completed_at"].is_string());
    assert!(job["error"].is_null());

    let (_, credits) = server.get(&token, "/credits").await;
    assert_eq!(credits["balance"], 90);
    let deductions = credits["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["delta"].as_i64().unwrap_or(0) < 0)
        .count();
    assert_eq!(deductions, 2);

    // A finished job can neither run again nor be cancelled.
    let (status, body) = server
        .post(&token, &format!("/search-jobs/{job_id}/execute"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let res = server
        .client
        .delete(server.url(&format!("/search-jobs/{job_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn pending_job_can_be_cancelled() {
    let server = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());
    let job_id = server.create_job(&token, json!({ "query": "robotics" })).await;

    let res = server
        .client
        .delete(server.url(&format!("/search-jobs/{job_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let (status, _) = server.get(&token, &format!("/search-jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn contact_only_search_is_free_and_single_enrichment_bills_once() {
    let server = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());
    let job_id = server
        .create_job(&token, json!({ "query": "industrial automation", "search_type": "contact-only" }))
        .await;

    let (status, job) = server
        .post(&token, &format!("/search-jobs/{job_id}/execute"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{job}");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["results"]["credits_charged"], 0);

    let (_, credits) = server.get(&token, "/credits").await;
    assert_eq!(credits["balance"], 100);

    let grace = job["results"]["companies"][0]["contacts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "Grace Hopper")
        .expect("discovered contact")["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = server.post(&token, &format!("/contacts/{grace}/enrich"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"]["outcome"], "discovered");
    assert_eq!(body["outcome"]["email"], "grace@acme.io");
    assert_eq!(body["settlement"]["status"], "charged");
    assert_eq!(body["contact"]["email"], "grace@acme.io");

    let (status, body) = server.post(&token, &format!("/contacts/{grace}/enrich"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "already_enriched");

    let (_, credits) = server.get(&token, "/credits").await;
    assert_eq!(credits["balance"], 95);
}

#[tokio::test]
async fn enriching_an_unknown_contact_is_not_found() {
    let server = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());

    let (status, body) = server
        .post(&token, "/contacts/0191f0a4-7c1e-7d3a-9b2c-1f2e3d4c5b6a/enrich", json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (_, credits) = server.get(&token, "/credits").await;
    assert_eq!(credits["balance"], 100);
}
