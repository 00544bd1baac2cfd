//! Common test utilities for import-service integration tests.

#![allow(dead_code)]

use import_service::config::{DatabaseConfig, EngineConfig, ImportConfig};
use import_service::startup::Application;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,import_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config() -> ImportConfig {
    let database_url =
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests");

    ImportConfig {
        common: CommonConfig {
            port: 0,
            request_timeout_secs: 30,
        },
        service_name: "import-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 4,
            min_connections: 1,
        },
        engine: EngineConfig::default(),
    }
}

/// Running service plus a fresh user with default categories.
pub struct TestApp {
    pub address: String,
    pub http_port: u16,
    pub user_id: Uuid,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    init_tracing();

    let app = Application::build(test_config())
        .await
        .expect("Failed to build application");
    let http_port = app.http_port();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let test_app = TestApp {
        address: format!("http://127.0.0.1:{}", http_port),
        http_port,
        user_id: Uuid::new_v4(),
        client: reqwest::Client::new(),
    };

    test_app.create_category("Shopping", "expense").await;
    test_app.create_category("Refunds", "income").await;
    test_app
}

impl TestApp {
    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", self.user_id.to_string())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", self.user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn create_category(&self, name: &str, kind: &str) -> Uuid {
        let response = self
            .post(
                "/v1/categories",
                &json!({ "name": name, "kind": kind, "is_default": true }),
            )
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("Failed to parse category");
        body["category_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("Category id missing")
    }

    /// Credit card closing on the 10th, due on the 20th.
    pub async fn create_card(&self) -> Uuid {
        let response = self
            .post(
                "/v1/accounts",
                &json!({
                    "name": "Test Card",
                    "account_type": "credit_card",
                    "closing_day": 10,
                    "payment_due_day": 20
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("Failed to parse account");
        body["account_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("Account id missing")
    }

    pub async fn import(&self, account_id: Uuid, body: Value) -> reqwest::Response {
        self.post(&format!("/v1/accounts/{}/imports", account_id), &body)
            .await
    }

    /// Import and return the summary, asserting success.
    pub async fn import_ok(&self, account_id: Uuid, body: Value) -> Value {
        let response = self.import(account_id, body).await;
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse summary")
    }

    pub async fn purchases(&self, account_id: Uuid) -> Vec<Value> {
        let response = self
            .get(&format!("/v1/accounts/{}/purchases", account_id))
            .await;
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse purchases")
    }

    pub async fn statements(&self, account_id: Uuid) -> Vec<Value> {
        let response = self
            .get(&format!("/v1/accounts/{}/statements", account_id))
            .await;
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse statements")
    }
}

pub fn expense(description: &str, amount: i64, date: &str) -> Value {
    json!({
        "description": description,
        "amount": amount,
        "date": date,
        "kind": "expense"
    })
}

pub fn installment(base: &str, current: u32, total: u32, amount: i64, date: &str) -> Value {
    json!({
        "description": format!("{} {}/{}", base, current, total),
        "amount": amount,
        "date": date,
        "kind": "expense",
        "installment": { "base_description": base, "current": current, "total": total }
    })
}

pub fn income(description: &str, amount: i64, date: &str) -> Value {
    json!({
        "description": description,
        "amount": amount,
        "date": date,
        "kind": "income"
    })
}

/// Statement of `month` in a statement listing.
pub fn statement<'a>(statements: &'a [Value], month: &str) -> &'a Value {
    statements
        .iter()
        .find(|s| s["statement_month"] == month)
        .unwrap_or_else(|| panic!("Statement {} missing", month))
}
