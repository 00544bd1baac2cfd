//! Health check integration tests.

mod common;

use common::spawn_app;

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn health_check_returns_200() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "import-service-test");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn metrics_are_exposed() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("Failed to read metrics");
    assert!(body.contains("import_statement_recalc_failures_total"));
}
