//! Integration tests for statement imports.

mod common;

use common::{expense, income, installment, spawn_app};
use serde_json::{json, Value};
use uuid::Uuid;

fn entries_sum(purchase: &Value) -> i64 {
    purchase["entries"]
        .as_array()
        .expect("entries missing")
        .iter()
        .map(|e| e["amount"].as_i64().unwrap_or_default())
        .sum()
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn reimport_with_external_ids_changes_nothing() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let mut grocery = expense("Mercado", 4500, "2024-03-02");
    grocery["external_id"] = json!("stmt-1");
    let mut cinema = expense("Cinema", 3000, "2024-03-04");
    cinema["external_id"] = json!("stmt-2");
    let mut cashback = income("Cashback", 500, "2024-03-05");
    cashback["external_id"] = json!("stmt-3");
    let batch = json!({ "rows": [grocery, cinema, cashback] });

    let first = app.import_ok(account_id, batch.clone()).await;
    assert_eq!(first["imported_expenses"], 2);
    assert_eq!(first["imported_income"], 1);
    assert_eq!(first["skipped_duplicates"], 0);

    let second = app.import_ok(account_id, batch).await;
    assert_eq!(second["imported_expenses"], 0);
    assert_eq!(second["imported_income"], 0);
    assert_eq!(second["skipped_duplicates"], 3);
    assert_eq!(second["stale_views"], json!([]));

    assert_eq!(app.purchases(account_id).await.len(), 2);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn later_installment_extends_existing_purchase() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let first = app
        .import_ok(
            account_id,
            json!({ "rows": [installment("Amazon", 1, 3, 1000, "2024-03-05")] }),
        )
        .await;
    assert_eq!(first["created_purchases"], 1);

    let second = app
        .import_ok(
            account_id,
            json!({ "rows": [installment("Amazon", 2, 3, 1000, "2024-04-05")] }),
        )
        .await;
    assert_eq!(second["created_purchases"], 0);
    assert_eq!(second["imported_expenses"], 1);

    let purchases = app.purchases(account_id).await;
    assert_eq!(purchases.len(), 1);
    let purchase = &purchases[0];
    assert_eq!(purchase["installment_count"], 3);
    assert_eq!(purchase["total_amount"], 2000);
    assert_eq!(entries_sum(purchase), 2000);

    let months: Vec<&str> = purchase["entries"]
        .as_array()
        .expect("entries missing")
        .iter()
        .filter_map(|e| e["statement_month"].as_str())
        .collect();
    assert_eq!(months, vec!["2024-03", "2024-04"]);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn reimporting_installment_without_ids_is_skipped() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;
    let batch = json!({ "rows": [installment("Amazon", 1, 3, 1000, "2024-03-05")] });

    app.import_ok(account_id, batch.clone()).await;
    let second = app.import_ok(account_id, batch).await;

    assert_eq!(second["imported_expenses"], 0);
    assert_eq!(second["skipped_duplicates"], 1);
    assert_eq!(app.purchases(account_id).await.len(), 1);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn identical_regular_rows_stay_separate() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let summary = app
        .import_ok(
            account_id,
            json!({ "rows": [
                expense("Netflix", 1000, "2024-03-05"),
                expense("Netflix", 1000, "2024-03-15"),
            ] }),
        )
        .await;
    assert_eq!(summary["created_purchases"], 2);

    let purchases = app.purchases(account_id).await;
    assert_eq!(purchases.len(), 2);
    let mut months: Vec<&str> = purchases
        .iter()
        .filter_map(|p| p["entries"][0]["statement_month"].as_str())
        .collect();
    months.sort_unstable();
    assert_eq!(months, vec!["2024-03", "2024-04"]);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn conflicting_amounts_create_distinct_purchases() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let summary = app
        .import_ok(
            account_id,
            json!({ "rows": [
                installment("Loja TV", 1, 10, 10000, "2024-03-05"),
                installment("Loja TV", 1, 10, 25000, "2024-03-06"),
            ] }),
        )
        .await;
    assert_eq!(summary["created_purchases"], 2);

    let mut totals: Vec<i64> = app
        .purchases(account_id)
        .await
        .iter()
        .filter_map(|p| p["total_amount"].as_i64())
        .collect();
    totals.sort_unstable();
    assert_eq!(totals, vec![10000, 25000]);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn refund_is_linked_and_netted_from_statement() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    app.import_ok(
        account_id,
        json!({ "rows": [expense("Loja ABC", 5000, "2024-03-01")] }),
    )
    .await;

    let summary = app
        .import_ok(
            account_id,
            json!({ "rows": [
                income("Estorno Loja ABC", 5000, "2024-03-08"),
                expense("Padaria", 1200, "2024-03-09"),
            ] }),
        )
        .await;
    assert_eq!(summary["imported_income"], 1);

    let purchases = app.purchases(account_id).await;
    let refunded = purchases
        .iter()
        .find(|p| p["description"] == "Loja ABC")
        .expect("Refunded purchase missing");
    assert_eq!(refunded["refunded_amount"], 5000);

    let statements = app.statements(account_id).await;
    assert_eq!(common::statement(&statements, "2024-03")["total_amount"], 1200);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn empty_batch_is_rejected() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let response = app.import(account_id, json!({ "rows": [] })).await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn import_requires_user_header() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let response = app
        .client
        .post(format!("{}/v1/accounts/{}/imports", app.address, account_id))
        .json(&json!({ "rows": [expense("Netflix", 1000, "2024-03-05")] }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn unknown_account_is_not_found() {
    let app = spawn_app().await;

    let response = app
        .import(
            Uuid::new_v4(),
            json!({ "rows": [expense("Netflix", 1000, "2024-03-05")] }),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn foreign_category_override_is_rejected() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let response = app
        .import(
            account_id,
            json!({
                "rows": [expense("Netflix", 1000, "2024-03-05")],
                "category_overrides": { "0": Uuid::new_v4() }
            }),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert!(app.purchases(account_id).await.is_empty());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn corrected_installment_amount_keeps_totals_consistent() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    app.import_ok(
        account_id,
        json!({ "rows": [installment("Amazon", 1, 3, 1000, "2024-03-05")] }),
    )
    .await;
    let second = app
        .import_ok(
            account_id,
            json!({ "rows": [
                installment("Amazon", 1, 3, 1050, "2024-03-05"),
                installment("Amazon", 2, 3, 1000, "2024-04-05"),
            ] }),
        )
        .await;
    assert_eq!(second["created_purchases"], 0);
    assert_eq!(second["updated_entries"], 1);
    assert_eq!(second["imported_expenses"], 2);

    let purchases = app.purchases(account_id).await;
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0]["total_amount"], 2050);
    assert_eq!(entries_sum(&purchases[0]), 2050);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn every_submitted_row_is_counted() {
    let app = spawn_app().await;
    let account_id = app.create_card().await;

    let mut tagged = installment("Shop", 1, 3, 3000, "2024-03-05");
    tagged["external_id"] = json!("e1");
    let rows = vec![
        tagged,
        installment("Shop", 1, 3, 3000, "2024-03-05"),
        installment("Gym", 1, 2, 900, "2024-03-06"),
        installment("Gym", 1, 2, 950, "2024-03-06"),
        expense("Padaria", 700, "2024-03-07"),
        income("Cashback", 200, "2024-03-08"),
    ];
    let submitted = rows.len() as u64;

    let summary = app.import_ok(account_id, json!({ "rows": rows })).await;
    let counted = ["imported_expenses", "imported_income", "skipped_duplicates", "superseded_rows"]
        .iter()
        .map(|field| summary[*field].as_u64().unwrap_or_default())
        .sum::<u64>();
    assert_eq!(counted, submitted);
    assert_eq!(summary["superseded_rows"], 1);

    // The untagged "Shop" row is a second purchase, not a copy of "e1".
    let shops = app
        .purchases(account_id)
        .await
        .into_iter()
        .filter(|p| p["description"] == "Shop")
        .count();
    assert_eq!(shops, 2);
}
