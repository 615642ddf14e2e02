mod common;

use chrono::Utc;
use client_billing_service::models::{NewReminderLog, ReminderLogStatus, ReminderType};
use client_billing_service::services::{BillingStore, MemoryStore, MockEmailProvider};
use client_billing_service::startup::Application;
use common::{dec, dec_field, id_of, test_config, TestApp};
use std::sync::Arc;
use serde_json::{json, Value};
use uuid::Uuid;

fn design_and_dev(client_id: Uuid) -> Value {
    json!({
        "client_id": client_id,
        "due_date": "2025-03-15",
        "items": [
            { "description": "Design", "amount": "500" },
            { "description": "Dev", "amount": "1200" }
        ]
    })
}

fn assert_totals_consistent(body: &Value) {
    let subtotal = dec_field(body, "subtotal");
    let tps = dec_field(body, "tps");
    let tvq = dec_field(body, "tvq");
    assert_eq!(dec_field(body, "total"), subtotal + tps + tvq);
}

#[tokio::test]
async fn test_health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "client-billing-service");
}

#[tokio::test]
async fn test_listener_binds_configured_host() {
    let mut config = test_config("http://127.0.0.1:9");
    config.common.host = "256.0.0.1".to_string();

    let result = Application::with_components(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MockEmailProvider::new()),
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_untaxed_invoice_totals() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;

    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;

    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["invoice_number"], 1);
    assert_eq!(dec_field(&invoice, "subtotal"), dec("1700"));
    assert_eq!(dec_field(&invoice, "tps"), dec("0"));
    assert_eq!(dec_field(&invoice, "tvq"), dec("0"));
    assert_eq!(dec_field(&invoice, "total"), dec("1700"));
    assert_eq!(invoice["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_taxed_invoice_rounds_each_tax_to_cents() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(true).await;

    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;

    assert_eq!(dec_field(&invoice, "subtotal"), dec("1700.00"));
    assert_eq!(dec_field(&invoice, "tps"), dec("85.00"));
    assert_eq!(dec_field(&invoice, "tvq"), dec("169.58"));
    assert_eq!(dec_field(&invoice, "total"), dec("1954.58"));
    assert_totals_consistent(&invoice);
}

#[tokio::test]
async fn test_totals_stay_consistent_across_item_updates() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(true).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let path = format!("/invoices/{}", id_of(&invoice, "invoice_id"));

    for items in [
        json!([{ "description": "Audit", "amount": "99.99" }]),
        json!([
            { "description": "Audit", "amount": "0.10" },
            { "description": "Hosting", "amount": "12.35" },
            { "description": "Support", "amount": "333.33" }
        ]),
        json!([{ "description": "Nothing billable", "amount": "0" }]),
    ] {
        let response = app.put(tenant.user_id, &path, json!({ "items": items })).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_totals_consistent(&body);
    }

    let response = app.get(tenant.user_id, &path).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(dec_field(&body, "total"), dec("0"));
    assert_eq!(body["charges_taxes"], true);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invoice_numbers_are_sequential_per_user() {
    let app = TestApp::spawn().await;
    let first = app.tenant(false).await;
    let second = app.tenant(false).await;

    let a = app.create_invoice(first.user_id, design_and_dev(first.client_id)).await;
    let b = app.create_invoice(first.user_id, design_and_dev(first.client_id)).await;
    let c = app.create_invoice(second.user_id, design_and_dev(second.client_id)).await;

    assert_eq!(a["invoice_number"], 1);
    assert_eq!(b["invoice_number"], 2);
    assert_eq!(c["invoice_number"], 1);
}

#[tokio::test]
async fn test_invoice_requires_at_least_one_item() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;

    let response = app
        .post(
            tenant.user_id,
            "/invoices",
            json!({ "client_id": tenant.client_id, "items": [] }),
        )
        .await;

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn test_negative_item_amount_is_rejected() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;

    let response = app
        .post(
            tenant.user_id,
            "/invoices",
            json!({
                "client_id": tenant.client_id,
                "items": [{ "description": "Refund", "amount": "-10" }]
            }),
        )
        .await;

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn test_sub_cent_item_amounts_are_rejected() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;

    let response = app
        .post(
            tenant.user_id,
            "/invoices",
            json!({
                "client_id": tenant.client_id,
                "items": [
                    { "description": "Fraction", "amount": "0.004" },
                    { "description": "Fraction", "amount": "0.004" }
                ]
            }),
        )
        .await;
    assert_eq!(response.status(), 422);

    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let path = format!("/invoices/{}", id_of(&invoice, "invoice_id"));
    let response = app
        .put(
            tenant.user_id,
            &path,
            json!({ "items": [{ "description": "Audit", "amount": "10.125" }] }),
        )
        .await;
    assert_eq!(response.status(), 422);

    // Trailing zeros are still whole cents.
    let response = app
        .put(
            tenant.user_id,
            &path,
            json!({ "items": [{ "description": "Audit", "amount": "10.500" }] }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(dec_field(&body, "subtotal"), dec("10.50"));
}

#[tokio::test]
async fn test_send_emails_client_and_sets_sent_at() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let id = id_of(&invoice, "invoice_id");

    let response = app
        .post_empty(tenant.user_id, &format!("/invoices/{}/send", id))
        .await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "sent");
    assert!(body["sent_at"].is_string());

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(Some(sent[0].to.clone()), tenant.client_email);
    assert!(sent[0].subject.contains("Facture n° 1"));
}

#[tokio::test]
async fn test_send_without_client_email_is_precondition_failure() {
    let app = TestApp::spawn().await;
    let user_id = app.create_user(false, None).await;
    let client_id = app.create_client(user_id, None).await;
    let invoice = app.create_invoice(user_id, design_and_dev(client_id)).await;
    let id = id_of(&invoice, "invoice_id");

    let response = app.post_empty(user_id, &format!("/invoices/{}/send", id)).await;
    assert_eq!(response.status(), 412);

    let current: Value = app
        .get(user_id, &format!("/invoices/{}", id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(current["status"], "draft");
    assert_eq!(app.email.send_count(), 0);
}

#[tokio::test]
async fn test_email_failure_leaves_invoice_in_draft() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let id = id_of(&invoice, "invoice_id");
    app.email.fail_for(tenant.client_email.as_deref().unwrap());

    let response = app
        .post_empty(tenant.user_id, &format!("/invoices/{}/send", id))
        .await;
    assert_eq!(response.status(), 502);

    let current: Value = app
        .get(tenant.user_id, &format!("/invoices/{}", id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(current["status"], "draft");
    assert!(current["sent_at"].is_null());
}

#[tokio::test]
async fn test_mark_paid_twice_keeps_first_paid_at() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let path = format!("/invoices/{}/mark-paid", id_of(&invoice, "invoice_id"));

    let first: Value = app.post_empty(tenant.user_id, &path).await.json().await.unwrap();
    let second_response = app.post_empty(tenant.user_id, &path).await;
    assert_eq!(second_response.status(), 200);
    let second: Value = second_response.json().await.unwrap();

    assert_eq!(first["status"], "paid");
    assert_eq!(second["status"], "paid");
    assert!(first["paid_at"].is_string());
    assert_eq!(first["paid_at"], second["paid_at"]);
}

#[tokio::test]
async fn test_archive_then_unarchive_returns_to_draft() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;

    for prior in ["draft", "sent", "paid"] {
        let invoice = app
            .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
            .await;
        let id = id_of(&invoice, "invoice_id");
        match prior {
            "sent" => {
                let r = app.post_empty(tenant.user_id, &format!("/invoices/{}/send", id)).await;
                assert_eq!(r.status(), 200);
            }
            "paid" => {
                let r = app
                    .post_empty(tenant.user_id, &format!("/invoices/{}/mark-paid", id))
                    .await;
                assert_eq!(r.status(), 200);
            }
            _ => {}
        }

        let archived: Value = app
            .post_empty(tenant.user_id, &format!("/invoices/{}/archive", id))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(archived["status"], "archived");

        let restored: Value = app
            .post_empty(tenant.user_id, &format!("/invoices/{}/unarchive", id))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(restored["status"], "draft", "prior status {}", prior);
    }
}

#[tokio::test]
async fn test_rejected_transitions_return_412() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let id = id_of(&invoice, "invoice_id");

    let unarchive = app
        .post_empty(tenant.user_id, &format!("/invoices/{}/unarchive", id))
        .await;
    assert_eq!(unarchive.status(), 412);

    app.post_empty(tenant.user_id, &format!("/invoices/{}/mark-paid", id))
        .await;
    let send = app
        .post_empty(tenant.user_id, &format!("/invoices/{}/send", id))
        .await;
    assert_eq!(send.status(), 412);

    let edit = app
        .put(
            tenant.user_id,
            &format!("/invoices/{}", id),
            json!({ "due_date": "2025-04-01" }),
        )
        .await;
    assert_eq!(edit.status(), 412);
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let first = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    app.create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    app.post_empty(
        tenant.user_id,
        &format!("/invoices/{}/mark-paid", id_of(&first, "invoice_id")),
    )
    .await;

    let all: Value = app.get(tenant.user_id, "/invoices").await.json().await.unwrap();
    let paid: Value = app
        .get(tenant.user_id, "/invoices?status=paid")
        .await
        .json()
        .await
        .unwrap();

    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["invoice_number"], 2);
    let paid = paid.as_array().unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0]["invoice_id"], first["invoice_id"]);
}

#[tokio::test]
async fn test_delete_removes_invoice() {
    let app = TestApp::spawn().await;
    let tenant = app.tenant(false).await;
    let invoice = app
        .create_invoice(tenant.user_id, design_and_dev(tenant.client_id))
        .await;
    let invoice_id = id_of(&invoice, "invoice_id");
    let path = format!("/invoices/{}", invoice_id);
    app.store
        .append_reminder_log(&NewReminderLog {
            invoice_id,
            reminder_type: ReminderType::Reminder1,
            sent_at: Utc::now(),
            sent_to: "client@example.com".to_string(),
            status: ReminderLogStatus::Sent,
            error_message: None,
        })
        .await
        .unwrap();
    assert_eq!(app.store.list_reminder_logs(invoice_id).await.unwrap().len(), 1);

    let response = app.delete(tenant.user_id, &path).await;
    assert_eq!(response.status(), 204);

    assert_eq!(app.get(tenant.user_id, &path).await.status(), 404);
    assert_eq!(app.delete(tenant.user_id, &path).await.status(), 404);
    assert!(app.store.list_reminder_logs(invoice_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invoices_are_isolated_between_users() {
    let app = TestApp::spawn().await;
    let owner = app.tenant(false).await;
    let other = app.tenant(false).await;
    let invoice = app
        .create_invoice(owner.user_id, design_and_dev(owner.client_id))
        .await;
    let path = format!("/invoices/{}", id_of(&invoice, "invoice_id"));

    assert_eq!(app.get(other.user_id, &path).await.status(), 404);
    assert_eq!(
        app.post_empty(other.user_id, &format!("{}/mark-paid", path))
            .await
            .status(),
        404
    );

    // Another user's client cannot be invoiced either.
    let response = app
        .post(other.user_id, "/invoices", design_and_dev(owner.client_id))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/invoices"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 401);

    let response = app
        .client
        .get(app.url("/invoices"))
        .header("X-User-ID", "not-a-uuid")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 401);
}
