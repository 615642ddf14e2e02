#![allow(dead_code)]

use client_billing_service::config::{
    ClientBillingConfig, GatewayConfig, ReminderConfig, SmtpConfig, StoreBackend, StoreConfig,
    WebhookConfig,
};
use client_billing_service::services::{MemoryStore, MockEmailProvider};
use client_billing_service::startup::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const GATEWAY_TOKEN: &str = "test-api-token";
pub const OPERATOR_TOKEN: &str = "test-operator-token";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub store: MemoryStore,
    pub email: Arc<MockEmailProvider>,
    pub gateway: MockServer,
}

pub struct Tenant {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub client_email: Option<String>,
}

pub fn test_config(gateway_url: &str) -> ClientBillingConfig {
    ClientBillingConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port for testing
        },
        service_name: "client-billing-service".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
            min_connections: 1,
        },
        smtp: SmtpConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "facturation@example.com".to_string(),
            from_name: "Facturation".to_string(),
        },
        gateway: GatewayConfig {
            api_base_url: gateway_url.to_string(),
            api_token: Secret::new(GATEWAY_TOKEN.to_string()),
            timeout_secs: 5,
        },
        webhook: WebhookConfig {
            secret: Some(Secret::new(WEBHOOK_SECRET.to_string())),
            logs_token: Some(Secret::new(OPERATOR_TOKEN.to_string())),
        },
        reminders: ReminderConfig {
            max_attempts: 3,
            retry_backoff_hours: 24,
            claim_lease_secs: 300,
        },
    }
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal literal")
}

/// Decimal fields serialize as strings.
pub fn dec_field(body: &Value, field: &str) -> Decimal {
    let raw = &body[field];
    match raw {
        Value::String(s) => dec(s),
        Value::Number(n) => dec(&n.to_string()),
        other => panic!("field {} is not a decimal: {:?}", field, other),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with the test configuration adjusted by `configure`.
    pub async fn spawn_with(configure: impl FnOnce(&mut ClientBillingConfig)) -> Self {
        let gateway = MockServer::start().await;
        let mut config = test_config(&gateway.uri());
        configure(&mut config);

        let store = MemoryStore::new();
        let email = Arc::new(MockEmailProvider::new());

        let app = Application::with_components(config, Arc::new(store.clone()), email.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            email,
            gateway,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn create_user(&self, charges_taxes: bool, gateway_customer_id: Option<&str>) -> Uuid {
        let response = self
            .client
            .post(self.url("/users"))
            .json(&json!({
                "email": format!("owner-{}@example.com", Uuid::new_v4()),
                "name": "Studio Tremblay",
                "charges_taxes": charges_taxes,
                "tps_number": if charges_taxes { Some("123456789RT0001") } else { None },
                "tvq_number": if charges_taxes { Some("1234567890TQ0001") } else { None },
                "gateway_customer_id": gateway_customer_id,
            }))
            .send()
            .await
            .expect("Failed to create user");
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("user body");
        Uuid::parse_str(body["user_id"].as_str().expect("user_id")).expect("uuid")
    }

    pub async fn create_client(&self, user_id: Uuid, email: Option<&str>) -> Uuid {
        let response = self
            .post(user_id, "/clients", json!({ "name": "Boulangerie Côté", "email": email }))
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("client body");
        Uuid::parse_str(body["client_id"].as_str().expect("client_id")).expect("uuid")
    }

    /// A user with one client, ready to invoice.
    pub async fn tenant(&self, charges_taxes: bool) -> Tenant {
        let user_id = self.create_user(charges_taxes, None).await;
        let client_email = format!("client-{}@example.com", Uuid::new_v4());
        let client_id = self.create_client(user_id, Some(&client_email)).await;
        Tenant {
            user_id,
            client_id,
            client_email: Some(client_email),
        }
    }

    pub async fn get(&self, user_id: Uuid, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, user_id: Uuid, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_empty(&self, user_id: Uuid, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put(&self, user_id: Uuid, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch(&self, user_id: Uuid, path: &str, body: Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, user_id: Uuid, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn create_invoice(&self, user_id: Uuid, body: Value) -> Value {
        let response = self.post(user_id, "/invoices", body).await;
        assert_eq!(response.status(), 201);
        response.json().await.expect("invoice body")
    }

    pub async fn create_entry(&self, user_id: Uuid, client_id: Uuid, amount: &str, description: &str) -> Uuid {
        let response = self
            .post(
                user_id,
                "/unpaid-amounts",
                json!({
                    "client_id": client_id,
                    "amount": amount,
                    "description": description,
                    "entry_date": "2025-02-10",
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("entry body");
        Uuid::parse_str(body["unpaid_amount_id"].as_str().expect("id")).expect("uuid")
    }

    /// Operator listing of webhook logs.
    pub async fn get_webhook_logs(&self, query: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/webhooks/logs{}", query)))
            .header("X-Operator-Token", OPERATOR_TOKEN)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Deliver a webhook body, signed with the configured secret.
    pub async fn post_webhook(&self, body: &str) -> reqwest::Response {
        let signature = service_core::utils::signature::sign_body(WEBHOOK_SECRET, body.as_bytes())
            .expect("sign body");
        self.post_webhook_with_signature(body, Some(&signature)).await
    }

    pub async fn post_webhook_with_signature(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/webhooks/payments"))
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header("x-webhook-signature", signature);
        }
        request.send().await.expect("Failed to deliver webhook")
    }
}

pub fn id_of(body: &Value, field: &str) -> Uuid {
    Uuid::parse_str(body[field].as_str().expect("id field")).expect("uuid")
}
