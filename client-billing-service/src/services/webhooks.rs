//! Payment gateway webhook reconciliation.
//!
//! Every delivery leaves exactly one `webhook_logs` row. It is written before
//! dispatch (status 202) and finalised afterwards with the returned status,
//! any error and the debug trail of gateway lookups.

use crate::models::{NewWebhookLog, SubscriptionStatus, SubscriptionUpdate, WebhookLogOutcome};
use crate::services::gateway::{GatewayClient, TransactionRef};
use crate::services::invoices::InvoiceService;
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::store::BillingStore;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use service_core::utils::signature::verify_body_signature;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const GRACE_PERIOD_DAYS: i64 = 30;
const DEFAULT_PAID_PLAN: &str = "pro";
const IN_FLIGHT: i32 = 202;

const KNOWN_EVENT_TYPES: [&str; 4] = [
    "cardTransaction",
    "payment.succeeded",
    "payment.failed",
    "subscription.cancelled",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    #[serde(rename = "cardTransaction")]
    CardTransaction { id: TransactionRef },

    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded {
        customer_id: String,
        #[serde(default)]
        invoice_id: Option<Uuid>,
        #[serde(default)]
        plan: Option<String>,
    },

    #[serde(rename = "payment.failed")]
    PaymentFailed { customer_id: String },

    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled { customer_id: String },

    #[serde(skip_deserializing)]
    Unknown { event_type: Option<String> },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::CardTransaction { .. } => "cardTransaction",
            GatewayEvent::PaymentSucceeded { .. } => "payment.succeeded",
            GatewayEvent::PaymentFailed { .. } => "payment.failed",
            GatewayEvent::SubscriptionCancelled { .. } => "subscription.cancelled",
            GatewayEvent::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Malformed JSON body: {0}")]
    Malformed(String),

    #[error("Invalid {event_type} payload: {reason}")]
    Invalid { event_type: String, reason: String },
}

/// Parse a raw body into a typed event. Bodies with a missing or unrecognised
/// `type` parse as `Unknown`.
pub fn parse_event(body: &[u8]) -> Result<GatewayEvent, EventParseError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| EventParseError::Malformed(e.to_string()))?;

    let event_type = value.get("type").and_then(Value::as_str).map(str::to_string);
    match event_type {
        Some(t) if KNOWN_EVENT_TYPES.contains(&t.as_str()) => serde_json::from_value(value)
            .map_err(|e| EventParseError::Invalid {
                event_type: t,
                reason: e.to_string(),
            }),
        other => Ok(GatewayEvent::Unknown { event_type: other }),
    }
}

/// An inbound delivery as received on the wire.
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub endpoint: String,
    pub method: String,
    pub headers: Value,
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// Status and JSON body to return to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: u16,
    pub body: Value,
}

impl WebhookReply {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn BillingStore>,
    gateway: GatewayClient,
    invoices: InvoiceService,
    secret: Option<Secret<String>>,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: GatewayClient,
        invoices: InvoiceService,
        secret: Option<Secret<String>>,
    ) -> Self {
        Self {
            store,
            gateway,
            invoices,
            secret,
        }
    }

    fn signature_valid(&self, inbound: &InboundWebhook) -> Result<bool, String> {
        let Some(secret) = &self.secret else {
            return Ok(true);
        };
        let Some(signature) = inbound.signature.as_deref() else {
            return Err("Missing webhook signature".to_string());
        };
        match verify_body_signature(secret.expose_secret(), &inbound.body, signature) {
            Ok(true) => Ok(true),
            Ok(false) => Err("Webhook signature mismatch".to_string()),
            Err(e) => Err(format!("Webhook signature could not be verified: {}", e)),
        }
    }

    fn log_row(inbound: &InboundWebhook, status: i32, error: Option<String>) -> NewWebhookLog {
        NewWebhookLog {
            endpoint: inbound.endpoint.clone(),
            method: inbound.method.clone(),
            headers: inbound.headers.clone(),
            body: String::from_utf8_lossy(&inbound.body).into_owned(),
            signature: inbound.signature.clone(),
            status,
            error,
            processed_at: None,
        }
    }

    #[instrument(skip(self, inbound), fields(endpoint = %inbound.endpoint))]
    pub async fn handle(&self, inbound: InboundWebhook) -> Result<WebhookReply, AppError> {
        if let Err(reason) = self.signature_valid(&inbound) {
            warn!(reason = %reason, "Rejected webhook delivery");
            let mut row = Self::log_row(&inbound, 401, Some(reason.clone()));
            row.processed_at = Some(Utc::now());
            if let Err(e) = self.store.insert_webhook_log(&row).await {
                error!(error = %e, "Failed to record rejected webhook");
            }
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["rejected", "401"])
                .inc();
            return Ok(WebhookReply::new(401, json!({ "error": reason })));
        }

        let log = self
            .store
            .insert_webhook_log(&Self::log_row(&inbound, IN_FLIGHT, None))
            .await?;

        let mut trail = Vec::new();
        let (event_type, reply, error_text) = match parse_event(&inbound.body) {
            Err(e) => {
                warn!(error = %e, "Unparseable webhook body");
                let message = e.to_string();
                (
                    "invalid".to_string(),
                    WebhookReply::new(400, json!({ "error": message })),
                    Some(message),
                )
            }
            Ok(event) => {
                let event_type = event.event_type().to_string();
                match self.dispatch(event, &mut trail).await {
                    Ok(()) => (
                        event_type,
                        WebhookReply::new(200, json!({ "received": true })),
                        None,
                    ),
                    Err(e) => {
                        error!(error = %e, event_type = %event_type, "Webhook processing failed");
                        let message = e.to_string();
                        (
                            event_type,
                            WebhookReply::new(500, json!({ "error": "Webhook processing failed" })),
                            Some(message),
                        )
                    }
                }
            }
        };

        let outcome = WebhookLogOutcome {
            status: i32::from(reply.status),
            error: error_text,
            debug_info: (!trail.is_empty()).then(|| trail.join("\n")),
            processed_at: Utc::now(),
        };
        if let Err(e) = self
            .store
            .finalize_webhook_log(log.webhook_log_id, &outcome)
            .await
        {
            error!(webhook_log_id = %log.webhook_log_id, error = %e, "Failed to finalize webhook log");
        }

        let status = reply.status.to_string();
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event_type.as_str(), status.as_str()])
            .inc();

        Ok(reply)
    }

    async fn dispatch(&self, event: GatewayEvent, trail: &mut Vec<String>) -> Result<(), AppError> {
        match event {
            GatewayEvent::CardTransaction { id } => self.reconcile_card_transaction(&id, trail).await,
            GatewayEvent::PaymentSucceeded {
                customer_id,
                invoice_id,
                plan,
            } => {
                let plan = plan.unwrap_or_else(|| DEFAULT_PAID_PLAN.to_string());
                let update = SubscriptionUpdate {
                    status: SubscriptionStatus::Active,
                    plan: Some(plan),
                    grace_period_end: None,
                };
                let Some(user_id) = self.apply_subscription(&customer_id, &update, trail).await?
                else {
                    return Ok(());
                };
                if let Some(invoice_id) = invoice_id {
                    self.settle_invoice(user_id, invoice_id, trail).await?;
                }
                Ok(())
            }
            GatewayEvent::PaymentFailed { customer_id } => {
                let update = SubscriptionUpdate {
                    status: SubscriptionStatus::PastDue,
                    plan: None,
                    grace_period_end: None,
                };
                self.apply_subscription(&customer_id, &update, trail).await?;
                Ok(())
            }
            GatewayEvent::SubscriptionCancelled { customer_id } => {
                let update = SubscriptionUpdate {
                    status: SubscriptionStatus::Canceled,
                    plan: None,
                    grace_period_end: Some(Utc::now() + Duration::days(GRACE_PERIOD_DAYS)),
                };
                self.apply_subscription(&customer_id, &update, trail).await?;
                Ok(())
            }
            GatewayEvent::Unknown { event_type } => {
                info!(event_type = ?event_type, "Ignoring unhandled webhook event");
                trail.push(format!(
                    "Ignored event type {}",
                    event_type.as_deref().unwrap_or("<missing>")
                ));
                Ok(())
            }
        }
    }

    async fn reconcile_card_transaction(
        &self,
        id: &TransactionRef,
        trail: &mut Vec<String>,
    ) -> Result<(), AppError> {
        trail.push(format!("Fetching card transaction {}", id));
        let transaction = match self.gateway.fetch_card_transaction(id).await {
            Ok(transaction) => transaction,
            Err(e) => {
                trail.push(format!("Gateway lookup failed: {}", e));
                return Err(e.into());
            }
        };
        trail.push(format!(
            "Transaction {} status={} amount={} customerCode={}",
            transaction.transaction_id,
            transaction.status,
            transaction.amount,
            transaction.customer_code.as_deref().unwrap_or("<none>")
        ));

        if !transaction.is_approved() {
            trail.push("Transaction not approved; no change".to_string());
            return Ok(());
        }
        let Some(customer_code) = transaction.customer_code.as_deref() else {
            trail.push("Transaction has no customer code; no change".to_string());
            return Ok(());
        };

        let update = SubscriptionUpdate {
            status: SubscriptionStatus::Active,
            plan: Some(DEFAULT_PAID_PLAN.to_string()),
            grace_period_end: None,
        };
        self.apply_subscription(customer_code, &update, trail).await?;
        Ok(())
    }

    /// Returns the matched user, or `None` when no user carries the code.
    async fn apply_subscription(
        &self,
        customer_id: &str,
        update: &SubscriptionUpdate,
        trail: &mut Vec<String>,
    ) -> Result<Option<Uuid>, AppError> {
        let Some(user) = self.store.find_user_by_gateway_customer(customer_id).await? else {
            warn!(customer_id = %customer_id, "Webhook for unknown customer");
            trail.push(format!("No user matches customer {}", customer_id));
            return Ok(None);
        };

        self.store.update_subscription(user.user_id, update).await?;
        trail.push(format!(
            "User {} set to {}{}",
            user.user_id,
            update.status.as_str(),
            update
                .plan
                .as_deref()
                .map(|p| format!(" on plan {}", p))
                .unwrap_or_default()
        ));
        info!(
            user_id = %user.user_id,
            status = update.status.as_str(),
            "Subscription updated from webhook"
        );
        Ok(Some(user.user_id))
    }

    async fn settle_invoice(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        trail: &mut Vec<String>,
    ) -> Result<(), AppError> {
        match self.invoices.mark_paid(user_id, invoice_id).await {
            Ok(detail) => {
                trail.push(format!(
                    "Invoice {} is {}",
                    detail.invoice.invoice_number, detail.invoice.status
                ));
                Ok(())
            }
            Err(e @ (AppError::NotFound(_) | AppError::PreconditionFailed(_))) => {
                trail.push(format!("Invoice {} not marked paid: {}", invoice_id, e));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_card_transaction_with_numeric_id() {
        let event = parse_event(br#"{"type":"cardTransaction","id":25764674}"#).unwrap();
        assert_eq!(
            event,
            GatewayEvent::CardTransaction {
                id: TransactionRef::Number(25764674)
            }
        );
    }

    #[test]
    fn test_parse_payment_succeeded_with_invoice() {
        let invoice_id = Uuid::new_v4();
        let body = format!(
            r#"{{"type":"payment.succeeded","customer_id":"CST1","invoice_id":"{}"}}"#,
            invoice_id
        );
        let event = parse_event(body.as_bytes()).unwrap();

        assert_eq!(
            event,
            GatewayEvent::PaymentSucceeded {
                customer_id: "CST1".to_string(),
                invoice_id: Some(invoice_id),
                plan: None,
            }
        );
    }

    #[test]
    fn test_unknown_or_missing_type_is_not_an_error() {
        let event = parse_event(br#"{"type":"refund.created","id":1}"#).unwrap();
        assert_eq!(
            event,
            GatewayEvent::Unknown {
                event_type: Some("refund.created".to_string())
            }
        );

        let event = parse_event(br#"{"id":1}"#).unwrap();
        assert_eq!(event, GatewayEvent::Unknown { event_type: None });
    }

    #[test]
    fn test_malformed_and_invalid_bodies() {
        assert!(matches!(
            parse_event(b"{not json"),
            Err(EventParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_event(br#"{"type":"payment.failed"}"#),
            Err(EventParseError::Invalid { .. })
        ));
    }
}
