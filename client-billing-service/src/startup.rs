use crate::config::{ClientBillingConfig, StoreBackend};
use crate::handlers;
use crate::middleware::require_operator;
use crate::services::{
    BillingStore, EmailProvider, GatewayClient, InvoiceService, LedgerService, MemoryStore,
    MockEmailProvider, PgStore, ReminderPolicy, ReminderService, SmtpProvider, WebhookReconciler,
};
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ClientBillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub invoices: InvoiceService,
    pub ledger: LedgerService,
    pub reminders: ReminderService,
    pub webhooks: WebhookReconciler,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Wire storage and email from configuration, then bind.
    pub async fn build(config: ClientBillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match config.store.backend {
            StoreBackend::Postgres => {
                let url = config.store.database_url.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is not set"))
                })?;
                let store = PgStore::new(
                    url.expose_secret(),
                    config.store.max_connections,
                    config.store.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to PostgreSQL: {}", e);
                    e
                })?;
                store.run_migrations().await.map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
            let provider = SmtpProvider::new(config.smtp.clone()).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to initialize SMTP: {}", e))
            })?;
            tracing::info!(host = %config.smtp.host, "SMTP email provider enabled");
            Arc::new(provider)
        } else {
            tracing::info!("SMTP disabled, using mock email provider");
            Arc::new(MockEmailProvider::new())
        };

        Self::with_components(config, store, email).await
    }

    /// Bind with caller-supplied storage and email provider.
    pub async fn with_components(
        config: ClientBillingConfig,
        store: Arc<dyn BillingStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let gateway = GatewayClient::new(&config.gateway)?;

        let invoices = InvoiceService::new(store.clone(), email.clone());
        let ledger = LedgerService::new(store.clone(), invoices.clone());
        let reminders = ReminderService::new(
            store.clone(),
            email,
            ReminderPolicy::from(config.reminders),
        );
        let webhooks = WebhookReconciler::new(
            store.clone(),
            gateway,
            invoices.clone(),
            config.webhook.secret.clone(),
        );

        let state = AppState {
            config: config.clone(),
            store,
            invoices,
            ledger,
            reminders,
            webhooks,
        };

        let app = router(state.clone());

        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();

        tracing::info!("Listening on {}", local_addr);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/users", post(handlers::accounts::create_user))
        .route("/users/me", get(handlers::accounts::get_current_user))
        .route("/clients", post(handlers::accounts::create_client))
        .route("/clients/:id", get(handlers::accounts::get_client))
        .route("/projects", post(handlers::accounts::create_project))
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice)
                .put(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route("/invoices/:id/send", post(handlers::invoices::send_invoice))
        .route(
            "/invoices/:id/mark-paid",
            post(handlers::invoices::mark_invoice_paid),
        )
        .route(
            "/invoices/:id/archive",
            post(handlers::invoices::archive_invoice),
        )
        .route(
            "/invoices/:id/unarchive",
            post(handlers::invoices::unarchive_invoice),
        )
        .route(
            "/invoices/:id/reminders",
            get(handlers::invoices::invoice_reminders),
        )
        .route(
            "/unpaid-amounts",
            post(handlers::unpaid_amounts::create_unpaid_amount)
                .get(handlers::unpaid_amounts::list_unpaid_amounts),
        )
        .route(
            "/unpaid-amounts/invoice",
            post(handlers::unpaid_amounts::invoice_unpaid_amounts),
        )
        .route(
            "/unpaid-amounts/:id",
            get(handlers::unpaid_amounts::get_unpaid_amount)
                .patch(handlers::unpaid_amounts::update_unpaid_amount),
        )
        .route("/reminders/run", post(handlers::reminders::run_reminders))
        .route(
            handlers::webhooks::PAYMENT_WEBHOOK_PATH,
            post(handlers::webhooks::receive_payment_webhook),
        )
        .route(
            "/webhooks/logs",
            get(handlers::webhooks::list_webhook_logs).layer(axum::middleware::from_fn_with_state(
                state.config.webhook.logs_token.clone(),
                require_operator,
            )),
        )
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
