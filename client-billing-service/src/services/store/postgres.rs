//! PostgreSQL backend.

use super::{already_linked, changed_concurrently, totals_of, BillingStore};
use crate::models::{
    Client, CreateClient, CreateProject, CreateUnpaidAmount, Invoice, InvoiceDetail, InvoiceItem,
    InvoiceStatus, ItemReplacement, LinkedItemRevision, ListInvoicesFilter, NewInvoice,
    NewInvoiceItem, NewReminderLog, NewWebhookLog, Project, ReminderLog, StatusChange,
    SubscriptionUpdate, UnpaidAmount, UnpaidAmountChanges, UnpaidAmountStatus, User, WebhookLog,
    WebhookLogOutcome,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

fn db_error(action: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", action, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "client-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), AppError> {
    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })
}

async fn fetch_items(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT item_id, invoice_id, description, amount, item_date, unpaid_amount_id, position
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY position
        "#,
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await
    .map_err(|e| db_error("fetch invoice items", e))
}

async fn insert_items(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    items: &[NewInvoiceItem],
) -> Result<(), AppError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (item_id, invoice_id, description, amount, item_date, unpaid_amount_id, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(&item.description)
        .bind(item.amount)
        .bind(item.item_date)
        .bind(item.unpaid_amount_id)
        .bind(position as i32)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("insert invoice item", e))?;
    }
    Ok(())
}

#[async_trait]
impl BillingStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, email, name, charges_taxes, tps_number, tvq_number, plan,
                subscription_status, gateway_customer_id, grace_period_end, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING user_id, email, name, charges_taxes, tps_number, tvq_number, plan,
                subscription_status, gateway_customer_id, grace_period_end, created_utc, updated_utc
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.charges_taxes)
        .bind(&user.tps_number)
        .bind(&user.tvq_number)
        .bind(&user.plan)
        .bind(&user.subscription_status)
        .bind(&user.gateway_customer_id)
        .bind(user.grace_period_end)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("User {} already exists", user.user_id))
            }
            _ => db_error("insert user", e),
        })?;

        timer.observe_duration();
        info!(user_id = %inserted.user_id, "User created");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, name, charges_taxes, tps_number, tvq_number, plan,
                subscription_status, gateway_customer_id, grace_period_end, created_utc, updated_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get user", e))
    }

    #[instrument(skip(self))]
    async fn find_user_by_gateway_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, name, charges_taxes, tps_number, tvq_number, plan,
                subscription_status, gateway_customer_id, grace_period_end, created_utc, updated_utc
            FROM users
            WHERE gateway_customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find user by gateway customer", e))
    }

    #[instrument(skip(self, update), fields(status = update.status.as_str()))]
    async fn update_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET subscription_status = $2,
                plan = COALESCE($3, plan),
                grace_period_end = $4,
                updated_utc = NOW()
            WHERE user_id = $1
            RETURNING user_id, email, name, charges_taxes, tps_number, tvq_number, plan,
                subscription_status, gateway_customer_id, grace_period_end, created_utc, updated_utc
            "#,
        )
        .bind(user_id)
        .bind(update.status.as_str())
        .bind(&update.plan)
        .bind(update.grace_period_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update subscription", e))?;

        timer.observe_duration();
        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Clients and projects
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (client_id, user_id, name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING client_id, user_id, name, email, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create client", e))
    }

    #[instrument(skip(self))]
    async fn get_client(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, user_id, name, email, created_utc
            FROM clients
            WHERE user_id = $1 AND client_id = $2
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get client", e))
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError> {
        sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (project_id, user_id, client_id, name)
            VALUES ($1, $2, $3, $4)
            RETURNING project_id, user_id, client_id, name, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.client_id)
        .bind(&input.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create project", e))
    }

    #[instrument(skip(self))]
    async fn get_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, user_id, client_id, name, created_utc
            FROM projects
            WHERE user_id = $1 AND project_id = $2
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get project", e))
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(user_id = %input.user_id, client_id = %input.client_id))]
    async fn create_invoice(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice_number = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET invoice_counter = invoice_counter + 1 WHERE user_id = $1 RETURNING invoice_counter",
        )
        .bind(input.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("allocate invoice number", e))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", input.user_id)))?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, user_id, client_id, project_id, invoice_number, status,
                charges_taxes, subtotal, tps, tvq, total, created_at, due_date)
            VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7, $8, $9, $10, $11, $12)
            RETURNING invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.client_id)
        .bind(input.project_id)
        .bind(invoice_number)
        .bind(input.charges_taxes)
        .bind(input.totals.subtotal)
        .bind(input.totals.tps)
        .bind(input.totals.tvq)
        .bind(input.totals.total)
        .bind(input.created_at)
        .bind(input.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("insert invoice", e))?;

        for unpaid_amount_id in &input.unpaid_amount_ids {
            let linked = sqlx::query(
                r#"
                UPDATE unpaid_amounts
                SET invoice_id = $1, updated_utc = NOW()
                WHERE unpaid_amount_id = $2 AND user_id = $3 AND invoice_id IS NULL
                "#,
            )
            .bind(invoice.invoice_id)
            .bind(unpaid_amount_id)
            .bind(input.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("link unpaid amount", e))?;

            if linked.rows_affected() == 0 {
                tx.rollback().await.ok();
                return Err(already_linked(*unpaid_amount_id));
            }
        }

        insert_items(&mut tx, invoice.invoice_id, &input.items).await?;
        let items = fetch_items(&mut tx, invoice.invoice_id).await?;

        commit(tx).await?;
        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = invoice.invoice_number,
            linked_entries = input.unpaid_amount_ids.len(),
            "Invoice created"
        );

        Ok(InvoiceDetail { invoice, items })
    }

    #[instrument(skip(self))]
    async fn get_invoice(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", e))?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            FROM invoices
            WHERE user_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(user_id)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("get invoice", e))?;

        let detail = match invoice {
            Some(invoice) => {
                let items = fetch_items(&mut conn, invoice_id).await?;
                Some(InvoiceDetail { invoice, items })
            }
            None => None,
        };

        timer.observe_duration();
        Ok(detail)
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(
        &self,
        user_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let status_str = filter.status.map(|s| s.as_str().to_string());
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            FROM invoices
            WHERE user_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR client_id = $3)
            ORDER BY invoice_number DESC
            "#,
        )
        .bind(user_id)
        .bind(&status_str)
        .bind(filter.client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list invoices", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self, change), fields(expected_status = change.expected_status.as_str()))]
    async fn replace_invoice_items(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &ItemReplacement,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice_items"])
            .start_timer();

        let mut tx = self.begin().await?;

        let charges_taxes = sqlx::query_scalar::<_, bool>(
            "SELECT charges_taxes FROM invoices WHERE user_id = $1 AND invoice_id = $2 AND status = $3 FOR UPDATE",
        )
        .bind(user_id)
        .bind(invoice_id)
        .bind(change.expected_status.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock invoice", e))?;

        let Some(charges_taxes) = charges_taxes else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        if let Some(items) = &change.items {
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("clear invoice items", e))?;
            insert_items(&mut tx, invoice_id, items).await?;
        }

        if !change.released_unpaid_amount_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE unpaid_amounts
                SET invoice_id = NULL, status = 'unpaid', updated_utc = NOW()
                WHERE invoice_id = $1 AND unpaid_amount_id = ANY($2)
                "#,
            )
            .bind(invoice_id)
            .bind(&change.released_unpaid_amount_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("release unpaid amounts", e))?;
        }

        let items = fetch_items(&mut tx, invoice_id).await?;
        let totals = totals_of(&items, charges_taxes);
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET subtotal = $2, tps = $3, tvq = $4, total = $5,
                created_at = COALESCE($6, created_at),
                due_date = COALESCE($7, due_date),
                updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(totals.subtotal)
        .bind(totals.tps)
        .bind(totals.tvq)
        .bind(totals.total)
        .bind(change.created_at)
        .bind(change.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("update invoice", e))?;

        commit(tx).await?;
        timer.observe_duration();

        Ok(Some(InvoiceDetail { invoice, items }))
    }

    #[instrument(skip(self, change), fields(from = change.from.as_str(), to = change.to.as_str()))]
    async fn apply_status_change(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &StatusChange,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_status_change"])
            .start_timer();

        let mut tx = self.begin().await?;

        let current = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            FROM invoices
            WHERE user_id = $1 AND invoice_id = $2 AND status = $3
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(invoice_id)
        .bind(change.from.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock invoice", e))?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = $2, paid_at = $3, sent_at = $4, updated_utc = $5
            WHERE invoice_id = $1
            RETURNING invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(change.to.as_str())
        .bind(change.paid_at(current.paid_at))
        .bind(change.sent_at(current.sent_at))
        .bind(change.at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("update invoice status", e))?;

        let ledger_status = if change.to == InvoiceStatus::Paid {
            UnpaidAmountStatus::Paid
        } else {
            UnpaidAmountStatus::Unpaid
        };
        sqlx::query(
            "UPDATE unpaid_amounts SET status = $2, updated_utc = $3 WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .bind(ledger_status.as_str())
        .bind(change.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("mirror unpaid amount status", e))?;

        let items = fetch_items(&mut tx, invoice_id).await?;
        commit(tx).await?;
        timer.observe_duration();

        Ok(Some(InvoiceDetail { invoice, items }))
    }

    #[instrument(skip(self))]
    async fn delete_invoice(&self, user_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            UPDATE unpaid_amounts
            SET invoice_id = NULL, status = 'unpaid', updated_utc = NOW()
            WHERE user_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(user_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("release unpaid amounts", e))?;

        let deleted = sqlx::query("DELETE FROM invoices WHERE user_id = $1 AND invoice_id = $2")
            .bind(user_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete invoice", e))?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        commit(tx).await?;
        timer.observe_duration();
        info!(invoice_id = %invoice_id, "Invoice deleted");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn list_dunning_candidates(&self) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_dunning_candidates"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, user_id, client_id, project_id, invoice_number, status, charges_taxes,
                subtotal, tps, tvq, total, created_at, due_date, sent_at, paid_at, updated_utc
            FROM invoices
            WHERE status = 'sent' AND due_date IS NOT NULL
            ORDER BY due_date, invoice_number
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list dunning candidates", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    // -------------------------------------------------------------------------
    // Unpaid-amount ledger
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(user_id = %input.user_id, client_id = %input.client_id))]
    async fn create_unpaid_amount(
        &self,
        input: &CreateUnpaidAmount,
    ) -> Result<UnpaidAmount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_unpaid_amount"])
            .start_timer();

        let entry = sqlx::query_as::<_, UnpaidAmount>(
            r#"
            INSERT INTO unpaid_amounts (unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'unpaid')
            RETURNING unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date,
                status, invoice_id, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.client_id)
        .bind(input.amount)
        .bind(&input.description)
        .bind(input.entry_date)
        .bind(input.due_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create unpaid amount", e))?;

        timer.observe_duration();
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn get_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
    ) -> Result<Option<UnpaidAmount>, AppError> {
        sqlx::query_as::<_, UnpaidAmount>(
            r#"
            SELECT unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date,
                status, invoice_id, created_utc, updated_utc
            FROM unpaid_amounts
            WHERE user_id = $1 AND unpaid_amount_id = $2
            "#,
        )
        .bind(user_id)
        .bind(unpaid_amount_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get unpaid amount", e))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn get_unpaid_amounts(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<UnpaidAmount>, AppError> {
        let mut entries = sqlx::query_as::<_, UnpaidAmount>(
            r#"
            SELECT unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date,
                status, invoice_id, created_utc, updated_utc
            FROM unpaid_amounts
            WHERE user_id = $1 AND unpaid_amount_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("get unpaid amounts", e))?;

        entries.sort_by_key(|e| ids.iter().position(|id| *id == e.unpaid_amount_id));
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn list_unpaid_amounts(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<UnpaidAmount>, AppError> {
        sqlx::query_as::<_, UnpaidAmount>(
            r#"
            SELECT unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date,
                status, invoice_id, created_utc, updated_utc
            FROM unpaid_amounts
            WHERE user_id = $1 AND ($2::uuid IS NULL OR client_id = $2)
            ORDER BY entry_date, created_utc
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list unpaid amounts", e))
    }

    #[instrument(skip(self, changes, linked))]
    async fn update_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
        changes: &UnpaidAmountChanges,
        linked: Option<&LinkedItemRevision>,
    ) -> Result<Option<UnpaidAmount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_unpaid_amount"])
            .start_timer();

        let mut tx = self.begin().await?;

        // Invoice before entry, the same order as item replacement.
        let charges_taxes = match linked {
            Some(revision) => {
                let row = sqlx::query_as::<_, (String, bool)>(
                    "SELECT status, charges_taxes FROM invoices WHERE invoice_id = $1 FOR UPDATE",
                )
                .bind(revision.invoice_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("lock invoice", e))?;

                match row {
                    Some((status, charges_taxes)) if status == InvoiceStatus::Draft.as_str() => {
                        Some(charges_taxes)
                    }
                    _ => {
                        tx.rollback().await.ok();
                        return Err(changed_concurrently(unpaid_amount_id));
                    }
                }
            }
            None => None,
        };

        let current = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT invoice_id FROM unpaid_amounts WHERE user_id = $1 AND unpaid_amount_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(unpaid_amount_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock unpaid amount", e))?;

        let Some(current_invoice_id) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        if current_invoice_id != linked.map(|l| l.invoice_id) {
            tx.rollback().await.ok();
            return Err(changed_concurrently(unpaid_amount_id));
        }

        let entry = sqlx::query_as::<_, UnpaidAmount>(
            r#"
            UPDATE unpaid_amounts
            SET amount = COALESCE($3, amount),
                description = COALESCE($4, description),
                entry_date = COALESCE($5, entry_date),
                due_date = COALESCE($6, due_date),
                updated_utc = NOW()
            WHERE user_id = $1 AND unpaid_amount_id = $2
            RETURNING unpaid_amount_id, user_id, client_id, amount, description, entry_date, due_date,
                status, invoice_id, created_utc, updated_utc
            "#,
        )
        .bind(user_id)
        .bind(unpaid_amount_id)
        .bind(changes.amount)
        .bind(&changes.description)
        .bind(changes.entry_date)
        .bind(changes.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("update unpaid amount", e))?;

        if let (Some(revision), Some(charges_taxes)) = (linked, charges_taxes) {
            sqlx::query(
                r#"
                UPDATE invoice_items
                SET description = $3, amount = $4, item_date = $5
                WHERE invoice_id = $1 AND unpaid_amount_id = $2
                "#,
            )
            .bind(revision.invoice_id)
            .bind(unpaid_amount_id)
            .bind(&entry.description)
            .bind(entry.amount)
            .bind(entry.entry_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("update mirrored invoice item", e))?;

            let items = fetch_items(&mut tx, revision.invoice_id).await?;
            let totals = totals_of(&items, charges_taxes);
            sqlx::query(
                r#"
                UPDATE invoices
                SET subtotal = $2, tps = $3, tvq = $4, total = $5, updated_utc = NOW()
                WHERE invoice_id = $1
                "#,
            )
            .bind(revision.invoice_id)
            .bind(totals.subtotal)
            .bind(totals.tps)
            .bind(totals.tvq)
            .bind(totals.total)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("update invoice totals", e))?;
        }

        commit(tx).await?;
        timer.observe_duration();
        Ok(Some(entry))
    }

    // -------------------------------------------------------------------------
    // Reminder and webhook logs
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn claim_reminders(
        &self,
        invoice_id: Uuid,
        lease: chrono::Duration,
    ) -> Result<Option<Uuid>, AppError> {
        let claim_id = Uuid::new_v4();
        let claimed = sqlx::query(
            r#"
            UPDATE invoices
            SET reminder_claim_id = $2,
                reminder_claim_until = NOW() + make_interval(secs => $3)
            WHERE invoice_id = $1
              AND (reminder_claim_until IS NULL OR reminder_claim_until <= NOW())
            "#,
        )
        .bind(invoice_id)
        .bind(claim_id)
        .bind(lease.num_milliseconds() as f64 / 1000.0)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("claim invoice reminders", e))?;

        Ok((claimed.rows_affected() == 1).then_some(claim_id))
    }

    #[instrument(skip(self))]
    async fn release_reminders(&self, invoice_id: Uuid, claim_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET reminder_claim_id = NULL, reminder_claim_until = NULL
            WHERE invoice_id = $1 AND reminder_claim_id = $2
            "#,
        )
        .bind(invoice_id)
        .bind(claim_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("release invoice reminders", e))?;
        Ok(())
    }

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id, reminder_type = input.reminder_type.as_str()))]
    async fn append_reminder_log(&self, input: &NewReminderLog) -> Result<ReminderLog, AppError> {
        sqlx::query_as::<_, ReminderLog>(
            r#"
            INSERT INTO reminder_logs (reminder_log_id, invoice_id, reminder_type, sent_at, sent_to, status, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING reminder_log_id, invoice_id, reminder_type, sent_at, sent_to, status, error_message
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.reminder_type.as_str())
        .bind(input.sent_at)
        .bind(&input.sent_to)
        .bind(input.status.as_str())
        .bind(&input.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("append reminder log", e))
    }

    #[instrument(skip(self))]
    async fn list_reminder_logs(&self, invoice_id: Uuid) -> Result<Vec<ReminderLog>, AppError> {
        sqlx::query_as::<_, ReminderLog>(
            r#"
            SELECT reminder_log_id, invoice_id, reminder_type, sent_at, sent_to, status, error_message
            FROM reminder_logs
            WHERE invoice_id = $1
            ORDER BY sent_at
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list reminder logs", e))
    }

    #[instrument(skip(self, input), fields(status = input.status))]
    async fn insert_webhook_log(&self, input: &NewWebhookLog) -> Result<WebhookLog, AppError> {
        sqlx::query_as::<_, WebhookLog>(
            r#"
            INSERT INTO webhook_logs (webhook_log_id, endpoint, method, headers, body, signature, status, error, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING webhook_log_id, endpoint, method, headers, body, signature, status, error,
                debug_info, received_at, processed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.endpoint)
        .bind(&input.method)
        .bind(&input.headers)
        .bind(&input.body)
        .bind(&input.signature)
        .bind(input.status)
        .bind(&input.error)
        .bind(input.processed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("insert webhook log", e))
    }

    #[instrument(skip(self, outcome), fields(status = outcome.status))]
    async fn finalize_webhook_log(
        &self,
        webhook_log_id: Uuid,
        outcome: &WebhookLogOutcome,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE webhook_logs
            SET status = $2, error = $3, debug_info = $4, processed_at = $5
            WHERE webhook_log_id = $1
            "#,
        )
        .bind(webhook_log_id)
        .bind(outcome.status)
        .bind(&outcome.error)
        .bind(&outcome.debug_info)
        .bind(outcome.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("finalize webhook log", e))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Webhook log {} not found",
                webhook_log_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_webhook_logs(&self, limit: i64) -> Result<Vec<WebhookLog>, AppError> {
        sqlx::query_as::<_, WebhookLog>(
            r#"
            SELECT webhook_log_id, endpoint, method, headers, body, signature, status, error,
                debug_info, received_at, processed_at
            FROM webhook_logs
            ORDER BY received_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list webhook logs", e))
    }
}
