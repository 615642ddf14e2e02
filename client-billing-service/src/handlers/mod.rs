pub mod accounts;
pub mod health;
pub mod invoices;
pub mod reminders;
pub mod unpaid_amounts;
pub mod webhooks;

use crate::services::metrics::record_error;
use service_core::error::AppError;

/// Count a failed request by error kind before it is rendered.
pub(crate) fn track(error: AppError) -> AppError {
    record_error(&error);
    error
}
