pub mod accounts;
pub mod invoices;
pub mod operations;
pub mod unpaid_amounts;

pub use accounts::{CreateClientRequest, CreateProjectRequest, CreateUserRequest};
pub use invoices::{
    CreateInvoiceRequest, InvoiceItemRequest, InvoiceResponse, ListInvoicesQuery,
    UpdateInvoiceRequest,
};
pub use operations::{RunRemindersRequest, WebhookLogsQuery};
pub use unpaid_amounts::{
    CreateUnpaidAmountRequest, InvoiceUnpaidAmountsRequest, ListUnpaidAmountsQuery,
    UpdateUnpaidAmountRequest,
};
