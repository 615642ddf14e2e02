//! Client and project models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A customer of an account owner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Client {
    /// The address invoices and reminders go to, if one is on file.
    pub fn billing_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CreateClient {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
}

/// A project invoices can optionally be filed under.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateProject {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
}
