//! Reminder attempt log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The four dunning steps, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    Reminder1,
    Reminder2,
    Reminder3,
    MiseEnDemeure,
}

impl ReminderType {
    pub const ALL: [ReminderType; 4] = [
        ReminderType::Reminder1,
        ReminderType::Reminder2,
        ReminderType::Reminder3,
        ReminderType::MiseEnDemeure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderType::Reminder1 => "reminder1",
            ReminderType::Reminder2 => "reminder2",
            ReminderType::Reminder3 => "reminder3",
            ReminderType::MiseEnDemeure => "mise_en_demeure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reminder1" => Some(ReminderType::Reminder1),
            "reminder2" => Some(ReminderType::Reminder2),
            "reminder3" => Some(ReminderType::Reminder3),
            "mise_en_demeure" => Some(ReminderType::MiseEnDemeure),
            _ => None,
        }
    }

    /// Offset of the checkpoint from the invoice due date, in days.
    pub fn offset_days(&self) -> i64 {
        match self {
            ReminderType::Reminder1 => -3,
            ReminderType::Reminder2 => 1,
            ReminderType::Reminder3 => 7,
            ReminderType::MiseEnDemeure => 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderLogStatus {
    Sent,
    Failed,
}

impl ReminderLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderLogStatus::Sent => "sent",
            ReminderLogStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => ReminderLogStatus::Sent,
            _ => ReminderLogStatus::Failed,
        }
    }
}

/// One reminder attempt. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReminderLog {
    pub reminder_log_id: Uuid,
    pub invoice_id: Uuid,
    pub reminder_type: String,
    pub sent_at: DateTime<Utc>,
    pub sent_to: String,
    pub status: String,
    pub error_message: Option<String>,
}

impl ReminderLog {
    pub fn kind(&self) -> Option<ReminderType> {
        ReminderType::parse(&self.reminder_type)
    }

    pub fn status(&self) -> ReminderLogStatus {
        ReminderLogStatus::from_string(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct NewReminderLog {
    pub invoice_id: Uuid,
    pub reminder_type: ReminderType,
    pub sent_at: DateTime<Utc>,
    pub sent_to: String,
    pub status: ReminderLogStatus,
    pub error_message: Option<String>,
}
