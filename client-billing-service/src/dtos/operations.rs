use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RunRemindersRequest {
    /// Evaluation instant; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookLogsQuery {
    pub limit: Option<i64>,
}

impl WebhookLogsQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}
