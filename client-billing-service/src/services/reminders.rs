//! Dunning schedule: four checkpoints around the due date, derived from the
//! reminder log, plus the dispatch pass run by the external cron.

use crate::config::ReminderConfig;
use crate::models::{
    Invoice, NewReminderLog, ReminderLog, ReminderLogStatus, ReminderType,
};
use crate::services::email::EmailProvider;
use crate::services::metrics::REMINDER_ATTEMPTS_TOTAL;
use crate::services::store::BillingStore;
use crate::services::templates;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Retry rules for failed attempts. A `sent` attempt is final.
#[derive(Debug, Clone, Copy)]
pub struct ReminderPolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub claim_lease: Duration,
}

impl From<ReminderConfig> for ReminderPolicy {
    fn from(config: ReminderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::hours(config.retry_backoff_hours.max(0)),
            claim_lease: Duration::seconds(config.claim_lease_secs.max(1)),
        }
    }
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::hours(24),
            claim_lease: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointState {
    NotScheduled,
    Pending,
    Sent {
        sent_at: DateTime<Utc>,
        sent_to: String,
        attempts: u32,
    },
    Error {
        error_message: Option<String>,
        attempted_at: DateTime<Utc>,
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderCheckpoint {
    pub reminder_type: ReminderType,
    pub scheduled_for: Option<NaiveDate>,
    #[serde(flatten)]
    pub state: CheckpointState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderView {
    pub invoice_id: Uuid,
    pub due_date: Option<NaiveDate>,
    pub checkpoints: Vec<ReminderCheckpoint>,
}

pub fn checkpoint_date(due_date: NaiveDate, reminder_type: ReminderType) -> NaiveDate {
    due_date + Duration::days(reminder_type.offset_days())
}

fn attempts_of(logs: &[ReminderLog], reminder_type: ReminderType) -> Vec<&ReminderLog> {
    let mut attempts: Vec<&ReminderLog> = logs
        .iter()
        .filter(|log| log.kind() == Some(reminder_type))
        .collect();
    attempts.sort_by_key(|log| log.sent_at);
    attempts
}

/// Four-checkpoint view over the log. Overdue checkpoints without a log row
/// stay `pending`.
pub fn reminder_timeline(
    due_date: Option<NaiveDate>,
    logs: &[ReminderLog],
) -> Vec<ReminderCheckpoint> {
    ReminderType::ALL
        .iter()
        .map(|&reminder_type| {
            let attempts = attempts_of(logs, reminder_type);
            let count = attempts.len() as u32;
            let sent = attempts
                .iter()
                .find(|log| log.status() == ReminderLogStatus::Sent);

            let state = match (sent, attempts.last()) {
                (Some(log), _) => CheckpointState::Sent {
                    sent_at: log.sent_at,
                    sent_to: log.sent_to.clone(),
                    attempts: count,
                },
                (None, Some(log)) => CheckpointState::Error {
                    error_message: log.error_message.clone(),
                    attempted_at: log.sent_at,
                    attempts: count,
                },
                (None, None) if due_date.is_some() => CheckpointState::Pending,
                (None, None) => CheckpointState::NotScheduled,
            };

            ReminderCheckpoint {
                reminder_type,
                scheduled_for: due_date.map(|due| checkpoint_date(due, reminder_type)),
                state,
            }
        })
        .collect()
}

/// The checkpoint to attempt now, if any.
///
/// Checkpoints are considered in order. One that is still waiting out its
/// retry backoff holds back the ones after it; one that has used up its
/// attempts does not.
pub fn next_due_reminder(
    due_date: Option<NaiveDate>,
    logs: &[ReminderLog],
    now: DateTime<Utc>,
    policy: &ReminderPolicy,
) -> Option<ReminderType> {
    let due_date = due_date?;
    let today = now.date_naive();

    for reminder_type in ReminderType::ALL {
        if checkpoint_date(due_date, reminder_type) > today {
            return None;
        }

        let attempts = attempts_of(logs, reminder_type);
        if attempts
            .iter()
            .any(|log| log.status() == ReminderLogStatus::Sent)
        {
            continue;
        }
        let Some(last) = attempts.last() else {
            return Some(reminder_type);
        };
        if attempts.len() as u32 >= policy.max_attempts {
            continue;
        }
        if now - last.sent_at >= policy.retry_backoff {
            return Some(reminder_type);
        }
        return None;
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderAttempt {
    pub invoice_id: Uuid,
    pub reminder_type: ReminderType,
    pub status: ReminderLogStatus,
    pub sent_to: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderRunSummary {
    pub evaluated: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: usize,
    pub attempts: Vec<ReminderAttempt>,
}

#[derive(Clone)]
pub struct ReminderService {
    store: Arc<dyn BillingStore>,
    email: Arc<dyn EmailProvider>,
    policy: ReminderPolicy,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        email: Arc<dyn EmailProvider>,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            store,
            email,
            policy,
        }
    }

    #[instrument(skip(self))]
    pub async fn timeline(&self, user_id: Uuid, invoice_id: Uuid) -> Result<ReminderView, AppError> {
        let detail = self
            .store
            .get_invoice(user_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;
        let logs = self.store.list_reminder_logs(invoice_id).await?;

        Ok(ReminderView {
            invoice_id,
            due_date: detail.invoice.due_date,
            checkpoints: reminder_timeline(detail.invoice.due_date, &logs),
        })
    }

    /// Attempt at most one reminder for every sent invoice with a due date.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReminderRunSummary, AppError> {
        let candidates = self.store.list_dunning_candidates().await?;
        let mut summary = ReminderRunSummary::default();

        for invoice in candidates {
            summary.evaluated += 1;
            match self.process(&invoice, now).await {
                Ok(Some(attempt)) => {
                    match attempt.status {
                        ReminderLogStatus::Sent => summary.sent += 1,
                        ReminderLogStatus::Failed => summary.failed += 1,
                    }
                    summary.attempts.push(attempt);
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    error!(invoice_id = %invoice.invoice_id, error = %e, "Reminder evaluation failed");
                }
            }
        }

        info!(
            evaluated = summary.evaluated,
            sent = summary.sent,
            failed = summary.failed,
            errors = summary.errors,
            "Reminder run completed"
        );

        Ok(summary)
    }

    /// Evaluate one invoice under its reminder claim. An invoice held by an
    /// overlapping run is skipped.
    async fn process(
        &self,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderAttempt>, AppError> {
        let Some(claim) = self
            .store
            .claim_reminders(invoice.invoice_id, self.policy.claim_lease)
            .await?
        else {
            info!(invoice_id = %invoice.invoice_id, "Invoice held by another reminder run");
            return Ok(None);
        };

        let result = self.attempt(invoice, now).await;

        if let Err(e) = self.store.release_reminders(invoice.invoice_id, claim).await {
            warn!(invoice_id = %invoice.invoice_id, error = %e, "Failed to release reminder claim");
        }
        result
    }

    async fn attempt(
        &self,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderAttempt>, AppError> {
        let logs = self.store.list_reminder_logs(invoice.invoice_id).await?;
        let Some(reminder_type) = next_due_reminder(invoice.due_date, &logs, now, &self.policy)
        else {
            return Ok(None);
        };

        let user = self.store.get_user(invoice.user_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("User {} not found", invoice.user_id))
        })?;
        let client = self
            .store
            .get_client(invoice.user_id, invoice.client_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Client {} not found", invoice.client_id))
            })?;

        let (sent_to, outcome) = match client.billing_email() {
            Some(to) => {
                let message = templates::reminder_email(reminder_type, to, &user, &client, invoice);
                let outcome = self.email.send(&message).await.map_err(|e| e.to_string());
                (to.to_string(), outcome)
            }
            None => (
                String::new(),
                Err("Client has no email address on file".to_string()),
            ),
        };

        let (status, error_message) = match outcome {
            Ok(()) => (ReminderLogStatus::Sent, None),
            Err(message) => {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    reminder_type = reminder_type.as_str(),
                    error = %message,
                    "Reminder delivery failed"
                );
                (ReminderLogStatus::Failed, Some(message))
            }
        };

        self.store
            .append_reminder_log(&NewReminderLog {
                invoice_id: invoice.invoice_id,
                reminder_type,
                sent_at: now,
                sent_to: sent_to.clone(),
                status,
                error_message,
            })
            .await?;

        REMINDER_ATTEMPTS_TOTAL
            .with_label_values(&[reminder_type.as_str(), status.as_str()])
            .inc();

        info!(
            invoice_id = %invoice.invoice_id,
            reminder_type = reminder_type.as_str(),
            status = status.as_str(),
            "Reminder attempt recorded"
        );

        Ok(Some(ReminderAttempt {
            invoice_id: invoice.invoice_id,
            reminder_type,
            status,
            sent_to,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn log(
        reminder_type: ReminderType,
        status: ReminderLogStatus,
        sent_at: DateTime<Utc>,
    ) -> ReminderLog {
        ReminderLog {
            reminder_log_id: Uuid::new_v4(),
            invoice_id: Uuid::nil(),
            reminder_type: reminder_type.as_str().to_string(),
            sent_at,
            sent_to: "client@example.com".to_string(),
            status: status.as_str().to_string(),
            error_message: match status {
                ReminderLogStatus::Sent => None,
                ReminderLogStatus::Failed => Some("smtp timeout".to_string()),
            },
        }
    }

    #[test]
    fn test_checkpoint_dates_offset_from_due_date() {
        let checkpoints = reminder_timeline(Some(date(2025, 3, 15)), &[]);
        let dates: Vec<_> = checkpoints.iter().map(|c| c.scheduled_for).collect();

        assert_eq!(
            dates,
            vec![
                Some(date(2025, 3, 12)),
                Some(date(2025, 3, 16)),
                Some(date(2025, 3, 22)),
                Some(date(2025, 3, 29)),
            ]
        );
        assert!(checkpoints
            .iter()
            .all(|c| c.state == CheckpointState::Pending));
    }

    #[test]
    fn test_without_due_date_nothing_is_scheduled() {
        let checkpoints = reminder_timeline(None, &[]);

        assert_eq!(checkpoints.len(), 4);
        for checkpoint in checkpoints {
            assert_eq!(checkpoint.scheduled_for, None);
            assert_eq!(checkpoint.state, CheckpointState::NotScheduled);
        }
    }

    #[test]
    fn test_sent_row_marks_only_its_checkpoint() {
        let logs = vec![log(
            ReminderType::Reminder2,
            ReminderLogStatus::Sent,
            at(2025, 3, 16, 9),
        )];
        let checkpoints = reminder_timeline(Some(date(2025, 3, 15)), &logs);

        assert_eq!(checkpoints[0].state, CheckpointState::Pending);
        assert!(matches!(
            checkpoints[1].state,
            CheckpointState::Sent { attempts: 1, .. }
        ));
        assert_eq!(checkpoints[2].state, CheckpointState::Pending);
        assert_eq!(checkpoints[3].state, CheckpointState::Pending);
    }

    #[test]
    fn test_failed_rows_report_latest_attempt_and_count() {
        let logs = vec![
            log(ReminderType::Reminder1, ReminderLogStatus::Failed, at(2025, 3, 12, 9)),
            log(ReminderType::Reminder1, ReminderLogStatus::Failed, at(2025, 3, 13, 9)),
        ];
        let checkpoints = reminder_timeline(Some(date(2025, 3, 15)), &logs);

        match &checkpoints[0].state {
            CheckpointState::Error {
                attempted_at,
                attempts,
                error_message,
            } => {
                assert_eq!(*attempted_at, at(2025, 3, 13, 9));
                assert_eq!(*attempts, 2);
                assert_eq!(error_message.as_deref(), Some("smtp timeout"));
            }
            other => panic!("expected error state, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_due_before_first_checkpoint() {
        let policy = ReminderPolicy::default();
        let due = Some(date(2025, 3, 15));

        assert_eq!(next_due_reminder(due, &[], at(2025, 3, 11, 23), &policy), None);
        assert_eq!(
            next_due_reminder(due, &[], at(2025, 3, 12, 0), &policy),
            Some(ReminderType::Reminder1)
        );
        assert_eq!(next_due_reminder(None, &[], at(2025, 4, 1, 0), &policy), None);
    }

    #[test]
    fn test_earliest_outstanding_checkpoint_goes_first() {
        let policy = ReminderPolicy::default();
        let due = Some(date(2025, 3, 15));
        let sent = vec![log(
            ReminderType::Reminder1,
            ReminderLogStatus::Sent,
            at(2025, 3, 12, 9),
        )];

        assert_eq!(
            next_due_reminder(due, &[], at(2025, 3, 20, 9), &policy),
            Some(ReminderType::Reminder1)
        );
        assert_eq!(
            next_due_reminder(due, &sent, at(2025, 3, 20, 9), &policy),
            Some(ReminderType::Reminder2)
        );
        assert_eq!(
            next_due_reminder(due, &sent, at(2025, 3, 15, 9), &policy),
            None
        );
    }

    #[test]
    fn test_failed_attempt_retries_after_backoff() {
        let policy = ReminderPolicy::default();
        let due = Some(date(2025, 3, 15));
        let failed = vec![log(
            ReminderType::Reminder1,
            ReminderLogStatus::Failed,
            at(2025, 3, 12, 9),
        )];

        assert_eq!(
            next_due_reminder(due, &failed, at(2025, 3, 13, 8), &policy),
            None
        );
        assert_eq!(
            next_due_reminder(due, &failed, at(2025, 3, 13, 9), &policy),
            Some(ReminderType::Reminder1)
        );
    }

    #[test]
    fn test_exhausted_checkpoint_lets_next_one_proceed() {
        let policy = ReminderPolicy {
            max_attempts: 2,
            retry_backoff: Duration::hours(24),
            claim_lease: Duration::minutes(5),
        };
        let due = Some(date(2025, 3, 15));
        let failed = vec![
            log(ReminderType::Reminder1, ReminderLogStatus::Failed, at(2025, 3, 12, 9)),
            log(ReminderType::Reminder1, ReminderLogStatus::Failed, at(2025, 3, 13, 9)),
        ];

        assert_eq!(
            next_due_reminder(due, &failed, at(2025, 3, 15, 9), &policy),
            None
        );
        assert_eq!(
            next_due_reminder(due, &failed, at(2025, 3, 16, 9), &policy),
            Some(ReminderType::Reminder2)
        );
    }
}
