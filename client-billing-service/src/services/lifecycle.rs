//! Invoice status state machine.
//!
//! | from      | send | mark_paid | archive  | unarchive |
//! |-----------|------|-----------|----------|-----------|
//! | draft     | sent | paid      | archived | -         |
//! | sent      | sent | paid      | archived | -         |
//! | paid      | -    | no-op     | archived | -         |
//! | archived  | -    | -         | no-op    | draft     |
//!
//! Rejected combinations fail with `PreconditionFailed`.

use crate::models::InvoiceStatus;
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Send,
    MarkPaid,
    Archive,
    Unarchive,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Send => "send",
            Transition::MarkPaid => "mark_paid",
            Transition::Archive => "archive",
            Transition::Unarchive => "unarchive",
        }
    }
}

/// What applying a transition to a given status amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Write the new status.
    Apply(InvoiceStatus),
    /// Already in the target state; nothing to write.
    Unchanged,
}

pub fn plan_transition(from: InvoiceStatus, transition: Transition) -> Result<Plan, AppError> {
    use InvoiceStatus::*;

    let plan = match (from, transition) {
        (Draft | Sent, Transition::Send) => Plan::Apply(Sent),
        (Draft | Sent, Transition::MarkPaid) => Plan::Apply(Paid),
        (Paid, Transition::MarkPaid) => Plan::Unchanged,
        (Draft | Sent | Paid, Transition::Archive) => Plan::Apply(Archived),
        (Archived, Transition::Archive) => Plan::Unchanged,
        (Archived, Transition::Unarchive) => Plan::Apply(Draft),
        (from, transition) => {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Cannot {} an invoice that is {}",
                transition.as_str(),
                from.as_str()
            )))
        }
    };
    Ok(plan)
}

/// Items and dates may only be edited before payment or archival.
pub fn ensure_editable(status: InvoiceStatus) -> Result<(), AppError> {
    match status {
        InvoiceStatus::Draft | InvoiceStatus::Sent => Ok(()),
        InvoiceStatus::Paid | InvoiceStatus::Archived => Err(AppError::PreconditionFailed(
            anyhow::anyhow!("Cannot edit an invoice that is {}", status.as_str()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvoiceStatus::*;

    #[test]
    fn test_transition_table() {
        let cases = [
            (Draft, Transition::Send, Some(Plan::Apply(Sent))),
            (Draft, Transition::MarkPaid, Some(Plan::Apply(Paid))),
            (Draft, Transition::Archive, Some(Plan::Apply(Archived))),
            (Draft, Transition::Unarchive, None),
            (Sent, Transition::Send, Some(Plan::Apply(Sent))),
            (Sent, Transition::MarkPaid, Some(Plan::Apply(Paid))),
            (Sent, Transition::Archive, Some(Plan::Apply(Archived))),
            (Sent, Transition::Unarchive, None),
            (Paid, Transition::Send, None),
            (Paid, Transition::MarkPaid, Some(Plan::Unchanged)),
            (Paid, Transition::Archive, Some(Plan::Apply(Archived))),
            (Paid, Transition::Unarchive, None),
            (Archived, Transition::Send, None),
            (Archived, Transition::MarkPaid, None),
            (Archived, Transition::Archive, Some(Plan::Unchanged)),
            (Archived, Transition::Unarchive, Some(Plan::Apply(Draft))),
        ];

        for (from, transition, expected) in cases {
            let result = plan_transition(from, transition);
            match expected {
                Some(plan) => assert_eq!(result.unwrap(), plan, "{:?} {:?}", from, transition),
                None => assert!(
                    matches!(result, Err(AppError::PreconditionFailed(_))),
                    "{:?} {:?} should be rejected",
                    from,
                    transition
                ),
            }
        }
    }

    #[test]
    fn test_only_draft_and_sent_are_editable() {
        assert!(ensure_editable(Draft).is_ok());
        assert!(ensure_editable(Sent).is_ok());
        assert!(ensure_editable(Paid).is_err());
        assert!(ensure_editable(Archived).is_err());
    }
}
