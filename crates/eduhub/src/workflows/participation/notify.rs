use serde::Serialize;
use tracing::info;

/// Decision forwarded to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotice {
    pub school_email: Option<String>,
    pub student_name: String,
    pub event_title: String,
    #[serde(flatten)]
    pub decision: Decision,
}

/// Outbound hook invoked after approve/reject. Failures never undo the decision.
pub trait DecisionNotifier: Send + Sync {
    fn notify(&self, notice: DecisionNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Default notifier: records the decision in the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl DecisionNotifier for LoggingNotifier {
    fn notify(&self, notice: DecisionNotice) -> Result<(), NotifyError> {
        let decision = match &notice.decision {
            Decision::Approved => "approved",
            Decision::Rejected { .. } => "rejected",
        };
        info!(
            school_email = notice.school_email.as_deref().unwrap_or("unknown"),
            student = %notice.student_name,
            event = %notice.event_title,
            decision,
            "participation decision notice"
        );
        Ok(())
    }
}
