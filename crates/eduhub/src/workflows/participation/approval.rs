use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::capacity::{check_admission, CapacityBreach};
use super::directory::StudentDirectory;
use super::domain::{
    AdminId, Event, EventId, ParticipationRequest, ParticipationState, ParticipationStatus,
    RequestId, SchoolId, Transition,
};
use super::ledger::{
    screen_student, JoinOutcome, ParticipationForm, ParticipationManifest, PolicyViolation,
    StudentOutcome,
};
use super::notify::{Decision, DecisionNotice, DecisionNotifier};
use super::repository::{EventRepository, ParticipationRepository};
use super::service::{next_request_id, ParticipationError, ParticipationService};
use super::validation::ValidationErrors;

/// Order in which a batch is evaluated against capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchOrder {
    /// Oldest request first, ties broken by request id.
    #[default]
    RequestedAt,
    /// Exactly as the caller listed the ids.
    Submission,
}

impl BatchOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "requested_at" | "requested-at" | "fifo" => Some(Self::RequestedAt),
            "submission" | "as_submitted" => Some(Self::Submission),
            _ => None,
        }
    }
}

/// One writer per event for every ledger transition that checks capacity.
#[derive(Debug, Default)]
pub struct EventLocks {
    inner: Mutex<HashMap<EventId, Arc<Mutex<()>>>>,
}

impl EventLocks {
    pub(super) fn handle(&self, event_id: &EventId) -> Arc<Mutex<()>> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(event_id.clone()).or_default().clone()
    }

    pub(super) fn release(&self, event_id: &EventId) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(event_id);
    }

    #[cfg(test)]
    pub(super) fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Enroll,
}

impl DecisionAction {
    const fn verb(self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
            Self::Enroll => "enrolled",
        }
    }
}

/// Why a single id in a batch did not transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DecisionFailure {
    #[error("request not found for this event")]
    NotFound,
    #[error("cannot move request from {from} to {to}")]
    IllegalTransition {
        from: ParticipationStatus,
        to: ParticipationStatus,
    },
    #[error("event capacity reached ({filled}/{limit} filled)")]
    EventFull { limit: u32, filled: u32 },
    #[serde(rename_all = "camelCase")]
    #[error("school {school_id} reached its limit ({filled}/{limit} filled)")]
    SchoolFull {
        school_id: SchoolId,
        limit: u32,
        filled: u32,
    },
}

impl DecisionFailure {
    const fn label(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::IllegalTransition { .. } => "illegal transition",
            Self::EventFull { .. } | Self::SchoolFull { .. } => "capacity exceeded",
        }
    }
}

impl From<CapacityBreach> for DecisionFailure {
    fn from(breach: CapacityBreach) -> Self {
        match breach {
            CapacityBreach::Event { limit, filled } => Self::EventFull { limit, filled },
            CapacityBreach::School {
                school_id,
                limit,
                filled,
            } => Self::SchoolFull {
                school_id,
                limit,
                filled,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Applied,
    /// Idempotent repeat of a decision that already holds.
    Unchanged,
    Failed {
        failure: DecisionFailure,
        message: String,
    },
}

impl DecisionOutcome {
    fn failed(failure: DecisionFailure) -> Self {
        let message = failure.to_string();
        Self::Failed { failure, message }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionItem {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: DecisionOutcome,
}

/// Per-id result of a batch, listed in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionManifest {
    pub event_id: EventId,
    pub action: DecisionAction,
    pub items: Vec<DecisionItem>,
    pub succeeded: usize,
    pub failed: usize,
    pub summary: String,
}

impl DecisionManifest {
    fn new(event_id: EventId, action: DecisionAction, items: Vec<DecisionItem>) -> Self {
        let succeeded = items.iter().filter(|item| item.outcome.is_success()).count();
        let failed = items.len() - succeeded;

        let mut reasons = BTreeSet::new();
        for item in &items {
            if let DecisionOutcome::Failed { failure, .. } = &item.outcome {
                reasons.insert(failure.label());
            }
        }
        let summary = if reasons.is_empty() {
            format!("{succeeded} {}, {failed} failed", action.verb())
        } else {
            let reasons: Vec<&str> = reasons.into_iter().collect();
            format!(
                "{succeeded} {}, {failed} failed ({})",
                action.verb(),
                reasons.join(", ")
            )
        };

        Self {
            event_id,
            action,
            items,
            succeeded,
            failed,
            summary,
        }
    }

    pub fn outcome_for(&self, request_id: &RequestId) -> Option<&DecisionOutcome> {
        self.items
            .iter()
            .find(|item| &item.request_id == request_id)
            .map(|item| &item.outcome)
    }
}

/// Drop repeated ids, then apply the configured evaluation order. Ids unknown to the ledger keep
/// their relative position at the end so they still get a not-found entry.
pub fn order_batch(
    order: BatchOrder,
    request_ids: &[RequestId],
    ledger: &[ParticipationRequest],
) -> Vec<RequestId> {
    let mut seen = BTreeSet::new();
    let mut unique: Vec<RequestId> = request_ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();

    if order == BatchOrder::RequestedAt {
        let requested_at: HashMap<&RequestId, DateTime<Utc>> = ledger
            .iter()
            .map(|record| (&record.id, record.requested_at))
            .collect();
        unique.sort_by(|left, right| {
            match (requested_at.get(left), requested_at.get(right)) {
                (Some(a), Some(b)) => a.cmp(b).then_with(|| left.cmp(right)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }

    unique
}

fn require_selection(request_ids: &[RequestId]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if request_ids.is_empty() {
        errors.push("requestIds", "select at least one request");
    }
    errors.into_result()
}

/// Administrator override for `POST /events/{id}/force-enroll`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceEnrollForm {
    #[serde(default)]
    pub school_id: SchoolId,
    #[serde(flatten)]
    pub participation: ParticipationForm,
}

impl<R, D, N> ParticipationService<R, D, N>
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    /// Approve PENDING requests one at a time, re-checking both ceilings before each commit.
    /// Earlier approvals in the same batch count against later ones; nothing is rolled back.
    pub fn approve(
        &self,
        event_id: &EventId,
        request_ids: &[RequestId],
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<DecisionManifest, ParticipationError> {
        require_selection(request_ids)?;
        let event = self.load_event(event_id)?;
        let lock = self.locks.handle(&event.id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.store.requests_for_event(&event.id)?;
        let ordered = order_batch(self.batch_order, request_ids, &snapshot);

        let mut items = Vec::with_capacity(ordered.len());
        for request_id in ordered {
            let ledger = self.store.requests_for_event(&event.id)?;
            let outcome = match ledger.iter().find(|record| record.id == request_id) {
                None => DecisionOutcome::failed(DecisionFailure::NotFound),
                Some(record) => self.approve_one(&event, &ledger, record.clone(), admin, now)?,
            };
            items.push(DecisionItem {
                request_id,
                outcome,
            });
        }

        let manifest = DecisionManifest::new(event.id, DecisionAction::Approve, items);
        info!(
            event_id = %manifest.event_id,
            admin = %admin,
            succeeded = manifest.succeeded,
            failed = manifest.failed,
            "approval batch processed"
        );
        Ok(manifest)
    }

    fn approve_one(
        &self,
        event: &Event,
        ledger: &[ParticipationRequest],
        mut record: ParticipationRequest,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ParticipationError> {
        if record.status() == ParticipationStatus::Pending {
            if let Err(breach) = check_admission(event, ledger, &record.school_id) {
                return Ok(DecisionOutcome::failed(breach.into()));
            }
        }

        match record.approve(now, admin.clone()) {
            Ok(Transition::Applied) => {
                self.store.update_request(record.clone())?;
                self.notify_decision(event, &record, Decision::Approved);
                Ok(DecisionOutcome::Applied)
            }
            Ok(Transition::Unchanged) => Ok(DecisionOutcome::Unchanged),
            Err(err) => Ok(DecisionOutcome::failed(DecisionFailure::IllegalTransition {
                from: err.from,
                to: err.to,
            })),
        }
    }

    pub fn reject(
        &self,
        event_id: &EventId,
        request_ids: &[RequestId],
        reason: &str,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<DecisionManifest, ParticipationError> {
        let mut errors = ValidationErrors::new();
        if request_ids.is_empty() {
            errors.push("requestIds", "select at least one request");
        }
        errors.require_text("reason", reason);
        errors.into_result()?;

        let event = self.load_event(event_id)?;
        let lock = self.locks.handle(&event.id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let ledger = self.store.requests_for_event(&event.id)?;
        let ordered = order_batch(self.batch_order, request_ids, &ledger);
        let reason = reason.trim().to_string();

        let mut items = Vec::with_capacity(ordered.len());
        for request_id in ordered {
            let Some(mut record) = ledger.iter().find(|record| record.id == request_id).cloned()
            else {
                items.push(DecisionItem {
                    request_id,
                    outcome: DecisionOutcome::failed(DecisionFailure::NotFound),
                });
                continue;
            };

            let outcome = match record.reject(now, admin.clone(), reason.clone()) {
                Ok(Transition::Applied) => {
                    self.store.update_request(record.clone())?;
                    self.notify_decision(
                        &event,
                        &record,
                        Decision::Rejected {
                            reason: reason.clone(),
                        },
                    );
                    DecisionOutcome::Applied
                }
                Ok(Transition::Unchanged) => DecisionOutcome::Unchanged,
                Err(err) => DecisionOutcome::failed(DecisionFailure::IllegalTransition {
                    from: err.from,
                    to: err.to,
                }),
            };
            items.push(DecisionItem {
                request_id,
                outcome,
            });
        }

        let manifest = DecisionManifest::new(event.id, DecisionAction::Reject, items);
        info!(
            event_id = %manifest.event_id,
            admin = %admin,
            succeeded = manifest.succeeded,
            failed = manifest.failed,
            "rejection batch processed"
        );
        Ok(manifest)
    }

    /// Mark APPROVED participants as ENROLLED once they are confirmed on site.
    pub fn enroll(
        &self,
        event_id: &EventId,
        request_ids: &[RequestId],
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<DecisionManifest, ParticipationError> {
        require_selection(request_ids)?;
        let event = self.load_event(event_id)?;
        let lock = self.locks.handle(&event.id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let ledger = self.store.requests_for_event(&event.id)?;
        let ordered = order_batch(self.batch_order, request_ids, &ledger);

        let mut items = Vec::with_capacity(ordered.len());
        for request_id in ordered {
            let outcome = match ledger.iter().find(|record| record.id == request_id).cloned() {
                None => DecisionOutcome::failed(DecisionFailure::NotFound),
                Some(mut record) => match record.enroll(now) {
                    Ok(Transition::Applied) => {
                        self.store.update_request(record)?;
                        DecisionOutcome::Applied
                    }
                    Ok(Transition::Unchanged) => DecisionOutcome::Unchanged,
                    Err(err) => DecisionOutcome::failed(DecisionFailure::IllegalTransition {
                        from: err.from,
                        to: err.to,
                    }),
                },
            };
            items.push(DecisionItem {
                request_id,
                outcome,
            });
        }

        let manifest = DecisionManifest::new(event.id, DecisionAction::Enroll, items);
        info!(
            event_id = %manifest.event_id,
            admin = %admin,
            succeeded = manifest.succeeded,
            "enrollment batch processed"
        );
        Ok(manifest)
    }

    /// Approve students for a school regardless of eligibility, deadline, scope or capacity.
    /// Each bypassed rule is recorded on the request in `validation_errors`. Students must
    /// exist in the directory and belong to the school.
    pub fn force_enroll(
        &self,
        event_id: &EventId,
        form: &ForceEnrollForm,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<ParticipationManifest, ParticipationError> {
        let mut errors = ValidationErrors::new();
        errors.require_text("schoolId", &form.school_id.0);
        let validated = form.participation.validate();
        if let Err(form_errors) = &validated {
            for error in form_errors.fields() {
                errors.push(error.field, error.message.clone());
            }
        }
        errors.into_result()?;
        let (contact, students) = validated?;

        let event = self.load_event(event_id)?;
        let school_id = &form.school_id;
        let lock = self.locks.handle(&event.id);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut outcomes = Vec::with_capacity(students.len());
        for student_id in students {
            let Some(student) = self.directory.student(&student_id)? else {
                outcomes.push(StudentOutcome {
                    student_id,
                    outcome: JoinOutcome::rejected(PolicyViolation::UnknownStudent),
                });
                continue;
            };
            if &student.school_id != school_id {
                outcomes.push(StudentOutcome {
                    student_id,
                    outcome: JoinOutcome::rejected(PolicyViolation::WrongSchool {
                        actual_school: student.school_id,
                    }),
                });
                continue;
            }

            let ledger = self.store.requests_for_event(&event.id)?;
            let existing = ledger
                .iter()
                .find(|record| &record.school_id == school_id && record.student_id == student_id)
                .cloned();

            if let Some(record) = &existing {
                if record.status().is_filled() {
                    outcomes.push(StudentOutcome {
                        student_id,
                        outcome: JoinOutcome::Kept {
                            request_id: record.id.clone(),
                            status: record.status(),
                        },
                    });
                    continue;
                }
            }

            let mut bypassed: Vec<String> = screen_student(&event, school_id, &student, now)
                .iter()
                .map(ToString::to_string)
                .collect();
            if let Err(breach) = check_admission(&event, &ledger, school_id) {
                bypassed.push(breach.to_string());
            }

            let state = ParticipationState::Approved {
                at: now,
                by: admin.clone(),
            };
            let request_id = match existing {
                Some(mut record) => {
                    record.state = state;
                    record.contact = contact.clone();
                    record.force_enrolled = true;
                    record.validation_errors = bypassed.clone();
                    self.store.update_request(record.clone())?;
                    record.id
                }
                None => {
                    let record = ParticipationRequest {
                        id: next_request_id(),
                        event_id: event.id.clone(),
                        student_id: student_id.clone(),
                        school_id: school_id.clone(),
                        state,
                        requested_at: now,
                        contact: contact.clone(),
                        force_enrolled: true,
                        validation_errors: bypassed.clone(),
                    };
                    self.store.insert_request(record)?.id
                }
            };

            if !bypassed.is_empty() {
                warn!(
                    event_id = %event.id,
                    request_id = %request_id,
                    admin = %admin,
                    bypassed = bypassed.len(),
                    "participant force-enrolled past validation"
                );
            }
            outcomes.push(StudentOutcome {
                student_id,
                outcome: JoinOutcome::ForceEnrolled {
                    request_id,
                    validation_errors: bypassed,
                },
            });
        }

        self.share_contact(&event.id, school_id, &contact)?;
        Ok(ParticipationManifest::new(
            event.id,
            school_id.clone(),
            outcomes,
        ))
    }

    /// Best effort: a failing lookup or transport is logged and the decision stands.
    fn notify_decision(&self, event: &Event, record: &ParticipationRequest, decision: Decision) {
        let student_name = match self.directory.student(&record.student_id) {
            Ok(Some(student)) => student.name,
            Ok(None) => record.student_id.0.clone(),
            Err(err) => {
                warn!(request_id = %record.id, error = %err, "student lookup failed for notice");
                record.student_id.0.clone()
            }
        };
        let school_email = self
            .directory
            .school_contact_email(&record.school_id)
            .unwrap_or_else(|err| {
                warn!(school_id = %record.school_id, error = %err, "school email lookup failed");
                None
            });

        let notice = DecisionNotice {
            school_email,
            student_name,
            event_title: event.title.clone(),
            decision,
        };
        if let Err(err) = self.notifier.notify(notice) {
            warn!(request_id = %record.id, error = %err, "decision notification failed");
        }
    }
}
