use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::directory::{StudentDirectory, StudentRecord};
use super::domain::{
    ContactDetails, Event, EventId, ParticipationKey, ParticipationRequest, ParticipationState,
    ParticipationStatus, RequestId, SchoolId, StudentId,
};
use super::grade::is_eligible;
use super::notify::DecisionNotifier;
use super::repository::{EventRepository, ParticipationRepository, RepositoryError};
use super::service::{next_request_id, ParticipationError, ParticipationService};
use super::validation::ValidationErrors;

/// School submission for `POST` and `PUT /events/{id}/participate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationForm {
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<StudentId>,
}

impl ParticipationForm {
    /// Returns the shared contact block and the de-duplicated roster in submission order.
    pub fn validate(&self) -> Result<(ContactDetails, Vec<StudentId>), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require_text("contactPerson", &self.contact_person);
        errors.require_text("contactPhone", &self.contact_phone);
        if self.student_ids.is_empty() {
            errors.push("studentIds", "select at least one student");
        }
        if self.student_ids.iter().any(|id| id.0.trim().is_empty()) {
            errors.push("studentIds", "student ids must not be blank");
        }
        errors.into_result()?;

        let mut seen = BTreeSet::new();
        let students = self
            .student_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);

        Ok((
            ContactDetails {
                contact_person: self.contact_person.trim().to_string(),
                contact_phone: self.contact_phone.trim().to_string(),
                notes,
            },
            students,
        ))
    }
}

/// Reason a single student was kept out of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PolicyViolation {
    #[error("student is not known to the directory")]
    UnknownStudent,
    #[serde(rename_all = "camelCase")]
    #[error("student belongs to school {actual_school}")]
    WrongSchool { actual_school: SchoolId },
    #[error("event is archived")]
    EventArchived,
    #[error("school is not part of the event's target group")]
    OutsideTargetGroup,
    #[error("registration closed at {deadline}")]
    DeadlinePassed { deadline: DateTime<Utc> },
    #[error("grade '{grade}' is not eligible for this event")]
    GradeIneligible { grade: String },
}

/// Every rule a student fails for `school` to join `event` at `now`.
pub fn screen_student(
    event: &Event,
    school: &SchoolId,
    student: &StudentRecord,
    now: DateTime<Utc>,
) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();

    if &student.school_id != school {
        violations.push(PolicyViolation::WrongSchool {
            actual_school: student.school_id.clone(),
        });
    }
    if event.archived {
        violations.push(PolicyViolation::EventArchived);
    }
    if !event.target.admits(school) {
        violations.push(PolicyViolation::OutsideTargetGroup);
    }
    if !event.registration_open(now) {
        if let Some(deadline) = event.registration_deadline {
            violations.push(PolicyViolation::DeadlinePassed { deadline });
        }
    }
    if !is_eligible(event, student.grade) {
        violations.push(PolicyViolation::GradeIneligible {
            grade: student.grade_label.clone(),
        });
    }

    violations
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    #[serde(rename_all = "camelCase")]
    Created { request_id: RequestId },
    #[serde(rename_all = "camelCase")]
    Reopened { request_id: RequestId },
    /// Record already exists; its status is left alone.
    #[serde(rename_all = "camelCase")]
    Kept {
        request_id: RequestId,
        status: ParticipationStatus,
    },
    #[serde(rename_all = "camelCase")]
    Withdrawn { request_id: RequestId },
    #[serde(rename_all = "camelCase")]
    ForceEnrolled {
        request_id: RequestId,
        validation_errors: Vec<String>,
    },
    Rejected {
        violation: PolicyViolation,
        message: String,
    },
}

impl JoinOutcome {
    pub(super) fn rejected(violation: PolicyViolation) -> Self {
        let message = violation.to_string();
        Self::Rejected { violation, message }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Created { request_id }
            | Self::Reopened { request_id }
            | Self::Kept { request_id, .. }
            | Self::Withdrawn { request_id }
            | Self::ForceEnrolled { request_id, .. } => Some(request_id),
            Self::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOutcome {
    pub student_id: StudentId,
    #[serde(flatten)]
    pub outcome: JoinOutcome,
}

/// Per-student result of a join, edit or force-enroll call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationManifest {
    pub event_id: EventId,
    pub school_id: SchoolId,
    pub outcomes: Vec<StudentOutcome>,
    pub accepted: usize,
    pub rejected: usize,
    pub summary: String,
}

impl ParticipationManifest {
    pub(super) fn new(event_id: EventId, school_id: SchoolId, outcomes: Vec<StudentOutcome>) -> Self {
        let rejected = outcomes
            .iter()
            .filter(|entry| entry.outcome.is_rejected())
            .count();
        let accepted = outcomes.len() - rejected;
        let summary = format!("{accepted} accepted, {rejected} rejected");
        Self {
            event_id,
            school_id,
            outcomes,
            accepted,
            rejected,
            summary,
        }
    }

    pub fn outcome_for(&self, student_id: &StudentId) -> Option<&JoinOutcome> {
        self.outcomes
            .iter()
            .find(|entry| &entry.student_id == student_id)
            .map(|entry| &entry.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSummary {
    pub event_id: EventId,
    pub school_id: SchoolId,
    pub withdrawn: Vec<RequestId>,
}

impl<R, D, N> ParticipationService<R, D, N>
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    /// Create PENDING records for newly listed students. Existing records keep their status.
    pub fn join(
        &self,
        event_id: &EventId,
        school_id: &SchoolId,
        form: &ParticipationForm,
        now: DateTime<Utc>,
    ) -> Result<ParticipationManifest, ParticipationError> {
        let (contact, students) = form.validate()?;
        let event = self.load_event(event_id)?;
        let existing = self.school_records(&event.id, school_id)?;

        let mut outcomes = Vec::with_capacity(students.len());
        for student_id in students {
            let outcome = self.admit_student(
                &event,
                school_id,
                &contact,
                &student_id,
                existing.get(&student_id),
                now,
            )?;
            outcomes.push(StudentOutcome {
                student_id,
                outcome,
            });
        }

        // Archived events keep their ledger as it was.
        if !event.archived {
            self.share_contact(&event.id, school_id, &contact)?;
        }

        let manifest = ParticipationManifest::new(event.id, school_id.clone(), outcomes);
        info!(
            event_id = %manifest.event_id,
            school_id = %manifest.school_id,
            accepted = manifest.accepted,
            rejected = manifest.rejected,
            "participation request processed"
        );
        Ok(manifest)
    }

    /// Replace the school's roster: add missing students, withdraw PENDING ones no longer listed.
    pub fn edit(
        &self,
        event_id: &EventId,
        school_id: &SchoolId,
        form: &ParticipationForm,
        now: DateTime<Utc>,
    ) -> Result<ParticipationManifest, ParticipationError> {
        let (contact, students) = form.validate()?;
        let event = self.load_open_event(event_id)?;
        let existing = self.school_records(&event.id, school_id)?;
        if existing.is_empty() {
            return Err(ParticipationError::ParticipationNotFound {
                event_id: event.id,
                school_id: school_id.clone(),
            });
        }

        let wanted: BTreeSet<&StudentId> = students.iter().collect();
        let mut outcomes = Vec::new();

        let mut dropped: Vec<&ParticipationRequest> = existing
            .values()
            .filter(|record| {
                record.status() == ParticipationStatus::Pending
                    && !wanted.contains(&record.student_id)
            })
            .collect();
        dropped.sort_by(|left, right| left.student_id.cmp(&right.student_id));

        for record in dropped {
            let mut record = record.clone();
            record.withdraw(now)?;
            self.store.update_request(record.clone())?;
            outcomes.push(StudentOutcome {
                student_id: record.student_id,
                outcome: JoinOutcome::Withdrawn {
                    request_id: record.id,
                },
            });
        }

        for student_id in &students {
            let outcome = self.admit_student(
                &event,
                school_id,
                &contact,
                student_id,
                existing.get(student_id),
                now,
            )?;
            outcomes.push(StudentOutcome {
                student_id: student_id.clone(),
                outcome,
            });
        }

        self.share_contact(&event.id, school_id, &contact)?;

        let manifest = ParticipationManifest::new(event.id, school_id.clone(), outcomes);
        info!(
            event_id = %manifest.event_id,
            school_id = %manifest.school_id,
            accepted = manifest.accepted,
            rejected = manifest.rejected,
            "participation roster edited"
        );
        Ok(manifest)
    }

    /// Withdraw every PENDING or APPROVED record the school holds for the event.
    pub fn withdraw(
        &self,
        event_id: &EventId,
        school_id: &SchoolId,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalSummary, ParticipationError> {
        let event = self.load_open_event(event_id)?;
        let existing = self.school_records(&event.id, school_id)?;
        if existing.is_empty() {
            return Err(ParticipationError::ParticipationNotFound {
                event_id: event.id,
                school_id: school_id.clone(),
            });
        }

        let mut records: Vec<ParticipationRequest> = existing.into_values().collect();
        records.sort_by(|left, right| left.id.cmp(&right.id));

        let mut withdrawn = Vec::new();
        for mut record in records {
            let active = matches!(
                record.state,
                ParticipationState::Pending | ParticipationState::Approved { .. }
            );
            if !active {
                continue;
            }
            record.withdraw(now)?;
            self.store.update_request(record.clone())?;
            withdrawn.push(record.id);
        }

        info!(
            event_id = %event.id,
            school_id = %school_id,
            withdrawn = withdrawn.len(),
            "school withdrew participation"
        );
        Ok(WithdrawalSummary {
            event_id: event.id,
            school_id: school_id.clone(),
            withdrawn,
        })
    }

    pub(super) fn school_records(
        &self,
        event_id: &EventId,
        school_id: &SchoolId,
    ) -> Result<HashMap<StudentId, ParticipationRequest>, ParticipationError> {
        Ok(self
            .store
            .requests_for_event(event_id)?
            .into_iter()
            .filter(|record| &record.school_id == school_id)
            .map(|record| (record.student_id.clone(), record))
            .collect())
    }

    fn admit_student(
        &self,
        event: &Event,
        school_id: &SchoolId,
        contact: &ContactDetails,
        student_id: &StudentId,
        existing: Option<&ParticipationRequest>,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, ParticipationError> {
        if let Some(record) = existing {
            if record.status() != ParticipationStatus::Withdrawn {
                return Ok(JoinOutcome::Kept {
                    request_id: record.id.clone(),
                    status: record.status(),
                });
            }
        }

        let Some(student) = self.directory.student(student_id)? else {
            return Ok(JoinOutcome::rejected(PolicyViolation::UnknownStudent));
        };
        if let Some(violation) = screen_student(event, school_id, &student, now)
            .into_iter()
            .next()
        {
            return Ok(JoinOutcome::rejected(violation));
        }

        if let Some(record) = existing {
            let mut record = record.clone();
            record.reopen(now)?;
            record.contact = contact.clone();
            self.store.update_request(record.clone())?;
            return Ok(JoinOutcome::Reopened {
                request_id: record.id,
            });
        }

        let record = ParticipationRequest {
            id: next_request_id(),
            event_id: event.id.clone(),
            student_id: student_id.clone(),
            school_id: school_id.clone(),
            state: ParticipationState::Pending,
            requested_at: now,
            contact: contact.clone(),
            force_enrolled: false,
            validation_errors: Vec::new(),
        };
        let key = record.key();

        match self.store.insert_request(record) {
            Ok(stored) => Ok(JoinOutcome::Created {
                request_id: stored.id,
            }),
            Err(RepositoryError::Conflict) => self.existing_outcome(&key),
            Err(err) => Err(err.into()),
        }
    }

    /// A concurrent writer created the record first; report it as the existing one.
    fn existing_outcome(&self, key: &ParticipationKey) -> Result<JoinOutcome, ParticipationError> {
        let record = self
            .store
            .find_request(key)?
            .ok_or(RepositoryError::NotFound)?;
        let status = record.status();
        Ok(JoinOutcome::Kept {
            request_id: record.id,
            status,
        })
    }

    fn load_open_event(&self, event_id: &EventId) -> Result<Event, ParticipationError> {
        let event = self.load_event(event_id)?;
        if event.archived {
            return Err(ParticipationError::EventArchived(event.id));
        }
        Ok(event)
    }

    pub(super) fn share_contact(
        &self,
        event_id: &EventId,
        school_id: &SchoolId,
        contact: &ContactDetails,
    ) -> Result<(), ParticipationError> {
        for (_, mut record) in self.school_records(event_id, school_id)? {
            if &record.contact != contact {
                record.contact = contact.clone();
                self.store.update_request(record)?;
            }
        }
        Ok(())
    }
}
