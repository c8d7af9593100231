use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::grade::Grade;

/// Identifier wrapper for events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

/// Identifier wrapper for participation requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchoolId(pub String);

/// Administrator acting on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminId(pub String);

macro_rules! display_id {
    ($($name:ident),+) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })+
    };
}

display_id!(EventId, RequestId, StudentId, SchoolId, AdminId);

/// Which schools may send participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum EventTarget {
    #[default]
    Global,
    #[serde(rename_all = "camelCase")]
    Group {
        group_name: String,
        schools: BTreeSet<SchoolId>,
    },
}

impl EventTarget {
    pub fn admits(&self, school: &SchoolId) -> bool {
        match self {
            EventTarget::Global => true,
            EventTarget::Group { schools, .. } => schools.contains(school),
        }
    }
}

/// A cross-school activity that schools can send students to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub max_participants: Option<u32>,
    pub max_participants_per_school: Option<u32>,
    pub eligible_grades: BTreeSet<Grade>,
    pub target: EventTarget,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Deadlines are inclusive and always evaluated against the caller's `now`.
    pub fn registration_open(&self, now: DateTime<Utc>) -> bool {
        self.registration_deadline
            .map_or(true, |deadline| now <= deadline)
    }
}

/// Contact metadata shared by all of one school's records for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub contact_person: String,
    pub contact_phone: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Flat status label, used for grouping and wire output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
    Enrolled,
}

impl ParticipationStatus {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Pending,
            Self::Approved,
            Self::Rejected,
            Self::Withdrawn,
            Self::Enrolled,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
            Self::Enrolled => "ENROLLED",
        }
    }

    /// Counts toward capacity.
    pub const fn is_filled(self) -> bool {
        matches!(self, Self::Approved | Self::Enrolled)
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a request. Decision metadata only exists on the variants that carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationState {
    Pending,
    Approved {
        #[serde(rename = "approvedAt")]
        at: DateTime<Utc>,
        #[serde(rename = "approvedBy")]
        by: AdminId,
    },
    Rejected {
        #[serde(rename = "rejectedAt")]
        at: DateTime<Utc>,
        #[serde(rename = "rejectedBy")]
        by: AdminId,
        #[serde(rename = "rejectionReason")]
        reason: String,
    },
    Withdrawn {
        #[serde(rename = "withdrawnAt")]
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Enrolled {
        #[serde(rename = "enrolledAt")]
        at: DateTime<Utc>,
        approved_at: DateTime<Utc>,
        approved_by: AdminId,
    },
}

impl ParticipationState {
    pub const fn status(&self) -> ParticipationStatus {
        match self {
            Self::Pending => ParticipationStatus::Pending,
            Self::Approved { .. } => ParticipationStatus::Approved,
            Self::Rejected { .. } => ParticipationStatus::Rejected,
            Self::Withdrawn { .. } => ParticipationStatus::Withdrawn,
            Self::Enrolled { .. } => ParticipationStatus::Enrolled,
        }
    }

    /// Timestamp of the last transition, if the record has left PENDING.
    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pending => None,
            Self::Approved { at, .. }
            | Self::Rejected { at, .. }
            | Self::Withdrawn { at }
            | Self::Enrolled { at, .. } => Some(*at),
        }
    }
}

/// Uniqueness key of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipationKey {
    pub student_id: StudentId,
    pub event_id: EventId,
    pub school_id: SchoolId,
}

/// One student's attempt to join one event via one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationRequest {
    pub id: RequestId,
    pub event_id: EventId,
    pub student_id: StudentId,
    pub school_id: SchoolId,
    #[serde(flatten)]
    pub state: ParticipationState,
    pub requested_at: DateTime<Utc>,
    pub contact: ContactDetails,
    #[serde(default)]
    pub force_enrolled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

/// Whether a transition changed the record or was an idempotent repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move request from {from} to {to}")]
pub struct TransitionError {
    pub from: ParticipationStatus,
    pub to: ParticipationStatus,
}

impl ParticipationRequest {
    pub fn status(&self) -> ParticipationStatus {
        self.state.status()
    }

    pub fn key(&self) -> ParticipationKey {
        ParticipationKey {
            student_id: self.student_id.clone(),
            event_id: self.event_id.clone(),
            school_id: self.school_id.clone(),
        }
    }

    fn illegal(&self, to: ParticipationStatus) -> TransitionError {
        TransitionError {
            from: self.status(),
            to,
        }
    }

    pub fn approve(&mut self, at: DateTime<Utc>, by: AdminId) -> Result<Transition, TransitionError> {
        match self.state {
            ParticipationState::Pending => {
                self.state = ParticipationState::Approved { at, by };
                Ok(Transition::Applied)
            }
            ParticipationState::Approved { .. } | ParticipationState::Enrolled { .. } => {
                Ok(Transition::Unchanged)
            }
            _ => Err(self.illegal(ParticipationStatus::Approved)),
        }
    }

    pub fn reject(
        &mut self,
        at: DateTime<Utc>,
        by: AdminId,
        reason: String,
    ) -> Result<Transition, TransitionError> {
        match self.state {
            ParticipationState::Pending => {
                self.state = ParticipationState::Rejected { at, by, reason };
                Ok(Transition::Applied)
            }
            ParticipationState::Rejected { .. } | ParticipationState::Withdrawn { .. } => {
                Ok(Transition::Unchanged)
            }
            _ => Err(self.illegal(ParticipationStatus::Rejected)),
        }
    }

    pub fn withdraw(&mut self, at: DateTime<Utc>) -> Result<Transition, TransitionError> {
        match self.state {
            ParticipationState::Pending | ParticipationState::Approved { .. } => {
                self.state = ParticipationState::Withdrawn { at };
                Ok(Transition::Applied)
            }
            ParticipationState::Withdrawn { .. } | ParticipationState::Rejected { .. } => {
                Ok(Transition::Unchanged)
            }
            ParticipationState::Enrolled { .. } => Err(self.illegal(ParticipationStatus::Withdrawn)),
        }
    }

    pub fn enroll(&mut self, at: DateTime<Utc>) -> Result<Transition, TransitionError> {
        let (approved_at, approved_by) = match &self.state {
            ParticipationState::Approved { at, by } => (*at, by.clone()),
            ParticipationState::Enrolled { .. } => return Ok(Transition::Unchanged),
            _ => return Err(self.illegal(ParticipationStatus::Enrolled)),
        };
        self.state = ParticipationState::Enrolled {
            at,
            approved_at,
            approved_by,
        };
        Ok(Transition::Applied)
    }

    /// A school asking again for a student it withdrew puts the record back in the queue.
    pub fn reopen(&mut self, at: DateTime<Utc>) -> Result<Transition, TransitionError> {
        match self.state {
            ParticipationState::Withdrawn { .. } => {
                self.state = ParticipationState::Pending;
                self.requested_at = at;
                Ok(Transition::Applied)
            }
            ParticipationState::Pending => Ok(Transition::Unchanged),
            _ => Err(self.illegal(ParticipationStatus::Pending)),
        }
    }
}
