//! Event participation and capacity arbitration.
//!
//! Schools submit students for cross-school events, administrators approve or reject the
//! requests, and every transition is checked against the event's global and per-school
//! ceilings recomputed from the live ledger.

pub mod approval;
pub mod capacity;
pub mod directory;
pub mod domain;
pub mod grade;
pub mod ledger;
pub mod notify;
pub mod registry;
pub mod repository;
pub mod roster;
pub mod router;
pub mod service;
pub(crate) mod validation;

#[cfg(test)]
mod tests;

pub use approval::{
    BatchOrder, DecisionAction, DecisionFailure, DecisionItem, DecisionManifest, DecisionOutcome,
    ForceEnrollForm,
};
pub use capacity::{CapacityBreach, CapacityInfo, CapacityReport, SchoolCapacity};
pub use directory::{CsvStudentDirectory, DirectoryError, StudentDirectory, StudentRecord};
pub use domain::{
    AdminId, ContactDetails, Event, EventId, EventTarget, ParticipationKey, ParticipationRequest,
    ParticipationState, ParticipationStatus, RequestId, SchoolId, StudentId, Transition,
    TransitionError,
};
pub use grade::{Grade, GradeLabel, GradeParseError};
pub use ledger::{
    JoinOutcome, ParticipationForm, ParticipationManifest, PolicyViolation, StudentOutcome,
    WithdrawalSummary,
};
pub use notify::{Decision, DecisionNotice, DecisionNotifier, LoggingNotifier, NotifyError};
pub use registry::{EventDeletion, EventDraft, EventPatch};
pub use repository::{EventRepository, ParticipationRepository, RepositoryError};
pub use roster::{write_roster_csv, ManageView, RosterEntry, StatusBuckets};
pub use router::{participation_router, Actor, ACTOR_HEADER, ROLE_HEADER};
pub use service::{ParticipationError, ParticipationService};
pub use validation::{FieldError, ValidationErrors};
