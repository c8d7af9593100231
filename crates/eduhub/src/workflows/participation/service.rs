use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::approval::{BatchOrder, EventLocks};
use super::directory::{DirectoryError, StudentDirectory};
use super::domain::{Event, EventId, RequestId, SchoolId, TransitionError};
use super::notify::DecisionNotifier;
use super::repository::{EventRepository, ParticipationRepository, RepositoryError};
use super::validation::ValidationErrors;

/// Facade over the registry, ledger, approval workflow and roster projection.
///
/// The operations live next to their component (`registry.rs`, `ledger.rs`, `approval.rs`,
/// `roster.rs`); this module only holds the shared collaborators.
pub struct ParticipationService<R, D, N> {
    pub(super) store: Arc<R>,
    pub(super) directory: Arc<D>,
    pub(super) notifier: Arc<N>,
    pub(super) batch_order: BatchOrder,
    pub(super) locks: EventLocks,
}

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(super) fn next_event_id() -> EventId {
    let id = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EventId(format!("evt-{id:06}"))
}

pub(super) fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

impl<R, D, N> ParticipationService<R, D, N>
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    pub fn new(store: Arc<R>, directory: Arc<D>, notifier: Arc<N>) -> Self {
        Self {
            store,
            directory,
            notifier,
            batch_order: BatchOrder::default(),
            locks: EventLocks::default(),
        }
    }

    pub fn with_batch_order(mut self, batch_order: BatchOrder) -> Self {
        self.batch_order = batch_order;
        self
    }

    pub fn batch_order(&self) -> BatchOrder {
        self.batch_order
    }

    pub(super) fn load_event(&self, id: &EventId) -> Result<Event, ParticipationError> {
        self.store
            .fetch_event(id)?
            .ok_or_else(|| ParticipationError::EventNotFound(id.clone()))
    }
}

/// Error raised by the participation service.
#[derive(Debug, thiserror::Error)]
pub enum ParticipationError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("event {0} not found")]
    EventNotFound(EventId),
    #[error("school {school_id} has no participation in event {event_id}")]
    ParticipationNotFound {
        event_id: EventId,
        school_id: SchoolId,
    },
    #[error("event {0} is archived and can no longer be changed")]
    EventArchived(EventId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("failed to export roster: {0}")]
    Export(#[from] csv::Error),
}
