use super::domain::{Event, EventId, ParticipationKey, ParticipationRequest, RequestId};

/// Storage abstraction for events so the registry can be exercised in isolation.
pub trait EventRepository: Send + Sync {
    fn insert_event(&self, event: Event) -> Result<Event, RepositoryError>;
    fn update_event(&self, event: Event) -> Result<(), RepositoryError>;
    fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, RepositoryError>;
    fn delete_event(&self, id: &EventId) -> Result<(), RepositoryError>;
    fn list_events(&self) -> Result<Vec<Event>, RepositoryError>;
}

/// Ledger storage. Implementations must enforce uniqueness of [`ParticipationKey`] on insert
/// and report a duplicate as [`RepositoryError::Conflict`].
pub trait ParticipationRepository: Send + Sync {
    fn insert_request(
        &self,
        record: ParticipationRequest,
    ) -> Result<ParticipationRequest, RepositoryError>;
    fn update_request(&self, record: ParticipationRequest) -> Result<(), RepositoryError>;
    fn fetch_request(&self, id: &RequestId) -> Result<Option<ParticipationRequest>, RepositoryError>;
    fn find_request(
        &self,
        key: &ParticipationKey,
    ) -> Result<Option<ParticipationRequest>, RepositoryError>;
    fn requests_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ParticipationRequest>, RepositoryError>;
    /// Returns the number of removed records.
    fn delete_requests_for_event(&self, event_id: &EventId) -> Result<usize, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
