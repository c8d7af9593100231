use chrono::NaiveDate;
use eduhub::config::ParticipationConfig;
use eduhub::workflows::participation::{
    CsvStudentDirectory, DirectoryError, Event, EventId, EventRepository, ParticipationKey,
    ParticipationRepository, ParticipationRequest, RepositoryError, RequestId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local store backing both repositories. Requests are indexed by their uniqueness key.
#[derive(Default, Clone)]
pub(crate) struct InMemoryStore {
    events: Arc<Mutex<HashMap<EventId, Event>>>,
    requests: Arc<Mutex<HashMap<RequestId, ParticipationRequest>>>,
    keys: Arc<Mutex<HashMap<ParticipationKey, RequestId>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
}

impl EventRepository for InMemoryStore {
    fn insert_event(&self, event: Event) -> Result<Event, RepositoryError> {
        let mut guard = lock(&self.events)?;
        if guard.contains_key(&event.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    fn update_event(&self, event: Event) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.events)?;
        if guard.contains_key(&event.id) {
            guard.insert(event.id.clone(), event);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, RepositoryError> {
        Ok(lock(&self.events)?.get(id).cloned())
    }

    fn delete_event(&self, id: &EventId) -> Result<(), RepositoryError> {
        lock(&self.events)?
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn list_events(&self) -> Result<Vec<Event>, RepositoryError> {
        Ok(lock(&self.events)?.values().cloned().collect())
    }
}

impl ParticipationRepository for InMemoryStore {
    fn insert_request(
        &self,
        record: ParticipationRequest,
    ) -> Result<ParticipationRequest, RepositoryError> {
        let mut keys = lock(&self.keys)?;
        let key = record.key();
        if keys.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        let mut requests = lock(&self.requests)?;
        if requests.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        keys.insert(key, record.id.clone());
        requests.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update_request(&self, record: ParticipationRequest) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.requests)?;
        match guard.get_mut(&record.id) {
            Some(existing) if existing.key() == record.key() => {
                *existing = record;
                Ok(())
            }
            Some(_) => Err(RepositoryError::Conflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ParticipationRequest>, RepositoryError> {
        Ok(lock(&self.requests)?.get(id).cloned())
    }

    fn find_request(
        &self,
        key: &ParticipationKey,
    ) -> Result<Option<ParticipationRequest>, RepositoryError> {
        let keys = lock(&self.keys)?;
        let Some(id) = keys.get(key) else {
            return Ok(None);
        };
        Ok(lock(&self.requests)?.get(id).cloned())
    }

    fn requests_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ParticipationRequest>, RepositoryError> {
        let mut records: Vec<ParticipationRequest> = lock(&self.requests)?
            .values()
            .filter(|record| &record.event_id == event_id)
            .cloned()
            .collect();
        records.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(records)
    }

    fn delete_requests_for_event(&self, event_id: &EventId) -> Result<usize, RepositoryError> {
        let mut keys = lock(&self.keys)?;
        let mut requests = lock(&self.requests)?;
        let before = requests.len();
        requests.retain(|_, record| &record.event_id != event_id);
        keys.retain(|key, _| &key.event_id != event_id);
        Ok(before - requests.len())
    }
}

/// Load the configured directory export, or start with an empty directory.
pub(crate) fn load_directory(
    config: &ParticipationConfig,
) -> Result<CsvStudentDirectory, DirectoryError> {
    match &config.student_directory {
        Some(path) => {
            let directory = CsvStudentDirectory::from_path(path)?;
            info!(path = %path.display(), students = directory.len(), "student directory loaded");
            Ok(directory)
        }
        None => {
            warn!("no student directory configured; every join will report unknown students");
            Ok(CsvStudentDirectory::default())
        }
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
