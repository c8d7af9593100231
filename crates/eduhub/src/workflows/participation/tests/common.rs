use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::participation::{
    participation_router, CsvStudentDirectory, DecisionNotice, DecisionNotifier, Event,
    EventDraft, EventId, EventRepository, JoinOutcome, NotifyError, ParticipationForm,
    ParticipationKey, ParticipationManifest, ParticipationRepository, ParticipationRequest,
    ParticipationService, RepositoryError, RequestId, SchoolId, StudentId, StudentRecord,
    ACTOR_HEADER, ROLE_HEADER,
};

pub(super) type TestService =
    ParticipationService<MemoryStore, CsvStudentDirectory, RecordingNotifier>;

#[derive(Default)]
pub(super) struct MemoryStore {
    events: Mutex<BTreeMap<EventId, Event>>,
    requests: Mutex<BTreeMap<RequestId, ParticipationRequest>>,
}

impl MemoryStore {
    pub(super) fn request(&self, id: &RequestId) -> ParticipationRequest {
        self.requests
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .expect("request stored")
    }

    pub(super) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl EventRepository for MemoryStore {
    fn insert_event(&self, event: Event) -> Result<Event, RepositoryError> {
        let mut guard = self.events.lock().unwrap();
        if guard.contains_key(&event.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    fn update_event(&self, event: Event) -> Result<(), RepositoryError> {
        let mut guard = self.events.lock().unwrap();
        match guard.get_mut(&event.id) {
            Some(existing) => {
                *existing = event;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, RepositoryError> {
        Ok(self.events.lock().unwrap().get(id).cloned())
    }

    fn delete_event(&self, id: &EventId) -> Result<(), RepositoryError> {
        self.events
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn list_events(&self) -> Result<Vec<Event>, RepositoryError> {
        Ok(self.events.lock().unwrap().values().cloned().collect())
    }
}

impl ParticipationRepository for MemoryStore {
    fn insert_request(
        &self,
        record: ParticipationRequest,
    ) -> Result<ParticipationRequest, RepositoryError> {
        let mut guard = self.requests.lock().unwrap();
        let key = record.key();
        if guard.contains_key(&record.id) || guard.values().any(|existing| existing.key() == key)
        {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update_request(&self, record: ParticipationRequest) -> Result<(), RepositoryError> {
        let mut guard = self.requests.lock().unwrap();
        match guard.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ParticipationRequest>, RepositoryError> {
        Ok(self.requests.lock().unwrap().get(id).cloned())
    }

    fn find_request(
        &self,
        key: &ParticipationKey,
    ) -> Result<Option<ParticipationRequest>, RepositoryError> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .values()
            .find(|record| &record.key() == key)
            .cloned())
    }

    fn requests_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ParticipationRequest>, RepositoryError> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|record| &record.event_id == event_id)
            .cloned()
            .collect())
    }

    fn delete_requests_for_event(&self, event_id: &EventId) -> Result<usize, RepositoryError> {
        let mut guard = self.requests.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, record| &record.event_id != event_id);
        Ok(before - guard.len())
    }
}

/// Store where another writer always wins the insert race: the rival record lands first and
/// the caller's insert reports a conflict.
#[derive(Default)]
pub(super) struct RacingStore {
    pub(super) inner: MemoryStore,
}

impl EventRepository for RacingStore {
    fn insert_event(&self, event: Event) -> Result<Event, RepositoryError> {
        self.inner.insert_event(event)
    }

    fn update_event(&self, event: Event) -> Result<(), RepositoryError> {
        self.inner.update_event(event)
    }

    fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, RepositoryError> {
        self.inner.fetch_event(id)
    }

    fn delete_event(&self, id: &EventId) -> Result<(), RepositoryError> {
        self.inner.delete_event(id)
    }

    fn list_events(&self) -> Result<Vec<Event>, RepositoryError> {
        self.inner.list_events()
    }
}

impl ParticipationRepository for RacingStore {
    fn insert_request(
        &self,
        record: ParticipationRequest,
    ) -> Result<ParticipationRequest, RepositoryError> {
        let rival = ParticipationRequest {
            id: RequestId(format!("rival-{}", record.id)),
            ..record
        };
        self.inner.insert_request(rival)?;
        Err(RepositoryError::Conflict)
    }

    fn update_request(&self, record: ParticipationRequest) -> Result<(), RepositoryError> {
        self.inner.update_request(record)
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ParticipationRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn find_request(
        &self,
        key: &ParticipationKey,
    ) -> Result<Option<ParticipationRequest>, RepositoryError> {
        self.inner.find_request(key)
    }

    fn requests_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ParticipationRequest>, RepositoryError> {
        self.inner.requests_for_event(event_id)
    }

    fn delete_requests_for_event(&self, event_id: &EventId) -> Result<usize, RepositoryError> {
        self.inner.delete_requests_for_event(event_id)
    }
}

/// Store whose every call fails, for exercising 500 paths.
pub(super) struct UnavailableStore;

impl EventRepository for UnavailableStore {
    fn insert_event(&self, _event: Event) -> Result<Event, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn update_event(&self, _event: Event) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn fetch_event(&self, _id: &EventId) -> Result<Option<Event>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn delete_event(&self, _id: &EventId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn list_events(&self) -> Result<Vec<Event>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }
}

impl ParticipationRepository for UnavailableStore {
    fn insert_request(
        &self,
        _record: ParticipationRequest,
    ) -> Result<ParticipationRequest, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn update_request(&self, _record: ParticipationRequest) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn fetch_request(
        &self,
        _id: &RequestId,
    ) -> Result<Option<ParticipationRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn find_request(
        &self,
        _key: &ParticipationKey,
    ) -> Result<Option<ParticipationRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn requests_for_event(
        &self,
        _event_id: &EventId,
    ) -> Result<Vec<ParticipationRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }

    fn delete_requests_for_event(&self, _event_id: &EventId) -> Result<usize, RepositoryError> {
        Err(RepositoryError::Unavailable("offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    notices: Mutex<Vec<DecisionNotice>>,
}

impl RecordingNotifier {
    pub(super) fn notices(&self) -> Vec<DecisionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl DecisionNotifier for RecordingNotifier {
    fn notify(&self, notice: DecisionNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct FailingNotifier {
    attempts: Mutex<usize>,
}

impl FailingNotifier {
    pub(super) fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl DecisionNotifier for FailingNotifier {
    fn notify(&self, _notice: DecisionNotice) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        Err(NotifyError::Transport("smtp relay down".to_string()))
    }
}

pub(super) fn school(id: &str) -> SchoolId {
    SchoolId(id.to_string())
}

pub(super) fn student(id: &str) -> StudentId {
    StudentId(id.to_string())
}

pub(super) fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Three schools; `sch-a` has an office email, the others do not.
pub(super) fn directory() -> CsvStudentDirectory {
    let mut directory = CsvStudentDirectory::default();
    for (id, name, grade, school_id) in [
        ("a1", "Ada Park", "Grade 9", "sch-a"),
        ("a2", "Ari Moss", "Grade 10", "sch-a"),
        ("a3", "Alex Kim", "9", "sch-a"),
        ("a4", "Avery Lin", "Grade 11", "sch-a"),
        ("k1", "Kai Ford", "Kindergarten", "sch-a"),
        ("b1", "Ben Ortiz", "Grade 9", "sch-b"),
        ("b2", "Bea Shah", "Grade 11", "sch-b"),
        ("c1", "Cy Novak", "Grade 9", "sch-c"),
    ] {
        directory.insert(StudentRecord::new(id, name, grade, school_id));
    }
    directory.set_school_email(school("sch-a"), "office@a.example");
    directory
}

pub(super) fn build_service() -> (TestService, Arc<MemoryStore>, Arc<RecordingNotifier>) {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = ParticipationService::new(store.clone(), Arc::new(directory()), notifier.clone());
    (service, store, notifier)
}

pub(super) fn draft() -> EventDraft {
    EventDraft {
        title: "Regional Science Fair".to_string(),
        description: "Cross-school science projects".to_string(),
        date: NaiveDate::from_ymd_opt(2025, 4, 12),
        ..EventDraft::default()
    }
}

pub(super) fn form(students: &[&str]) -> ParticipationForm {
    ParticipationForm {
        contact_person: "Ms. Rivera".to_string(),
        contact_phone: "555-0100".to_string(),
        notes: None,
        student_ids: students.iter().map(|id| student(id)).collect(),
    }
}

pub(super) fn request_id(manifest: &ParticipationManifest, student_id: &str) -> RequestId {
    match manifest.outcome_for(&student(student_id)) {
        Some(outcome) => outcome.request_id().cloned().expect("student was accepted"),
        None => panic!("no outcome for {student_id}"),
    }
}

pub(super) fn assert_rejected(manifest: &ParticipationManifest, student_id: &str) {
    assert!(
        matches!(
            manifest.outcome_for(&student(student_id)),
            Some(JoinOutcome::Rejected { .. })
        ),
        "expected {student_id} to be rejected: {manifest:?}"
    );
}

pub(super) fn router_with_service(service: TestService) -> axum::Router {
    participation_router(Arc::new(service))
}

pub(super) fn request(
    method: Method,
    uri: &str,
    actor: Option<(&str, &str)>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((role, id)) = actor {
        builder = builder.header(ROLE_HEADER, role).header(ACTOR_HEADER, id);
    }
    match body {
        Some(body) => builder
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub(super) async fn read_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body")
        .to_vec()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = read_body(response).await;
    serde_json::from_slice(&body).expect("json payload")
}
