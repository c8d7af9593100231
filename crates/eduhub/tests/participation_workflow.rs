//! End-to-end scenarios for event participation driven through the public service facade and
//! the HTTP router, using a CSV-loaded student directory.

mod common {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use eduhub::workflows::participation::{
        CsvStudentDirectory, Event, EventDraft, EventId, EventRepository, LoggingNotifier,
        ParticipationForm, ParticipationKey, ParticipationRepository, ParticipationRequest,
        ParticipationService, RepositoryError, RequestId, StudentId,
    };

    pub(super) type Service = ParticipationService<MemoryStore, CsvStudentDirectory, LoggingNotifier>;

    #[derive(Default)]
    pub(super) struct MemoryStore {
        events: Mutex<HashMap<EventId, Event>>,
        requests: Mutex<Vec<ParticipationRequest>>,
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
            guard
                .get_mut(&event.id)
                .map(|existing| *existing = event)
                .ok_or(RepositoryError::NotFound)
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
            if guard.iter().any(|existing| existing.key() == record.key()) {
                return Err(RepositoryError::Conflict);
            }
            guard.push(record.clone());
            Ok(record)
        }

        fn update_request(&self, record: ParticipationRequest) -> Result<(), RepositoryError> {
            let mut guard = self.requests.lock().unwrap();
            let slot = guard
                .iter_mut()
                .find(|existing| existing.id == record.id)
                .ok_or(RepositoryError::NotFound)?;
            *slot = record;
            Ok(())
        }

        fn fetch_request(
            &self,
            id: &RequestId,
        ) -> Result<Option<ParticipationRequest>, RepositoryError> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .iter()
                .find(|record| &record.id == id)
                .cloned())
        }

        fn find_request(
            &self,
            key: &ParticipationKey,
        ) -> Result<Option<ParticipationRequest>, RepositoryError> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .iter()
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
                .iter()
                .filter(|record| &record.event_id == event_id)
                .cloned()
                .collect())
        }

        fn delete_requests_for_event(&self, event_id: &EventId) -> Result<usize, RepositoryError> {
            let mut guard = self.requests.lock().unwrap();
            let before = guard.len();
            guard.retain(|record| &record.event_id != event_id);
            Ok(before - guard.len())
        }
    }

    const DIRECTORY_CSV: &str = "student_id,name,grade,school_id,school_email\n\
        s-a1,Ada Park,Grade 9,sch-a,office@a.example\n\
        s-a2,Ari Moss,10,sch-a,\n\
        s-b1,Ben Ortiz,Grade 9,sch-b,desk@b.example\n\
        s-b2,Bea Shah,Grade 12,sch-b,\n\
        s-c1,Cy Novak,09,sch-c,\n";

    pub(super) fn build_service() -> (Service, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let directory =
            CsvStudentDirectory::from_reader(DIRECTORY_CSV.as_bytes()).expect("directory loads");
        let service = ParticipationService::new(
            store.clone(),
            Arc::new(directory),
            Arc::new(LoggingNotifier),
        );
        (service, store)
    }

    pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    pub(super) fn draft(max: Option<u32>) -> EventDraft {
        EventDraft {
            title: "Autumn Robotics Challenge".to_string(),
            description: "Teams build and race robots".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 10, 18),
            registration_deadline: Some(at(20, 23)),
            max_participants: max,
            eligible_grades: vec!["9".into(), "10".into()],
            ..EventDraft::default()
        }
    }

    pub(super) fn form(students: &[&str]) -> ParticipationForm {
        ParticipationForm {
            contact_person: "Coach Diaz".to_string(),
            contact_phone: "555-0142".to_string(),
            notes: Some("two chaperones".to_string()),
            student_ids: students.iter().map(|id| StudentId(id.to_string())).collect(),
        }
    }
}

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use eduhub::workflows::participation::{
    participation_router, AdminId, DecisionOutcome, ParticipationRepository, ParticipationStatus,
    SchoolId, StudentId, ACTOR_HEADER, ROLE_HEADER,
};
use serde_json::{json, Value};
use tower::ServiceExt;

#[test]
fn capacity_scenario_from_submission_to_roster() {
    let (service, store) = build_service();
    let admin = AdminId("principal-1".to_string());
    let event = service.create_event(draft(Some(2)), at(1, 8)).expect("event");

    let a = service
        .join(&event.id, &SchoolId("sch-a".to_string()), &form(&["s-a1"]), at(2, 9))
        .expect("join a");
    let b = service
        .join(
            &event.id,
            &SchoolId("sch-b".to_string()),
            &form(&["s-b1", "s-b2"]),
            at(2, 10),
        )
        .expect("join b");
    assert_eq!(b.accepted, 1, "grade 12 is not eligible");

    let a1 = a
        .outcome_for(&StudentId("s-a1".to_string()))
        .and_then(|outcome| outcome.request_id().cloned())
        .expect("a1 accepted");
    let b1 = b
        .outcome_for(&StudentId("s-b1".to_string()))
        .and_then(|outcome| outcome.request_id().cloned())
        .expect("b1 accepted");

    let decisions = service
        .approve(&event.id, &[a1, b1], &admin, at(3, 9))
        .expect("approve");
    assert_eq!(decisions.succeeded, 2);

    let c = service
        .join(&event.id, &SchoolId("sch-c".to_string()), &form(&["s-c1"]), at(4, 9))
        .expect("join c");
    let c1 = c
        .outcome_for(&StudentId("s-c1".to_string()))
        .and_then(|outcome| outcome.request_id().cloned())
        .expect("grade 09 normalizes to 9");

    let decisions = service
        .approve(&event.id, std::slice::from_ref(&c1), &admin, at(4, 10))
        .expect("approve c");
    assert!(matches!(
        decisions.outcome_for(&c1),
        Some(DecisionOutcome::Failed { .. })
    ));

    let view = service.manage_view(&event.id).expect("view");
    assert_eq!(view.capacity_info.filled, 2);
    assert_eq!(view.capacity_info.available, Some(0));
    assert_eq!(view.requests.get(ParticipationStatus::Pending).len(), 1);

    let late = service
        .join(&event.id, &SchoolId("sch-a".to_string()), &form(&["s-a2"]), at(21, 9))
        .expect("late join processed");
    assert_eq!(late.rejected, 1);

    let csv = String::from_utf8(service.export_roster_csv(&event.id).expect("csv")).expect("utf8");
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("Ada Park"));
    assert!(csv.contains("Ben Ortiz"));
    assert!(!csv.contains("Cy Novak"));

    let deletion = service.delete_event(&event.id).expect("delete");
    assert_eq!(deletion.removed_requests, 3);
    assert!(store
        .requests_for_event(&event.id)
        .expect("records")
        .is_empty());
}

fn http(method: &str, uri: &str, role: &str, actor: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ROLE_HEADER, role)
        .header(ACTOR_HEADER, actor);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json payload")
}

#[tokio::test]
async fn force_enroll_over_http_flags_bypassed_rules() {
    let (service, _) = build_service();
    let router = participation_router(Arc::new(service));

    let response = router
        .clone()
        .oneshot(http(
            "POST",
            "/events",
            "admin",
            "principal-1",
            Some(json!({
                "title": "Chess Invitational",
                "description": "Rapid format",
                "date": "2025-11-02",
                "eligibleGrades": ["Grade 9"],
                "maxParticipantsPerSchool": 1,
            })),
        ))
        .await
        .expect("create executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let event_id = json_body(response).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = router
        .clone()
        .oneshot(http(
            "POST",
            &format!("/events/{event_id}/force-enroll"),
            "admin",
            "principal-1",
            Some(json!({
                "schoolId": "sch-b",
                "studentIds": ["s-b1", "s-b2"],
                "contactPerson": "Coach Diaz",
                "contactPhone": "555-0142",
            })),
        ))
        .await
        .expect("force enroll executes");
    assert_eq!(response.status(), StatusCode::OK);
    let manifest = json_body(response).await;
    assert_eq!(manifest["accepted"], 2);
    assert_eq!(manifest["outcomes"][0]["outcome"], "force_enrolled");
    let b2_errors = manifest["outcomes"][1]["validationErrors"]
        .as_array()
        .expect("errors");
    assert_eq!(b2_errors.len(), 2, "grade and per-school limit: {b2_errors:?}");

    let response = router
        .oneshot(http(
            "GET",
            &format!("/events/{event_id}/manage"),
            "admin",
            "principal-1",
            None,
        ))
        .await
        .expect("manage executes");
    let view = json_body(response).await;
    assert_eq!(view["requests"]["APPROVED"].as_array().map(Vec::len), Some(2));
    assert_eq!(view["perSchoolBreakdown"][0]["overLimit"], true);
    assert_eq!(view["requests"]["APPROVED"][0]["forceEnrolled"], true);
}
