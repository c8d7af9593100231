use super::common::*;

use crate::workflows::participation::{
    write_roster_csv, AdminId, EventDraft, ParticipationError, ParticipationStatus,
};

fn admin() -> AdminId {
    AdminId("admin-1".to_string())
}

#[test]
fn manage_view_groups_every_status() {
    let (service, _, _) = build_service();
    let event = service
        .create_event(
            EventDraft {
                max_participants: Some(4),
                max_participants_per_school: Some(2),
                ..draft()
            },
            ts(1, 8),
        )
        .expect("event");
    let a = service
        .join(&event.id, &school("sch-a"), &form(&["a1", "a2", "a3"]), ts(2, 9))
        .expect("join a");
    let b = service
        .join(&event.id, &school("sch-b"), &form(&["b1", "b2"]), ts(2, 10))
        .expect("join b");

    service
        .approve(
            &event.id,
            &[request_id(&a, "a1"), request_id(&b, "b1")],
            &admin(),
            ts(3, 9),
        )
        .expect("approve");
    service
        .enroll(&event.id, &[request_id(&b, "b1")], &admin(), ts(4, 9))
        .expect("enroll");
    service
        .reject(&event.id, &[request_id(&a, "a2")], "duplicate", &admin(), ts(3, 9))
        .expect("reject");
    service
        .edit(&event.id, &school("sch-b"), &form(&["b1"]), ts(3, 12))
        .expect("edit drops b2");

    let view = service.manage_view(&event.id).expect("view");

    assert_eq!(view.requests.total(), 5);
    assert_eq!(view.requests.get(ParticipationStatus::Pending).len(), 1);
    assert_eq!(view.requests.get(ParticipationStatus::Approved).len(), 1);
    assert_eq!(view.requests.get(ParticipationStatus::Rejected).len(), 1);
    assert_eq!(view.requests.get(ParticipationStatus::Withdrawn).len(), 1);
    assert_eq!(view.requests.get(ParticipationStatus::Enrolled).len(), 1);

    let rejected = &view.requests.get(ParticipationStatus::Rejected)[0];
    assert_eq!(rejected.student_name, "Ari Moss");
    assert_eq!(rejected.rejection_reason.as_deref(), Some("duplicate"));
    assert_eq!(rejected.decided_by, Some(admin()));

    assert_eq!(view.capacity_info.filled, 2);
    assert_eq!(view.capacity_info.pending, 1);
    assert_eq!(view.capacity_info.available, Some(2));
    assert_eq!(view.per_school_breakdown.len(), 2);

    let value = serde_json::to_value(&view).expect("serializes");
    for bucket in ["PENDING", "APPROVED", "REJECTED", "WITHDRAWN", "ENROLLED"] {
        assert!(value["requests"][bucket].is_array(), "missing {bucket}");
    }
    assert_eq!(value["capacityInfo"]["maxParticipants"], 4);
    assert_eq!(value["perSchoolBreakdown"][0]["schoolId"], "sch-a");
}

#[test]
fn roster_contains_only_filled_seats() {
    let (service, _, _) = build_service();
    let event = service.create_event(draft(), ts(1, 8)).expect("event");
    let a = service
        .join(&event.id, &school("sch-a"), &form(&["a1", "a2"]), ts(2, 9))
        .expect("join a");
    let b = service
        .join(&event.id, &school("sch-b"), &form(&["b1"]), ts(2, 9))
        .expect("join b");
    service
        .approve(
            &event.id,
            &[request_id(&a, "a1"), request_id(&b, "b1")],
            &admin(),
            ts(3, 9),
        )
        .expect("approve");
    service
        .enroll(&event.id, &[request_id(&b, "b1")], &admin(), ts(4, 9))
        .expect("enroll");

    let roster = service.roster(&event.id).expect("roster");

    let names: Vec<&str> = roster.iter().map(|entry| entry.student_name.as_str()).collect();
    assert_eq!(names, vec!["Ada Park", "Ben Ortiz"]);
    assert_eq!(roster[1].status, ParticipationStatus::Enrolled);
    assert_eq!(roster[1].decided_at, Some(ts(4, 9)));
}

#[test]
fn csv_export_has_header_and_one_row_per_seat() {
    let (service, _, _) = build_service();
    let event = service.create_event(draft(), ts(1, 8)).expect("event");
    let a = service
        .join(&event.id, &school("sch-a"), &form(&["a1", "a2"]), ts(2, 9))
        .expect("join");
    service
        .approve(&event.id, &[request_id(&a, "a1")], &admin(), ts(3, 9))
        .expect("approve");

    let bytes = service.export_roster_csv(&event.id).expect("csv");
    let text = String::from_utf8(bytes).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("request_id,student_id,student_name,grade,school_id,status"));
    assert!(lines[1].contains("Ada Park"));
    assert!(lines[1].contains("APPROVED"));
    assert!(lines[1].contains("Ms. Rivera"));
}

#[test]
fn csv_writer_quotes_embedded_commas() {
    let (service, _, _) = build_service();
    let event = service.create_event(draft(), ts(1, 8)).expect("event");
    let mut contact = form(&["a1"]);
    contact.contact_person = "Rivera, M.".to_string();
    let a = service
        .join(&event.id, &school("sch-a"), &contact, ts(2, 9))
        .expect("join");
    service
        .approve(&event.id, &[request_id(&a, "a1")], &admin(), ts(3, 9))
        .expect("approve");

    let roster = service.roster(&event.id).expect("roster");
    let bytes = write_roster_csv(Vec::new(), &roster).expect("csv");

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let record = reader
        .records()
        .next()
        .expect("one row")
        .expect("valid row");
    assert_eq!(record.get(8), Some("Rivera, M."));
}

#[test]
fn views_of_unknown_events_are_not_found() {
    let (service, _, _) = build_service();
    let missing = crate::workflows::participation::EventId("evt-gone".to_string());

    assert!(matches!(
        service.manage_view(&missing),
        Err(ParticipationError::EventNotFound(_))
    ));
    assert!(matches!(
        service.export_roster_csv(&missing),
        Err(ParticipationError::EventNotFound(_))
    ));
}

#[test]
fn empty_roster_still_exports_header() {
    let (service, _, _) = build_service();
    let event = service.create_event(draft(), ts(1, 8)).expect("event");

    let bytes = service.export_roster_csv(&event.id).expect("csv");
    let text = String::from_utf8(bytes).expect("utf8");

    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("request_id,"));
}

#[test]
fn csv_export_carries_school_notes_and_bypassed_rules_separately() {
    let (service, _, _) = build_service();
    let event = service
        .create_event(
            EventDraft {
                eligible_grades: vec!["9".into()],
                ..draft()
            },
            ts(1, 8),
        )
        .expect("event");
    let mut with_notes = form(&["a1"]);
    with_notes.notes = Some("vegetarian lunch".to_string());
    let joined = service
        .join(&event.id, &school("sch-a"), &with_notes, ts(2, 9))
        .expect("join");
    service
        .approve(&event.id, &[request_id(&joined, "a1")], &admin(), ts(3, 9))
        .expect("approve");
    let mut forced = with_notes;
    forced.student_ids = vec![student("a4")];
    service
        .force_enroll(
            &event.id,
            &crate::workflows::participation::ForceEnrollForm {
                school_id: school("sch-a"),
                participation: forced,
            },
            &admin(),
            ts(3, 11),
        )
        .expect("force enroll a4");

    let bytes = service.export_roster_csv(&event.id).expect("csv");
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers = reader.headers().expect("header row").clone();
    assert_eq!(headers.get(11), Some("notes"));
    assert_eq!(headers.get(12), Some("validation_errors"));

    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("valid rows");
    assert_eq!(rows.len(), 2);
    let ada = rows.iter().find(|row| row.get(1) == Some("a1")).expect("a1 row");
    assert_eq!(ada.get(11), Some("vegetarian lunch"));
    assert_eq!(ada.get(12), Some(""));
    let avery = rows.iter().find(|row| row.get(1) == Some("a4")).expect("a4 row");
    assert_eq!(avery.get(10), Some("true"));
    assert_eq!(avery.get(11), Some("vegetarian lunch"));
    assert!(avery.get(12).is_some_and(|errors| errors.contains("not eligible")));
}
