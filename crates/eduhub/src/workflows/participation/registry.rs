use std::collections::BTreeSet;
use std::sync::PoisonError;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::capacity;
use super::directory::StudentDirectory;
use super::domain::{Event, EventId, EventTarget};
use super::grade::{Grade, GradeLabel};
use super::notify::DecisionNotifier;
use super::repository::{EventRepository, ParticipationRepository};
use super::service::{next_event_id, ParticipationError, ParticipationService};
use super::validation::ValidationErrors;

/// Administrator input for a new event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: Option<NaiveDate>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub max_participants: Option<u32>,
    pub max_participants_per_school: Option<u32>,
    #[serde(default)]
    pub eligible_grades: Vec<GradeLabel>,
    #[serde(default)]
    pub target: EventTarget,
}

/// Partial update. For nullable fields an explicit `null` clears the value while an absent
/// field leaves it untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub registration_deadline: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_participants: Option<Option<u32>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_participants_per_school: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_grades: Option<Vec<GradeLabel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDeletion {
    pub event_id: EventId,
    pub removed_requests: usize,
}

fn check_limit(field: &'static str, value: Option<u32>, errors: &mut ValidationErrors) {
    if value == Some(0) {
        errors.push(field, "must be at least 1 when set");
    }
}

fn parse_grades(labels: &[GradeLabel], errors: &mut ValidationErrors) -> BTreeSet<Grade> {
    let mut grades = BTreeSet::new();
    for label in labels {
        match Grade::parse(&label.0) {
            Ok(grade) => {
                grades.insert(grade);
            }
            Err(err) => errors.push("eligibleGrades", err.to_string()),
        }
    }
    grades
}

fn check_target(target: &EventTarget, errors: &mut ValidationErrors) {
    if let EventTarget::Group { group_name, schools } = target {
        errors.require_text("target.groupName", group_name);
        if schools.is_empty() {
            errors.push("target.schools", "a group target needs at least one school");
        }
    }
}

impl<R, D, N> ParticipationService<R, D, N>
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    pub fn create_event(
        &self,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> Result<Event, ParticipationError> {
        let mut errors = ValidationErrors::new();
        errors.require_text("title", &draft.title);
        errors.require_text("description", &draft.description);
        if draft.date.is_none() {
            errors.push("date", "is required");
        }
        check_limit("maxParticipants", draft.max_participants, &mut errors);
        check_limit(
            "maxParticipantsPerSchool",
            draft.max_participants_per_school,
            &mut errors,
        );
        let eligible_grades = parse_grades(&draft.eligible_grades, &mut errors);
        check_target(&draft.target, &mut errors);

        let date = match draft.date {
            Some(date) if errors.is_empty() => date,
            _ => return Err(errors.into()),
        };

        let event = Event {
            id: next_event_id(),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            date,
            registration_deadline: draft.registration_deadline,
            max_participants: draft.max_participants,
            max_participants_per_school: draft.max_participants_per_school,
            eligible_grades,
            target: draft.target,
            archived: false,
            created_at: now,
        };

        let stored = self.store.insert_event(event)?;
        info!(event_id = %stored.id, title = %stored.title, "event created");
        Ok(stored)
    }

    /// Limit changes only govern future decisions; approvals above a lowered limit are kept.
    pub fn update_event(
        &self,
        id: &EventId,
        patch: EventPatch,
    ) -> Result<Event, ParticipationError> {
        let mut event = self.load_event(id)?;
        if event.archived {
            return Err(ParticipationError::EventArchived(id.clone()));
        }

        let mut errors = ValidationErrors::new();
        if let Some(title) = patch.title {
            errors.require_text("title", &title);
            event.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            errors.require_text("description", &description);
            event.description = description.trim().to_string();
        }
        if let Some(date) = patch.date {
            event.date = date;
        }
        if let Some(deadline) = patch.registration_deadline {
            event.registration_deadline = deadline;
        }
        if let Some(max) = patch.max_participants {
            check_limit("maxParticipants", max, &mut errors);
            event.max_participants = max;
        }
        if let Some(max) = patch.max_participants_per_school {
            check_limit("maxParticipantsPerSchool", max, &mut errors);
            event.max_participants_per_school = max;
        }
        if let Some(labels) = patch.eligible_grades {
            event.eligible_grades = parse_grades(&labels, &mut errors);
        }
        if let Some(target) = patch.target {
            check_target(&target, &mut errors);
            event.target = target;
        }
        errors.into_result()?;

        self.store.update_event(event.clone())?;

        let records = self.store.requests_for_event(&event.id)?;
        let report = capacity::evaluate(&event, &records);
        if report.overall.over_capacity || report.per_school.iter().any(|entry| entry.over_limit) {
            warn!(
                event_id = %event.id,
                filled = report.overall.filled,
                "event is over capacity after update; existing approvals are kept"
            );
        }
        info!(event_id = %event.id, "event updated");
        Ok(event)
    }

    /// Archiving is idempotent.
    pub fn archive_event(&self, id: &EventId) -> Result<Event, ParticipationError> {
        let mut event = self.load_event(id)?;
        if !event.archived {
            event.archived = true;
            self.store.update_event(event.clone())?;
            info!(event_id = %event.id, "event archived");
        }
        Ok(event)
    }

    /// Irreversible: removes the event and every participation record that references it.
    pub fn delete_event(&self, id: &EventId) -> Result<EventDeletion, ParticipationError> {
        let event = self.load_event(id)?;
        let lock = self.locks.handle(&event.id);
        let removed_requests = {
            let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let removed_requests = self.store.delete_requests_for_event(&event.id)?;
            self.store.delete_event(&event.id)?;
            self.locks.release(&event.id);
            removed_requests
        };
        info!(event_id = %event.id, removed_requests, "event deleted");
        Ok(EventDeletion {
            event_id: event.id,
            removed_requests,
        })
    }

    pub fn event(&self, id: &EventId) -> Result<Event, ParticipationError> {
        self.load_event(id)
    }

    pub fn events(&self) -> Result<Vec<Event>, ParticipationError> {
        let mut events = self.store.list_events()?;
        events.sort_by(|left, right| left.date.cmp(&right.date).then(left.id.cmp(&right.id)));
        Ok(events)
    }
}
