use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::capacity::{self, CapacityInfo, SchoolCapacity};
use super::directory::StudentDirectory;
use super::domain::{
    AdminId, ContactDetails, Event, EventId, ParticipationRequest, ParticipationState,
    ParticipationStatus, RequestId, SchoolId, StudentId,
};
use super::notify::DecisionNotifier;
use super::repository::{EventRepository, ParticipationRepository};
use super::service::{ParticipationError, ParticipationService};

/// Ledger record joined with the directory view of its student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub request_id: RequestId,
    pub student_id: StudentId,
    pub student_name: String,
    pub grade: String,
    pub school_id: SchoolId,
    pub status: ParticipationStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<AdminId>,
    pub rejection_reason: Option<String>,
    pub contact: ContactDetails,
    pub force_enrolled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusBuckets {
    #[serde(rename = "PENDING")]
    pub pending: Vec<RosterEntry>,
    #[serde(rename = "APPROVED")]
    pub approved: Vec<RosterEntry>,
    #[serde(rename = "REJECTED")]
    pub rejected: Vec<RosterEntry>,
    #[serde(rename = "WITHDRAWN")]
    pub withdrawn: Vec<RosterEntry>,
    #[serde(rename = "ENROLLED")]
    pub enrolled: Vec<RosterEntry>,
}

impl StatusBuckets {
    fn bucket_mut(&mut self, status: ParticipationStatus) -> &mut Vec<RosterEntry> {
        match status {
            ParticipationStatus::Pending => &mut self.pending,
            ParticipationStatus::Approved => &mut self.approved,
            ParticipationStatus::Rejected => &mut self.rejected,
            ParticipationStatus::Withdrawn => &mut self.withdrawn,
            ParticipationStatus::Enrolled => &mut self.enrolled,
        }
    }

    pub fn get(&self, status: ParticipationStatus) -> &[RosterEntry] {
        match status {
            ParticipationStatus::Pending => &self.pending,
            ParticipationStatus::Approved => &self.approved,
            ParticipationStatus::Rejected => &self.rejected,
            ParticipationStatus::Withdrawn => &self.withdrawn,
            ParticipationStatus::Enrolled => &self.enrolled,
        }
    }

    pub fn total(&self) -> usize {
        ParticipationStatus::ordered()
            .into_iter()
            .map(|status| self.get(status).len())
            .sum()
    }
}

/// Administrator view for `GET /events/{id}/manage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageView {
    pub event: Event,
    pub requests: StatusBuckets,
    pub capacity_info: CapacityInfo,
    pub per_school_breakdown: Vec<SchoolCapacity>,
}

#[derive(Debug, Serialize)]
struct RosterRow<'a> {
    request_id: &'a str,
    student_id: &'a str,
    student_name: &'a str,
    grade: &'a str,
    school_id: &'a str,
    status: &'static str,
    requested_at: String,
    decided_at: String,
    contact_person: &'a str,
    contact_phone: &'a str,
    force_enrolled: bool,
    notes: &'a str,
    validation_errors: String,
}

impl<'a> From<&'a RosterEntry> for RosterRow<'a> {
    fn from(entry: &'a RosterEntry) -> Self {
        Self {
            request_id: &entry.request_id.0,
            student_id: &entry.student_id.0,
            student_name: &entry.student_name,
            grade: &entry.grade,
            school_id: &entry.school_id.0,
            status: entry.status.label(),
            requested_at: entry.requested_at.to_rfc3339(),
            decided_at: entry
                .decided_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
            contact_person: &entry.contact.contact_person,
            contact_phone: &entry.contact.contact_phone,
            force_enrolled: entry.force_enrolled,
            notes: entry.contact.notes.as_deref().unwrap_or_default(),
            validation_errors: entry.validation_errors.join("; "),
        }
    }
}

const ROSTER_HEADER: [&str; 13] = [
    "request_id",
    "student_id",
    "student_name",
    "grade",
    "school_id",
    "status",
    "requested_at",
    "decided_at",
    "contact_person",
    "contact_phone",
    "force_enrolled",
    "notes",
    "validation_errors",
];

/// Write entries as CSV in the order given. The header row is written even for an empty roster.
pub fn write_roster_csv<W: Write>(
    writer: W,
    entries: &[RosterEntry],
) -> Result<W, csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(ROSTER_HEADER)?;
    for entry in entries {
        csv_writer.serialize(RosterRow::from(entry))?;
    }
    csv_writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

fn decision_metadata(state: &ParticipationState) -> (Option<AdminId>, Option<String>) {
    match state {
        ParticipationState::Approved { by, .. } => (Some(by.clone()), None),
        ParticipationState::Rejected { by, reason, .. } => (Some(by.clone()), Some(reason.clone())),
        ParticipationState::Enrolled { approved_by, .. } => (Some(approved_by.clone()), None),
        ParticipationState::Pending | ParticipationState::Withdrawn { .. } => (None, None),
    }
}

fn sort_entries(entries: &mut [RosterEntry]) {
    entries.sort_by(|left, right| {
        left.school_id
            .cmp(&right.school_id)
            .then_with(|| left.student_name.cmp(&right.student_name))
            .then_with(|| left.request_id.cmp(&right.request_id))
    });
}

impl<R, D, N> ParticipationService<R, D, N>
where
    R: EventRepository + ParticipationRepository + 'static,
    D: StudentDirectory + 'static,
    N: DecisionNotifier + 'static,
{
    pub fn manage_view(&self, event_id: &EventId) -> Result<ManageView, ParticipationError> {
        let event = self.load_event(event_id)?;
        let records = self.store.requests_for_event(&event.id)?;
        let report = capacity::evaluate(&event, &records);

        let mut requests = StatusBuckets::default();
        for record in &records {
            let entry = self.roster_entry(record)?;
            requests.bucket_mut(entry.status).push(entry);
        }
        for status in ParticipationStatus::ordered() {
            sort_entries(requests.bucket_mut(status));
        }

        Ok(ManageView {
            event,
            requests,
            capacity_info: report.overall,
            per_school_breakdown: report.per_school,
        })
    }

    /// APPROVED and ENROLLED participants, grouped by school.
    pub fn roster(&self, event_id: &EventId) -> Result<Vec<RosterEntry>, ParticipationError> {
        let event = self.load_event(event_id)?;
        let mut entries = self
            .store
            .requests_for_event(&event.id)?
            .iter()
            .filter(|record| record.status().is_filled())
            .map(|record| self.roster_entry(record))
            .collect::<Result<Vec<_>, _>>()?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub fn export_roster_csv(&self, event_id: &EventId) -> Result<Vec<u8>, ParticipationError> {
        let entries = self.roster(event_id)?;
        Ok(write_roster_csv(Vec::new(), &entries)?)
    }

    fn roster_entry(&self, record: &ParticipationRequest) -> Result<RosterEntry, ParticipationError> {
        let (student_name, grade) = match self.directory.student(&record.student_id)? {
            Some(student) => (student.name, student.grade_label),
            None => (record.student_id.0.clone(), String::new()),
        };
        let (decided_by, rejection_reason) = decision_metadata(&record.state);

        Ok(RosterEntry {
            request_id: record.id.clone(),
            student_id: record.student_id.clone(),
            student_name,
            grade,
            school_id: record.school_id.clone(),
            status: record.status(),
            requested_at: record.requested_at,
            decided_at: record.state.decided_at(),
            decided_by,
            rejection_reason,
            contact: record.contact.clone(),
            force_enrolled: record.force_enrolled,
            validation_errors: record.validation_errors.clone(),
        })
    }
}
