use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{Event, ParticipationRequest, ParticipationStatus, SchoolId};

/// Event-level occupancy. Counts are raw; only `percentage` is clamped for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityInfo {
    pub max_participants: Option<u32>,
    pub filled: u32,
    pub pending: u32,
    /// `None` means unbounded. Negative once an event is over capacity.
    pub available: Option<i64>,
    pub percentage: Option<f32>,
    pub over_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolCapacity {
    pub school_id: SchoolId,
    pub filled: u32,
    pub pending: u32,
    pub limit: Option<u32>,
    pub available: Option<i64>,
    pub over_limit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub overall: CapacityInfo,
    pub per_school: Vec<SchoolCapacity>,
}

impl CapacityReport {
    pub fn school(&self, school_id: &SchoolId) -> Option<&SchoolCapacity> {
        self.per_school
            .iter()
            .find(|entry| &entry.school_id == school_id)
    }
}

/// Ceiling that one more filled seat would break.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityBreach {
    #[error("event capacity reached ({filled}/{limit} filled)")]
    Event { limit: u32, filled: u32 },
    #[error("school {school_id} reached its limit ({filled}/{limit} filled)")]
    School {
        school_id: SchoolId,
        limit: u32,
        filled: u32,
    },
}

#[derive(Default)]
struct Tally {
    filled: u32,
    pending: u32,
}

impl Tally {
    fn record(&mut self, status: ParticipationStatus) {
        if status.is_filled() {
            self.filled += 1;
        } else if status == ParticipationStatus::Pending {
            self.pending += 1;
        }
    }
}

fn available(limit: Option<u32>, filled: u32) -> Option<i64> {
    limit.map(|limit| i64::from(limit) - i64::from(filled))
}

/// Recompute occupancy from the live ledger. Records of other events are ignored.
pub fn evaluate(event: &Event, records: &[ParticipationRequest]) -> CapacityReport {
    let mut overall = Tally::default();
    let mut schools: BTreeMap<SchoolId, Tally> = BTreeMap::new();

    for record in records.iter().filter(|record| record.event_id == event.id) {
        let status = record.status();
        overall.record(status);
        schools
            .entry(record.school_id.clone())
            .or_default()
            .record(status);
    }

    let max = event.max_participants;
    let percentage = max.map(|limit| {
        let raw = if limit == 0 {
            100.0
        } else {
            overall.filled as f32 / limit as f32 * 100.0
        };
        raw.min(100.0)
    });

    let per_school_limit = event.max_participants_per_school;
    let per_school = schools
        .into_iter()
        .map(|(school_id, tally)| SchoolCapacity {
            school_id,
            filled: tally.filled,
            pending: tally.pending,
            limit: per_school_limit,
            available: available(per_school_limit, tally.filled),
            over_limit: per_school_limit.is_some_and(|limit| tally.filled > limit),
        })
        .collect();

    CapacityReport {
        overall: CapacityInfo {
            max_participants: max,
            filled: overall.filled,
            pending: overall.pending,
            available: available(max, overall.filled),
            percentage,
            over_capacity: max.is_some_and(|limit| overall.filled > limit),
        },
        per_school,
    }
}

/// Would admitting one more filled record for `school` stay within both ceilings?
pub fn check_admission(
    event: &Event,
    records: &[ParticipationRequest],
    school: &SchoolId,
) -> Result<(), CapacityBreach> {
    let report = evaluate(event, records);

    if let Some(limit) = event.max_participants {
        if report.overall.filled + 1 > limit {
            return Err(CapacityBreach::Event {
                limit,
                filled: report.overall.filled,
            });
        }
    }

    if let Some(limit) = event.max_participants_per_school {
        let filled = report.school(school).map_or(0, |entry| entry.filled);
        if filled + 1 > limit {
            return Err(CapacityBreach::School {
                school_id: school.clone(),
                limit,
                filled,
            });
        }
    }

    Ok(())
}
