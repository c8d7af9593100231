use crate::infra::InMemoryStore;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use eduhub::error::AppError;
use eduhub::workflows::participation::{
    AdminId, CapacityInfo, CsvStudentDirectory, EventDraft, LoggingNotifier, ParticipationForm,
    ParticipationManifest, ParticipationService, RequestId, SchoolId, StudentId,
};
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_DIRECTORY: &str = "student_id,name,grade,school_id,school_email\n\
    n-101,Nora Quinn,Grade 9,north-high,office@north.example\n\
    n-102,Omar Reyes,Grade 10,north-high,office@north.example\n\
    n-103,Pia Walsh,Grade 12,north-high,office@north.example\n\
    s-201,Sam Ito,9,south-high,\n\
    s-202,Tess Bauer,10,south-high,\n\
    e-301,Uma Cole,Grade 9,east-academy,front@east.example\n";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Global seat limit for the demo event.
    #[arg(long, default_value_t = 2)]
    pub(crate) capacity: u32,
    /// Optional per-school seat limit.
    #[arg(long)]
    pub(crate) per_school: Option<u32>,
    /// Simulated current date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Load students from a directory CSV instead of the built-in sample.
    #[arg(long)]
    pub(crate) student_directory: Option<PathBuf>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        capacity,
        per_school,
        today,
        student_directory,
    } = args;

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let directory = match student_directory {
        Some(path) => CsvStudentDirectory::from_path(path)?,
        None => CsvStudentDirectory::from_reader(DEMO_DIRECTORY.as_bytes())?,
    };

    let service = ParticipationService::new(
        Arc::new(InMemoryStore::default()),
        Arc::new(directory),
        Arc::new(LoggingNotifier),
    );
    let admin = AdminId("demo-admin".to_string());

    println!("School event participation demo ({today})");
    let event = service.create_event(
        EventDraft {
            title: "District STEM Showcase".to_string(),
            description: "Project exhibition for grades 9 and 10".to_string(),
            date: Some(today + chrono::Duration::days(21)),
            registration_deadline: Some(at(today + chrono::Duration::days(7), 23)),
            max_participants: Some(capacity),
            max_participants_per_school: per_school,
            eligible_grades: vec!["9".into(), "10".into()],
            ..EventDraft::default()
        },
        at(today, 8),
    )?;
    println!(
        "- Created {} '{}' with {} seats",
        event.id.0, event.title, capacity
    );

    let submissions = [
        ("north-high", vec!["n-101", "n-102", "n-103"], 9),
        ("south-high", vec!["s-201", "s-202"], 10),
        ("east-academy", vec!["e-301"], 11),
    ];
    let mut pending: Vec<RequestId> = Vec::new();
    for (school, students, hour) in submissions {
        let manifest = service.join(
            &event.id,
            &SchoolId(school.to_string()),
            &form(&students),
            at(today, hour),
        )?;
        render_join(&manifest);
        pending.extend(accepted_ids(&manifest, &students));
    }

    println!("\nApproving {} pending requests in one batch", pending.len());
    let decisions = service.approve(&event.id, &pending, &admin, at(today, 14))?;
    println!("- {}", decisions.summary);

    let view = service.manage_view(&event.id)?;
    render_capacity(&view.capacity_info);
    for school in &view.per_school_breakdown {
        println!(
            "  - {}: {} filled, {} pending{}",
            school.school_id.0,
            school.filled,
            school.pending,
            if school.over_limit { " (over limit)" } else { "" }
        );
    }

    let csv = service.export_roster_csv(&event.id)?;
    println!("\nRoster export");
    print!("{}", String::from_utf8_lossy(&csv));

    Ok(())
}

fn at(day: NaiveDate, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&day.and_time(time))
}

fn form(students: &[&str]) -> ParticipationForm {
    ParticipationForm {
        contact_person: "Demo Coordinator".to_string(),
        contact_phone: "555-0190".to_string(),
        notes: None,
        student_ids: students.iter().map(|id| StudentId(id.to_string())).collect(),
    }
}

fn accepted_ids(manifest: &ParticipationManifest, students: &[&str]) -> Vec<RequestId> {
    students
        .iter()
        .filter_map(|id| manifest.outcome_for(&StudentId(id.to_string())))
        .filter_map(|outcome| outcome.request_id().cloned())
        .collect()
}

fn render_join(manifest: &ParticipationManifest) {
    println!(
        "- {} submitted: {}",
        manifest.school_id.0, manifest.summary
    );
}

fn render_capacity(info: &CapacityInfo) {
    let limit = info
        .max_participants
        .map(|limit| limit.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    let available = info
        .available
        .map(|available| available.to_string())
        .unwrap_or_else(|| "unbounded".to_string());
    println!(
        "\nCapacity: {} of {} filled, {} pending, {} available",
        info.filled, limit, info.pending, available
    );
}
