use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::domain::{SchoolId, StudentId};
use super::grade::Grade;

/// Read-only view of a student as published by the wider school system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: StudentId,
    pub name: String,
    /// Label exactly as the directory stores it, kept for display.
    pub grade_label: String,
    /// Parsed once here; `None` when the label carries no usable number.
    pub grade: Option<Grade>,
    pub school_id: SchoolId,
}

impl StudentRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        grade_label: impl Into<String>,
        school_id: impl Into<String>,
    ) -> Self {
        let grade_label = grade_label.into();
        let grade = Grade::parse(&grade_label).ok();
        Self {
            id: StudentId(id.into()),
            name: name.into(),
            grade_label,
            grade,
            school_id: SchoolId(school_id.into()),
        }
    }
}

/// Student lookups consumed by the ledger and the roster projection.
pub trait StudentDirectory: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, DirectoryError>;
    fn school_contact_email(&self, school_id: &SchoolId) -> Result<Option<String>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("student directory unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read student directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid student directory data: {0}")]
    Csv(#[from] csv::Error),
}

/// Directory snapshot loaded from a CSV export (`student_id,name,grade,school_id,school_email`).
#[derive(Debug, Default, Clone)]
pub struct CsvStudentDirectory {
    students: HashMap<StudentId, StudentRecord>,
    school_emails: HashMap<SchoolId, String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryRow {
    student_id: String,
    name: String,
    grade: String,
    school_id: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    school_email: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

impl CsvStudentDirectory {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DirectoryError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DirectoryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut directory = Self::default();

        for row in csv_reader.deserialize::<DirectoryRow>() {
            let row = row?;
            if let Some(email) = row.school_email {
                directory
                    .school_emails
                    .entry(SchoolId(row.school_id.clone()))
                    .or_insert(email);
            }
            directory.insert(StudentRecord::new(
                row.student_id,
                row.name,
                row.grade,
                row.school_id,
            ));
        }

        Ok(directory)
    }

    pub fn insert(&mut self, record: StudentRecord) {
        self.students.insert(record.id.clone(), record);
    }

    pub fn set_school_email(&mut self, school_id: SchoolId, email: impl Into<String>) {
        self.school_emails.insert(school_id, email.into());
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

impl StudentDirectory for CsvStudentDirectory {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, DirectoryError> {
        Ok(self.students.get(id).cloned())
    }

    fn school_contact_email(&self, school_id: &SchoolId) -> Result<Option<String>, DirectoryError> {
        Ok(self.school_emails.get(school_id).cloned())
    }
}
