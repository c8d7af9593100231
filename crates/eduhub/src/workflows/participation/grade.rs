use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::domain::Event;

/// Canonical grade level. Free-text labels ("9", "Grade 9", "09") collapse to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Grade(u8);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GradeParseError {
    #[error("grade label '{0}' contains no digits")]
    NoDigits(String),
    #[error("grade label '{0}' is out of range")]
    OutOfRange(String),
}

impl Grade {
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    pub const fn level(self) -> u8 {
        self.0
    }

    /// Strips every non-digit character and reads the remainder as a number.
    pub fn parse(raw: &str) -> Result<Self, GradeParseError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(GradeParseError::NoDigits(raw.to_string()));
        }

        digits
            .parse::<u8>()
            .map(Self)
            .map_err(|_| GradeParseError::OutOfRange(raw.to_string()))
    }
}

impl FromStr for Grade {
    type Err = GradeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Grade {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawGrade {
            Number(u64),
            Label(String),
        }

        match RawGrade::deserialize(deserializer)? {
            RawGrade::Number(value) => u8::try_from(value)
                .map(Grade)
                .map_err(|_| serde::de::Error::custom(format!("grade {value} is out of range"))),
            RawGrade::Label(label) => Grade::parse(&label).map_err(serde::de::Error::custom),
        }
    }
}

/// Grade label as submitted by a client, before it is checked. Accepts `9` or `"Grade 9"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GradeLabel(pub String);

impl From<&str> for GradeLabel {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for GradeLabel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLabel {
            Number(u64),
            Text(String),
        }

        Ok(match RawLabel::deserialize(deserializer)? {
            RawLabel::Number(value) => GradeLabel(value.to_string()),
            RawLabel::Text(text) => GradeLabel(text),
        })
    }
}

/// An empty eligibility set admits every grade, including unparseable ones.
pub fn is_eligible(event: &Event, grade: Option<Grade>) -> bool {
    if event.eligible_grades.is_empty() {
        return true;
    }

    grade.is_some_and(|grade| event.eligible_grades.contains(&grade))
}
