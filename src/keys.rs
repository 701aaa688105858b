//! Typed primary keys. Each level extends its parent, mirroring the
//! foreign-key chain recording -> processing task -> curation.

use rusqlite::Row;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub subject: String,
    pub session_datetime: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordingKey {
    pub subject: String,
    pub session_datetime: String,
    pub recording_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub recording: RecordingKey,
    pub paramset_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurationKey {
    pub task: TaskKey,
    pub curation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    pub curation: CurationKey,
    pub extraction_method: String,
}

/// Key handed to a populate stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Recording(RecordingKey),
    Task(TaskKey),
    Curation(CurationKey),
    Activity(ActivityKey),
}

impl RecordingKey {
    /// Read the three recording key columns starting at `offset`.
    pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            subject: row.get(offset)?,
            session_datetime: row.get(offset + 1)?,
            recording_id: row.get(offset + 2)?,
        })
    }

    pub fn session(&self) -> SessionKey {
        SessionKey {
            subject: self.subject.clone(),
            session_datetime: self.session_datetime.clone(),
        }
    }
}

impl TaskKey {
    pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            recording: RecordingKey::from_row(row, offset)?,
            paramset_id: row.get(offset + 3)?,
        })
    }
}

impl CurationKey {
    pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            task: TaskKey::from_row(row, offset)?,
            curation_id: row.get(offset + 4)?,
        })
    }
}

impl ActivityKey {
    pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            curation: CurationKey::from_row(row, offset)?,
            extraction_method: row.get(offset + 5)?,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject={} session_datetime={}", self.subject, self.session_datetime)
    }
}

impl fmt::Display for RecordingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject={} session_datetime={} recording_id={}",
            self.subject, self.session_datetime, self.recording_id
        )
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} paramset_id={}", self.recording, self.paramset_id)
    }
}

impl fmt::Display for CurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} curation_id={}", self.task, self.curation_id)
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} extraction_method={}", self.curation, self.extraction_method)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Recording(k) => k.fmt(f),
            Key::Task(k) => k.fmt(f),
            Key::Curation(k) => k.fmt(f),
            Key::Activity(k) => k.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_every_key_column() {
        let key = CurationKey {
            task: TaskKey {
                recording: RecordingKey {
                    subject: "subject1".into(),
                    session_datetime: "2021-01-01 00:00:01".into(),
                    recording_id: 0,
                },
                paramset_id: 3,
            },
            curation_id: 1,
        };
        let text = Key::Curation(key).to_string();
        assert_eq!(
            text,
            "subject=subject1 session_datetime=2021-01-01 00:00:01 recording_id=0 paramset_id=3 curation_id=1"
        );
    }
}
