use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-student attendance state within one session.
///
/// `Unmarked` is the initial state only; the wire never accepts it as a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Unmarked,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Unmarked => "unmarked",
        }
    }

    /// Parse a mark set by the teacher. Returns `None` for anything that is
    /// not one of the three marked statuses.
    pub fn parse_mark(s: &str) -> Option<AttendanceStatus> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }

    /// Parse any stored status, including `unmarked`.
    pub fn parse_any(s: &str) -> Option<AttendanceStatus> {
        match s {
            "unmarked" => Some(AttendanceStatus::Unmarked),
            other => AttendanceStatus::parse_mark(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub unmarked: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.present + self.absent + self.late + self.unmarked
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("roster contains duplicate student id {0}")]
    InvalidRoster(String),
    #[error("no student with id {0} in this session")]
    UnknownStudent(String),
    #[error("session already submitted")]
    SessionClosed,
}

impl SessionError {
    /// Wire error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidRoster(_) => "invalid_roster",
            SessionError::UnknownStudent(_) => "unknown_student",
            SessionError::SessionClosed => "session_closed",
        }
    }
}

/// Finalized session state handed to the submission sink. Covers the whole
/// roster, unmarked students included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub class_id: String,
    pub date: String,
    pub entries: Vec<SubmissionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Every student is marked; hand the payload to the sink now.
    ReadyToSubmit(SubmissionPayload),
    /// Some students are still unmarked; the caller must confirm or cancel.
    NeedsConfirmation { unmarked: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Editing,
    Submitted,
}

/// One attendance-taking pass for one class on one date.
///
/// The roster keeps provider order for stable display. A date change is a new
/// session, never a mutation of an existing one. Dropping a session discards
/// its marks; nothing is persisted until the sink accepts a submission.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    class_id: String,
    class_name: String,
    date: String,
    roster: Vec<Student>,
    phase: SessionPhase,
}

impl AttendanceSession {
    /// Build a fresh session. Every status is forced to `Unmarked` regardless
    /// of what the roster carried; duplicate ids are a caller error.
    pub fn new(
        class_id: impl Into<String>,
        class_name: impl Into<String>,
        date: impl Into<String>,
        mut roster: Vec<Student>,
    ) -> Result<AttendanceSession, SessionError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(roster.len());
        for student in &roster {
            if !seen.insert(student.id.as_str()) {
                return Err(SessionError::InvalidRoster(student.id.clone()));
            }
        }
        for student in &mut roster {
            student.status = AttendanceStatus::Unmarked;
        }
        Ok(AttendanceSession {
            class_id: class_id.into(),
            class_name: class_name.into(),
            date: date.into(),
            roster,
            phase: SessionPhase::Editing,
        })
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    pub fn is_submitted(&self) -> bool {
        self.phase == SessionPhase::Submitted
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Editing => Ok(()),
            SessionPhase::Submitted => Err(SessionError::SessionClosed),
        }
    }

    /// Overwrite one student's status. Re-marking replaces the previous mark;
    /// there is no history.
    pub fn set_status(
        &mut self,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let student = self
            .roster
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or_else(|| SessionError::UnknownStudent(student_id.to_string()))?;
        student.status = status;
        Ok(())
    }

    /// Set every student to `Present`, overwriting prior Absent/Late marks.
    pub fn mark_all_present(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        for student in &mut self.roster {
            student.status = AttendanceStatus::Present;
        }
        Ok(())
    }

    /// Recomputed on demand; the four counts always sum to the roster length.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            present: 0,
            absent: 0,
            late: 0,
            unmarked: 0,
        };
        for student in &self.roster {
            match student.status {
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Late => counts.late += 1,
                AttendanceStatus::Unmarked => counts.unmarked += 1,
            }
        }
        counts
    }

    pub fn is_complete(&self) -> bool {
        self.counts().unmarked == 0
    }

    fn payload(&self) -> SubmissionPayload {
        SubmissionPayload {
            class_id: self.class_id.clone(),
            date: self.date.clone(),
            entries: self
                .roster
                .iter()
                .map(|s| SubmissionEntry {
                    student_id: s.id.clone(),
                    status: s.status,
                })
                .collect(),
        }
    }

    /// First half of the submit gate: when complete, the payload goes to the
    /// sink immediately; otherwise the caller must confirm or cancel.
    pub fn request_submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.ensure_open()?;
        let unmarked = self.counts().unmarked;
        if unmarked == 0 {
            Ok(SubmitOutcome::ReadyToSubmit(self.payload()))
        } else {
            Ok(SubmitOutcome::NeedsConfirmation { unmarked })
        }
    }

    /// Yield the payload regardless of completeness. The session stays in
    /// editing until `mark_submitted`; a sink failure leaves it retryable.
    pub fn confirm_submit(&self) -> Result<SubmissionPayload, SessionError> {
        self.ensure_open()?;
        Ok(self.payload())
    }

    /// Back out of an unconfirmed submit. No state changes.
    pub fn cancel_submit(&self) -> Result<(), SessionError> {
        self.ensure_open()
    }

    /// Terminal transition, applied only after the sink accepted the payload.
    /// Every mutation afterwards fails with `SessionClosed`.
    pub fn mark_submitted(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.phase = SessionPhase::Submitted;
        Ok(())
    }
}
