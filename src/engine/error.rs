use ulid::Ulid;

use crate::model::{Ms, ResourceKind};

/// A scheduling rule the candidate breaks. Never transient: resubmitting the
/// same request yields the same violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleViolation {
    InvalidInterval { start: Ms, end: Ms },
    RoomConflict { room: String, conflicting: Vec<Ulid> },
    LecturerConflict { lecturer: Ulid, conflicting: Vec<Ulid> },
    StudentConflict { student: Ulid, conflicting: Ulid },
    AlreadyEnrolled { student: Ulid, lecture: Ulid },
}

impl ScheduleViolation {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ScheduleViolation::InvalidInterval { .. } => "invalid_interval",
            ScheduleViolation::RoomConflict { .. } => "room_conflict",
            ScheduleViolation::LecturerConflict { .. } => "lecturer_conflict",
            ScheduleViolation::StudentConflict { .. } => "student_conflict",
            ScheduleViolation::AlreadyEnrolled { .. } => "already_enrolled",
        }
    }

    /// Resource dimension the violation was found on, if any.
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            ScheduleViolation::InvalidInterval { .. } => None,
            ScheduleViolation::RoomConflict { .. } => Some(ResourceKind::Room),
            ScheduleViolation::LecturerConflict { .. } => Some(ResourceKind::Lecturer),
            ScheduleViolation::StudentConflict { .. }
            | ScheduleViolation::AlreadyEnrolled { .. } => Some(ResourceKind::Student),
        }
    }
}

impl std::fmt::Display for ScheduleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleViolation::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end must be after start")
            }
            ScheduleViolation::RoomConflict { room, conflicting } => {
                write!(f, "room {room} is already booked by {conflicting:?}")
            }
            ScheduleViolation::LecturerConflict { lecturer, conflicting } => {
                write!(f, "lecturer {lecturer} is already teaching {conflicting:?}")
            }
            ScheduleViolation::StudentConflict { student, conflicting } => {
                write!(f, "student {student} is already enrolled in overlapping lecture {conflicting}")
            }
            ScheduleViolation::AlreadyEnrolled { student, lecture } => {
                write!(f, "student {student} is already enrolled in lecture {lecture}")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Violation(ScheduleViolation),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    NotEnrolled { student: Ulid, lecture: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn violation(&self) -> Option<&ScheduleViolation> {
        match self {
            EngineError::Violation(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ScheduleViolation> for EngineError {
    fn from(v: ScheduleViolation) -> Self {
        EngineError::Violation(v)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Violation(v) => write!(f, "schedule violation: {v}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotEnrolled { student, lecture } => {
                write!(f, "student {student} is not enrolled in lecture {lecture}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
