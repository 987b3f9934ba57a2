use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
///
/// A `Span` may hold `end <= start`; such a span is not a valid lecture time
/// and is rejected by the validator. `overlaps` assumes both sides are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    /// Saturates instead of overflowing on extreme spans.
    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Dimension along which double-booking is prevented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Room,
    Lecturer,
    Student,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Room => "room",
            ResourceKind::Lecturer => "lecturer",
            ResourceKind::Student => "student",
        }
    }
}

/// A concrete resource calendar: one room, one lecturer or one student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKey {
    Room(String),
    Lecturer(Ulid),
    Student(Ulid),
}

impl ResourceKey {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Room(_) => ResourceKind::Room,
            ResourceKey::Lecturer(_) => ResourceKind::Lecturer,
            ResourceKey::Student(_) => ResourceKind::Student,
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKey::Room(room) => write!(f, "room {room}"),
            ResourceKey::Lecturer(id) => write!(f, "lecturer {id}"),
            ResourceKey::Student(id) => write!(f, "student {id}"),
        }
    }
}

/// A proposed lecture schedule. Has no id: on update the lecture's own id is
/// passed separately so it is excluded from conflict checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureCandidate {
    pub span: Span,
    pub room: String,
    pub lecturer: Ulid,
}

impl LectureCandidate {
    pub fn new(span: Span, room: impl Into<String>, lecturer: Ulid) -> Self {
        Self {
            span,
            room: room.into(),
            lecturer,
        }
    }
}

/// A scheduled lecture occupying its span on a room, a lecturer and every
/// enrolled student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub title: Option<String>,
    pub span: Span,
    pub room: String,
    pub lecturer: Ulid,
    pub students: BTreeSet<Ulid>,
}

impl Booking {
    /// Every resource calendar this booking currently sits on.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys = Vec::with_capacity(2 + self.students.len());
        keys.push(ResourceKey::Room(self.room.clone()));
        keys.push(ResourceKey::Lecturer(self.lecturer));
        keys.extend(self.students.iter().map(|s| ResourceKey::Student(*s)));
        keys
    }

    pub fn is_enrolled(&self, student: &Ulid) -> bool {
        self.students.contains(student)
    }
}

/// Flat event enum. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LectureScheduled {
        id: Ulid,
        title: Option<String>,
        room: String,
        lecturer: Ulid,
        span: Span,
    },
    LectureRescheduled {
        id: Ulid,
        room: String,
        lecturer: Ulid,
        span: Span,
    },
    LectureCancelled {
        id: Ulid,
    },
    StudentEnrolled {
        lecture_id: Ulid,
        student: Ulid,
    },
    StudentWithdrawn {
        lecture_id: Ulid,
        student: Ulid,
    },
}

impl Event {
    pub fn lecture_id(&self) -> Ulid {
        match self {
            Event::LectureScheduled { id, .. }
            | Event::LectureRescheduled { id, .. }
            | Event::LectureCancelled { id } => *id,
            Event::StudentEnrolled { lecture_id, .. }
            | Event::StudentWithdrawn { lecture_id, .. } => *lecture_id,
        }
    }
}
