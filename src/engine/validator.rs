//! Schedule validation.
//!
//! Checks run in a fixed order and stop at the first violation:
//! interval → room → lecturer for lecture schedules, and
//! already-enrolled → student overlap for enrollments.
//!
//! The validator owns nothing but a handle to the store. It gives no
//! atomicity between "check" and "commit"; `Engine` provides that by holding
//! the resource locks around both.

use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflicts, validate_span};
use super::store::BookingStore;
use super::{EngineError, ScheduleViolation};

pub struct ScheduleValidator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for ScheduleValidator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: BookingStore + ?Sized> ScheduleValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn find_conflicts(
        &self,
        candidate: &Span,
        key: &ResourceKey,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        find_conflicts(self.store.as_ref(), candidate, key, exclude).await
    }

    /// Validate a new or changed lecture schedule. Pass the lecture's own id
    /// as `exclude` when rescheduling.
    pub async fn validate_lecture_schedule(
        &self,
        candidate: &LectureCandidate,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_span(&candidate.span)?;

        let room_key = ResourceKey::Room(candidate.room.clone());
        let clashes = self.find_conflicts(&candidate.span, &room_key, exclude).await?;
        if !clashes.is_empty() {
            return Err(ScheduleViolation::RoomConflict {
                room: candidate.room.clone(),
                conflicting: clashes.iter().map(|b| b.id).collect(),
            }
            .into());
        }

        let lecturer_key = ResourceKey::Lecturer(candidate.lecturer);
        let clashes = self.find_conflicts(&candidate.span, &lecturer_key, exclude).await?;
        if !clashes.is_empty() {
            return Err(ScheduleViolation::LecturerConflict {
                lecturer: candidate.lecturer,
                conflicting: clashes.iter().map(|b| b.id).collect(),
            }
            .into());
        }

        Ok(())
    }

    /// Validate enrolling `student` into `lecture` against the student's
    /// current calendar.
    pub async fn validate_student_enrollment(
        &self,
        student: Ulid,
        lecture: &Booking,
    ) -> Result<(), EngineError> {
        if lecture.is_enrolled(&student) {
            return Err(ScheduleViolation::AlreadyEnrolled {
                student,
                lecture: lecture.id,
            }
            .into());
        }

        let key = ResourceKey::Student(student);
        let clashes = self.find_conflicts(&lecture.span, &key, Some(lecture.id)).await?;
        if let Some(clash) = clashes.first() {
            return Err(ScheduleViolation::StudentConflict {
                student,
                conflicting: clash.id,
            }
            .into());
        }

        Ok(())
    }

    /// A lecture moving to `span` moves on every enrolled student's calendar
    /// too. Students are checked in ascending id order.
    pub async fn validate_enrolled_students<'a>(
        &self,
        students: impl IntoIterator<Item = &'a Ulid>,
        span: &Span,
        lecture_id: Ulid,
    ) -> Result<(), EngineError> {
        for student in students {
            let key = ResourceKey::Student(*student);
            let clashes = self.find_conflicts(span, &key, Some(lecture_id)).await?;
            if let Some(clash) = clashes.first() {
                return Err(ScheduleViolation::StudentConflict {
                    student: *student,
                    conflicting: clash.id,
                }
                .into());
            }
        }
        Ok(())
    }
}
