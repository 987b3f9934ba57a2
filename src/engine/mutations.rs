use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_span;
use super::{observe, Engine, EngineError, LockKey, ScheduleViolation, WalCommand};

fn validate_fields(title: Option<&str>, room: &str) -> Result<(), EngineError> {
    if title.is_some_and(|t| t.len() > MAX_TITLE_LEN) {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if room.len() > MAX_ROOM_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    Ok(())
}

fn lock_keys(keys: impl IntoIterator<Item = ResourceKey>) -> Vec<LockKey> {
    keys.into_iter().map(LockKey::from).collect()
}

/// Lectures scheduled together in one batch.
pub type LectureBatch = Vec<(Ulid, Option<String>, LectureCandidate)>;

impl Engine {
    /// Schedule a new lecture. Rejected if its span is malformed, or if the
    /// room or the lecturer is already booked for any part of it.
    pub async fn schedule_lecture(
        &self,
        id: Ulid,
        title: Option<String>,
        candidate: LectureCandidate,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.schedule_lecture_locked(id, title, candidate).await;
        observe("schedule_lecture", started, &result);
        result
    }

    async fn schedule_lecture_locked(
        &self,
        id: Ulid,
        title: Option<String>,
        candidate: LectureCandidate,
    ) -> Result<(), EngineError> {
        validate_span(&candidate.span)?;
        validate_fields(title.as_deref(), &candidate.room)?;

        let room = ResourceKey::Room(candidate.room.clone());
        let lecturer = ResourceKey::Lecturer(candidate.lecturer);
        let mut keys = vec![LockKey::Lecture(id)];
        keys.extend(lock_keys([room.clone(), lecturer.clone()]));
        let locks = self.lock(keys).await;

        if self.store().contains(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.validator().validate_lecture_schedule(&candidate, None).await?;

        let event = Event::LectureScheduled {
            id,
            title,
            room: candidate.room,
            lecturer: candidate.lecturer,
            span: candidate.span,
        };
        self.commit(vec![(event, vec![room.clone(), lecturer])], locks).await?;
        info!(
            "scheduled lecture {id} in {room} [{}, {})",
            candidate.span.start, candidate.span.end
        );
        Ok(())
    }

    /// Move a lecture to a new time, room or lecturer. The lecture never
    /// conflicts with its own current slot; every enrolled student must be
    /// free at the new time.
    pub async fn reschedule_lecture(
        &self,
        id: Ulid,
        candidate: LectureCandidate,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.reschedule_lecture_locked(id, candidate).await;
        observe("reschedule_lecture", started, &result);
        result
    }

    async fn reschedule_lecture_locked(
        &self,
        id: Ulid,
        candidate: LectureCandidate,
    ) -> Result<(), EngineError> {
        validate_span(&candidate.span)?;
        validate_fields(None, &candidate.room)?;

        let new_room = ResourceKey::Room(candidate.room.clone());
        let new_lecturer = ResourceKey::Lecturer(candidate.lecturer);

        loop {
            // The lock set depends on where the lecture sits now, so read it,
            // lock, and re-read. Retry if it moved or gained students in between.
            let seen = self.store().get_booking(&id).ok_or(EngineError::NotFound(id))?;
            let mut keys = vec![LockKey::Lecture(id)];
            keys.extend(lock_keys(seen.resource_keys()));
            keys.extend(lock_keys([new_room.clone(), new_lecturer.clone()]));
            let locks = self.lock(keys).await;

            let current = self.store().get_booking(&id).ok_or(EngineError::NotFound(id))?;
            let needed = lock_keys(current.resource_keys());
            if !locks.covers_all(&needed) {
                tracing::debug!("lecture {id} changed while locking, retrying reschedule");
                continue;
            }

            self.validator()
                .validate_lecture_schedule(&candidate, Some(id))
                .await?;
            self.validator()
                .validate_enrolled_students(&current.students, &candidate.span, id)
                .await?;

            let mut affected = current.resource_keys();
            affected.extend([new_room.clone(), new_lecturer.clone()]);
            affected.sort();
            affected.dedup();

            let event = Event::LectureRescheduled {
                id,
                room: candidate.room.clone(),
                lecturer: candidate.lecturer,
                span: candidate.span,
            };
            self.commit(vec![(event, affected)], locks).await?;
            info!(
                "rescheduled lecture {id} to room {} [{}, {})",
                candidate.room, candidate.span.start, candidate.span.end
            );
            return Ok(());
        }
    }

    /// Cancel a lecture, freeing its room, lecturer and students. Returns the
    /// lecture as it was.
    pub async fn cancel_lecture(&self, id: Ulid) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.cancel_lecture_locked(id).await;
        observe("cancel_lecture", started, &result);
        result
    }

    async fn cancel_lecture_locked(&self, id: Ulid) -> Result<Booking, EngineError> {
        let locks = self.lock(vec![LockKey::Lecture(id)]).await;
        let booking = self.store().get_booking(&id).ok_or(EngineError::NotFound(id))?;
        let event = Event::LectureCancelled { id };
        self.commit(vec![(event, booking.resource_keys())], locks).await?;
        info!("cancelled lecture {id} ({} students)", booking.students.len());
        Ok(booking)
    }

    /// Enroll a student, provided they are not already enrolled and have no
    /// overlapping lecture.
    pub async fn enroll_student(&self, student: Ulid, lecture_id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.enroll_student_locked(student, lecture_id).await;
        observe("enroll_student", started, &result);
        result
    }

    async fn enroll_student_locked(&self, student: Ulid, lecture_id: Ulid) -> Result<(), EngineError> {
        let student_key = ResourceKey::Student(student);
        let mut keys = vec![LockKey::Lecture(lecture_id)];
        keys.extend(lock_keys([student_key.clone()]));
        let locks = self.lock(keys).await;

        let lecture = self
            .store()
            .get_booking(&lecture_id)
            .ok_or(EngineError::NotFound(lecture_id))?;
        if lecture.students.len() >= MAX_STUDENTS_PER_LECTURE && !lecture.is_enrolled(&student) {
            return Err(EngineError::LimitExceeded("too many students in lecture"));
        }
        self.validator()
            .validate_student_enrollment(student, &lecture)
            .await?;

        let event = Event::StudentEnrolled { lecture_id, student };
        let mut affected = lecture.resource_keys();
        affected.push(student_key);
        self.commit(vec![(event, affected)], locks).await?;
        info!("enrolled student {student} in lecture {lecture_id}");
        Ok(())
    }

    /// Withdraw a student from a lecture. No schedule check is needed.
    pub async fn withdraw_student(&self, student: Ulid, lecture_id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.withdraw_student_locked(student, lecture_id).await;
        observe("withdraw_student", started, &result);
        result
    }

    async fn withdraw_student_locked(&self, student: Ulid, lecture_id: Ulid) -> Result<(), EngineError> {
        let mut keys = vec![LockKey::Lecture(lecture_id)];
        keys.extend(lock_keys([ResourceKey::Student(student)]));
        let locks = self.lock(keys).await;

        let lecture = self
            .store()
            .get_booking(&lecture_id)
            .ok_or(EngineError::NotFound(lecture_id))?;
        if !lecture.is_enrolled(&student) {
            return Err(EngineError::NotEnrolled {
                student,
                lecture: lecture_id,
            });
        }

        let event = Event::StudentWithdrawn { lecture_id, student };
        self.commit(vec![(event, lecture.resource_keys())], locks).await?;
        info!("withdrew student {student} from lecture {lecture_id}");
        Ok(())
    }

    /// Schedule several lectures at once. All-or-nothing: if any lecture
    /// conflicts with the store or with another lecture in the batch, none
    /// are committed, and the accepted batch is written as one WAL append.
    pub async fn batch_schedule(&self, lectures: LectureBatch) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.batch_schedule_locked(lectures).await;
        observe("batch_schedule", started, &result);
        result
    }

    async fn batch_schedule_locked(&self, lectures: LectureBatch) -> Result<(), EngineError> {
        if lectures.is_empty() {
            return Ok(());
        }
        if lectures.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut ids = HashSet::with_capacity(lectures.len());
        for (id, title, candidate) in &lectures {
            validate_span(&candidate.span)?;
            validate_fields(title.as_deref(), &candidate.room)?;
            if !ids.insert(*id) {
                return Err(EngineError::AlreadyExists(*id));
            }
        }

        let mut keys = Vec::with_capacity(lectures.len() * 3);
        for (id, _, candidate) in &lectures {
            keys.push(LockKey::Lecture(*id));
            keys.push(ResourceKey::Room(candidate.room.clone()).into());
            keys.push(ResourceKey::Lecturer(candidate.lecturer).into());
        }
        let locks = self.lock(keys).await;

        // Phase 1: validate every lecture against the store and the lectures
        // before it in the batch, room first, then lecturer.
        for (i, (id, _, candidate)) in lectures.iter().enumerate() {
            if self.store().contains(id) {
                return Err(EngineError::AlreadyExists(*id));
            }
            let earlier: Vec<&(Ulid, Option<String>, LectureCandidate)> = lectures[..i]
                .iter()
                .filter(|(_, _, prev)| prev.span.overlaps(&candidate.span))
                .collect();

            let room_key = ResourceKey::Room(candidate.room.clone());
            let mut conflicting: Vec<Ulid> = self
                .validator()
                .find_conflicts(&candidate.span, &room_key, None)
                .await?
                .iter()
                .map(|b| b.id)
                .collect();
            conflicting.extend(
                earlier
                    .iter()
                    .filter(|(_, _, prev)| prev.room == candidate.room)
                    .map(|(prev_id, _, _)| *prev_id),
            );
            if !conflicting.is_empty() {
                return Err(ScheduleViolation::RoomConflict {
                    room: candidate.room.clone(),
                    conflicting,
                }
                .into());
            }

            let lecturer_key = ResourceKey::Lecturer(candidate.lecturer);
            let mut conflicting: Vec<Ulid> = self
                .validator()
                .find_conflicts(&candidate.span, &lecturer_key, None)
                .await?
                .iter()
                .map(|b| b.id)
                .collect();
            conflicting.extend(
                earlier
                    .iter()
                    .filter(|(_, _, prev)| prev.lecturer == candidate.lecturer)
                    .map(|(prev_id, _, _)| *prev_id),
            );
            if !conflicting.is_empty() {
                return Err(ScheduleViolation::LecturerConflict {
                    lecturer: candidate.lecturer,
                    conflicting,
                }
                .into());
            }
        }

        // Phase 2: commit as one WAL append.
        let count = lectures.len();
        let changes = lectures
            .into_iter()
            .map(|(id, title, candidate)| {
                let affected = vec![
                    ResourceKey::Room(candidate.room.clone()),
                    ResourceKey::Lecturer(candidate.lecturer),
                ];
                let event = Event::LectureScheduled {
                    id,
                    title,
                    room: candidate.room,
                    lecturer: candidate.lecturer,
                    span: candidate.span,
                };
                (event, affected)
            })
            .collect();
        self.commit(changes, locks).await?;
        info!("batch scheduled {count} lectures");
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// store: one `LectureScheduled` per lecture plus its enrollments.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No commit may sit between its WAL append and its store apply while
        // the snapshot is taken, or the compacted log would drop it.
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();
        for booking in self.store().all_bookings() {
            events.push(Event::LectureScheduled {
                id: booking.id,
                title: booking.title,
                room: booking.room,
                lecturer: booking.lecturer,
                span: booking.span,
            });
            events.extend(booking.students.into_iter().map(|student| Event::StudentEnrolled {
                lecture_id: booking.id,
                student,
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
