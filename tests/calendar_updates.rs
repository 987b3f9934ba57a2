use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use ulid::Ulid;

use timetable::engine::{Engine, EngineError, ScheduleViolation};
use timetable::model::{Event, LectureCandidate, ResourceKey, Span};
use timetable::notify::NotifyHub;

const H: i64 = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

fn start_engine() -> (Arc<Engine>, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("timetable_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("timetable.wal");
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    (Arc::new(engine), path)
}

/// Wait for an event with timeout.
async fn recv_event(rx: &mut broadcast::Receiver<Event>, timeout: Duration) -> Option<Event> {
    tokio::time::timeout(timeout, rx.recv()).await.ok()?.ok()
}

fn lecture(room: &str, lecturer: Ulid, start: i64, end: i64) -> LectureCandidate {
    LectureCandidate::new(Span::new(start, end), room, lecturer)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn student_calendar_follows_enrollment_and_reschedule() {
    let (engine, _) = start_engine();
    let student = Ulid::new();
    let mut rx = engine.notify.subscribe(ResourceKey::Student(student));

    let id = Ulid::new();
    let lecturer = Ulid::new();
    engine
        .schedule_lecture(id, Some("Databases".into()), lecture("B-12", lecturer, 9 * H, 11 * H))
        .await
        .unwrap();
    engine.enroll_student(student, id).await.unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected enrollment event");
    assert_eq!(
        event,
        Event::StudentEnrolled {
            lecture_id: id,
            student
        }
    );

    engine
        .reschedule_lecture(id, lecture("B-12", lecturer, 13 * H, 15 * H))
        .await
        .unwrap();
    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected reschedule event");
    assert!(matches!(event, Event::LectureRescheduled { span, .. } if span == Span::new(13 * H, 15 * H)));

    engine.cancel_lecture(id).await.unwrap();
    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected cancel event");
    assert_eq!(event, Event::LectureCancelled { id });
}

#[tokio::test]
async fn old_room_hears_about_a_move() {
    let (engine, _) = start_engine();
    let mut old_room = engine.notify.subscribe(ResourceKey::Room("A".into()));
    let mut new_room = engine.notify.subscribe(ResourceKey::Room("B".into()));

    let id = Ulid::new();
    let lecturer = Ulid::new();
    engine
        .schedule_lecture(id, None, lecture("A", lecturer, 9 * H, 10 * H))
        .await
        .unwrap();
    assert!(recv_event(&mut old_room, Duration::from_secs(5)).await.is_some());

    engine
        .reschedule_lecture(id, lecture("B", lecturer, 9 * H, 10 * H))
        .await
        .unwrap();
    let moved_out = recv_event(&mut old_room, Duration::from_secs(5)).await.unwrap();
    let moved_in = recv_event(&mut new_room, Duration::from_secs(5)).await.unwrap();
    assert_eq!(moved_out, moved_in);
    assert_eq!(moved_in.lecture_id(), id);
}

#[tokio::test]
async fn rejected_enrollment_is_silent() {
    let (engine, _) = start_engine();
    let student = Ulid::new();

    let first = Ulid::new();
    let second = Ulid::new();
    engine
        .schedule_lecture(first, None, lecture("A", Ulid::new(), 9 * H, 10 * H))
        .await
        .unwrap();
    engine
        .schedule_lecture(second, None, lecture("B", Ulid::new(), 9 * H, 10 * H))
        .await
        .unwrap();
    engine.enroll_student(student, first).await.unwrap();

    let mut rx = engine.notify.subscribe(ResourceKey::Student(student));
    let result = engine.enroll_student(student, second).await;
    assert!(matches!(
        result,
        Err(EngineError::Violation(ScheduleViolation::StudentConflict { conflicting, .. })) if conflicting == first
    ));
    assert!(recv_event(&mut rx, Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn restart_keeps_a_consistent_timetable() {
    let (engine, path) = start_engine();
    let lecturer = Ulid::new();
    let students: Vec<Ulid> = (0..5).map(|_| Ulid::new()).collect();

    let mut ids = Vec::new();
    for day in 0..5 {
        let id = Ulid::new();
        let start = day * 24 * H + 9 * H;
        engine
            .schedule_lecture(id, Some(format!("Day {day}")), lecture("Aula", lecturer, start, start + 2 * H))
            .await
            .unwrap();
        for student in &students {
            engine.enroll_student(*student, id).await.unwrap();
        }
        ids.push(id);
    }
    engine.withdraw_student(students[0], ids[0]).await.unwrap();
    engine.compact_wal().await.unwrap();
    engine.cancel_lecture(ids[4]).await.unwrap();
    drop(engine);

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.lecture_count(), 4);
    assert!(engine.audit().is_empty());
    assert!(!engine.get_lecture(&ids[0]).unwrap().is_enrolled(&students[0]));
    assert!(engine.get_lecture(&ids[1]).unwrap().is_enrolled(&students[0]));
    assert!(engine.get_lecture(&ids[4]).is_none());

    let week = engine
        .calendar(&ResourceKey::Student(students[1]), Span::new(0, 7 * 24 * H))
        .await
        .unwrap();
    assert_eq!(week.len(), 4);
}
