use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Read side of booking persistence, as consumed by the validator.
///
/// Every method returns bookings sorted by `span.start`.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Booking>, EngineError>;

    /// All bookings on one resource calendar. For a student this is every
    /// lecture the student is enrolled in.
    async fn query_by_resource(&self, key: &ResourceKey) -> Result<Vec<Booking>, EngineError>;

    /// Bookings on `key` whose span overlaps `span`. Stores with an index on
    /// start time should override this.
    async fn query_overlapping(
        &self,
        key: &ResourceKey,
        span: &Span,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut hits = self.query_by_resource(key).await?;
        hits.retain(|b| b.span.overlaps(span));
        Ok(hits)
    }
}

/// One resource's bookings as `(id, span)`, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    entries: Vec<(Ulid, Span)>,
}

impl Calendar {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, id: Ulid, span: Span) {
        let pos = self.entries.partition_point(|(_, s)| s.start <= span.start);
        self.entries.insert(pos, (id, span));
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Span> {
        let pos = self.entries.iter().position(|(i, _)| *i == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Entries whose span overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(Ulid, Span)> {
        let right_bound = self.entries.partition_point(|(_, s)| s.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |(_, s)| s.end > query.start)
    }

    /// Entries whose start lies inside `window`.
    pub fn starting_within(&self, window: &Span) -> &[(Ulid, Span)] {
        let lo = self.entries.partition_point(|(_, s)| s.start < window.start);
        let hi = self.entries.partition_point(|(_, s)| s.start < window.end);
        &self.entries[lo..hi.max(lo)]
    }

    /// Pairs of entries that overlap each other.
    pub fn overlapping_pairs(&self) -> Vec<(Ulid, Ulid)> {
        let mut pairs = Vec::new();
        for (i, (a, sa)) in self.entries.iter().enumerate() {
            for (b, sb) in &self.entries[i + 1..] {
                if sb.start >= sa.end {
                    break;
                }
                if sa.overlaps(sb) {
                    pairs.push((*a, *b));
                }
            }
        }
        pairs
    }
}

const DAY_MS: Ms = 86_400_000;

fn day_of(t: Ms) -> Ms {
    t.div_euclid(DAY_MS)
}

/// Canonical booking store: bookings by id, plus one start-sorted calendar per
/// room, lecturer and enrolled student, plus one per UTC day of lecture start.
/// The calendars are derived from the bookings and only ever changed through
/// `apply_event`.
pub struct InMemoryStore {
    bookings: DashMap<Ulid, Booking>,
    calendars: DashMap<ResourceKey, Calendar>,
    days: DashMap<Ms, Calendar>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            calendars: DashMap::new(),
            days: DashMap::new(),
        }
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of all bookings, sorted by start then id.
    pub fn all_bookings(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| (b.span.start, b.id));
        all
    }

    // ── Calendars ────────────────────────────────────────────

    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.calendars.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn calendar_len(&self, key: &ResourceKey) -> usize {
        self.calendars.get(key).map_or(0, |c| c.len())
    }

    /// Booking ids on `key` overlapping `span`, in start order.
    pub fn overlapping_ids(&self, key: &ResourceKey, span: &Span) -> Vec<Ulid> {
        self.calendars
            .get(key)
            .map(|c| c.overlapping(span).map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    /// Overlapping booking pairs per resource. Empty when the global
    /// no-double-booking invariant holds.
    pub fn overlapping_pairs(&self) -> Vec<(ResourceKey, Ulid, Ulid)> {
        let mut found = Vec::new();
        for entry in self.calendars.iter() {
            for (a, b) in entry.value().overlapping_pairs() {
                found.push((entry.key().clone(), a, b));
            }
        }
        found.sort();
        found
    }

    /// Bookings starting inside `window`, sorted by start then id.
    pub fn starting_within(&self, window: &Span) -> Vec<Booking> {
        if !window.is_valid() {
            return Vec::new();
        }
        let (first, last) = (day_of(window.start), day_of(window.end - 1));
        let mut hits: Vec<(Ms, Ulid)> = Vec::new();
        let mut collect = |cal: &Calendar| {
            hits.extend(cal.starting_within(window).iter().map(|(id, s)| (s.start, *id)));
        };
        if ((last - first) as u128) < self.days.len() as u128 {
            for day in first..=last {
                if let Some(cal) = self.days.get(&day) {
                    collect(cal.value());
                }
            }
        } else {
            // Fewer populated days than days in the window.
            for entry in self.days.iter() {
                if (first..=last).contains(entry.key()) {
                    collect(entry.value());
                }
            }
        }
        hits.sort();
        self.resolve(hits.into_iter().map(|(_, id)| id))
    }

    fn resolve(&self, ids: impl IntoIterator<Item = Ulid>) -> Vec<Booking> {
        ids.into_iter().filter_map(|id| self.get_booking(&id)).collect()
    }

    fn index(&self, key: ResourceKey, id: Ulid, span: Span) {
        self.calendars.entry(key).or_default().insert(id, span);
    }

    fn unindex(&self, key: &ResourceKey, id: Ulid) {
        if let Some(mut cal) = self.calendars.get_mut(key) {
            cal.remove(id);
        }
        self.calendars.remove_if(key, |_, cal| cal.is_empty());
    }

    fn index_start(&self, id: Ulid, span: Span) {
        self.days.entry(day_of(span.start)).or_default().insert(id, span);
    }

    fn unindex_start(&self, id: Ulid, span: &Span) {
        let day = day_of(span.start);
        if let Some(mut cal) = self.days.get_mut(&day) {
            cal.remove(id);
        }
        self.days.remove_if(&day, |_, cal| cal.is_empty());
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::LectureScheduled {
                id,
                title,
                room,
                lecturer,
                span,
            } => {
                let booking = Booking {
                    id: *id,
                    title: title.clone(),
                    span: *span,
                    room: room.clone(),
                    lecturer: *lecturer,
                    students: Default::default(),
                };
                self.index(ResourceKey::Room(room.clone()), *id, *span);
                self.index(ResourceKey::Lecturer(*lecturer), *id, *span);
                self.index_start(*id, *span);
                self.bookings.insert(*id, booking);
            }
            Event::LectureRescheduled {
                id,
                room,
                lecturer,
                span,
            } => {
                let Some(mut booking) = self.get_booking(id) else {
                    return;
                };
                for key in booking.resource_keys() {
                    self.unindex(&key, *id);
                }
                self.unindex_start(*id, &booking.span);
                booking.span = *span;
                booking.room = room.clone();
                booking.lecturer = *lecturer;
                for key in booking.resource_keys() {
                    self.index(key, *id, *span);
                }
                self.index_start(*id, *span);
                self.bookings.insert(*id, booking);
            }
            Event::LectureCancelled { id } => {
                if let Some((_, booking)) = self.bookings.remove(id) {
                    for key in booking.resource_keys() {
                        self.unindex(&key, *id);
                    }
                    self.unindex_start(*id, &booking.span);
                }
            }
            Event::StudentEnrolled { lecture_id, student } => {
                let span = {
                    let Some(mut b) = self.bookings.get_mut(lecture_id) else {
                        return;
                    };
                    if !b.students.insert(*student) {
                        return;
                    }
                    b.span
                };
                self.index(ResourceKey::Student(*student), *lecture_id, span);
            }
            Event::StudentWithdrawn { lecture_id, student } => {
                let removed = self
                    .bookings
                    .get_mut(lecture_id)
                    .is_some_and(|mut b| b.students.remove(student));
                if removed {
                    self.unindex(&ResourceKey::Student(*student), *lecture_id);
                }
            }
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn get(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        Ok(self.get_booking(&id))
    }

    async fn query_by_resource(&self, key: &ResourceKey) -> Result<Vec<Booking>, EngineError> {
        let ids: Vec<Ulid> = self
            .calendars
            .get(key)
            .map(|c| c.ids().collect())
            .unwrap_or_default();
        Ok(self.resolve(ids))
    }

    async fn query_overlapping(
        &self,
        key: &ResourceKey,
        span: &Span,
    ) -> Result<Vec<Booking>, EngineError> {
        let ids = self.overlapping_ids(key, span);
        Ok(self
            .resolve(ids)
            .into_iter()
            .filter(|b| b.span.overlaps(span))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(room: &str, lecturer: Ulid, start: Ms, end: Ms) -> (Ulid, Event) {
        let id = Ulid::new();
        let event = Event::LectureScheduled {
            id,
            title: None,
            room: room.into(),
            lecturer,
            span: Span::new(start, end),
        };
        (id, event)
    }

    #[test]
    fn calendar_ordering() {
        let mut cal = Calendar::default();
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        cal.insert(ids[0], Span::new(300, 400));
        cal.insert(ids[1], Span::new(100, 200));
        cal.insert(ids[2], Span::new(200, 300));
        let order: Vec<Ulid> = cal.ids().collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn calendar_remove_nonexistent_returns_none() {
        let mut cal = Calendar::default();
        cal.insert(Ulid::new(), Span::new(100, 200));
        assert!(cal.remove(Ulid::new()).is_none());
        assert_eq!(cal.len(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut cal = Calendar::default();
        let hit = Ulid::new();
        cal.insert(Ulid::new(), Span::new(100, 200));
        cal.insert(hit, Span::new(450, 600));
        cal.insert(Ulid::new(), Span::new(1000, 1100));

        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, hit);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut cal = Calendar::default();
        cal.insert(Ulid::new(), Span::new(100, 200));
        cal.insert(Ulid::new(), Span::new(300, 400));
        assert_eq!(cal.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn overlapping_large_entry_spanning_query() {
        let mut cal = Calendar::default();
        cal.insert(Ulid::new(), Span::new(0, 10_000));
        assert_eq!(cal.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn overlapping_pairs_detects_double_booking() {
        let mut cal = Calendar::default();
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        cal.insert(a, Span::new(0, 100));
        cal.insert(b, Span::new(100, 200));
        cal.insert(c, Span::new(150, 250));
        assert_eq!(cal.overlapping_pairs(), vec![(b, c)]);
    }

    #[test]
    fn apply_schedule_indexes_room_and_lecturer() {
        let store = InMemoryStore::new();
        let lecturer = Ulid::new();
        let (id, event) = scheduled("R1", lecturer, 0, 100);
        store.apply_event(&event);

        assert!(store.contains(&id));
        assert_eq!(store.calendar_len(&ResourceKey::Room("R1".into())), 1);
        assert_eq!(store.calendar_len(&ResourceKey::Lecturer(lecturer)), 1);
    }

    #[test]
    fn apply_reschedule_moves_every_index() {
        let store = InMemoryStore::new();
        let (l1, l2, student) = (Ulid::new(), Ulid::new(), Ulid::new());
        let (id, event) = scheduled("R1", l1, 0, 100);
        store.apply_event(&event);
        store.apply_event(&Event::StudentEnrolled { lecture_id: id, student });
        store.apply_event(&Event::LectureRescheduled {
            id,
            room: "R2".into(),
            lecturer: l2,
            span: Span::new(500, 600),
        });

        assert_eq!(store.calendar_len(&ResourceKey::Room("R1".into())), 0);
        assert_eq!(store.calendar_len(&ResourceKey::Lecturer(l1)), 0);
        assert_eq!(
            store.overlapping_ids(&ResourceKey::Room("R2".into()), &Span::new(550, 560)),
            vec![id]
        );
        assert_eq!(
            store.overlapping_ids(&ResourceKey::Student(student), &Span::new(500, 600)),
            vec![id]
        );
        assert!(store.resource_keys().iter().all(|k| *k != ResourceKey::Room("R1".into())));
    }

    #[test]
    fn apply_cancel_removes_everything() {
        let store = InMemoryStore::new();
        let student = Ulid::new();
        let (id, event) = scheduled("R1", Ulid::new(), 0, 100);
        store.apply_event(&event);
        store.apply_event(&Event::StudentEnrolled { lecture_id: id, student });
        store.apply_event(&Event::LectureCancelled { id });

        assert!(store.is_empty());
        assert!(store.resource_keys().is_empty());
    }

    #[test]
    fn apply_enroll_twice_indexes_once() {
        let store = InMemoryStore::new();
        let student = Ulid::new();
        let (id, event) = scheduled("R1", Ulid::new(), 0, 100);
        store.apply_event(&event);
        store.apply_event(&Event::StudentEnrolled { lecture_id: id, student });
        store.apply_event(&Event::StudentEnrolled { lecture_id: id, student });
        assert_eq!(store.calendar_len(&ResourceKey::Student(student)), 1);

        store.apply_event(&Event::StudentWithdrawn { lecture_id: id, student });
        assert_eq!(store.calendar_len(&ResourceKey::Student(student)), 0);
        assert!(store.get_booking(&id).unwrap().students.is_empty());
    }

    #[tokio::test]
    async fn query_by_resource_returns_start_order() {
        let store = InMemoryStore::new();
        let lecturer = Ulid::new();
        let (late, e1) = scheduled("R1", lecturer, 500, 600);
        let (early, e2) = scheduled("R1", lecturer, 0, 100);
        store.apply_event(&e1);
        store.apply_event(&e2);

        let ids: Vec<Ulid> = store
            .query_by_resource(&ResourceKey::Lecturer(lecturer))
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[tokio::test]
    async fn query_overlapping_matches_default_filter() {
        let store = InMemoryStore::new();
        let key = ResourceKey::Room("R1".into());
        for i in 0..10 {
            let (_, e) = scheduled("R1", Ulid::new(), i * 100, i * 100 + 100);
            store.apply_event(&e);
        }
        let query = Span::new(250, 450);
        let indexed = store.query_overlapping(&key, &query).await.unwrap();
        let mut filtered = store.query_by_resource(&key).await.unwrap();
        filtered.retain(|b| b.span.overlaps(&query));
        assert_eq!(indexed, filtered);
        assert_eq!(indexed.len(), 3);
    }

    #[test]
    fn starting_within_uses_start_days() {
        let store = InMemoryStore::new();
        let hour = 3_600_000;
        let mut expected = Vec::new();
        for day in 0..30 {
            // 23:00 to 01:00 crosses midnight; it belongs to the day it starts on.
            let start = day * DAY_MS + 23 * hour;
            let (id, e) = scheduled(&format!("R{day}"), Ulid::new(), start, start + 2 * hour);
            store.apply_event(&e);
            if (3..10).contains(&day) {
                expected.push(id);
            }
        }

        // A lecture starting exactly at the window end is excluded.
        let window = Span::new(3 * DAY_MS, 9 * DAY_MS + 23 * hour + 1);
        let ids: Vec<Ulid> = store.starting_within(&window).iter().map(|b| b.id).collect();
        assert_eq!(ids, expected);

        let ids: Vec<Ulid> = store
            .starting_within(&Span::new(3 * DAY_MS, 9 * DAY_MS + 23 * hour))
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, expected[..6]);

        // Windows spanning far more days than are populated.
        assert_eq!(store.starting_within(&Span::new(i64::MIN, i64::MAX)).len(), 30);
        assert!(store.starting_within(&Span::new(-DAY_MS, 0)).is_empty());
    }

    #[test]
    fn start_index_follows_reschedule_and_cancel() {
        let store = InMemoryStore::new();
        let (id, e) = scheduled("R1", Ulid::new(), 100, 200);
        store.apply_event(&e);
        store.apply_event(&Event::LectureRescheduled {
            id,
            room: "R1".into(),
            lecturer: Ulid::new(),
            span: Span::new(DAY_MS + 100, DAY_MS + 200),
        });
        assert!(store.starting_within(&Span::new(0, DAY_MS)).is_empty());
        assert_eq!(store.starting_within(&Span::new(DAY_MS, 2 * DAY_MS)).len(), 1);

        store.apply_event(&Event::LectureCancelled { id });
        assert!(store.starting_within(&Span::new(0, 2 * DAY_MS)).is_empty());
        assert!(store.days.is_empty());
    }
}
