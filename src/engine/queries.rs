use futures::future::try_join_all;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_windows;
use super::conflict::validate_window;
use super::store::BookingStore;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_lecture(&self, id: &Ulid) -> Option<Booking> {
        self.store().get_booking(id)
    }

    pub fn lecture_count(&self) -> usize {
        self.store().len()
    }

    /// Lectures starting inside `[start, end)`, ordered by start then id.
    pub fn lectures_between(&self, start: Ms, end: Ms) -> Result<Vec<Booking>, EngineError> {
        let window = Span::new(start, end);
        validate_window(&window)?;
        Ok(self.store().starting_within(&window))
    }

    /// Bookings on one resource calendar overlapping `window`.
    pub async fn calendar(
        &self,
        key: &ResourceKey,
        window: Span,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_window(&window)?;
        self.store().query_overlapping(key, &window).await
    }

    /// Time inside `window` when none of `keys` is booked, e.g. a room, a
    /// lecturer and a group of students all at once.
    pub async fn free_windows(
        &self,
        keys: &[ResourceKey],
        window: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        validate_window(&window)?;
        if keys.len() > MAX_QUERY_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let store = self.store().as_ref();
        let calendars =
            try_join_all(keys.iter().map(|key| store.query_overlapping(key, &window))).await?;
        let busy: Vec<Span> = calendars.iter().flatten().map(|b| b.span).collect();
        Ok(free_windows(&window, &busy, min_duration_ms))
    }

    /// Every pair of bookings that double-books a resource. Empty whenever
    /// the engine is the only writer.
    pub fn audit(&self) -> Vec<(ResourceKey, Ulid, Ulid)> {
        self.store().overlapping_pairs()
    }
}
