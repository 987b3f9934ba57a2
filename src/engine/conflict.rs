use ulid::Ulid;

use crate::model::*;

use super::store::BookingStore;
use super::{EngineError, ScheduleViolation};

/// Well-formedness first, then range limits.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if !span.is_valid() {
        return Err(ScheduleViolation::InvalidInterval {
            start: span.start,
            end: span.end,
        }
        .into());
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_LECTURE_DURATION_MS {
        return Err(EngineError::LimitExceeded("lecture too long"));
    }
    Ok(())
}

/// Query windows only need to be well-formed and bounded in width.
pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_valid() {
        return Err(ScheduleViolation::InvalidInterval {
            start: window.start,
            end: window.end,
        }
        .into());
    }
    match window.end.checked_sub(window.start) {
        Some(width) if width <= crate::limits::MAX_QUERY_WINDOW_MS => Ok(()),
        _ => Err(EngineError::LimitExceeded("query window too wide")),
    }
}

/// Every booking on `key` that overlaps `candidate`, except `exclude`.
/// An empty result means no conflict.
pub async fn find_conflicts<S: BookingStore + ?Sized>(
    store: &S,
    candidate: &Span,
    key: &ResourceKey,
    exclude: Option<Ulid>,
) -> Result<Vec<Booking>, EngineError> {
    let mut hits = store.query_overlapping(key, candidate).await?;
    hits.retain(|b| Some(b.id) != exclude);
    Ok(hits)
}
