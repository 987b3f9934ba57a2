use crate::model::*;

// ── Free-window algorithm ─────────────────────────────────────────

/// Free time inside `window` given the busy spans of one or more resources.
/// Busy spans may be unsorted, overlapping and may extend past the window.
pub fn free_windows(window: &Span, busy: &[Span], min_duration_ms: Option<Ms>) -> Vec<Span> {
    let mut clamped: Vec<Span> = busy
        .iter()
        .filter(|s| s.overlaps(window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&clamped);

    let mut free = subtract_intervals(&[*window], &blocked);
    if let Some(min_dur) = min_duration_ms {
        free.retain(|span| span.duration_ms() >= min_dur);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
