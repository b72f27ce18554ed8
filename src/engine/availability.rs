use chrono::Days;

use crate::model::{DateRange, ToolState};

// ── Free-range algebra over inclusive date ranges ────────────────

/// Merge sorted ranges that overlap or touch (gap of zero days) into
/// disjoint ranges.
pub fn merge_ranges(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && (range.start - last.end).num_days() <= 1
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Subtract sorted, disjoint `busy` ranges from `window`. Inclusive
/// arithmetic: removing `[s, e]` leaves `[.., s-1]` and `[e+1, ..]`.
pub fn subtract_ranges(window: &DateRange, busy: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut cursor = window.start;

    for b in busy {
        if b.end < cursor {
            continue;
        }
        if b.start > window.end {
            break;
        }
        if b.start > cursor
            && let Some(gap_end) = b.start.checked_sub_days(Days::new(1))
        {
            result.push(DateRange::new(cursor, gap_end.min(window.end)));
        }
        match b.end.checked_add_days(Days::new(1)) {
            Some(next) => cursor = cursor.max(next),
            None => return result, // busy range runs to the end of time
        }
        if cursor > window.end {
            return result;
        }
    }

    if cursor <= window.end {
        result.push(DateRange::new(cursor, window.end));
    }
    result
}

/// Free inclusive date ranges of `window` on a tool: the window minus every
/// active (pending/confirmed) booking. A tool whose `available` flag is off
/// has no free dates at all.
pub fn free_ranges(ts: &ToolState, window: &DateRange) -> Vec<DateRange> {
    if !ts.available {
        return Vec::new();
    }

    let mut busy: Vec<DateRange> = ts
        .overlapping(window)
        .filter(|b| b.status.is_active())
        .map(|b| b.period)
        .collect();
    busy.sort_by_key(|r| r.start);
    let busy = merge_ranges(&busy);

    subtract_ranges(window, &busy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, ToolState};
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::parse(start, end).unwrap()
    }

    fn tool_with(available: bool, bookings: Vec<(&str, &str, BookingStatus)>) -> ToolState {
        let mut ts = ToolState::new(
            Ulid::new(),
            Ulid::new(),
            "Seed drill".into(),
            None,
            Decimal::from(300),
            available,
            None,
        );
        for (start, end, status) in bookings {
            ts.insert_booking(Booking {
                id: Ulid::new(),
                renter_id: Ulid::new(),
                period: range(start, end),
                total_price: Decimal::ZERO,
                status,
            });
        }
        ts
    }

    // ── merge_ranges ─────────────────────────────────────

    #[test]
    fn merge_empty() {
        assert!(merge_ranges(&[]).is_empty());
    }

    #[test]
    fn merge_overlapping_ranges() {
        let spans = vec![
            range("2024-03-01", "2024-03-10"),
            range("2024-03-05", "2024-03-12"),
            range("2024-03-20", "2024-03-21"),
        ];
        assert_eq!(
            merge_ranges(&spans),
            vec![range("2024-03-01", "2024-03-12"), range("2024-03-20", "2024-03-21")]
        );
    }

    #[test]
    fn merge_touching_ranges() {
        // 10th and 11th leave no free day between them.
        let spans = vec![range("2024-03-01", "2024-03-10"), range("2024-03-11", "2024-03-15")];
        assert_eq!(merge_ranges(&spans), vec![range("2024-03-01", "2024-03-15")]);
    }

    #[test]
    fn merge_keeps_one_day_gap() {
        let spans = vec![range("2024-03-01", "2024-03-10"), range("2024-03-12", "2024-03-15")];
        assert_eq!(merge_ranges(&spans).len(), 2);
    }

    // ── subtract_ranges ──────────────────────────────────

    #[test]
    fn subtract_nothing() {
        let window = range("2024-03-01", "2024-03-31");
        assert_eq!(subtract_ranges(&window, &[]), vec![window]);
    }

    #[test]
    fn subtract_middle_punch() {
        let window = range("2024-03-01", "2024-03-31");
        let busy = vec![range("2024-03-10", "2024-03-12")];
        assert_eq!(
            subtract_ranges(&window, &busy),
            vec![range("2024-03-01", "2024-03-09"), range("2024-03-13", "2024-03-31")]
        );
    }

    #[test]
    fn subtract_leading_edge() {
        let window = range("2024-03-01", "2024-03-31");
        let busy = vec![range("2024-02-25", "2024-03-05")];
        assert_eq!(subtract_ranges(&window, &busy), vec![range("2024-03-06", "2024-03-31")]);
    }

    #[test]
    fn subtract_trailing_edge() {
        let window = range("2024-03-01", "2024-03-31");
        let busy = vec![range("2024-03-28", "2024-04-10")];
        assert_eq!(subtract_ranges(&window, &busy), vec![range("2024-03-01", "2024-03-27")]);
    }

    #[test]
    fn subtract_full_cover() {
        let window = range("2024-03-10", "2024-03-12");
        let busy = vec![range("2024-03-01", "2024-03-31")];
        assert!(subtract_ranges(&window, &busy).is_empty());
    }

    #[test]
    fn subtract_multiple_punches() {
        let window = range("2024-03-01", "2024-03-31");
        let busy = vec![
            range("2024-03-05", "2024-03-06"),
            range("2024-03-15", "2024-03-15"),
            range("2024-03-25", "2024-03-27"),
        ];
        assert_eq!(
            subtract_ranges(&window, &busy),
            vec![
                range("2024-03-01", "2024-03-04"),
                range("2024-03-07", "2024-03-14"),
                range("2024-03-16", "2024-03-24"),
                range("2024-03-28", "2024-03-31"),
            ]
        );
    }

    #[test]
    fn subtract_single_day_window_booked() {
        let window = range("2024-03-10", "2024-03-10");
        let busy = vec![range("2024-03-10", "2024-03-10")];
        assert!(subtract_ranges(&window, &busy).is_empty());
    }

    #[test]
    fn subtract_busy_outside_window() {
        let window = range("2024-03-10", "2024-03-20");
        let busy = vec![range("2024-01-01", "2024-01-05"), range("2024-06-01", "2024-06-05")];
        assert_eq!(subtract_ranges(&window, &busy), vec![window]);
    }

    // ── free_ranges ──────────────────────────────────────

    #[test]
    fn free_ranges_empty_tool_is_whole_window() {
        let ts = tool_with(true, vec![]);
        let window = range("2024-03-01", "2024-03-31");
        assert_eq!(free_ranges(&ts, &window), vec![window]);
    }

    #[test]
    fn free_ranges_fragments_around_bookings() {
        let ts = tool_with(
            true,
            vec![
                ("2024-03-05", "2024-03-08", BookingStatus::Confirmed),
                ("2024-03-20", "2024-03-22", BookingStatus::Pending),
            ],
        );
        let window = range("2024-03-01", "2024-03-31");
        assert_eq!(
            free_ranges(&ts, &window),
            vec![
                range("2024-03-01", "2024-03-04"),
                range("2024-03-09", "2024-03-19"),
                range("2024-03-23", "2024-03-31"),
            ]
        );
    }

    #[test]
    fn free_ranges_ignores_cancelled_and_completed() {
        let ts = tool_with(
            true,
            vec![
                ("2024-03-05", "2024-03-08", BookingStatus::Cancelled),
                ("2024-03-20", "2024-03-22", BookingStatus::Completed),
            ],
        );
        let window = range("2024-03-01", "2024-03-31");
        assert_eq!(free_ranges(&ts, &window), vec![window]);
    }

    #[test]
    fn free_ranges_unavailable_tool_has_none() {
        let ts = tool_with(false, vec![]);
        let window = range("2024-03-01", "2024-03-31");
        assert!(free_ranges(&ts, &window).is_empty());
    }

    #[test]
    fn free_ranges_back_to_back_bookings_merge() {
        let ts = tool_with(
            true,
            vec![
                ("2024-03-05", "2024-03-08", BookingStatus::Confirmed),
                ("2024-03-09", "2024-03-12", BookingStatus::Pending),
            ],
        );
        let window = range("2024-03-01", "2024-03-31");
        assert_eq!(
            free_ranges(&ts, &window),
            vec![range("2024-03-01", "2024-03-04"), range("2024-03-13", "2024-03-31")]
        );
    }

    #[test]
    fn free_ranges_fully_booked() {
        let ts = tool_with(true, vec![("2024-02-01", "2024-04-30", BookingStatus::Confirmed)]);
        let window = range("2024-03-01", "2024-03-31");
        assert!(free_ranges(&ts, &window).is_empty());
    }
}
