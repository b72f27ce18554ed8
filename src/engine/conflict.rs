use chrono::Datelike;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{DateRange, ToolState};

use super::EngineError;

/// Cheap range check: both strings parse as real calendar dates and the
/// end does not precede the start.
pub fn is_valid_range(start: &str, end: &str) -> bool {
    DateRange::parse(start, end).is_some()
}

fn check_year_bounds(range: &DateRange) -> Result<(), EngineError> {
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of supported range"));
    }
    Ok(())
}

/// Validate a booking period. Unparseable or inverted input is a user error,
/// not a panic; oversized input hits the limit check.
pub(crate) fn validate_range(start: &str, end: &str) -> Result<DateRange, EngineError> {
    let range = DateRange::parse(start, end).ok_or_else(|| EngineError::InvalidRange {
        start: start.to_string(),
        end: end.to_string(),
    })?;
    check_year_bounds(&range)?;
    if range.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking period too long"));
    }
    Ok(range)
}

/// Validate an availability query window. Wider cap than a single booking.
pub(crate) fn validate_window(start: &str, end: &str) -> Result<DateRange, EngineError> {
    let range = DateRange::parse(start, end).ok_or_else(|| EngineError::InvalidRange {
        start: start.to_string(),
        end: end.to_string(),
    })?;
    check_year_bounds(&range)?;
    if range.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(range)
}

/// First active (pending or confirmed) booking overlapping `period`, if any.
/// Cancelled and completed bookings never block — cancelling frees the range
/// immediately.
pub(crate) fn find_conflict(ts: &ToolState, period: &DateRange) -> Option<Ulid> {
    ts.overlapping(period)
        .find(|b| b.status.is_active())
        .map(|b| b.id)
}
