use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Inclusive calendar-date range `[start, end]` — both endpoint days are rented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Parse two date strings into an ordered range. `None` if either fails to
    /// parse or `end` precedes `start`.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let (start, end) = (parse_date(start)?, parse_date(end)?);
        if end < start {
            return None;
        }
        Some(Self { start, end })
    }

    /// Number of rented days. A single-day range counts as one.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Closed ranges overlap when each starts no later than the other ends.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[allow(dead_code)]
    pub fn contains_day(&self, d: NaiveDate) -> bool {
        self.start <= d && d <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    #[allow(dead_code)]
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Booking lifecycle. `pending` is the initial state; `completed` and
/// `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings block the tool's dates. Cancelled and completed do not.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Forward-only transition graph: pending → confirmed → completed, with
    /// cancellation allowed from pending and confirmed. Re-asserting the
    /// current status is not a transition.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// A reservation of a tool for an inclusive date range. The range and the
/// price are fixed at creation; only `status` changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub renter_id: Ulid,
    pub period: DateRange,
    pub total_price: Decimal,
    pub status: BookingStatus,
}

/// A rentable tool and its bookings, sorted by `period.start`.
#[derive(Debug, Clone)]
pub struct ToolState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub category: Option<String>,
    pub daily_rate: Decimal,
    pub available: bool,
    pub location: Option<String>,
    pub bookings: Vec<Booking>,
}

impl ToolState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Ulid,
        owner_id: Ulid,
        name: String,
        category: Option<String>,
        daily_rate: Decimal,
        available: bool,
        location: Option<String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            category,
            daily_rate,
            available,
            location,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by period.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.period.start, |b| b.period.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn get_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose period overlaps the query range.
    /// Binary search skips bookings starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.period.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.period.end >= query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ToolAdded {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        category: Option<String>,
        daily_rate: Decimal,
        available: bool,
        location: Option<String>,
    },
    ToolUpdated {
        id: Ulid,
        name: String,
        category: Option<String>,
        daily_rate: Decimal,
        available: bool,
        location: Option<String>,
    },
    BookingOpened {
        id: Ulid,
        tool_id: Ulid,
        renter_id: Ulid,
        period: DateRange,
        total_price: Decimal,
    },
    BookingStatusChanged {
        id: Ulid,
        tool_id: Ulid,
        status: BookingStatus,
    },
}

/// Partial update for a tool. `None` leaves a field untouched; the doubled
/// options on nullable fields distinguish "untouched" from "set to NULL".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPatch {
    pub name: Option<String>,
    pub category: Option<Option<String>>,
    pub daily_rate: Option<Decimal>,
    pub available: Option<bool>,
    pub location: Option<Option<String>>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub category: Option<String>,
    pub daily_rate: Decimal,
    pub available: bool,
    pub location: Option<String>,
}

impl ToolInfo {
    pub fn from_state(ts: &ToolState) -> Self {
        Self {
            id: ts.id,
            owner_id: ts.owner_id,
            name: ts.name.clone(),
            category: ts.category.clone(),
            daily_rate: ts.daily_rate,
            available: ts.available,
            location: ts.location.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub tool_id: Ulid,
    pub renter_id: Ulid,
    pub period: DateRange,
    pub total_price: Decimal,
    pub status: BookingStatus,
}
