//! Hard caps. Every externally supplied value is bounded before it can grow
//! state or the WAL.

/// Max tools a single tenant may register.
pub const MAX_TOOLS_PER_TENANT: usize = 10_000;

/// Max bookings (any status) kept on one tool.
pub const MAX_BOOKINGS_PER_TOOL: usize = 10_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 200;

/// Booking and query dates must fall in this year window.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Longest single rental, inclusive days.
pub const MAX_BOOKING_DAYS: i64 = 366;

/// Widest availability query window, inclusive days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1_100;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 64;
