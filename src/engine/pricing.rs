use rust_decimal::Decimal;

use crate::model::{parse_date, DateRange};

// ── Pricing ───────────────────────────────────────────────────────

/// Billable days for a rental period, floored at one. A single-day booking
/// (`start == end`) costs exactly one day's rate.
pub fn rental_days(period: &DateRange) -> i64 {
    period.days().max(1)
}

/// Total price for a period at a daily rate, never negative. Kept at full
/// decimal precision; rounding to the currency's minor unit happens at
/// display time, not here.
pub fn total_price(daily_rate: Decimal, period: &DateRange) -> Decimal {
    (daily_rate * Decimal::from(rental_days(period))).max(Decimal::ZERO)
}

/// Price a pair of raw date strings. Returns zero when either date fails to
/// parse — callers are expected to have validated the range already, this is
/// the fallback path, not the validation.
pub fn quote(daily_rate: Decimal, start: &str, end: &str) -> Decimal {
    match (parse_date(start), parse_date(end)) {
        (Some(start), Some(end)) => {
            let days = ((end - start).num_days() + 1).max(1);
            (daily_rate * Decimal::from(days)).max(Decimal::ZERO)
        }
        _ => Decimal::ZERO,
    }
}
