use ulid::Ulid;

use crate::model::*;

use super::availability::free_ranges;
use super::conflict::validate_window;
use super::{Engine, EngineError, SharedToolState};

/// Listing filters for tools: availability flag, exact category,
/// case-insensitive location substring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolFilter {
    pub available: Option<bool>,
    pub category: Option<String>,
    pub location: Option<String>,
}

impl ToolFilter {
    fn matches(&self, ts: &ToolState) -> bool {
        if let Some(avail) = self.available
            && ts.available != avail
        {
            return false;
        }
        if let Some(ref cat) = self.category
            && ts.category.as_deref() != Some(cat.as_str())
        {
            return false;
        }
        if let Some(ref loc) = self.location {
            let needle = loc.to_lowercase();
            match &ts.location {
                Some(have) if have.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        true
    }
}

impl Engine {
    pub async fn list_tools(&self, filter: &ToolFilter) -> Vec<ToolInfo> {
        // Snapshot the shard contents first; never hold a map shard across an await.
        let states: Vec<SharedToolState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut tools = Vec::new();
        for ts in states {
            let guard = ts.read().await;
            if filter.matches(&guard) {
                tools.push(ToolInfo::from_state(&guard));
            }
        }
        // ULIDs are creation-ordered, so this is oldest-first.
        tools.sort_by_key(|t| t.id);
        tools
    }

    pub async fn get_tool_info(&self, id: Ulid) -> Option<ToolInfo> {
        let ts = self.get_tool(&id)?;
        let guard = ts.read().await;
        Some(ToolInfo::from_state(&guard))
    }

    /// Bookings visible to `actor`. With a tool filter, all of that tool's
    /// bookings; without one, the actor's view: bookings they rented plus
    /// bookings on tools they own.
    pub async fn list_bookings(
        &self,
        actor: Ulid,
        tool_id: Option<Ulid>,
        status: Option<BookingStatus>,
    ) -> Vec<BookingInfo> {
        let mut out = Vec::new();

        match tool_id {
            Some(tool_id) => {
                if let Some(ts) = self.get_tool(&tool_id) {
                    let guard = ts.read().await;
                    collect_bookings(&guard, status, None, &mut out);
                }
            }
            None => {
                let tool_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
                for id in tool_ids {
                    if let Some(ts) = self.get_tool(&id) {
                        let guard = ts.read().await;
                        collect_bookings(&guard, status, Some(actor), &mut out);
                    }
                }
            }
        }

        out.sort_by_key(|b| b.id);
        out
    }

    /// Free inclusive date ranges for a tool in a window. A missing tool has
    /// no free dates; an invalid or oversized window is an error.
    pub async fn compute_free_ranges(
        &self,
        tool_id: Ulid,
        start: &str,
        end: &str,
    ) -> Result<Vec<DateRange>, EngineError> {
        let window = validate_window(start, end)?;
        let ts = match self.get_tool(&tool_id) {
            Some(ts) => ts,
            None => return Ok(Vec::new()),
        };
        let guard = ts.read().await;
        Ok(free_ranges(&guard, &window))
    }
}

fn collect_bookings(
    ts: &ToolState,
    status: Option<BookingStatus>,
    visible_to: Option<Ulid>,
    out: &mut Vec<BookingInfo>,
) {
    for booking in &ts.bookings {
        if let Some(s) = status
            && booking.status != s
        {
            continue;
        }
        if let Some(actor) = visible_to
            && booking.renter_id != actor
            && ts.owner_id != actor
        {
            continue;
        }
        out.push(BookingInfo {
            id: booking.id,
            tool_id: ts.id,
            renter_id: booking.renter_id,
            period: booking.period,
            total_price: booking.total_price,
            status: booking.status,
        });
    }
}
