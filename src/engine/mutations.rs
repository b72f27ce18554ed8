use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_range};
use super::pricing::total_price;
use super::{Engine, EngineError, WalCommand};

fn check_tool_fields(
    name: &str,
    category: Option<&str>,
    daily_rate: Decimal,
    location: Option<&str>,
) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation("tool name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("tool name too long"));
    }
    if let Some(c) = category
        && c.len() > MAX_CATEGORY_LEN
    {
        return Err(EngineError::LimitExceeded("category too long"));
    }
    if let Some(l) = location
        && l.len() > MAX_LOCATION_LEN
    {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    if daily_rate < Decimal::ZERO {
        return Err(EngineError::Validation("daily_rate must not be negative"));
    }
    Ok(())
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub async fn add_tool(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: String,
        category: Option<String>,
        daily_rate: Decimal,
        available: bool,
        location: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_TOOLS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many tools"));
        }
        check_tool_fields(&name, category.as_deref(), daily_rate, location.as_deref())?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ToolAdded {
            id,
            owner_id,
            name: name.clone(),
            category: category.clone(),
            daily_rate,
            available,
            location: location.clone(),
        };
        self.wal_append(&event).await?;
        let ts = ToolState::new(id, owner_id, name, category, daily_rate, available, location);
        self.state.insert(id, Arc::new(RwLock::new(ts)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Partial update, owner-only. Emits the full post-merge field set so
    /// replay never depends on patch semantics.
    pub async fn update_tool(
        &self,
        actor: Ulid,
        id: Ulid,
        patch: ToolPatch,
    ) -> Result<(), EngineError> {
        let ts = self.get_tool(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ts.write().await;
        if guard.owner_id != actor {
            return Err(EngineError::Forbidden(actor));
        }

        let name = patch.name.unwrap_or_else(|| guard.name.clone());
        let category = patch.category.unwrap_or_else(|| guard.category.clone());
        let daily_rate = patch.daily_rate.unwrap_or(guard.daily_rate);
        let available = patch.available.unwrap_or(guard.available);
        let location = patch.location.unwrap_or_else(|| guard.location.clone());
        check_tool_fields(&name, category.as_deref(), daily_rate, location.as_deref())?;

        let event = Event::ToolUpdated {
            id,
            name,
            category,
            daily_rate,
            available,
            location,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// The booking workflow: validate the range, require the tool to be
    /// available, reject overlaps with active bookings, price the period,
    /// persist as pending. The whole sequence runs under the tool's write
    /// lock, so two concurrent requests for overlapping dates serialize and
    /// the second one fails the conflict check.
    pub async fn open_booking(
        &self,
        renter_id: Ulid,
        id: Ulid,
        tool_id: Ulid,
        start: &str,
        end: &str,
    ) -> Result<BookingInfo, EngineError> {
        let period = validate_range(start, end)?;
        let ts = self.get_tool(&tool_id).ok_or(EngineError::NotFound(tool_id))?;
        let mut guard = ts.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_TOOL {
            return Err(EngineError::LimitExceeded("too many bookings on tool"));
        }
        if self.booking_to_tool.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !guard.available {
            return Err(EngineError::ToolUnavailable(tool_id));
        }
        if let Some(existing) = find_conflict(&guard, &period) {
            return Err(EngineError::Conflict(existing));
        }

        let total_price = total_price(guard.daily_rate, &period);
        let event = Event::BookingOpened {
            id,
            tool_id,
            renter_id,
            period,
            total_price,
        };
        self.persist_and_apply(tool_id, &mut guard, &event).await?;

        Ok(BookingInfo {
            id,
            tool_id,
            renter_id,
            period,
            total_price,
            status: BookingStatus::Pending,
        })
    }

    /// Status transition by the renter or the tool owner, constrained to the
    /// forward-only graph. Dates and price never change after creation.
    pub async fn change_booking_status(
        &self,
        actor: Ulid,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let (tool_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.get_booking(id).ok_or(EngineError::NotFound(id))?;

        if actor != booking.renter_id && actor != guard.owner_id {
            return Err(EngineError::Forbidden(actor));
        }
        if !booking.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: status,
            });
        }

        let event = Event::BookingStatusChanged { id, tool_id, status };
        self.persist_and_apply(tool_id, &mut guard, &event).await
    }

    /// Pending bookings whose start date has already passed. The reaper
    /// cancels these — an unconfirmed reservation must not hold dates forever.
    pub fn collect_stale_pending(&self, today: NaiveDate) -> Vec<(Ulid, Ulid)> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let ts = entry.value().clone();
            if let Ok(guard) = ts.try_read() {
                for booking in &guard.bookings {
                    if booking.status == BookingStatus::Pending && booking.period.start < today {
                        stale.push((booking.id, guard.id));
                    }
                }
            }
        }
        stale
    }

    /// System path used by the reaper: cancel a still-pending booking without
    /// an actor check. Fails if the booking was confirmed or resolved in the
    /// meantime.
    pub async fn expire_pending(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (tool_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.get_booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            tool_id,
            status: BookingStatus::Cancelled,
        };
        self.persist_and_apply(tool_id, &mut guard, &event).await?;
        Ok(tool_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state: one ToolAdded per tool, one BookingOpened per
    /// booking, plus a BookingStatusChanged where the status has moved on from
    /// pending.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut tool_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        tool_ids.sort();

        for id in tool_ids {
            let ts = match self.get_tool(&id) {
                Some(ts) => ts,
                None => continue,
            };
            let guard = ts.read().await;

            events.push(Event::ToolAdded {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                daily_rate: guard.daily_rate,
                available: guard.available,
                location: guard.location.clone(),
            });

            for booking in &guard.bookings {
                events.push(Event::BookingOpened {
                    id: booking.id,
                    tool_id: guard.id,
                    renter_id: booking.renter_id,
                    period: booking.period,
                    total_price: booking.total_price,
                });
                if booking.status != BookingStatus::Pending {
                    events.push(Event::BookingStatusChanged {
                        id: booking.id,
                        tool_id: guard.id,
                        status: booking.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
