use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested range overlaps an active booking.
    Conflict(Ulid),
    ToolUnavailable(Ulid),
    InvalidRange {
        start: String,
        end: String,
    },
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The actor is neither the renter nor the tool owner.
    Forbidden(Ulid),
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "dates conflict with existing booking: {id}")
            }
            EngineError::ToolUnavailable(id) => write!(f, "tool not available: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range: {start}..{end}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::Forbidden(actor) => write!(f, "forbidden for actor: {actor}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
