//! agrirent — a rental-booking storage engine for farm equipment.
//!
//! State lives in memory (one entry per tool, bookings attached), every
//! mutation is WAL-logged before it is applied, and clients speak to the
//! engine over the Postgres wire protocol with a small SQL dialect
//! (`tools`, `bookings`, `availability`). The connection user is the acting
//! principal; the connection database selects an isolated tenant.

pub mod auth;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
