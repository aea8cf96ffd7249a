//! Event log subsystem
//!
//! The event log is a newline-delimited file of JSON records, one per observed attacker
//! action. The core only ever appends to it; everything else reads it.
//!
//! Components:
//! - `types`: the `Event` record model and its on-disk encoding.
//! - `event_logger`: the append-only writer used by sessions.
//! - `event_reader`: read side for reporting: recent events, aggregates and live tail.

pub mod event_logger;
pub mod event_reader;
pub mod types;

pub use event_logger::EventLogger;
pub use types::{Event, EventKind, GeoInfo};
