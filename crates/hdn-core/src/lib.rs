//! Event-aggregation and multi-channel notification core for the helpdesk.
//!
//! Entity-history events are grouped per logical update, and each group turns
//! into one notification per recipient on two channels: Telegram text and a
//! structured live-feed payload. Lookups and both channels sit behind ports
//! (traits) implemented in adapter crates.
//!
//! Buffered groups live only in memory. Whatever has not flushed when the
//! process stops is lost; there is no outbox.

pub mod aggregation;
pub mod compose;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod events;
pub mod formatting;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod ports;
pub mod recipients;

pub use errors::{Error, Result};
