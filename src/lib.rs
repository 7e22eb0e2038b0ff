//! Client library for posting and retrieving energy-usage telemetry against
//! a PowerMeter-style metering service.
//!
//! A [`Service`] speaks the Atom feed protocol over HTTP; a [`Meter`] turns
//! raw register or interval readings into measurement events and hands them
//! to any [`EventSink`]; the [`units`] module supplies the quantity algebra
//! that keeps readings in commensurable units.

pub mod atom;
pub mod backfill;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod meter;
pub mod rfc3339;
pub mod service;
pub mod units;

// Re-export commonly used types for easier access
pub use atom::{parse_entries, Entry};
pub use entity::{Entity, EntityRef, MessageStream, Variable};
pub use error::{Error, Result};
pub use event::{DurMeasurement, DurMessage, Event, EventKind, InstMeasurement};
pub use meter::Meter;
pub use service::{BatchAdapter, EventSink, Service, MAX_BATCH_POST_COUNT};
pub use units::{Quantity, Quotient, Unit, UnitRegistry};
