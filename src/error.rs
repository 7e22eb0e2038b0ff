use thiserror::Error;

use crate::units::Unit;

/// Failures surfaced by the client library.
///
/// Every error is returned synchronously to the immediate caller; nothing is
/// retried or logged-and-swallowed inside the library.
#[derive(Debug, Error)]
pub enum Error {
    /// Conversion or arithmetic between units that do not share a base.
    #[error("unit mismatch: cannot convert {from} to {to}")]
    UnitMismatch { from: Unit, to: Unit },

    /// Multiplication or division over a unit pair with no declared relation.
    #[error("no declared relation between {left} and {right}")]
    IncompatibleUnits { left: Unit, right: Unit },

    /// An RFC 3339 timestamp that failed to parse.
    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    /// A feed entry with a missing field or an unparsable value.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    /// HTTP transport failure (connect, send, read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-2xx status.
    #[error("service returned HTTP {status}")]
    HttpStatus { status: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
