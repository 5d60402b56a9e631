//! Library-wide error type.
//!
//! Malformed user input is always propagated to the caller. Transport and
//! filesystem failures are handled by the executor itself (a dropped segment,
//! not a propagated error) — see `executor.rs`. This enum exists for the
//! failure modes that *do* need to reach the caller: bad arguments, a bad
//! catalog, and anything unexpected enough that skipping it would hide a bug.

use thiserror::Error;

/// The six conditions accepted by the date-condition regex in [`crate::args`].
pub const VALID_DATE_CONDITIONS: [&str; 6] = [
    "is on or before",
    "is on or after",
    "is before",
    "is after",
    "is",
    "is not",
];

#[derive(Error, Debug)]
pub enum CarolError {
    /// An argument could not be normalized into a complete rule at all:
    /// wrong arity, a rejected prose confirmation, or a rule left with an
    /// empty required slot.
    #[error("malformed query argument: {0}")]
    Malformed(String),

    /// The argument looked like a date condition (matched the condition
    /// regex) but the date portion did not parse.
    #[error(
        "malformed date in condition {condition:?}: {value:?} is not a recognizable date; valid conditions are {conditions:?}",
        conditions = VALID_DATE_CONDITIONS
    )]
    MalformedDate { condition: String, value: String },

    /// The vocabulary file was missing or did not match the expected schema.
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered but with a non-success status, e.g. a 500 from
    /// an overloaded probe endpoint.
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CarolError>;
