//! Error types for the slice review tool.

use std::path::PathBuf;
use thiserror::Error;

/// One or more container keys do not match `<phonetic_id>_<series>_slice_<digits>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed slice key(s): {}", .keys.join(", "))]
pub struct MalformedKeyError {
    pub keys: Vec<String>,
}

/// A table row that was skipped during load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct MalformedRowError {
    pub line: u64,
    pub key: Option<String>,
    pub reason: String,
}

/// A score outside 0..=3, or input that is not an integer at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid rating {value:?}: expected an integer from 0 to 3")]
pub struct InvalidRatingError {
    pub value: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MalformedKey(#[from] MalformedKeyError),

    #[error(transparent)]
    InvalidRating(#[from] InvalidRatingError),

    #[error("unknown slice key: {0}")]
    UnknownKey(String),

    #[error("the container holds no slices")]
    EmptyCatalog,

    /// An event arrived for a key other than the current navigation landing.
    #[error("event for {key} but the current slice is {current}")]
    NotCurrent { key: String, current: String },

    #[error("slice {0} has not been displayed yet")]
    NotViewed(String),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unusable table {}: {reason}", .path.display())]
    Table { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("container error: {0}")]
    Source(String),
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
