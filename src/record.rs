use chrono::{Local, NaiveDateTime, SubsecRound};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::catalog::SliceKey;
use crate::error::InvalidRatingError;

pub type Timestamp = NaiveDateTime;

/// Sortable ISO-8601 text form used in the review table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current local time at the table's resolution (whole seconds).
pub fn now() -> Timestamp {
    Local::now().naive_local().trunc_subsecs(0)
}

/// Quality score assigned by the reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 3;

    pub fn new(value: i64) -> Result<Self, InvalidRatingError> {
        match u8::try_from(value) {
            Ok(v) if v <= Self::MAX => Ok(Self(v)),
            _ => Err(InvalidRatingError {
                value: value.to_string(),
            }),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl FromStr for Rating {
    type Err = InvalidRatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRatingError { value: s.to_string() };
        let value = s.trim().parse::<i64>().map_err(|_| invalid())?;
        Self::new(value).map_err(|_| invalid())
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review state of one slice. `viewed` is derived from `first_viewed_at`, so
/// the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewRecord {
    pub rating: Option<Rating>,
    pub first_viewed_at: Option<Timestamp>,
    pub last_updated_at: Option<Timestamp>,
}

impl ReviewRecord {
    pub fn viewed(&self) -> bool {
        self.first_viewed_at.is_some()
    }

    pub(crate) fn mark_viewed(&mut self, now: Timestamp) {
        if self.first_viewed_at.is_none() {
            self.first_viewed_at = Some(now);
        }
        self.last_updated_at = Some(now);
    }

    pub(crate) fn set_rating(&mut self, rating: Rating, now: Timestamp) {
        self.rating = Some(rating);
        self.last_updated_at = Some(now);
    }
}

/// All review records of a session. Records are only ever added or
/// updated, never removed.
#[derive(Debug, Clone, Default)]
pub struct ReviewStore {
    records: BTreeMap<SliceKey, ReviewRecord>,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from previously persisted records.
    pub fn seeded<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (SliceKey, ReviewRecord)>,
    {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Read-only peek; unknown keys yield a fresh default record.
    pub fn get(&self, key: &SliceKey) -> ReviewRecord {
        self.records.get(key).cloned().unwrap_or_default()
    }

    pub fn record(&self, key: &SliceKey) -> Option<&ReviewRecord> {
        self.records.get(key)
    }

    pub fn is_viewed(&self, key: &SliceKey) -> bool {
        self.records.get(key).is_some_and(ReviewRecord::viewed)
    }

    pub fn mark_viewed(&mut self, key: &SliceKey, now: Timestamp) -> &ReviewRecord {
        let record = self.records.entry(key.clone()).or_default();
        record.mark_viewed(now);
        record
    }

    /// Validates `value` before touching the record. Does not mark the
    /// slice viewed.
    pub fn set_rating(&mut self, key: &SliceKey, value: i64, now: Timestamp) -> Result<&ReviewRecord, InvalidRatingError> {
        let rating = Rating::new(value)?;
        let record = self.records.entry(key.clone()).or_default();
        record.set_rating(rating, now);
        Ok(record)
    }

    /// Every record in key order.
    pub fn snapshot(&self) -> impl Iterator<Item = (&SliceKey, &ReviewRecord)> {
        self.records.iter()
    }

    /// Records eligible for the output table.
    pub fn viewed(&self) -> impl Iterator<Item = (&SliceKey, &ReviewRecord)> {
        self.records.iter().filter(|(_, r)| r.viewed())
    }

    pub fn viewed_count(&self) -> usize {
        self.viewed().count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
