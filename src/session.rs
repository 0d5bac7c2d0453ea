//! Review session: one catalog, one store, one current position, and a
//! write-through sink. Every mutating event saves the full snapshot before
//! returning.

use tracing::{debug, error, info};

use crate::catalog::{KeyCatalog, SliceKey};
use crate::error::{Error, Result};
use crate::navigation::{NavCommand, Navigator};
use crate::record::{Rating, ReviewRecord, ReviewStore, Timestamp};
use crate::table::{CsvTable, ReviewSink};

/// Summary of the current slice for the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub key: String,
    pub viewed: bool,
    pub rating: Option<Rating>,
    pub index: usize,
    pub total: usize,
    pub viewed_total: usize,
}

pub struct ReviewSession<S: ReviewSink = CsvTable> {
    navigator: Navigator,
    store: ReviewStore,
    sink: S,
    pending_save: bool,
}

impl<S: ReviewSink> ReviewSession<S> {
    /// Starts a session positioned on the first slice. Nothing is marked
    /// viewed until the display layer reports the first landing.
    pub fn start(catalog: KeyCatalog, store: ReviewStore, sink: S) -> Result<Self> {
        if catalog.is_empty() {
            return Err(Error::EmptyCatalog);
        }
        info!(
            "review session started: {} slices, {} already viewed",
            catalog.len(),
            catalog.iter().filter(|k| store.is_viewed(k)).count()
        );
        Ok(Self {
            navigator: Navigator::new(catalog),
            store,
            sink,
            pending_save: false,
        })
    }

    pub fn current(&self) -> Result<&SliceKey> {
        self.navigator.current()
    }

    pub fn index(&self) -> usize {
        self.navigator.index()
    }

    pub fn catalog(&self) -> &KeyCatalog {
        self.navigator.catalog()
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn record(&self, key: &SliceKey) -> ReviewRecord {
        self.store.get(key)
    }

    /// `true` while the in-memory state holds changes the last save failed
    /// to persist.
    pub fn pending_save(&self) -> bool {
        self.pending_save
    }

    /// Moves the current position. Returns the key landed on, or `None` when
    /// the command left the position unchanged. The caller displays the
    /// slice and then reports it through [`ReviewSession::on_slice_displayed`].
    pub fn navigate(&mut self, command: &NavCommand) -> Result<Option<SliceKey>> {
        let store = &self.store;
        let moved = self.navigator.apply(command, |k| store.is_viewed(k))?;
        if !moved {
            return Ok(None);
        }
        let key = self.navigator.current()?.clone();
        debug!("navigated to {} ({:?})", key, command);
        Ok(Some(key))
    }

    /// Marks the current slice viewed and saves. `key` must be the current
    /// slice; a display report for any other key is stale.
    pub fn on_slice_displayed(&mut self, key: &str, now: Timestamp) -> Result<&ReviewRecord> {
        let current = self.expect_current(key)?;
        self.store.mark_viewed(&current, now);
        self.persist()?;
        self.stored(&current)
    }

    /// Rates the current slice and saves, even when the value is unchanged.
    /// Invalid values and slices not yet displayed are rejected without
    /// mutation or save.
    pub fn on_rating_changed(&mut self, key: &str, value: i64, now: Timestamp) -> Result<&ReviewRecord> {
        let current = self.expect_current(key)?;
        if !self.store.is_viewed(&current) {
            return Err(Error::NotViewed(key.to_string()));
        }
        self.store.set_rating(&current, value, now)?;
        self.persist()?;
        self.stored(&current)
    }

    /// Saves the snapshot again after a failure.
    pub fn retry_save(&mut self) -> Result<()> {
        self.persist()
    }

    /// `(key, viewed)` for every slice in catalog order, derived from the
    /// store on each call.
    pub fn dropdown_entries(&self) -> impl Iterator<Item = (&SliceKey, bool)> + '_ {
        self.catalog().iter().map(|k| (k, self.store.is_viewed(k)))
    }

    pub fn status(&self) -> Result<SessionStatus> {
        let key = self.current()?;
        let record = self.store.get(key);
        Ok(SessionStatus {
            key: key.to_string(),
            viewed: record.viewed(),
            rating: record.rating,
            index: self.index(),
            total: self.catalog().len(),
            viewed_total: self.catalog().iter().filter(|k| self.store.is_viewed(k)).count(),
        })
    }

    fn expect_current(&self, key: &str) -> Result<SliceKey> {
        let current = self.navigator.current()?;
        if current.as_str() != key {
            return Err(Error::NotCurrent {
                key: key.to_string(),
                current: current.to_string(),
            });
        }
        Ok(current.clone())
    }

    fn stored(&self, key: &SliceKey) -> Result<&ReviewRecord> {
        self.store
            .record(key)
            .ok_or_else(|| Error::UnknownKey(key.to_string()))
    }

    // In-memory state is kept on failure; the next successful save carries it.
    fn persist(&mut self) -> Result<()> {
        match self.sink.save(&self.store) {
            Ok(()) => {
                self.pending_save = false;
                Ok(())
            }
            Err(e) => {
                self.pending_save = true;
                error!("save failed, changes kept in memory: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io;

    /// Keeps a copy of every saved table.
    #[derive(Default)]
    struct RecordingSink {
        saves: Vec<Vec<(String, ReviewRecord)>>,
        fail: bool,
    }

    impl ReviewSink for RecordingSink {
        fn save(&mut self, store: &ReviewStore) -> Result<()> {
            if self.fail {
                return Err(Error::io(
                    "replace review table",
                    "qc.csv",
                    io::Error::new(io::ErrorKind::Other, "disk full"),
                ));
            }
            self.saves
                .push(store.viewed().map(|(k, r)| (k.to_string(), r.clone())).collect());
            Ok(())
        }
    }

    fn at(sec: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(9, 0, sec).unwrap()
    }

    fn session() -> ReviewSession<RecordingSink> {
        let catalog = KeyCatalog::build(["p2_lax_slice_0", "p1_sax_slice_1", "p1_sax_slice_0"]).unwrap();
        ReviewSession::start(catalog, ReviewStore::new(), RecordingSink::default()).unwrap()
    }

    #[test]
    fn empty_catalog_cannot_start() {
        let catalog = KeyCatalog::build(Vec::<String>::new()).unwrap();
        let result = ReviewSession::start(catalog, ReviewStore::new(), RecordingSink::default());
        assert!(matches!(result, Err(Error::EmptyCatalog)));
    }

    #[test]
    fn view_then_rate_saves_one_row() {
        let mut s = session();
        assert_eq!(s.current().unwrap().as_str(), "p1_sax_slice_0");
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        s.on_rating_changed("p1_sax_slice_0", 2, at(1)).unwrap();

        assert_eq!(s.sink().saves.len(), 2);
        let last = s.sink().saves.last().unwrap();
        assert_eq!(last.len(), 1);
        let (key, record) = &last[0];
        assert_eq!(key, "p1_sax_slice_0");
        assert_eq!(record.rating, Some(Rating::new(2).unwrap()));
        assert_eq!(record.first_viewed_at, Some(at(0)));
        assert_eq!(record.last_updated_at, Some(at(1)));
    }

    #[test]
    fn invalid_rating_does_not_save() {
        let mut s = session();
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        let before = s.record(s.current().unwrap());
        let err = s.on_rating_changed("p1_sax_slice_0", 5, at(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidRating(_)));
        assert_eq!(s.sink().saves.len(), 1);
        assert_eq!(s.record(s.current().unwrap()), before);
    }

    #[test]
    fn rating_before_display_is_rejected() {
        let mut s = session();
        let err = s.on_rating_changed("p1_sax_slice_0", 1, at(0)).unwrap_err();
        assert!(matches!(err, Error::NotViewed(_)));
        assert!(s.sink().saves.is_empty());
    }

    #[test]
    fn events_for_other_keys_are_rejected() {
        let mut s = session();
        let err = s.on_slice_displayed("p2_lax_slice_0", at(0)).unwrap_err();
        assert!(matches!(err, Error::NotCurrent { .. }));
        let err = s.on_rating_changed("p2_lax_slice_0", 1, at(0)).unwrap_err();
        assert!(matches!(err, Error::NotCurrent { .. }));
        assert!(s.sink().saves.is_empty());
        assert_eq!(s.store().viewed_count(), 0);
    }

    #[test]
    fn repeated_identical_rating_still_saves() {
        let mut s = session();
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        s.on_rating_changed("p1_sax_slice_0", 3, at(1)).unwrap();
        let record = s.on_rating_changed("p1_sax_slice_0", 3, at(2)).unwrap().clone();
        assert_eq!(s.sink().saves.len(), 3);
        assert_eq!(record.last_updated_at, Some(at(2)));
    }

    #[test]
    fn redisplay_saves_and_keeps_first_view() {
        let mut s = session();
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        s.navigate(&NavCommand::Next).unwrap();
        s.on_slice_displayed("p1_sax_slice_1", at(1)).unwrap();
        let landed = s.navigate(&NavCommand::Previous).unwrap().unwrap();
        let record = s.on_slice_displayed(landed.as_str(), at(5)).unwrap().clone();
        assert_eq!(record.first_viewed_at, Some(at(0)));
        assert_eq!(record.last_updated_at, Some(at(5)));
        assert_eq!(s.sink().saves.len(), 3);
    }

    #[test]
    fn noop_navigation_lands_nowhere() {
        let mut s = session();
        assert_eq!(s.navigate(&NavCommand::Previous).unwrap(), None);
        assert_eq!(s.navigate(&NavCommand::JumpTo("p1_sax_slice_0".into())).unwrap(), None);
        assert!(matches!(
            s.navigate(&NavCommand::JumpTo("nope_x_slice_0".into())),
            Err(Error::UnknownKey(_))
        ));
        assert!(s.sink().saves.is_empty());
    }

    #[test]
    fn next_unviewed_skips_viewed_and_wraps() {
        let mut s = session();
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        s.navigate(&NavCommand::JumpTo("p2_lax_slice_0".into())).unwrap();
        s.on_slice_displayed("p2_lax_slice_0", at(1)).unwrap();

        let landed = s.navigate(&NavCommand::NextUnviewed).unwrap().unwrap();
        assert_eq!(landed.as_str(), "p1_sax_slice_1");
        s.on_slice_displayed("p1_sax_slice_1", at(2)).unwrap();

        assert_eq!(s.navigate(&NavCommand::NextUnviewed).unwrap(), None);
        assert_eq!(s.index(), 1);
    }

    #[test]
    fn failed_save_keeps_state_until_retry() {
        let mut s = session();
        s.sink.fail = true;
        assert!(matches!(s.on_slice_displayed("p1_sax_slice_0", at(0)), Err(Error::Io { .. })));
        assert!(s.pending_save());
        assert!(s.store().is_viewed(s.current().unwrap()));

        s.sink.fail = false;
        s.retry_save().unwrap();
        assert!(!s.pending_save());
        assert_eq!(s.sink().saves[0].len(), 1);
    }

    #[test]
    fn dropdown_reflects_store() {
        let mut s = session();
        s.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        let entries: Vec<(String, bool)> = s.dropdown_entries().map(|(k, v)| (k.to_string(), v)).collect();
        assert_eq!(
            entries,
            vec![
                ("p1_sax_slice_0".to_string(), true),
                ("p1_sax_slice_1".to_string(), false),
                ("p2_lax_slice_0".to_string(), false),
            ]
        );
        let status = s.status().unwrap();
        assert_eq!(status.index, 0);
        assert_eq!(status.total, 3);
        assert_eq!(status.viewed_total, 1);
        assert!(status.viewed);
        assert_eq!(status.rating, None);
    }
}
