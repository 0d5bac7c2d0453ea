use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use crate::error::MalformedKeyError;

// Greedy head anchors on the rightmost `_slice_<digits>`.
fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<head>.+)_slice_(?P<slice>\d+)$").expect("static key pattern"))
}

/// Identifier of one reviewable slice, `{phonetic_id}_{series}_slice_{n}`.
///
/// Equality, hashing and ordering use the raw string only.
#[derive(Debug, Clone)]
pub struct SliceKey {
    raw: String,
    phonetic_id: String,
    series: String,
    slice_digits: String,
    slice_number: u64,
}

impl SliceKey {
    /// Parses a raw container key. `phonetic_id` may contain underscores;
    /// `series` is whatever follows the last underscore before `_slice_`.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = key_regex().captures(raw)?;
        let head = caps.name("head")?.as_str();
        let slice_digits = caps.name("slice")?.as_str();
        let (phonetic_id, series) = head.rsplit_once('_')?;
        if phonetic_id.is_empty() || series.is_empty() {
            return None;
        }
        let slice_number = slice_digits.parse::<u64>().ok()?;
        Some(Self {
            raw: raw.to_string(),
            phonetic_id: phonetic_id.to_string(),
            series: series.to_string(),
            slice_digits: slice_digits.to_string(),
            slice_number,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn phonetic_id(&self) -> &str {
        &self.phonetic_id
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn slice_number(&self) -> u64 {
        self.slice_number
    }

    /// Rebuilds the identifier from its parts. Zero padding in the slice
    /// number is kept, so this always equals [`SliceKey::as_str`].
    pub fn reassemble(&self) -> String {
        format!("{}_{}_slice_{}", self.phonetic_id, self.series, self.slice_digits)
    }
}

impl PartialEq for SliceKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for SliceKey {}

impl Hash for SliceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for SliceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SliceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The fixed, alphabetized ordering of all slices in a session.
#[derive(Debug, Clone, Default)]
pub struct KeyCatalog {
    keys: Vec<SliceKey>,
}

impl KeyCatalog {
    /// Deduplicates, sorts and parses the container listing. Every key that
    /// fails to parse is reported; none is silently dropped.
    pub fn build<I, S>(raw_keys: I) -> Result<Self, MalformedKeyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = raw_keys.into_iter().map(|k| k.as_ref().to_string()).collect();

        let mut keys = Vec::with_capacity(unique.len());
        let mut malformed = Vec::new();
        for raw in unique {
            match SliceKey::parse(&raw) {
                Some(key) => keys.push(key),
                None => malformed.push(raw),
            }
        }

        if malformed.is_empty() {
            Ok(Self { keys })
        } else {
            Err(MalformedKeyError { keys: malformed })
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SliceKey> {
        self.keys.get(index)
    }

    pub fn position(&self, raw: &str) -> Option<usize> {
        // Sorted by raw string.
        self.keys.binary_search_by(|k| k.as_str().cmp(raw)).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SliceKey> {
        self.keys.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_key() {
        let key = SliceKey::parse("p1_sax_slice_3").unwrap();
        assert_eq!(key.phonetic_id(), "p1");
        assert_eq!(key.series(), "sax");
        assert_eq!(key.slice_number(), 3);
    }

    #[test]
    fn phonetic_id_may_contain_underscores() {
        let key = SliceKey::parse("alpha_bravo_charlie_lax4ch_slice_12").unwrap();
        assert_eq!(key.phonetic_id(), "alpha_bravo_charlie");
        assert_eq!(key.series(), "lax4ch");
        assert_eq!(key.slice_number(), 12);
    }

    #[test]
    fn rightmost_slice_marker_wins() {
        let key = SliceKey::parse("p_slice_1_sax_slice_2").unwrap();
        assert_eq!(key.phonetic_id(), "p_slice_1");
        assert_eq!(key.series(), "sax");
        assert_eq!(key.slice_number(), 2);
    }

    #[test]
    fn reassemble_round_trips() {
        for raw in ["p1_sax_slice_0", "a_b_c_d_slice_10", "x_y_slice_007", "grp/p2_lax_slice_4"] {
            let key = SliceKey::parse(raw).unwrap();
            assert_eq!(key.reassemble(), raw);
        }
    }

    #[test]
    fn rejects_non_matching_keys() {
        for raw in ["abc_slice_x", "abc_slice_1", "p1_sax_slice_", "p1_sax", "_sax_slice_1", "p1__slice_1"] {
            assert!(SliceKey::parse(raw).is_none(), "{raw} should not parse");
        }
    }

    #[test]
    fn build_sorts_and_dedups() {
        let catalog = KeyCatalog::build(["p2_lax_slice_0", "p1_sax_slice_1", "p1_sax_slice_0", "p2_lax_slice_0"]).unwrap();
        let names: Vec<&str> = catalog.iter().map(SliceKey::as_str).collect();
        assert_eq!(names, vec!["p1_sax_slice_0", "p1_sax_slice_1", "p2_lax_slice_0"]);
        assert_eq!(catalog.position("p1_sax_slice_1"), Some(1));
        assert_eq!(catalog.position("nope_x_slice_1"), None);
    }

    #[test]
    fn build_reports_every_malformed_key() {
        let err = KeyCatalog::build(["zz_slice_q", "p1_sax_slice_0", "abc_slice_x"]).unwrap_err();
        assert_eq!(err.keys, vec!["abc_slice_x".to_string(), "zz_slice_q".to_string()]);
        assert!(err.to_string().contains("abc_slice_x"));
    }

    #[test]
    fn empty_listing_builds_empty_catalog() {
        let catalog = KeyCatalog::build(Vec::<String>::new()).unwrap();
        assert!(catalog.is_empty());
    }
}
