//! Keys, key paths and key ranges.
//!
//! Records are JSON documents. A [`Key`] is derived from a record through a
//! [`KeyPath`] (in-line keys) or supplied next to it (out-of-line keys).
//!
//! ## Ordering
//!
//! Keys of different types never compare equal:
//!
//! ```text
//! Number < String < Array
//! ```
//!
//! Numbers compare numerically, strings by code point, arrays element by
//! element with the shorter array first on a common prefix.

use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// Largest integer that round-trips through an `f64` without loss.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A record key.
///
/// Deserialization goes through [`Key::from_value`], so `-0` arrives as `0`
/// and NaN or infinite numbers are refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, try_from = "serde_json::Value")]
pub enum Key {
    /// A finite number. `-0` is stored as `0`.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered list of keys (compound key).
    Array(Vec<Key>),
}

impl Key {
    /// Creates a numeric key.
    ///
    /// # Errors
    ///
    /// Returns a data error for NaN or infinite values.
    pub fn number(n: f64) -> HostResult<Self> {
        if !n.is_finite() {
            return Err(HostError::data(format!("{n} is not a valid key")));
        }
        Ok(Self::Number(normalize(n)))
    }

    /// Converts a JSON value into a key.
    ///
    /// Returns `None` if the value (or any array element) is not a valid key.
    /// Integers beyond `2^53 - 1` are not keys: they would lose precision.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Self::safe_integer(i.unsigned_abs())
                        .then(|| Self::Number(normalize(i as f64)));
                }
                if let Some(u) = n.as_u64() {
                    return Self::safe_integer(u).then(|| Self::Number(u as f64));
                }
                let n = n.as_f64()?;
                n.is_finite().then(|| Self::Number(normalize(n)))
            }
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            _ => None,
        }
    }

    /// Converts the key into a JSON value. Integral numbers become JSON integers.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                Value::from(*n as i64)
            }
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// Returns the numeric value if this is a number key.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn safe_integer(magnitude: u64) -> bool {
        magnitude <= MAX_SAFE_INTEGER as u64
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::String(_) => 1,
            Self::Array(_) => 2,
        }
    }
}

fn normalize(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Number(normalize(f64::from(n)))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl TryFrom<i64> for Key {
    type Error = HostError;

    fn try_from(n: i64) -> HostResult<Self> {
        if !Self::safe_integer(n.unsigned_abs()) {
            return Err(HostError::data(format!(
                "{n} is outside the exact integer key range"
            )));
        }
        Ok(Self::Number(normalize(n as f64)))
    }
}

impl TryFrom<u64> for Key {
    type Error = HostError;

    fn try_from(n: u64) -> HostResult<Self> {
        if !Self::safe_integer(n) {
            return Err(HostError::data(format!(
                "{n} is outside the exact integer key range"
            )));
        }
        Ok(Self::Number(n as f64))
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Self::Array(items)
    }
}

impl TryFrom<f64> for Key {
    type Error = HostError;

    fn try_from(n: f64) -> HostResult<Self> {
        Self::number(n)
    }
}

impl TryFrom<Value> for Key {
    type Error = HostError;

    fn try_from(value: Value) -> HostResult<Self> {
        Self::from_value(&value)
            .ok_or_else(|| HostError::data(format!("{value} is not a valid key")))
    }
}

/// A path used to derive a key from a record.
///
/// A single path is a dot-separated list of property names; the empty
/// string designates the record itself. A compound path evaluates each
/// element and yields an array key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A single dotted path.
    Single(String),
    /// Several dotted paths combined into an array key.
    Compound(Vec<String>),
}

impl KeyPath {
    /// Creates a compound key path.
    pub fn compound<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Compound(paths.into_iter().map(Into::into).collect())
    }

    /// Returns true for compound key paths.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound(_))
    }

    /// Returns true for the empty single path (the record itself).
    #[must_use]
    pub fn is_empty_path(&self) -> bool {
        matches!(self, Self::Single(p) if p.is_empty())
    }

    /// Checks the path is well formed.
    ///
    /// Single paths must be empty or consist of non-empty segments. Compound
    /// paths must contain at least one element and no empty element.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Single(p) => p.is_empty() || valid_segments(p),
            Self::Compound(paths) => !paths.is_empty() && paths.iter().all(|p| valid_segments(p)),
        }
    }

    /// Derives a key from a record.
    ///
    /// Returns `None` if a property is missing or not a valid key.
    #[must_use]
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            Self::Single(path) => resolve(value, path).and_then(Key::from_value),
            Self::Compound(paths) => paths
                .iter()
                .map(|p| resolve(value, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Returns the raw value a single path points at.
    #[must_use]
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Single(path) => resolve(value, path),
            Self::Compound(_) => None,
        }
    }

    /// Derives index keys from a record.
    ///
    /// With `multi_entry` and an array value, each valid element becomes a
    /// key (duplicates removed). Otherwise at most one key is produced.
    #[must_use]
    pub fn index_keys(&self, value: &Value, multi_entry: bool) -> Vec<Key> {
        if multi_entry {
            if let Some(Value::Array(items)) = self.resolve(value) {
                let mut keys: Vec<Key> = items.iter().filter_map(Key::from_value).collect();
                keys.sort();
                keys.dedup();
                return keys;
            }
        }
        self.extract(value).into_iter().collect()
    }

    /// Writes a generated key into a record at this path.
    ///
    /// Missing intermediate objects are created.
    ///
    /// # Errors
    ///
    /// Returns a data error for compound or empty paths, or if a non-object
    /// value sits on the path.
    pub fn inject(&self, value: &mut Value, key: &Key) -> HostResult<()> {
        let path = match self {
            Self::Single(p) if !p.is_empty() => p,
            _ => return Err(HostError::data("cannot inject a key through this key path")),
        };

        let mut segments = path.split('.').peekable();
        let mut current = value;
        while let Some(segment) = segments.next() {
            let object = current
                .as_object_mut()
                .ok_or_else(|| HostError::data(format!("cannot inject key at `{path}`")))?;
            if segments.peek().is_none() {
                object.insert(segment.to_owned(), key.to_value());
                return Ok(());
            }
            current = object
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        Ok(())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(p) => write!(f, "{p:?}"),
            Self::Compound(paths) => write!(f, "{paths:?}"),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::Single(path.to_owned())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        Self::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        Self::compound(paths)
    }
}

fn valid_segments(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(|s| !s.is_empty() && !s.contains(char::is_whitespace))
}

fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// A range containing exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// All keys above `key` (excluding it when `open`).
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// All keys below `key` (excluding it when `open`).
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns a data error if `lower > upper`, or if they are equal and
    /// either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> HostResult<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(HostError::data(format!(
                    "lower bound {lower} is greater than upper bound {upper}"
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(HostError::data(format!(
                    "range over {lower} with an open end is empty"
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: bound(lower, lower_open),
            upper: bound(upper, upper_open),
        })
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Returns the bounds in the form accepted by `BTreeMap::range`.
    #[must_use]
    pub fn bounds(&self) -> (Bound<&Key>, Bound<&Key>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
