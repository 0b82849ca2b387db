//! Keys, key paths and key ranges.

use crate::error::{EngineError, EngineResult};
use serde_json::Value;
use std::fmt;
use std::ops::Bound;

/// A stored record.
///
/// Records written to a partition must be JSON objects carrying a valid
/// key at the partition's key path.
pub type Record = Value;

/// A partition or index key.
///
/// Keys are totally ordered: every integer sorts before every string, and
/// every string before every array. Arrays compare element-wise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// String key.
    Text(String),
    /// Compound key.
    Array(Vec<Key>),
}

impl Key {
    /// Converts a JSON value into a key.
    ///
    /// # Errors
    ///
    /// Returns a data error for floats, booleans, null, objects, and
    /// integers outside the `i64` range.
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Key::Int)
                .ok_or_else(|| EngineError::data(format!("{n} is not a valid key"))),
            Value::String(s) => Ok(Key::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<EngineResult<Vec<_>>>()
                .map(Key::Array),
            other => Err(EngineError::data(format!("{other} is not a valid key"))),
        }
    }

    /// Converts the key back into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::from(s.as_str()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// A dot-separated path to the attribute holding a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    raw: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// Parses a key path such as `"id"` or `"meta.owner"`.
    ///
    /// # Errors
    ///
    /// Returns a data error if the path is empty or has an empty segment.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        if raw.is_empty() {
            return Err(EngineError::data("key path is empty"));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(EngineError::data(format!("malformed key path {raw:?}")));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks the path through nested objects.
    #[must_use]
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(record, |value, segment| value.as_object()?.get(segment))
    }

    /// Extracts the key a record is stored under.
    ///
    /// # Errors
    ///
    /// Returns a data error if the record is not an object or the path does
    /// not resolve to a valid key.
    pub fn extract(&self, record: &Value) -> EngineResult<Key> {
        if !record.is_object() {
            return Err(EngineError::data("record is not an object"));
        }
        let value = self.resolve(record).ok_or_else(|| {
            EngineError::data(format!("record has no value at key path {:?}", self.raw))
        })?;
        Key::from_value(value)
    }

    /// Extracts an index key, or `None` when the record is not indexable.
    #[must_use]
    pub fn extract_optional(&self, record: &Value) -> Option<Key> {
        self.resolve(record)
            .and_then(|value| Key::from_value(value).ok())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A contiguous range of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// A range covering every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range covering exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// A range with only a lower bound.
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// A range with only an upper bound.
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// A range with both bounds.
    ///
    /// # Errors
    ///
    /// Returns a data error if `lower` sorts after `upper`, or if they are
    /// equal and either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> EngineResult<Self> {
        let lower = lower.into();
        let upper = upper.into();
        if lower > upper {
            return Err(EngineError::data(format!(
                "lower bound {lower} is greater than upper bound {upper}"
            )));
        }
        if lower == upper && (lower_open || upper_open) {
            return Err(EngineError::data(format!(
                "range on {lower} excludes its only key"
            )));
        }
        Ok(Self {
            lower: bound(lower, lower_open),
            upper: bound(upper, upper_open),
        })
    }

    /// Returns true if `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Borrowed bounds, suitable for `BTreeMap::range`.
    #[must_use]
    pub fn bounds(&self) -> (Bound<&Key>, Bound<&Key>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        KeyRange::only(key)
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
