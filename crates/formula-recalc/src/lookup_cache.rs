use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use formula_model::{CellId, SheetId, SheetRange};

use crate::value::Value;

/// How a lookup searches its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    /// First position equal to the needle (`MATCH(..,0)`, `VLOOKUP(..,FALSE)`).
    Exact,
    /// Largest value `<=` the needle in ascending data (`MATCH(..,1)`, `VLOOKUP(..,TRUE)`).
    SortedAscending,
}

/// Cache key: a single-row or single-column vector plus the query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub range: SheetRange,
    pub shape: QueryShape,
}

impl LookupKey {
    /// 0-based position of `cell` within the vector.
    pub fn position_of(&self, cell: CellId) -> u32 {
        let start = self.range.range.start;
        if self.range.range.width() == 1 {
            cell.row() - start.row
        } else {
            cell.col() - start.col
        }
    }
}

/// Hashable form of a lookup needle. Text matches case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyValue {
    Number(u64),
    Text(Box<str>),
    Bool(bool),
}

impl KeyValue {
    fn from_value(v: &Value) -> Option<KeyValue> {
        match v {
            // Normalize -0.0 so it matches 0.0.
            Value::Number(n) => Some(KeyValue::Number((n + 0.0).to_bits())),
            Value::Text(s) => Some(KeyValue::Text(s.to_lowercase().into_boxed_str())),
            Value::Bool(b) => Some(KeyValue::Bool(*b)),
            Value::Blank | Value::Error(_) => None,
        }
    }
}

/// A derived index over one lookup vector.
#[derive(Debug, Clone)]
pub struct LookupIndex(IndexKind);

#[derive(Debug, Clone)]
enum IndexKind {
    Exact(AHashMap<KeyValue, u32>),
    Sorted {
        numbers: Vec<(f64, u32)>,
        texts: Vec<(String, u32)>,
    },
}

impl LookupIndex {
    /// Build from `(position, value)` pairs in position order.
    pub fn build(shape: QueryShape, entries: Vec<(u32, Value)>) -> LookupIndex {
        match shape {
            QueryShape::Exact => {
                let mut map = AHashMap::with_capacity(entries.len());
                for (pos, v) in entries {
                    if let Some(key) = KeyValue::from_value(&v) {
                        map.entry(key).or_insert(pos);
                    }
                }
                LookupIndex(IndexKind::Exact(map))
            }
            QueryShape::SortedAscending => {
                let mut numbers = Vec::new();
                let mut texts = Vec::new();
                for (pos, v) in entries {
                    match v {
                        Value::Number(n) => numbers.push((n, pos)),
                        Value::Text(s) => texts.push((s.to_lowercase(), pos)),
                        _ => {}
                    }
                }
                LookupIndex(IndexKind::Sorted { numbers, texts })
            }
        }
    }

    pub fn find(&self, needle: &Value) -> Option<u32> {
        match &self.0 {
            IndexKind::Exact(map) => map.get(&KeyValue::from_value(needle)?).copied(),
            IndexKind::Sorted { numbers, texts } => match needle {
                Value::Number(n) => {
                    let i = numbers.partition_point(|(v, _)| *v <= *n);
                    i.checked_sub(1).map(|i| numbers[i].1)
                }
                Value::Text(s) => {
                    let s = s.to_lowercase();
                    let i = texts.partition_point(|(v, _)| v.as_str() <= s.as_str());
                    i.checked_sub(1).map(|i| texts[i].1)
                }
                _ => None,
            },
        }
    }
}

/// Workbook-owned cache of lookup indexes.
///
/// Entries live until a value write or structural edit intersecting their range removes them,
/// or until the owner clears the cache. Group workers share it, so it is a concurrent map.
#[derive(Debug, Default)]
pub struct LookupCache {
    entries: DashMap<LookupKey, Arc<LookupIndex>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since the cache was created.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Return the cached index for `key`, building it with `build` on a miss.
    ///
    /// The map is not locked while `build` runs; two workers missing the same key at once both
    /// build it and the first insert wins.
    pub fn get_or_build<E>(
        &self,
        key: LookupKey,
        build: impl FnOnce() -> Result<LookupIndex, E>,
    ) -> Result<Arc<LookupIndex>, E> {
        if let Some(index) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(index.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let index = Arc::new(build()?);
        Ok(self.entries.entry(key).or_insert(index).clone())
    }

    /// Drop every entry whose range intersects `range`.
    pub fn invalidate(&self, range: &SheetRange) {
        self.entries.retain(|key, _| !key.range.intersects(range));
    }

    pub fn invalidate_sheet(&self, sheet: SheetId) {
        self.entries.retain(|key, _| !key.range.contains_sheet(sheet));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_model::Range;

    fn key(a1: &str, shape: QueryShape) -> LookupKey {
        LookupKey {
            range: SheetRange::new(0, Range::from_a1(a1).unwrap()),
            shape,
        }
    }

    fn entries() -> Vec<(u32, Value)> {
        vec![
            (0, Value::from(10.0)),
            (1, Value::from("Pear")),
            (2, Value::from(20.0)),
            (3, Value::from(10.0)),
            (5, Value::from(40.0)),
        ]
    }

    #[test]
    fn exact_index_returns_first_match() {
        let index = LookupIndex::build(QueryShape::Exact, entries());
        assert_eq!(index.find(&Value::from(10.0)), Some(0));
        assert_eq!(index.find(&Value::from("pear")), Some(1));
        assert_eq!(index.find(&Value::from(30.0)), None);
        assert_eq!(index.find(&Value::Blank), None);
    }

    #[test]
    fn sorted_index_finds_largest_not_greater() {
        let sorted = vec![
            (0, Value::from(1.0)),
            (1, Value::from(5.0)),
            (2, Value::from(9.0)),
        ];
        let index = LookupIndex::build(QueryShape::SortedAscending, sorted);
        assert_eq!(index.find(&Value::from(0.5)), None);
        assert_eq!(index.find(&Value::from(5.0)), Some(1));
        assert_eq!(index.find(&Value::from(7.0)), Some(1));
        assert_eq!(index.find(&Value::from(100.0)), Some(2));
    }

    #[test]
    fn cache_hits_until_an_intersecting_edit() {
        let cache = LookupCache::new();
        let k = key("A1:A6", QueryShape::Exact);
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .get_or_build::<()>(k, || {
                    builds += 1;
                    Ok(LookupIndex::build(k.shape, entries()))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.stats(), (2, 1));

        cache.invalidate(&SheetRange::new(0, Range::from_a1("B1:B10").unwrap()));
        assert_eq!(cache.len(), 1);
        cache.invalidate(&SheetRange::new(0, Range::from_a1("A6").unwrap()));
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let cache = LookupCache::new();
        let k = key("A1:A6", QueryShape::SortedAscending);
        assert_eq!(cache.get_or_build(k, || Err("dirty")).err(), Some("dirty"));
        assert!(cache.is_empty());
    }
}
