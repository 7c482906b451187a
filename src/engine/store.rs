use ulid::Ulid;

use crate::dates::{DateSpan, Day};
use crate::model::*;

use super::conflict::{check_overlap, validate_range};
use super::EngineError;

/// One property's price ranges, sorted by `span.start`, pairwise disjoint.
///
/// Because no two ranges share a night, both starts and ends are ascending, which is
/// what lets every lookup here binary-search instead of scanning.
#[derive(Debug, Clone, Default)]
pub struct RangeStore {
    ranges: Vec<PriceRange>,
}

impl RangeStore {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Build from unordered rows, rejecting the first one that breaks the invariant.
    pub fn from_ranges(rows: impl IntoIterator<Item = PriceRange>) -> Result<Self, EngineError> {
        let mut rows: Vec<PriceRange> = rows.into_iter().collect();
        rows.sort_by_key(|r| r.span.start);
        let mut store = Self::new();
        for r in rows {
            store.insert(r)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceRange> {
        self.ranges.iter()
    }

    pub fn get(&self, id: Ulid) -> Option<&PriceRange> {
        self.ranges.iter().find(|r| r.id == id)
    }

    /// The range covering `day`, if any.
    pub fn range_at(&self, day: Day) -> Option<&PriceRange> {
        let idx = self.ranges.partition_point(|r| r.span.start <= day);
        idx.checked_sub(1)
            .map(|i| &self.ranges[i])
            .filter(|r| r.span.contains_day(day))
    }

    pub fn status_at(&self, day: Day) -> DayStatus {
        match self.range_at(day) {
            None => DayStatus::Uncovered,
            Some(r) if r.available => DayStatus::Available(r.price),
            Some(_) => DayStatus::Unavailable,
        }
    }

    /// Ranges sharing at least one night with `query`, ascending.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &PriceRange> {
        // Ends ascend too, so everything before `left` ends on or before query.start.
        let left = self.ranges.partition_point(|r| r.span.end <= query.start);
        let right = self.ranges.partition_point(|r| r.span.start < query.end);
        self.ranges[left..right.max(left)].iter()
    }

    pub fn ranges_overlapping(&self, query: &DateSpan) -> Vec<PriceRange> {
        self.overlapping(query).cloned().collect()
    }

    /// Ranges that still have nights on or after `day`, ascending.
    pub fn ranges_from(&self, day: Day) -> impl Iterator<Item = &PriceRange> {
        let left = self.ranges.partition_point(|r| r.span.end <= day);
        self.ranges[left..].iter()
    }

    /// Would `range` be accepted by [`RangeStore::insert`]?
    pub fn check_insert(&self, range: &PriceRange) -> Result<(), EngineError> {
        validate_range(range)?;
        if self.get(range.id).is_some() {
            return Err(EngineError::AlreadyExists(range.id));
        }
        match check_overlap(self, &range.span, None) {
            Some(conflict) => Err(conflict.into()),
            None => Ok(()),
        }
    }

    /// Would replacing the stored range with `range.id` by `range` be accepted?
    pub fn check_replace(&self, range: &PriceRange) -> Result<(), EngineError> {
        validate_range(range)?;
        if self.get(range.id).is_none() {
            return Err(EngineError::NotFound(range.id));
        }
        match check_overlap(self, &range.span, Some(range.id)) {
            Some(conflict) => Err(conflict.into()),
            None => Ok(()),
        }
    }

    pub fn insert(&mut self, range: PriceRange) -> Result<Ulid, EngineError> {
        self.check_insert(&range)?;
        let id = range.id;
        self.insert_sorted(range);
        Ok(id)
    }

    /// Apply `patch` to the range `id`, re-checking overlap against every other range.
    pub fn update(&mut self, id: Ulid, patch: &RangePatch) -> Result<PriceRange, EngineError> {
        let current = self.get(id).ok_or(EngineError::NotFound(id))?;
        let next = patch.apply_to(current);
        self.replace(next.clone())?;
        Ok(next)
    }

    pub fn replace(&mut self, range: PriceRange) -> Result<(), EngineError> {
        self.check_replace(&range)?;
        self.remove(range.id);
        self.insert_sorted(range);
        Ok(())
    }

    pub fn delete(&mut self, id: Ulid) -> Result<PriceRange, EngineError> {
        self.remove(id).ok_or(EngineError::NotFound(id))
    }

    fn insert_sorted(&mut self, range: PriceRange) {
        let pos = self
            .ranges
            .binary_search_by_key(&range.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.ranges.insert(pos, range);
    }

    fn remove(&mut self, id: Ulid) -> Option<PriceRange> {
        let pos = self.ranges.iter().position(|r| r.id == id)?;
        Some(self.ranges.remove(pos))
    }
}
