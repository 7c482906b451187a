//! Interactive range editing: a host clicks days on a calendar, picks a price and an
//! availability flag, and saves.
//!
//! Selections are inclusive (`first..=last` night, which is what a calendar shows).
//! They become half-open [`DateSpan`]s when a write is built, and nowhere else.

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::dates::{format_day, DateSpan, Day};
use crate::engine::{check_overlap, Conflict, RangeStore};
use crate::limits::MAX_NIGHTLY_PRICE;
use crate::model::PriceRange;

/// A write the editor wants persisted. See `Engine::apply_range_write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeWrite {
    Create(PriceRange),
    Update(PriceRange),
    Delete(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorState {
    Idle,
    StartPicked {
        first: Day,
    },
    RangePicked {
        first: Day,
        last: Day,
    },
    /// An existing range loaded for change. `first..=last` is the edited selection.
    Editing {
        original: PriceRange,
        first: Day,
        last: Day,
    },
    /// Waiting for the caller to persist `write`. `resume` is where a failed save lands.
    Saving {
        write: RangeWrite,
        resume: Box<EditorState>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    /// A save is in flight.
    Busy,
    NothingSelected,
    NotEditing,
    NotSaving,
    InvalidPrice(Decimal),
    Conflict(Conflict),
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::Busy => write!(f, "a save is in progress"),
            EditorError::NothingSelected => write!(f, "no complete selection to save"),
            EditorError::NotEditing => write!(f, "no existing range is loaded"),
            EditorError::NotSaving => write!(f, "no save is in progress"),
            EditorError::InvalidPrice(p) => write!(f, "price {p} is out of range"),
            EditorError::Conflict(c) => write!(
                f,
                "selection overlaps range {} ({} to {})",
                c.range_id,
                format_day(c.span.start),
                format_day(c.span.last_night())
            ),
        }
    }
}

impl std::error::Error for EditorError {}

/// One host's editing session. Owned by the caller; nothing here touches the engine.
#[derive(Debug, Clone)]
pub struct RangeEditor {
    state: EditorState,
    available: bool,
    price: Decimal,
}

impl Default for RangeEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeEditor {
    pub fn new() -> Self {
        Self {
            state: EditorState::Idle,
            available: true,
            price: Decimal::ZERO,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Selected nights as a half-open span, if a complete selection exists.
    pub fn selection(&self) -> Option<DateSpan> {
        match &self.state {
            EditorState::RangePicked { first, last } | EditorState::Editing { first, last, .. } => {
                DateSpan::from_inclusive(*first, *last)
            }
            _ => None,
        }
    }

    /// A click on `day` of the calendar backed by `store`.
    pub fn click(&mut self, day: Day, store: &RangeStore) -> Result<(), EditorError> {
        let next = match &self.state {
            EditorState::Saving { .. } => return Err(EditorError::Busy),
            EditorState::Idle => match store.range_at(day) {
                Some(range) => {
                    self.available = range.available;
                    self.price = range.price;
                    EditorState::Editing {
                        original: range.clone(),
                        first: range.span.start,
                        last: range.span.last_night(),
                    }
                }
                None => EditorState::StartPicked { first: day },
            },
            EditorState::StartPicked { first } if day < *first => EditorState::RangePicked {
                first: day,
                last: *first,
            },
            EditorState::StartPicked { first } => EditorState::RangePicked {
                first: *first,
                last: day,
            },
            EditorState::RangePicked { .. } => EditorState::StartPicked { first: day },
            EditorState::Editing {
                original,
                first,
                last,
            } => {
                let (first, last) = if day < *first {
                    (day, *last)
                } else {
                    (*first, day)
                };
                EditorState::Editing {
                    original: original.clone(),
                    first,
                    last,
                }
            }
        };
        self.state = next;
        Ok(())
    }

    pub fn set_price(&mut self, price: Decimal) -> Result<(), EditorError> {
        self.ensure_idle_save()?;
        self.price = price;
        Ok(())
    }

    pub fn set_available(&mut self, available: bool) -> Result<(), EditorError> {
        self.ensure_idle_save()?;
        self.available = available;
        Ok(())
    }

    /// Build the create/update for the current selection and enter `Saving`.
    ///
    /// An overlap leaves the state untouched and reports the range in the way.
    pub fn submit(&mut self, store: &RangeStore) -> Result<RangeWrite, EditorError> {
        self.ensure_idle_save()?;
        if self.price < Decimal::ZERO || self.price > Decimal::from(MAX_NIGHTLY_PRICE) {
            return Err(EditorError::InvalidPrice(self.price));
        }
        let span = self.selection().ok_or(EditorError::NothingSelected)?;
        let (id, exclude) = match &self.state {
            EditorState::Editing { original, .. } => (original.id, Some(original.id)),
            _ => (Ulid::new(), None),
        };
        if let Some(conflict) = check_overlap(store, &span, exclude) {
            return Err(EditorError::Conflict(conflict));
        }
        let range = PriceRange {
            id,
            span,
            available: self.available,
            price: self.price,
        };
        let write = if exclude.is_some() {
            RangeWrite::Update(range)
        } else {
            RangeWrite::Create(range)
        };
        self.enter_saving(write.clone());
        Ok(write)
    }

    /// Delete the loaded range.
    pub fn delete(&mut self) -> Result<RangeWrite, EditorError> {
        self.ensure_idle_save()?;
        let EditorState::Editing { original, .. } = &self.state else {
            return Err(EditorError::NotEditing);
        };
        let write = RangeWrite::Delete(original.id);
        self.enter_saving(write.clone());
        Ok(write)
    }

    /// The write was persisted.
    pub fn complete(&mut self) -> Result<(), EditorError> {
        if !matches!(self.state, EditorState::Saving { .. }) {
            return Err(EditorError::NotSaving);
        }
        self.reset();
        Ok(())
    }

    /// The write was refused downstream; go back to the selection it came from.
    pub fn save_failed(&mut self) -> Result<(), EditorError> {
        let state = std::mem::replace(&mut self.state, EditorState::Idle);
        match state {
            EditorState::Saving { resume, .. } => {
                self.state = *resume;
                Ok(())
            }
            other => {
                self.state = other;
                Err(EditorError::NotSaving)
            }
        }
    }

    pub fn clear(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn ensure_idle_save(&self) -> Result<(), EditorError> {
        match self.state {
            EditorState::Saving { .. } => Err(EditorError::Busy),
            _ => Ok(()),
        }
    }

    fn enter_saving(&mut self, write: RangeWrite) {
        let resume = std::mem::replace(&mut self.state, EditorState::Idle);
        self.state = EditorState::Saving {
            write,
            resume: Box::new(resume),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_day;

    fn day(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    fn store_with(first: &str, end: &str) -> (RangeStore, PriceRange) {
        let range = PriceRange {
            id: Ulid::new(),
            span: DateSpan::new(day(first), day(end)),
            available: true,
            price: Decimal::new(100, 0),
        };
        let mut store = RangeStore::new();
        store.insert(range.clone()).unwrap();
        (store, range)
    }

    #[test]
    fn pick_two_days_and_create() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        assert_eq!(editor.state(), &EditorState::StartPicked { first: day("2025-06-01") });
        editor.click(day("2025-06-03"), &store).unwrap();
        editor.set_price(Decimal::new(80, 0)).unwrap();

        let RangeWrite::Create(range) = editor.submit(&store).unwrap() else {
            panic!("expected a create");
        };
        // Inclusive 1st..=3rd is three nights, checkout on the 4th.
        assert_eq!(range.span, DateSpan::new(day("2025-06-01"), day("2025-06-04")));
        assert_eq!(range.price, Decimal::new(80, 0));
        assert!(matches!(editor.state(), EditorState::Saving { .. }));

        editor.complete().unwrap();
        assert_eq!(editor.state(), &EditorState::Idle);
    }

    #[test]
    fn earlier_second_click_swaps() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-10"), &store).unwrap();
        editor.click(day("2025-06-07"), &store).unwrap();
        assert_eq!(
            editor.state(),
            &EditorState::RangePicked {
                first: day("2025-06-07"),
                last: day("2025-06-10"),
            }
        );
        assert_eq!(editor.selection().unwrap().nights(), 4);
    }

    #[test]
    fn single_day_selection_is_one_night() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-10"), &store).unwrap();
        editor.click(day("2025-06-10"), &store).unwrap();
        assert_eq!(editor.selection().unwrap().nights(), 1);
    }

    #[test]
    fn third_click_starts_over() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        editor.click(day("2025-06-05"), &store).unwrap();
        editor.click(day("2025-07-01"), &store).unwrap();
        assert_eq!(editor.state(), &EditorState::StartPicked { first: day("2025-07-01") });
    }

    #[test]
    fn click_on_existing_range_loads_it() {
        let (store, range) = store_with("2025-06-01", "2025-06-10");
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-04"), &store).unwrap();
        let EditorState::Editing { original, first, last } = editor.state() else {
            panic!("expected editing");
        };
        assert_eq!(original, &range);
        assert_eq!(*first, day("2025-06-01"));
        assert_eq!(*last, day("2025-06-09"));
        assert_eq!(editor.price(), Decimal::new(100, 0));
    }

    #[test]
    fn editing_moves_nearest_boundary_and_updates_in_place() {
        let (store, range) = store_with("2025-06-01", "2025-06-10");
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-04"), &store).unwrap();
        editor.click(day("2025-05-28"), &store).unwrap();
        editor.click(day("2025-06-12"), &store).unwrap();
        assert_eq!(
            editor.selection(),
            Some(DateSpan::new(day("2025-05-28"), day("2025-06-13")))
        );

        // Overlaps only itself, which is excluded.
        let write = editor.submit(&store).unwrap();
        let RangeWrite::Update(updated) = write else {
            panic!("expected an update");
        };
        assert_eq!(updated.id, range.id);
    }

    #[test]
    fn overlapping_create_keeps_state_and_reports_conflict() {
        let (store, range) = store_with("2025-06-05", "2025-06-10");
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        editor.click(day("2025-06-05"), &store).unwrap();
        let before = editor.state().clone();

        let err = editor.submit(&store).unwrap_err();
        assert_eq!(
            err,
            EditorError::Conflict(Conflict {
                range_id: range.id,
                span: range.span,
            })
        );
        assert_eq!(editor.state(), &before);
    }

    #[test]
    fn ending_the_night_before_an_existing_range_is_fine() {
        let (store, _) = store_with("2025-06-05", "2025-06-10");
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        editor.click(day("2025-06-04"), &store).unwrap();
        assert!(editor.submit(&store).is_ok());
    }

    #[test]
    fn delete_requires_a_loaded_range() {
        let (store, range) = store_with("2025-06-01", "2025-06-10");
        let mut editor = RangeEditor::new();
        assert_eq!(editor.delete().unwrap_err(), EditorError::NotEditing);

        editor.click(day("2025-06-02"), &store).unwrap();
        assert_eq!(editor.delete().unwrap(), RangeWrite::Delete(range.id));
    }

    #[test]
    fn failed_save_returns_to_selection() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        editor.click(day("2025-06-02"), &store).unwrap();
        let picked = editor.state().clone();
        editor.submit(&store).unwrap();

        assert_eq!(editor.click(day("2025-06-09"), &store), Err(EditorError::Busy));
        editor.save_failed().unwrap();
        assert_eq!(editor.state(), &picked);
        assert_eq!(editor.complete(), Err(EditorError::NotSaving));
    }

    #[test]
    fn negative_price_is_refused_before_saving() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-01"), &store).unwrap();
        editor.click(day("2025-06-02"), &store).unwrap();
        editor.set_price(Decimal::new(-1, 0)).unwrap();
        assert!(matches!(editor.submit(&store), Err(EditorError::InvalidPrice(_))));
        assert!(matches!(editor.state(), EditorState::RangePicked { .. }));

        editor.set_price(Decimal::MAX).unwrap();
        assert!(matches!(editor.submit(&store), Err(EditorError::InvalidPrice(_))));
    }

    #[test]
    fn clear_from_anywhere() {
        let (store, _) = store_with("2025-06-01", "2025-06-10");
        let mut editor = RangeEditor::new();
        editor.click(day("2025-06-02"), &store).unwrap();
        editor.set_available(false).unwrap();
        editor.clear();
        assert_eq!(editor.state(), &EditorState::Idle);
        assert!(editor.available());
    }

    #[test]
    fn submit_without_selection() {
        let store = RangeStore::new();
        let mut editor = RangeEditor::new();
        assert_eq!(editor.submit(&store), Err(EditorError::NothingSelected));
        editor.click(day("2025-06-01"), &store).unwrap();
        assert_eq!(editor.submit(&store), Err(EditorError::NothingSelected));
    }
}
