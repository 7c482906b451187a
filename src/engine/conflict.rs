use chrono::Datelike;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::dates::DateSpan;
use crate::limits::*;
use crate::model::*;

use super::store::RangeStore;
use super::EngineError;

/// The existing range a candidate collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub range_id: Ulid,
    pub span: DateSpan,
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        EngineError::Conflict {
            range_id: c.range_id,
            span: c.span,
        }
    }
}

/// Overlap guard: the first stored range sharing a night with `candidate`,
/// ignoring `exclude` (the range being edited).
pub fn check_overlap(
    ranges: &RangeStore,
    candidate: &DateSpan,
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    ranges
        .overlapping(candidate)
        .find(|r| Some(r.id) != exclude)
        .map(|r| Conflict {
            range_id: r.id,
            span: r.span,
        })
}

pub(crate) fn validate_span(span: &DateSpan, max_nights: u32) -> Result<(), EngineError> {
    if span.start.year() < MIN_VALID_YEAR || span.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if span.nights() > max_nights {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_price(price: Decimal) -> Result<(), EngineError> {
    if price < Decimal::ZERO || price > Decimal::from(MAX_NIGHTLY_PRICE) {
        return Err(EngineError::InvalidPrice(price));
    }
    Ok(())
}

pub(crate) fn validate_range(range: &PriceRange) -> Result<(), EngineError> {
    validate_span(&range.span, MAX_RANGE_NIGHTS)?;
    validate_price(range.price)
}

/// First pending/approved reservation sharing a night with `stay`.
pub(crate) fn check_no_reservation_conflict(
    ps: &PropertyState,
    stay: &DateSpan,
) -> Result<(), EngineError> {
    match ps.blocking_reservations(stay).next() {
        Some(existing) => Err(EngineError::ReservationConflict(existing.id)),
        None => Ok(()),
    }
}
