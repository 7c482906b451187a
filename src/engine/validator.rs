use ulid::Ulid;

use crate::dates::{is_before, parse_day, DateSpan, Day};
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_reservation_conflict, validate_span};
use super::error::{Policy, Rejection};
use super::pricing::{price_for_stay, StayQuote};
use super::EngineError;

/// Validation stages, in the order a request passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    DatesChecked,
    AvailabilityChecked,
    ConflictChecked,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::DatesChecked => "dates_checked",
            Stage::AvailabilityChecked => "availability_checked",
            Stage::ConflictChecked => "conflict_checked",
        };
        f.write_str(s)
    }
}

/// A booking request as it arrives. Dates are still raw `YYYY-MM-DD` text so that
/// missing and malformed values are judged here, not by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub property_id: Ulid,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub guests_count: i64,
}

impl ReservationRequest {
    pub fn for_stay(id: Ulid, property_id: Ulid, check_in: Day, check_out: Day, guests_count: i64) -> Self {
        Self {
            id,
            property_id,
            check_in: Some(crate::dates::format_day(check_in)),
            check_out: Some(crate::dates::format_day(check_out)),
            guests_count,
        }
    }
}

/// Outcome of a request that passed every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub stay: DateSpan,
    pub quote: StayQuote,
    pub guests_count: u32,
}

impl Accepted {
    pub fn into_reservation(self, request: &ReservationRequest, guest_id: Ulid) -> Reservation {
        Reservation {
            id: request.id,
            property_id: request.property_id,
            guest_id,
            stay: self.stay,
            guests_count: self.guests_count,
            total_price: self.quote.total_price,
            status: ReservationStatus::Pending,
        }
    }
}

/// Run a request through every stage. The first failure wins and names its stage.
///
/// The caller must hold the property's write lock from here until the reservation is
/// persisted, otherwise two requests for the same nights can both pass the conflict
/// stage.
pub fn validate(
    ps: &PropertyState,
    request: &ReservationRequest,
    caller: &Caller,
    today: Day,
) -> Result<Accepted, Rejection> {
    // Received
    let at = Stage::Received;
    let check_in = required_day("check_in", request.check_in.as_deref()).map_err(|e| Rejection::new(at, e))?;
    let check_out = required_day("check_out", request.check_out.as_deref()).map_err(|e| Rejection::new(at, e))?;
    if request.guests_count <= 0 {
        return Err(Rejection::new(
            at,
            EngineError::InvalidRequest("guests_count must be positive".into()),
        ));
    }
    let guests_count = u32::try_from(request.guests_count)
        .ok()
        .filter(|g| *g <= MAX_GUESTS)
        .ok_or_else(|| Rejection::new(at, EngineError::LimitExceeded("too many guests")))?;
    if !ps.facts.is_active {
        return Err(Rejection::new(at, EngineError::OutOfPolicy(Policy::InactiveProperty)));
    }
    if caller.id == ps.facts.host_id {
        return Err(Rejection::new(at, EngineError::OutOfPolicy(Policy::SelfBooking)));
    }

    // DatesChecked
    let at = Stage::DatesChecked;
    if is_before(check_in, today) {
        return Err(Rejection::new(
            at,
            EngineError::OutOfPolicy(Policy::PastCheckIn { check_in, today }),
        ));
    }
    let stay = DateSpan::try_new(check_in, check_out).ok_or_else(|| {
        Rejection::new(
            at,
            EngineError::InvalidDuration {
                start: check_in,
                end: check_out,
            },
        )
    })?;
    validate_span(&stay, MAX_STAY_NIGHTS).map_err(|e| Rejection::new(at, e))?;

    // AvailabilityChecked
    let at = Stage::AvailabilityChecked;
    let quote = price_for_stay(&ps.ranges, check_in, check_out);
    if let Some(reason) = quote.reason.filter(|_| !quote.valid) {
        return Err(Rejection::new(at, EngineError::Unavailable(reason)));
    }
    if quote.nights < ps.facts.minimum_stay {
        return Err(Rejection::new(
            at,
            EngineError::OutOfPolicy(Policy::MinimumStay {
                required: ps.facts.minimum_stay,
                requested: quote.nights,
            }),
        ));
    }
    if guests_count > ps.facts.number_of_guests {
        return Err(Rejection::new(
            at,
            EngineError::OutOfPolicy(Policy::GuestCap {
                capacity: ps.facts.number_of_guests,
                requested: guests_count,
            }),
        ));
    }

    // ConflictChecked
    check_no_reservation_conflict(ps, &stay).map_err(|e| Rejection::new(Stage::ConflictChecked, e))?;

    Ok(Accepted {
        stay,
        quote,
        guests_count,
    })
}

fn required_day(field: &str, raw: Option<&str>) -> Result<Day, EngineError> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| EngineError::InvalidRequest(format!("{field} is required")))?;
    parse_day(raw)
        .ok_or_else(|| EngineError::InvalidRequest(format!("{field} {raw:?} is not a YYYY-MM-DD date")))
}
