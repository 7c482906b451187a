use rust_decimal::Decimal;
use ulid::Ulid;

use crate::dates::{format_day, DateSpan, Day};
use crate::model::ReservationStatus;

use super::pricing::InvalidReason;
use super::validator::Stage;

/// A business rule a reservation request broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    InactiveProperty,
    SelfBooking,
    PastCheckIn { check_in: Day, today: Day },
    MinimumStay { required: u32, requested: u32 },
    GuestCap { capacity: u32, requested: u32 },
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::InactiveProperty => write!(f, "property is not accepting reservations"),
            Policy::SelfBooking => write!(f, "hosts cannot reserve their own property"),
            Policy::PastCheckIn { check_in, today } => write!(
                f,
                "check-in {} is before today ({})",
                format_day(*check_in),
                format_day(*today)
            ),
            Policy::MinimumStay { required, requested } => {
                write!(f, "minimum stay is {required} nights, requested {requested}")
            }
            Policy::GuestCap { capacity, requested } => {
                write!(f, "property sleeps {capacity}, requested {requested} guests")
            }
        }
    }
}

/// A reservation request refused by the validator, with the stage that refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub stage: Stage,
    pub error: Box<EngineError>,
}

impl Rejection {
    pub fn new(stage: Stage, error: EngineError) -> Self {
        Self {
            stage,
            error: Box::new(error),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rejected at {}: {}", self.stage, self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The candidate shares at least one night with an existing range.
    Conflict {
        range_id: Ulid,
        span: DateSpan,
    },
    InvalidDuration {
        start: Day,
        end: Day,
    },
    InvalidRequest(String),
    InvalidPrice(Decimal),
    OutOfPolicy(Policy),
    Unavailable(InvalidReason),
    ReservationConflict(Ulid),
    Rejected(Rejection),
    Forbidden(&'static str),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    LimitExceeded(&'static str),
    PersistenceFailure(String),
}

impl EngineError {
    /// Stage for validator rejections, `None` otherwise.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::Rejected(r) => Some(r.stage),
            _ => None,
        }
    }

    /// Unwraps a validator rejection to its underlying cause.
    pub fn cause(&self) -> &EngineError {
        match self {
            EngineError::Rejected(r) => r.error.cause(),
            other => other,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { range_id, span } => {
                write!(f, "overlaps range {range_id} covering {span}")
            }
            EngineError::InvalidDuration { start, end } => write!(
                f,
                "invalid duration: {} to {} is not a positive number of nights",
                format_day(*start),
                format_day(*end)
            ),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidPrice(p) => write!(f, "invalid price: {p}"),
            EngineError::OutOfPolicy(p) => write!(f, "out of policy: {p}"),
            EngineError::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            EngineError::ReservationConflict(id) => {
                write!(f, "dates conflict with reservation {id}")
            }
            EngineError::Rejected(r) => write!(f, "{r}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move reservation from {from} to {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
