use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::dates::{DateSpan, Day};
use crate::engine::RangeStore;

/// A run of nights sharing one availability flag and nightly price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub id: Ulid,
    pub span: DateSpan,
    pub available: bool,
    /// Nightly price. Only meaningful when `available`; zero means free, not unset.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// What a single night looks like to a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Uncovered,
    Available(Decimal),
    Unavailable,
}

/// Field replacement for an existing range. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePatch {
    pub span: Option<DateSpan>,
    pub available: Option<bool>,
    pub price: Option<Decimal>,
}

impl RangePatch {
    pub fn apply_to(&self, range: &PriceRange) -> PriceRange {
        PriceRange {
            id: range.id,
            span: self.span.unwrap_or(range.span),
            available: self.available.unwrap_or(range.available),
            price: self.price.unwrap_or(range.price),
        }
    }
}

/// Field replacement for a property's rules. The id and host never change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyPatch {
    pub minimum_stay: Option<u32>,
    pub number_of_guests: Option<u32>,
    pub is_active: Option<bool>,
}

impl PropertyPatch {
    pub fn apply_to(&self, facts: &PropertyFacts) -> PropertyFacts {
        PropertyFacts {
            minimum_stay: self.minimum_stay.unwrap_or(facts.minimum_stay),
            number_of_guests: self.number_of_guests.unwrap_or(facts.number_of_guests),
            is_active: self.is_active.unwrap_or(facts.is_active),
            ..facts.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Pending and approved reservations hold their nights.
    pub fn blocks_nights(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Rejected | ReservationStatus::Cancelled | ReservationStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "approved" => Some(ReservationStatus::Approved),
            "rejected" => Some(ReservationStatus::Rejected),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            "completed" => Some(ReservationStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    /// `[check_in, check_out)`.
    pub stay: DateSpan,
    pub guests_count: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    pub status: ReservationStatus,
}

/// The property facts the engine reads for authorization and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFacts {
    pub id: Ulid,
    pub host_id: Ulid,
    /// Minimum nights per stay.
    pub minimum_stay: u32,
    /// Guest capacity.
    pub number_of_guests: u32,
    pub is_active: bool,
}

/// Identity facts supplied by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Ulid,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(id: Ulid) -> Self {
        Self { id, is_admin: false }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, is_admin: true }
    }

    /// Internal maintenance actor.
    pub fn system() -> Self {
        Self {
            id: Ulid::nil(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub facts: PropertyFacts,
    pub ranges: RangeStore,
    /// Every reservation ever made on the property, sorted by `stay.start`.
    pub reservations: Vec<Reservation>,
}

impl PropertyState {
    pub fn new(facts: PropertyFacts) -> Self {
        Self {
            facts,
            ranges: RangeStore::new(),
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.facts.id
    }

    /// Insert reservation maintaining sort order by stay start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.stay.start, |r| r.stay.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose stay intersects `query`. Stays may overlap each other
    /// (rejected and cancelled ones stay on record), so the scan filters after the
    /// binary-searched upper bound.
    pub fn reservations_overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.end > query.start)
    }

    /// Pending/approved reservations intersecting `query`.
    pub fn blocking_reservations<'a>(
        &'a self,
        query: &'a DateSpan,
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        self.reservations_overlapping(query)
            .filter(|r| r.status.blocks_nights())
    }

    pub fn has_open_reservations(&self) -> bool {
        self.reservations.iter().any(|r| r.status.blocks_nights())
    }
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyRegistered(PropertyFacts),
    PropertyUpdated(PropertyFacts),
    PropertyRemoved {
        id: Ulid,
    },
    RangeAdded {
        property_id: Ulid,
        range: PriceRange,
    },
    /// A bulk load, logged as one record so it replays whole or not at all.
    RangesBulkAdded {
        property_id: Ulid,
        ranges: Vec<PriceRange>,
    },
    RangeUpdated {
        property_id: Ulid,
        range: PriceRange,
    },
    RangeRemoved {
        id: Ulid,
        property_id: Ulid,
    },
    ReservationCreated(Reservation),
    ReservationStatusChanged {
        id: Ulid,
        property_id: Ulid,
        status: ReservationStatus,
    },
}

impl Event {
    /// Property the event belongs to.
    pub fn property_id(&self) -> Ulid {
        match self {
            Event::PropertyRegistered(facts) | Event::PropertyUpdated(facts) => facts.id,
            Event::PropertyRemoved { id } => *id,
            Event::RangeAdded { property_id, .. }
            | Event::RangesBulkAdded { property_id, .. }
            | Event::RangeUpdated { property_id, .. }
            | Event::RangeRemoved { property_id, .. }
            | Event::ReservationStatusChanged { property_id, .. } => *property_id,
            Event::ReservationCreated(r) => r.property_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_day;

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(parse_day(a).unwrap(), parse_day(b).unwrap())
    }

    fn reservation(stay: DateSpan, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            property_id: Ulid::new(),
            guest_id: Ulid::new(),
            stay,
            guests_count: 2,
            total_price: Decimal::new(100, 0),
            status,
        }
    }

    fn facts() -> PropertyFacts {
        PropertyFacts {
            id: Ulid::new(),
            host_id: Ulid::new(),
            minimum_stay: 1,
            number_of_guests: 4,
            is_active: true,
        }
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut ps = PropertyState::new(facts());
        ps.insert_reservation(reservation(span("2025-07-10", "2025-07-12"), ReservationStatus::Pending));
        ps.insert_reservation(reservation(span("2025-07-01", "2025-07-03"), ReservationStatus::Pending));
        ps.insert_reservation(reservation(span("2025-07-05", "2025-07-06"), ReservationStatus::Approved));
        let starts: Vec<_> = ps.reservations.iter().map(|r| r.stay.start).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn overlapping_reservations_respect_half_open() {
        let mut ps = PropertyState::new(facts());
        ps.insert_reservation(reservation(span("2025-07-01", "2025-07-05"), ReservationStatus::Pending));
        // Check-out day is free for the next check-in.
        let hits: Vec<_> = ps
            .reservations_overlapping(&span("2025-07-05", "2025-07-07"))
            .collect();
        assert!(hits.is_empty());
        let hits: Vec<_> = ps
            .reservations_overlapping(&span("2025-07-04", "2025-07-07"))
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn only_pending_and_approved_block() {
        let mut ps = PropertyState::new(facts());
        for status in [
            ReservationStatus::Rejected,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            ps.insert_reservation(reservation(span("2025-07-01", "2025-07-05"), status));
        }
        let query = span("2025-07-02", "2025-07-03");
        assert_eq!(ps.blocking_reservations(&query).count(), 0);
        assert!(!ps.has_open_reservations());

        ps.insert_reservation(reservation(span("2025-07-01", "2025-07-05"), ReservationStatus::Approved));
        assert_eq!(ps.blocking_reservations(&query).count(), 1);
        assert!(ps.has_open_reservations());
    }

    #[test]
    fn status_parse_and_terminal() {
        assert_eq!(ReservationStatus::parse("Approved"), Some(ReservationStatus::Approved));
        assert_eq!(ReservationStatus::parse("canceled"), Some(ReservationStatus::Cancelled));
        assert_eq!(ReservationStatus::parse("archived"), None);
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(!ReservationStatus::Approved.is_terminal());
    }

    #[test]
    fn patch_keeps_identity() {
        let range = PriceRange {
            id: Ulid::new(),
            span: span("2025-06-01", "2025-06-10"),
            available: true,
            price: Decimal::new(100, 0),
        };
        let patch = RangePatch {
            price: Some(Decimal::new(120, 0)),
            ..Default::default()
        };
        let patched = patch.apply_to(&range);
        assert_eq!(patched.id, range.id);
        assert_eq!(patched.span, range.span);
        assert_eq!(patched.price, Decimal::new(120, 0));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RangeAdded {
            property_id: Ulid::new(),
            range: PriceRange {
                id: Ulid::new(),
                span: span("2025-06-01", "2025-06-10"),
                available: true,
                price: Decimal::new(9950, 2),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
