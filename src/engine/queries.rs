use ulid::Ulid;

use crate::dates::{DateSpan, Day};
use crate::limits::*;
use crate::model::*;

use super::conflict::validate_span;
use super::pricing::{bookable_spans, price_for_stay, rolling_estimate, StayQuote};
use super::{Engine, EngineError};

impl Engine {
    /// All properties, ordered by id.
    pub async fn list_properties(&self) -> Vec<PropertyFacts> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            out.push(ps.read().await.facts.clone());
        }
        out.sort_by_key(|f| f.id);
        out
    }

    pub async fn property_facts(&self, id: Ulid) -> Result<PropertyFacts, EngineError> {
        let ps = self.get_property(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        Ok(guard.facts.clone())
    }

    /// Every range of the property, ascending by start.
    pub async fn get_ranges(&self, property_id: Ulid) -> Result<Vec<PriceRange>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(guard.ranges.iter().cloned().collect())
    }

    pub async fn ranges_overlapping(
        &self,
        property_id: Ulid,
        span: DateSpan,
    ) -> Result<Vec<PriceRange>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(guard.ranges.ranges_overlapping(&span))
    }

    pub async fn status_at(&self, property_id: Ulid, day: Day) -> Result<DayStatus, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(guard.ranges.status_at(day))
    }

    /// Price of the stay `[check_in, check_out)`. Read-only; reservations do not count.
    pub async fn quote_stay(
        &self,
        property_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<StayQuote, EngineError> {
        if let Some(span) = DateSpan::try_new(check_in, check_out) {
            validate_span(&span, MAX_STAY_NIGHTS)?;
        }
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(price_for_stay(&guard.ranges, check_in, check_out))
    }

    /// Indicative price for the next `nights` available nights from `reference`
    /// (never earlier than today).
    pub async fn estimate(
        &self,
        property_id: Ulid,
        reference: Day,
        nights: u32,
    ) -> Result<StayQuote, EngineError> {
        if nights > MAX_ESTIMATE_NIGHTS {
            return Err(EngineError::LimitExceeded("estimate too long"));
        }
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(rolling_estimate(&guard.ranges, reference, self.today(), nights))
    }

    /// Bookable runs of nights inside `window`.
    pub async fn calendar(
        &self,
        property_id: Ulid,
        window: DateSpan,
    ) -> Result<Vec<DateSpan>, EngineError> {
        validate_span(&window, MAX_CALENDAR_NIGHTS)?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(bookable_spans(&guard, &window))
    }

    /// Reservations of a property, optionally filtered by status and by stays that
    /// intersect `window`. Ordered by check-in.
    pub async fn get_reservations(
        &self,
        property_id: Ulid,
        statuses: Option<&[ReservationStatus]>,
        window: Option<DateSpan>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        let keep = |r: &&Reservation| statuses.is_none_or(|s| s.contains(&r.status));
        Ok(match window {
            Some(w) => guard
                .reservations_overlapping(&w)
                .filter(keep)
                .cloned()
                .collect(),
            None => guard.reservations.iter().filter(keep).cloned().collect(),
        })
    }

    /// Property that owns a range.
    pub fn range_property(&self, range_id: Ulid) -> Result<Ulid, EngineError> {
        self.range_index
            .get(&range_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(range_id))
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let property_id = self
            .reservation_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Approved reservations whose check-out day has come. Skips properties that are
    /// busy right now; the next sweep picks them up.
    pub fn collect_completable_reservations(&self, today: Day) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.state.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            due.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status == ReservationStatus::Approved && r.stay.end <= today)
                    .map(|r| r.id),
            );
        }
        due
    }
}
