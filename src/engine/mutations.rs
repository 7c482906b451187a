use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::editor::RangeWrite;
use crate::limits::*;
use crate::model::*;
use crate::observability::{RANGE_WRITES_TOTAL, RESERVATIONS_TOTAL, STATUS_CHANGES_TOTAL};

use super::validator::validate;
use super::{Engine, EngineError, ReservationRequest, WalCommand};

fn validate_facts(facts: &PropertyFacts) -> Result<(), EngineError> {
    if facts.minimum_stay == 0 {
        return Err(EngineError::InvalidRequest("minimum_stay must be at least 1".into()));
    }
    if facts.number_of_guests == 0 {
        return Err(EngineError::InvalidRequest("number_of_guests must be at least 1".into()));
    }
    if facts.number_of_guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("number_of_guests too large"));
    }
    Ok(())
}

/// Who may move a reservation from its current status to `to`.
fn authorize_transition(
    facts: &PropertyFacts,
    reservation: &Reservation,
    to: ReservationStatus,
    caller: &Caller,
) -> Result<(), EngineError> {
    use ReservationStatus::*;

    let from = reservation.status;
    let invalid = EngineError::InvalidTransition { from, to };
    if from.is_terminal() {
        return Err(invalid);
    }
    let is_host = caller.id == facts.host_id;
    let is_guest = caller.id == reservation.guest_id;
    let allowed = match (from, to) {
        (Pending, Approved | Rejected) => caller.is_admin || is_host,
        (Pending | Approved, Cancelled) => caller.is_admin || is_host || is_guest,
        (Approved, Completed) => caller.is_admin,
        _ => return Err(invalid),
    };
    if !allowed {
        return Err(EngineError::Forbidden(match to {
            Approved | Rejected => "only the host can approve or reject",
            Cancelled => "only the guest or host can cancel",
            _ => "only an administrator can complete a stay",
        }));
    }
    Ok(())
}

impl Engine {
    pub async fn register_property(&self, facts: PropertyFacts) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_facts(&facts)?;
        if self.state.len() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        let id = facts.id;
        let event = Event::PropertyRegistered(facts.clone());

        // Claim the id with a locked state so nobody writes to it before the WAL has it.
        let shared = Arc::new(RwLock::new(PropertyState::new(facts)));
        let guard = shared.clone().write_owned().await;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }
        drop(guard);
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.state.len() as f64);
        tracing::info!("property {id} registered");
        Ok(())
    }

    /// Merge `patch` into the property's current facts under its write lock.
    pub async fn update_property(
        &self,
        id: Ulid,
        patch: &PropertyPatch,
    ) -> Result<PropertyFacts, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.property_write(id).await?;
        let facts = patch.apply_to(&guard.facts);
        validate_facts(&facts)?;
        let event = Event::PropertyUpdated(facts.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(facts)
    }

    /// Refused while the property still has pending or approved reservations.
    pub async fn remove_property(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let guard = self.property_write(id).await?;
        if guard.has_open_reservations() {
            return Err(EngineError::Forbidden(
                "property has pending or approved reservations",
            ));
        }
        self.wal_append(&Event::PropertyRemoved { id }).await?;
        self.drop_property(id);
        drop(guard);
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.state.len() as f64);
        tracing::info!("property {id} removed");
        Ok(())
    }

    pub async fn add_range(&self, property_id: Ulid, range: PriceRange) -> Result<Ulid, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.property_write(property_id).await?;
        if guard.ranges.len() >= MAX_RANGES_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many ranges on property"));
        }
        if let Err(e) = guard.ranges.check_insert(&range) {
            metrics::counter!(RANGE_WRITES_TOTAL, "op" => "add", "status" => "refused").increment(1);
            return Err(e);
        }
        let id = range.id;
        let event = Event::RangeAdded { property_id, range };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RANGE_WRITES_TOTAL, "op" => "add", "status" => "ok").increment(1);
        Ok(id)
    }

    /// Patch a range; the result is checked against every other range of the property.
    pub async fn update_range(&self, id: Ulid, patch: RangePatch) -> Result<PriceRange, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_write(&self.range_index, id).await?;
        let current = guard.ranges.get(id).ok_or(EngineError::NotFound(id))?;
        let next = patch.apply_to(current);
        self.replace_range_locked(&mut guard, next).await
    }

    async fn replace_range_locked(
        &self,
        ps: &mut PropertyState,
        range: PriceRange,
    ) -> Result<PriceRange, EngineError> {
        if let Err(e) = ps.ranges.check_replace(&range) {
            metrics::counter!(RANGE_WRITES_TOTAL, "op" => "update", "status" => "refused").increment(1);
            return Err(e);
        }
        let event = Event::RangeUpdated {
            property_id: ps.id(),
            range: range.clone(),
        };
        self.persist_and_apply(ps, &event).await?;
        metrics::counter!(RANGE_WRITES_TOTAL, "op" => "update", "status" => "ok").increment(1);
        Ok(range)
    }

    pub async fn remove_range(&self, id: Ulid) -> Result<PriceRange, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_write(&self.range_index, id).await?;
        let removed = guard.ranges.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::RangeRemoved {
            id,
            property_id: guard.id(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RANGE_WRITES_TOTAL, "op" => "remove", "status" => "ok").increment(1);
        Ok(removed)
    }

    /// Insert many ranges into one property. All-or-nothing: overlaps with stored
    /// ranges or within the batch refuse the whole load.
    pub async fn bulk_load_ranges(
        &self,
        property_id: Ulid,
        ranges: Vec<PriceRange>,
    ) -> Result<Vec<Ulid>, EngineError> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        if ranges.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.property_write(property_id).await?;
        if guard.ranges.len() + ranges.len() > MAX_RANGES_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many ranges on property"));
        }

        // Phase 1: dry run on a copy so intra-batch overlaps are caught too.
        let mut trial = guard.ranges.clone();
        for range in &ranges {
            trial.insert(range.clone())?;
        }

        // Phase 2: one WAL record for the whole batch.
        let ids: Vec<Ulid> = ranges.iter().map(|r| r.id).collect();
        let event = Event::RangesBulkAdded { property_id, ranges };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RANGE_WRITES_TOTAL, "op" => "bulk_add", "status" => "ok")
            .increment(ids.len() as u64);
        tracing::info!("bulk loaded {} ranges into property {property_id}", ids.len());
        Ok(ids)
    }

    /// Persist a write produced by the range editor for `property_id`.
    pub async fn apply_range_write(
        &self,
        property_id: Ulid,
        write: RangeWrite,
    ) -> Result<(), EngineError> {
        match write {
            RangeWrite::Create(range) => self.add_range(property_id, range).await.map(|_| ()),
            RangeWrite::Update(range) => {
                self.ensure_range_on(property_id, range.id)?;
                let _gate = self.compaction_gate.read().await;
                let mut guard = self.property_write(property_id).await?;
                self.replace_range_locked(&mut guard, range).await.map(|_| ())
            }
            RangeWrite::Delete(id) => {
                self.ensure_range_on(property_id, id)?;
                self.remove_range(id).await.map(|_| ())
            }
        }
    }

    fn ensure_range_on(&self, property_id: Ulid, range_id: Ulid) -> Result<(), EngineError> {
        match self.range_index.get(&range_id) {
            Some(owner) if *owner.value() == property_id => Ok(()),
            _ => Err(EngineError::NotFound(range_id)),
        }
    }

    /// Validate and record a booking request on behalf of `caller`.
    ///
    /// The property stays write-locked from validation through the WAL append, so of
    /// two concurrent requests for the same nights exactly one is accepted.
    pub async fn create_reservation(
        &self,
        request: ReservationRequest,
        caller: &Caller,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        if self.reservation_index.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(request.id));
        }
        let mut guard = self.property_write(request.property_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many reservations on property"));
        }

        let accepted = match validate(&guard, &request, caller, self.today()) {
            Ok(accepted) => accepted,
            Err(rejection) => {
                let stage = rejection.stage.to_string();
                metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "rejected", "stage" => stage)
                    .increment(1);
                tracing::debug!(
                    "reservation {} on property {} {rejection}",
                    request.id,
                    request.property_id
                );
                return Err(EngineError::Rejected(rejection));
            }
        };

        let reservation = accepted.into_reservation(&request, caller.id);
        let event = Event::ReservationCreated(reservation.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "accepted", "stage" => "accepted")
            .increment(1);
        tracing::info!(
            "reservation {} accepted on property {} for {}",
            reservation.id,
            reservation.property_id,
            reservation.stay
        );
        Ok(reservation)
    }

    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        to: ReservationStatus,
        caller: &Caller,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_write(&self.reservation_index, id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        authorize_transition(&guard.facts, current, to, caller)?;

        let event = Event::ReservationStatusChanged {
            id,
            property_id: guard.id(),
            status: to,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(STATUS_CHANGES_TOTAL, "status" => to.as_str()).increment(1);
        tracing::info!("reservation {id} is now {to}");
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Rewrite the WAL with just the events needed to rebuild the current state.
    ///
    /// Runs with every mutation paused, so nothing appended before the swap is lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let properties: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for shared in properties {
            let ps = shared.read().await;
            events.push(Event::PropertyRegistered(ps.facts.clone()));
            events.extend(ps.ranges.iter().map(|range| Event::RangeAdded {
                property_id: ps.id(),
                range: range.clone(),
            }));
            // Current status rides along, so status-change history is dropped.
            events.extend(
                ps.reservations
                    .iter()
                    .map(|r| Event::ReservationCreated(r.clone())),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
