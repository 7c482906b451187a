use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::dates::Day;
use crate::engine::Engine;
use crate::model::{Caller, ReservationStatus};
use crate::observability::{SWEEP_COMPACTIONS_TOTAL, SWEEP_COMPLETED_TOTAL};

/// Background task: completes finished stays and compacts the WAL once it has grown.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, compact_threshold: u64) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        complete_finished_stays(&engine, engine.today()).await;
        compact_if_due(&engine, compact_threshold).await;
    }
}

/// Move approved reservations whose check-out day has come to completed.
/// Returns how many moved.
pub async fn complete_finished_stays(engine: &Engine, today: Day) -> usize {
    let mut completed = 0;
    for id in engine.collect_completable_reservations(today) {
        match engine
            .set_reservation_status(id, ReservationStatus::Completed, &Caller::system())
            .await
        {
            Ok(_) => {
                completed += 1;
                info!("completed reservation {id}");
            }
            Err(e) => {
                // Cancelled between the scan and the write.
                tracing::debug!("sweeper skip {id}: {e}");
            }
        }
    }
    metrics::counter!(SWEEP_COMPLETED_TOTAL).increment(completed as u64);
    completed
}

/// Compact when the WAL has taken `threshold` appends since the last compaction.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(SWEEP_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            metrics::counter!(SWEEP_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{parse_day, DateSpan};
    use crate::engine::ReservationRequest;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayrate_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    fn may_first() -> Day {
        d("2025-05-01")
    }

    async fn engine_with_booking(name: &str) -> (Arc<Engine>, PropertyFacts, Ulid, Ulid) {
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::with_clock(test_wal_path(name), notify, may_first).unwrap());
        let facts = PropertyFacts {
            id: Ulid::new(),
            host_id: Ulid::new(),
            minimum_stay: 1,
            number_of_guests: 4,
            is_active: true,
        };
        engine.register_property(facts.clone()).await.unwrap();
        engine
            .add_range(
                facts.id,
                PriceRange {
                    id: Ulid::new(),
                    span: DateSpan::new(d("2025-06-01"), d("2025-06-10")),
                    available: true,
                    price: Decimal::new(100, 0),
                },
            )
            .await
            .unwrap();
        let guest = Ulid::new();
        let id = Ulid::new();
        engine
            .create_reservation(
                ReservationRequest::for_stay(id, facts.id, d("2025-06-01"), d("2025-06-03"), 2),
                &Caller::user(guest),
            )
            .await
            .unwrap();
        (engine, facts, guest, id)
    }

    #[tokio::test]
    async fn completes_approved_stays_after_checkout() {
        let (engine, facts, guest, id) = engine_with_booking("complete.wal").await;
        engine
            .set_reservation_status(id, ReservationStatus::Approved, &Caller::user(facts.host_id))
            .await
            .unwrap();
        let mut inbox = engine.notify.subscribe(guest);

        // Still in the house on the last night.
        assert_eq!(complete_finished_stays(&engine, d("2025-06-02")).await, 0);
        assert_eq!(complete_finished_stays(&engine, d("2025-06-03")).await, 1);
        assert_eq!(
            engine.reservation(id).await.unwrap().status,
            ReservationStatus::Completed
        );
        assert!(matches!(
            inbox.try_recv().unwrap(),
            crate::notify::Notification::ReservationStatusChanged {
                status: ReservationStatus::Completed,
                ..
            }
        ));

        // Terminal now: a second sweep finds nothing.
        assert_eq!(complete_finished_stays(&engine, d("2025-06-30")).await, 0);
    }

    #[tokio::test]
    async fn pending_stays_are_left_alone() {
        let (engine, _, _, id) = engine_with_booking("pending.wal").await;
        assert_eq!(complete_finished_stays(&engine, d("2025-06-30")).await, 0);
        assert_eq!(
            engine.reservation(id).await.unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let (engine, _, _, _) = engine_with_booking("compact.wal").await;
        // register + range + reservation
        assert_eq!(engine.wal_appends_since_compact().await, 3);
        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
