use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::dates::Day;
use crate::model::{Reservation, ReservationStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Messages for people, not for replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// To the host: someone asked for their property.
    ReservationRequested {
        reservation_id: Ulid,
        property_id: Ulid,
        guest_id: Ulid,
        check_in: Day,
        check_out: Day,
        guests_count: u32,
        #[serde(with = "rust_decimal::serde::str")]
        total_price: Decimal,
    },
    /// To the guest: their reservation moved.
    ReservationStatusChanged {
        reservation_id: Ulid,
        property_id: Ulid,
        status: ReservationStatus,
    },
}

impl Notification {
    pub fn requested(r: &Reservation) -> Self {
        Notification::ReservationRequested {
            reservation_id: r.id,
            property_id: r.property_id,
            guest_id: r.guest_id,
            check_in: r.stay.start,
            check_out: r.stay.end,
            guests_count: r.guests_count,
            total_price: r.total_price,
        }
    }

    pub fn status_changed(r: &Reservation) -> Self {
        Notification::ReservationStatusChanged {
            reservation_id: r.id,
            property_id: r.property_id,
            status: r.status,
        }
    }

    /// JSON body for delivery channels.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-recipient broadcast hub. Delivery is fire-and-forget.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; never fails the caller.
    pub fn send(&self, recipient: Ulid, notification: Notification) {
        if let Some(sender) = self.channels.get(&recipient)
            && sender.send(notification).is_err() {
                tracing::debug!("notification to {recipient} dropped: no live receivers");
            }
    }

    /// Drop a recipient's channel once no session is listening to it.
    pub fn release(&self, recipient: &Ulid) {
        self.channels
            .remove_if(recipient, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{parse_day, DateSpan};

    fn reservation() -> Reservation {
        Reservation {
            id: Ulid::new(),
            property_id: Ulid::new(),
            guest_id: Ulid::new(),
            stay: DateSpan::new(
                parse_day("2025-06-01").unwrap(),
                parse_day("2025-06-05").unwrap(),
            ),
            guests_count: 2,
            total_price: Decimal::new(40000, 2),
            status: ReservationStatus::Pending,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let host = Ulid::new();
        let mut rx = hub.subscribe(host);

        let n = Notification::requested(&reservation());
        hub.send(host, n.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, n);
    }

    #[tokio::test]
    async fn recipients_are_isolated() {
        let hub = NotifyHub::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, Notification::status_changed(&reservation()));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn release_keeps_channels_with_live_receivers() {
        let hub = NotifyHub::new();
        let guest = Ulid::new();
        let first = hub.subscribe(guest);
        let mut second = hub.subscribe(guest);

        drop(first);
        hub.release(&guest);
        assert!(hub.channels.contains_key(&guest));
        hub.send(guest, Notification::status_changed(&reservation()));
        assert!(second.try_recv().is_ok());

        drop(second);
        hub.release(&guest);
        assert!(!hub.channels.contains_key(&guest));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(Ulid::new(), Notification::status_changed(&reservation()));
    }

    #[test]
    fn payload_is_tagged_json() {
        let r = reservation();
        let payload = Notification::requested(&r).payload();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["kind"], "reservation_requested");
        assert_eq!(parsed["check_in"], "2025-06-01");
        assert_eq!(parsed["total_price"], "400.00");

        let mut approved = r.clone();
        approved.status = ReservationStatus::Approved;
        let parsed: serde_json::Value =
            serde_json::from_str(&Notification::status_changed(&approved).payload()).unwrap();
        assert_eq!(parsed["status"], "approved");
    }
}
