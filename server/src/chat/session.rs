//! One accepted client connection as seen by the dispatcher.
//!
//! Lifecycle: a session is *connected* while it sits in the presence
//! directory. Removing it from the directory drops the only sender of its
//! outbound queue, which moves it to *closing*: the write pump drains what is
//! left, sends a close frame and exits. Once both pumps have returned the
//! session is *closed*. Removal happens in exactly one place per session, so
//! the queue can never be closed twice.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::{RoomId, UserId};

/// A serialized outbound frame. Cheap to clone for fan-out.
pub type Frame = Utf8Bytes;

/// Distinguishes successive connections of the same user.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The consumer is not keeping up.
    Full,
    /// The write pump is gone.
    Closed,
}

#[derive(Debug)]
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub room_id: Option<RoomId>,
    pub created_at: DateTime<Utc>,
    outbound: mpsc::Sender<Frame>,
}

impl Session {
    /// Create a session with a bounded outbound queue of `capacity` frames.
    /// The receiver belongs to the write pump.
    pub fn new(
        user_id: UserId,
        room_id: Option<RoomId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            user_id,
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            room_id,
            created_at: Utc::now(),
            outbound: tx,
        };
        (session, rx)
    }

    /// Enqueue without waiting.
    pub fn deliver(&self, frame: &Frame) -> Delivery {
        match self.outbound.try_send(frame.clone()) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = Session::new(1, None, 4);
        let (b, _rx_b) = Session::new(1, None, 4);
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[test]
    fn test_deliver_reports_full_queue() {
        let (session, mut rx) = Session::new(1, None, 2);
        let frame = Frame::from("x");
        assert_eq!(session.deliver(&frame), Delivery::Queued);
        assert_eq!(session.deliver(&frame), Delivery::Queued);
        assert_eq!(session.deliver(&frame), Delivery::Full);
        assert!(rx.try_recv().is_ok());
        assert_eq!(session.deliver(&frame), Delivery::Queued);
    }

    #[test]
    fn test_dropping_session_closes_queue() {
        let (session, mut rx) = Session::new(1, None, 2);
        assert_eq!(session.deliver(&Frame::from("last")), Delivery::Queued);
        drop(session);
        assert_eq!(rx.try_recv().unwrap().as_str(), "last");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_deliver_reports_closed_receiver() {
        let (session, rx) = Session::new(1, None, 2);
        drop(rx);
        assert!(session.is_closed());
        assert_eq!(session.deliver(&Frame::from("x")), Delivery::Closed);
    }
}
