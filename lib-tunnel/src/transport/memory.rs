//! In-memory transport pair
//!
//! Two cross-connected transports sharing process memory. Used by the test
//! harness and by hosts that splice the tunnel onto their own carrier.

use super::{CarrierCmd, CarrierDriver, CarrierHandle, Transport};

/// Build two transports wired back-to-back: frames written to one arrive at
/// the other, and closing one side closes both.
pub fn memory_pair() -> (Transport, Transport) {
    let (ta, da) = Transport::with_driver();
    let (tb, db) = Transport::with_driver();

    let a_handle = da.handle.clone();
    let b_handle = db.handle.clone();

    tokio::spawn(pump(da, b_handle));
    tokio::spawn(pump(db, a_handle));

    (ta, tb)
}

async fn pump(mut driver: CarrierDriver, peer: CarrierHandle) {
    while let Some(cmd) = driver.commands.recv().await {
        match cmd {
            CarrierCmd::Frame(frame) => peer.deliver(frame),
            CarrierCmd::Shutdown { reason } => {
                peer.remote_closed(reason);
                return;
            }
        }
    }
    // Sink dropped without an explicit shutdown.
    peer.remote_closed(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;

    #[tokio::test]
    async fn test_frames_cross() {
        let (a, mut b) = memory_pair();

        a.sink.send(vec![0xAB, 0xCD]).unwrap();
        match b.events.recv().await {
            Some(TransportEvent::Frame(f)) => assert_eq!(f, vec![0xAB, 0xCD]),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_propagates() {
        let (a, mut b) = memory_pair();

        a.sink.close(true, Some("bye".into()));
        match b.events.recv().await {
            Some(TransportEvent::Closed { explicit, reason }) => {
                assert!(!explicit);
                assert_eq!(reason.as_deref(), Some("bye"));
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
}
