//! Frame Transport Adapter
//!
//! Abstracts any reliable ordered byte-frame carrier into two halves: an
//! event stream (`Frame` / `Closed`) consumed by the handshake engine or the
//! session reader, and a cloneable sink for writes and close requests. The
//! `Closed` event fires exactly once per logical close no matter how many
//! times the carrier reports it.
//!
//! The session holds a nullable [`TransportSink`]; the transport holds no
//! back-pointer.

pub mod memory;
pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::TunnelError;

/// What the carrier observed, in FIFO order.
#[derive(Debug)]
pub enum TransportEvent {
    /// One carrier frame, exact payload bytes.
    Frame(Vec<u8>),
    /// The transport closed. Emitted exactly once.
    Closed {
        /// True when our side requested the close.
        explicit: bool,
        reason: Option<String>,
    },
}

/// Commands the adapter sends down to the carrier pump.
#[derive(Debug)]
pub enum CarrierCmd {
    /// Write one frame.
    Frame(Vec<u8>),
    /// Tear the carrier down.
    Shutdown { reason: Option<String> },
}

struct Shared {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    carrier_tx: mpsc::UnboundedSender<CarrierCmd>,
    closed: AtomicBool,
}

impl Shared {
    /// First close wins; later calls are no-ops.
    fn close(&self, explicit: bool, reason: Option<String>, notify_carrier: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events_tx.send(TransportEvent::Closed {
            explicit,
            reason: reason.clone(),
        });
        if notify_carrier {
            let _ = self.carrier_tx.send(CarrierCmd::Shutdown { reason });
        }
    }
}

/// Write half of a transport. Cheap to clone; all clones share one close.
#[derive(Clone)]
pub struct TransportSink {
    shared: Arc<Shared>,
}

impl TransportSink {
    /// Queue one frame for the carrier.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::TransportClosed { reason: None });
        }
        self.shared
            .carrier_tx
            .send(CarrierCmd::Frame(frame))
            .map_err(|_| TunnelError::TransportClosed { reason: None })
    }

    /// Close the transport from our side. Idempotent.
    pub fn close(&self, explicit: bool, reason: Option<String>) {
        self.shared.close(explicit, reason, true);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Identity comparison, used to tell whether a close notification still
    /// refers to the session's current transport.
    pub(crate) fn same_transport(&self, other: &TransportSink) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Carrier-side handle for delivering inbound frames and close notifications.
#[derive(Clone)]
pub struct CarrierHandle {
    shared: Arc<Shared>,
}

impl CarrierHandle {
    /// Deliver one inbound frame. Dropped silently after close.
    pub fn deliver(&self, frame: Vec<u8>) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            let _ = self.shared.events_tx.send(TransportEvent::Frame(frame));
        }
    }

    /// Report that the remote end (or the carrier itself) went away.
    pub fn remote_closed(&self, reason: Option<String>) {
        self.shared.close(false, reason, false);
    }
}

/// Carrier-side driver: the command stream plus the delivery handle.
pub struct CarrierDriver {
    pub commands: mpsc::UnboundedReceiver<CarrierCmd>,
    pub handle: CarrierHandle,
}

/// One attached transport: the event stream and the write half.
pub struct Transport {
    pub sink: TransportSink,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Create a transport plus the driver a carrier pump runs against.
    pub fn with_driver() -> (Transport, CarrierDriver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (carrier_tx, carrier_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            events_tx,
            carrier_tx,
            closed: AtomicBool::new(false),
        });

        (
            Transport {
                sink: TransportSink {
                    shared: shared.clone(),
                },
                events: events_rx,
            },
            CarrierDriver {
                commands: carrier_rx,
                handle: CarrierHandle { shared },
            },
        )
    }

    /// Await the next frame, treating close and timeout as handshake errors.
    pub async fn next_frame(&mut self, wait: Duration) -> Result<Vec<u8>, TunnelError> {
        match tokio::time::timeout(wait, self.events.recv()).await {
            Err(_) => Err(TunnelError::HandshakeTimeout),
            Ok(None) => Err(TunnelError::TransportClosed { reason: None }),
            Ok(Some(TransportEvent::Frame(frame))) => Ok(frame),
            Ok(Some(TransportEvent::Closed { reason, .. })) => {
                Err(TunnelError::TransportClosed { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_emitted_once() {
        let (mut transport, driver) = Transport::with_driver();

        transport.sink.close(true, Some("done".into()));
        transport.sink.close(true, Some("again".into()));
        driver.handle.remote_closed(Some("carrier".into()));

        match transport.events.recv().await {
            Some(TransportEvent::Closed { explicit, reason }) => {
                assert!(explicit);
                assert_eq!(reason.as_deref(), Some("done"));
            }
            other => panic!("expected Closed, got {:?}", other),
        }
        // No second close event pending.
        assert!(transport.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_fifo_then_close() {
        let (mut transport, driver) = Transport::with_driver();

        driver.handle.deliver(vec![1]);
        driver.handle.deliver(vec![2]);
        driver.handle.remote_closed(None);
        driver.handle.deliver(vec![3]);

        assert!(matches!(transport.events.recv().await, Some(TransportEvent::Frame(f)) if f == [1]));
        assert!(matches!(transport.events.recv().await, Some(TransportEvent::Frame(f)) if f == [2]));
        assert!(matches!(
            transport.events.recv().await,
            Some(TransportEvent::Closed { explicit: false, .. })
        ));
        assert!(transport.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_errors() {
        let (transport, _driver) = Transport::with_driver();
        transport.sink.close(true, None);
        assert!(transport.sink.send(vec![0]).is_err());
    }
}
