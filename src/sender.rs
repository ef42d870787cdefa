//! Event dispatch: inline or through a dedicated sender thread.
//!
//! Inline dispatch runs the forwarder inside the capture callback, so a slow
//! ingestion endpoint throttles capture by up to the POST timeout per frame.
//! The queued variant hands events to one sender thread over a bounded FIFO.
//! A single consumer keeps per-address order.  When the queue is full the
//! new event is dropped and counted.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::telemetry::{Forwarder, OutboundEvent};

/// Log the first drop and then every this-many drops.
const DROP_LOG_EVERY: u64 = 1000;

pub struct QueuedSender {
    tx: SyncSender<OutboundEvent>,
    thread: JoinHandle<()>,
    dropped: u64,
}

pub enum Dispatcher {
    Inline(Forwarder),
    Queued(QueuedSender),
}

impl Dispatcher {
    pub fn inline(forwarder: Forwarder) -> Self {
        Dispatcher::Inline(forwarder)
    }

    /// Move `forwarder` onto its own thread behind a queue of `depth` events.
    pub fn queued(mut forwarder: Forwarder, depth: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<OutboundEvent>(depth);
        let thread = thread::Builder::new()
            .name("telemetry-sender".into())
            .spawn(move || {
                for event in rx {
                    forwarder.forward(&event);
                }
            })?;
        Ok(Dispatcher::Queued(QueuedSender {
            tx,
            thread,
            dropped: 0,
        }))
    }

    pub fn dispatch(&mut self, event: OutboundEvent) {
        match self {
            Dispatcher::Inline(forwarder) => forwarder.forward(&event),
            Dispatcher::Queued(sender) => match sender.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    sender.dropped += 1;
                    if sender.dropped == 1 || sender.dropped % DROP_LOG_EVERY == 0 {
                        log::warn!(
                            "Telemetry queue full, dropped {} event(s) so far (latest: {} for {})",
                            sender.dropped,
                            event.kind(),
                            event.address()
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    sender.dropped += 1;
                    if sender.dropped == 1 {
                        log::error!("Telemetry sender thread is gone; events are being dropped");
                    }
                }
            },
        }
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        match self {
            Dispatcher::Inline(_) => 0,
            Dispatcher::Queued(sender) => sender.dropped,
        }
    }

    /// Close the queue and wait for the sender to drain it.
    pub fn shutdown(self) {
        if let Dispatcher::Queued(QueuedSender { tx, thread, .. }) = self {
            drop(tx);
            if thread.join().is_err() {
                log::error!("Telemetry sender thread panicked");
            }
        }
    }
}
