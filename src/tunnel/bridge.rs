//! Cross-thread notification bridge
//!
//! Moves exactly one event at a time from the worker performing TLS I/O to
//! the thread that owns the tunnel callbacks. The slot holds at most one
//! unconsumed notification per session: [`NotifySender::notify`] blocks
//! until the previous one has been drained (back-pressure, never overwrite),
//! and [`NotifySender::try_notify`] turns a premature second enqueue into a
//! detectable violation instead.
//!
//! Dropping either end releases the other, so teardown cannot deadlock on a
//! stalled peer.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::tls::SessionState;

use super::{Error, Result};

/// One state transition, produced once and consumed once
#[derive(Debug)]
pub struct Notification {
    pub state: SessionState,
    pub payload: Option<Bytes>,
}

struct Slot {
    notification: Option<Notification>,
    tx_alive: bool,
    rx_alive: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    produced: Condvar,
    consumed: Condvar,
}

/// Producer half; owned by the I/O worker
pub struct NotifySender {
    shared: Arc<Shared>,
}

/// Consumer half; owned by the callback-dispatching side
pub struct NotifyReceiver {
    shared: Arc<Shared>,
}

/// Create a connected single-slot pair
pub fn channel() -> (NotifySender, NotifyReceiver) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            notification: None,
            tx_alive: true,
            rx_alive: true,
        }),
        produced: Condvar::new(),
        consumed: Condvar::new(),
    });
    (
        NotifySender {
            shared: Arc::clone(&shared),
        },
        NotifyReceiver { shared },
    )
}

impl NotifySender {
    /// Enqueue a notification, waiting for the previous one to drain first.
    ///
    /// Errors with [`Error::BridgeClosed`] once the receiver is gone.
    pub fn notify(&self, state: SessionState, payload: Option<Bytes>) -> Result<()> {
        let mut slot = self.shared.slot.lock().unwrap();
        while slot.notification.is_some() {
            if !slot.rx_alive {
                return Err(Error::BridgeClosed);
            }
            slot = self.shared.consumed.wait(slot).unwrap();
        }
        if !slot.rx_alive {
            return Err(Error::BridgeClosed);
        }
        slot.notification = Some(Notification { state, payload });
        self.shared.produced.notify_one();
        Ok(())
    }

    /// Like [`notify`](Self::notify) but a still-occupied slot is reported
    /// as [`Error::BridgeBusy`] instead of waited out. A busy result means
    /// the producer ran ahead of the consumer, which the blocking path must
    /// never allow.
    pub fn try_notify(&self, state: SessionState, payload: Option<Bytes>) -> Result<()> {
        let mut slot = self.shared.slot.lock().unwrap();
        if !slot.rx_alive {
            return Err(Error::BridgeClosed);
        }
        if slot.notification.is_some() {
            return Err(Error::BridgeBusy);
        }
        slot.notification = Some(Notification { state, payload });
        self.shared.produced.notify_one();
        Ok(())
    }
}

impl Drop for NotifySender {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock().unwrap();
        slot.tx_alive = false;
        self.shared.produced.notify_all();
    }
}

impl NotifyReceiver {
    /// Take the pending notification, waiting up to `timeout` for one.
    ///
    /// `Ok(None)` on timeout; [`Error::BridgeClosed`] once the sender is
    /// gone and no notification remains.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<Notification>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            if let Some(notification) = slot.notification.take() {
                self.shared.consumed.notify_one();
                return Ok(Some(notification));
            }
            if !slot.tx_alive {
                return Err(Error::BridgeClosed);
            }
            match deadline {
                None => {
                    slot = self.shared.produced.wait(slot).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let (guard, result) = self
                        .shared
                        .produced
                        .wait_timeout(slot, deadline - now)
                        .unwrap();
                    slot = guard;
                    if result.timed_out() && slot.notification.is_none() {
                        if !slot.tx_alive {
                            return Err(Error::BridgeClosed);
                        }
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Drop for NotifyReceiver {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock().unwrap();
        slot.rx_alive = false;
        self.shared.consumed.notify_all();
    }
}
