//! The single send path to the attached debugger.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::DapError;
use crate::protocol::Outgoing;

struct Inner {
    last_seq: i64,
    tx: Option<UnboundedSender<Value>>,
}

/// Stamps sequence numbers and queues messages for the connection writer.
///
/// Stamping and queueing happen under one lock, so sequence numbers on the
/// wire follow send order. The counter survives reconnects.
pub struct Outbox {
    inner: Mutex<Inner>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_seq: 0,
                tx: None,
            }),
        }
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, tx: UnboundedSender<Value>) {
        self.lock().tx = Some(tx);
    }

    pub fn detach(&self) {
        self.lock().tx = None;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `message`. Messages sent while detached are dropped.
    pub fn send(&self, mut message: Outgoing) -> Result<(), DapError> {
        let mut inner = self.lock();
        let Some(tx) = inner.tx.clone() else {
            return Ok(());
        };
        let seq = inner.last_seq + 1;
        message.set_seq(seq);
        let value = message
            .to_value()
            .map_err(|e| DapError::InvalidMessage(e.to_string()))?;
        tx.send(value).map_err(|_| DapError::Disconnected)?;
        inner.last_seq = seq;
        Ok(())
    }
}
