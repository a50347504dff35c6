//! Bounded queue carrying messages from background helpers to the owner thread.

use crate::{CherryTreeError, Result};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Mutex;

/// Cloneable sending half of a [`DiagnosticsQueue`].
#[derive(Debug)]
pub struct DiagnosticsSender<T> {
    sender: SyncSender<T>,
    capacity: usize,
}

impl<T> Clone for DiagnosticsSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> DiagnosticsSender<T> {
    /// Enqueues without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::Capacity`] when the queue is full and drops
    /// the message; the overflow is logged.
    pub fn push(&self, message: T) -> Result<()> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::warn!("diagnostics queue full ({} slots), message dropped", self.capacity);
                Err(CherryTreeError::Capacity(self.capacity))
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("diagnostics queue closed, message dropped");
                Ok(())
            }
        }
    }
}

/// A fixed-capacity FIFO of messages.
#[derive(Debug)]
pub struct DiagnosticsQueue<T> {
    sender: DiagnosticsSender<T>,
    receiver: Mutex<Receiver<T>>,
}

impl<T> DiagnosticsQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel(capacity);
        Self {
            sender: DiagnosticsSender { sender, capacity },
            receiver: Mutex::new(receiver),
        }
    }

    /// A sender to hand to a background helper.
    pub fn sender(&self) -> DiagnosticsSender<T> {
        self.sender.clone()
    }

    pub fn push(&self, message: T) -> Result<()> {
        self.sender.push(message)
    }

    /// Blocks until a message is available.
    ///
    /// Never returns `None` while the queue itself holds a sender.
    pub fn pop(&self) -> Option<T> {
        let receiver = self.receiver.lock().ok()?;
        receiver.recv().ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        let receiver = self.receiver.lock().ok()?;
        match receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Takes every message currently queued.
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }
}
