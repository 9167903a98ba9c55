// ── Per-device command mailbox ──
//
// Bounded FIFO between the command router and a device worker. When full,
// the oldest entry is discarded so the newest setpoint always wins.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// A command waiting for the device's next exchange cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum MailboxCommand {
    /// One duty cycle applied to the fans marked in `selection`.
    DutyCycle { dc: f64, selection: String },
    /// Per-fan duty cycles, already padded to the fleet fan width.
    DutyCycleVector(Vec<f64>),
    Disconnect,
    Reboot,
}

#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<MailboxCommand>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a command. Returns `true` if an older command was dropped.
    pub fn push(&self, command: MailboxCommand) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let overflowed = queue.len() >= self.capacity;
        if overflowed {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(command);
        overflowed
    }

    pub fn pop(&self) -> Option<MailboxCommand> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands discarded on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
