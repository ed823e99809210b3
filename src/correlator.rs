//! Request bookkeeping: sequence indices and single-assignment result slots
//!
//! Every request gets a process-wide sequence index when it is created,
//! before it is dispatched, and a [`ResultSlot`] shared between the
//! connection worker (which settles it exactly once) and the mailbox
//! session (which reads it once the worker reports the index ready).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::{CommandKind, tag_for};
use crate::message::Message;

static NEXT_INDEX: AtomicU64 = AtomicU64::new(1);

/// Allocate the next sequence index. Indices are never reused.
pub fn next_index() -> u64 {
    NEXT_INDEX.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(Message),
    /// The connection went away before a response arrived.
    Abandoned,
}

/// Write-once cell for a request's response.
#[derive(Debug, Clone)]
pub struct ResultSlot {
    state: Arc<Mutex<SlotState>>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSlot {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Pending)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, next: SlotState) -> bool {
        let mut state = self.state();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = next;
        true
    }

    /// Store the response. Returns `false` if the slot was already settled.
    pub fn fulfill(&self, message: Message) -> bool {
        self.settle(SlotState::Ready(message))
    }

    /// Mark the slot as never going to be fulfilled.
    pub fn abandon(&self) -> bool {
        self.settle(SlotState::Abandoned)
    }

    /// The response, if it has arrived.
    #[must_use]
    pub fn try_get(&self) -> Option<Message> {
        match &*self.state() {
            SlotState::Ready(message) => Some(message.clone()),
            SlotState::Pending | SlotState::Abandoned => None,
        }
    }
}

/// One command on its way to the server.
#[derive(Debug)]
pub struct Request {
    pub index: u64,
    pub kind: CommandKind,
    /// Wire bytes, filled in when the command is formatted.
    pub data: Vec<u8>,
    pub slot: ResultSlot,
}

impl Request {
    /// A request with a fresh sequence index and an empty slot.
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            index: next_index(),
            kind,
            data: Vec::new(),
            slot: ResultSlot::new(),
        }
    }

    /// Completion tag the server will echo.
    #[must_use]
    pub fn tag(&self) -> String {
        tag_for(self.index)
    }
}
