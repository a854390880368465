//! Session and transaction id bookkeeping for the command-data path.

use crate::error::OperationError;
use std::collections::VecDeque;

/// TransactionID reserved for OpenSession and pre-session traffic.
pub const RESERVED_TRANSACTION_ID: u32 = 0x0000_0000;

/// TransactionID reserved as a sentinel; never issued.
pub const SENTINEL_TRANSACTION_ID: u32 = 0xFFFF_FFFF;

/// How many abandoned transactions are remembered at once.
const ABANDONED_CAPACITY: usize = 16;

/// Issues transaction ids and remembers the open session.
///
/// Ids start at 1, grow by one per operation and roll over from
/// `0xFFFFFFFE` to `0x00000001`; neither reserved value is ever issued.
#[derive(Debug, Clone)]
pub struct TransactionSequencer {
    next: u32,
    last_issued: Option<u32>,
    session_id: u32,
    /// Transactions given up on whose replies may still be in flight.
    abandoned: VecDeque<u32>,
}

impl Default for TransactionSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionSequencer {
    pub fn new() -> Self {
        Self {
            next: 1,
            last_issued: None,
            session_id: 0,
            abandoned: VecDeque::new(),
        }
    }

    /// Restarts the counter at 1. Called once the handshake completes.
    pub fn seed(&mut self) {
        self.next = 1;
        self.last_issued = None;
        self.abandoned.clear();
    }

    /// The id that follows `id`, skipping both reserved values.
    pub fn successor(id: u32) -> u32 {
        match id.wrapping_add(1) {
            RESERVED_TRANSACTION_ID | SENTINEL_TRANSACTION_ID => 1,
            next => next,
        }
    }

    /// Issues the next transaction id.
    pub fn next_id(&mut self) -> u32 {
        if self.next == RESERVED_TRANSACTION_ID || self.next == SENTINEL_TRANSACTION_ID {
            self.next = 1;
        }
        let id = self.next;
        self.next = Self::successor(id);
        self.last_issued = Some(id);
        id
    }

    /// Issues the reserved id for OpenSession without advancing the counter.
    pub fn issue_reserved(&mut self) -> u32 {
        self.last_issued = Some(RESERVED_TRANSACTION_ID);
        RESERVED_TRANSACTION_ID
    }

    /// Forces the counter so that the next issued id follows `id`.
    pub fn set_last_issued(&mut self, id: u32) {
        self.next = Self::successor(id);
        self.last_issued = Some(id);
    }

    /// The id [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u32 {
        match self.next {
            RESERVED_TRANSACTION_ID | SENTINEL_TRANSACTION_ID => 1,
            next => next,
        }
    }

    pub fn last_issued(&self) -> Option<u32> {
        self.last_issued
    }

    /// Checks a reply against the id most recently issued.
    pub fn validate(&self, received: u32) -> Result<(), OperationError> {
        let expected = self.last_issued.unwrap_or(RESERVED_TRANSACTION_ID);
        if received != expected {
            return Err(OperationError::TransactionMismatch { expected, received });
        }
        Ok(())
    }

    /// Gives up on transaction `id`. Late replies to it are recognised by
    /// [`is_stale`](Self::is_stale) and can be discarded.
    pub fn abandon(&mut self, id: u32) {
        if self.abandoned.contains(&id) {
            return;
        }
        if self.abandoned.len() == ABANDONED_CAPACITY {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(id);
    }

    /// Whether `received` belongs to an abandoned transaction rather than
    /// the one in progress.
    pub fn is_stale(&self, received: u32) -> bool {
        self.last_issued != Some(received) && self.abandoned.contains(&received)
    }

    /// Forgets abandoned transactions. The responder answers in order, so
    /// once a later transaction completes nothing older is still queued.
    pub fn settle(&mut self) {
        self.abandoned.clear();
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.len()
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn has_session(&self) -> bool {
        self.session_id != 0
    }

    pub fn open_session(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    pub fn close_session(&mut self) {
        self.session_id = 0;
    }
}
