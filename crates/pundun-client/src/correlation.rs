//! Correlation table: correlation id → single-slot rendezvous.
//!
//! Issuers register a slot before writing their frame; the listener delivers
//! into it; the issuer (or its dropped [`PendingReply`](crate::PendingReply))
//! removes it. Closing the table fails every registered slot and refuses new
//! registrations, so no issuer can be left waiting on a dead connection.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::trace;

use crate::error::{ClientError, CloseReason, Result};
use crate::ids::CorrelationIds;

/// What a slot receives: the response payload, or the reason the connection died.
#[derive(Debug)]
pub(crate) enum Delivery {
    Response(Bytes),
    Closed(CloseReason),
}

/// Result of routing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The payload was placed into the waiting slot.
    Delivered,
    /// No outstanding request carries this correlation id.
    Unmatched,
    /// The slot already holds an unconsumed response; the payload was dropped.
    Duplicate,
    /// The waiter is gone; its stale entry was removed.
    Abandoned,
}

/// A freshly registered slot, owned by the issuer.
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) correlation_id: u16,
    pub(crate) token: u64,
    pub(crate) receiver: Receiver<Delivery>,
}

#[derive(Debug)]
struct Slot {
    token: u64,
    sender: SyncSender<Delivery>,
}

#[derive(Debug, Default)]
struct TableState {
    slots: HashMap<u16, Slot>,
    closed: Option<CloseReason>,
    next_token: u64,
}

/// Number of distinct correlation ids.
pub const CORRELATION_ID_SPACE: usize = u16::MAX as usize + 1;

/// Shared map of outstanding requests.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    state: Mutex<TableState>,
}

impl CorrelationTable {
    /// Create an empty, open table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a slot under the next free correlation id.
    ///
    /// Ids still present in the table are skipped, so a live key is never
    /// handed out twice.
    pub(crate) fn register(
        &self,
        ids: &CorrelationIds,
        max_pending: usize,
    ) -> Result<Registration> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(ClientError::ConnectionClosed(reason.clone()));
        }

        let max = max_pending.min(CORRELATION_ID_SPACE);
        let pending = state.slots.len();
        if pending >= max {
            return Err(ClientError::TooManyPending { pending, max });
        }

        let mut correlation_id = ids.next();
        let mut skipped = 0usize;
        while state.slots.contains_key(&correlation_id) {
            skipped += 1;
            correlation_id = ids.next();
        }
        if skipped > 0 {
            trace!(correlation_id, skipped, "skipped live correlation ids");
        }

        let token = state.next_token;
        state.next_token = state.next_token.wrapping_add(1);
        let (sender, receiver) = mpsc::sync_channel(1);
        state.slots.insert(correlation_id, Slot { token, sender });
        trace!(correlation_id, pending = pending + 1, "registered slot");

        Ok(Registration {
            correlation_id,
            token,
            receiver,
        })
    }

    /// Deliver a response payload to the slot registered under `correlation_id`.
    ///
    /// Never blocks and never overwrites an unconsumed response.
    pub fn deliver(&self, correlation_id: u16, payload: Bytes) -> DeliveryOutcome {
        let mut state = self.lock();
        let Some(slot) = state.slots.get(&correlation_id) else {
            return DeliveryOutcome::Unmatched;
        };
        match slot.sender.try_send(Delivery::Response(payload)) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::Duplicate,
            Err(TrySendError::Disconnected(_)) => {
                state.slots.remove(&correlation_id);
                DeliveryOutcome::Abandoned
            }
        }
    }

    /// Remove the slot registered under `correlation_id` by the registration
    /// holding `token`. Returns whether an entry was removed.
    pub(crate) fn remove(&self, correlation_id: u16, token: u64) -> bool {
        let mut state = self.lock();
        match state.slots.get(&correlation_id) {
            Some(slot) if slot.token == token => {
                state.slots.remove(&correlation_id);
                true
            }
            _ => false,
        }
    }

    /// Close the table: record `reason` (the first reason wins), fail every
    /// registered slot with it and leave the table empty.
    ///
    /// Returns the number of slots that were failed.
    pub fn close(&self, reason: CloseReason) -> usize {
        let mut state = self.lock();
        let reason = state.closed.get_or_insert(reason).clone();
        let failed = state.slots.len();
        for (_, slot) in state.slots.drain() {
            // A full slot already holds its response; the waiter still gets it.
            let _ = slot.sender.try_send(Delivery::Closed(reason.clone()));
        }
        failed
    }

    /// Reason the table was closed, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().closed.clone()
    }

    /// Whether the table still accepts registrations.
    pub fn is_open(&self) -> bool {
        self.lock().closed.is_none()
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }
}
