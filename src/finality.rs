//! Confirmation-depth gate
//!
//! Holds deposits until their block is buried under enough confirmations,
//! releasing them in arrival order. With `confirmations <= 1` (act on the
//! block containing the deposit) everything is released immediately.

use std::collections::VecDeque;

use crate::types::DepositEvent;

pub struct ConfirmationGate {
    confirmations: u64,
    pending: VecDeque<DepositEvent>,
}

impl ConfirmationGate {
    pub fn new(confirmations: u64) -> Self {
        Self {
            confirmations,
            pending: VecDeque::new(),
        }
    }

    /// Whether releasing requires knowing the current head
    pub fn needs_head(&self) -> bool {
        self.confirmations > 1 && !self.pending.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, event: DepositEvent) {
        self.pending.push_back(event);
    }

    /// Release every deposit at the front of the queue that is final at `head`.
    ///
    /// Stops at the first deposit that is not yet final so later deposits
    /// never overtake earlier ones. Deposits without a block number are
    /// treated as final.
    pub fn release(&mut self, head: Option<u64>) -> Vec<DepositEvent> {
        let mut released = Vec::new();
        while let Some(front) = self.pending.front() {
            if !self.is_final(front, head) {
                break;
            }
            if let Some(event) = self.pending.pop_front() {
                released.push(event);
            }
        }
        released
    }

    fn is_final(&self, event: &DepositEvent, head: Option<u64>) -> bool {
        if self.confirmations <= 1 {
            return true;
        }
        match (event.origin.block_number, head) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(block), Some(head)) => {
                head.saturating_sub(block).saturating_add(1) >= self.confirmations
            }
        }
    }
}
