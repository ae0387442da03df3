//! Deposit routing
//!
//! Decides whether a deposit seen on the local chain must be claimed on the
//! peer chain of this relay pair.

use crate::types::{ChainId, ClaimRequest, DepositEvent};

/// Map a deposit to the claim it authorizes on `peer`.
///
/// Returns `None` for any other destination, including `local` itself and
/// chains outside the pair. `local` only identifies the listener the deposit
/// came from; the claim carries the deposit's own source chain id.
pub fn route(event: &DepositEvent, local: ChainId, peer: ChainId) -> Option<ClaimRequest> {
    debug_assert_ne!(local, peer, "relay pair must have distinct chain ids");

    if event.destination_chain_id != peer {
        return None;
    }

    Some(ClaimRequest {
        recipient: event.sender,
        amount: event.amount,
        deposit_id: event.deposit_id,
        source_chain_id: event.source_chain_id,
    })
}
