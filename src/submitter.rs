//! Claim submitter
//!
//! Builds the destination chain's claim call from a [`ClaimRequest`] and sends
//! it through the chain client. Failures are classified so the coordinator can
//! decide whether a retry is safe; the destination contract remains the only
//! authority on whether a duplicate claim reverts.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain_client::{ChainClient, TxOptions};
use crate::error::SubmissionFailure;
use crate::types::{ChainId, ClaimRequest, SubmissionResult};

pub struct ClaimSubmitter {
    chain_name: String,
    chain_id: ChainId,
    client: Arc<dyn ChainClient>,
    contract: String,
    function: String,
    fee_limit: Option<u128>,
}

impl ClaimSubmitter {
    pub fn new(
        chain_name: impl Into<String>,
        chain_id: ChainId,
        client: Arc<dyn ChainClient>,
        contract: impl Into<String>,
        function: impl Into<String>,
        fee_limit: Option<u128>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            chain_id,
            client,
            contract: contract.into(),
            function: function.into(),
            fee_limit,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Send one claim attempt
    pub async fn submit(&self, request: &ClaimRequest) -> SubmissionResult {
        let call = request.to_call(&self.function);
        let options = TxOptions {
            fee_limit: self.fee_limit,
        };

        debug!(
            chain = %self.chain_name,
            signature = %call.signature(),
            recipient = %request.recipient,
            amount = %request.amount,
            deposit_id = %request.deposit_id,
            source_chain_id = %request.source_chain_id,
            fee_limit = ?self.fee_limit,
            "Submitting claim"
        );

        match self
            .client
            .send_transaction(&self.contract, &call, &options)
            .await
        {
            Ok(tx) => {
                info!(
                    chain = %self.chain_name,
                    tx = %tx,
                    deposit_id = %request.deposit_id,
                    "Claim transaction accepted"
                );
                SubmissionResult::Success { tx }
            }
            Err(e) => {
                let failure = SubmissionFailure::from(&e);
                warn!(
                    chain = %self.chain_name,
                    deposit_id = %request.deposit_id,
                    kind = %failure.kind,
                    retryable = failure.retryable,
                    error = %e,
                    "Claim submission failed"
                );
                SubmissionResult::Failure(failure)
            }
        }
    }
}
