//! Session-scoped claim ledger
//!
//! Tracks every deposit the relayer has started claiming, keyed by
//! `(source chain, deposit id)`, so the same deposit is never submitted twice
//! by this process. Bounded by capacity and TTL to avoid unbounded growth
//! under long runtimes or adversarial event volume.
//!
//! Each entry is ~80 bytes, so the default 100k entries is about 8 MB.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::SubmissionErrorKind;
use crate::types::{ChainId, ClaimRequest, DepositId, TxHandle};

pub const DEFAULT_LEDGER_CAPACITY: usize = 100_000;
pub const DEFAULT_LEDGER_TTL_SECS: u64 = 86_400; // 24 hours

/// Idempotency key for a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimKey {
    pub source_chain_id: ChainId,
    pub deposit_id: DepositId,
}

impl From<&ClaimRequest> for ClaimKey {
    fn from(request: &ClaimRequest) -> Self {
        Self {
            source_chain_id: request.source_chain_id,
            deposit_id: request.deposit_id,
        }
    }
}

/// Where a claim stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Submission or retry in progress
    InFlight { attempts: u32 },
    /// Claim transaction accepted
    Claimed { tx: TxHandle },
    /// Terminal failure; needs manual reconciliation
    Failed { kind: SubmissionErrorKind },
}

impl ClaimStatus {
    fn is_settled(&self) -> bool {
        !matches!(self, ClaimStatus::InFlight { .. })
    }
}

/// Why a claim could not be registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginRefused {
    /// The deposit is already known; nothing must be submitted
    Known(ClaimStatus),
    /// Every slot holds an in-flight claim
    Full,
}

/// Bounded map of claim key to status.
///
/// - **Max capacity:** when full, the oldest settled entry is evicted. In-flight
///   entries are never evicted; new claims are refused until one settles.
/// - **TTL:** settled entries older than the TTL are dropped on insert.
pub struct ClaimLedger {
    entries: HashMap<ClaimKey, (ClaimStatus, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl Default for ClaimLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY, DEFAULT_LEDGER_TTL_SECS)
    }
}

impl ClaimLedger {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Register a new claim. Refused if the deposit is already known or the
    /// ledger is full of in-flight claims.
    pub fn try_begin(&mut self, key: ClaimKey) -> Result<(), BeginRefused> {
        if let Some(existing) = self.status(&key) {
            return Err(BeginRefused::Known(existing.clone()));
        }
        self.evict(Instant::now());
        if self.entries.len() >= self.max_size {
            return Err(BeginRefused::Full);
        }
        self.entries
            .insert(key, (ClaimStatus::InFlight { attempts: 1 }, Instant::now()));
        Ok(())
    }

    /// Count another submission attempt for an in-flight claim
    pub fn record_retry(&mut self, key: &ClaimKey) {
        if let Some((ClaimStatus::InFlight { attempts }, _)) = self.entries.get_mut(key) {
            *attempts += 1;
        }
    }

    pub fn mark_claimed(&mut self, key: ClaimKey, tx: TxHandle) {
        self.entries
            .insert(key, (ClaimStatus::Claimed { tx }, Instant::now()));
    }

    pub fn mark_failed(&mut self, key: ClaimKey, kind: SubmissionErrorKind) {
        self.entries
            .insert(key, (ClaimStatus::Failed { kind }, Instant::now()));
    }

    pub fn status(&self, key: &ClaimKey) -> Option<&ClaimStatus> {
        self.entries
            .get(key)
            .filter(|(status, t)| !status.is_settled() || t.elapsed() < self.ttl)
            .map(|(status, _)| status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of claims currently being submitted or retried
    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|(status, _)| !status.is_settled())
            .count()
    }

    fn evict(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (status, t)| !status.is_settled() || now.duration_since(*t) < ttl);

        while self.entries.len() >= self.max_size {
            let oldest = self
                .entries
                .iter()
                .filter(|(_, (status, _))| status.is_settled())
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> ClaimKey {
        ClaimKey {
            source_chain_id: ChainId(1),
            deposit_id: DepositId([n; 32]),
        }
    }

    #[test]
    fn test_begin_then_duplicate() {
        let mut ledger = ClaimLedger::new(10, 3600);
        assert!(ledger.try_begin(key(1)).is_ok());
        assert_eq!(
            ledger.try_begin(key(1)),
            Err(BeginRefused::Known(ClaimStatus::InFlight { attempts: 1 }))
        );
    }

    #[test]
    fn test_same_deposit_id_on_other_chain_is_distinct() {
        let mut ledger = ClaimLedger::new(10, 3600);
        let a = key(1);
        let b = ClaimKey {
            source_chain_id: ChainId(2),
            ..a
        };
        assert!(ledger.try_begin(a).is_ok());
        assert!(ledger.try_begin(b).is_ok());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_failed_blocks_resubmission() {
        let mut ledger = ClaimLedger::new(10, 3600);
        ledger.try_begin(key(1)).unwrap();
        ledger.mark_failed(key(1), SubmissionErrorKind::Reverted);
        assert_eq!(
            ledger.try_begin(key(1)),
            Err(BeginRefused::Known(ClaimStatus::Failed {
                kind: SubmissionErrorKind::Reverted
            }))
        );
    }

    #[test]
    fn test_record_retry_counts_attempts() {
        let mut ledger = ClaimLedger::new(10, 3600);
        ledger.try_begin(key(1)).unwrap();
        ledger.record_retry(&key(1));
        assert_eq!(
            ledger.status(&key(1)),
            Some(&ClaimStatus::InFlight { attempts: 2 })
        );
        assert_eq!(ledger.in_flight(), 1);
    }

    #[test]
    fn test_evicts_settled_before_in_flight() {
        let mut ledger = ClaimLedger::new(2, 3600);
        ledger.try_begin(key(1)).unwrap();
        ledger.try_begin(key(2)).unwrap();
        ledger.mark_claimed(key(2), TxHandle("0xabc".into()));
        ledger.try_begin(key(3)).unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.status(&key(1)).is_some());
        assert!(ledger.status(&key(2)).is_none());
        assert!(ledger.status(&key(3)).is_some());
    }

    #[test]
    fn test_full_of_in_flight_refuses_new_claims() {
        let mut ledger = ClaimLedger::new(2, 3600);
        ledger.try_begin(key(1)).unwrap();
        ledger.try_begin(key(2)).unwrap();

        assert_eq!(ledger.try_begin(key(3)), Err(BeginRefused::Full));
        // The oldest in-flight claim is still tracked, so a redelivery is a duplicate
        assert_eq!(
            ledger.try_begin(key(1)),
            Err(BeginRefused::Known(ClaimStatus::InFlight { attempts: 1 }))
        );

        ledger.mark_claimed(key(1), TxHandle("0xabc".into()));
        assert!(ledger.try_begin(key(3)).is_ok());
        assert!(ledger.status(&key(1)).is_none());
        assert!(ledger.status(&key(2)).is_some());
    }

    #[test]
    fn test_expired_settled_entries_are_forgotten() {
        let mut ledger = ClaimLedger::new(10, 0);
        ledger.try_begin(key(1)).unwrap();
        ledger.mark_claimed(key(1), TxHandle("0xabc".into()));
        assert!(ledger.status(&key(1)).is_none());
        assert!(ledger.try_begin(key(1)).is_ok());
    }
}
