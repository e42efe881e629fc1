//! Immutable settlement audit log with hash chaining.
//!
//! One record per payout. Each record's hash covers its own fields plus
//! the previous record's hash, so any tampering with history breaks the
//! chain and is caught by [`AuditLog::verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use openpredict_types::{MarketId, OpenpredictError, Resolution, Result, Ticks, UserId};

/// One settlement payout, as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 0.
    pub seq: u64,
    pub market_id: MarketId,
    pub user_id: UserId,
    /// Ticks credited to the user.
    pub amount: Ticks,
    pub resolution: Resolution,
    pub at: DateTime<Utc>,
    /// Hash of the previous record (zeros for the first).
    pub prev_hash: String,
    /// SHA-256 over this record's fields and `prev_hash`.
    pub hash: String,
}

fn compute_hash(
    seq: u64,
    market_id: MarketId,
    user_id: UserId,
    amount: Ticks,
    resolution: Resolution,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"openpredict:audit:v1:");
    hasher.update(seq.to_le_bytes());
    hasher.update(market_id.0.as_bytes());
    hasher.update(user_id.0.as_bytes());
    hasher.update(amount.to_le_bytes());
    match resolution {
        Resolution::Outcome(ix) => {
            hasher.update([0u8]);
            hasher.update((ix as u64).to_le_bytes());
        }
        Resolution::Value(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
    }
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Append-only chain of audit records.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payout record, chaining it to the previous one.
    pub fn append(
        &mut self,
        market_id: MarketId,
        user_id: UserId,
        amount: Ticks,
        resolution: Resolution,
    ) -> &AuditRecord {
        let seq = self.records.len() as u64;
        let prev_hash = self
            .records
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |r| r.hash.clone());
        let hash = compute_hash(seq, market_id, user_id, amount, resolution, &prev_hash);
        self.records.push(AuditRecord {
            seq,
            market_id,
            user_id,
            amount,
            resolution,
            at: Utc::now(),
            prev_hash,
            hash,
        });
        self.records.last().expect("record just pushed")
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    /// Records for one market, oldest first.
    #[must_use]
    pub fn for_market(&self, market_id: MarketId) -> Vec<&AuditRecord> {
        self.records
            .iter()
            .filter(|r| r.market_id == market_id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-derive every hash and check the chain links.
    ///
    /// # Errors
    /// `InvariantViolation` naming the first broken record.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev_hash = GENESIS_HASH.to_string();
        for record in &self.records {
            if record.prev_hash != prev_hash {
                return Err(OpenpredictError::InvariantViolation {
                    reason: format!("audit record {} has a broken chain link", record.seq),
                });
            }
            let expected = compute_hash(
                record.seq,
                record.market_id,
                record.user_id,
                record.amount,
                record.resolution,
                &record.prev_hash,
            );
            if record.hash != expected {
                return Err(OpenpredictError::InvariantViolation {
                    reason: format!("audit record {} hash mismatch", record.seq),
                });
            }
            prev_hash = record.hash.clone();
        }
        Ok(())
    }
}
