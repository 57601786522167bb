//! Hash-chained audit trail
//!
//! Each record stores the SHA-256 of its predecessor, so editing, dropping or
//! reordering exported records breaks the chain and [`AuditTrail::verify`]
//! points at the first bad record.
//!
//! [`AuditTrail::drain`] hands the records to an archive and keeps only the
//! chain anchor (next sequence number and last hash), so later records still
//! link to the drained ones.

use super::AuditAction;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hash of the (virtual) record before the first one
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One audited event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the trail, starting at 0
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// User id of whoever triggered the event
    pub actor: String,
    pub action: AuditAction,
    pub feature_key: String,
    /// "granted", a deny reason code, or a short description of the edit
    pub outcome: String,
    pub credits: i64,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditRecord {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.seq.to_le_bytes());
        hasher.update(self.at.to_rfc3339().as_bytes());
        // Length prefixes keep field boundaries unambiguous.
        for field in [
            self.actor.as_str(),
            self.action.as_str(),
            self.feature_key.as_str(),
            self.outcome.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.credits.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Filter for the audit viewer; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub feature_key: Option<String>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn feature(mut self, feature_key: impl Into<String>) -> Self {
        self.feature_key = Some(feature_key.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Records at or after `since` and strictly before `until`
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        self.actor.as_ref().map_or(true, |a| *a == record.actor)
            && self.feature_key.as_ref().map_or(true, |f| *f == record.feature_key)
            && self.action.map_or(true, |a| a == record.action)
            && self.since.map_or(true, |s| record.at >= s)
            && self.until.map_or(true, |u| record.at < u)
    }
}

/// Append-only audit trail
#[derive(Debug, Default)]
pub struct AuditTrail {
    chain: RwLock<Chain>,
}

#[derive(Debug)]
struct Chain {
    records: Vec<AuditRecord>,
    /// Sequence number of `records[0]`
    base_seq: u64,
    /// Hash `records[0]` links to
    base_hash: String,
}

impl Default for Chain {
    fn default() -> Self {
        Chain {
            records: Vec::new(),
            base_seq: 0,
            base_hash: GENESIS_HASH.to_string(),
        }
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a trail from exported records without re-hashing them
    ///
    /// The records must start at the genesis record.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        AuditTrail {
            chain: RwLock::new(Chain {
                records,
                ..Chain::default()
            }),
        }
    }

    /// Append a record and return it
    pub fn append(
        &self,
        actor: &str,
        action: AuditAction,
        feature_key: &str,
        outcome: &str,
        credits: i64,
    ) -> AuditRecord {
        let mut chain = self.chain.write();
        let prev_hash = chain
            .records
            .last()
            .map_or_else(|| chain.base_hash.clone(), |r| r.hash.clone());

        let mut record = AuditRecord {
            seq: chain.base_seq + chain.records.len() as u64,
            at: Utc::now(),
            actor: actor.to_string(),
            action,
            feature_key: feature_key.to_string(),
            outcome: outcome.to_string(),
            credits,
            prev_hash,
            hash: String::new(),
        };
        record.hash = record.compute_hash();

        chain.records.push(record.clone());
        record
    }

    /// Records currently held (drained records not counted)
    pub fn len(&self) -> usize {
        self.chain.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().records.is_empty()
    }

    /// Check the records still held against the chain anchor
    ///
    /// Returns the sequence number of the first record whose position, link or
    /// hash does not check out.
    pub fn verify(&self) -> Result<(), u64> {
        let chain = self.chain.read();
        Self::verify_records(&chain.records, chain.base_seq, &chain.base_hash)
    }

    /// Check a run of records that starts at `first_seq` and links to `prev_hash`
    ///
    /// A segment returned by the first [`drain`](Self::drain) starts at 0 and
    /// links to [`GENESIS_HASH`]; later segments link to the last hash of the
    /// segment before them.
    pub fn verify_records(records: &[AuditRecord], first_seq: u64, prev_hash: &str) -> Result<(), u64> {
        let mut expected_prev = prev_hash;

        for (offset, record) in records.iter().enumerate() {
            let seq = first_seq + offset as u64;
            let intact = record.seq == seq
                && record.prev_hash == expected_prev
                && record.hash == record.compute_hash();
            if !intact {
                warn!("Audit chain broken at record {}", seq);
                return Err(seq);
            }
            expected_prev = record.hash.as_str();
        }

        Ok(())
    }

    /// Remove and return every held record, oldest first
    ///
    /// The trail keeps appending from where the drained records ended.
    pub fn drain(&self) -> Vec<AuditRecord> {
        let mut chain = self.chain.write();
        let drained = std::mem::take(&mut chain.records);
        if let Some(last) = drained.last() {
            chain.base_seq = last.seq + 1;
            chain.base_hash = last.hash.clone();
        }
        drained
    }

    /// Matching records, newest first
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let chain = self.chain.read();
        let matching = chain.records.iter().rev().filter(|r| query.matches(r)).cloned();

        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Every record, oldest first
    pub fn export(&self) -> Vec<AuditRecord> {
        self.chain.read().records.clone()
    }

    /// Export as JSON lines, one record per line
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let chain = self.chain.read();
        let mut out = String::new();
        for record in chain.records.iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
