//! Audit logging for access decisions, credit charges and permission edits
//!
//! Two layers:
//! - [`AuditLogger`]: bounded ring buffer plus a background flush thread for
//!   the high-volume stream of evaluations (compact, fixed-size entries)
//! - [`AuditTrail`]: append-only, hash-chained records of charges and admin
//!   edits, queryable by the back-office audit viewer

mod ring_buffer;
mod trail;

pub use ring_buffer::RingBuffer;
pub use trail::{AuditQuery, AuditRecord, AuditTrail, GENESIS_HASH};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

/// What was audited
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Access check
    Evaluate = 0,
    /// Credits taken for a feature invocation
    Charge = 1,
    /// Admin created or replaced a permission row
    PermissionUpsert = 2,
    /// Admin deactivated a permission row
    PermissionDeactivate = 3,
    /// Permission snapshot reloaded from its source
    CatalogRefetch = 4,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Evaluate => "evaluate",
            AuditAction::Charge => "charge",
            AuditAction::PermissionUpsert => "permission_upsert",
            AuditAction::PermissionDeactivate => "permission_deactivate",
            AuditAction::CatalogRefetch => "catalog_refetch",
        }
    }
}

/// Stable 64-bit id for a user id or feature key
pub fn audit_id(value: &str) -> u64 {
    xxh3_64(value.as_bytes())
}

/// Single audit log entry (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    /// Microseconds since the UNIX epoch
    pub timestamp_us: u64,
    /// [`audit_id`] of the user, 0 for anonymous
    pub actor_id: u64,
    /// [`audit_id`] of the feature key
    pub feature_id: u64,
    pub credits: u32,
    pub action: AuditAction,
    /// 0 for granted, otherwise [`DenyReason::code`](crate::DenyReason::code)
    pub outcome: u8,
    _padding: u16,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(actor: Option<&str>, action: AuditAction, feature_key: &str, outcome: u8, credits: u32) -> Self {
        AuditEntry {
            timestamp_us: u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default(),
            actor_id: actor.map_or(0, audit_id),
            feature_id: audit_id(feature_key),
            credits,
            action,
            outcome,
            _padding: 0,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == 0
    }
}

/// Audit logger with background flushing
pub struct AuditLogger {
    ring_buffer: Arc<RingBuffer<AuditEntry>>,
    flush_thread: Option<JoinHandle<()>>,
    flush_interval: Duration,
    running: Arc<Mutex<bool>>,
}

impl AuditLogger {
    /// # Arguments
    /// * `capacity` - Ring buffer capacity (rounded up to a power of two)
    /// * `flush_interval` - How often the flush thread drains the buffer
    pub fn new(capacity: usize, flush_interval: Duration) -> Self {
        AuditLogger {
            ring_buffer: Arc::new(RingBuffer::new(capacity)),
            flush_thread: None,
            flush_interval,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Start the background flush thread
    ///
    /// `flush_callback` receives batches of entries; whatever is still
    /// buffered when the logger stops is delivered in a final batch.
    pub fn start<F>(&mut self, flush_callback: F)
    where
        F: Fn(&[AuditEntry]) + Send + 'static,
    {
        if self.flush_thread.is_some() {
            return;
        }
        *self.running.lock() = true;

        let ring_buffer = Arc::clone(&self.ring_buffer);
        let flush_interval = self.flush_interval;
        let running = Arc::clone(&self.running);

        let flush_thread = thread::spawn(move || {
            loop {
                thread::sleep(flush_interval);
                let still_running = *running.lock();

                loop {
                    let entries = ring_buffer.read_batch(1000);
                    if entries.is_empty() {
                        break;
                    }
                    flush_callback(&entries);
                }

                if !still_running {
                    break;
                }
            }
        });

        self.flush_thread = Some(flush_thread);
    }

    /// Stop the flush thread after a final drain
    pub fn stop(&mut self) {
        *self.running.lock() = false;

        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }
    }

    /// Log an entry (non-blocking)
    pub fn log(&self, entry: AuditEntry) {
        self.ring_buffer.write(entry);
    }

    /// (written, drained) counters
    pub fn stats(&self) -> (usize, usize) {
        self.ring_buffer.stats()
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
