//! Per-session work units

use super::constants::{NONCE_OFFSET, NONCE_SIZE};
use super::BlockTemplate;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Monotonically increasing decimal job identifier.
///
/// Minted from a single pool-wide counter, so ids are strictly ordered
/// across every session of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Build a job id from the pool-wide counter value.
    pub fn from_counter(counter: u64) -> Self {
        Self(counter.to_string())
    }

    /// The id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unit of work handed to one session for one template.
///
/// Everything except the submission set is frozen at mint time. The
/// template is referenced weakly: once the feed drops it, submissions
/// against this job are stale by construction.
#[derive(Debug)]
pub struct WorkerJob {
    /// Wire job id
    pub id: JobId,
    /// Back-reference to the minting template
    template: Weak<BlockTemplate>,
    /// Pool-scoped nonce spliced at the reserved offset
    pub instance_nonce: u32,
    /// Session-scoped nonce spliced after the instance nonce
    pub extra_nonce: u32,
    /// Miner difficulty at mint time
    pub difficulty: u64,
    /// Template height, kept for the wire form
    pub height: u64,
    /// Seed hash copied from the template
    pub seed_hash: Option<[u8; 32]>,
    /// Normalized nonces already submitted on this job
    submissions: Mutex<HashSet<String>>,
}

impl WorkerJob {
    /// Create a job bound to `template`.
    pub fn new(
        id: JobId,
        template: &Arc<BlockTemplate>,
        instance_nonce: u32,
        extra_nonce: u32,
        difficulty: u64,
    ) -> Self {
        Self {
            id,
            template: Arc::downgrade(template),
            instance_nonce,
            extra_nonce,
            difficulty,
            height: template.height,
            seed_hash: template.seed_hash,
            submissions: Mutex::new(HashSet::new()),
        }
    }

    /// Upgrade the template reference; `None` means the job is stale.
    pub fn template(&self) -> Option<Arc<BlockTemplate>> {
        self.template.upgrade()
    }

    /// Record a normalized nonce. Returns false if it was seen before.
    pub fn record_submission(&self, nonce_norm: &str) -> bool {
        self.submissions.lock().insert(nonce_norm.to_string())
    }

    /// Number of nonces submitted on this job so far.
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

/// Reconstruct the full hashing blob for a job.
///
/// The instance nonce lands at the reserved offset, the session extra
/// nonce right behind it, and the miner nonce in the 4-byte slot at the
/// coin nonce offset. All little-endian.
pub fn compose_blob(
    template: &BlockTemplate,
    instance_nonce: u32,
    extra_nonce: u32,
    miner_nonce: [u8; NONCE_SIZE],
) -> Vec<u8> {
    let mut blob = template.blob.clone();
    let off = template.reserved_offset;
    blob[off..off + 4].copy_from_slice(&instance_nonce.to_le_bytes());
    blob[off + 4..off + 8].copy_from_slice(&extra_nonce.to_le_bytes());
    blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE].copy_from_slice(&miner_nonce);
    blob
}

/// Read the three nonce fields back out of a composed blob.
pub fn read_nonces(blob: &[u8], reserved_offset: usize) -> (u32, u32, [u8; NONCE_SIZE]) {
    let instance = u32::from_le_bytes(blob[reserved_offset..reserved_offset + 4].try_into().unwrap());
    let extra = u32::from_le_bytes(
        blob[reserved_offset + 4..reserved_offset + 8]
            .try_into()
            .unwrap(),
    );
    let mut miner = [0u8; NONCE_SIZE];
    miner.copy_from_slice(&blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);
    (instance, extra, miner)
}
