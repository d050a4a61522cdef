//! Core types for templates, jobs, targets, and miner identities

mod address;
mod difficulty;
mod job;
mod target;
mod template;

pub use address::{AddressValidator, MinerIdentity, PassVars, PrefixAddressValidator};
pub use difficulty::{difficulty_for_target, share_difficulty, target_for_difficulty};
pub use job::{compose_blob, read_nonces, JobId, WorkerJob};
pub use target::{CompactBits, Target};
pub use template::{BlockTemplate, TemplateKey};

/// Constants for the CryptoNote block blob layout
pub mod constants {
    /// Offset of the miner nonce in the hashing blob
    pub const NONCE_OFFSET: usize = 39;

    /// Size of the miner nonce in bytes
    pub const NONCE_SIZE: usize = 4;

    /// Size of a PoW hash in bytes
    pub const HASH_SIZE: usize = 32;

    /// Smallest blob that can hold a miner nonce
    pub const MIN_BLOB_SIZE: usize = NONCE_OFFSET + NONCE_SIZE;

    /// Bytes of the reserved slot consumed by the pool: a 4-byte instance
    /// nonce followed by a 4-byte session extra nonce.
    pub const RESERVED_SLOT_SIZE: usize = 8;

    /// Reserve size requested from the daemon in `get_block_template`
    pub const DEFAULT_RESERVE_SIZE: u32 = 16;
}
