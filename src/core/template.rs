//! Upstream block template snapshots

use super::constants::{MIN_BLOB_SIZE, RESERVED_SLOT_SIZE};
use super::{target_for_difficulty, Target};
use crate::error::{Error, Result};

/// Identity of a template: a new key means new work for everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub prev_hash: [u8; 32],
    pub height: u64,
    pub major_version: u8,
}

/// Immutable snapshot of upstream work.
///
/// Built once from a `get_block_template` response and shared behind an
/// `Arc`; jobs reference it weakly and the feed drops it when superseded.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// Chain height this template builds
    pub height: u64,
    /// Hash of the previous block
    pub prev_hash: [u8; 32],
    /// Hashing blob with an untouched reserved slot
    pub blob: Vec<u8>,
    /// Offset of the pool-reserved slot inside the blob
    pub reserved_offset: usize,
    /// Network difficulty
    pub difficulty: u64,
    /// RandomX epoch seed, absent on pre-RandomX chains
    pub seed_hash: Option<[u8; 32]>,
    /// Block major version, taken from the leading blob byte
    pub major_version: u8,
    /// Reward paid if this template becomes a block
    pub expected_reward: u64,
    /// Arrival time, unix milliseconds
    pub received_at_ms: u64,
}

fn decode_hash32(field: &str, hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::daemon_bad_response("get_block_template", format!("{}: {}", field, e)))?;
    if bytes.len() != 32 {
        return Err(Error::daemon_bad_response(
            "get_block_template",
            format!("{}: expected 32 bytes, got {}", field, bytes.len()),
        ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

impl BlockTemplate {
    /// Build a template from raw RPC fields.
    ///
    /// The daemon does not return the major version as a field; it is the
    /// leading varint byte of the blob.
    #[allow(clippy::too_many_arguments)]
    pub fn from_rpc(
        blob_hex: &str,
        height: u64,
        prev_hash_hex: &str,
        reserved_offset: u64,
        difficulty: u64,
        seed_hash_hex: Option<&str>,
        expected_reward: u64,
        received_at_ms: u64,
    ) -> Result<Self> {
        let blob = hex::decode(blob_hex).map_err(|e| {
            Error::daemon_bad_response("get_block_template", format!("blocktemplate_blob: {}", e))
        })?;
        if blob.len() < MIN_BLOB_SIZE {
            return Err(Error::daemon_bad_response(
                "get_block_template",
                format!("blob too short: {} bytes", blob.len()),
            ));
        }

        let reserved_offset = reserved_offset as usize;
        if reserved_offset + RESERVED_SLOT_SIZE > blob.len() {
            return Err(Error::daemon_bad_response(
                "get_block_template",
                format!(
                    "reserved offset {} does not fit a {}-byte slot in a {}-byte blob",
                    reserved_offset,
                    RESERVED_SLOT_SIZE,
                    blob.len()
                ),
            ));
        }

        let prev_hash = decode_hash32("prev_hash", prev_hash_hex)?;
        let seed_hash = match seed_hash_hex {
            Some(s) if !s.is_empty() => Some(decode_hash32("seed_hash", s)?),
            _ => None,
        };
        let major_version = blob[0];

        Ok(Self {
            height,
            prev_hash,
            blob,
            reserved_offset,
            difficulty,
            seed_hash,
            major_version,
            expected_reward,
            received_at_ms,
        })
    }

    /// Identity key used to decide whether this template is new work.
    pub fn key(&self) -> TemplateKey {
        TemplateKey {
            prev_hash: self.prev_hash,
            height: self.height,
            major_version: self.major_version,
        }
    }

    /// The 256-bit network target derived from the template difficulty.
    pub fn network_target(&self) -> Target {
        target_for_difficulty(self.difficulty)
    }

    /// Seed hash in hex, empty string when the chain has none.
    pub fn seed_hash_hex(&self) -> String {
        self.seed_hash.map(hex::encode).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_blob(major_version: u8, len: usize) -> String {
        let mut blob = vec![0u8; len];
        blob[0] = major_version;
        hex::encode(blob)
    }

    #[test]
    fn test_from_rpc() {
        let template = BlockTemplate::from_rpc(
            &test_blob(14, 128),
            1_000_000,
            &"ab".repeat(32),
            55,
            400_000_000_000,
            Some(&"cd".repeat(32)),
            600_000_000_000,
            1_700_000_000_000,
        )
        .unwrap();

        assert_eq!(template.major_version, 14);
        assert_eq!(template.height, 1_000_000);
        assert_eq!(template.prev_hash, [0xab; 32]);
        assert_eq!(template.seed_hash, Some([0xcd; 32]));
        assert_eq!(template.reserved_offset, 55);
    }

    #[test]
    fn test_rejects_short_blob() {
        let result = BlockTemplate::from_rpc(
            &test_blob(14, 20),
            1,
            &"00".repeat(32),
            10,
            1,
            None,
            0,
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_reserved_offset() {
        let result = BlockTemplate::from_rpc(
            &test_blob(14, 64),
            1,
            &"00".repeat(32),
            60,
            1,
            None,
            0,
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_key_changes_with_prev_hash() {
        let a = BlockTemplate::from_rpc(
            &test_blob(14, 128),
            5,
            &"11".repeat(32),
            50,
            1,
            None,
            0,
            0,
        )
        .unwrap();
        let b = BlockTemplate::from_rpc(
            &test_blob(14, 128),
            5,
            &"22".repeat(32),
            50,
            1,
            None,
            0,
            0,
        )
        .unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.key());
    }
}
