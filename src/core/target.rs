//! 256-bit mining targets and their wire encodings

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the compact miner-target hex sent to clients.
///
/// Legacy CryptoNight miners parse a 4-byte compact target; RandomX-era
/// miners expect the 8-byte form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactBits {
    /// 4-byte compact form
    U32,
    /// 8-byte compact form
    U64,
}

/// A 256-bit target stored as big-endian bytes.
///
/// A hash meets the target when, read as a 256-bit integer, it is less
/// than or equal to the target. Smaller target means harder work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target(pub [u8; 32]);

impl Target {
    /// Largest representable target (difficulty 1)
    pub const MAX: Target = Target([0xFF; 32]);

    /// Create a Target from big-endian bytes
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Target from a big-endian hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::config_invalid_value("target", hex_str, format!("hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(Error::config_invalid_value(
                "target",
                hex_str,
                "32 bytes of hex",
            ));
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }

    /// Get the target as big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full 64-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check whether a little-endian 256-bit hash meets this target.
    pub fn is_met_by(&self, hash_le: &[u8; 32]) -> bool {
        // Compare most significant byte first; the hash is little-endian.
        for i in 0..32 {
            let hash_byte = hash_le[31 - i];
            let target_byte = self.0[i];
            match hash_byte.cmp(&target_byte) {
                std::cmp::Ordering::Less => return true,
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal => continue,
            }
        }
        true
    }

    /// Compact miner-target hex: the top big-endian bytes of the target,
    /// byte-reversed into the little-endian form the stratum dialect uses.
    pub fn compact_hex(&self, bits: CompactBits) -> String {
        let take = match bits {
            CompactBits::U32 => 4,
            CompactBits::U64 => 8,
        };
        let mut prefix: Vec<u8> = self.0[..take].to_vec();
        prefix.reverse();
        hex::encode(prefix)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hex_str = "00000000ffff0000000000000000000000000000000000000000000000000000";
        let target = Target::from_hex(hex_str).unwrap();
        assert_eq!(target.to_hex(), hex_str);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(Target::from_hex("not hex").is_err());
        assert!(Target::from_hex("00").is_err());
        assert!(Target::from_hex(&"00".repeat(33)).is_err());
    }

    #[test]
    fn test_is_met_by() {
        let mut target_be = [0u8; 32];
        target_be[0] = 0x0F; // target = 0x0F00...00

        let target = Target::from_be_bytes(target_be);

        // Hash equal to the target meets it.
        let mut equal_le = [0u8; 32];
        equal_le[31] = 0x0F;
        assert!(target.is_met_by(&equal_le));

        // Smaller hash meets it.
        let mut small_le = [0u8; 32];
        small_le[31] = 0x0E;
        small_le[0] = 0xFF;
        assert!(target.is_met_by(&small_le));

        // Larger hash does not.
        let mut big_le = [0u8; 32];
        big_le[31] = 0x10;
        assert!(!target.is_met_by(&big_le));
    }

    #[test]
    fn test_compact_hex() {
        let mut be = [0u8; 32];
        be[0] = 0x00;
        be[1] = 0x0d;
        be[2] = 0x1b;
        be[3] = 0x71;
        let target = Target::from_be_bytes(be);
        // Top 4 BE bytes 00 0d 1b 71, reversed on the wire.
        assert_eq!(target.compact_hex(CompactBits::U32), "711b0d00");
        assert_eq!(target.compact_hex(CompactBits::U64), "00000000711b0d00");
    }

    #[test]
    fn test_serde() {
        let target = Target::MAX;
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, format!("\"{}\"", "ff".repeat(32)));
        let back: Target = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }
}
