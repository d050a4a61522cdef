//! Difficulty arithmetic over the full 256-bit space
//!
//! `target = floor(2^256 / difficulty)`, capped at 2^256 - 1, and the
//! inverse for scoring submitted hashes. All conversions go through
//! `BigUint` so nothing saturates before the final clamp.

use super::Target;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

fn two_pow_256() -> BigUint {
    BigUint::one() << 256u32
}

/// Convert a difficulty to its 256-bit target.
///
/// Difficulty 0 maps to the impossible all-zero target.
pub fn target_for_difficulty(difficulty: u64) -> Target {
    if difficulty == 0 {
        return Target([0u8; 32]);
    }
    if difficulty == 1 {
        return Target::MAX;
    }

    let quotient = two_pow_256() / BigUint::from(difficulty);
    let bytes = quotient.to_bytes_be();

    let mut result = [0u8; 32];
    if bytes.len() <= 32 {
        result[32 - bytes.len()..].copy_from_slice(&bytes);
    } else {
        result.copy_from_slice(&[0xFF; 32]);
    }
    Target(result)
}

/// Approximate difficulty of a target.
pub fn difficulty_for_target(target: &Target) -> u64 {
    let value = BigUint::from_bytes_be(target.as_bytes());
    if value.is_zero() {
        return u64::MAX;
    }
    let difficulty = two_pow_256() / value;
    difficulty.to_u64().unwrap_or(u64::MAX)
}

/// Difficulty achieved by a PoW hash, read as a little-endian 256-bit
/// integer: `floor(2^256 / H)`.
pub fn share_difficulty(hash_le: &[u8; 32]) -> u64 {
    let value = BigUint::from_bytes_le(hash_le);
    if value.is_zero() {
        return u64::MAX;
    }
    let difficulty = two_pow_256() / value;
    difficulty.to_u64().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_one_is_max_target() {
        assert_eq!(target_for_difficulty(1), Target::MAX);
    }

    #[test]
    fn test_difficulty_zero_is_impossible_target() {
        assert_eq!(target_for_difficulty(0), Target([0u8; 32]));
    }

    #[test]
    fn test_higher_difficulty_smaller_target() {
        let t1 = target_for_difficulty(1_000);
        let t2 = target_for_difficulty(2_000);
        assert!(t2.as_bytes() < t1.as_bytes());
    }

    #[test]
    fn test_round_trip_is_close() {
        for difficulty in [2u64, 1_000, 120_000, 3_000_000_000] {
            let target = target_for_difficulty(difficulty);
            let back = difficulty_for_target(&target);
            let ratio = back.max(difficulty) as f64 / back.min(difficulty) as f64;
            assert!(
                ratio < 1.01,
                "difficulty {} -> {} drifted too far",
                difficulty,
                back
            );
        }
    }

    #[test]
    fn test_share_difficulty_of_max_hash() {
        // H = 2^256 - 1 -> difficulty 1.
        assert_eq!(share_difficulty(&[0xFF; 32]), 1);
    }

    #[test]
    fn test_share_difficulty_of_zero_hash() {
        assert_eq!(share_difficulty(&[0u8; 32]), u64::MAX);
    }

    #[test]
    fn test_share_difficulty_scales() {
        // H = 2^192 (byte 24 of the little-endian form) -> difficulty 2^64... capped.
        let mut hash = [0u8; 32];
        hash[24] = 1;
        assert_eq!(share_difficulty(&hash), u64::MAX);

        // H = 2^200 -> difficulty 2^56.
        let mut hash = [0u8; 32];
        hash[25] = 1;
        assert_eq!(share_difficulty(&hash), 1u64 << 56);
    }

    #[test]
    fn test_share_meets_its_own_target() {
        // A hash with difficulty d must meet the target for any
        // difficulty <= d.
        let mut hash = [0u8; 32];
        hash[25] = 1; // difficulty 2^56
        let achieved = share_difficulty(&hash);
        assert!(target_for_difficulty(achieved).is_met_by(&hash));
        assert!(target_for_difficulty(1_000_000).is_met_by(&hash));
    }
}
