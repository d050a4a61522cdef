//! PoW hashing backends

use super::PowVariant;
use crate::error::{Error, PowError, Result};
use blake2::{Blake2s256, Digest};
use parking_lot::Mutex;
use randomx_rs::{RandomXCache, RandomXFlag, RandomXVM};

/// A proof-of-work function implementation.
///
/// Implementations are called from the blocking hash pool, so they may
/// burn CPU freely but must be `Send + Sync`.
pub trait PowHasher: Send + Sync {
    /// Hash `blob` with `variant`. `seed_hash` is the epoch key for
    /// seed-keyed variants, `height` feeds height-dependent ones.
    fn pow_hash(
        &self,
        variant: PowVariant,
        blob: &[u8],
        seed_hash: Option<&[u8; 32]>,
        height: u64,
    ) -> Result<[u8; 32]>;
}

/// Production RandomX backend.
///
/// Keeps the dataset cache for the current epoch seed and rebuilds it
/// when the seed rotates; a lightweight VM is constructed per hash from
/// the shared cache. CryptoNight-era variants are not implemented by this
/// backend and surface as a typed error.
pub struct RandomXHasher {
    flags: RandomXFlag,
    cache: Mutex<Option<([u8; 32], RandomXCache)>>,
}

impl RandomXHasher {
    pub fn new() -> Self {
        Self {
            flags: RandomXFlag::get_recommended_flags(),
            cache: Mutex::new(None),
        }
    }

    fn cache_for(&self, seed: &[u8; 32]) -> Result<RandomXCache> {
        let mut guard = self.cache.lock();
        match &*guard {
            Some((cached_seed, cache)) if cached_seed == seed => Ok(cache.clone()),
            _ => {
                let cache = RandomXCache::new(self.flags, seed)
                    .map_err(|e| Error::pow_backend(e.to_string()))?;
                *guard = Some((*seed, cache.clone()));
                Ok(cache)
            }
        }
    }
}

impl Default for RandomXHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PowHasher for RandomXHasher {
    fn pow_hash(
        &self,
        variant: PowVariant,
        blob: &[u8],
        seed_hash: Option<&[u8; 32]>,
        _height: u64,
    ) -> Result<[u8; 32]> {
        if variant != PowVariant::RandomX {
            return Err(PowError::UnsupportedVariant {
                variant: variant.name().to_string(),
            }
            .into());
        }
        let seed = seed_hash.ok_or(PowError::MissingSeed)?;

        let cache = self.cache_for(seed)?;
        let vm = RandomXVM::new(self.flags, Some(cache), None)
            .map_err(|e| Error::pow_backend(e.to_string()))?;
        let hash = vm
            .calculate_hash(blob)
            .map_err(|e| Error::pow_backend(e.to_string()))?;

        if hash.len() != 32 {
            return Err(Error::pow_backend(format!(
                "unexpected hash length {}",
                hash.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hash);
        Ok(out)
    }
}

/// Deterministic Blake2s backend for development networks and tests.
///
/// Accepts every variant; mixes the seed and height into the digest so
/// epoch rotation is still observable.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake2Hasher;

impl PowHasher for Blake2Hasher {
    fn pow_hash(
        &self,
        _variant: PowVariant,
        blob: &[u8],
        seed_hash: Option<&[u8; 32]>,
        height: u64,
    ) -> Result<[u8; 32]> {
        let mut hasher = Blake2s256::new();
        hasher.update(blob);
        if let Some(seed) = seed_hash {
            hasher.update(seed);
        }
        hasher.update(height.to_le_bytes());
        Ok(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2_hasher_deterministic() {
        let hasher = Blake2Hasher;
        let a = hasher
            .pow_hash(PowVariant::RandomX, b"blob", Some(&[1; 32]), 10)
            .unwrap();
        let b = hasher
            .pow_hash(PowVariant::RandomX, b"blob", Some(&[1; 32]), 10)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_blake2_hasher_varies_with_input() {
        let hasher = Blake2Hasher;
        let base = hasher
            .pow_hash(PowVariant::RandomX, b"blob", Some(&[1; 32]), 10)
            .unwrap();
        let other_blob = hasher
            .pow_hash(PowVariant::RandomX, b"bolb", Some(&[1; 32]), 10)
            .unwrap();
        let other_seed = hasher
            .pow_hash(PowVariant::RandomX, b"blob", Some(&[2; 32]), 10)
            .unwrap();
        assert_ne!(base, other_blob);
        assert_ne!(base, other_seed);
    }

    #[test]
    fn test_randomx_rejects_cn_variants() {
        let hasher = RandomXHasher::new();
        let err = hasher
            .pow_hash(PowVariant::CnV1, b"blob", Some(&[0; 32]), 0)
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_randomx_requires_seed() {
        let hasher = RandomXHasher::new();
        let err = hasher
            .pow_hash(PowVariant::RandomX, b"blob", None, 0)
            .unwrap_err();
        assert!(err.to_string().contains("seed"));
    }
}
