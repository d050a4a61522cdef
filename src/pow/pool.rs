//! Bounded worker pool for CPU-bound hashing

use super::{PowHasher, PowVariant};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Offloads PoW hashing onto the blocking thread pool, bounded by a
/// semaphore so a submission burst cannot saturate every core.
///
/// Awaiting [`HashPool::compute`] is the session task's suspension point
/// for share validation.
pub struct HashPool {
    hasher: Arc<dyn PowHasher>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl HashPool {
    /// Create a pool over `hasher`. `workers == 0` sizes the pool to the
    /// machine's physical cores.
    pub fn new(hasher: Arc<dyn PowHasher>, workers: usize) -> Self {
        let workers = if workers == 0 {
            num_cpus::get_physical().max(1)
        } else {
            workers
        };
        Self {
            hasher,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Number of concurrent hash slots.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Compute one PoW hash. A panicking backend is contained here: the
    /// slot is released and the caller gets an internal error.
    pub async fn compute(
        &self,
        variant: PowVariant,
        blob: Vec<u8>,
        seed_hash: Option<[u8; 32]>,
        height: u64,
    ) -> Result<[u8; 32]> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("hash_pool", "semaphore closed"))?;

        let hasher = Arc::clone(&self.hasher);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            hasher.pow_hash(variant, &blob, seed_hash.as_ref(), height)
        });

        handle
            .await
            .map_err(|e| Error::internal("hash_pool", format!("hash worker died: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::Blake2Hasher;

    #[tokio::test]
    async fn test_compute_matches_direct_call() {
        let hasher = Blake2Hasher;
        let pool = HashPool::new(Arc::new(hasher), 2);

        let direct = hasher
            .pow_hash(PowVariant::RandomX, b"payload", Some(&[7; 32]), 99)
            .unwrap();
        let pooled = pool
            .compute(PowVariant::RandomX, b"payload".to_vec(), Some([7; 32]), 99)
            .await
            .unwrap();
        assert_eq!(direct, pooled);
    }

    #[tokio::test]
    async fn test_pool_survives_concurrent_load() {
        let pool = Arc::new(HashPool::new(Arc::new(Blake2Hasher), 2));
        let mut handles = Vec::new();
        for i in 0..16u64 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.compute(PowVariant::RandomX, vec![i as u8; 64], None, i)
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_panicking_backend_is_contained() {
        struct PanickingHasher;
        impl PowHasher for PanickingHasher {
            fn pow_hash(
                &self,
                _variant: PowVariant,
                _blob: &[u8],
                _seed: Option<&[u8; 32]>,
                _height: u64,
            ) -> Result<[u8; 32]> {
                panic!("backend bug");
            }
        }

        let pool = HashPool::new(Arc::new(PanickingHasher), 1);
        let err = pool
            .compute(PowVariant::RandomX, vec![0; 8], None, 0)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "internal");

        // The slot is released; the pool keeps serving.
        let pool = HashPool::new(Arc::new(Blake2Hasher), 1);
        assert!(pool
            .compute(PowVariant::RandomX, vec![0; 8], None, 0)
            .await
            .is_ok());
    }

    #[test]
    fn test_default_sizing() {
        let pool = HashPool::new(Arc::new(Blake2Hasher), 0);
        assert!(pool.workers() >= 1);
    }
}
