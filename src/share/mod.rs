//! Share validation
//!
//! Rebuilds the exact blob a miner hashed, recomputes the PoW on the
//! bounded hash pool, scores it against the miner and network targets,
//! and pushes accepted work onto the message bus. Block candidates are
//! submitted upstream inline; a daemon rejection downgrades the candidate
//! but never fails the share back to the miner.

use crate::bus::{MessageBus, PoolEvent};
use crate::core::{compose_blob, share_difficulty, WorkerJob};
use crate::daemon::{DaemonRpc, RetryPolicy};
use crate::error::{Error, Result, ShareError};
use crate::pow::{variant_for, CoinFamily, HashPool};
use crate::utils::SharedClock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A validated share, as emitted to downstream consumers.
#[derive(Debug, Clone)]
pub struct Share {
    pub miner: String,
    pub worker: String,
    /// The miner target this share satisfied
    pub difficulty: u64,
    pub network_difficulty: u64,
    pub is_block_candidate: bool,
    /// PoW hash hex, present for candidates
    pub block_hash: Option<String>,
    pub block_height: u64,
    pub block_reward_value: u64,
    /// Unix milliseconds
    pub created: u64,
}

/// Validates submitted shares against jobs and templates.
pub struct ShareValidator {
    daemon: Arc<dyn DaemonRpc>,
    hash_pool: Arc<HashPool>,
    bus: MessageBus,
    clock: SharedClock,
    family: CoinFamily,
}

impl ShareValidator {
    pub fn new(
        daemon: Arc<dyn DaemonRpc>,
        hash_pool: Arc<HashPool>,
        bus: MessageBus,
        clock: SharedClock,
        family: CoinFamily,
    ) -> Self {
        Self {
            daemon,
            hash_pool,
            bus,
            clock,
            family,
        }
    }

    /// Validate one submission. On success the share has already been
    /// published to the bus; rejection reasons map to wire codes via
    /// [`ShareError::wire_code`].
    pub async fn validate(
        &self,
        miner: &str,
        worker: &str,
        job: &Arc<WorkerJob>,
        nonce_hex: &str,
        result_hex: Option<&str>,
        endpoint_min_difficulty: u64,
    ) -> Result<Share> {
        let nonce_norm = nonce_hex.trim().to_ascii_lowercase();
        let nonce_bytes = hex::decode(&nonce_norm)
            .ok()
            .filter(|b| b.len() == crate::core::constants::NONCE_SIZE)
            .ok_or_else(|| ShareError::MalformedNonce {
                nonce: nonce_hex.to_string(),
            })?;
        let mut miner_nonce = [0u8; 4];
        miner_nonce.copy_from_slice(&nonce_bytes);

        if !job.record_submission(&nonce_norm) {
            return Err(ShareError::DuplicateNonce.into());
        }

        let template = job.template().ok_or(ShareError::StaleTemplate)?;

        let blob = compose_blob(&template, job.instance_nonce, job.extra_nonce, miner_nonce);
        let variant = variant_for(self.family, template.major_version)?;

        let hash_started = Instant::now();
        let hash = self
            .hash_pool
            .compute(variant, blob.clone(), template.seed_hash, template.height)
            .await;
        self.bus
            .telemetry("pow_hash", hash_started.elapsed(), hash.is_ok());
        let hash = hash?;

        if let Some(result_hex) = result_hex {
            let claimed = hex::decode(result_hex.trim().to_ascii_lowercase())
                .ok()
                .filter(|b| b.len() == 32)
                .ok_or_else(|| ShareError::MalformedResult {
                    result: result_hex.to_string(),
                })?;
            if claimed != hash {
                return Err(ShareError::BadHash.into());
            }
        }

        let achieved = share_difficulty(&hash);
        let required = job.difficulty.max(endpoint_min_difficulty);
        if achieved < required {
            return Err(ShareError::LowDifficulty {
                actual: achieved,
                required,
            }
            .into());
        }

        let mut is_block_candidate = achieved >= template.difficulty;
        let block_hash_hex = hex::encode(hash);

        if is_block_candidate {
            // First candidate to reach the daemon wins; losers stay valid
            // shares with the candidate flag cleared.
            match self.submit_block(&hex::encode(&blob)).await {
                Ok(()) => {
                    info!(
                        height = template.height,
                        block_hash = %block_hash_hex,
                        miner,
                        "block candidate accepted by daemon"
                    );
                    self.bus.publish(PoolEvent::NewBlock {
                        block_hash: block_hash_hex.clone(),
                        height: template.height,
                    });
                }
                Err(e) => {
                    warn!(
                        height = template.height,
                        block_hash = %block_hash_hex,
                        error = %e,
                        "block submission failed, keeping share"
                    );
                    is_block_candidate = false;
                }
            }
        }

        let share = Share {
            miner: miner.to_string(),
            worker: worker.to_string(),
            difficulty: job.difficulty,
            network_difficulty: template.difficulty,
            is_block_candidate,
            block_hash: is_block_candidate.then_some(block_hash_hex),
            block_height: template.height,
            block_reward_value: template.expected_reward,
            created: self.clock.now_ms(),
        };

        self.bus.publish(PoolEvent::NewShare(share.clone()));
        Ok(share)
    }

    async fn submit_block(&self, blob_hex: &str) -> Result<()> {
        let started = Instant::now();
        let result = RetryPolicy::submission()
            .execute(|| self.daemon.submit_block(blob_hex))
            .await;
        self.bus
            .telemetry("submit_block", started.elapsed(), result.is_ok());
        result
    }
}

/// Map a validation error onto the wire `(code, message)` pair.
pub fn wire_rejection(error: &Error) -> (i32, String) {
    match error {
        Error::Share(e) => (e.wire_code(), e.to_string()),
        other => (-1, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockTemplate, JobId};
    use crate::daemon::{BlockHeader, BlockTemplateResponse, DaemonInfo};
    use crate::pow::{Blake2Hasher, PowHasher, PowVariant};
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct CountingDaemon {
        submissions: AtomicU64,
        reject: AtomicBool,
    }

    impl CountingDaemon {
        fn new() -> Self {
            Self {
                submissions: AtomicU64::new(0),
                reject: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DaemonRpc for CountingDaemon {
        async fn get_block_template(
            &self,
            _wallet: &str,
            _reserve: u32,
        ) -> Result<BlockTemplateResponse> {
            Err(Error::internal("test", "not scripted"))
        }

        async fn submit_block(&self, _blob_hex: &str) -> Result<()> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                Err(Error::Daemon(crate::error::DaemonError::SubmitRejected {
                    status: "Block not accepted".to_string(),
                }))
            } else {
                Ok(())
            }
        }

        async fn get_info(&self) -> Result<DaemonInfo> {
            Err(Error::internal("test", "not scripted"))
        }

        async fn get_block_header_by_hash(&self, _hash: &str) -> Result<BlockHeader> {
            Err(Error::internal("test", "not scripted"))
        }
    }

    fn template(difficulty: u64) -> Arc<BlockTemplate> {
        let mut blob = vec![0u8; 96];
        blob[0] = 14;
        Arc::new(
            BlockTemplate::from_rpc(
                &hex::encode(blob),
                500,
                &"77".repeat(32),
                50,
                difficulty,
                Some(&"ee".repeat(32)),
                600_000_000_000,
                0,
            )
            .unwrap(),
        )
    }

    fn job(template: &Arc<BlockTemplate>, difficulty: u64) -> Arc<WorkerJob> {
        Arc::new(WorkerJob::new(
            JobId::from_counter(1),
            template,
            7,
            3,
            difficulty,
        ))
    }

    struct Fixture {
        validator: ShareValidator,
        daemon: Arc<CountingDaemon>,
        rx: tokio::sync::mpsc::Receiver<PoolEvent>,
    }

    fn fixture() -> Fixture {
        let daemon = Arc::new(CountingDaemon::new());
        let (bus, rx) = MessageBus::new(64);
        let validator = ShareValidator::new(
            Arc::clone(&daemon) as Arc<dyn DaemonRpc>,
            Arc::new(HashPool::new(Arc::new(Blake2Hasher), 2)),
            bus,
            Arc::new(ManualClock::new(5_000)),
            CoinFamily::Cryptonote,
        );
        Fixture {
            validator,
            daemon,
            rx,
        }
    }

    /// Search a nonce whose deterministic hash clears `difficulty` but
    /// stays under `below` (0 disables the upper bound).
    fn find_nonce(
        template: &Arc<BlockTemplate>,
        job: &Arc<WorkerJob>,
        difficulty: u64,
        below: u64,
    ) -> String {
        let hasher = Blake2Hasher;
        for candidate in 0u32.. {
            let nonce = candidate.to_le_bytes();
            let blob = compose_blob(template, job.instance_nonce, job.extra_nonce, nonce);
            let hash = hasher
                .pow_hash(
                    PowVariant::RandomX,
                    &blob,
                    template.seed_hash.as_ref(),
                    template.height,
                )
                .unwrap();
            let achieved = share_difficulty(&hash);
            if achieved >= difficulty && (below == 0 || achieved < below) {
                return hex::encode(nonce);
            }
        }
        unreachable!()
    }

    #[tokio::test]
    async fn test_accepts_valid_share() {
        let mut fx = fixture();
        let tpl = template(u64::MAX);
        let job = job(&tpl, 2);
        let nonce = find_nonce(&tpl, &job, 2, 0);

        let share = fx
            .validator
            .validate("44miner", "rig0", &job, &nonce, None, 1)
            .await
            .unwrap();

        assert!(!share.is_block_candidate);
        assert_eq!(share.difficulty, 2);
        assert_eq!(share.block_height, 500);
        assert_eq!(share.created, 5_000);
        assert_eq!(fx.daemon.submissions.load(Ordering::SeqCst), 0);

        // A NewShare event landed on the bus (after the hash telemetry).
        let mut saw_share = false;
        while let Ok(event) = fx.rx.try_recv() {
            if matches!(event, PoolEvent::NewShare(_)) {
                saw_share = true;
            }
        }
        assert!(saw_share);
    }

    #[tokio::test]
    async fn test_rejects_low_difficulty() {
        let fx = fixture();
        let tpl = template(u64::MAX);
        let job = job(&tpl, u64::MAX / 2);

        // Nonce 0 will essentially never clear u64::MAX / 2.
        let err = fx
            .validator
            .validate("44miner", "rig0", &job, "00000000", None, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Share(ShareError::LowDifficulty { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_duplicate_nonce() {
        let fx = fixture();
        let tpl = template(u64::MAX);
        let job = job(&tpl, 1);
        let nonce = find_nonce(&tpl, &job, 1, 0);

        fx.validator
            .validate("44miner", "rig0", &job, &nonce, None, 1)
            .await
            .unwrap();
        let err = fx
            .validator
            .validate("44miner", "rig0", &job, &nonce.to_uppercase(), None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Share(ShareError::DuplicateNonce)));
    }

    #[tokio::test]
    async fn test_rejects_wrong_result_hash() {
        let fx = fixture();
        let tpl = template(u64::MAX);
        let job = job(&tpl, 1);
        let nonce = find_nonce(&tpl, &job, 1, 0);
        let wrong_result = "00".repeat(32);

        let err = fx
            .validator
            .validate(
                "44miner",
                "rig0",
                &job,
                &nonce,
                Some(wrong_result.as_str()),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Share(ShareError::BadHash)));
    }

    #[tokio::test]
    async fn test_rejects_stale_template() {
        let fx = fixture();
        let tpl = template(u64::MAX);
        let job = job(&tpl, 1);
        drop(tpl);

        let err = fx
            .validator
            .validate("44miner", "rig0", &job, "00000000", None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Share(ShareError::StaleTemplate)));
    }

    #[tokio::test]
    async fn test_block_candidate_submits_once() {
        let mut fx = fixture();
        let tpl = template(2);
        let job = job(&tpl, 2);
        let nonce = find_nonce(&tpl, &job, 2, 0);

        let share = fx
            .validator
            .validate("44miner", "rig0", &job, &nonce, None, 1)
            .await
            .unwrap();

        assert!(share.is_block_candidate);
        assert!(share.block_hash.is_some());
        assert_eq!(fx.daemon.submissions.load(Ordering::SeqCst), 1);

        let mut saw_block = false;
        while let Ok(event) = fx.rx.try_recv() {
            if let PoolEvent::NewBlock { height, .. } = event {
                assert_eq!(height, 500);
                saw_block = true;
            }
        }
        assert!(saw_block);
    }

    #[tokio::test]
    async fn test_daemon_rejection_downgrades_candidate() {
        let fx = fixture();
        let tpl = template(2);
        let job = job(&tpl, 2);
        let nonce = find_nonce(&tpl, &job, 2, 0);
        fx.daemon.reject.store(true, Ordering::SeqCst);

        let share = fx
            .validator
            .validate("44miner", "rig0", &job, &nonce, None, 1)
            .await
            .unwrap();

        // Still a valid share, no longer a candidate.
        assert!(!share.is_block_candidate);
        assert!(share.block_hash.is_none());
        assert_eq!(fx.daemon.submissions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wire_rejection_codes() {
        let (code, message) = wire_rejection(&ShareError::UnknownJob.into());
        assert_eq!(code, 21);
        assert_eq!(message, "job not found");

        let (code, _) = wire_rejection(&Error::internal("x", "y"));
        assert_eq!(code, -1);
    }
}
