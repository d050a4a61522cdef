//! Job minting over the template feed

use crate::core::{compose_blob, BlockTemplate, JobId, Target, WorkerJob};
use crate::core::{target_for_difficulty, CompactBits};
use crate::daemon::TemplateFeed;
use crate::error::{Error, Result};
use crate::pow::{variant_for, CoinFamily, PowVariant};
use crate::stratum::JobParams;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Templates kept alive after being superseded, so shares racing a
/// broadcast still find the template that minted them.
const TEMPLATE_HISTORY: usize = 4;

/// Mints [`WorkerJob`]s against the current template and owns the
/// pool-wide counters: job ids are strictly monotonic across every
/// session, the instance nonce wraps at 2^32.
pub struct JobManager {
    feed: Arc<TemplateFeed>,
    family: CoinFamily,
    job_counter: AtomicU64,
    instance_nonce: AtomicU32,
    history: Mutex<VecDeque<Arc<BlockTemplate>>>,
}

impl JobManager {
    pub fn new(feed: Arc<TemplateFeed>, family: CoinFamily) -> Self {
        Self {
            feed,
            family,
            job_counter: AtomicU64::new(0),
            instance_nonce: AtomicU32::new(0),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Coin family this pool serves.
    pub fn family(&self) -> CoinFamily {
        self.family
    }

    /// The template currently being mined.
    pub fn current_template(&self) -> Option<Arc<BlockTemplate>> {
        self.feed.current()
    }

    /// Pin a template in the short history. Called by the broadcaster for
    /// every template it observes.
    pub fn note_template(&self, template: &Arc<BlockTemplate>) {
        let mut history = self.history.lock();
        if history.back().map(|t| Arc::ptr_eq(t, template)) == Some(true) {
            return;
        }
        history.push_back(Arc::clone(template));
        while history.len() > TEMPLATE_HISTORY {
            history.pop_front();
        }
    }

    /// Mint a job for a session at `difficulty`, bumping the session's
    /// extra-nonce counter.
    pub fn mint(&self, difficulty: u64, extra_nonce: &AtomicU32) -> Result<Arc<WorkerJob>> {
        let template = self
            .current_template()
            .ok_or_else(|| Error::internal("job_manager", "no block template available"))?;

        // Checked independently: a template with work but a broken target
        // is as unusable as one with no work.
        if template.blob.is_empty() {
            return Err(Error::internal("job_manager", "template blob is empty"));
        }
        if template.difficulty == 0 {
            return Err(Error::internal("job_manager", "template difficulty is zero"));
        }

        let instance = self.instance_nonce.fetch_add(1, Ordering::Relaxed);
        let extra = extra_nonce.fetch_add(1, Ordering::Relaxed);
        let id = JobId::from_counter(self.job_counter.fetch_add(1, Ordering::Relaxed) + 1);

        Ok(Arc::new(WorkerJob::new(
            id, &template, instance, extra, difficulty,
        )))
    }

    /// Wire form of a job: blob with pool nonces spliced and the miner
    /// slot zeroed, plus the compact miner target.
    pub fn wire_params(&self, job: &WorkerJob) -> Result<JobParams> {
        let template = job
            .template()
            .ok_or_else(|| Error::internal("job_manager", "template dropped during mint"))?;

        let blob = compose_blob(&template, job.instance_nonce, job.extra_nonce, [0u8; 4]);
        let target = miner_target_hex(self.family, template.major_version, job.difficulty)?;

        Ok(JobParams {
            job_id: job.id.as_str().to_string(),
            blob: hex::encode(blob),
            target,
            height: job.height,
            seed_hash: template.seed_hash_hex(),
        })
    }
}

/// Compact miner-target hex for a difficulty, in the width the variant's
/// miners expect.
pub fn miner_target_hex(family: CoinFamily, major_version: u8, difficulty: u64) -> Result<String> {
    let variant = variant_for(family, major_version)?;
    let bits = if variant == PowVariant::RandomX {
        CompactBits::U64
    } else {
        CompactBits::U32
    };
    let target: Target = target_for_difficulty(difficulty);
    Ok(target.compact_hex(bits))
}
