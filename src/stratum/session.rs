//! Per-connection session state
//!
//! A session is owned by its connection task; nothing else touches it
//! directly. Cross-task interaction goes through the [`SessionHandle`]
//! registered in the server table: the broadcaster posts commands into
//! the mailbox and reads the liveness atomics.

use super::ban::{BanConfig, BanCounter};
use super::vardiff::VardiffState;
use crate::core::{MinerIdentity, WorkerJob};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Jobs a session keeps accepting shares for
pub const RECENT_JOBS: usize = 8;

/// Commands delivered to a session's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// A new template was published; mint and push a job
    NewTemplate,
    /// Disconnect the session
    Stop,
}

/// Shared handle to a session, kept in the server table.
pub struct SessionHandle {
    pub connection_id: String,
    pub ip: IpAddr,
    pub mailbox: mpsc::Sender<SessionCommand>,
    authorized: AtomicBool,
    last_activity_ms: AtomicU64,
}

impl SessionHandle {
    pub fn new(
        connection_id: String,
        ip: IpAddr,
        mailbox: mpsc::Sender<SessionCommand>,
        now_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            ip,
            mailbox,
            authorized: AtomicBool::new(false),
            last_activity_ms: AtomicU64::new(now_ms),
        })
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Relaxed)
    }

    pub fn set_authorized(&self) {
        self.authorized.store(true, Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }
}

/// Share counters for one session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub valid_shares: u64,
    pub invalid_shares: u64,
    /// Sum of miner difficulty over accepted shares, for the hashrate
    /// estimate
    pub accepted_difficulty: u64,
}

/// State owned by one connection task.
pub struct Session {
    pub connection_id: String,
    pub identity: Option<MinerIdentity>,
    pub user_agent: String,
    /// Difficulty of the next minted job
    pub difficulty: u64,
    /// Scheduled by vardiff, applied at the next mint
    pub pending_difficulty: Option<u64>,
    /// `d=` login override; disables vardiff when set
    pub static_difficulty: Option<u64>,
    /// Session-scoped nonce counter, bumped per mint
    pub extra_nonce: AtomicU32,
    recent_jobs: VecDeque<Arc<WorkerJob>>,
    pub stats: SessionStats,
    pub vardiff: VardiffState,
    pub ban: BanCounter,
    pub created_ms: u64,
}

impl Session {
    pub fn new(connection_id: String, start_difficulty: u64, now_ms: u64) -> Self {
        Self {
            connection_id,
            identity: None,
            user_agent: String::new(),
            difficulty: start_difficulty,
            pending_difficulty: None,
            static_difficulty: None,
            extra_nonce: AtomicU32::new(0),
            recent_jobs: VecDeque::new(),
            stats: SessionStats::default(),
            vardiff: VardiffState::new(),
            ban: BanCounter::new(),
            created_ms: now_ms,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.identity.is_some()
    }

    /// Difficulty for the next mint, consuming any pending retarget.
    /// This is the only place the session difficulty steps.
    pub fn mint_difficulty(&mut self) -> u64 {
        if let Some(pending) = self.pending_difficulty.take() {
            self.difficulty = pending;
        }
        self.difficulty
    }

    /// Retain a minted job, evicting the oldest beyond capacity.
    pub fn remember_job(&mut self, job: Arc<WorkerJob>) {
        if self.recent_jobs.len() >= RECENT_JOBS {
            self.recent_jobs.pop_front();
        }
        self.recent_jobs.push_back(job);
    }

    /// Look up a retained job by wire id.
    pub fn find_job(&self, job_id: &str) -> Option<Arc<WorkerJob>> {
        self.recent_jobs
            .iter()
            .find(|job| job.id.as_str() == job_id)
            .cloned()
    }

    pub fn record_valid(&mut self, difficulty: u64) {
        self.stats.valid_shares += 1;
        self.stats.accepted_difficulty = self.stats.accepted_difficulty.saturating_add(difficulty);
    }

    /// Record an invalid submission; true means the ban threshold is
    /// crossed.
    pub fn record_invalid(&mut self, now_ms: u64, config: &BanConfig) -> bool {
        self.stats.invalid_shares += 1;
        self.ban.note_invalid(now_ms, config)
    }

    /// Difficulty-weighted hashrate estimate in H/s.
    pub fn hashrate_estimate(&self, now_ms: u64) -> f64 {
        let elapsed_s = now_ms.saturating_sub(self.created_ms) as f64 / 1_000.0;
        if elapsed_s <= 0.0 {
            return 0.0;
        }
        self.stats.accepted_difficulty as f64 / elapsed_s
    }

    /// Name pair for share records: `(address, worker)`.
    pub fn miner_names(&self) -> (String, String) {
        match &self.identity {
            Some(identity) => (identity.address.clone(), identity.worker.clone()),
            None => (String::new(), "0".to_string()),
        }
    }
}
