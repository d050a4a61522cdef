//! Invalid-share policing and IP bans

use crate::utils::SharedClock;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;

/// Ban policy settings.
#[derive(Debug, Clone)]
pub struct BanConfig {
    pub enabled: bool,
    /// Invalid submissions inside the window that trigger a ban
    pub invalid_threshold: u32,
    /// Rolling window the counter covers
    pub check_window: Duration,
    /// How long an offending IP stays banned
    pub ban_duration: Duration,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            invalid_threshold: 25,
            check_window: Duration::from_secs(600),
            ban_duration: Duration::from_secs(1800),
        }
    }
}

/// Rolling per-session counter of invalid submissions.
#[derive(Debug, Default)]
pub struct BanCounter {
    invalid_ms: VecDeque<u64>,
}

impl BanCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invalid submission; true means the threshold is crossed
    /// and the session should be disconnected and its IP banned.
    pub fn note_invalid(&mut self, now_ms: u64, config: &BanConfig) -> bool {
        if !config.enabled {
            return false;
        }
        let window_ms = config.check_window.as_millis() as u64;
        while let Some(&front) = self.invalid_ms.front() {
            if now_ms.saturating_sub(front) > window_ms {
                self.invalid_ms.pop_front();
            } else {
                break;
            }
        }
        self.invalid_ms.push_back(now_ms);
        self.invalid_ms.len() as u32 >= config.invalid_threshold
    }
}

/// IP ban backend, supplied by the host process.
pub trait BanService: Send + Sync {
    fn ban(&self, ip: IpAddr, duration: Duration);
    fn is_banned(&self, ip: IpAddr) -> bool;
}

/// In-memory ban list with expiry.
pub struct MemoryBanList {
    entries: DashMap<IpAddr, u64>,
    clock: SharedClock,
}

impl MemoryBanList {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl BanService for MemoryBanList {
    fn ban(&self, ip: IpAddr, duration: Duration) {
        let until = self.clock.now_ms() + duration.as_millis() as u64;
        info!(%ip, ?duration, "banning ip");
        self.entries.insert(ip, until);
    }

    fn is_banned(&self, ip: IpAddr) -> bool {
        let now_ms = self.clock.now_ms();
        // The read guard must be gone before the expired entry is removed.
        let still_banned = self.entries.get(&ip).map(|entry| *entry.value() > now_ms);
        match still_banned {
            Some(true) => true,
            Some(false) => {
                self.entries.remove(&ip);
                false
            }
            None => false,
        }
    }
}

/// Ban service that never bans; for trusted internal deployments.
pub struct NoBan;

impl BanService for NoBan {
    fn ban(&self, _ip: IpAddr, _duration: Duration) {}
    fn is_banned(&self, _ip: IpAddr) -> bool {
        false
    }
}
