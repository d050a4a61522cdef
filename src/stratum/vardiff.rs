//! Variable difficulty retargeting
//!
//! Each session keeps a sliding window of its accepted-share timestamps.
//! When the observed share rate drifts outside the variance dead-band,
//! the controller schedules a new difficulty; the session applies it at
//! the next job mint.

use std::collections::VecDeque;
use std::time::Duration;

/// Per-port vardiff tuning.
#[derive(Debug, Clone)]
pub struct VardiffConfig {
    /// Difficulty assigned to fresh sessions
    pub start_difficulty: u64,
    /// Lower clamp, also the floor for static-difficulty requests
    pub min_difficulty: u64,
    /// Upper clamp
    pub max_difficulty: u64,
    /// Desired time between shares
    pub target_time: Duration,
    /// Dead-band as a fraction, e.g. 0.3 for 30%
    pub variance_percent: f64,
    /// Minimum window span before a retarget is considered
    pub retarget_interval: Duration,
    /// Number of share timestamps retained
    pub window: usize,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            start_difficulty: 5_000,
            min_difficulty: 100,
            max_difficulty: 1_000_000_000_000,
            target_time: Duration::from_secs(10),
            variance_percent: 0.30,
            retarget_interval: Duration::from_secs(30),
            window: 50,
        }
    }
}

/// Sliding window of accepted-share arrival times for one session.
#[derive(Debug, Default)]
pub struct VardiffState {
    timestamps_ms: VecDeque<u64>,
}

impl VardiffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted share and decide whether to retarget.
    ///
    /// Returns the new difficulty to apply at the next mint, clamped to
    /// the configured bounds. The window restarts after a retarget so the
    /// next decision measures the new regime.
    pub fn record_share(&mut self, now_ms: u64, current: u64, config: &VardiffConfig) -> Option<u64> {
        if self.timestamps_ms.len() >= config.window {
            self.timestamps_ms.pop_front();
        }
        self.timestamps_ms.push_back(now_ms);

        let oldest = *self.timestamps_ms.front()?;
        let span_ms = now_ms.saturating_sub(oldest);
        if span_ms < config.retarget_interval.as_millis() as u64 || span_ms == 0 {
            return None;
        }

        let actual_rate = self.timestamps_ms.len() as f64 / (span_ms as f64 / 1_000.0);
        let target_rate = 1.0 / config.target_time.as_secs_f64();
        let ratio = actual_rate / target_rate;

        if (ratio - 1.0).abs() <= config.variance_percent {
            return None;
        }

        let proposed = (current as f64 * ratio) as u64;
        let clamped = proposed
            .max(config.min_difficulty)
            .min(config.max_difficulty);

        if clamped == current {
            return None;
        }

        self.timestamps_ms.clear();
        Some(clamped)
    }

    /// Shares currently in the window.
    pub fn window_len(&self) -> usize {
        self.timestamps_ms.len()
    }
}
