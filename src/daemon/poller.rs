//! Block template acquisition and multicast
//!
//! The feed polls `get_block_template` and, when configured, listens to a
//! push stream whose frames trigger an immediate re-poll. Templates are
//! published on a watch channel: new subscribers see the current template
//! at once, slow subscribers only ever skip to the newest, and the
//! producer never blocks.

use super::DaemonRpc;
use crate::core::{BlockTemplate, TemplateKey};
use crate::error::Result;
use crate::utils::SharedClock;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Template feed configuration
#[derive(Debug, Clone)]
pub struct TemplateFeedConfig {
    /// Pool wallet the coinbase pays
    pub wallet_address: String,
    /// Reserved bytes requested from the daemon
    pub reserve_size: u32,
    /// Poll cadence when no push stream is configured (and the safety net
    /// when one is)
    pub poll_interval: Duration,
    /// Re-emit the current template after this long even if unchanged, so
    /// long-idle jobs get refreshed
    pub refresh_interval: Duration,
    /// Optional push stream endpoint
    pub stream_url: Option<String>,
}

impl Default for TemplateFeedConfig {
    fn default() -> Self {
        Self {
            wallet_address: String::new(),
            reserve_size: crate::core::constants::DEFAULT_RESERVE_SIZE,
            poll_interval: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(30),
            stream_url: None,
        }
    }
}

/// Push stream listener. Each received frame triggers an immediate
/// authoritative template fetch; the frame body itself is only a hint.
pub struct TemplateStream {
    url: String,
    trigger_tx: mpsc::Sender<()>,
}

impl TemplateStream {
    pub fn new(url: String, trigger_tx: mpsc::Sender<()>) -> Self {
        Self { url, trigger_tx }
    }

    /// Consume the stream until shutdown, reconnecting with backoff.
    pub async fn run(self, shutdown: CancellationToken) {
        let client = match reqwest::Client::builder().build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "template stream disabled: cannot build http client");
                return;
            }
        };

        let mut backoff = Duration::from_millis(500);
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match client.get(&self.url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(url = %self.url, "template stream connected");
                    backoff = Duration::from_millis(500);

                    let mut events = response.bytes_stream().eventsource();
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            event = events.next() => match event {
                                Some(Ok(event)) => {
                                    debug!(bytes = event.data.len(), "template stream frame");
                                    let _ = self.trigger_tx.try_send(());
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "template stream error");
                                    break;
                                }
                                None => {
                                    warn!("template stream closed by peer");
                                    break;
                                }
                            },
                        }
                    }
                }
                Ok(response) => {
                    warn!(status = %response.status(), url = %self.url, "template stream rejected");
                }
                Err(e) => {
                    warn!(error = %e, url = %self.url, "template stream connect failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = std::cmp::min(backoff * 2, Duration::from_secs(5));
        }
    }
}

/// Polls the daemon and multicasts [`BlockTemplate`]s.
pub struct TemplateFeed {
    daemon: Arc<dyn DaemonRpc>,
    clock: SharedClock,
    config: TemplateFeedConfig,
    tx: watch::Sender<Option<Arc<BlockTemplate>>>,
}

impl TemplateFeed {
    pub fn new(
        daemon: Arc<dyn DaemonRpc>,
        clock: SharedClock,
        config: TemplateFeedConfig,
    ) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            daemon,
            clock,
            config,
            tx,
        }
    }

    /// Subscribe to the template stream. The receiver immediately holds
    /// the current template, then observes every later one.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<BlockTemplate>>> {
        self.tx.subscribe()
    }

    /// The template currently being mined, if any.
    pub fn current(&self) -> Option<Arc<BlockTemplate>> {
        self.tx.borrow().clone()
    }

    /// Fetch once and publish if it is new work or a refresh is due.
    /// Exposed so tests can drive the feed without the timer loop.
    pub async fn poll_once(
        &self,
        last_key: &mut Option<TemplateKey>,
        last_emit_ms: &mut u64,
    ) -> Result<()> {
        let response = self
            .daemon
            .get_block_template(&self.config.wallet_address, self.config.reserve_size)
            .await?;

        let now_ms = self.clock.now_ms();
        let template = BlockTemplate::from_rpc(
            &response.blocktemplate_blob,
            response.height,
            &response.prev_hash,
            response.reserved_offset,
            response.difficulty,
            response.seed_hash.as_deref(),
            response.expected_reward,
            now_ms,
        )?;

        let key = template.key();
        let refresh_due =
            now_ms.saturating_sub(*last_emit_ms) >= self.config.refresh_interval.as_millis() as u64;

        if Some(key) != *last_key || refresh_due {
            if Some(key) != *last_key {
                info!(
                    height = template.height,
                    difficulty = template.difficulty,
                    major_version = template.major_version,
                    "new block template"
                );
            } else {
                debug!(height = template.height, "refreshing current template");
            }
            *last_key = Some(key);
            *last_emit_ms = now_ms;
            self.tx.send_replace(Some(Arc::new(template)));
        }

        Ok(())
    }

    /// Run the feed until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let (trigger_tx, mut trigger_rx) = mpsc::channel(8);

        if let Some(url) = self.config.stream_url.clone() {
            let stream = TemplateStream::new(url, trigger_tx);
            let stream_shutdown = shutdown.clone();
            tokio::spawn(stream.run(stream_shutdown));
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_key: Option<TemplateKey> = None;
        let mut last_emit_ms: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("template feed stopping");
                    return;
                }
                _ = ticker.tick() => {}
                Some(()) = trigger_rx.recv() => {
                    debug!("push trigger: fetching template now");
                }
            }

            // Failures keep the last template current; sessions continue
            // mining it and the next tick retries.
            if let Err(e) = self.poll_once(&mut last_key, &mut last_emit_ms).await {
                warn!(error = %e, "template poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{BlockHeader, BlockTemplateResponse, DaemonInfo};
    use crate::error::Error;
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedDaemon {
        calls: AtomicU64,
        height: AtomicU64,
        bump_every: u64,
    }

    impl ScriptedDaemon {
        fn new(bump_every: u64) -> Self {
            Self {
                calls: AtomicU64::new(0),
                height: AtomicU64::new(100),
                bump_every,
            }
        }
    }

    #[async_trait]
    impl DaemonRpc for ScriptedDaemon {
        async fn get_block_template(
            &self,
            _wallet: &str,
            _reserve: u32,
        ) -> Result<BlockTemplateResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call > 0 && call % self.bump_every == 0 {
                self.height.fetch_add(1, Ordering::SeqCst);
            }
            let height = self.height.load(Ordering::SeqCst);
            let mut blob = vec![0u8; 96];
            blob[0] = 14;
            Ok(BlockTemplateResponse {
                blocktemplate_blob: hex::encode(blob),
                difficulty: 1_000_000,
                height,
                prev_hash: format!("{:064x}", height),
                reserved_offset: 50,
                seed_hash: Some("ee".repeat(32)),
                expected_reward: 600_000_000_000,
                status: "OK".to_string(),
            })
        }

        async fn submit_block(&self, _blob_hex: &str) -> Result<()> {
            Ok(())
        }

        async fn get_info(&self) -> Result<DaemonInfo> {
            Err(Error::internal("test", "not scripted"))
        }

        async fn get_block_header_by_hash(&self, _hash: &str) -> Result<BlockHeader> {
            Err(Error::internal("test", "not scripted"))
        }
    }

    fn feed(bump_every: u64, clock: Arc<ManualClock>) -> TemplateFeed {
        TemplateFeed::new(
            Arc::new(ScriptedDaemon::new(bump_every)),
            clock,
            TemplateFeedConfig {
                wallet_address: "44pool".to_string(),
                refresh_interval: Duration::from_secs(30),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_first_poll_publishes() {
        let clock = Arc::new(ManualClock::new(1_000));
        let feed = feed(1_000, clock);
        let mut key = None;
        let mut emitted = 0;

        assert!(feed.current().is_none());
        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        let template = feed.current().unwrap();
        assert_eq!(template.height, 100);
        assert_eq!(template.major_version, 14);
    }

    #[tokio::test]
    async fn test_unchanged_template_not_reemitted_before_refresh() {
        let clock = Arc::new(ManualClock::new(1_000));
        let feed = feed(1_000, Arc::clone(&clock));
        let mut rx = feed.subscribe();
        let mut key = None;
        let mut emitted = 0;

        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        clock.advance(1_000);
        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_refresh_interval_forces_reemit() {
        let clock = Arc::new(ManualClock::new(1_000));
        let feed = feed(1_000, Arc::clone(&clock));
        let mut rx = feed.subscribe();
        let mut key = None;
        let mut emitted = 0;

        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        rx.borrow_and_update();

        clock.advance(31_000);
        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_height_change_publishes() {
        let clock = Arc::new(ManualClock::new(1_000));
        let feed = feed(1, Arc::clone(&clock));
        let mut rx = feed.subscribe();
        let mut key = None;
        let mut emitted = 0;

        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        rx.borrow_and_update();

        clock.advance(100);
        feed.poll_once(&mut key, &mut emitted).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().height, 101);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_template() {
        let clock = Arc::new(ManualClock::new(1_000));
        let feed = feed(1_000, clock);
        let mut key = None;
        let mut emitted = 0;
        feed.poll_once(&mut key, &mut emitted).await.unwrap();

        // Subscribing after the fact still yields the current value.
        let rx = feed.subscribe();
        assert_eq!(rx.borrow().as_ref().unwrap().height, 100);
    }
}
