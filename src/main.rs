//! CryptoNote stratum pool core daemon

use clap::Parser;
use cnpool::bus::{MessageBus, PoolEvent};
use cnpool::config::{Args, Config, PowBackend};
use cnpool::daemon::{DaemonClient, DaemonRpc, RetryPolicy, TemplateFeed};
use cnpool::error::Result;
use cnpool::jobs::JobManager;
use cnpool::pow::{Blake2Hasher, HashPool, PowHasher, RandomXHasher};
use cnpool::share::ShareValidator;
use cnpool::stratum::{MemoryBanList, StratumServer};
use cnpool::utils::{self, SharedClock, SystemClock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    if args.print_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    utils::init_logging(&config.logging.level, &config.logging.format);
    info!(
        version = cnpool::VERSION,
        coin = %config.coin.name,
        "starting pool core"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let daemon: Arc<dyn DaemonRpc> = Arc::new(DaemonClient::new(config.daemon_client_config())?);

    // Probe the daemon before serving anyone.
    let chain = RetryPolicy::default().execute(|| daemon.get_info()).await?;
    info!(
        height = chain.height,
        difficulty = chain.difficulty,
        "connected to daemon"
    );

    let shutdown = CancellationToken::new();

    let feed = Arc::new(TemplateFeed::new(
        Arc::clone(&daemon),
        Arc::clone(&clock),
        config.template_feed_config(),
    ));
    tokio::spawn(Arc::clone(&feed).run(shutdown.clone()));

    let hasher: Arc<dyn PowHasher> = match config.coin.pow_backend {
        PowBackend::Randomx => Arc::new(RandomXHasher::new()),
        PowBackend::Blake2Sim => {
            warn!("using the blake2 simulation PoW backend; shares are not chain-valid");
            Arc::new(Blake2Hasher)
        }
    };
    let hash_pool = Arc::new(HashPool::new(hasher, config.stratum.hash_workers));
    info!(workers = hash_pool.workers(), "hash pool ready");

    let (bus, bus_rx) = MessageBus::new(1_024);
    tokio::spawn(consume_events(bus_rx, Arc::clone(&daemon), shutdown.clone()));

    let validator = Arc::new(ShareValidator::new(
        Arc::clone(&daemon),
        hash_pool,
        bus,
        Arc::clone(&clock),
        config.coin.family,
    ));
    let jobs = Arc::new(JobManager::new(Arc::clone(&feed), config.coin.family));
    let bans = Arc::new(MemoryBanList::new(Arc::clone(&clock)));

    let server = Arc::new(StratumServer::new(
        config.stratum_config(),
        jobs,
        validator,
        feed,
        clock,
        Arc::new(config.address_validator()),
        bans,
        config.ban_config(),
        config.coin.payment_id_hex_len,
    ));
    let server_task = tokio::spawn(Arc::clone(&server).run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.cancel();

    match server_task.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "server task aborted"),
    }
    Ok(())
}

/// Downstream consumer: logs shares, confirms accepted blocks against the
/// daemon, and surfaces telemetry at debug level.
async fn consume_events(
    mut rx: mpsc::Receiver<PoolEvent>,
    daemon: Arc<dyn DaemonRpc>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            PoolEvent::NewShare(share) => {
                info!(
                    miner = %share.miner,
                    worker = %share.worker,
                    difficulty = share.difficulty,
                    height = share.block_height,
                    candidate = share.is_block_candidate,
                    "share accepted"
                );
            }
            PoolEvent::NewBlock { block_hash, height } => {
                info!(%block_hash, height, "block found");
                match daemon.get_block_header_by_hash(&block_hash).await {
                    Ok(header) => info!(
                        height = header.height,
                        reward = header.reward,
                        depth = header.depth,
                        "block confirmed by daemon"
                    ),
                    Err(e) => debug!(error = %e, "block header not yet resolvable"),
                }
            }
            PoolEvent::Telemetry {
                category,
                duration,
                success,
            } => {
                debug!(category, ?duration, success, "telemetry");
            }
        }
    }
}
