//! # CryptoNote Stratum Pool Core
//!
//! Server-side subsystem of a CryptoNote mining pool: accepts miner
//! connections over line-delimited JSON-RPC, derives per-session jobs
//! from the upstream daemon's block templates, validates submitted
//! shares against miner and network targets, retargets per-session
//! difficulty, and emits share events to downstream consumers.
//!
//! ## Architecture
//!
//! - [`daemon`]: JSON-RPC client, retry policies, and the template feed
//!   (poll plus optional push stream) multicast over a watch channel.
//! - [`jobs`]: job minting with pool-wide counters and nonce splicing.
//! - [`pow`]: PoW variant dispatch and the bounded hashing pool.
//! - [`share`]: share validation and block candidate submission.
//! - [`stratum`]: the TCP server, per-connection session actors,
//!   vardiff, and ban policing.
//! - [`bus`]: bounded fan-out of share, block, and telemetry events.
//!
//! The daemon endpoint, wall clock, address validator, ban service, and
//! PoW backend are all injected traits, wired explicitly in `main`.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod jobs;
pub mod pow;
pub mod share;
pub mod stratum;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::{BlockTemplate, Target, WorkerJob};
pub use crate::daemon::{DaemonClient, DaemonRpc, TemplateFeed};
pub use crate::error::{Error, Result};
pub use crate::jobs::JobManager;
pub use crate::share::{Share, ShareValidator};
pub use crate::stratum::StratumServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{MessageBus, PoolEvent};
    pub use crate::config::Config;
    pub use crate::core::{BlockTemplate, Target, WorkerJob};
    pub use crate::daemon::{DaemonClient, DaemonRpc, TemplateFeed};
    pub use crate::error::{Error, Result};
    pub use crate::jobs::JobManager;
    pub use crate::pow::{HashPool, PowHasher};
    pub use crate::share::{Share, ShareValidator};
    pub use crate::stratum::StratumServer;
    pub use crate::utils::{Clock, SystemClock};
}
