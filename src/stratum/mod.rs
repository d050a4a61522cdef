//! Stratum server: wire protocol, sessions, vardiff, and policing

mod ban;
mod protocol;
mod server;
mod session;
mod vardiff;

pub use ban::{BanConfig, BanCounter, BanService, MemoryBanList, NoBan};
pub use protocol::{
    JobParams, LoginParams, LoginResult, SessionParams, StratumErrorBody, StratumMethod,
    StratumNotification, StratumRequest, StratumResponse, SubmitParams, CODE_GENERIC,
    CODE_UNSUPPORTED,
};
pub use server::{PortConfig, StratumConfig, StratumServer};
pub use session::{Session, SessionCommand, SessionHandle, SessionStats, RECENT_JOBS};
pub use vardiff::{VardiffConfig, VardiffState};
