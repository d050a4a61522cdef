//! Stratum TCP server
//!
//! One task per connection, split into a reader pipeline and a handler
//! loop. The reader stamps each frame with its arrival time and feeds a
//! bounded queue; the handler owns the session state and the write half,
//! so responses stay FIFO per session while notifications may interleave
//! between them. A broadcaster task watches the template feed and posts
//! into every live session's mailbox.

use super::ban::{BanConfig, BanService};
use super::protocol::{
    JobParams, LoginParams, LoginResult, SessionParams, StratumMethod, StratumNotification,
    StratumRequest, StratumResponse, SubmitParams, CODE_GENERIC,
};
use super::session::{Session, SessionCommand, SessionHandle};
use super::vardiff::VardiffConfig;
use crate::core::{AddressValidator, MinerIdentity, PassVars};
use crate::error::{Error, Result, StratumError};
use crate::jobs::JobManager;
use crate::share::{wire_rejection, ShareValidator};
use crate::daemon::TemplateFeed;
use crate::utils::{format_hashrate, SharedClock};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One listening endpoint and its difficulty policy.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub port: u16,
    pub vardiff: VardiffConfig,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct StratumConfig {
    pub bind_address: String,
    pub ports: Vec<PortConfig>,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    /// Idle cutoff: sessions silent this long are dropped
    pub connection_timeout: Duration,
    /// Submissions older than this on arrival are dropped unanswered
    pub max_share_age: Duration,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ports: vec![PortConfig {
                port: 3333,
                vardiff: VardiffConfig::default(),
            }],
            max_connections: 8_192,
            max_connections_per_ip: 32,
            connection_timeout: Duration::from_secs(600),
            max_share_age: Duration::from_secs(6),
        }
    }
}

enum LineOutcome {
    Continue,
    Disconnect,
}

/// The stratum pool server.
pub struct StratumServer {
    config: StratumConfig,
    jobs: Arc<JobManager>,
    validator: Arc<ShareValidator>,
    feed: Arc<TemplateFeed>,
    clock: SharedClock,
    address_validator: Arc<dyn AddressValidator>,
    bans: Arc<dyn BanService>,
    ban_config: BanConfig,
    payment_id_hex_len: usize,
    sessions: DashMap<String, Arc<SessionHandle>>,
    per_ip: DashMap<IpAddr, usize>,
}

impl StratumServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StratumConfig,
        jobs: Arc<JobManager>,
        validator: Arc<ShareValidator>,
        feed: Arc<TemplateFeed>,
        clock: SharedClock,
        address_validator: Arc<dyn AddressValidator>,
        bans: Arc<dyn BanService>,
        ban_config: BanConfig,
        payment_id_hex_len: usize,
    ) -> Self {
        Self {
            config,
            jobs,
            validator,
            feed,
            clock,
            address_validator,
            bans,
            ban_config,
            payment_id_hex_len,
            sessions: DashMap::new(),
            per_ip: DashMap::new(),
        }
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Bind every configured port and serve until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut listeners = Vec::new();
        for port in &self.config.ports {
            let address = format!("{}:{}", self.config.bind_address, port.port);
            let listener = TcpListener::bind(&address).await.map_err(|e| {
                Error::Stratum(StratumError::BindFailed {
                    address: address.clone(),
                    message: e.to_string(),
                })
            })?;
            info!(%address, start_difficulty = port.vardiff.start_difficulty, "stratum listening");
            listeners.push((listener, port.clone()));
        }

        tokio::spawn(Arc::clone(&self).broadcast_loop(shutdown.clone()));

        for (listener, port) in listeners {
            tokio::spawn(Arc::clone(&self).accept_loop(listener, port, shutdown.clone()));
        }

        shutdown.cancelled().await;
        info!("stratum server stopping");
        Ok(())
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        port: PortConfig,
        shutdown: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if self.bans.is_banned(peer.ip()) {
                        debug!(%peer, "rejecting banned ip");
                        continue;
                    }
                    if self.sessions.len() >= self.config.max_connections {
                        warn!(%peer, "connection limit reached, rejecting");
                        continue;
                    }
                    let ip_count = self.per_ip.get(&peer.ip()).map(|c| *c).unwrap_or(0);
                    if ip_count >= self.config.max_connections_per_ip {
                        warn!(%peer, "per-ip connection limit reached, rejecting");
                        continue;
                    }

                    *self.per_ip.entry(peer.ip()).or_insert(0) += 1;
                    let server = Arc::clone(&self);
                    let port = port.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer, port, shutdown).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Fan a template out to every live session and evict the dead.
    async fn broadcast_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut rx = self.feed.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            let template = match rx.borrow_and_update().clone() {
                Some(template) => template,
                None => continue,
            };
            self.jobs.note_template(&template);

            let now_ms = self.clock.now_ms();
            let timeout_ms = self.config.connection_timeout.as_millis() as u64;
            let handles: Vec<Arc<SessionHandle>> = self
                .sessions
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();

            let mut notified = 0usize;
            for handle in handles {
                if now_ms.saturating_sub(handle.last_activity_ms()) > timeout_ms {
                    debug!(connection_id = %handle.connection_id, "evicting idle session");
                    let _ = handle.mailbox.try_send(SessionCommand::Stop);
                    self.sessions.remove(&handle.connection_id);
                    continue;
                }
                if !handle.is_authorized() {
                    continue;
                }
                // Per-session failures stay local to that session.
                match handle.mailbox.try_send(SessionCommand::NewTemplate) {
                    Ok(()) => notified += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(connection_id = %handle.connection_id, "session mailbox stalled, evicting");
                        self.sessions.remove(&handle.connection_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        self.sessions.remove(&handle.connection_id);
                    }
                }
            }

            info!(
                height = template.height,
                sessions = notified,
                "broadcast new work"
            );
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        port: PortConfig,
        shutdown: CancellationToken,
    ) {
        let connection_id = Uuid::new_v4().simple().to_string();
        debug!(%peer, connection_id = %connection_id, "new connection");

        let now_ms = self.clock.now_ms();
        let (mailbox_tx, mut mailbox_rx) = mpsc::channel(16);
        let handle = SessionHandle::new(connection_id.clone(), peer.ip(), mailbox_tx, now_ms);
        self.sessions
            .insert(connection_id.clone(), Arc::clone(&handle));

        let mut session = Session::new(connection_id.clone(), port.vardiff.start_difficulty, now_ms);

        let (read_half, mut writer) = stream.into_split();

        // Reader pipeline: stamps every frame with its arrival time so the
        // handler can drop submissions that sat in the queue too long.
        let (line_tx, mut line_rx) = mpsc::channel::<(String, u64)>(64);
        let reader_clock = Arc::clone(&self.clock);
        let idle_timeout = self.config.connection_timeout;
        let reader_shutdown = shutdown.clone();
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                let mut line = String::new();
                let read = tokio::select! {
                    _ = reader_shutdown.cancelled() => return,
                    read = tokio::time::timeout(idle_timeout, reader.read_line(&mut line)) => read,
                };
                match read {
                    Err(_) => {
                        debug!("read idle timeout");
                        return;
                    }
                    Ok(Ok(0)) => return,
                    Ok(Ok(_)) => {
                        let stamped = (line, reader_clock.now_ms());
                        if line_tx.send(stamped).await.is_err() {
                            return;
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, "read failed");
                        return;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = mailbox_rx.recv() => match cmd {
                    Some(SessionCommand::NewTemplate) => {
                        if session.is_authorized() {
                            if let Err(e) = self.push_job(&mut session, &mut writer).await {
                                debug!(error = %e, "job push failed");
                                break;
                            }
                        }
                    }
                    Some(SessionCommand::Stop) | None => break,
                },
                line = line_rx.recv() => match line {
                    Some((line, arrival_ms)) => {
                        handle.touch(self.clock.now_ms());
                        match self
                            .process_line(&mut session, &handle, &port, &mut writer, line.trim(), arrival_ms)
                            .await
                        {
                            Ok(LineOutcome::Continue) => {}
                            Ok(LineOutcome::Disconnect) => break,
                            Err(e) => {
                                debug!(error = %e, "connection error");
                                break;
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        reader.abort();
        self.sessions.remove(&connection_id);
        if let Some(mut count) = self.per_ip.get_mut(&peer.ip()) {
            *count = count.saturating_sub(1);
        }
        self.per_ip.remove_if(&peer.ip(), |_, count| *count == 0);

        let now_ms = self.clock.now_ms();
        info!(
            %peer,
            connection_id = %session.connection_id,
            valid_shares = session.stats.valid_shares,
            invalid_shares = session.stats.invalid_shares,
            hashrate = %format_hashrate(session.hashrate_estimate(now_ms)),
            "session closed"
        );
    }

    async fn process_line(
        &self,
        session: &mut Session,
        handle: &SessionHandle,
        port: &PortConfig,
        writer: &mut OwnedWriteHalf,
        line: &str,
        arrival_ms: u64,
    ) -> Result<LineOutcome> {
        if line.is_empty() {
            return Ok(LineOutcome::Continue);
        }

        let request: StratumRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "malformed request frame");
                let response = StratumResponse::error(None, CODE_GENERIC, "invalid json");
                self.write_frame(writer, &response).await?;
                return Ok(LineOutcome::Continue);
            }
        };

        match request.method_enum() {
            StratumMethod::Login => self.handle_login(session, handle, port, writer, request).await,
            StratumMethod::GetJob => self.handle_getjob(session, writer, request).await,
            StratumMethod::Submit => {
                self.handle_submit(session, handle, port, writer, request, arrival_ms)
                    .await
            }
            StratumMethod::Keepalived => self.handle_keepalived(session, writer, request).await,
            StratumMethod::Unknown(method) => {
                let response = StratumResponse::unsupported(request.id, &method);
                self.write_frame(writer, &response).await?;
                Ok(LineOutcome::Continue)
            }
        }
    }

    async fn handle_login(
        &self,
        session: &mut Session,
        handle: &SessionHandle,
        port: &PortConfig,
        writer: &mut OwnedWriteHalf,
        request: StratumRequest,
    ) -> Result<LineOutcome> {
        let params: LoginParams = match serde_json::from_value(request.params.clone()) {
            Ok(params) => params,
            Err(_) => {
                let response =
                    StratumResponse::error(request.id, CODE_GENERIC, "missing login params");
                self.write_frame(writer, &response).await?;
                return Ok(LineOutcome::Continue);
            }
        };

        let identity = match MinerIdentity::parse(&params.login, self.payment_id_hex_len) {
            Ok(identity) => identity,
            Err(e) => {
                let message = match &e {
                    Error::Stratum(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                let response = StratumResponse::error(request.id, CODE_GENERIC, message);
                self.write_frame(writer, &response).await?;
                return self.after_invalid(session, handle);
            }
        };

        if !self.address_validator.validate(&identity.address) {
            let response = StratumResponse::error(
                request.id,
                CODE_GENERIC,
                format!("Invalid wallet address: {}", identity.address),
            );
            self.write_frame(writer, &response).await?;
            return self.after_invalid(session, handle);
        }

        let pass_vars = PassVars::parse(&params.pass);
        if let Some(d) = pass_vars.static_difficulty {
            // Static difficulty only overrides vardiff from the port floor up.
            if d >= port.vardiff.min_difficulty {
                session.static_difficulty = Some(d);
                session.pending_difficulty = None;
                session.difficulty = d;
            } else {
                debug!(
                    requested = d,
                    floor = port.vardiff.min_difficulty,
                    "ignoring static difficulty below port minimum"
                );
            }
        }

        info!(
            connection_id = %session.connection_id,
            miner = %identity.address,
            worker = %identity.worker,
            agent = %params.agent,
            "login"
        );

        session.identity = Some(identity);
        session.user_agent = params.agent;
        handle.set_authorized();

        let job_params = match self.mint_for(session) {
            Ok(job_params) => job_params,
            Err(e) => {
                let response = StratumResponse::error(request.id, CODE_GENERIC, e.to_string());
                self.write_frame(writer, &response).await?;
                return Ok(LineOutcome::Continue);
            }
        };

        let result = LoginResult {
            id: session.connection_id.clone(),
            job: job_params,
            status: "OK".to_string(),
        };
        let response = StratumResponse::success(request.id, serde_json::to_value(result)?);
        self.write_frame(writer, &response).await?;
        Ok(LineOutcome::Continue)
    }

    async fn handle_getjob(
        &self,
        session: &mut Session,
        writer: &mut OwnedWriteHalf,
        request: StratumRequest,
    ) -> Result<LineOutcome> {
        let params: Option<SessionParams> = serde_json::from_value(request.params.clone()).ok();
        let addressed_here = params
            .as_ref()
            .map(|p| p.id == session.connection_id)
            .unwrap_or(false);
        if !session.is_authorized() || !addressed_here {
            let response = StratumResponse::error(request.id, CODE_GENERIC, "unauthorized");
            self.write_frame(writer, &response).await?;
            return Ok(LineOutcome::Continue);
        }

        let response = match self.mint_for(session) {
            Ok(job_params) => {
                StratumResponse::success(request.id, serde_json::to_value(job_params)?)
            }
            Err(e) => StratumResponse::error(request.id, CODE_GENERIC, e.to_string()),
        };
        self.write_frame(writer, &response).await?;
        Ok(LineOutcome::Continue)
    }

    async fn handle_submit(
        &self,
        session: &mut Session,
        handle: &SessionHandle,
        port: &PortConfig,
        writer: &mut OwnedWriteHalf,
        request: StratumRequest,
        arrival_ms: u64,
    ) -> Result<LineOutcome> {
        // Overload guard: a submission that aged out in the pipeline is
        // dropped without a response and without touching session state.
        let age_ms = self.clock.now_ms().saturating_sub(arrival_ms);
        if age_ms > self.config.max_share_age.as_millis() as u64 {
            warn!(
                connection_id = %session.connection_id,
                age_ms,
                "dropping overaged submission"
            );
            return Ok(LineOutcome::Continue);
        }

        let Some(request_id) = request.id else {
            let response = StratumResponse::error(None, CODE_GENERIC, "missing request id");
            self.write_frame(writer, &response).await?;
            return Ok(LineOutcome::Continue);
        };
        let request_id = Some(request_id);

        let params: SubmitParams = match serde_json::from_value(request.params.clone()) {
            Ok(params) => params,
            Err(_) => {
                let response =
                    StratumResponse::error(request_id, CODE_GENERIC, "invalid submit params");
                self.write_frame(writer, &response).await?;
                return self.after_invalid(session, handle);
            }
        };

        if !session.is_authorized() || params.id != session.connection_id {
            let response = StratumResponse::error(request_id, CODE_GENERIC, "unauthorized");
            self.write_frame(writer, &response).await?;
            return self.after_invalid(session, handle);
        }

        let Some(job) = session.find_job(&params.job_id) else {
            let response = StratumResponse::error(request_id, 21, "job not found");
            self.write_frame(writer, &response).await?;
            return self.after_invalid(session, handle);
        };

        let (miner, worker) = session.miner_names();
        let verdict = self
            .validator
            .validate(
                &miner,
                &worker,
                &job,
                &params.nonce,
                params.result.as_deref(),
                port.vardiff.min_difficulty,
            )
            .await;

        match verdict {
            Ok(share) => {
                session.record_valid(share.difficulty);
                let response =
                    StratumResponse::success(request_id, json!({ "status": "OK" }));
                self.write_frame(writer, &response).await?;

                if session.static_difficulty.is_none() {
                    let now_ms = self.clock.now_ms();
                    if let Some(new_difficulty) =
                        session
                            .vardiff
                            .record_share(now_ms, session.difficulty, &port.vardiff)
                    {
                        debug!(
                            connection_id = %session.connection_id,
                            from = session.difficulty,
                            to = new_difficulty,
                            "retargeting"
                        );
                        session.pending_difficulty = Some(new_difficulty);
                        self.push_job(session, writer).await?;
                    }
                }
                Ok(LineOutcome::Continue)
            }
            Err(e) => {
                let (code, message) = wire_rejection(&e);
                let response = StratumResponse::error(request_id, code, message);
                self.write_frame(writer, &response).await?;

                if matches!(e, Error::Share(_)) {
                    self.after_invalid(session, handle)
                } else {
                    // Internal failure: the miner gets a generic error and
                    // the submission does not count against the session.
                    Ok(LineOutcome::Continue)
                }
            }
        }
    }

    async fn handle_keepalived(
        &self,
        session: &mut Session,
        writer: &mut OwnedWriteHalf,
        request: StratumRequest,
    ) -> Result<LineOutcome> {
        let params: Option<SessionParams> = serde_json::from_value(request.params.clone()).ok();
        let addressed_here = params
            .as_ref()
            .map(|p| p.id == session.connection_id)
            .unwrap_or(false);
        let response = if session.is_authorized() && addressed_here {
            StratumResponse::success(request.id, json!({ "status": "KEEPALIVED" }))
        } else {
            StratumResponse::error(request.id, CODE_GENERIC, "unauthorized")
        };
        self.write_frame(writer, &response).await?;
        Ok(LineOutcome::Continue)
    }

    /// Record an invalid submission; ban and disconnect past the threshold.
    fn after_invalid(&self, session: &mut Session, handle: &SessionHandle) -> Result<LineOutcome> {
        let now_ms = self.clock.now_ms();
        if session.record_invalid(now_ms, &self.ban_config) {
            warn!(
                connection_id = %session.connection_id,
                ip = %handle.ip,
                invalid_shares = session.stats.invalid_shares,
                "ban threshold crossed"
            );
            self.bans.ban(handle.ip, self.ban_config.ban_duration);
            return Ok(LineOutcome::Disconnect);
        }
        Ok(LineOutcome::Continue)
    }

    /// Mint a job at the session's current difficulty and retain it.
    fn mint_for(&self, session: &mut Session) -> Result<JobParams> {
        let difficulty = session.mint_difficulty();
        let job = self.jobs.mint(difficulty, &session.extra_nonce)?;
        session.remember_job(Arc::clone(&job));
        self.jobs.wire_params(&job)
    }

    /// Mint and push an unsolicited `job` notification.
    async fn push_job(&self, session: &mut Session, writer: &mut OwnedWriteHalf) -> Result<()> {
        let job_params = self.mint_for(session)?;
        let notification = StratumNotification::job(&job_params);
        self.write_frame(writer, &notification).await
    }

    async fn write_frame<T: Serialize>(&self, writer: &mut OwnedWriteHalf, frame: &T) -> Result<()> {
        let mut json = serde_json::to_string(frame)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
