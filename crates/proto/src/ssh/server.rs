//! SSH server.
//!
//! [`SshServer`] accepts connections, runs the server side of the
//! handshake, authenticates users (publickey against an authorized
//! list, password/keyboard-interactive against a callback), and hands
//! each connection to a [`SessionHandler`] behind the shared
//! multiplexer.
//!
//! # Example
//!
//! ```rust,no_run
//! use hawser_proto::ssh::server::{ExecOutcome, SessionHandler, SshServer};
//! use hawser_platform::HawserResult;
//! use std::sync::Arc;
//!
//! struct Uptime;
//!
//! #[async_trait::async_trait]
//! impl SessionHandler for Uptime {
//!     async fn exec(&self, command: &str) -> HawserResult<ExecOutcome> {
//!         Ok(ExecOutcome {
//!             output: format!("ran: {}\n", command).into_bytes(),
//!             exit_status: 0,
//!         })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = SshServer::bind("127.0.0.1:2222").await?;
//! server.set_password_callback(Arc::new(|user, pass| user == "admin" && pass == "secret"));
//!
//! loop {
//!     let mut session = server.accept().await?;
//!     tokio::spawn(async move {
//!         session.authenticate().await?;
//!         session.serve(Arc::new(Uptime)).await
//!     });
//! }
//! # }
//! ```

use crate::ssh::algorithm::{HostKeyAlg, SupportedAlgorithms};
use crate::ssh::auth::{
    signature_payload, AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthSuccess,
    InfoRequest, InfoResponse,
};
use crate::ssh::authorized_keys::AuthorizedKeys;
use crate::ssh::codec;
use crate::ssh::connection::{
    ChannelOpen, ChannelOpenFailureReason, ChannelRequestType, ChannelType, GlobalRequestType,
};
use crate::ssh::handshake::server_handshake;
use crate::ssh::hostkey;
use crate::ssh::identity::Identity;
use crate::ssh::message::{DisconnectReason, MessageType};
use crate::ssh::mux::{
    ChannelEvent, ConnectionEvents, MuxConfig, MuxHandle, Multiplexer, OpenDecision,
};
use crate::ssh::transport::{Role, Transport};
use crate::ssh::tunnel::TunnelStream;
use crate::ssh::version::{read_peer_version, Version};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Verifies a (username, password) pair.
pub type PasswordVerifier = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct SshServerConfig {
    /// Software version advertised in the identification line.
    pub server_version: String,
    /// Algorithms offered during negotiation.
    pub algorithms: SupportedAlgorithms,
    /// Authentication attempts before the connection is dropped.
    pub max_auth_attempts: u32,
    /// Banner shown before authentication, if any.
    pub banner: Option<String>,
    /// Whether direct-tcpip channels may dial out.
    pub allow_direct_tcpip: bool,
    /// Whether tcpip-forward requests may bind listeners.
    pub allow_tcpip_forward: bool,
    /// Whether auth-agent-req is granted.
    pub allow_agent_forwarding: bool,
}

impl Default for SshServerConfig {
    fn default() -> Self {
        Self {
            server_version: format!("Hawser_{}", env!("CARGO_PKG_VERSION")),
            algorithms: SupportedAlgorithms::default(),
            max_auth_attempts: 3,
            banner: None,
            allow_direct_tcpip: true,
            allow_tcpip_forward: true,
            allow_agent_forwarding: true,
        }
    }
}

/// The result of executing a command for a session.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Bytes written to the channel.
    pub output: Vec<u8>,
    /// Exit status reported via the `exit-status` request.
    pub exit_status: u32,
}

/// Application behavior behind session channels.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Executes a command.
    async fn exec(&self, command: &str) -> HawserResult<ExecOutcome>;

    /// Runs an interactive shell over the channel's byte stream.
    async fn shell(&self, _io: TunnelStream) -> HawserResult<()> {
        Err(HawserError::Protocol("Shell not supported".to_string()))
    }

    /// Runs a named subsystem over the channel's byte stream.
    async fn subsystem(&self, name: &str, _io: TunnelStream) -> HawserResult<()> {
        Err(HawserError::Protocol(format!(
            "Subsystem '{}' not supported",
            name
        )))
    }
}

/// A listening SSH server.
pub struct SshServer {
    listener: TcpListener,
    config: SshServerConfig,
    host_keys: Arc<Vec<Arc<Identity>>>,
    password_callback: Option<PasswordVerifier>,
    authorized_keys: AuthorizedKeys,
}

impl SshServer {
    /// Binds with a fresh Ed25519 host key. For production use
    /// [`bind_with_config`](Self::bind_with_config) with persistent
    /// keys (see [`hostkey::load_host_keys`]).
    pub async fn bind(addr: &str) -> HawserResult<Self> {
        let host_key = Arc::new(Identity::generate(HostKeyAlg::SshEd25519)?);
        Self::bind_with_config(addr, SshServerConfig::default(), vec![host_key]).await
    }

    /// Binds with explicit configuration and host keys.
    pub async fn bind_with_config(
        addr: &str,
        config: SshServerConfig,
        host_keys: Vec<Arc<Identity>>,
    ) -> HawserResult<Self> {
        if host_keys.is_empty() {
            return Err(HawserError::Config(
                "At least one host key is required".to_string(),
            ));
        }
        let listener = TcpListener::bind(addr).await.map_err(HawserError::Io)?;
        Ok(Self {
            listener,
            config,
            host_keys: Arc::new(host_keys),
            password_callback: None,
            authorized_keys: AuthorizedKeys::new(),
        })
    }

    /// Sets the password verification callback. Without one, password
    /// and keyboard-interactive authentication are not offered.
    pub fn set_password_callback(&mut self, callback: PasswordVerifier) {
        self.password_callback = Some(callback);
    }

    /// Sets the authorized public keys for publickey authentication.
    pub fn set_authorized_keys(&mut self, keys: AuthorizedKeys) {
        self.authorized_keys = keys;
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one client: version exchange plus key exchange. The
    /// returned session still needs [`SshSession::authenticate`].
    pub async fn accept(&self) -> HawserResult<SshSession<TcpStream>> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(HawserError::Io)?;
        debug!(%peer_addr, "accepted TCP connection");
        self.session_from_stream(stream, peer_addr.to_string()).await
    }

    /// Runs the server handshake over an established byte stream.
    pub async fn session_from_stream<S>(
        &self,
        mut stream: S,
        peer_addr: String,
    ) -> HawserResult<SshSession<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let our_version = Version::new(&self.config.server_version, None);
        stream
            .write_all(&our_version.to_wire_format())
            .await
            .map_err(HawserError::Io)?;
        let (_peer_version, peer_line) = read_peer_version(&mut stream).await?;

        let mut transport = Transport::new(
            stream,
            Role::Server,
            our_version.to_string(),
            peer_line,
        );

        server_handshake(&mut transport, &self.config.algorithms, &self.host_keys, None).await?;

        Ok(SshSession {
            transport,
            config: self.config.clone(),
            host_keys: self.host_keys.clone(),
            password_callback: self.password_callback.clone(),
            authorized_keys: self.authorized_keys.clone(),
            peer_addr,
            username: None,
        })
    }
}

/// One accepted connection, from key exchange to service.
pub struct SshSession<S> {
    transport: Transport<S>,
    config: SshServerConfig,
    host_keys: Arc<Vec<Arc<Identity>>>,
    password_callback: Option<PasswordVerifier>,
    authorized_keys: AuthorizedKeys,
    peer_addr: String,
    username: Option<String>,
}

impl<S> SshSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Returns the peer address.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Returns the authenticated username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns true once a user has authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    fn offered_methods(&self) -> Vec<String> {
        let mut methods = vec!["publickey".to_string()];
        if self.password_callback.is_some() {
            methods.push("password".to_string());
            methods.push("keyboard-interactive".to_string());
        }
        methods
    }

    /// Runs the userauth protocol to completion.
    ///
    /// # Errors
    ///
    /// Returns [`HawserError::Security`] once too many attempts have
    /// failed; a DISCONNECT with
    /// `SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE` is sent first.
    pub async fn authenticate(&mut self) -> HawserResult<()> {
        let mut attempts = 0u32;
        let mut kbd_pending: Option<String> = None;

        loop {
            let payload = self.transport.recv_payload().await?;
            let Some(&number) = payload.first() else {
                continue;
            };

            match number {
                n if n == MessageType::Ignore as u8 || n == MessageType::Debug as u8 => {}
                n if n == MessageType::Disconnect as u8 => {
                    return Err(HawserError::Protocol(
                        "Peer disconnected during authentication".to_string(),
                    ));
                }
                n if n == MessageType::ServiceRequest as u8 => {
                    let mut offset = 1;
                    let service = codec::read_string(&payload, &mut offset)?;
                    if service != "ssh-userauth" {
                        self.transport
                            .send_disconnect(
                                DisconnectReason::ServiceNotAvailable,
                                &format!("Service '{}' not available", service),
                            )
                            .await;
                        return Err(HawserError::Protocol(format!(
                            "Unsupported service request: '{}'",
                            service
                        )));
                    }

                    let mut accept = BytesMut::new();
                    accept.put_u8(MessageType::ServiceAccept as u8);
                    codec::write_string(&mut accept, "ssh-userauth");
                    self.transport.send_payload(&accept).await?;

                    if let Some(banner) = &self.config.banner {
                        let banner = AuthBanner {
                            message: banner.clone(),
                            language: String::new(),
                        };
                        self.transport.send_payload(&banner.to_bytes()).await?;
                    }
                }
                n if n == MessageType::UserauthInfoResponse as u8 => {
                    let response = InfoResponse::from_bytes(&payload)?;
                    let Some(username) = kbd_pending.take() else {
                        return Err(HawserError::Protocol(
                            "INFO_RESPONSE without a pending prompt".to_string(),
                        ));
                    };

                    let granted = match (&self.password_callback, response.responses.first()) {
                        (Some(callback), Some(answer)) => callback(&username, answer),
                        _ => false,
                    };

                    if granted {
                        self.transport
                            .send_payload(&AuthSuccess.to_bytes())
                            .await?;
                        self.username = Some(username);
                        return Ok(());
                    }
                    attempts += 1;
                    if self.fail_or_give_up(attempts).await? {
                        return Err(auth_exhausted());
                    }
                }
                n if n == MessageType::UserauthRequest as u8 => {
                    let request = AuthRequest::from_bytes(&payload)?;
                    if request.service_name() != "ssh-connection" {
                        self.transport
                            .send_disconnect(
                                DisconnectReason::ServiceNotAvailable,
                                "Only ssh-connection is served",
                            )
                            .await;
                        return Err(HawserError::Protocol(format!(
                            "Unsupported target service: '{}'",
                            request.service_name()
                        )));
                    }

                    match request.method() {
                        AuthMethod::None => {
                            let failure = AuthFailure::new(self.offered_methods(), false);
                            self.transport.send_payload(&failure.to_bytes()).await?;
                        }
                        AuthMethod::Password(password) => {
                            let granted = self
                                .password_callback
                                .as_ref()
                                .is_some_and(|cb| cb(request.user_name(), password));
                            if granted {
                                self.transport
                                    .send_payload(&AuthSuccess.to_bytes())
                                    .await?;
                                self.username = Some(request.user_name().to_string());
                                return Ok(());
                            }
                            attempts += 1;
                            if self.fail_or_give_up(attempts).await? {
                                return Err(auth_exhausted());
                            }
                        }
                        AuthMethod::PublicKey {
                            algorithm,
                            public_key,
                            signature,
                        } => {
                            let authorized =
                                self.authorized_keys.is_authorized(algorithm, public_key);

                            match signature {
                                None if authorized => {
                                    let pk_ok = AuthPkOk {
                                        algorithm: algorithm.clone(),
                                        public_key: public_key.clone(),
                                    };
                                    self.transport.send_payload(&pk_ok.to_bytes()).await?;
                                }
                                Some(signature) if authorized => {
                                    let session_id =
                                        self.transport.session_id().ok_or_else(|| {
                                            HawserError::Protocol(
                                                "No session id".to_string(),
                                            )
                                        })?;
                                    let signed = signature_payload(
                                        session_id,
                                        request.user_name(),
                                        "ssh-connection",
                                        algorithm,
                                        public_key,
                                    );
                                    if hostkey::verify_signature(public_key, &signed, signature)?
                                    {
                                        self.transport
                                            .send_payload(&AuthSuccess.to_bytes())
                                            .await?;
                                        self.username =
                                            Some(request.user_name().to_string());
                                        info!(
                                            user = request.user_name(),
                                            peer = %self.peer_addr,
                                            "publickey authentication succeeded"
                                        );
                                        return Ok(());
                                    }
                                    attempts += 1;
                                    if self.fail_or_give_up(attempts).await? {
                                        return Err(auth_exhausted());
                                    }
                                }
                                _ => {
                                    attempts += 1;
                                    if self.fail_or_give_up(attempts).await? {
                                        return Err(auth_exhausted());
                                    }
                                }
                            }
                        }
                        AuthMethod::KeyboardInteractive { .. } => {
                            if self.password_callback.is_none() {
                                attempts += 1;
                                if self.fail_or_give_up(attempts).await? {
                                    return Err(auth_exhausted());
                                }
                                continue;
                            }
                            kbd_pending = Some(request.user_name().to_string());
                            let prompt = InfoRequest {
                                name: String::new(),
                                instruction: String::new(),
                                language: String::new(),
                                prompts: vec![("Password: ".to_string(), false)],
                            };
                            self.transport.send_payload(&prompt.to_bytes()).await?;
                        }
                    }
                }
                other => {
                    warn!(number = other, "Unexpected message during authentication");
                }
            }
        }
    }

    /// Sends USERAUTH_FAILURE, or disconnects once the attempt limit
    /// is reached. Returns true when the session is over.
    async fn fail_or_give_up(&mut self, attempts: u32) -> HawserResult<bool> {
        if attempts >= self.config.max_auth_attempts {
            self.transport
                .send_disconnect(
                    DisconnectReason::NoMoreAuthMethodsAvailable,
                    "Too many authentication failures",
                )
                .await;
            return Ok(true);
        }
        let failure = AuthFailure::new(self.offered_methods(), false);
        self.transport.send_payload(&failure.to_bytes()).await?;
        Ok(false)
    }

    /// Serves the connection protocol until the session ends.
    pub async fn serve(self, handler: Arc<dyn SessionHandler>) -> HawserResult<()> {
        let (mux, events) = self.into_mux(handler)?;
        mux.run(events).await
    }

    /// Serves the connection protocol on a spawned task, returning a
    /// command handle for server-initiated traffic (forwarded-tcpip
    /// opens, agent channels).
    pub fn serve_in_background(
        self,
        handler: Arc<dyn SessionHandler>,
    ) -> HawserResult<(MuxHandle, tokio::task::JoinHandle<HawserResult<()>>)> {
        let (mux, events) = self.into_mux(handler)?;
        let handle = mux.handle();
        let task = tokio::spawn(mux.run(events));
        Ok((handle, task))
    }

    fn into_mux(
        self,
        handler: Arc<dyn SessionHandler>,
    ) -> HawserResult<(Multiplexer<S>, ServerEvents)> {
        if self.username.is_none() {
            return Err(HawserError::Protocol(
                "Session not authenticated".to_string(),
            ));
        }

        let mux = Multiplexer::new(
            self.transport,
            MuxConfig {
                algorithms: self.config.algorithms.clone(),
                host_keys: self.host_keys.as_ref().clone(),
                expected_host_key: None,
            },
        );

        let events = ServerEvents {
            handler,
            config: self.config,
            pending_sessions: Vec::new(),
            session_streams: HashMap::new(),
            forwards: HashMap::new(),
        };
        Ok((mux, events))
    }
}

fn auth_exhausted() -> HawserError {
    HawserError::Security("Authentication attempts exhausted".to_string())
}

/// Opens an auth-agent channel toward the client and wraps it. Only
/// meaningful after the client granted agent forwarding.
pub async fn open_agent_channel(mux: &MuxHandle) -> HawserResult<TunnelStream> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let local_id = mux.open_channel(ChannelType::AuthAgent, events_tx).await?;
    Ok(TunnelStream::from_parts(mux.clone(), local_id, events_rx))
}

/// Server-side connection event handler.
struct ServerEvents {
    handler: Arc<dyn SessionHandler>,
    config: SshServerConfig,
    /// Session channels whose local ids are not yet known.
    pending_sessions: Vec<(oneshot::Receiver<u32>, mpsc::UnboundedReceiver<ChannelEvent>)>,
    /// Session channels ready to be claimed by shell/subsystem.
    session_streams: HashMap<u32, mpsc::UnboundedReceiver<ChannelEvent>>,
    /// Active tcpip-forward listeners by (address, port).
    forwards: HashMap<(String, u32), tokio::task::JoinHandle<()>>,
}

impl ServerEvents {
    /// Moves confirmed session channels from pending to ready.
    fn resolve_pending(&mut self) {
        let mut still_pending = Vec::new();
        for (mut accepted, events) in self.pending_sessions.drain(..) {
            match accepted.try_recv() {
                Ok(local_id) => {
                    self.session_streams.insert(local_id, events);
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    still_pending.push((accepted, events));
                }
                Err(oneshot::error::TryRecvError::Closed) => {}
            }
        }
        self.pending_sessions = still_pending;
    }
}

#[async_trait]
impl ConnectionEvents for ServerEvents {
    async fn on_channel_open(&mut self, open: &ChannelOpen, mux: &MuxHandle) -> OpenDecision {
        match open.channel_type() {
            ChannelType::Session => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (accepted_tx, accepted_rx) = oneshot::channel();
                self.pending_sessions.push((accepted_rx, events_rx));
                OpenDecision::Accept {
                    events: events_tx,
                    accepted: Some(accepted_tx),
                }
            }
            ChannelType::DirectTcpip { host, port, .. } => {
                if !self.config.allow_direct_tcpip {
                    return OpenDecision::Reject(
                        ChannelOpenFailureReason::AdministrativelyProhibited,
                    );
                }

                let target = format!("{}:{}", host, port);
                match TcpStream::connect(&target).await {
                    Ok(outbound) => {
                        let (events_tx, events_rx) = mpsc::unbounded_channel();
                        let (accepted_tx, accepted_rx) = oneshot::channel();
                        let mux = mux.clone();
                        tokio::spawn(async move {
                            let Ok(local_id) = accepted_rx.await else {
                                return;
                            };
                            let tunnel = TunnelStream::from_parts(mux, local_id, events_rx);
                            bridge(tunnel, outbound).await;
                        });
                        OpenDecision::Accept {
                            events: events_tx,
                            accepted: Some(accepted_tx),
                        }
                    }
                    Err(e) => {
                        warn!(target, error = %e, "direct-tcpip dial failed");
                        OpenDecision::Reject(ChannelOpenFailureReason::ConnectFailed)
                    }
                }
            }
            _ => OpenDecision::Reject(ChannelOpenFailureReason::UnknownChannelType),
        }
    }

    async fn on_channel_request(
        &mut self,
        local_id: u32,
        request: &ChannelRequestType,
        mux: &MuxHandle,
    ) -> bool {
        self.resolve_pending();

        match request {
            ChannelRequestType::Exec { command } => {
                // The exec output flows back on the same channel; its
                // event queue is consumed here so the reply path stays
                // inside this handler's task.
                self.session_streams.remove(&local_id);

                let handler = self.handler.clone();
                let mux = mux.clone();
                let command = command.clone();
                tokio::spawn(async move {
                    match handler.exec(&command).await {
                        Ok(outcome) => {
                            let _ = mux.send_data(local_id, outcome.output);
                            let _ = mux.channel_request(
                                local_id,
                                ChannelRequestType::ExitStatus {
                                    exit_status: outcome.exit_status,
                                },
                                false,
                            );
                        }
                        Err(e) => {
                            warn!(command, error = %e, "exec failed");
                            let _ = mux.channel_request(
                                local_id,
                                ChannelRequestType::ExitStatus { exit_status: 1 },
                                false,
                            );
                        }
                    }
                    let _ = mux.send_eof(local_id);
                    let _ = mux.close_channel(local_id);
                });
                true
            }
            ChannelRequestType::Shell => {
                let Some(events) = self.session_streams.remove(&local_id) else {
                    return false;
                };
                let handler = self.handler.clone();
                let stream = TunnelStream::from_parts(mux.clone(), local_id, events);
                let mux = mux.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.shell(stream).await {
                        warn!(error = %e, "shell handler ended with error");
                    }
                    let _ = mux.close_channel(local_id);
                });
                true
            }
            ChannelRequestType::Subsystem { name } => {
                let Some(events) = self.session_streams.remove(&local_id) else {
                    return false;
                };
                let handler = self.handler.clone();
                let name = name.clone();
                let stream = TunnelStream::from_parts(mux.clone(), local_id, events);
                let mux = mux.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.subsystem(&name, stream).await {
                        warn!(subsystem = name, error = %e, "subsystem ended with error");
                    }
                    let _ = mux.close_channel(local_id);
                });
                true
            }
            ChannelRequestType::PtyReq { .. }
            | ChannelRequestType::Env { .. }
            | ChannelRequestType::WindowChange { .. } => true,
            ChannelRequestType::AuthAgentReq => self.config.allow_agent_forwarding,
            ChannelRequestType::ExitStatus { .. } | ChannelRequestType::ExitSignal { .. } => false,
        }
    }

    async fn on_global_request(
        &mut self,
        request: &GlobalRequestType,
        mux: &MuxHandle,
    ) -> Option<Vec<u8>> {
        match request {
            GlobalRequestType::TcpipForward { address, port } => {
                if !self.config.allow_tcpip_forward {
                    return None;
                }

                let bind_addr = format!("{}:{}", address, port);
                let listener = match TcpListener::bind(&bind_addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        warn!(bind_addr, error = %e, "tcpip-forward bind failed");
                        return None;
                    }
                };
                let bound_port = match listener.local_addr() {
                    Ok(addr) => addr.port() as u32,
                    Err(_) => return None,
                };

                let mux = mux.clone();
                let connected_address = address.clone();
                let task = tokio::spawn(async move {
                    loop {
                        let Ok((inbound, peer)) = listener.accept().await else {
                            break;
                        };

                        let (events_tx, events_rx) = mpsc::unbounded_channel();
                        let open = mux
                            .open_channel(
                                ChannelType::ForwardedTcpip {
                                    connected_address: connected_address.clone(),
                                    connected_port: bound_port,
                                    originator_address: peer.ip().to_string(),
                                    originator_port: peer.port() as u32,
                                },
                                events_tx,
                            )
                            .await;
                        match open {
                            Ok(local_id) => {
                                let tunnel = TunnelStream::from_parts(
                                    mux.clone(),
                                    local_id,
                                    events_rx,
                                );
                                tokio::spawn(bridge(tunnel, inbound));
                            }
                            Err(e) => {
                                warn!(error = %e, "forwarded-tcpip open failed");
                                break;
                            }
                        }
                    }
                });
                self.forwards
                    .insert((address.clone(), bound_port), task);

                let mut body = BytesMut::new();
                if *port == 0 {
                    body.put_u32(bound_port);
                }
                Some(body.to_vec())
            }
            GlobalRequestType::CancelTcpipForward { address, port } => {
                match self.forwards.remove(&(address.clone(), *port)) {
                    Some(task) => {
                        task.abort();
                        Some(Vec::new())
                    }
                    None => None,
                }
            }
        }
    }
}

/// Copies bytes both ways between a tunnel and a socket until one side
/// closes.
async fn bridge(mut tunnel: TunnelStream, mut socket: TcpStream) {
    match tokio::io::copy_bidirectional(&mut tunnel, &mut socket).await {
        Ok((to_socket, to_tunnel)) => {
            debug!(to_socket, to_tunnel, "bridge finished");
        }
        Err(e) => {
            debug!(error = %e, "bridge ended with error");
        }
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut tunnel).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SshServerConfig::default();
        assert!(config.server_version.starts_with("Hawser_"));
        assert_eq!(config.max_auth_attempts, 3);
        assert!(config.allow_direct_tcpip);
    }

    #[tokio::test]
    async fn test_bind_requires_host_key() {
        let result =
            SshServer::bind_with_config("127.0.0.1:0", SshServerConfig::default(), vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let server = SshServer::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
