//! SSH client.
//!
//! [`SshClient`] drives a connection through version exchange, key
//! exchange (with known-hosts policy), and user authentication, then
//! converts into an [`SshConnection`] whose multiplexer task carries
//! session channels, tunnels, port forwards and agent forwarding.
//!
//! # Example
//!
//! ```rust,no_run
//! use hawser_proto::ssh::client::{SshClient, SshClientConfig};
//! use hawser_proto::ssh::known_hosts::StrictHostKeyChecking;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = SshClientConfig::default();
//! config.strict_host_key_checking = StrictHostKeyChecking::AcceptNew;
//!
//! let mut client = SshClient::connect_with_config("bastion:22", config).await?;
//! client.authenticate_password("deploy", "hunter2").await?;
//!
//! let connection = client.into_connection();
//! let (output, exit) = connection.execute("uptime").await?;
//! println!("exit {}: {}", exit, String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! ```

use crate::ssh::agent::AgentKeyring;
use crate::ssh::algorithm::SupportedAlgorithms;
use crate::ssh::auth::{
    signature_payload, AuthFailure, AuthMethod, AuthRequest, InfoRequest, InfoResponse,
};
use crate::ssh::connection::{
    ChannelOpen, ChannelRequestType, ChannelType, GlobalRequestType,
};
use crate::ssh::codec;
use crate::ssh::handshake::client_handshake;
use crate::ssh::hostkey;
use crate::ssh::identity::Identity;
use crate::ssh::known_hosts::{HostKeyStatus, KnownHostsFile, StrictHostKeyChecking};
use crate::ssh::message::{DisconnectReason, MessageType};
use crate::ssh::mux::{
    ChannelEvent, ConnectionEvents, MuxConfig, MuxHandle, Multiplexer, OpenDecision,
};
use crate::ssh::connection::ChannelOpenFailureReason;
use crate::ssh::transport::{Role, Transport};
use crate::ssh::tunnel::TunnelStream;
use crate::ssh::version::{read_peer_version, Version};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback asked to approve an unknown host key:
/// (hostname, port, key type, key blob) → accept?
pub type HostPromptCallback = Box<dyn Fn(&str, u16, &str, &[u8]) -> bool + Send + Sync>;

/// Provider of keyboard-interactive responses (one per prompt).
pub type PromptResponder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// SSH client configuration.
pub struct SshClientConfig {
    /// Software version advertised in the identification line.
    pub user_agent: String,
    /// Algorithms offered during negotiation.
    pub algorithms: SupportedAlgorithms,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Host key checking policy.
    pub strict_host_key_checking: StrictHostKeyChecking,
    /// known_hosts path; `None` disables persistence and treats every
    /// host as unknown.
    pub known_hosts_file: Option<PathBuf>,
    /// Approval callback, required for the `Ask` policy.
    pub host_prompt: Option<HostPromptCallback>,
    /// Keepalive interval for the connection task.
    pub keepalive_interval: Option<Duration>,
    /// Identities served over forwarded agent channels. Empty
    /// disables agent forwarding.
    pub agent_keys: AgentKeyring,
    /// Overrides the 1 GiB rekey byte threshold. Tests use small
    /// values to force mid-session exchanges.
    pub rekey_bytes_limit: Option<u64>,
}

impl std::fmt::Debug for SshClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClientConfig")
            .field("user_agent", &self.user_agent)
            .field("connect_timeout", &self.connect_timeout)
            .field("strict_host_key_checking", &self.strict_host_key_checking)
            .field("known_hosts_file", &self.known_hosts_file)
            .field("host_prompt", &self.host_prompt.as_ref().map(|_| "<callback>"))
            .field("keepalive_interval", &self.keepalive_interval)
            .field("agent_keys", &self.agent_keys)
            .field("rekey_bytes_limit", &self.rekey_bytes_limit)
            .finish()
    }
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Hawser_{}", env!("CARGO_PKG_VERSION")),
            algorithms: SupportedAlgorithms::default(),
            connect_timeout: Duration::from_secs(30),
            strict_host_key_checking: StrictHostKeyChecking::Strict,
            known_hosts_file: None,
            host_prompt: None,
            keepalive_interval: None,
            agent_keys: AgentKeyring::new(),
            rekey_bytes_limit: None,
        }
    }
}

/// An SSH client between key exchange and authentication.
pub struct SshClient<S = TcpStream> {
    transport: Transport<S>,
    config: SshClientConfig,
    algorithms: SupportedAlgorithms,
    host_key_blob: Vec<u8>,
    username: Option<String>,
    userauth_started: bool,
}

impl SshClient<TcpStream> {
    /// Connects with default configuration.
    pub async fn connect(addr: &str) -> HawserResult<Self> {
        Self::connect_with_config(addr, SshClientConfig::default()).await
    }

    /// Connects, exchanges versions and keys, and verifies the host
    /// key against the known-hosts policy.
    pub async fn connect_with_config(addr: &str, config: SshClientConfig) -> HawserResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                HawserError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Connection timeout",
                ))
            })?
            .map_err(HawserError::Io)?;

        let (hostname, port) = split_host_port(addr);
        Self::from_stream(stream, &hostname, port, config).await
    }
}

impl<S> SshClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Runs the SSH handshake over an established byte stream. The
    /// hostname/port pair is only used for known-hosts bookkeeping.
    pub async fn from_stream(
        mut stream: S,
        hostname: &str,
        port: u16,
        config: SshClientConfig,
    ) -> HawserResult<Self> {
        // Identification exchange precedes all framing.
        let our_version = Version::new(&config.user_agent, None);
        stream
            .write_all(&our_version.to_wire_format())
            .await
            .map_err(HawserError::Io)?;
        let (_peer_version, peer_line) = read_peer_version(&mut stream).await?;

        let mut transport = Transport::new(
            stream,
            Role::Client,
            our_version.to_string(),
            peer_line,
        );
        if let Some(limit) = config.rekey_bytes_limit {
            transport.set_rekey_bytes_limit(limit);
        }

        let algorithms = config.algorithms.clone();
        let outcome = client_handshake(&mut transport, &algorithms, None).await?;
        debug!(
            host_key = hostkey::fingerprint(&outcome.host_key_blob),
            "key exchange complete"
        );

        let client = Self {
            transport,
            config,
            algorithms,
            host_key_blob: outcome.host_key_blob,
            username: None,
            userauth_started: false,
        };
        client.verify_known_host(hostname, port)?;
        Ok(client)
    }

    /// Applies the known-hosts policy to the host key accepted during
    /// key exchange.
    fn verify_known_host(&self, hostname: &str, port: u16) -> HawserResult<()> {
        if self.config.strict_host_key_checking == StrictHostKeyChecking::No {
            return Ok(());
        }

        let key_type = hostkey::algorithm_of_blob(&self.host_key_blob)?.name();
        let mut known_hosts = match &self.config.known_hosts_file {
            Some(path) => KnownHostsFile::from_file(path)?,
            None => KnownHostsFile::empty(),
        };

        match known_hosts.verify(hostname, port, key_type, &self.host_key_blob) {
            HostKeyStatus::Known => Ok(()),
            HostKeyStatus::Unknown => match self.config.strict_host_key_checking {
                StrictHostKeyChecking::Strict => Err(HawserError::Security(format!(
                    "Host key verification failed: unknown host '{}:{}'",
                    hostname, port
                ))),
                StrictHostKeyChecking::Ask => {
                    let prompt = self.config.host_prompt.as_ref().ok_or_else(|| {
                        HawserError::Config(
                            "Ask policy requires a host prompt callback".to_string(),
                        )
                    })?;
                    if prompt(hostname, port, key_type, &self.host_key_blob) {
                        self.record_host(&mut known_hosts, hostname, port, key_type)
                    } else {
                        Err(HawserError::Security(format!(
                            "Host key for '{}:{}' rejected by user",
                            hostname, port
                        )))
                    }
                }
                StrictHostKeyChecking::AcceptNew => {
                    self.record_host(&mut known_hosts, hostname, port, key_type)
                }
                StrictHostKeyChecking::No => Ok(()),
            },
            HostKeyStatus::Changed { old_key_type, .. } => Err(HawserError::Security(format!(
                "HOST KEY CHANGED for '{}:{}': recorded {}, presented {} ({})",
                hostname,
                port,
                old_key_type,
                key_type,
                hostkey::fingerprint(&self.host_key_blob)
            ))),
        }
    }

    fn record_host(
        &self,
        known_hosts: &mut KnownHostsFile,
        hostname: &str,
        port: u16,
        key_type: &str,
    ) -> HawserResult<()> {
        known_hosts.add(hostname, port, key_type, &self.host_key_blob);
        if self.config.known_hosts_file.is_some() {
            known_hosts.save()?;
        }
        Ok(())
    }

    /// Returns the server's host key blob.
    pub fn server_host_key(&self) -> &[u8] {
        &self.host_key_blob
    }

    /// Returns the server host key fingerprint.
    pub fn server_host_key_fingerprint(&self) -> String {
        hostkey::fingerprint(&self.host_key_blob)
    }

    /// Returns the authenticated username, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns true once authentication has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    async fn request_userauth_service(&mut self) -> HawserResult<()> {
        if self.userauth_started {
            return Ok(());
        }

        let mut request = BytesMut::new();
        request.put_u8(MessageType::ServiceRequest as u8);
        codec::write_string(&mut request, "ssh-userauth");
        self.transport.send_payload(&request).await?;

        let response = self.recv_skipping_noise().await?;
        if response.first() != Some(&(MessageType::ServiceAccept as u8)) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_SERVICE_ACCEPT".to_string(),
            ));
        }
        self.userauth_started = true;
        Ok(())
    }

    /// Receives a payload, discarding ignore/debug/banner messages.
    async fn recv_skipping_noise(&mut self) -> HawserResult<Vec<u8>> {
        loop {
            let payload = self.transport.recv_payload().await?;
            match payload.first() {
                Some(&n)
                    if n == MessageType::Ignore as u8
                        || n == MessageType::Debug as u8
                        || n == MessageType::UserauthBanner as u8 =>
                {
                    continue
                }
                Some(&n) if n == MessageType::Disconnect as u8 => {
                    return Err(HawserError::Protocol(
                        "Peer disconnected".to_string(),
                    ));
                }
                _ => return Ok(payload),
            }
        }
    }

    /// Authenticates with a password.
    pub async fn authenticate_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> HawserResult<()> {
        self.request_userauth_service().await?;

        let request = AuthRequest::new(
            username,
            "ssh-connection",
            AuthMethod::Password(password.to_string()),
        );
        self.transport.send_payload(&request.to_bytes()).await?;

        let response = self.recv_skipping_noise().await?;
        self.conclude_auth(username, &response)
    }

    /// Authenticates with a private key (query, then sign-and-send;
    /// RFC 4252 Section 7).
    pub async fn authenticate_publickey(
        &mut self,
        username: &str,
        identity: &Identity,
    ) -> HawserResult<()> {
        self.request_userauth_service().await?;

        let session_id = self
            .transport
            .session_id()
            .ok_or_else(|| {
                HawserError::Protocol("No session id before authentication".to_string())
            })?
            .to_vec();

        let algorithm = identity.algorithm().name();
        let public_key_blob = identity.public_key_blob();

        // Query whether the key is acceptable before signing.
        let query = AuthRequest::new(
            username,
            "ssh-connection",
            AuthMethod::PublicKey {
                algorithm: algorithm.to_string(),
                public_key: public_key_blob.clone(),
                signature: None,
            },
        );
        self.transport.send_payload(&query.to_bytes()).await?;

        let response = self.recv_skipping_noise().await?;
        match response.first() {
            Some(&n) if n == MessageType::UserauthPkOk as u8 => {}
            Some(&n) if n == MessageType::UserauthFailure as u8 => {
                let failure = AuthFailure::from_bytes(&response)?;
                return Err(auth_failed(&failure));
            }
            _ => {
                return Err(HawserError::Protocol(
                    "Unexpected response to public key query".to_string(),
                ))
            }
        }

        let to_sign = signature_payload(
            &session_id,
            username,
            "ssh-connection",
            algorithm,
            &public_key_blob,
        );
        let signature = identity.sign(&to_sign)?;

        let request = AuthRequest::new(
            username,
            "ssh-connection",
            AuthMethod::PublicKey {
                algorithm: algorithm.to_string(),
                public_key: public_key_blob,
                signature: Some(signature),
            },
        );
        self.transport.send_payload(&request.to_bytes()).await?;

        let response = self.recv_skipping_noise().await?;
        self.conclude_auth(username, &response)
    }

    /// Authenticates via keyboard-interactive, answering each prompt
    /// through the responder.
    pub async fn authenticate_keyboard_interactive(
        &mut self,
        username: &str,
        responder: &PromptResponder,
    ) -> HawserResult<()> {
        self.request_userauth_service().await?;

        let request = AuthRequest::new(
            username,
            "ssh-connection",
            AuthMethod::KeyboardInteractive {
                language: String::new(),
                submethods: String::new(),
            },
        );
        self.transport.send_payload(&request.to_bytes()).await?;

        loop {
            let response = self.recv_skipping_noise().await?;
            match response.first() {
                // 60 is INFO_REQUEST in this method's context.
                Some(&60) => {
                    let info = InfoRequest::from_bytes(&response)?;
                    let responses = info
                        .prompts
                        .iter()
                        .map(|(prompt, _echo)| responder(prompt))
                        .collect();
                    self.transport
                        .send_payload(&InfoResponse { responses }.to_bytes())
                        .await?;
                }
                _ => return self.conclude_auth(username, &response),
            }
        }
    }

    /// Tries methods in the server's preferred order: publickey with
    /// each identity, then password, then keyboard-interactive with
    /// the password. Gives up when the server's continue-list is
    /// exhausted.
    pub async fn authenticate(
        &mut self,
        username: &str,
        identities: &[Arc<Identity>],
        password: Option<&str>,
    ) -> HawserResult<()> {
        for identity in identities {
            match self.authenticate_publickey(username, identity).await {
                Ok(()) => return Ok(()),
                Err(HawserError::Security(_)) | Err(HawserError::Protocol(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        if let Some(password) = password {
            if self.authenticate_password(username, password).await.is_ok() {
                return Ok(());
            }

            let password = password.to_string();
            let responder: PromptResponder = Box::new(move |_prompt| password.clone());
            if self
                .authenticate_keyboard_interactive(username, &responder)
                .await
                .is_ok()
            {
                return Ok(());
            }
        }

        self.transport
            .send_disconnect(
                DisconnectReason::NoMoreAuthMethodsAvailable,
                "All authentication methods exhausted",
            )
            .await;
        Err(HawserError::Security(
            "Authentication failed: no methods left".to_string(),
        ))
    }

    fn conclude_auth(&mut self, username: &str, response: &[u8]) -> HawserResult<()> {
        match response.first() {
            Some(&n) if n == MessageType::UserauthSuccess as u8 => {
                self.username = Some(username.to_string());
                Ok(())
            }
            Some(&n) if n == MessageType::UserauthFailure as u8 => {
                let failure = AuthFailure::from_bytes(response)?;
                Err(auth_failed(&failure))
            }
            _ => Err(HawserError::Protocol(
                "Unexpected authentication response".to_string(),
            )),
        }
    }

    /// Sends a clean disconnect.
    pub async fn disconnect(mut self) -> HawserResult<()> {
        self.transport
            .send_disconnect(DisconnectReason::ByApplication, "Client disconnecting")
            .await;
        Ok(())
    }

    /// Converts the authenticated client into a running connection.
    ///
    /// The connection's multiplexer task takes ownership of the
    /// transport; all further traffic flows through [`SshConnection`].
    pub fn into_connection(self) -> SshConnection {
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();

        let agent = if self.config.agent_keys.is_empty() {
            None
        } else {
            Some(self.config.agent_keys.clone())
        };

        let mux = Multiplexer::new(
            self.transport,
            MuxConfig {
                algorithms: self.algorithms,
                host_keys: Vec::new(),
                expected_host_key: Some(self.host_key_blob),
            },
        );
        let handle = mux.handle();

        let events = ClientEvents {
            forwarded_tx,
            agent,
        };
        let task = tokio::spawn(mux.run(events));

        if let Some(interval) = self.config.keepalive_interval {
            let keepalive_handle = handle.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if keepalive_handle.keepalive().is_err() {
                        break;
                    }
                }
            });
        }

        SshConnection {
            handle,
            forwarded_rx,
            task,
        }
    }
}

fn auth_failed(failure: &AuthFailure) -> HawserError {
    HawserError::Security(format!(
        "Authentication failed; methods that can continue: {}",
        failure.methods_can_continue().join(",")
    ))
}

fn split_host_port(addr: &str) -> (String, u16) {
    match addr.rfind(':') {
        Some(pos) => {
            let host = addr[..pos].to_string();
            let port = addr[pos + 1..].parse::<u16>().unwrap_or(22);
            (host, port)
        }
        None => (addr.to_string(), 22),
    }
}

/// An inbound forwarded-tcpip connection.
#[derive(Debug)]
pub struct ForwardedConnection {
    /// Address the connection arrived on at the server.
    pub connected_address: String,
    /// Port the connection arrived on.
    pub connected_port: u32,
    /// Originator address.
    pub originator_address: String,
    /// Originator port.
    pub originator_port: u32,
    /// The tunneled byte stream.
    pub stream: TunnelStream,
}

/// A running, authenticated SSH connection.
pub struct SshConnection {
    handle: MuxHandle,
    forwarded_rx: mpsc::UnboundedReceiver<ForwardedConnection>,
    task: JoinHandle<HawserResult<()>>,
}

impl SshConnection {
    /// Returns the command handle for advanced use.
    pub fn handle(&self) -> MuxHandle {
        self.handle.clone()
    }

    /// Executes a remote command, returning its output and exit code.
    pub async fn execute(&self, command: &str) -> HawserResult<(Vec<u8>, u32)> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let local_id = self
            .handle
            .open_channel(ChannelType::Session, events_tx)
            .await?;

        self.handle.channel_request(
            local_id,
            ChannelRequestType::Exec {
                command: command.to_string(),
            },
            true,
        )?;

        let mut output = Vec::new();
        let mut exit_status = 0u32;
        let mut request_confirmed = false;

        while let Some(event) = events_rx.recv().await {
            match event {
                ChannelEvent::RequestSuccess => request_confirmed = true,
                ChannelEvent::RequestFailure => {
                    let _ = self.handle.close_channel(local_id);
                    return Err(HawserError::Protocol(format!(
                        "Exec request refused: {}",
                        command
                    )));
                }
                ChannelEvent::Data(data) => output.extend_from_slice(&data),
                ChannelEvent::ExtendedData(_, data) => output.extend_from_slice(&data),
                ChannelEvent::ExitStatus(status) => exit_status = status,
                ChannelEvent::Eof => {
                    let _ = self.handle.close_channel(local_id);
                }
                ChannelEvent::Closed => break,
            }
        }

        if !request_confirmed && output.is_empty() {
            return Err(HawserError::Protocol("Exec produced no response".to_string()));
        }
        Ok((output, exit_status))
    }

    /// Opens an interactive shell on a new session channel, returned
    /// as a byte stream.
    pub async fn shell(&self) -> HawserResult<TunnelStream> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let local_id = self
            .handle
            .open_channel(ChannelType::Session, events_tx)
            .await?;

        self.handle
            .channel_request(local_id, ChannelRequestType::Shell, true)?;

        // The reply arrives on the channel's event queue.
        match events_rx.recv().await {
            Some(ChannelEvent::RequestSuccess) => {}
            Some(ChannelEvent::RequestFailure) | None => {
                let _ = self.handle.close_channel(local_id);
                return Err(HawserError::Protocol("Shell request refused".to_string()));
            }
            Some(other) => {
                // Data before the reply would be a server bug; treat
                // as refusal.
                warn!("Unexpected event before shell confirmation: {:?}", other);
                return Err(HawserError::Protocol("Shell request refused".to_string()));
            }
        }

        Ok(TunnelStream::from_parts(
            self.handle.clone(),
            local_id,
            events_rx,
        ))
    }

    /// Requests agent forwarding on a fresh session channel and keeps
    /// it open; the server may then open auth-agent channels back.
    pub async fn request_agent_forwarding(&self) -> HawserResult<TunnelStream> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let local_id = self
            .handle
            .open_channel(ChannelType::Session, events_tx)
            .await?;

        self.handle
            .channel_request(local_id, ChannelRequestType::AuthAgentReq, true)?;

        match events_rx.recv().await {
            Some(ChannelEvent::RequestSuccess) => {}
            _ => {
                let _ = self.handle.close_channel(local_id);
                return Err(HawserError::Protocol(
                    "Agent forwarding refused".to_string(),
                ));
            }
        }

        Ok(TunnelStream::from_parts(
            self.handle.clone(),
            local_id,
            events_rx,
        ))
    }

    /// Opens a direct-tcpip tunnel to `host:port` through the server.
    pub async fn open_direct_tcpip(&self, host: &str, port: u32) -> HawserResult<TunnelStream> {
        TunnelStream::open_direct_tcpip(&self.handle, host, port, "127.0.0.1", 0).await
    }

    /// Asks the server to listen on `address:port` and forward
    /// connections back. Returns the bound port (meaningful when 0
    /// was requested).
    pub async fn request_tcpip_forward(&self, address: &str, port: u32) -> HawserResult<u32> {
        let body = self
            .handle
            .global_request(GlobalRequestType::TcpipForward {
                address: address.to_string(),
                port,
            })
            .await?;

        if port == 0 && body.len() >= 4 {
            let mut offset = 0;
            return codec::read_u32(&body, &mut offset);
        }
        Ok(port)
    }

    /// Cancels a forward established by
    /// [`request_tcpip_forward`](Self::request_tcpip_forward).
    pub async fn cancel_tcpip_forward(&self, address: &str, port: u32) -> HawserResult<()> {
        self.handle
            .global_request(GlobalRequestType::CancelTcpipForward {
                address: address.to_string(),
                port,
            })
            .await
            .map(|_| ())
    }

    /// Receives the next inbound forwarded-tcpip connection.
    pub async fn accept_forwarded(&mut self) -> Option<ForwardedConnection> {
        self.forwarded_rx.recv().await
    }

    /// Disconnects and waits for the connection task.
    pub async fn close(self) -> HawserResult<()> {
        let _ = self
            .handle
            .shutdown(DisconnectReason::ByApplication, "Client disconnecting");
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(HawserError::Protocol(
                "Connection task panicked".to_string(),
            )),
        }
    }
}

/// Client-side handler for peer-initiated opens and requests.
struct ClientEvents {
    forwarded_tx: mpsc::UnboundedSender<ForwardedConnection>,
    agent: Option<AgentKeyring>,
}

#[async_trait]
impl ConnectionEvents for ClientEvents {
    async fn on_channel_open(&mut self, open: &ChannelOpen, mux: &MuxHandle) -> OpenDecision {
        match open.channel_type() {
            ChannelType::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (accepted_tx, accepted_rx) = oneshot::channel();

                let forwarded_tx = self.forwarded_tx.clone();
                let mux = mux.clone();
                let info = (
                    connected_address.clone(),
                    *connected_port,
                    originator_address.clone(),
                    *originator_port,
                );
                tokio::spawn(async move {
                    let Ok(local_id) = accepted_rx.await else {
                        return;
                    };
                    let stream = TunnelStream::from_parts(mux, local_id, events_rx);
                    let _ = forwarded_tx.send(ForwardedConnection {
                        connected_address: info.0,
                        connected_port: info.1,
                        originator_address: info.2,
                        originator_port: info.3,
                        stream,
                    });
                });

                OpenDecision::Accept {
                    events: events_tx,
                    accepted: Some(accepted_tx),
                }
            }
            ChannelType::AuthAgent => {
                let Some(keyring) = self.agent.clone() else {
                    return OpenDecision::Reject(
                        ChannelOpenFailureReason::AdministrativelyProhibited,
                    );
                };

                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (accepted_tx, accepted_rx) = oneshot::channel();
                let mux = mux.clone();
                tokio::spawn(async move {
                    let Ok(local_id) = accepted_rx.await else {
                        return;
                    };
                    let stream = TunnelStream::from_parts(mux, local_id, events_rx);
                    if let Err(e) = keyring.serve(stream).await {
                        warn!("Agent channel ended with error: {}", e);
                    }
                });

                OpenDecision::Accept {
                    events: events_tx,
                    accepted: Some(accepted_tx),
                }
            }
            _ => OpenDecision::Reject(ChannelOpenFailureReason::AdministrativelyProhibited),
        }
    }

    async fn on_channel_request(
        &mut self,
        _local_id: u32,
        _request: &ChannelRequestType,
        _mux: &MuxHandle,
    ) -> bool {
        false
    }

    async fn on_global_request(
        &mut self,
        _request: &GlobalRequestType,
        _mux: &MuxHandle,
    ) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SshClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("Hawser_"));
        assert_eq!(
            config.strict_host_key_checking,
            StrictHostKeyChecking::Strict
        );
        assert!(config.agent_keys.is_empty());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:2222"), ("example.com".to_string(), 2222));
        assert_eq!(split_host_port("example.com"), ("example.com".to_string(), 22));
        assert_eq!(split_host_port("10.0.0.1:22"), ("10.0.0.1".to_string(), 22));
    }
}
