//! Connection multiplexer (RFC 4254, and Section 9 of RFC 4253 for
//! rekeying).
//!
//! One [`Multiplexer`] owns a connection's [`Transport`] after
//! authentication and runs its single cooperative event loop:
//!
//! - drains the transport, routing channel messages to per-channel
//!   event queues and consulting a [`ConnectionEvents`] handler for
//!   peer-initiated opens and requests
//! - serves commands from [`MuxHandle`] clones (open, data, EOF,
//!   close, channel/global requests)
//! - enforces both flow-control windows: outbound data parks in a
//!   per-channel queue while the peer's window is empty, and inbound
//!   windows are replenished once half-consumed
//! - initiates rekeys on the byte/time triggers and answers
//!   peer-initiated rekeys; channel traffic pauses during the
//!   exchange and resumes afterwards, in order
//!
//! Suspension points are exactly: awaiting transport bytes, awaiting
//! commands (which includes awaiting window credit, since a parked
//! send completes on WINDOW_ADJUST), and the awaits inside the event
//! handler (e.g. dialing a direct-tcpip target).

use crate::ssh::algorithm::SupportedAlgorithms;
use crate::ssh::channel::Channel;
use crate::ssh::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest,
    ChannelRequestType, ChannelSuccess, ChannelWindowAdjust, ExtendedDataType, GlobalRequest,
    GlobalRequestType, RequestFailure, RequestSuccess, DEFAULT_MAX_PACKET_SIZE,
    DEFAULT_WINDOW_SIZE,
};
use crate::ssh::connection::ChannelFailure as ChannelFailureMsg;
use crate::ssh::handshake::{client_handshake, server_handshake};
use crate::ssh::identity::Identity;
use crate::ssh::message::{DisconnectReason, MessageType};
use crate::ssh::transport::{Role, Transport};
use async_trait::async_trait;
use hawser_platform::{HawserError, HawserResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// An event delivered to a channel's consumer.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Ordered payload bytes.
    Data(Vec<u8>),
    /// Extended (stderr) bytes.
    ExtendedData(ExtendedDataType, Vec<u8>),
    /// Peer sent EOF.
    Eof,
    /// The channel is fully closed.
    Closed,
    /// A want-reply channel request succeeded.
    RequestSuccess,
    /// A want-reply channel request failed.
    RequestFailure,
    /// The remote command exited.
    ExitStatus(u32),
}

/// Verdict on a peer-initiated channel open.
pub enum OpenDecision {
    /// Accept; channel events flow into `events`, and the assigned
    /// local id is reported through `accepted` if present.
    Accept {
        /// Event sink for the new channel.
        events: mpsc::UnboundedSender<ChannelEvent>,
        /// Receives the local channel id once the open is confirmed.
        accepted: Option<oneshot::Sender<u32>>,
    },
    /// Reject with the given reason.
    Reject(ChannelOpenFailureReason),
}

/// Hooks a connection front-end implements to steer the multiplexer.
#[async_trait]
pub trait ConnectionEvents: Send {
    /// Decides on a peer-initiated CHANNEL_OPEN.
    async fn on_channel_open(&mut self, open: &ChannelOpen, mux: &MuxHandle) -> OpenDecision;

    /// Handles a channel request; the return value becomes
    /// CHANNEL_SUCCESS / CHANNEL_FAILURE when a reply is wanted.
    async fn on_channel_request(
        &mut self,
        local_id: u32,
        request: &ChannelRequestType,
        mux: &MuxHandle,
    ) -> bool;

    /// Handles a global request; `Some(body)` becomes REQUEST_SUCCESS.
    async fn on_global_request(
        &mut self,
        request: &GlobalRequestType,
        mux: &MuxHandle,
    ) -> Option<Vec<u8>>;
}

/// What the run loop should do after dispatching one payload.
enum Dispatch {
    Continue,
    Ended,
    Rekey(Vec<u8>),
}

enum Command {
    OpenChannel {
        channel_type: crate::ssh::connection::ChannelType,
        events: mpsc::UnboundedSender<ChannelEvent>,
        reply: oneshot::Sender<HawserResult<u32>>,
    },
    Data {
        local_id: u32,
        data: Vec<u8>,
    },
    Eof {
        local_id: u32,
    },
    Close {
        local_id: u32,
    },
    Request {
        local_id: u32,
        request: ChannelRequestType,
        want_reply: bool,
    },
    GlobalRequest {
        request: GlobalRequestType,
        reply: Option<oneshot::Sender<HawserResult<Vec<u8>>>>,
    },
    Keepalive,
    Shutdown {
        reason: DisconnectReason,
        description: String,
    },
}

/// Cloneable handle for issuing commands to a running multiplexer.
#[derive(Clone)]
pub struct MuxHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl MuxHandle {
    /// Opens a channel, resolving to its local id once confirmed.
    pub async fn open_channel(
        &self,
        channel_type: crate::ssh::connection::ChannelType,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> HawserResult<u32> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::OpenChannel {
            channel_type,
            events,
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| connection_closed())?
    }

    /// Queues payload bytes for a channel. Delivery respects the
    /// peer's window; bytes park until credit arrives.
    pub fn send_data(&self, local_id: u32, data: Vec<u8>) -> HawserResult<()> {
        self.send_command(Command::Data { local_id, data })
    }

    /// Sends EOF once all queued data has drained.
    pub fn send_eof(&self, local_id: u32) -> HawserResult<()> {
        self.send_command(Command::Eof { local_id })
    }

    /// Closes a channel once all queued data has drained.
    pub fn close_channel(&self, local_id: u32) -> HawserResult<()> {
        self.send_command(Command::Close { local_id })
    }

    /// Sends a channel request.
    pub fn channel_request(
        &self,
        local_id: u32,
        request: ChannelRequestType,
        want_reply: bool,
    ) -> HawserResult<()> {
        self.send_command(Command::Request {
            local_id,
            request,
            want_reply,
        })
    }

    /// Sends a global request and awaits the reply body.
    pub async fn global_request(&self, request: GlobalRequestType) -> HawserResult<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::GlobalRequest {
            request,
            reply: Some(reply_tx),
        })?;
        reply_rx.await.map_err(|_| connection_closed())?
    }

    /// Sends a global request without waiting for a reply.
    pub fn global_request_no_reply(&self, request: GlobalRequestType) -> HawserResult<()> {
        self.send_command(Command::GlobalRequest {
            request,
            reply: None,
        })
    }

    /// Sends an SSH_MSG_IGNORE keepalive.
    pub fn keepalive(&self) -> HawserResult<()> {
        self.send_command(Command::Keepalive)
    }

    /// Disconnects the session.
    pub fn shutdown(&self, reason: DisconnectReason, description: &str) -> HawserResult<()> {
        self.send_command(Command::Shutdown {
            reason,
            description: description.to_string(),
        })
    }

    fn send_command(&self, command: Command) -> HawserResult<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| connection_closed())
    }

    /// A handle wired to nothing, for exercising adapters without a
    /// running connection.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        std::mem::forget(cmd_rx);
        Self { cmd_tx }
    }
}

fn connection_closed() -> HawserError {
    HawserError::Protocol("Connection closed".to_string())
}

struct ChannelEntry {
    channel: Channel,
    events: mpsc::UnboundedSender<ChannelEvent>,
    /// Outbound data parked until the peer grants window.
    pending_out: VecDeque<Vec<u8>>,
    eof_queued: bool,
    close_queued: bool,
}

/// Rekey material: the algorithm offer plus, server-side, the host
/// keys, and client-side the blob pinned by the first exchange.
pub struct MuxConfig {
    /// Algorithms offered in rekey exchanges.
    pub algorithms: SupportedAlgorithms,
    /// Server host keys (empty on the client).
    pub host_keys: Vec<Arc<Identity>>,
    /// The host key blob accepted in the first exchange (client only);
    /// a rekey presenting a different key is fatal.
    pub expected_host_key: Option<Vec<u8>>,
}

/// The per-connection event loop.
pub struct Multiplexer<S> {
    transport: Transport<S>,
    config: MuxConfig,
    channels: HashMap<u32, ChannelEntry>,
    pending_opens: HashMap<u32, oneshot::Sender<HawserResult<u32>>>,
    pending_globals: VecDeque<oneshot::Sender<HawserResult<Vec<u8>>>>,
    next_channel_id: u32,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl<S> Multiplexer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an authenticated transport.
    pub fn new(transport: Transport<S>, config: MuxConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            config,
            channels: HashMap::new(),
            pending_opens: HashMap::new(),
            pending_globals: VecDeque::new(),
            next_channel_id: 0,
            cmd_tx,
            cmd_rx,
        }
    }

    /// Returns a command handle. Handles stay valid for the life of
    /// the loop.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Runs the event loop until disconnect or transport error.
    pub async fn run<E>(mut self, mut events: E) -> HawserResult<()>
    where
        E: ConnectionEvents,
    {
        // Payloads waiting for dispatch: traffic deferred by a rekey
        // drains before new transport reads.
        let mut queue: VecDeque<Vec<u8>> = VecDeque::new();

        loop {
            if self.transport.should_rekey() {
                let deferred = self.rekey(None).await?;
                queue.extend(deferred);
            }

            while let Some(payload) = queue.pop_front() {
                match self.dispatch_incoming(payload, &mut events).await? {
                    Dispatch::Continue => {}
                    Dispatch::Ended => return Ok(()),
                    Dispatch::Rekey(peer_kexinit) => {
                        let deferred = self.rekey(Some(peer_kexinit)).await?;
                        queue.extend(deferred);
                    }
                }
            }

            tokio::select! {
                payload = self.transport.recv_payload() => {
                    match payload {
                        Ok(payload) => queue.push_back(payload),
                        Err(HawserError::Io(e))
                            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                        {
                            self.notify_all_closed();
                            return Ok(());
                        }
                        Err(e) => {
                            self.notify_all_closed();
                            return Err(e);
                        }
                    }
                }
                command = self.cmd_rx.recv() => {
                    // The loop holds its own sender, so recv never
                    // returns None.
                    let Some(command) = command else { continue };
                    if self.handle_command(command).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch_incoming<E>(
        &mut self,
        payload: Vec<u8>,
        events: &mut E,
    ) -> HawserResult<Dispatch>
    where
        E: ConnectionEvents,
    {
        let Some(&number) = payload.first() else {
            return Ok(Dispatch::Continue);
        };

        match MessageType::from_u8(number) {
            Some(MessageType::ChannelData) => {
                let msg = ChannelData::from_bytes(&payload)?;
                self.deliver_data(msg.recipient_channel, msg.data, None).await?;
            }
            Some(MessageType::ChannelExtendedData) => {
                let msg = ChannelExtendedData::from_bytes(&payload)?;
                self.deliver_data(msg.recipient_channel, msg.data, Some(msg.data_type))
                    .await?;
            }
            Some(MessageType::ChannelWindowAdjust) => {
                let msg = ChannelWindowAdjust::from_bytes(&payload)?;
                if let Some(entry) = self.channels.get_mut(&msg.recipient_channel) {
                    entry.channel.add_send_window(msg.bytes_to_add);
                }
                self.flush_channel(msg.recipient_channel).await?;
            }
            Some(MessageType::ChannelEof) => {
                let msg = ChannelEof::from_bytes(&payload)?;
                if let Some(entry) = self.channels.get_mut(&msg.recipient_channel) {
                    entry.channel.mark_eof_received();
                    let _ = entry.events.send(ChannelEvent::Eof);
                }
            }
            Some(MessageType::ChannelClose) => {
                let msg = ChannelClose::from_bytes(&payload)?;
                self.handle_close(msg.recipient_channel).await?;
            }
            Some(MessageType::ChannelOpen) => {
                let msg = ChannelOpen::from_bytes(&payload)?;
                self.handle_peer_open(msg, events).await?;
            }
            Some(MessageType::ChannelOpenConfirmation) => {
                let msg = ChannelOpenConfirmation::from_bytes(&payload)?;
                if let Some(entry) = self.channels.get_mut(&msg.recipient_channel) {
                    entry.channel.confirm(
                        msg.sender_channel,
                        msg.initial_window_size,
                        msg.maximum_packet_size,
                    );
                }
                if let Some(reply) = self.pending_opens.remove(&msg.recipient_channel) {
                    let _ = reply.send(Ok(msg.recipient_channel));
                }
            }
            Some(MessageType::ChannelOpenFailure) => {
                let msg = ChannelOpenFailure::from_bytes(&payload)?;
                self.channels.remove(&msg.recipient_channel);
                if let Some(reply) = self.pending_opens.remove(&msg.recipient_channel) {
                    let _ = reply.send(Err(HawserError::Protocol(format!(
                        "Channel open rejected: {}",
                        msg.description
                    ))));
                }
            }
            Some(MessageType::ChannelRequest) => {
                let msg = ChannelRequest::from_bytes(&payload)?;
                self.handle_channel_request(msg, events).await?;
            }
            Some(MessageType::ChannelSuccess) => {
                let msg = ChannelSuccess::from_bytes(&payload)?;
                if let Some(entry) = self.channels.get(&msg.recipient_channel) {
                    let _ = entry.events.send(ChannelEvent::RequestSuccess);
                }
            }
            Some(MessageType::ChannelFailure) => {
                let msg = ChannelFailureMsg::from_bytes(&payload)?;
                if let Some(entry) = self.channels.get(&msg.recipient_channel) {
                    let _ = entry.events.send(ChannelEvent::RequestFailure);
                }
            }
            Some(MessageType::GlobalRequest) => {
                let msg = GlobalRequest::from_bytes(&payload)?;
                let handle = self.handle();
                let outcome = events.on_global_request(&msg.request, &handle).await;
                if msg.want_reply {
                    match outcome {
                        Some(data) => {
                            self.transport
                                .send_payload(&RequestSuccess { data }.to_bytes())
                                .await?
                        }
                        None => {
                            self.transport
                                .send_payload(&RequestFailure.to_bytes())
                                .await?
                        }
                    }
                }
            }
            Some(MessageType::RequestSuccess) => {
                let msg = RequestSuccess::from_bytes(&payload)?;
                if let Some(reply) = self.pending_globals.pop_front() {
                    let _ = reply.send(Ok(msg.data));
                }
            }
            Some(MessageType::RequestFailure) => {
                if let Some(reply) = self.pending_globals.pop_front() {
                    let _ = reply.send(Err(HawserError::Protocol(
                        "Global request refused".to_string(),
                    )));
                }
            }
            Some(MessageType::KexInit) => {
                // Peer-initiated rekey; the run loop drives it.
                return Ok(Dispatch::Rekey(payload));
            }
            Some(MessageType::Disconnect) => {
                self.notify_all_closed();
                return Ok(Dispatch::Ended);
            }
            Some(MessageType::Ignore) | Some(MessageType::Debug) => {}
            Some(MessageType::Unimplemented) => {
                warn!("Peer reported an unimplemented message");
            }
            other => {
                debug!(number, "Ignoring unexpected message {:?}", other);
            }
        }

        Ok(Dispatch::Continue)
    }

    async fn deliver_data(
        &mut self,
        local_id: u32,
        data: Vec<u8>,
        extended: Option<ExtendedDataType>,
    ) -> HawserResult<()> {
        let Some(entry) = self.channels.get_mut(&local_id) else {
            warn!(local_id, "Data for unknown channel");
            return Ok(());
        };

        // Window invariant violations by the peer are fatal.
        entry.channel.note_received(data.len())?;

        let event = match extended {
            Some(data_type) => ChannelEvent::ExtendedData(data_type, data),
            None => ChannelEvent::Data(data),
        };
        let _ = entry.events.send(event);

        if let Some(credit) = entry.channel.take_window_credit() {
            let adjust = ChannelWindowAdjust {
                recipient_channel: entry.channel.remote_id(),
                bytes_to_add: credit,
            };
            self.transport.send_payload(&adjust.to_bytes()).await?;
        }
        Ok(())
    }

    async fn handle_close(&mut self, local_id: u32) -> HawserResult<()> {
        let Some(entry) = self.channels.get_mut(&local_id) else {
            // CLOSE for an unknown channel is non-fatal.
            warn!(local_id, "CLOSE for unknown channel");
            return Ok(());
        };

        entry.channel.mark_close_received();
        if entry.channel.state() != crate::ssh::channel::ChannelState::Closed {
            let close = ChannelClose {
                recipient_channel: entry.channel.remote_id(),
            };
            self.transport.send_payload(&close.to_bytes()).await?;
            entry.channel.mark_close_sent();
        }

        let entry = self.channels.remove(&local_id).expect("entry exists");
        let _ = entry.events.send(ChannelEvent::Closed);
        Ok(())
    }

    async fn handle_peer_open<E>(&mut self, open: ChannelOpen, events: &mut E) -> HawserResult<()>
    where
        E: ConnectionEvents,
    {
        let handle = self.handle();
        match events.on_channel_open(&open, &handle).await {
            OpenDecision::Accept {
                events: channel_events,
                accepted,
            } => {
                let local_id = self.next_channel_id;
                self.next_channel_id += 1;

                let mut channel =
                    Channel::new(local_id, DEFAULT_WINDOW_SIZE, DEFAULT_MAX_PACKET_SIZE);
                channel.confirm(
                    open.sender_channel(),
                    open.initial_window_size(),
                    open.maximum_packet_size(),
                );

                let confirmation = ChannelOpenConfirmation {
                    recipient_channel: open.sender_channel(),
                    sender_channel: local_id,
                    initial_window_size: DEFAULT_WINDOW_SIZE,
                    maximum_packet_size: DEFAULT_MAX_PACKET_SIZE,
                };
                self.transport
                    .send_payload(&confirmation.to_bytes())
                    .await?;

                self.channels.insert(
                    local_id,
                    ChannelEntry {
                        channel,
                        events: channel_events,
                        pending_out: VecDeque::new(),
                        eof_queued: false,
                        close_queued: false,
                    },
                );

                if let Some(accepted) = accepted {
                    let _ = accepted.send(local_id);
                }
            }
            OpenDecision::Reject(reason) => {
                let failure = ChannelOpenFailure::new(open.sender_channel(), reason);
                self.transport.send_payload(&failure.to_bytes()).await?;
            }
        }
        Ok(())
    }

    async fn handle_channel_request<E>(
        &mut self,
        msg: ChannelRequest,
        events: &mut E,
    ) -> HawserResult<()>
    where
        E: ConnectionEvents,
    {
        let local_id = msg.recipient_channel;
        let Some(entry) = self.channels.get(&local_id) else {
            warn!(local_id, "Request for unknown channel");
            return Ok(());
        };
        let remote_id = entry.channel.remote_id();

        // Exit notifications go straight to the channel consumer.
        if let ChannelRequestType::ExitStatus { exit_status } = msg.request {
            let _ = entry.events.send(ChannelEvent::ExitStatus(exit_status));
            return Ok(());
        }
        if matches!(msg.request, ChannelRequestType::ExitSignal { .. }) {
            let _ = entry.events.send(ChannelEvent::ExitStatus(128));
            return Ok(());
        }

        let handle = self.handle();
        let granted = events.on_channel_request(local_id, &msg.request, &handle).await;

        if msg.want_reply {
            let reply = if granted {
                ChannelSuccess {
                    recipient_channel: remote_id,
                }
                .to_bytes()
            } else {
                ChannelFailureMsg {
                    recipient_channel: remote_id,
                }
                .to_bytes()
            };
            self.transport.send_payload(&reply).await?;
        }
        Ok(())
    }

    /// Returns Ok(true) when the session should end.
    async fn handle_command(&mut self, command: Command) -> HawserResult<bool> {
        match command {
            Command::OpenChannel {
                channel_type,
                events,
                reply,
            } => {
                let local_id = self.next_channel_id;
                self.next_channel_id += 1;

                let channel =
                    Channel::new(local_id, DEFAULT_WINDOW_SIZE, DEFAULT_MAX_PACKET_SIZE);
                self.channels.insert(
                    local_id,
                    ChannelEntry {
                        channel,
                        events,
                        pending_out: VecDeque::new(),
                        eof_queued: false,
                        close_queued: false,
                    },
                );
                self.pending_opens.insert(local_id, reply);

                let open = ChannelOpen::new(
                    channel_type,
                    local_id,
                    DEFAULT_WINDOW_SIZE,
                    DEFAULT_MAX_PACKET_SIZE,
                );
                self.transport.send_payload(&open.to_bytes()).await?;
            }
            Command::Data { local_id, data } => {
                if let Some(entry) = self.channels.get_mut(&local_id) {
                    entry.pending_out.push_back(data);
                }
                self.flush_channel(local_id).await?;
            }
            Command::Eof { local_id } => {
                if let Some(entry) = self.channels.get_mut(&local_id) {
                    entry.eof_queued = true;
                }
                self.flush_channel(local_id).await?;
            }
            Command::Close { local_id } => {
                if let Some(entry) = self.channels.get_mut(&local_id) {
                    entry.close_queued = true;
                }
                self.flush_channel(local_id).await?;
            }
            Command::Request {
                local_id,
                request,
                want_reply,
            } => {
                if let Some(entry) = self.channels.get(&local_id) {
                    let msg =
                        ChannelRequest::new(entry.channel.remote_id(), request, want_reply);
                    self.transport.send_payload(&msg.to_bytes()).await?;
                }
            }
            Command::GlobalRequest { request, reply } => {
                let msg = GlobalRequest {
                    request,
                    want_reply: reply.is_some(),
                };
                self.transport.send_payload(&msg.to_bytes()).await?;
                if let Some(reply) = reply {
                    self.pending_globals.push_back(reply);
                }
            }
            Command::Keepalive => {
                let payload = crate::ssh::transport::keepalive_payload(16);
                self.transport.send_payload(&payload).await?;
            }
            Command::Shutdown {
                reason,
                description,
            } => {
                self.transport.send_disconnect(reason, &description).await;
                self.notify_all_closed();
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sends as much parked data as the peer's window allows, then any
    /// queued EOF/CLOSE once the queue is dry.
    async fn flush_channel(&mut self, local_id: u32) -> HawserResult<()> {
        loop {
            let Some(entry) = self.channels.get_mut(&local_id) else {
                return Ok(());
            };

            if let Some(front_len) = entry.pending_out.front().map(Vec::len) {
                if !entry.channel.can_send() {
                    entry.pending_out.clear();
                    continue;
                }
                let sendable = entry.channel.sendable(front_len);
                if sendable == 0 {
                    // Parked until WINDOW_ADJUST.
                    return Ok(());
                }

                let chunk: Vec<u8> = if sendable < front_len {
                    let front = entry.pending_out.front_mut().expect("front exists");
                    front.drain(..sendable).collect()
                } else {
                    entry.pending_out.pop_front().expect("front exists")
                };

                entry.channel.consume_send_window(chunk.len())?;
                let msg = ChannelData {
                    recipient_channel: entry.channel.remote_id(),
                    data: chunk,
                };
                self.transport.send_payload(&msg.to_bytes()).await?;
                continue;
            }

            // Queue is dry; emit deferred EOF/CLOSE.
            if entry.eof_queued && entry.channel.can_send() {
                entry.eof_queued = false;
                let msg = ChannelEof {
                    recipient_channel: entry.channel.remote_id(),
                };
                entry.channel.mark_eof_sent();
                self.transport.send_payload(&msg.to_bytes()).await?;
                continue;
            }

            if entry.close_queued {
                entry.close_queued = false;
                let already_closed =
                    entry.channel.state() == crate::ssh::channel::ChannelState::Closed;
                if !already_closed {
                    let msg = ChannelClose {
                        recipient_channel: entry.channel.remote_id(),
                    };
                    entry.channel.mark_close_sent();
                    self.transport.send_payload(&msg.to_bytes()).await?;
                }
                if entry.channel.is_closed() {
                    let entry = self.channels.remove(&local_id).expect("entry exists");
                    let _ = entry.events.send(ChannelEvent::Closed);
                }
                return Ok(());
            }

            return Ok(());
        }
    }

    /// Runs one key exchange in place. Channel traffic received while
    /// the exchange was in flight is returned for ordered dispatch.
    async fn rekey(&mut self, peer_kexinit: Option<Vec<u8>>) -> HawserResult<Vec<Vec<u8>>> {
        debug!(role = ?self.transport.role(), "rekeying");
        let session_id_before = self.transport.session_id().map(<[u8]>::to_vec);

        let outcome = match self.transport.role() {
            Role::Client => {
                client_handshake(&mut self.transport, &self.config.algorithms, peer_kexinit)
                    .await?
            }
            Role::Server => {
                server_handshake(
                    &mut self.transport,
                    &self.config.algorithms,
                    &self.config.host_keys,
                    peer_kexinit,
                )
                .await?
            }
        };

        // The session id is pinned by the first exchange.
        if let Some(before) = session_id_before {
            if outcome.session_id != before {
                return Err(HawserError::Security(
                    "Session identifier changed across rekey".to_string(),
                ));
            }
        }

        // A rekey presenting a different host key is a MITM signal.
        if let Some(expected) = &self.config.expected_host_key {
            if &outcome.host_key_blob != expected {
                return Err(HawserError::Security(
                    "Host key changed across rekey".to_string(),
                ));
            }
        }

        Ok(outcome.deferred)
    }

    fn notify_all_closed(&mut self) {
        for (_, entry) in self.channels.drain() {
            let _ = entry.events.send(ChannelEvent::Closed);
        }
        for (_, reply) in self.pending_opens.drain() {
            let _ = reply.send(Err(connection_closed()));
        }
        for reply in self.pending_globals.drain(..) {
            let _ = reply.send(Err(connection_closed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::connection::ChannelType;

    fn mux_pair() -> (
        Multiplexer<tokio::io::DuplexStream>,
        Multiplexer<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(1 << 20);
        let client_transport = Transport::new(
            a,
            Role::Client,
            "SSH-2.0-Hawser_test".to_string(),
            "SSH-2.0-Hawser_test".to_string(),
        );
        let server_transport = Transport::new(
            b,
            Role::Server,
            "SSH-2.0-Hawser_test".to_string(),
            "SSH-2.0-Hawser_test".to_string(),
        );

        let config = || MuxConfig {
            algorithms: SupportedAlgorithms::default(),
            host_keys: Vec::new(),
            expected_host_key: None,
        };
        (
            Multiplexer::new(client_transport, config()),
            Multiplexer::new(server_transport, config()),
        )
    }

    /// Accepts every session open and echoes channel data back.
    struct EchoServer;

    #[async_trait]
    impl ConnectionEvents for EchoServer {
        async fn on_channel_open(&mut self, open: &ChannelOpen, mux: &MuxHandle) -> OpenDecision {
            if open.channel_type() != &ChannelType::Session {
                return OpenDecision::Reject(ChannelOpenFailureReason::UnknownChannelType);
            }

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let (accepted_tx, accepted_rx) = oneshot::channel();
            let mux = mux.clone();
            tokio::spawn(async move {
                let Ok(local_id) = accepted_rx.await else {
                    return;
                };
                while let Some(event) = events_rx.recv().await {
                    match event {
                        ChannelEvent::Data(data) => {
                            let _ = mux.send_data(local_id, data);
                        }
                        ChannelEvent::Eof => {
                            let _ = mux.close_channel(local_id);
                        }
                        ChannelEvent::Closed => break,
                        _ => {}
                    }
                }
            });

            OpenDecision::Accept {
                events: events_tx,
                accepted: Some(accepted_tx),
            }
        }

        async fn on_channel_request(
            &mut self,
            _local_id: u32,
            _request: &ChannelRequestType,
            _mux: &MuxHandle,
        ) -> bool {
            true
        }

        async fn on_global_request(
            &mut self,
            _request: &GlobalRequestType,
            _mux: &MuxHandle,
        ) -> Option<Vec<u8>> {
            None
        }
    }

    /// Rejects everything.
    struct RejectAll;

    #[async_trait]
    impl ConnectionEvents for RejectAll {
        async fn on_channel_open(&mut self, _open: &ChannelOpen, _mux: &MuxHandle) -> OpenDecision {
            OpenDecision::Reject(ChannelOpenFailureReason::AdministrativelyProhibited)
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

    #[tokio::test]
    async fn test_open_echo_close() {
        let (client_mux, server_mux) = mux_pair();
        let client = client_mux.handle();

        tokio::spawn(server_mux.run(EchoServer));
        tokio::spawn(client_mux.run(RejectAll));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let local_id = client
            .open_channel(ChannelType::Session, events_tx)
            .await
            .unwrap();

        client.send_data(local_id, b"echo me".to_vec()).unwrap();
        match events_rx.recv().await.unwrap() {
            ChannelEvent::Data(data) => assert_eq!(data, b"echo me"),
            other => panic!("unexpected event {:?}", other),
        }

        client.send_eof(local_id).unwrap();
        // The echo server answers EOF with CLOSE; we observe Closed.
        loop {
            match events_rx.recv().await.unwrap() {
                ChannelEvent::Closed => break,
                ChannelEvent::Eof | ChannelEvent::Data(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_open_rejected_surfaces_error() {
        let (client_mux, server_mux) = mux_pair();
        let client = client_mux.handle();

        tokio::spawn(server_mux.run(RejectAll));
        tokio::spawn(client_mux.run(RejectAll));

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let result = client.open_channel(ChannelType::Session, events_tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_large_write_respects_windowing() {
        let (client_mux, server_mux) = mux_pair();
        let client = client_mux.handle();

        tokio::spawn(server_mux.run(EchoServer));
        tokio::spawn(client_mux.run(RejectAll));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let local_id = client
            .open_channel(ChannelType::Session, events_tx)
            .await
            .unwrap();

        // Larger than the 32 KB max packet, so it must be split and
        // reassembled in order.
        let payload: Vec<u8> = (0..200_000usize).map(|i| (i % 251) as u8).collect();
        client.send_data(local_id, payload.clone()).unwrap();

        let mut received = Vec::new();
        while received.len() < payload.len() {
            match events_rx.recv().await.unwrap() {
                ChannelEvent::Data(data) => received.extend_from_slice(&data),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_channels() {
        let (client_mux, server_mux) = mux_pair();
        let client = client_mux.handle();

        tokio::spawn(server_mux.run(EchoServer));
        tokio::spawn(client_mux.run(RejectAll));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _local_id = client
            .open_channel(ChannelType::Session, events_tx)
            .await
            .unwrap();

        client
            .shutdown(DisconnectReason::ByApplication, "test over")
            .unwrap();

        loop {
            match events_rx.recv().await {
                Some(ChannelEvent::Closed) | None => break,
                Some(_) => {}
            }
        }
    }
}
