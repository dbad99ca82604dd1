//! Connection protocol messages (RFC 4254).
//!
//! Value types for channel management and global requests:
//!
//! - channel lifecycle: OPEN / OPEN_CONFIRMATION / OPEN_FAILURE /
//!   EOF / CLOSE
//! - data and flow control: DATA / EXTENDED_DATA / WINDOW_ADJUST
//! - requests: CHANNEL_REQUEST / CHANNEL_SUCCESS / CHANNEL_FAILURE,
//!   GLOBAL_REQUEST / REQUEST_SUCCESS / REQUEST_FAILURE
//!
//! Channel types: `session`, `direct-tcpip`, `forwarded-tcpip` and
//! `auth-agent@openssh.com`.
//!
//! # Security
//!
//! - Window sizes and packet sizes are bounded on parse to prevent
//!   memory exhaustion

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};

/// Maximum accepted channel window (16 MB).
pub const MAX_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum accepted channel packet size (256 KB).
pub const MAX_CHANNEL_PACKET_SIZE: u32 = 256 * 1024;

/// Default initial window offered for new channels (2 MB).
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;

/// Default maximum packet size offered for new channels (32 KB).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 32 * 1024;

/// Channel type with its open-time payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelType {
    /// Interactive session (shell, exec, subsystem).
    Session,
    /// Client-initiated outbound tunnel.
    DirectTcpip {
        /// Host the peer should connect to.
        host: String,
        /// Port the peer should connect to.
        port: u32,
        /// Originator IP address.
        originator_address: String,
        /// Originator port.
        originator_port: u32,
    },
    /// Server-initiated inbound tunnel (after a tcpip-forward request).
    ForwardedTcpip {
        /// Address the connection arrived on.
        connected_address: String,
        /// Port the connection arrived on.
        connected_port: u32,
        /// Originator IP address.
        originator_address: String,
        /// Originator port.
        originator_port: u32,
    },
    /// Server-initiated agent-forwarding channel.
    AuthAgent,
}

impl ChannelType {
    /// Returns the channel type name.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelType::Session => "session",
            ChannelType::DirectTcpip { .. } => "direct-tcpip",
            ChannelType::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelType::AuthAgent => "auth-agent@openssh.com",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    channel_type: ChannelType,
    sender_channel: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
}

impl ChannelOpen {
    /// Creates a channel open message.
    pub fn new(
        channel_type: ChannelType,
        sender_channel: u32,
        initial_window_size: u32,
        maximum_packet_size: u32,
    ) -> Self {
        Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Returns the channel type.
    pub fn channel_type(&self) -> &ChannelType {
        &self.channel_type
    }

    /// Returns the sender's channel number.
    pub fn sender_channel(&self) -> u32 {
        self.sender_channel
    }

    /// Returns the initial window size.
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// Returns the maximum packet size.
    pub fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpen as u8);
        codec::write_string(&mut buf, self.channel_type.name());
        buf.put_u32(self.sender_channel);
        buf.put_u32(self.initial_window_size);
        buf.put_u32(self.maximum_packet_size);

        match &self.channel_type {
            ChannelType::Session | ChannelType::AuthAgent => {}
            ChannelType::DirectTcpip {
                host,
                port,
                originator_address,
                originator_port,
            } => {
                codec::write_string(&mut buf, host);
                buf.put_u32(*port);
                codec::write_string(&mut buf, originator_address);
                buf.put_u32(*originator_port);
            }
            ChannelType::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                codec::write_string(&mut buf, connected_address);
                buf.put_u32(*connected_port);
                codec::write_string(&mut buf, originator_address);
                buf.put_u32(*originator_port);
            }
        }

        buf.to_vec()
    }

    /// Parses a CHANNEL_OPEN payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelOpen)?;
        let mut offset = 1;

        let type_name = codec::read_string(data, &mut offset)?;
        let sender_channel = codec::read_u32(data, &mut offset)?;
        let initial_window_size = codec::read_u32(data, &mut offset)?;
        let maximum_packet_size = codec::read_u32(data, &mut offset)?;

        if initial_window_size > MAX_WINDOW_SIZE {
            return Err(HawserError::Protocol(format!(
                "Initial window size {} exceeds maximum {}",
                initial_window_size, MAX_WINDOW_SIZE
            )));
        }
        if maximum_packet_size > MAX_CHANNEL_PACKET_SIZE {
            return Err(HawserError::Protocol(format!(
                "Maximum packet size {} exceeds maximum {}",
                maximum_packet_size, MAX_CHANNEL_PACKET_SIZE
            )));
        }

        let channel_type = match type_name.as_str() {
            "session" => ChannelType::Session,
            "auth-agent@openssh.com" => ChannelType::AuthAgent,
            "direct-tcpip" => {
                let host = codec::read_string(data, &mut offset)?;
                let port = codec::read_u32(data, &mut offset)?;
                let originator_address = codec::read_string(data, &mut offset)?;
                let originator_port = codec::read_u32(data, &mut offset)?;
                ChannelType::DirectTcpip {
                    host,
                    port,
                    originator_address,
                    originator_port,
                }
            }
            "forwarded-tcpip" => {
                let connected_address = codec::read_string(data, &mut offset)?;
                let connected_port = codec::read_u32(data, &mut offset)?;
                let originator_address = codec::read_string(data, &mut offset)?;
                let originator_port = codec::read_u32(data, &mut offset)?;
                ChannelType::ForwardedTcpip {
                    connected_address,
                    connected_port,
                    originator_address,
                    originator_port,
                }
            }
            other => {
                return Err(HawserError::Protocol(format!(
                    "Unsupported channel type: '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// Opener's channel number.
    pub recipient_channel: u32,
    /// Responder's channel number.
    pub sender_channel: u32,
    /// Responder's initial window.
    pub initial_window_size: u32,
    /// Responder's maximum packet size.
    pub maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpenConfirmation as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.sender_channel);
        buf.put_u32(self.initial_window_size);
        buf.put_u32(self.maximum_packet_size);
        buf.to_vec()
    }

    /// Parses a CHANNEL_OPEN_CONFIRMATION payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelOpenConfirmation)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
            sender_channel: codec::read_u32(data, &mut offset)?,
            initial_window_size: codec::read_u32(data, &mut offset)?,
            maximum_packet_size: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// Channel open failure reasons (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelOpenFailureReason {
    /// Administratively prohibited.
    AdministrativelyProhibited = 1,
    /// Connect failed.
    ConnectFailed = 2,
    /// Unknown channel type.
    UnknownChannelType = 3,
    /// Resource shortage.
    ResourceShortage = 4,
}

impl ChannelOpenFailureReason {
    /// Converts from the wire code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    /// Returns a human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "Administratively prohibited",
            Self::ConnectFailed => "Connect failed",
            Self::UnknownChannelType => "Unknown channel type",
            Self::ResourceShortage => "Resource shortage",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// Opener's channel number.
    pub recipient_channel: u32,
    /// Reason code.
    pub reason: ChannelOpenFailureReason,
    /// Description.
    pub description: String,
}

impl ChannelOpenFailure {
    /// Creates a failure with the reason's stock description.
    pub fn new(recipient_channel: u32, reason: ChannelOpenFailureReason) -> Self {
        Self {
            recipient_channel,
            reason,
            description: reason.as_str().to_string(),
        }
    }

    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpenFailure as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.reason as u32);
        codec::write_string(&mut buf, &self.description);
        codec::write_string(&mut buf, ""); // language tag
        buf.to_vec()
    }

    /// Parses a CHANNEL_OPEN_FAILURE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelOpenFailure)?;
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let reason_code = codec::read_u32(data, &mut offset)?;
        let description = codec::read_string(data, &mut offset)?;
        let _language = codec::read_string(data, &mut offset)?;

        let reason = ChannelOpenFailureReason::from_u32(reason_code).ok_or_else(|| {
            HawserError::Protocol(format!("Invalid open failure reason: {}", reason_code))
        })?;

        Ok(Self {
            recipient_channel,
            reason,
            description,
        })
    }
}

/// SSH_MSG_CHANNEL_WINDOW_ADJUST (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindowAdjust {
    /// Peer's channel number.
    pub recipient_channel: u32,
    /// Window credit to add.
    pub bytes_to_add: u32,
}

impl ChannelWindowAdjust {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelWindowAdjust as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.bytes_to_add);
        buf.to_vec()
    }

    /// Parses a CHANNEL_WINDOW_ADJUST payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelWindowAdjust)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
            bytes_to_add: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Peer's channel number.
    pub recipient_channel: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl ChannelData {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelData as u8);
        buf.put_u32(self.recipient_channel);
        codec::write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses a CHANNEL_DATA payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelData)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
            data: codec::read_bytes(data, &mut offset)?,
        })
    }
}

/// Extended data stream codes (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExtendedDataType {
    /// Stderr stream.
    Stderr = 1,
}

impl ExtendedDataType {
    /// Converts from the wire code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// SSH_MSG_CHANNEL_EXTENDED_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    /// Peer's channel number.
    pub recipient_channel: u32,
    /// Stream code.
    pub data_type: ExtendedDataType,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl ChannelExtendedData {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelExtendedData as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.data_type as u32);
        codec::write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses a CHANNEL_EXTENDED_DATA payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelExtendedData)?;
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let code = codec::read_u32(data, &mut offset)?;
        let payload = codec::read_bytes(data, &mut offset)?;
        let data_type = ExtendedDataType::from_u32(code).ok_or_else(|| {
            HawserError::Protocol(format!("Invalid extended data type: {}", code))
        })?;
        Ok(Self {
            recipient_channel,
            data_type,
            data: payload,
        })
    }
}

/// SSH_MSG_CHANNEL_EOF (RFC 4254 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEof {
    /// Peer's channel number.
    pub recipient_channel: u32,
}

impl ChannelEof {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelEof as u8);
        buf.put_u32(self.recipient_channel);
        buf.to_vec()
    }

    /// Parses a CHANNEL_EOF payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelEof)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_CLOSE (RFC 4254 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClose {
    /// Peer's channel number.
    pub recipient_channel: u32,
}

impl ChannelClose {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelClose as u8);
        buf.put_u32(self.recipient_channel);
        buf.to_vec()
    }

    /// Parses a CHANNEL_CLOSE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelClose)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// Channel request bodies (RFC 4254 Section 6, plus the OpenSSH
/// agent-forwarding extension).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// Pseudoterminal allocation.
    PtyReq {
        /// Terminal type (e.g. "xterm").
        term: String,
        /// Width in characters.
        width_chars: u32,
        /// Height in rows.
        height_rows: u32,
        /// Width in pixels.
        width_pixels: u32,
        /// Height in pixels.
        height_pixels: u32,
        /// Encoded terminal modes.
        modes: Vec<u8>,
    },
    /// Environment variable.
    Env {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// Execute a command.
    Exec {
        /// Command line.
        command: String,
    },
    /// Start an interactive shell.
    Shell,
    /// Start a named subsystem.
    Subsystem {
        /// Subsystem name.
        name: String,
    },
    /// Terminal dimensions changed.
    WindowChange {
        /// Width in characters.
        width_chars: u32,
        /// Height in rows.
        height_rows: u32,
        /// Width in pixels.
        width_pixels: u32,
        /// Height in pixels.
        height_pixels: u32,
    },
    /// Request agent forwarding (auth-agent-req@openssh.com).
    AuthAgentReq,
    /// Remote command exit status.
    ExitStatus {
        /// Exit code.
        exit_status: u32,
    },
    /// Remote command terminated by signal.
    ExitSignal {
        /// Signal name without "SIG".
        signal_name: String,
        /// Whether a core was dumped.
        core_dumped: bool,
        /// Error message.
        error_message: String,
        /// Language tag.
        language_tag: String,
    },
}

impl ChannelRequestType {
    /// Returns the request type name.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelRequestType::PtyReq { .. } => "pty-req",
            ChannelRequestType::Env { .. } => "env",
            ChannelRequestType::Exec { .. } => "exec",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::Subsystem { .. } => "subsystem",
            ChannelRequestType::WindowChange { .. } => "window-change",
            ChannelRequestType::AuthAgentReq => "auth-agent-req@openssh.com",
            ChannelRequestType::ExitStatus { .. } => "exit-status",
            ChannelRequestType::ExitSignal { .. } => "exit-signal",
        }
    }
}

/// SSH_MSG_CHANNEL_REQUEST (RFC 4254 Section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Peer's channel number.
    pub recipient_channel: u32,
    /// Request body.
    pub request: ChannelRequestType,
    /// Whether a reply is wanted.
    pub want_reply: bool,
}

impl ChannelRequest {
    /// Creates a channel request.
    pub fn new(recipient_channel: u32, request: ChannelRequestType, want_reply: bool) -> Self {
        Self {
            recipient_channel,
            request,
            want_reply,
        }
    }

    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelRequest as u8);
        buf.put_u32(self.recipient_channel);
        codec::write_string(&mut buf, self.request.name());
        codec::write_bool(&mut buf, self.want_reply);

        match &self.request {
            ChannelRequestType::PtyReq {
                term,
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
                modes,
            } => {
                codec::write_string(&mut buf, term);
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
                codec::write_bytes(&mut buf, modes);
            }
            ChannelRequestType::Env { name, value } => {
                codec::write_string(&mut buf, name);
                codec::write_string(&mut buf, value);
            }
            ChannelRequestType::Exec { command } => {
                codec::write_string(&mut buf, command);
            }
            ChannelRequestType::Shell | ChannelRequestType::AuthAgentReq => {}
            ChannelRequestType::Subsystem { name } => {
                codec::write_string(&mut buf, name);
            }
            ChannelRequestType::WindowChange {
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
            } => {
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
            }
            ChannelRequestType::ExitStatus { exit_status } => {
                buf.put_u32(*exit_status);
            }
            ChannelRequestType::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                language_tag,
            } => {
                codec::write_string(&mut buf, signal_name);
                codec::write_bool(&mut buf, *core_dumped);
                codec::write_string(&mut buf, error_message);
                codec::write_string(&mut buf, language_tag);
            }
        }

        buf.to_vec()
    }

    /// Parses a CHANNEL_REQUEST payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelRequest)?;
        let mut offset = 1;

        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let name = codec::read_string(data, &mut offset)?;
        let want_reply = codec::read_bool(data, &mut offset)?;

        let request = match name.as_str() {
            "pty-req" => ChannelRequestType::PtyReq {
                term: codec::read_string(data, &mut offset)?,
                width_chars: codec::read_u32(data, &mut offset)?,
                height_rows: codec::read_u32(data, &mut offset)?,
                width_pixels: codec::read_u32(data, &mut offset)?,
                height_pixels: codec::read_u32(data, &mut offset)?,
                modes: codec::read_bytes(data, &mut offset)?,
            },
            "env" => ChannelRequestType::Env {
                name: codec::read_string(data, &mut offset)?,
                value: codec::read_string(data, &mut offset)?,
            },
            "exec" => ChannelRequestType::Exec {
                command: codec::read_string(data, &mut offset)?,
            },
            "shell" => ChannelRequestType::Shell,
            "subsystem" => ChannelRequestType::Subsystem {
                name: codec::read_string(data, &mut offset)?,
            },
            "window-change" => ChannelRequestType::WindowChange {
                width_chars: codec::read_u32(data, &mut offset)?,
                height_rows: codec::read_u32(data, &mut offset)?,
                width_pixels: codec::read_u32(data, &mut offset)?,
                height_pixels: codec::read_u32(data, &mut offset)?,
            },
            "auth-agent-req@openssh.com" => ChannelRequestType::AuthAgentReq,
            "exit-status" => ChannelRequestType::ExitStatus {
                exit_status: codec::read_u32(data, &mut offset)?,
            },
            "exit-signal" => ChannelRequestType::ExitSignal {
                signal_name: codec::read_string(data, &mut offset)?,
                core_dumped: codec::read_bool(data, &mut offset)?,
                error_message: codec::read_string(data, &mut offset)?,
                language_tag: codec::read_string(data, &mut offset)?,
            },
            other => {
                return Err(HawserError::Protocol(format!(
                    "Unsupported channel request type: '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            recipient_channel,
            request,
            want_reply,
        })
    }
}

/// SSH_MSG_CHANNEL_SUCCESS (RFC 4254 Section 6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSuccess {
    /// Peer's channel number.
    pub recipient_channel: u32,
}

impl ChannelSuccess {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelSuccess as u8);
        buf.put_u32(self.recipient_channel);
        buf.to_vec()
    }

    /// Parses a CHANNEL_SUCCESS payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelSuccess)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_FAILURE (RFC 4254 Section 6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFailure {
    /// Peer's channel number.
    pub recipient_channel: u32,
}

impl ChannelFailure {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelFailure as u8);
        buf.put_u32(self.recipient_channel);
        buf.to_vec()
    }

    /// Parses a CHANNEL_FAILURE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::ChannelFailure)?;
        let mut offset = 1;
        Ok(Self {
            recipient_channel: codec::read_u32(data, &mut offset)?,
        })
    }
}

/// Global request bodies (RFC 4254 Section 4 and 7.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalRequestType {
    /// Ask the peer to listen and forward connections back.
    TcpipForward {
        /// Address to bind.
        address: String,
        /// Port to bind (0 lets the peer choose).
        port: u32,
    },
    /// Cancel a previous tcpip-forward.
    CancelTcpipForward {
        /// Bound address.
        address: String,
        /// Bound port.
        port: u32,
    },
}

impl GlobalRequestType {
    /// Returns the request name.
    pub fn name(&self) -> &'static str {
        match self {
            GlobalRequestType::TcpipForward { .. } => "tcpip-forward",
            GlobalRequestType::CancelTcpipForward { .. } => "cancel-tcpip-forward",
        }
    }
}

/// SSH_MSG_GLOBAL_REQUEST (RFC 4254 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    /// Request body.
    pub request: GlobalRequestType,
    /// Whether a reply is wanted.
    pub want_reply: bool,
}

impl GlobalRequest {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::GlobalRequest as u8);
        codec::write_string(&mut buf, self.request.name());
        codec::write_bool(&mut buf, self.want_reply);
        match &self.request {
            GlobalRequestType::TcpipForward { address, port }
            | GlobalRequestType::CancelTcpipForward { address, port } => {
                codec::write_string(&mut buf, address);
                buf.put_u32(*port);
            }
        }
        buf.to_vec()
    }

    /// Parses a GLOBAL_REQUEST payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::GlobalRequest)?;
        let mut offset = 1;
        let name = codec::read_string(data, &mut offset)?;
        let want_reply = codec::read_bool(data, &mut offset)?;

        let request = match name.as_str() {
            "tcpip-forward" => GlobalRequestType::TcpipForward {
                address: codec::read_string(data, &mut offset)?,
                port: codec::read_u32(data, &mut offset)?,
            },
            "cancel-tcpip-forward" => GlobalRequestType::CancelTcpipForward {
                address: codec::read_string(data, &mut offset)?,
                port: codec::read_u32(data, &mut offset)?,
            },
            other => {
                return Err(HawserError::Protocol(format!(
                    "Unsupported global request: '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            request,
            want_reply,
        })
    }
}

/// SSH_MSG_REQUEST_SUCCESS (RFC 4254 Section 4). The body is request
/// specific; for `tcpip-forward` with port 0 it carries the bound port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSuccess {
    /// Request-specific response body.
    pub data: Vec<u8>,
}

impl RequestSuccess {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::RequestSuccess as u8);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Parses a REQUEST_SUCCESS payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::RequestSuccess)?;
        Ok(Self {
            data: data[1..].to_vec(),
        })
    }
}

/// SSH_MSG_REQUEST_FAILURE (RFC 4254 Section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFailure;

impl RequestFailure {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::RequestFailure as u8]
    }

    /// Parses a REQUEST_FAILURE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect(data, MessageType::RequestFailure)?;
        Ok(Self)
    }
}

fn expect(data: &[u8], expected: MessageType) -> HawserResult<()> {
    if data.first() != Some(&(expected as u8)) {
        return Err(HawserError::Protocol(format!(
            "Expected message {}, got {:?}",
            expected as u8,
            data.first()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_open_session_round_trip() {
        let open = ChannelOpen::new(ChannelType::Session, 0, DEFAULT_WINDOW_SIZE, 32768);
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed.channel_type(), &ChannelType::Session);
        assert_eq!(parsed.sender_channel(), 0);
        assert_eq!(parsed.initial_window_size(), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_channel_open_direct_tcpip_round_trip() {
        let open = ChannelOpen::new(
            ChannelType::DirectTcpip {
                host: "example.com".to_string(),
                port: 80,
                originator_address: "127.0.0.1".to_string(),
                originator_port: 49152,
            },
            3,
            DEFAULT_WINDOW_SIZE,
            DEFAULT_MAX_PACKET_SIZE,
        );
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        match parsed.channel_type() {
            ChannelType::DirectTcpip { host, port, .. } => {
                assert_eq!(host, "example.com");
                assert_eq!(*port, 80);
            }
            other => panic!("unexpected type {:?}", other),
        }
    }

    #[test]
    fn test_channel_open_auth_agent_round_trip() {
        let open = ChannelOpen::new(ChannelType::AuthAgent, 7, 65536, 32768);
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed.channel_type(), &ChannelType::AuthAgent);
        assert_eq!(parsed.channel_type().name(), "auth-agent@openssh.com");
    }

    #[test]
    fn test_channel_open_rejects_oversized_window() {
        let open = ChannelOpen::new(ChannelType::Session, 0, MAX_WINDOW_SIZE, 32768);
        let mut bytes = open.to_bytes();
        // Bump the window size field above the limit.
        let pos = 1 + 4 + 7 + 4;
        bytes[pos] = 0xFF;
        assert!(ChannelOpen::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_confirmation_round_trip() {
        let confirmation = ChannelOpenConfirmation {
            recipient_channel: 1,
            sender_channel: 2,
            initial_window_size: 4096,
            maximum_packet_size: 1024,
        };
        let parsed = ChannelOpenConfirmation::from_bytes(&confirmation.to_bytes()).unwrap();
        assert_eq!(parsed, confirmation);
    }

    #[test]
    fn test_open_failure_round_trip() {
        let failure = ChannelOpenFailure::new(5, ChannelOpenFailureReason::ConnectFailed);
        let parsed = ChannelOpenFailure::from_bytes(&failure.to_bytes()).unwrap();
        assert_eq!(parsed.reason, ChannelOpenFailureReason::ConnectFailed);
        assert_eq!(parsed.description, "Connect failed");
    }

    #[test]
    fn test_window_adjust_round_trip() {
        let adjust = ChannelWindowAdjust {
            recipient_channel: 2,
            bytes_to_add: 32768,
        };
        let parsed = ChannelWindowAdjust::from_bytes(&adjust.to_bytes()).unwrap();
        assert_eq!(parsed, adjust);
    }

    #[test]
    fn test_channel_data_round_trip() {
        let data = ChannelData {
            recipient_channel: 0,
            data: b"payload bytes".to_vec(),
        };
        let parsed = ChannelData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_extended_data_round_trip() {
        let data = ChannelExtendedData {
            recipient_channel: 0,
            data_type: ExtendedDataType::Stderr,
            data: b"error output".to_vec(),
        };
        let parsed = ChannelExtendedData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_eof_close_round_trip() {
        assert_eq!(
            ChannelEof::from_bytes(&ChannelEof { recipient_channel: 9 }.to_bytes()).unwrap(),
            ChannelEof { recipient_channel: 9 }
        );
        assert_eq!(
            ChannelClose::from_bytes(&ChannelClose { recipient_channel: 9 }.to_bytes()).unwrap(),
            ChannelClose { recipient_channel: 9 }
        );
    }

    #[test]
    fn test_request_exec_round_trip() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::Exec {
                command: "ls -la".to_string(),
            },
            true,
        );
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_pty_round_trip() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::PtyReq {
                term: "xterm-256color".to_string(),
                width_chars: 120,
                height_rows: 40,
                width_pixels: 0,
                height_pixels: 0,
                modes: vec![0],
            },
            true,
        );
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_window_change_round_trip() {
        let request = ChannelRequest::new(
            1,
            ChannelRequestType::WindowChange {
                width_chars: 80,
                height_rows: 24,
                width_pixels: 0,
                height_pixels: 0,
            },
            false,
        );
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_auth_agent_round_trip() {
        let request = ChannelRequest::new(1, ChannelRequestType::AuthAgentReq, true);
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.request.name(), "auth-agent-req@openssh.com");
    }

    #[test]
    fn test_request_exit_status_round_trip() {
        let request =
            ChannelRequest::new(0, ChannelRequestType::ExitStatus { exit_status: 3 }, false);
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        match parsed.request {
            ChannelRequestType::ExitStatus { exit_status } => assert_eq!(exit_status, 3),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_global_request_round_trip() {
        let request = GlobalRequest {
            request: GlobalRequestType::TcpipForward {
                address: "0.0.0.0".to_string(),
                port: 0,
            },
            want_reply: true,
        };
        let parsed = GlobalRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_cancel_forward_round_trip() {
        let request = GlobalRequest {
            request: GlobalRequestType::CancelTcpipForward {
                address: "127.0.0.1".to_string(),
                port: 8022,
            },
            want_reply: false,
        };
        let parsed = GlobalRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_success_carries_port() {
        let mut body = BytesMut::new();
        body.put_u32(45022);
        let success = RequestSuccess {
            data: body.to_vec(),
        };
        let parsed = RequestSuccess::from_bytes(&success.to_bytes()).unwrap();
        let mut offset = 0;
        assert_eq!(codec::read_u32(&parsed.data, &mut offset).unwrap(), 45022);
    }

    #[test]
    fn test_request_failure_round_trip() {
        assert!(RequestFailure::from_bytes(&RequestFailure.to_bytes()).is_ok());
    }

    #[test]
    fn test_channel_success_failure_round_trip() {
        assert_eq!(
            ChannelSuccess::from_bytes(&ChannelSuccess { recipient_channel: 4 }.to_bytes())
                .unwrap()
                .recipient_channel,
            4
        );
        assert_eq!(
            ChannelFailure::from_bytes(&ChannelFailure { recipient_channel: 4 }.to_bytes())
                .unwrap()
                .recipient_channel,
            4
        );
    }
}
