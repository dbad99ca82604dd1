//! SSH protocol message numbers (RFC 4253 Section 12).
//!
//! # Message Categories
//!
//! - **Transport layer generic** (1-19): disconnect, ignore, debug
//! - **Algorithm negotiation** (20-29): KEXINIT, NEWKEYS
//! - **Key exchange method** (30-49): method-specific; the numbers in
//!   this range are reused between methods (e.g. 30 is KEXDH_INIT for
//!   fixed-group DH and KEX_ECDH_INIT for ECDH), so they are only
//!   meaningful in the context of the negotiated method
//! - **User authentication** (50-79): userauth protocol; 60/61 are
//!   method-specific (PK_OK for publickey, INFO_REQUEST/INFO_RESPONSE
//!   for keyboard-interactive)
//! - **Connection protocol** (80-127): channels and global requests

/// SSH message types.
///
/// Each message type has a unique numeric identifier used in the
/// binary protocol. Method-specific numbers carry the name of the
/// method they are interpreted under here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to an unknown message number.
    Unimplemented = 3,
    /// Debug message.
    Debug = 4,
    /// Service request (e.g. "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - activates the staged cipher contexts.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// KEXDH_INIT / KEX_ECDH_INIT (client ephemeral public).
    KexdhInit = 30,
    /// KEXDH_REPLY / KEX_ECDH_REPLY (host key, server ephemeral, signature).
    KexdhReply = 31,
    /// KEX_DH_GEX_INIT (client ephemeral public, RFC 4419).
    KexDhGexInit = 32,
    /// KEX_DH_GEX_REPLY (RFC 4419).
    KexDhGexReply = 33,
    /// KEX_DH_GEX_REQUEST (min, preferred, max group size; RFC 4419).
    KexDhGexRequest = 34,

    // User authentication generic (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure (carries the continue-list).
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// User authentication banner.
    UserauthBanner = 53,
    /// PK_OK (publickey) / INFO_REQUEST (keyboard-interactive).
    UserauthPkOk = 60,
    /// INFO_RESPONSE (keyboard-interactive).
    UserauthInfoResponse = 61,

    // Connection protocol generic (80-127)
    /// Global request.
    GlobalRequest = 80,
    /// Global request success.
    RequestSuccess = 81,
    /// Global request failure.
    RequestFailure = 82,
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel request success.
    ChannelSuccess = 99,
    /// Channel request failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a byte to a message type.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexdhInit),
            31 => Some(MessageType::KexdhReply),
            32 => Some(MessageType::KexDhGexInit),
            33 => Some(MessageType::KexDhGexReply),
            34 => Some(MessageType::KexDhGexRequest),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            60 => Some(MessageType::UserauthPkOk),
            61 => Some(MessageType::UserauthInfoResponse),
            80 => Some(MessageType::GlobalRequest),
            81 => Some(MessageType::RequestSuccess),
            82 => Some(MessageType::RequestFailure),
            90 => Some(MessageType::ChannelOpen),
            91 => Some(MessageType::ChannelOpenConfirmation),
            92 => Some(MessageType::ChannelOpenFailure),
            93 => Some(MessageType::ChannelWindowAdjust),
            94 => Some(MessageType::ChannelData),
            95 => Some(MessageType::ChannelExtendedData),
            96 => Some(MessageType::ChannelEof),
            97 => Some(MessageType::ChannelClose),
            98 => Some(MessageType::ChannelRequest),
            99 => Some(MessageType::ChannelSuccess),
            100 => Some(MessageType::ChannelFailure),
            _ => None,
        }
    }
}

/// Disconnect reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    /// Host not allowed to connect.
    HostNotAllowedToConnect = 1,
    /// Protocol error (framing, short read, packet too large).
    ProtocolError = 2,
    /// Key exchange failed (no algorithm intersection, bad signature).
    KeyExchangeFailed = 3,
    /// Reserved.
    Reserved = 4,
    /// MAC error.
    MacError = 5,
    /// Compression error.
    CompressionError = 6,
    /// Service not available.
    ServiceNotAvailable = 7,
    /// Protocol version not supported.
    ProtocolVersionNotSupported = 8,
    /// Host key not verifiable.
    HostKeyNotVerifiable = 9,
    /// Connection lost.
    ConnectionLost = 10,
    /// Disconnect by application.
    ByApplication = 11,
    /// Too many connections.
    TooManyConnections = 12,
    /// Authentication cancelled by user.
    AuthCancelledByUser = 13,
    /// No more authentication methods available.
    NoMoreAuthMethodsAvailable = 14,
    /// Illegal user name.
    IllegalUserName = 15,
}

impl DisconnectReason {
    /// Converts from the wire code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::HostNotAllowedToConnect),
            2 => Some(Self::ProtocolError),
            3 => Some(Self::KeyExchangeFailed),
            4 => Some(Self::Reserved),
            5 => Some(Self::MacError),
            6 => Some(Self::CompressionError),
            7 => Some(Self::ServiceNotAvailable),
            8 => Some(Self::ProtocolVersionNotSupported),
            9 => Some(Self::HostKeyNotVerifiable),
            10 => Some(Self::ConnectionLost),
            11 => Some(Self::ByApplication),
            12 => Some(Self::TooManyConnections),
            13 => Some(Self::AuthCancelledByUser),
            14 => Some(Self::NoMoreAuthMethodsAvailable),
            15 => Some(Self::IllegalUserName),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
        assert_eq!(MessageType::from_u8(34), Some(MessageType::KexDhGexRequest));
        assert_eq!(MessageType::from_u8(255), None);
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Disconnect as u8, 1);
        assert_eq!(MessageType::KexInit as u8, 20);
        assert_eq!(MessageType::ChannelData as u8, 94);
        assert_eq!(MessageType::UserauthInfoResponse as u8, 61);
    }

    #[test]
    fn test_disconnect_reason_codes() {
        assert_eq!(DisconnectReason::ProtocolError as u32, 2);
        assert_eq!(DisconnectReason::MacError as u32, 5);
        assert_eq!(DisconnectReason::NoMoreAuthMethodsAvailable as u32, 14);
        assert_eq!(
            DisconnectReason::from_u32(3),
            Some(DisconnectReason::KeyExchangeFailed)
        );
        assert_eq!(DisconnectReason::from_u32(99), None);
    }
}
