//! SSH (Secure Shell) protocol implementation, RFC 4251-4254.
//!
//! # Architecture
//!
//! The implementation is layered, leaves first:
//!
//! 1. **Wire codec** ([`codec`]) - length-prefixed primitives
//! 2. **Packet layer** ([`packet`], [`transport`]) - framing,
//!    encryption, MAC, sequence numbers, rekey triggers (RFC 4253 §6)
//! 3. **Key exchange** ([`algorithm`], [`kex`], [`kexdh`],
//!    [`handshake`]) - negotiation, DH/ECDH/curve25519, key derivation
//! 4. **Authentication** ([`auth`], [`identity`], [`hostkey`],
//!    [`authorized_keys`], [`known_hosts`]) - userauth and both sides
//!    of key trust (RFC 4252)
//! 5. **Connection** ([`connection`], [`channel`], [`mux`],
//!    [`tunnel`], [`agent`]) - channel multiplexing, flow control,
//!    port forwarding, agent forwarding (RFC 4254)
//! 6. **Front-ends** ([`client`], [`server`])
//!
//! # Security Considerations
//!
//! - Packet sizes are capped at 35000 bytes on receive
//! - MAC verification is constant time and a mismatch is fatal
//! - Host key and userauth signatures bind the session identifier
//! - Key material is zeroized where the carrier types allow it

pub mod agent;
pub mod algorithm;
pub mod auth;
pub mod authorized_keys;
pub mod channel;
pub mod client;
pub mod codec;
pub mod connection;
pub mod handshake;
pub mod hostkey;
pub mod identity;
pub mod kex;
pub mod kexdh;
pub mod known_hosts;
pub mod message;
pub mod mux;
pub mod packet;
pub mod server;
pub mod transport;
pub mod tunnel;
pub mod version;

pub use agent::AgentKeyring;
pub use algorithm::{
    CipherAlg, HostKeyAlg, KexAlg, MacAlg, NegotiatedSuite, SupportedAlgorithms,
};
pub use authorized_keys::AuthorizedKeys;
pub use client::{ForwardedConnection, SshClient, SshClientConfig, SshConnection};
pub use identity::{Identity, PasswordCallback};
pub use known_hosts::{HostKeyStatus, KnownHostsFile, StrictHostKeyChecking};
pub use message::{DisconnectReason, MessageType};
pub use server::{ExecOutcome, SessionHandler, SshServer, SshServerConfig, SshSession};
pub use transport::{Role, Transport};
pub use tunnel::TunnelStream;
pub use version::Version;
