//! Protocol core of the Hawser tunnel carrier.
//!
//! This crate implements the SSH protocol per RFC 4251-4254 and its
//! companion RFCs:
//!
//! - **SSH transport** - version exchange, key exchange, binary packets,
//!   encryption/MAC, rekeying (RFC 4253, RFC 4419, RFC 5656)
//! - **SSH authentication** - publickey, password, keyboard-interactive
//!   (RFC 4252)
//! - **SSH connection** - channels, flow control, port forwarding,
//!   agent forwarding (RFC 4254)
//!
//! The connection layer doubles as an application-level tunnel carrier:
//! a `direct-tcpip` channel is exposed as an ordinary async byte stream
//! (`ssh::tunnel::TunnelStream`) so higher-level protocols can run over
//! it without knowing about SSH framing.
//!
//! # Example
//!
//! ```rust,no_run
//! use hawser_proto::ssh::client::SshClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SshClient::connect("127.0.0.1:22").await?;
//! client.authenticate_password("user", "password").await?;
//! let connection = client.into_connection();
//! let (output, _exit) = connection.execute("uname -a").await?;
//! println!("{}", String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol
//! - [RFC 4419](https://datatracker.ietf.org/doc/html/rfc4419) - DH Group Exchange
//! - [RFC 5656](https://datatracker.ietf.org/doc/html/rfc5656) - ECC Algorithm Integration

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ssh;
