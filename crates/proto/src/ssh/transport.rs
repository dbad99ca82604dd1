//! Transport packet engine (RFC 4253 Section 6).
//!
//! [`Transport`] owns the byte stream and the per-direction cipher
//! contexts. Sending frames, MACs and encrypts a payload; receiving
//! decrypts the first block to learn the packet length, bound-checks
//! it, decrypts the remainder and verifies the MAC in constant time.
//!
//! Before the first NEWKEYS, packets travel in plaintext with no MAC.
//! Key exchange stages replacement contexts which become active, per
//! direction, exactly at NEWKEYS; sequence numbers are 32-bit wrapping
//! counters that are never reset, not even at rekey.
//!
//! Rekeying is triggered after [`REKEY_BYTES_LIMIT`] bytes or
//! [`REKEY_TIME_LIMIT`] since the last exchange.

use crate::ssh::algorithm::{CipherAlg, CipherState, MacAlg, MacState};
use crate::ssh::codec;
use crate::ssh::message::{DisconnectReason, MessageType};
use crate::ssh::packet;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use rand::RngCore;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes transferred before a rekey is due (1 GiB, RFC 4253 §9).
pub const REKEY_BYTES_LIMIT: u64 = 1 << 30;

/// Time elapsed before a rekey is due.
pub const REKEY_TIME_LIMIT: Duration = Duration::from_secs(3600);

/// Connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side.
    Client,
    /// Server side.
    Server,
}

/// An active cipher/MAC pairing for one direction.
///
/// `None` ciphers mean the pre-NEWKEYS plaintext state.
pub struct CipherCtx {
    cipher: Option<CipherState>,
    mac: Option<MacState>,
    block_size: usize,
    mac_size: usize,
}

impl CipherCtx {
    /// The plaintext context used before the first NEWKEYS.
    pub fn plaintext() -> Self {
        Self {
            cipher: None,
            mac: None,
            block_size: 8,
            mac_size: 0,
        }
    }

    /// Builds the sending context for a negotiated cipher/MAC pair.
    pub fn sealing(
        cipher_alg: CipherAlg,
        mac_alg: MacAlg,
        iv: &[u8],
        key: &[u8],
        mac_key: &[u8],
    ) -> HawserResult<Self> {
        Ok(Self {
            cipher: Some(cipher_alg.encryptor(key, iv)?),
            mac: Some(mac_alg.state(mac_key)?),
            block_size: cipher_alg.block_size(),
            mac_size: mac_alg.mac_size(),
        })
    }

    /// Builds the receiving context for a negotiated cipher/MAC pair.
    pub fn opening(
        cipher_alg: CipherAlg,
        mac_alg: MacAlg,
        iv: &[u8],
        key: &[u8],
        mac_key: &[u8],
    ) -> HawserResult<Self> {
        Ok(Self {
            cipher: Some(cipher_alg.decryptor(key, iv)?),
            mac: Some(mac_alg.state(mac_key)?),
            block_size: cipher_alg.block_size(),
            mac_size: mac_alg.mac_size(),
        })
    }

    /// Returns true once a cipher is installed.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

impl std::fmt::Debug for CipherCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherCtx")
            .field("encrypted", &self.is_encrypted())
            .field("block_size", &self.block_size)
            .field("mac_size", &self.mac_size)
            .finish()
    }
}

/// Per-direction transport state: the active context plus the
/// counters that outlive it.
struct DirectionState {
    ctx: CipherCtx,
    /// 32-bit wrapping sequence number; never reset.
    sequence_number: u32,
}

impl DirectionState {
    fn new() -> Self {
        Self {
            ctx: CipherCtx::plaintext(),
            sequence_number: 0,
        }
    }
}

/// The SSH transport over an abstract byte stream.
///
/// `S` is any `AsyncRead + AsyncWrite` stream; TCP and in-process
/// duplex pipes are both used in practice.
pub struct Transport<S> {
    stream: S,
    role: Role,
    send: DirectionState,
    recv: DirectionState,
    /// Progress through the packet currently being received. Kept in
    /// the transport so that cancelling `recv_payload` mid-packet
    /// (e.g. from a `select!`) never loses bytes off the stream.
    recv_phase: RecvPhase,
    pending_send: Option<CipherCtx>,
    pending_recv: Option<CipherCtx>,
    session_id: Option<Vec<u8>>,
    local_version: String,
    peer_version: String,
    bytes_since_kex: u64,
    last_kex: Instant,
    rekey_bytes_limit: u64,
    rekey_time_limit: Duration,
}

/// Receive progress for one packet. Buffers are sized up front; the
/// `filled` counters survive cancellation of the receiving future.
enum RecvPhase {
    /// Accumulating the first cipher block (carries the length field).
    FirstBlock { buf: Vec<u8>, filled: usize },
    /// First block decrypted into `packet`; accumulating the rest of
    /// the encrypted packet.
    Body { packet: Vec<u8>, filled: usize },
    /// Packet decrypted; accumulating the MAC.
    Mac { packet: Vec<u8>, mac: Vec<u8>, filled: usize },
}

impl RecvPhase {
    fn start(block_size: usize) -> Self {
        RecvPhase::FirstBlock {
            buf: vec![0u8; block_size.max(8)],
            filled: 0,
        }
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream whose identification lines have already been
    /// exchanged.
    pub fn new(stream: S, role: Role, local_version: String, peer_version: String) -> Self {
        Self {
            stream,
            role,
            send: DirectionState::new(),
            recv: DirectionState::new(),
            recv_phase: RecvPhase::start(8),
            pending_send: None,
            pending_recv: None,
            session_id: None,
            local_version,
            peer_version,
            bytes_since_kex: 0,
            last_kex: Instant::now(),
            rekey_bytes_limit: REKEY_BYTES_LIMIT,
            rekey_time_limit: REKEY_TIME_LIMIT,
        }
    }

    /// Returns the connection role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns our identification line (no CR LF).
    pub fn local_version(&self) -> &str {
        &self.local_version
    }

    /// Returns the peer's identification line (no CR LF).
    pub fn peer_version(&self) -> &str {
        &self.peer_version
    }

    /// Returns the session identifier, once the first exchange set it.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Records the session identifier. Only the first call takes
    /// effect; the session id is the H of the first exchange for the
    /// lifetime of the connection.
    pub fn set_session_id(&mut self, h: &[u8]) {
        if self.session_id.is_none() {
            self.session_id = Some(h.to_vec());
        }
    }

    /// Overrides the rekey byte threshold (tests use small values).
    pub fn set_rekey_bytes_limit(&mut self, limit: u64) {
        self.rekey_bytes_limit = limit;
    }

    /// Returns true when enough traffic or time has passed that a key
    /// exchange should be initiated.
    pub fn should_rekey(&self) -> bool {
        if !self.send.ctx.is_encrypted() {
            return false;
        }
        self.bytes_since_kex >= self.rekey_bytes_limit
            || self.last_kex.elapsed() >= self.rekey_time_limit
    }

    /// Resets the rekey counters after a completed exchange.
    pub fn reset_rekey_counters(&mut self) {
        self.bytes_since_kex = 0;
        self.last_kex = Instant::now();
    }

    /// Stages the contexts derived by a key exchange. Each becomes
    /// active when NEWKEYS is sent (outbound) or received (inbound).
    pub fn stage_contexts(&mut self, sealing: CipherCtx, opening: CipherCtx) {
        self.pending_send = Some(sealing);
        self.pending_recv = Some(opening);
    }

    /// Activates the staged outbound context. Call immediately after
    /// sending NEWKEYS.
    pub fn activate_send(&mut self) -> HawserResult<()> {
        let ctx = self.pending_send.take().ok_or_else(|| {
            HawserError::Protocol("NEWKEYS sent with no staged outbound context".to_string())
        })?;
        self.send.ctx = ctx;
        Ok(())
    }

    /// Activates the staged inbound context. Call immediately after
    /// receiving NEWKEYS; the receiver is at a packet boundary then.
    pub fn activate_recv(&mut self) -> HawserResult<()> {
        let ctx = self.pending_recv.take().ok_or_else(|| {
            HawserError::Protocol("NEWKEYS received with no staged inbound context".to_string())
        })?;
        self.recv.ctx = ctx;
        self.recv_phase = RecvPhase::start(self.recv.ctx.block_size);
        Ok(())
    }

    /// Frames, MACs, encrypts and writes one payload.
    pub async fn send_payload(&mut self, payload: &[u8]) -> HawserResult<()> {
        let seq = self.send.sequence_number;
        let mut packet = packet::frame_payload(payload, self.send.ctx.block_size)?;

        // MAC over sequence_number || unencrypted_packet, appended
        // after encryption.
        let mac = self
            .send
            .ctx
            .mac
            .as_ref()
            .map(|mac| mac.compute(seq, &packet));

        if let Some(cipher) = self.send.ctx.cipher.as_mut() {
            cipher.apply(&mut packet)?;
        }
        if let Some(mac) = mac {
            packet.extend_from_slice(&mac);
        }

        self.stream.write_all(&packet).await.map_err(HawserError::Io)?;
        self.stream.flush().await.map_err(HawserError::Io)?;

        self.send.sequence_number = seq.wrapping_add(1);
        self.bytes_since_kex += packet.len() as u64;
        Ok(())
    }

    /// Reads, decrypts and verifies one packet, returning its payload.
    ///
    /// Cancellation safe: receive progress lives on the transport, so
    /// racing this future in a `select!` never loses stream bytes.
    pub async fn recv_payload(&mut self) -> HawserResult<Vec<u8>> {
        loop {
            match &mut self.recv_phase {
                RecvPhase::FirstBlock { buf, filled } => {
                    read_into(&mut self.stream, buf, filled).await?;

                    let mut first = std::mem::take(buf);
                    if let Some(cipher) = self.recv.ctx.cipher.as_mut() {
                        cipher.apply(&mut first)?;
                    }

                    let mut offset = 0;
                    let packet_length = codec::read_u32(&first, &mut offset)? as usize;
                    packet::check_packet_length(packet_length)?;
                    let align = self.recv.ctx.block_size.max(8);
                    if (packet_length + 4) % align != 0 {
                        return Err(HawserError::Protocol(format!(
                            "Packet length {} not aligned to cipher block size {}",
                            packet_length, align
                        )));
                    }

                    let filled = first.len();
                    let mut packet = first;
                    packet.resize(packet_length + 4, 0);
                    self.recv_phase = RecvPhase::Body { packet, filled };
                }
                RecvPhase::Body { packet, filled } => {
                    read_into(&mut self.stream, packet, filled).await?;

                    let mut packet = std::mem::take(packet);
                    let already_decrypted = self.recv.ctx.block_size.max(8);
                    if let Some(cipher) = self.recv.ctx.cipher.as_mut() {
                        cipher.apply(&mut packet[already_decrypted..])?;
                    }

                    let mac = vec![0u8; self.recv.ctx.mac_size];
                    self.recv_phase = RecvPhase::Mac {
                        packet,
                        mac,
                        filled: 0,
                    };
                }
                RecvPhase::Mac {
                    packet,
                    mac,
                    filled,
                } => {
                    read_into(&mut self.stream, mac, filled).await?;

                    let packet = std::mem::take(packet);
                    let mac = std::mem::take(mac);
                    let seq = self.recv.sequence_number;
                    if let Some(state) = self.recv.ctx.mac.as_ref() {
                        state.verify(seq, &packet, &mac)?;
                    }

                    let payload = packet::unframe_body(&packet[4..])?;
                    self.recv.sequence_number = seq.wrapping_add(1);
                    self.bytes_since_kex += (packet.len() + mac.len()) as u64;
                    self.recv_phase = RecvPhase::start(self.recv.ctx.block_size);
                    return Ok(payload);
                }
            }
        }
    }

    /// Sends SSH_MSG_DISCONNECT. Errors are ignored; the stream is
    /// usually half-dead when this is called.
    pub async fn send_disconnect(&mut self, reason: DisconnectReason, description: &str) {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Disconnect as u8);
        buf.put_u32(reason as u32);
        codec::write_string(&mut buf, description);
        codec::write_string(&mut buf, ""); // language tag
        let _ = self.send_payload(&buf).await;
        let _ = self.stream.shutdown().await;
    }

    /// Consumes the transport, returning the stream.
    pub fn into_stream(self) -> S {
        self.stream
    }
}

/// Fills `buf[*filled..]`, tracking progress through `filled` so a
/// cancelled caller resumes where it left off.
async fn read_into<S>(stream: &mut S, buf: &mut Vec<u8>, filled: &mut usize) -> HawserResult<()>
where
    S: AsyncRead + Unpin,
{
    while *filled < buf.len() {
        let n = stream
            .read(&mut buf[*filled..])
            .await
            .map_err(HawserError::Io)?;
        if n == 0 {
            return Err(HawserError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid-packet",
            )));
        }
        *filled += n;
    }
    Ok(())
}

/// Builds an SSH_MSG_IGNORE payload carrying `len` random bytes,
/// usable as a keepalive.
pub fn keepalive_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);

    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::Ignore as u8);
    codec::write_bytes(&mut buf, &data);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::kexdh::{derive_keys, KexHash};

    fn test_pair() -> (Transport<tokio::io::DuplexStream>, Transport<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = Transport::new(
            a,
            Role::Client,
            "SSH-2.0-Hawser_test".to_string(),
            "SSH-2.0-Hawser_test".to_string(),
        );
        let server = Transport::new(
            b,
            Role::Server,
            "SSH-2.0-Hawser_test".to_string(),
            "SSH-2.0-Hawser_test".to_string(),
        );
        (client, server)
    }

    fn staged_ctx_pair(
        cipher: CipherAlg,
        mac: MacAlg,
    ) -> ((CipherCtx, CipherCtx), (CipherCtx, CipherCtx)) {
        let k = vec![0x42u8; 32];
        let h = vec![0x17u8; 32];
        let iv_c2s = derive_keys(KexHash::Sha256, &k, &h, &h, b'A', cipher.iv_size());
        let iv_s2c = derive_keys(KexHash::Sha256, &k, &h, &h, b'B', cipher.iv_size());
        let key_c2s = derive_keys(KexHash::Sha256, &k, &h, &h, b'C', cipher.key_size());
        let key_s2c = derive_keys(KexHash::Sha256, &k, &h, &h, b'D', cipher.key_size());
        let mac_c2s = derive_keys(KexHash::Sha256, &k, &h, &h, b'E', mac.key_size());
        let mac_s2c = derive_keys(KexHash::Sha256, &k, &h, &h, b'F', mac.key_size());

        let client = (
            CipherCtx::sealing(cipher, mac, &iv_c2s, &key_c2s, &mac_c2s).unwrap(),
            CipherCtx::opening(cipher, mac, &iv_s2c, &key_s2c, &mac_s2c).unwrap(),
        );
        let server = (
            CipherCtx::sealing(cipher, mac, &iv_s2c, &key_s2c, &mac_s2c).unwrap(),
            CipherCtx::opening(cipher, mac, &iv_c2s, &key_c2s, &mac_c2s).unwrap(),
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_plaintext_round_trip() {
        let (mut client, mut server) = test_pair();

        client.send_payload(b"hello transport").await.unwrap();
        let payload = server.recv_payload().await.unwrap();
        assert_eq!(payload, b"hello transport");
    }

    #[tokio::test]
    async fn test_encrypted_round_trip_all_suites() {
        for cipher in CipherAlg::ALL {
            for mac in MacAlg::ALL {
                let (mut client, mut server) = test_pair();
                let ((c_seal, c_open), (s_seal, s_open)) = staged_ctx_pair(cipher, mac);

                client.stage_contexts(c_seal, c_open);
                server.stage_contexts(s_seal, s_open);
                client.activate_send().unwrap();
                client.activate_recv().unwrap();
                server.activate_send().unwrap();
                server.activate_recv().unwrap();

                client.send_payload(b"c2s data").await.unwrap();
                assert_eq!(server.recv_payload().await.unwrap(), b"c2s data");

                server.send_payload(b"s2c data").await.unwrap();
                assert_eq!(client.recv_payload().await.unwrap(), b"s2c data");
            }
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_increment_per_direction() {
        let (mut client, mut server) = test_pair();

        for _ in 0..3 {
            client.send_payload(b"x").await.unwrap();
        }
        assert_eq!(client.send.sequence_number, 3);
        assert_eq!(client.recv.sequence_number, 0);

        for _ in 0..3 {
            server.recv_payload().await.unwrap();
        }
        assert_eq!(server.recv.sequence_number, 3);
        assert_eq!(server.send.sequence_number, 0);
    }

    #[tokio::test]
    async fn test_mac_tamper_detected() {
        let (mut client, server) = test_pair();
        let ((c_seal, c_open), (s_seal, s_open)) = staged_ctx_pair(
            CipherAlg::Aes128Ctr,
            MacAlg::HmacSha2_256,
        );
        client.stage_contexts(c_seal, c_open);
        client.activate_send().unwrap();
        client.activate_recv().unwrap();

        // Capture the raw bytes, flip one, and feed them to a fresh
        // server transport.
        client.send_payload(b"important").await.unwrap();
        let mut raw_stream = server.into_stream();
        let mut raw = vec![0u8; 16 + 16 + 32];
        raw_stream.read_exact(&mut raw).await.unwrap();
        raw[20] ^= 0x01;

        let (a, b) = tokio::io::duplex(1 << 16);
        let mut tampered_server = Transport::new(
            b,
            Role::Server,
            "SSH-2.0-t".to_string(),
            "SSH-2.0-t".to_string(),
        );
        tampered_server.stage_contexts(s_seal, s_open);
        tampered_server.activate_send().unwrap();
        tampered_server.activate_recv().unwrap();

        let mut writer = a;
        writer.write_all(&raw).await.unwrap();

        let err = tampered_server.recv_payload().await.unwrap_err();
        assert!(matches!(err, HawserError::Security(_)));
    }

    #[tokio::test]
    async fn test_oversized_packet_rejected() {
        let (client, mut server) = test_pair();
        let mut raw = client.into_stream();

        let mut bogus = BytesMut::new();
        bogus.put_u32(80_000); // over the 35000 limit
        bogus.put_slice(&[0u8; 12]);
        raw.write_all(&bogus).await.unwrap();

        let err = server.recv_payload().await.unwrap_err();
        assert!(matches!(err, HawserError::Protocol(_)));
    }

    #[test]
    fn test_session_id_set_once() {
        let (client, _server) = {
            let (a, b) = tokio::io::duplex(64);
            (
                Transport::new(a, Role::Client, String::new(), String::new()),
                Transport::new(b, Role::Server, String::new(), String::new()),
            )
        };
        let mut client = client;
        client.set_session_id(b"first");
        client.set_session_id(b"second");
        assert_eq!(client.session_id(), Some(&b"first"[..]));
    }

    #[test]
    fn test_keepalive_payload_shape() {
        let payload = keepalive_payload(32);
        assert_eq!(payload[0], MessageType::Ignore as u8);
        assert_eq!(payload.len(), 1 + 4 + 32);
    }

    #[tokio::test]
    async fn test_rekey_trigger_on_bytes() {
        let (mut client, _server) = test_pair();
        let ((c_seal, c_open), _) = staged_ctx_pair(CipherAlg::Aes128Ctr, MacAlg::HmacSha1);
        client.stage_contexts(c_seal, c_open);
        client.activate_send().unwrap();
        client.activate_recv().unwrap();

        client.set_rekey_bytes_limit(64);
        assert!(!client.should_rekey());
        client.send_payload(&[0u8; 128]).await.unwrap();
        assert!(client.should_rekey());

        client.reset_rekey_counters();
        assert!(!client.should_rekey());
    }
}
