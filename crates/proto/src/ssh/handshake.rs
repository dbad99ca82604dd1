//! Key exchange drivers (RFC 4253 Section 7-9).
//!
//! [`client_handshake`] and [`server_handshake`] run one complete key
//! exchange over a [`Transport`]: KEXINIT negotiation, the negotiated
//! method's messages, host key signature production/verification, key
//! derivation, and the NEWKEYS switch-over. They serve both the
//! initial exchange and mid-session rekeys; for a rekey the caller
//! passes the peer's already-received KEXINIT payload, and any
//! channel traffic that was in flight when the exchange began is
//! returned for later dispatch.
//!
//! Only transport-class messages are processed while an exchange is
//! running; everything else is deferred, never dropped.

use crate::ssh::algorithm::{
    negotiate_name, CipherAlg, HostKeyAlg, KexAlg, MacAlg, NegotiatedSuite, SupportedAlgorithms,
};
use crate::ssh::hostkey;
use crate::ssh::identity::Identity;
use crate::ssh::kex::{
    GexGroup, GexInit, GexReply, GexRequest, KexDhInit, KexDhReply, KexEcdhInit, KexEcdhReply,
    KexInit, NewKeys,
};
use crate::ssh::kexdh::{
    derive_keys, Curve25519Exchange, DhExchange, EcdhExchange, ExchangeHash, GexParams, KexHash,
    PublicEncoding, GEX_MAX_BITS, GEX_MIN_BITS,
};
use crate::ssh::message::MessageType;
use crate::ssh::transport::{CipherCtx, Role, Transport};
use hawser_platform::{HawserError, HawserResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Preferred group size requested during group exchange, in bits.
const GEX_PREFERRED_BITS: u32 = 2048;

/// The result of a completed key exchange.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// The negotiated algorithm suite.
    pub suite: NegotiatedSuite,
    /// The session identifier (H of the connection's first exchange).
    pub session_id: Vec<u8>,
    /// The server host key blob seen in this exchange.
    pub host_key_blob: Vec<u8>,
    /// Non-transport payloads that arrived mid-exchange, in order.
    pub deferred: Vec<Vec<u8>>,
}

/// Runs one key exchange as the client.
///
/// `peer_kexinit` carries the server's KEXINIT payload when the server
/// initiated this exchange (rekey); `None` makes this side wait for it.
pub async fn client_handshake<S>(
    transport: &mut Transport<S>,
    algorithms: &SupportedAlgorithms,
    peer_kexinit: Option<Vec<u8>>,
) -> HawserResult<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let our_kexinit = KexInit::new(algorithms);
    let our_payload = our_kexinit.to_bytes();
    transport.send_payload(&our_payload).await?;

    let mut deferred = Vec::new();
    let server_payload = match peer_kexinit {
        Some(payload) => payload,
        None => recv_kex_payload(transport, &mut deferred).await?,
    };
    let server_kexinit = KexInit::from_bytes(&server_payload)?;

    let suite = negotiate_suite(&our_kexinit, &server_kexinit)?;
    debug!(kex = suite.kex.name(), host_key = suite.host_key.name(), "negotiated suite");

    let hash = KexHash::for_kex(suite.kex);
    let mut transcript = ExchangeHash {
        client_version: transport.local_version().to_string(),
        server_version: transport.peer_version().to_string(),
        client_kexinit: our_payload,
        server_kexinit: server_payload,
        host_key_blob: Vec::new(),
        gex: None,
        public_encoding: PublicEncoding::for_kex(suite.kex),
        client_public: Vec::new(),
        server_public: Vec::new(),
        shared_secret: Vec::new(),
    };

    let signature = match suite.kex {
        KexAlg::Curve25519Sha256 => {
            let exchange = Curve25519Exchange::new()?;
            transcript.client_public = exchange.public_key().to_vec();
            transport
                .send_payload(
                    &KexEcdhInit {
                        public: transcript.client_public.clone(),
                    }
                    .to_bytes(),
                )
                .await?;

            let reply =
                KexEcdhReply::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            transcript.host_key_blob = reply.host_key_blob;
            transcript.server_public = reply.public.clone();
            transcript.shared_secret = exchange.compute_shared_secret(&reply.public)?;
            reply.signature
        }
        KexAlg::EcdhNistp256 | KexAlg::EcdhNistp384 | KexAlg::EcdhNistp521 => {
            let exchange = EcdhExchange::new(suite.kex)?;
            transcript.client_public = exchange.public_key();
            transport
                .send_payload(
                    &KexEcdhInit {
                        public: transcript.client_public.clone(),
                    }
                    .to_bytes(),
                )
                .await?;

            let reply =
                KexEcdhReply::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            transcript.host_key_blob = reply.host_key_blob;
            transcript.server_public = reply.public.clone();
            transcript.shared_secret = exchange.compute_shared_secret(&reply.public)?;
            reply.signature
        }
        KexAlg::DhGroup14Sha1 | KexAlg::DhGroup1Sha1 => {
            let exchange = DhExchange::for_kex(suite.kex)?;
            transcript.client_public = exchange.public_key().to_vec();
            transport
                .send_payload(
                    &KexDhInit {
                        e: transcript.client_public.clone(),
                    }
                    .to_bytes(),
                )
                .await?;

            let reply =
                KexDhReply::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            transcript.host_key_blob = reply.host_key_blob;
            transcript.server_public = reply.f.clone();
            transcript.shared_secret = exchange.compute_shared_secret(&reply.f)?;
            reply.signature
        }
        KexAlg::DhGexSha256 | KexAlg::DhGexSha1 => {
            let request = GexRequest {
                min: GEX_MIN_BITS,
                preferred: GEX_PREFERRED_BITS,
                max: GEX_MAX_BITS,
            };
            transport.send_payload(&request.to_bytes()).await?;

            let group = GexGroup::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            let exchange = DhExchange::from_group_bytes(&group.prime, &group.generator)?;
            transcript.gex = Some(GexParams {
                min: request.min,
                preferred: request.preferred,
                max: request.max,
                prime: group.prime,
                generator: group.generator,
            });
            transcript.client_public = exchange.public_key().to_vec();
            transport
                .send_payload(
                    &GexInit {
                        e: transcript.client_public.clone(),
                    }
                    .to_bytes(),
                )
                .await?;

            let reply = GexReply::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            transcript.host_key_blob = reply.host_key_blob;
            transcript.server_public = reply.f.clone();
            transcript.shared_secret = exchange.compute_shared_secret(&reply.f)?;
            reply.signature
        }
    };

    let exchange_hash = transcript.compute(hash);

    if !hostkey::verify_signature(&transcript.host_key_blob, &exchange_hash, &signature)? {
        return Err(HawserError::Security(
            "Host key signature verification failed".to_string(),
        ));
    }

    transport.set_session_id(&exchange_hash);
    let session_id = transport.session_id().expect("just set").to_vec();

    let (sealing, opening) = derive_contexts(
        Role::Client,
        &suite,
        hash,
        &transcript.shared_secret,
        &exchange_hash,
        &session_id,
    )?;
    transport.stage_contexts(sealing, opening);

    transport.send_payload(&NewKeys.to_bytes()).await?;
    transport.activate_send()?;

    let newkeys = recv_kex_payload(transport, &mut deferred).await?;
    NewKeys::from_bytes(&newkeys)?;
    transport.activate_recv()?;
    transport.reset_rekey_counters();

    Ok(HandshakeOutcome {
        suite,
        session_id,
        host_key_blob: transcript.host_key_blob,
        deferred,
    })
}

/// Runs one key exchange as the server.
pub async fn server_handshake<S>(
    transport: &mut Transport<S>,
    algorithms: &SupportedAlgorithms,
    host_keys: &[Arc<Identity>],
    peer_kexinit: Option<Vec<u8>>,
) -> HawserResult<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let our_kexinit = KexInit::new(algorithms);
    let our_payload = our_kexinit.to_bytes();
    transport.send_payload(&our_payload).await?;

    let mut deferred = Vec::new();
    let client_payload = match peer_kexinit {
        Some(payload) => payload,
        None => recv_kex_payload(transport, &mut deferred).await?,
    };
    let client_kexinit = KexInit::from_bytes(&client_payload)?;

    let suite = negotiate_suite(&client_kexinit, &our_kexinit)?;
    debug!(kex = suite.kex.name(), host_key = suite.host_key.name(), "negotiated suite");

    let host_key = host_keys
        .iter()
        .find(|key| key.algorithm() == suite.host_key)
        .ok_or_else(|| {
            HawserError::Config(format!(
                "No host key available for negotiated algorithm {}",
                suite.host_key.name()
            ))
        })?;
    let host_key_blob = host_key.public_key_blob();

    let hash = KexHash::for_kex(suite.kex);
    let mut transcript = ExchangeHash {
        client_version: transport.peer_version().to_string(),
        server_version: transport.local_version().to_string(),
        client_kexinit: client_payload,
        server_kexinit: our_payload,
        host_key_blob: host_key_blob.clone(),
        gex: None,
        public_encoding: PublicEncoding::for_kex(suite.kex),
        client_public: Vec::new(),
        server_public: Vec::new(),
        shared_secret: Vec::new(),
    };

    match suite.kex {
        KexAlg::Curve25519Sha256 => {
            let init =
                KexEcdhInit::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            let exchange = Curve25519Exchange::new()?;
            transcript.client_public = init.public.clone();
            transcript.server_public = exchange.public_key().to_vec();
            transcript.shared_secret = exchange.compute_shared_secret(&init.public)?;

            let exchange_hash = transcript.compute(hash);
            let signature = host_key.sign(&exchange_hash)?;
            transport
                .send_payload(
                    &KexEcdhReply {
                        host_key_blob: host_key_blob.clone(),
                        public: transcript.server_public.clone(),
                        signature,
                    }
                    .to_bytes(),
                )
                .await?;
        }
        KexAlg::EcdhNistp256 | KexAlg::EcdhNistp384 | KexAlg::EcdhNistp521 => {
            let init =
                KexEcdhInit::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            let exchange = EcdhExchange::new(suite.kex)?;
            transcript.client_public = init.public.clone();
            transcript.server_public = exchange.public_key();
            transcript.shared_secret = exchange.compute_shared_secret(&init.public)?;

            let exchange_hash = transcript.compute(hash);
            let signature = host_key.sign(&exchange_hash)?;
            transport
                .send_payload(
                    &KexEcdhReply {
                        host_key_blob: host_key_blob.clone(),
                        public: transcript.server_public.clone(),
                        signature,
                    }
                    .to_bytes(),
                )
                .await?;
        }
        KexAlg::DhGroup14Sha1 | KexAlg::DhGroup1Sha1 => {
            let init = KexDhInit::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            let exchange = DhExchange::for_kex(suite.kex)?;
            transcript.client_public = init.e.clone();
            transcript.server_public = exchange.public_key().to_vec();
            transcript.shared_secret = exchange.compute_shared_secret(&init.e)?;

            let exchange_hash = transcript.compute(hash);
            let signature = host_key.sign(&exchange_hash)?;
            transport
                .send_payload(
                    &KexDhReply {
                        host_key_blob: host_key_blob.clone(),
                        f: transcript.server_public.clone(),
                        signature,
                    }
                    .to_bytes(),
                )
                .await?;
        }
        KexAlg::DhGexSha256 | KexAlg::DhGexSha1 => {
            let request =
                GexRequest::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            let exchange = DhExchange::for_gex_request(request.min, request.preferred, request.max)?;
            transport
                .send_payload(
                    &GexGroup {
                        prime: exchange.prime_bytes(),
                        generator: exchange.generator_bytes(),
                    }
                    .to_bytes(),
                )
                .await?;

            let init = GexInit::from_bytes(&recv_kex_payload(transport, &mut deferred).await?)?;
            transcript.gex = Some(GexParams {
                min: request.min,
                preferred: request.preferred,
                max: request.max,
                prime: exchange.prime_bytes(),
                generator: exchange.generator_bytes(),
            });
            transcript.client_public = init.e.clone();
            transcript.server_public = exchange.public_key().to_vec();
            transcript.shared_secret = exchange.compute_shared_secret(&init.e)?;

            let exchange_hash = transcript.compute(hash);
            let signature = host_key.sign(&exchange_hash)?;
            transport
                .send_payload(
                    &GexReply {
                        host_key_blob: host_key_blob.clone(),
                        f: transcript.server_public.clone(),
                        signature,
                    }
                    .to_bytes(),
                )
                .await?;
        }
    }

    let exchange_hash = transcript.compute(hash);
    transport.set_session_id(&exchange_hash);
    let session_id = transport.session_id().expect("just set").to_vec();

    let (sealing, opening) = derive_contexts(
        Role::Server,
        &suite,
        hash,
        &transcript.shared_secret,
        &exchange_hash,
        &session_id,
    )?;
    transport.stage_contexts(sealing, opening);

    transport.send_payload(&NewKeys.to_bytes()).await?;
    transport.activate_send()?;

    let newkeys = recv_kex_payload(transport, &mut deferred).await?;
    NewKeys::from_bytes(&newkeys)?;
    transport.activate_recv()?;
    transport.reset_rekey_counters();

    Ok(HandshakeOutcome {
        suite,
        session_id,
        host_key_blob,
        deferred,
    })
}

/// Negotiates the full suite from the two KEXINITs. `client` must be
/// the actual client's offer regardless of our role; the first
/// client-preferred name in each class wins.
fn negotiate_suite(client: &KexInit, server: &KexInit) -> HawserResult<NegotiatedSuite> {
    let kex_name = negotiate_name(client.kex_algorithms(), server.kex_algorithms())?;
    let host_key_name = negotiate_name(
        client.server_host_key_algorithms(),
        server.server_host_key_algorithms(),
    )?;
    let cipher_c2s_name = negotiate_name(
        client.encryption_client_to_server(),
        server.encryption_client_to_server(),
    )?;
    let cipher_s2c_name = negotiate_name(
        client.encryption_server_to_client(),
        server.encryption_server_to_client(),
    )?;
    let mac_c2s_name = negotiate_name(
        client.mac_client_to_server(),
        server.mac_client_to_server(),
    )?;
    let mac_s2c_name = negotiate_name(
        client.mac_server_to_client(),
        server.mac_server_to_client(),
    )?;

    Ok(NegotiatedSuite {
        kex: parse_alg(KexAlg::from_name(&kex_name), &kex_name)?,
        host_key: parse_alg(HostKeyAlg::from_name(&host_key_name), &host_key_name)?,
        cipher_c2s: parse_alg(CipherAlg::from_name(&cipher_c2s_name), &cipher_c2s_name)?,
        cipher_s2c: parse_alg(CipherAlg::from_name(&cipher_s2c_name), &cipher_s2c_name)?,
        mac_c2s: parse_alg(MacAlg::from_name(&mac_c2s_name), &mac_c2s_name)?,
        mac_s2c: parse_alg(MacAlg::from_name(&mac_s2c_name), &mac_s2c_name)?,
    })
}

fn parse_alg<T>(alg: Option<T>, name: &str) -> HawserResult<T> {
    alg.ok_or_else(|| {
        HawserError::Protocol(format!("Negotiated unknown algorithm '{}'", name))
    })
}

/// Derives the six key blocks and builds this side's contexts.
fn derive_contexts(
    role: Role,
    suite: &NegotiatedSuite,
    hash: KexHash,
    shared_secret: &[u8],
    exchange_hash: &[u8],
    session_id: &[u8],
) -> HawserResult<(CipherCtx, CipherCtx)> {
    let derive = |letter: u8, length: usize| {
        derive_keys(hash, shared_secret, exchange_hash, session_id, letter, length)
    };

    let iv_c2s = derive(b'A', suite.cipher_c2s.iv_size());
    let iv_s2c = derive(b'B', suite.cipher_s2c.iv_size());
    let key_c2s = derive(b'C', suite.cipher_c2s.key_size());
    let key_s2c = derive(b'D', suite.cipher_s2c.key_size());
    let mac_c2s = derive(b'E', suite.mac_c2s.key_size());
    let mac_s2c = derive(b'F', suite.mac_s2c.key_size());

    match role {
        Role::Client => Ok((
            CipherCtx::sealing(suite.cipher_c2s, suite.mac_c2s, &iv_c2s, &key_c2s, &mac_c2s)?,
            CipherCtx::opening(suite.cipher_s2c, suite.mac_s2c, &iv_s2c, &key_s2c, &mac_s2c)?,
        )),
        Role::Server => Ok((
            CipherCtx::sealing(suite.cipher_s2c, suite.mac_s2c, &iv_s2c, &key_s2c, &mac_s2c)?,
            CipherCtx::opening(suite.cipher_c2s, suite.mac_c2s, &iv_c2s, &key_c2s, &mac_c2s)?,
        )),
    }
}

/// Receives the next transport/kex-class payload, deferring channel
/// and userauth traffic that was in flight when the exchange started.
async fn recv_kex_payload<S>(
    transport: &mut Transport<S>,
    deferred: &mut Vec<Vec<u8>>,
) -> HawserResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let payload = transport.recv_payload().await?;
        let Some(&number) = payload.first() else {
            continue;
        };

        match number {
            n if n == MessageType::Disconnect as u8 => {
                return Err(HawserError::Protocol(
                    "Peer disconnected during key exchange".to_string(),
                ));
            }
            n if n == MessageType::Ignore as u8 || n == MessageType::Debug as u8 => continue,
            // KEXINIT through method-specific numbers and NEWKEYS
            20..=49 => return Ok(payload),
            // Anything else was in flight before the exchange; keep it.
            _ => deferred.push(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::transport::Transport;

    fn transports() -> (
        Transport<tokio::io::DuplexStream>,
        Transport<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(1 << 20);
        (
            Transport::new(
                a,
                Role::Client,
                "SSH-2.0-Hawser_test".to_string(),
                "SSH-2.0-Hawser_test".to_string(),
            ),
            Transport::new(
                b,
                Role::Server,
                "SSH-2.0-Hawser_test".to_string(),
                "SSH-2.0-Hawser_test".to_string(),
            ),
        )
    }

    async fn run_handshake(algorithms: SupportedAlgorithms, host_key: HostKeyAlg) {
        let (mut client_transport, mut server_transport) = transports();
        let identity = Arc::new(Identity::generate(host_key).unwrap());

        let client_algorithms = algorithms.clone();
        let client = tokio::spawn(async move {
            let outcome = client_handshake(&mut client_transport, &client_algorithms, None)
                .await
                .unwrap();
            (outcome, client_transport)
        });

        let server_outcome = server_handshake(
            &mut server_transport,
            &algorithms,
            std::slice::from_ref(&identity),
            None,
        )
        .await
        .unwrap();

        let (client_outcome, mut client_transport) = client.await.unwrap();

        assert_eq!(client_outcome.session_id, server_outcome.session_id);
        assert_eq!(client_outcome.suite, server_outcome.suite);
        assert_eq!(client_outcome.host_key_blob, identity.public_key_blob());

        // The new contexts must carry traffic both ways.
        client_transport.send_payload(b"after newkeys").await.unwrap();
        assert_eq!(
            server_transport.recv_payload().await.unwrap(),
            b"after newkeys"
        );
        server_transport.send_payload(b"reply").await.unwrap();
        assert_eq!(client_transport.recv_payload().await.unwrap(), b"reply");
    }

    #[tokio::test]
    async fn test_handshake_curve25519() {
        run_handshake(
            SupportedAlgorithms::default().with_kex(&[KexAlg::Curve25519Sha256]),
            HostKeyAlg::SshEd25519,
        )
        .await;
    }

    #[tokio::test]
    async fn test_handshake_ecdh_p256() {
        run_handshake(
            SupportedAlgorithms::default()
                .with_kex(&[KexAlg::EcdhNistp256])
                .with_host_keys(&[HostKeyAlg::EcdsaP256]),
            HostKeyAlg::EcdsaP256,
        )
        .await;
    }

    #[tokio::test]
    async fn test_handshake_group14() {
        run_handshake(
            SupportedAlgorithms::default().with_kex(&[KexAlg::DhGroup14Sha1]),
            HostKeyAlg::SshEd25519,
        )
        .await;
    }

    #[tokio::test]
    async fn test_handshake_gex_sha256() {
        run_handshake(
            SupportedAlgorithms::default().with_kex(&[KexAlg::DhGexSha256]),
            HostKeyAlg::SshEd25519,
        )
        .await;
    }

    #[tokio::test]
    async fn test_handshake_no_common_kex_fails() {
        let (mut client_transport, mut server_transport) = transports();
        let identity = Arc::new(Identity::generate(HostKeyAlg::SshEd25519).unwrap());

        let client = tokio::spawn(async move {
            let algorithms =
                SupportedAlgorithms::default().with_kex(&[KexAlg::Curve25519Sha256]);
            client_handshake(&mut client_transport, &algorithms, None).await
        });

        let algorithms = SupportedAlgorithms::default().with_kex(&[KexAlg::DhGroup1Sha1]);
        let server_result = server_handshake(
            &mut server_transport,
            &algorithms,
            std::slice::from_ref(&identity),
            None,
        )
        .await;

        assert!(server_result.is_err());
        assert!(client.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_handshake_missing_host_key_fails() {
        let (mut client_transport, mut server_transport) = transports();
        // Server holds only an Ed25519 key but the offer is ECDSA-only.
        let identity = Arc::new(Identity::generate(HostKeyAlg::SshEd25519).unwrap());
        let algorithms =
            SupportedAlgorithms::default().with_host_keys(&[HostKeyAlg::EcdsaP256]);

        let client_algorithms = algorithms.clone();
        let client = tokio::spawn(async move {
            client_handshake(&mut client_transport, &client_algorithms, None).await
        });

        let server_result = server_handshake(
            &mut server_transport,
            &algorithms,
            std::slice::from_ref(&identity),
            None,
        )
        .await;
        assert!(server_result.is_err());

        // Closing the server's stream unblocks the client.
        drop(server_transport);
        assert!(client.await.unwrap().is_err());
    }
}
