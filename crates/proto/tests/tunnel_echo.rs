//! Tunnel adapter tests: the same application protocol is spoken over
//! a direct socket and over a direct-tcpip channel, and must behave
//! identically in both.

use base64::Engine;
use hawser_proto::ssh::algorithm::HostKeyAlg;
use hawser_proto::ssh::client::{SshClient, SshClientConfig};
use hawser_proto::ssh::identity::Identity;
use hawser_proto::ssh::known_hosts::StrictHostKeyChecking;
use hawser_proto::ssh::server::{ExecOutcome, SessionHandler, SshServer, SshServerConfig};
use hawser_platform::HawserResult;
use rand::RngCore;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

struct NoSessions;

#[async_trait::async_trait]
impl SessionHandler for NoSessions {
    async fn exec(&self, _command: &str) -> HawserResult<ExecOutcome> {
        Ok(ExecOutcome {
            output: Vec::new(),
            exit_status: 127,
        })
    }
}

/// Starts a plain TCP echo server.
async fn start_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

/// Starts an SSH server that will dial direct-tcpip targets.
async fn start_ssh_server() -> std::net::SocketAddr {
    let host_key = Arc::new(Identity::generate(HostKeyAlg::SshEd25519).unwrap());
    let mut server = SshServer::bind_with_config(
        "127.0.0.1:0",
        SshServerConfig::default(),
        vec![host_key],
    )
    .await
    .unwrap();
    server.set_password_callback(Arc::new(|user, pass| user == "tunnel" && pass == "secret"));
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok(mut session) = server.accept().await else {
                break;
            };
            tokio::spawn(async move {
                session.authenticate().await?;
                session.serve(Arc::new(NoSessions)).await
            });
        }
    });
    addr
}

fn random_challenge() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Sends the challenge and expects it echoed, over any byte stream.
async fn echo_round_trip<S>(stream: &mut S, challenge: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(challenge.as_bytes()).await.unwrap();

    let mut received = vec![0u8; challenge.len()];
    timeout(Duration::from_secs(10), stream.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, challenge.as_bytes());
}

/// The echo exchange passes over a direct socket and over the tunnel
/// adapter alike.
#[tokio::test(flavor = "multi_thread")]
async fn test_tunneled_echo_matches_direct() {
    let echo_port = start_echo_server().await;
    let challenge = random_challenge();

    // Direct socket first.
    let mut direct = TcpStream::connect(("127.0.0.1", echo_port)).await.unwrap();
    echo_round_trip(&mut direct, &challenge).await;

    // Now the same bytes through an SSH direct-tcpip channel.
    let ssh_addr = start_ssh_server().await;
    let mut config = SshClientConfig::default();
    config.strict_host_key_checking = StrictHostKeyChecking::No;

    let mut client = SshClient::connect_with_config(&ssh_addr.to_string(), config)
        .await
        .unwrap();
    client.authenticate_password("tunnel", "secret").await.unwrap();
    let connection = client.into_connection();

    let mut tunnel = timeout(
        Duration::from_secs(10),
        connection.open_direct_tcpip("127.0.0.1", echo_port as u32),
    )
    .await
    .unwrap()
    .unwrap();

    echo_round_trip(&mut tunnel, &challenge).await;

    connection.close().await.unwrap();
}

/// A dial failure surfaces as a channel-open rejection, not a dead
/// stream.
#[tokio::test(flavor = "multi_thread")]
async fn test_tunnel_to_refused_port_fails() {
    let ssh_addr = start_ssh_server().await;
    let mut config = SshClientConfig::default();
    config.strict_host_key_checking = StrictHostKeyChecking::No;

    let mut client = SshClient::connect_with_config(&ssh_addr.to_string(), config)
        .await
        .unwrap();
    client.authenticate_password("tunnel", "secret").await.unwrap();
    let connection = client.into_connection();

    // Bind-then-drop gives a port with nothing listening.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = timeout(
        Duration::from_secs(10),
        connection.open_direct_tcpip("127.0.0.1", dead_port as u32),
    )
    .await
    .unwrap();
    assert!(result.is_err());

    connection.close().await.unwrap();
}

// --- Minimal WebSocket client, for the public-echo scenario ---

async fn websocket_echo<S>(stream: &mut S, host: &str, challenge: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Opening handshake (RFC 6455 Section 4.1).
    let mut key_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

    let request = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        host, key
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // Read headers until the blank line.
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        response.push(byte[0]);
        assert!(response.len() < 16 * 1024, "oversized handshake response");
    }
    let head = String::from_utf8_lossy(&response);
    assert!(head.starts_with("HTTP/1.1 101"), "handshake reply: {}", head);

    // One masked text frame out (client frames must be masked).
    let payload = challenge.as_bytes();
    assert!(payload.len() <= 125);
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);

    let mut frame = vec![0x81u8, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4]),
    );
    stream.write_all(&frame).await.unwrap();

    // One unmasked text frame back.
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0] & 0x0F, 0x1, "expected a text frame");
    let len = (header[1] & 0x7F) as usize;
    assert_eq!(header[1] & 0x80, 0, "server frames are unmasked");

    let mut echoed = vec![0u8; len];
    stream.read_exact(&mut echoed).await.unwrap();
    String::from_utf8_lossy(&echoed).into_owned()
}

/// A WebSocket echo exchange against
/// echo.websocket.org, once over a direct socket and once through the
/// tunnel. Needs the public internet, so it does not run by default.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires internet access to echo.websocket.org"]
async fn test_websocket_echo_direct_and_tunneled() {
    const ECHO_HOST: &str = "echo.websocket.org";
    let challenge = random_challenge();

    // Direct socket.
    let mut direct = TcpStream::connect((ECHO_HOST, 80)).await.unwrap();
    let direct_reply = websocket_echo(&mut direct, ECHO_HOST, &challenge).await;

    // Tunneled through an in-process SSH server.
    let ssh_addr = start_ssh_server().await;
    let mut config = SshClientConfig::default();
    config.strict_host_key_checking = StrictHostKeyChecking::No;

    let mut client = SshClient::connect_with_config(&ssh_addr.to_string(), config)
        .await
        .unwrap();
    client.authenticate_password("tunnel", "secret").await.unwrap();
    let connection = client.into_connection();

    let mut tunnel = connection
        .open_direct_tcpip(ECHO_HOST, 80)
        .await
        .unwrap();
    let tunneled_reply = websocket_echo(&mut tunnel, ECHO_HOST, &challenge).await;

    // Some echo deployments prepend a banner frame; the challenge
    // must come back verbatim on both paths either way.
    assert_eq!(direct_reply, tunneled_reply);
    assert!(direct_reply.contains(&challenge) || direct_reply == challenge);

    connection.close().await.unwrap();
}
