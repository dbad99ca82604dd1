//! SSH agent protocol endpoint (draft-miller-ssh-agent).
//!
//! When agent forwarding is active, the peer opens an
//! `auth-agent@openssh.com` channel and speaks the SSH-agent
//! request/reply protocol over it. [`AgentKeyring`] answers those
//! requests from in-memory identities:
//!
//! - `SSH2_AGENTC_REQUEST_IDENTITIES` → `SSH2_AGENT_IDENTITIES_ANSWER`
//! - `SSH2_AGENTC_SIGN_REQUEST` → `SSH2_AGENT_SIGN_RESPONSE`
//! - anything else → `SSH_AGENT_FAILURE`
//!
//! Each message travels in a `uint32` length frame.

use crate::ssh::codec;
use crate::ssh::identity::Identity;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// SSH_AGENT_FAILURE
pub const SSH_AGENT_FAILURE: u8 = 5;
/// SSH2_AGENTC_REQUEST_IDENTITIES
pub const SSH2_AGENTC_REQUEST_IDENTITIES: u8 = 11;
/// SSH2_AGENT_IDENTITIES_ANSWER
pub const SSH2_AGENT_IDENTITIES_ANSWER: u8 = 12;
/// SSH2_AGENTC_SIGN_REQUEST
pub const SSH2_AGENTC_SIGN_REQUEST: u8 = 13;
/// SSH2_AGENT_SIGN_RESPONSE
pub const SSH2_AGENT_SIGN_RESPONSE: u8 = 14;

/// Upper bound on one agent message, matching the transport's packet
/// ceiling.
const MAX_AGENT_MESSAGE: usize = 35000;

/// In-memory identities served over agent channels.
#[derive(Clone)]
pub struct AgentKeyring {
    identities: Vec<(Arc<Identity>, String)>,
}

impl AgentKeyring {
    /// Creates an empty keyring.
    pub fn new() -> Self {
        Self {
            identities: Vec::new(),
        }
    }

    /// Adds an identity with a comment.
    pub fn add(&mut self, identity: Arc<Identity>, comment: &str) {
        self.identities.push((identity, comment.to_string()));
    }

    /// Returns the number of held identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns true when no identities are held.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Answers one agent request.
    pub fn handle_request(&self, request: &[u8]) -> Vec<u8> {
        match request.first() {
            Some(&SSH2_AGENTC_REQUEST_IDENTITIES) => self.identities_answer(),
            Some(&SSH2_AGENTC_SIGN_REQUEST) => self
                .sign_response(request)
                .unwrap_or_else(|_| vec![SSH_AGENT_FAILURE]),
            other => {
                debug!(request = ?other, "Unsupported agent request");
                vec![SSH_AGENT_FAILURE]
            }
        }
    }

    fn identities_answer(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(SSH2_AGENT_IDENTITIES_ANSWER);
        buf.put_u32(self.identities.len() as u32);
        for (identity, comment) in &self.identities {
            codec::write_bytes(&mut buf, &identity.public_key_blob());
            codec::write_string(&mut buf, comment);
        }
        buf.to_vec()
    }

    fn sign_response(&self, request: &[u8]) -> HawserResult<Vec<u8>> {
        let mut offset = 1;
        let key_blob = codec::read_bytes(request, &mut offset)?;
        let data = codec::read_bytes(request, &mut offset)?;
        let _flags = codec::read_u32(request, &mut offset)?;

        let identity = self
            .identities
            .iter()
            .find(|(identity, _)| identity.public_key_blob() == key_blob)
            .map(|(identity, _)| identity)
            .ok_or_else(|| {
                HawserError::Protocol("Sign request for unknown identity".to_string())
            })?;

        let signature = identity.sign(&data)?;

        let mut buf = BytesMut::new();
        buf.put_u8(SSH2_AGENT_SIGN_RESPONSE);
        codec::write_bytes(&mut buf, &signature);
        Ok(buf.to_vec())
    }

    /// Serves agent requests over a byte stream (typically an accepted
    /// auth-agent channel) until the stream closes.
    pub async fn serve<S>(&self, mut stream: S) -> HawserResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let mut length_bytes = [0u8; 4];
            match stream.read_exact(&mut length_bytes).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(HawserError::Io(e)),
            }

            let length = u32::from_be_bytes(length_bytes) as usize;
            if length == 0 || length > MAX_AGENT_MESSAGE {
                return Err(HawserError::Protocol(format!(
                    "Agent message of {} bytes out of range",
                    length
                )));
            }

            let mut request = vec![0u8; length];
            stream
                .read_exact(&mut request)
                .await
                .map_err(HawserError::Io)?;

            let reply = self.handle_request(&request);
            let mut frame = BytesMut::with_capacity(4 + reply.len());
            frame.put_u32(reply.len() as u32);
            frame.put_slice(&reply);
            stream.write_all(&frame).await.map_err(HawserError::Io)?;
            stream.flush().await.map_err(HawserError::Io)?;
        }
    }
}

impl Default for AgentKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentKeyring")
            .field("identities", &self.identities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::algorithm::HostKeyAlg;
    use crate::ssh::hostkey;

    fn keyring_with_one_key() -> (AgentKeyring, Arc<Identity>) {
        let identity = Arc::new(Identity::generate(HostKeyAlg::SshEd25519).unwrap());
        let mut keyring = AgentKeyring::new();
        keyring.add(identity.clone(), "test@hawser");
        (keyring, identity)
    }

    #[test]
    fn test_request_identities() {
        let (keyring, identity) = keyring_with_one_key();
        let reply = keyring.handle_request(&[SSH2_AGENTC_REQUEST_IDENTITIES]);

        assert_eq!(reply[0], SSH2_AGENT_IDENTITIES_ANSWER);
        let mut offset = 1;
        let count = codec::read_u32(&reply, &mut offset).unwrap();
        assert_eq!(count, 1);
        let blob = codec::read_bytes(&reply, &mut offset).unwrap();
        assert_eq!(blob, identity.public_key_blob());
        let comment = codec::read_string(&reply, &mut offset).unwrap();
        assert_eq!(comment, "test@hawser");
    }

    #[test]
    fn test_sign_request_round_trip() {
        let (keyring, identity) = keyring_with_one_key();

        let mut request = BytesMut::new();
        request.put_u8(SSH2_AGENTC_SIGN_REQUEST);
        codec::write_bytes(&mut request, &identity.public_key_blob());
        codec::write_bytes(&mut request, b"agent challenge");
        request.put_u32(0);

        let reply = keyring.handle_request(&request);
        assert_eq!(reply[0], SSH2_AGENT_SIGN_RESPONSE);

        let mut offset = 1;
        let signature = codec::read_bytes(&reply, &mut offset).unwrap();
        assert!(hostkey::verify_signature(
            &identity.public_key_blob(),
            b"agent challenge",
            &signature
        )
        .unwrap());
    }

    #[test]
    fn test_sign_request_unknown_key_fails() {
        let (keyring, _identity) = keyring_with_one_key();
        let stranger = Identity::generate(HostKeyAlg::SshEd25519).unwrap();

        let mut request = BytesMut::new();
        request.put_u8(SSH2_AGENTC_SIGN_REQUEST);
        codec::write_bytes(&mut request, &stranger.public_key_blob());
        codec::write_bytes(&mut request, b"data");
        request.put_u32(0);

        assert_eq!(keyring.handle_request(&request), vec![SSH_AGENT_FAILURE]);
    }

    #[test]
    fn test_unsupported_request_fails() {
        let (keyring, _) = keyring_with_one_key();
        assert_eq!(keyring.handle_request(&[99]), vec![SSH_AGENT_FAILURE]);
    }

    #[tokio::test]
    async fn test_serve_over_stream() {
        let (keyring, identity) = keyring_with_one_key();
        let (client, server) = tokio::io::duplex(1 << 16);

        tokio::spawn(async move {
            let _ = keyring.serve(server).await;
        });

        let mut client = client;
        let request = [SSH2_AGENTC_REQUEST_IDENTITIES];
        client.write_all(&1u32.to_be_bytes()).await.unwrap();
        client.write_all(&request).await.unwrap();

        let mut length_bytes = [0u8; 4];
        client.read_exact(&mut length_bytes).await.unwrap();
        let mut reply = vec![0u8; u32::from_be_bytes(length_bytes) as usize];
        client.read_exact(&mut reply).await.unwrap();

        assert_eq!(reply[0], SSH2_AGENT_IDENTITIES_ANSWER);
        let mut offset = 1;
        assert_eq!(codec::read_u32(&reply, &mut offset).unwrap(), 1);
        assert_eq!(
            codec::read_bytes(&reply, &mut offset).unwrap(),
            identity.public_key_blob()
        );
    }
}
