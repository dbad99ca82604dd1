//! User authentication protocol messages (RFC 4252).
//!
//! Methods carried by [`AuthRequest`]:
//!
//! - `publickey` - query (no signature) then sign-and-send
//! - `password` - plaintext password over the encrypted transport
//! - `keyboard-interactive` - single-round prompt/response (RFC 4256)
//! - `none` - used to probe the server's method list
//!
//! # Security
//!
//! - Passwords are zeroized when the request is dropped
//! - Publickey signatures are bound to the session identifier, so a
//!   signature replayed on another connection never verifies
//! - Server-side comparisons use [`constant_time_compare`]

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// An authentication method within a USERAUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication; probes the server's allowed methods.
    None,
    /// Password authentication.
    Password(String),
    /// Public key authentication.
    PublicKey {
        /// Algorithm name (e.g. "ssh-ed25519").
        algorithm: String,
        /// Public key blob.
        public_key: Vec<u8>,
        /// Signature blob, absent for the initial query.
        signature: Option<Vec<u8>>,
    },
    /// Keyboard-interactive authentication (RFC 4256).
    KeyboardInteractive {
        /// Language tag (usually empty).
        language: String,
        /// Submethods hint (usually empty).
        submethods: String,
    },
}

impl AuthMethod {
    /// Returns the method name.
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::KeyboardInteractive { .. } => "keyboard-interactive",
        }
    }
}

impl Drop for AuthMethod {
    fn drop(&mut self) {
        if let AuthMethod::Password(ref mut password) = self {
            password.zeroize();
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST (RFC 4252 Section 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    user_name: String,
    service_name: String,
    method: AuthMethod,
}

impl AuthRequest {
    /// Creates a new authentication request.
    pub fn new(user_name: &str, service_name: &str, method: AuthMethod) -> Self {
        Self {
            user_name: user_name.to_string(),
            service_name: service_name.to_string(),
            method,
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthRequest as u8);
        codec::write_string(&mut buf, &self.user_name);
        codec::write_string(&mut buf, &self.service_name);
        codec::write_string(&mut buf, self.method.name());

        match &self.method {
            AuthMethod::None => {}
            AuthMethod::Password(password) => {
                codec::write_bool(&mut buf, false); // not a password change
                codec::write_string(&mut buf, password);
            }
            AuthMethod::PublicKey {
                algorithm,
                public_key,
                signature,
            } => {
                codec::write_bool(&mut buf, signature.is_some());
                codec::write_string(&mut buf, algorithm);
                codec::write_bytes(&mut buf, public_key);
                if let Some(signature) = signature {
                    codec::write_bytes(&mut buf, signature);
                }
            }
            AuthMethod::KeyboardInteractive {
                language,
                submethods,
            } => {
                codec::write_string(&mut buf, language);
                codec::write_string(&mut buf, submethods);
            }
        }

        buf.to_vec()
    }

    /// Parses a USERAUTH_REQUEST payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthRequest as u8)) {
            return Err(HawserError::Protocol(format!(
                "Expected SSH_MSG_USERAUTH_REQUEST, got {:?}",
                data.first()
            )));
        }

        let mut offset = 1;
        let user_name = codec::read_string(data, &mut offset)?;
        let service_name = codec::read_string(data, &mut offset)?;
        let method_name = codec::read_string(data, &mut offset)?;

        let method = match method_name.as_str() {
            "none" => AuthMethod::None,
            "password" => {
                let _changing = codec::read_bool(data, &mut offset)?;
                let password = codec::read_string(data, &mut offset)?;
                AuthMethod::Password(password)
            }
            "publickey" => {
                let has_signature = codec::read_bool(data, &mut offset)?;
                let algorithm = codec::read_string(data, &mut offset)?;
                let public_key = codec::read_bytes(data, &mut offset)?;
                let signature = if has_signature {
                    Some(codec::read_bytes(data, &mut offset)?)
                } else {
                    None
                };
                AuthMethod::PublicKey {
                    algorithm,
                    public_key,
                    signature,
                }
            }
            "keyboard-interactive" => {
                let language = codec::read_string(data, &mut offset)?;
                let submethods = codec::read_string(data, &mut offset)?;
                AuthMethod::KeyboardInteractive {
                    language,
                    submethods,
                }
            }
            other => {
                return Err(HawserError::Protocol(format!(
                    "Unsupported authentication method: '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            user_name,
            service_name,
            method,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    methods_can_continue: Vec<String>,
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a failure carrying the server's continue-list.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods_can_continue: methods,
            partial_success,
        }
    }

    /// Returns the methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods_can_continue
    }

    /// Returns the partial-success flag.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthFailure as u8);
        codec::write_name_list(&mut buf, &self.methods_can_continue);
        codec::write_bool(&mut buf, self.partial_success);
        buf.to_vec()
    }

    /// Parses a USERAUTH_FAILURE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthFailure as u8)) {
            return Err(HawserError::Protocol(format!(
                "Expected SSH_MSG_USERAUTH_FAILURE, got {:?}",
                data.first()
            )));
        }
        let mut offset = 1;
        let methods_can_continue = codec::read_name_list(data, &mut offset)?;
        let partial_success = codec::read_bool(data, &mut offset)?;
        Ok(Self {
            methods_can_continue,
            partial_success,
        })
    }
}

/// SSH_MSG_USERAUTH_SUCCESS (RFC 4252 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSuccess;

impl AuthSuccess {
    /// Serializes to the single-byte payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::UserauthSuccess as u8]
    }

    /// Parses a USERAUTH_SUCCESS payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthSuccess as u8)) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_USERAUTH_SUCCESS".to_string(),
            ));
        }
        Ok(Self)
    }
}

/// SSH_MSG_USERAUTH_BANNER (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    /// Banner text shown to the user before authentication.
    pub message: String,
    /// Language tag.
    pub language: String,
}

impl AuthBanner {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthBanner as u8);
        codec::write_string(&mut buf, &self.message);
        codec::write_string(&mut buf, &self.language);
        buf.to_vec()
    }

    /// Parses a USERAUTH_BANNER payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthBanner as u8)) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_USERAUTH_BANNER".to_string(),
            ));
        }
        let mut offset = 1;
        let message = codec::read_string(data, &mut offset)?;
        let language = codec::read_string(data, &mut offset)?;
        Ok(Self { message, language })
    }
}

/// SSH_MSG_USERAUTH_PK_OK (RFC 4252 Section 7): the server accepts
/// the offered key; the client should sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPkOk {
    /// Echoed algorithm name.
    pub algorithm: String,
    /// Echoed public key blob.
    pub public_key: Vec<u8>,
}

impl AuthPkOk {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthPkOk as u8);
        codec::write_string(&mut buf, &self.algorithm);
        codec::write_bytes(&mut buf, &self.public_key);
        buf.to_vec()
    }

    /// Parses a USERAUTH_PK_OK payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthPkOk as u8)) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_USERAUTH_PK_OK".to_string(),
            ));
        }
        let mut offset = 1;
        let algorithm = codec::read_string(data, &mut offset)?;
        let public_key = codec::read_bytes(data, &mut offset)?;
        Ok(Self {
            algorithm,
            public_key,
        })
    }
}

/// SSH_MSG_USERAUTH_INFO_REQUEST (RFC 4256 Section 3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRequest {
    /// Instruction header.
    pub name: String,
    /// Instruction body.
    pub instruction: String,
    /// Language tag.
    pub language: String,
    /// Prompts, each with an echo flag.
    pub prompts: Vec<(String, bool)>,
}

impl InfoRequest {
    /// Serializes to the message payload (number 60 in the
    /// keyboard-interactive context).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthPkOk as u8); // 60
        codec::write_string(&mut buf, &self.name);
        codec::write_string(&mut buf, &self.instruction);
        codec::write_string(&mut buf, &self.language);
        buf.put_u32(self.prompts.len() as u32);
        for (prompt, echo) in &self.prompts {
            codec::write_string(&mut buf, prompt);
            codec::write_bool(&mut buf, *echo);
        }
        buf.to_vec()
    }

    /// Parses an INFO_REQUEST payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&60) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_USERAUTH_INFO_REQUEST".to_string(),
            ));
        }
        let mut offset = 1;
        let name = codec::read_string(data, &mut offset)?;
        let instruction = codec::read_string(data, &mut offset)?;
        let language = codec::read_string(data, &mut offset)?;
        let count = codec::read_u32(data, &mut offset)?;
        let mut prompts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let prompt = codec::read_string(data, &mut offset)?;
            let echo = codec::read_bool(data, &mut offset)?;
            prompts.push((prompt, echo));
        }
        Ok(Self {
            name,
            instruction,
            language,
            prompts,
        })
    }
}

/// SSH_MSG_USERAUTH_INFO_RESPONSE (RFC 4256 Section 3.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoResponse {
    /// Responses, one per prompt.
    pub responses: Vec<String>,
}

impl InfoResponse {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthInfoResponse as u8);
        buf.put_u32(self.responses.len() as u32);
        for response in &self.responses {
            codec::write_string(&mut buf, response);
        }
        buf.to_vec()
    }

    /// Parses an INFO_RESPONSE payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::UserauthInfoResponse as u8)) {
            return Err(HawserError::Protocol(
                "Expected SSH_MSG_USERAUTH_INFO_RESPONSE".to_string(),
            ));
        }
        let mut offset = 1;
        let count = codec::read_u32(data, &mut offset)?;
        let mut responses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            responses.push(codec::read_string(data, &mut offset)?);
        }
        Ok(Self { responses })
    }
}

/// Builds the blob a publickey signature covers (RFC 4252 Section 7):
///
/// ```text
/// string  session identifier
/// byte    SSH_MSG_USERAUTH_REQUEST
/// string  user name
/// string  service name
/// string  "publickey"
/// boolean TRUE
/// string  public key algorithm name
/// string  public key blob
/// ```
pub fn signature_payload(
    session_id: &[u8],
    user_name: &str,
    service_name: &str,
    algorithm: &str,
    public_key_blob: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::write_bytes(&mut buf, session_id);
    buf.put_u8(MessageType::UserauthRequest as u8);
    codec::write_string(&mut buf, user_name);
    codec::write_string(&mut buf, service_name);
    codec::write_string(&mut buf, "publickey");
    codec::write_bool(&mut buf, true);
    codec::write_string(&mut buf, algorithm);
    codec::write_bytes(&mut buf, public_key_blob);
    buf.to_vec()
}

/// Constant-time byte comparison for credentials.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_request_round_trip() {
        let request = AuthRequest::new(
            "alice",
            "ssh-connection",
            AuthMethod::Password("secret".to_string()),
        );
        let parsed = AuthRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.user_name(), "alice");
        assert_eq!(parsed.method().name(), "password");
    }

    #[test]
    fn test_publickey_query_round_trip() {
        let request = AuthRequest::new(
            "bob",
            "ssh-connection",
            AuthMethod::PublicKey {
                algorithm: "ssh-ed25519".to_string(),
                public_key: vec![1, 2, 3],
                signature: None,
            },
        );
        let parsed = AuthRequest::from_bytes(&request.to_bytes()).unwrap();
        match parsed.method() {
            AuthMethod::PublicKey { signature, .. } => assert!(signature.is_none()),
            other => panic!("unexpected method {:?}", other),
        }
    }

    #[test]
    fn test_publickey_signed_round_trip() {
        let request = AuthRequest::new(
            "bob",
            "ssh-connection",
            AuthMethod::PublicKey {
                algorithm: "ssh-ed25519".to_string(),
                public_key: vec![1, 2, 3],
                signature: Some(vec![9, 9, 9]),
            },
        );
        let parsed = AuthRequest::from_bytes(&request.to_bytes()).unwrap();
        match parsed.method() {
            AuthMethod::PublicKey { signature, .. } => {
                assert_eq!(signature.as_deref(), Some(&[9u8, 9, 9][..]));
            }
            other => panic!("unexpected method {:?}", other),
        }
    }

    #[test]
    fn test_keyboard_interactive_round_trip() {
        let request = AuthRequest::new(
            "carol",
            "ssh-connection",
            AuthMethod::KeyboardInteractive {
                language: String::new(),
                submethods: String::new(),
            },
        );
        let parsed = AuthRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.method().name(), "keyboard-interactive");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let request = AuthRequest::new("dave", "ssh-connection", AuthMethod::None);
        let mut bytes = request.to_bytes();
        // Rewrite the method name "none" to an unknown one of equal length.
        let pos = bytes.len() - 4;
        bytes[pos..].copy_from_slice(b"nope");
        assert!(AuthRequest::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_failure_round_trip() {
        let failure = AuthFailure::new(
            vec!["publickey".to_string(), "password".to_string()],
            false,
        );
        let parsed = AuthFailure::from_bytes(&failure.to_bytes()).unwrap();
        assert_eq!(parsed.methods_can_continue(), ["publickey", "password"]);
        assert!(!parsed.partial_success());
    }

    #[test]
    fn test_success_round_trip() {
        assert!(AuthSuccess::from_bytes(&AuthSuccess.to_bytes()).is_ok());
        assert!(AuthSuccess::from_bytes(&[51]).is_err());
    }

    #[test]
    fn test_banner_round_trip() {
        let banner = AuthBanner {
            message: "welcome\n".to_string(),
            language: String::new(),
        };
        let parsed = AuthBanner::from_bytes(&banner.to_bytes()).unwrap();
        assert_eq!(parsed, banner);
    }

    #[test]
    fn test_pk_ok_round_trip() {
        let pk_ok = AuthPkOk {
            algorithm: "ssh-ed25519".to_string(),
            public_key: vec![4, 5, 6],
        };
        let parsed = AuthPkOk::from_bytes(&pk_ok.to_bytes()).unwrap();
        assert_eq!(parsed, pk_ok);
    }

    #[test]
    fn test_info_request_response_round_trip() {
        let request = InfoRequest {
            name: "Password".to_string(),
            instruction: String::new(),
            language: String::new(),
            prompts: vec![("Password: ".to_string(), false)],
        };
        let parsed = InfoRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed, request);

        let response = InfoResponse {
            responses: vec!["hunter2".to_string()],
        };
        let parsed = InfoResponse::from_bytes(&response.to_bytes()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_signature_payload_binds_session_id() {
        let payload_a = signature_payload(b"session-a", "u", "ssh-connection", "alg", b"key");
        let payload_b = signature_payload(b"session-b", "u", "ssh-connection", "alg", b"key");
        assert_ne!(payload_a, payload_b);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"same", b"same"));
        assert!(!constant_time_compare(b"same", b"diff"));
        assert!(!constant_time_compare(b"same", b"longer"));
    }
}
