//! Authentication strategy contract and the built-in strategies.
//!
//! A strategy is chosen once at session construction from configuration --
//! there is no runtime registry. The contract is deliberately abstract: a
//! strategy runs its handshake through the [`CommandChannel`] the session
//! provides, and may additionally wrap outbound commands and unwrap echoed
//! names when the transport itself is not secure.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::session::CommandResponse;

/// The slice of a session a strategy is allowed to drive: correlated
/// command/response exchanges, nothing else.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn request(&self, command: &str) -> Result<CommandResponse, Error>;
}

/// Pluggable login handshake plus command encrypt/decrypt hooks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Run the login handshake. Invoked exactly once per opened session.
    async fn authenticate(&self, channel: &dyn CommandChannel) -> Result<(), Error>;

    /// Wrap an outbound command for the wire. Identity unless the strategy
    /// encrypts commands over insecure transports.
    fn encrypt_command(&self, command: &str) -> String {
        command.to_string()
    }

    /// Unwrap an echoed command name before correlation. Inverse of
    /// [`encrypt_command`](Self::encrypt_command) for the echoed portion.
    fn decrypt_echoed_name(&self, name: &str) -> String {
        name.to_string()
    }
}

// ── NoAuth ───────────────────────────────────────────────────────────

/// No handshake at all, for controllers fronted by an already-authenticated
/// secure channel.
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthStrategy for NoAuth {
    async fn authenticate(&self, _channel: &dyn CommandChannel) -> Result<(), Error> {
        tracing::debug!("auth strategy: none");
        Ok(())
    }
}

// ── HashAuth ─────────────────────────────────────────────────────────

const GET_KEY_COMMAND: &str = "jdev/sys/getkey";

/// Challenge-response login: fetch a one-time key from the controller,
/// digest `key:user:password`, and present the digest. The controller
/// classifies failures through the response code (wrong credentials vs.
/// lockout), which the session surfaces as typed errors.
pub struct HashAuth {
    user: String,
    password: SecretString,
}

impl HashAuth {
    pub fn new(user: impl Into<String>, password: SecretString) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }

    fn digest(&self, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(self.user.as_bytes());
        hasher.update(b":");
        hasher.update(self.password.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for HashAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthStrategy for HashAuth {
    async fn authenticate(&self, channel: &dyn CommandChannel) -> Result<(), Error> {
        let key_response = channel.request(GET_KEY_COMMAND).await.map_err(auth_map)?;
        let key = key_response.value_str();
        if key.is_empty() {
            return Err(Error::AuthCredential {
                message: "controller returned an empty login key".into(),
            });
        }

        let token = self.digest(&key);
        let command = format!("authenticate/{}/{}", self.user, token);
        channel.request(&command).await.map_err(auth_map)?;

        tracing::debug!(user = %self.user, "authenticated");
        Ok(())
    }
}

/// Recast handshake transport failures into auth-phase errors; typed auth
/// rejections pass through unchanged.
fn auth_map(err: Error) -> Error {
    match err {
        Error::ResponseTimeout { .. } => Error::AuthTimeout,
        other => other,
    }
}
