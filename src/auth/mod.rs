use crate::proto::{attrs, Header};
use async_trait::async_trait;
use thiserror::Error;

/// Identity established by a successful CONNECT handshake.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Instance id the client declared, if any.
    pub instance_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
}

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Validate the credentials carried by a CONNECT frame.
    async fn authenticate(&self, connect: &Header) -> Result<AuthContext, AuthError>;
}

/// Shared-secret authentication: the CONNECT frame must carry the node's
/// configured secret in its `secret` attribute.
#[derive(Debug, Clone)]
pub struct SecretAuthenticator {
    secret: String,
}

impl SecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl Authenticator for SecretAuthenticator {
    async fn authenticate(&self, connect: &Header) -> Result<AuthContext, AuthError> {
        let presented = connect
            .attr(attrs::SECRET)
            .ok_or(AuthError::MissingCredentials)?;
        if presented != self.secret {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(AuthContext {
            instance_id: connect.attr(attrs::INSTANCE_ID).map(str::to_string),
        })
    }
}
