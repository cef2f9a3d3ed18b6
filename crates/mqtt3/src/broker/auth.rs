//! Authorization boundary for incoming connections.
//!
//! The broker asks a single [`AuthProvider`] whether a client may connect. It
//! ships no credential store of its own; [`AllowAllAuthProvider`] is the
//! default and anything else is supplied by the embedding application.

use crate::error::Result;
use crate::types::ConnectReturnCode;
use std::future::Future;
use std::pin::Pin;

/// What the client presented in CONNECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl Credentials {
    #[must_use]
    pub fn new(username: Option<String>, password: Option<Vec<u8>>) -> Self {
        Self { username, password }
    }
}

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Accept,
    /// Refuse with the CONNACK return code to send back.
    Reject(ConnectReturnCode),
}

impl AuthResult {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

pub trait AuthProvider: Send + Sync {
    fn authorize<'a>(
        &'a self,
        client_id: &'a str,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResult>> + Send + 'a>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthProvider;

impl AuthProvider for AllowAllAuthProvider {
    fn authorize<'a>(
        &'a self,
        _client_id: &'a str,
        _credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResult>> + Send + 'a>> {
        Box::pin(async move { Ok(AuthResult::Accept) })
    }
}
