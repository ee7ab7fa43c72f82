//! Credential provider abstraction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::{AuthMode, Credentials, SecretString};
use crate::error::AuthError;
use crate::kerberos::{KerberosAuth, KerberosTicket};

/// Authentication material handed to the connector when opening a connection.
#[derive(Clone)]
#[non_exhaustive]
pub enum AuthContext {
    /// Nothing to present.
    None,
    /// Static login.
    Password {
        /// Login name.
        username: String,
        /// Login password.
        password: SecretString,
    },
    /// Kerberos ticket.
    Kerberos(Arc<KerberosTicket>),
}

impl AuthContext {
    /// The mode this context was produced for.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::None => AuthMode::None,
            Self::Password { .. } => AuthMode::Password,
            Self::Kerberos(_) => AuthMode::Kerberos,
        }
    }

    /// The Kerberos ticket, if this is a Kerberos context.
    #[must_use]
    pub fn ticket(&self) -> Option<&KerberosTicket> {
        match self {
            Self::Kerberos(ticket) => Some(ticket),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Kerberos(ticket) => f.debug_tuple("Kerberos").field(ticket).finish(),
        }
    }
}

/// Resolves authentication material for each new physical connection.
///
/// Called once per connection attempt. Implementations may cache material
/// internally (a still-valid ticket, for example) but must never hand out
/// material they know to be expired.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// The authentication mode this provider serves.
    fn mode(&self) -> AuthMode;

    /// Produce authentication material for a new connection.
    async fn authenticate(&self) -> Result<AuthContext, AuthError>;

    /// Drop any cached material, forcing the next call to re-resolve it.
    ///
    /// Called when the server rejected material this provider produced.
    fn invalidate(&self) {}
}

/// Provider for modes that need no resolution (`None`, `Password`).
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    context: AuthContext,
}

impl StaticCredentialProvider {
    /// Provider that presents no credentials.
    #[must_use]
    pub fn none() -> Self {
        Self {
            context: AuthContext::None,
        }
    }

    /// Provider for a fixed username/password pair.
    pub fn password(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            context: AuthContext::Password {
                username: username.into(),
                password: password.into(),
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    fn mode(&self) -> AuthMode {
        self.context.mode()
    }

    async fn authenticate(&self) -> Result<AuthContext, AuthError> {
        Ok(self.context.clone())
    }
}

/// Build the provider matching `credentials`.
///
/// Validates the credential shape first; files are only read on
/// [`CredentialProvider::authenticate`].
pub fn provider_for(credentials: &Credentials) -> Result<Arc<dyn CredentialProvider>, AuthError> {
    credentials.validate()?;
    let provider: Arc<dyn CredentialProvider> = match credentials {
        Credentials::None => Arc::new(StaticCredentialProvider::none()),
        Credentials::Password { username, password } => Arc::new(
            StaticCredentialProvider::password(username.clone(), password.clone()),
        ),
        Credentials::Kerberos(config) => Arc::new(KerberosAuth::new(config.clone())),
    };
    Ok(provider)
}
