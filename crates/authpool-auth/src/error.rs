//! Authentication error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving connection credentials.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Credentials are incomplete or inconsistent with the auth mode.
    #[error("invalid credential configuration: {0}")]
    Configuration(String),

    /// A credential file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The Kerberos realm configuration (krb5.conf) is malformed.
    #[error("invalid krb5 configuration at line {line}: {message}")]
    Krb5Conf {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// The keytab file is malformed or uses an unsupported format.
    #[error("invalid keytab: {0}")]
    Keytab(String),

    /// The credential cache file is malformed or uses an unsupported format.
    #[error("invalid credential cache: {0}")]
    CredentialCache(String),

    /// The principal has no usable key in the keytab.
    #[error("principal {principal} not found in keytab {}", keytab.display())]
    PrincipalNotFound {
        /// Principal that was looked up.
        principal: String,
        /// Keytab that was searched.
        keytab: PathBuf,
    },

    /// The principal has no realm and no default realm is configured.
    #[error("principal {0} has no realm and krb5 configuration has no default_realm")]
    MissingRealm(String),

    /// The cached ticket has expired and cannot be renewed from this source.
    #[error("ticket for {principal} expired; re-run kinit or configure a keytab")]
    TicketExpired {
        /// Principal whose ticket expired.
        principal: String,
    },

    /// The server rejected the presented credentials during the handshake.
    #[error("server rejected credentials: {0}")]
    Rejected(String),
}

impl AuthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn krb5(line: usize, message: impl Into<String>) -> Self {
        Self::Krb5Conf {
            line,
            message: message.into(),
        }
    }
}
