//! Credential model: authentication mode plus the parameters it needs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// How new physical connections authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication material is sent.
    #[default]
    None,
    /// Static username and password.
    Password,
    /// Kerberos ticket obtained from a keytab or credential cache.
    Kerberos,
}

impl AuthMode {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Password => "password",
            Self::Kerberos => "kerberos",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "password" | "sql" | "basic" => Ok(Self::Password),
            "kerberos" | "krb5" | "gssapi" => Ok(Self::Kerberos),
            other => Err(AuthError::Configuration(format!(
                "unknown authentication type: {other}"
            ))),
        }
    }
}

/// A string whose contents never appear in `Debug` output.
///
/// With the `zeroize` feature the backing buffer is wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(feature = "zeroize")]
impl Drop for SecretString {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }
}

/// Kerberos parameters.
///
/// Either `keytab_path` or `ticket_cache_path` must be set. When both are
/// present the keytab wins, since it can be used to re-issue tickets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KerberosConfig {
    /// Path to the realm configuration (`krb5.conf`).
    pub krb5_conf_path: Option<PathBuf>,
    /// Client principal, e.g. `svc_reports@EXAMPLE.COM`.
    pub principal: String,
    /// Path to a keytab holding the principal's long-term keys.
    pub keytab_path: Option<PathBuf>,
    /// Path to an existing credential cache (as written by `kinit`).
    pub ticket_cache_path: Option<PathBuf>,
}

impl KerberosConfig {
    /// Create a configuration for the given principal.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            ..Self::default()
        }
    }

    /// Set the realm configuration path.
    #[must_use]
    pub fn krb5_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.krb5_conf_path = Some(path.into());
        self
    }

    /// Set the keytab path.
    #[must_use]
    pub fn keytab(mut self, path: impl Into<PathBuf>) -> Self {
        self.keytab_path = Some(path.into());
        self
    }

    /// Set the credential cache path.
    #[must_use]
    pub fn ticket_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.ticket_cache_path = Some(path.into());
        self
    }
}

/// Authentication credentials for new connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Credentials {
    /// No authentication.
    #[default]
    None,
    /// Username and password.
    Password {
        /// Login name.
        username: String,
        /// Login password.
        password: SecretString,
    },
    /// Kerberos.
    Kerberos(KerberosConfig),
}

impl Credentials {
    /// No credentials.
    #[must_use]
    pub fn none() -> Self {
        Self::None
    }

    /// Username/password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Kerberos credentials.
    #[must_use]
    pub fn kerberos(config: KerberosConfig) -> Self {
        Self::Kerberos(config)
    }

    /// The authentication mode these credentials select.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::None => AuthMode::None,
            Self::Password { .. } => AuthMode::Password,
            Self::Kerberos(_) => AuthMode::Kerberos,
        }
    }

    /// Check that the mode-specific fields are present.
    ///
    /// This only checks shape; files are read when authenticating.
    pub fn validate(&self) -> Result<(), AuthError> {
        match self {
            Self::None => Ok(()),
            Self::Password { username, .. } => {
                if username.trim().is_empty() {
                    return Err(AuthError::Configuration(
                        "password authentication requires a username".into(),
                    ));
                }
                Ok(())
            }
            Self::Kerberos(config) => {
                if config.principal.trim().is_empty() {
                    return Err(AuthError::Configuration(
                        "kerberos authentication requires a principal".into(),
                    ));
                }
                if config.keytab_path.is_none() && config.ticket_cache_path.is_none() {
                    return Err(AuthError::Configuration(
                        "kerberos authentication requires a keytab or a ticket cache".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}
