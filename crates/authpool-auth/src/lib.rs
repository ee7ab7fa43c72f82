//! # authpool-auth
//!
//! Credential providers for the `authpool` connection pool.
//!
//! A [`CredentialProvider`] resolves the authentication material a driver
//! needs to open one physical connection. The pool calls it once per new
//! connection attempt; providers may cache material internally.
//!
//! ## Supported modes
//!
//! - [`AuthMode::None`]: no material
//! - [`AuthMode::Password`]: static username/password
//! - [`AuthMode::Kerberos`]: ticket issued from a keytab, or adopted from a
//!   `kinit` credential cache, with transparent refresh
//!
//! ## Example
//!
//! ```rust,ignore
//! use authpool_auth::{Credentials, KerberosConfig, provider_for};
//!
//! let credentials = Credentials::kerberos(
//!     KerberosConfig::new("svc_reports")
//!         .krb5_conf("/etc/krb5.conf")
//!         .keytab("/etc/security/svc_reports.keytab"),
//! );
//!
//! let provider = provider_for(&credentials)?;
//! let context = provider.authenticate().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod kerberos;
pub mod provider;

pub use credentials::{AuthMode, Credentials, KerberosConfig, SecretString};
pub use error::AuthError;
pub use kerberos::{KerberosAuth, KerberosTicket, TicketSource};
pub use provider::{AuthContext, CredentialProvider, StaticCredentialProvider, provider_for};
