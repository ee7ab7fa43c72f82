//! Kerberos credential provider.
//!
//! [`KerberosAuth`] turns a [`KerberosConfig`] (realm configuration, principal,
//! keytab or credential cache) into a [`KerberosTicket`] the connector can use
//! for the GSSAPI handshake. Tickets are cached and re-issued transparently
//! once they get within the refresh margin of their expiry.
//!
//! ## Sources
//!
//! - **Keytab**: the principal's long-term key is read from the keytab and a
//!   ticket is issued with the realm's configured `ticket_lifetime`. Refresh
//!   re-reads the keytab, so rotated keys are picked up.
//! - **Credential cache**: the ticket-granting ticket written by `kinit` is
//!   adopted with its own end time. It cannot be refreshed from here; once it
//!   expires authentication fails until the cache is renewed externally.

pub mod ccache;
pub mod keytab;
pub mod krb5_conf;
pub mod principal;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::credentials::{AuthMode, KerberosConfig};
use crate::error::AuthError;
use crate::provider::{AuthContext, CredentialProvider};

pub use ccache::{CachedCredential, CredentialCache};
pub use keytab::{Keytab, KeytabEntry};
pub use krb5_conf::{Krb5Conf, RealmInfo};
pub use principal::PrincipalName;

/// Upper bound of the default refresh margin.
const MAX_DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Where a ticket's key material came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketSource {
    /// Long-term key from a keytab.
    Keytab {
        /// Keytab path.
        path: PathBuf,
        /// Key version number used.
        kvno: u32,
    },
    /// Ticket-granting ticket from a credential cache.
    CredentialCache {
        /// Cache path.
        path: PathBuf,
    },
}

/// Kerberos credential material with a validity window.
#[derive(Clone)]
pub struct KerberosTicket {
    /// Fully qualified client principal.
    pub principal: PrincipalName,
    /// KDCs for the principal's realm, from the realm configuration.
    pub kdcs: Vec<String>,
    /// Source of the key material.
    pub source: TicketSource,
    /// Encryption type of `key`.
    pub enctype: u16,
    /// Key material: the long-term key (keytab) or the TGT session key (cache).
    pub key: Vec<u8>,
    /// Encoded ticket-granting ticket, when adopted from a cache.
    pub ticket: Option<Vec<u8>>,
    /// When the ticket became valid.
    pub issued_at: SystemTime,
    /// When the ticket stops being valid.
    pub expires_at: SystemTime,
    /// Latest time the ticket can be renewed to, if renewable.
    pub renew_until: Option<SystemTime>,
}

impl KerberosTicket {
    /// Nominal lifetime.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.expires_at
            .duration_since(self.issued_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Time left before expiry at `now` (zero once expired).
    #[must_use]
    pub fn remaining_at(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// Whether the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Whether the ticket should be re-issued at `now` given `margin`.
    #[must_use]
    pub fn needs_refresh_at(&self, now: SystemTime, margin: Duration) -> bool {
        self.remaining_at(now) <= margin
    }
}

impl fmt::Debug for KerberosTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosTicket")
            .field("principal", &self.principal.to_string())
            .field("kdcs", &self.kdcs)
            .field("source", &self.source)
            .field("enctype", &self.enctype)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "zeroize")]
impl Drop for KerberosTicket {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.key.zeroize();
    }
}

/// Kerberos [`CredentialProvider`] with a single-flight ticket cache.
pub struct KerberosAuth {
    config: KerberosConfig,
    refresh_margin: Option<Duration>,
    cached: tokio::sync::Mutex<Option<Arc<KerberosTicket>>>,
    /// Set by `invalidate`, consumed under the cache lock.
    invalidated: AtomicBool,
    issued: AtomicU64,
}

impl KerberosAuth {
    /// Create a provider for `config`.
    #[must_use]
    pub fn new(config: KerberosConfig) -> Self {
        Self {
            config,
            refresh_margin: None,
            cached: tokio::sync::Mutex::new(None),
            invalidated: AtomicBool::new(false),
            issued: AtomicU64::new(0),
        }
    }

    /// Re-issue tickets once they are within `margin` of expiry.
    ///
    /// Defaults to a tenth of the ticket lifetime, capped at five minutes.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    /// The configuration this provider reads.
    #[must_use]
    pub fn config(&self) -> &KerberosConfig {
        &self.config
    }

    /// Number of tickets issued so far (cache misses).
    #[must_use]
    pub fn tickets_issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    fn margin_for(&self, ticket: &KerberosTicket) -> Duration {
        self.refresh_margin
            .unwrap_or_else(|| (ticket.lifetime() / 10).min(MAX_DEFAULT_REFRESH_MARGIN))
    }

    async fn issue(&self) -> Result<KerberosTicket, AuthError> {
        let conf = match &self.config.krb5_conf_path {
            Some(path) => Krb5Conf::parse(&read_text(path).await?)?,
            None => Krb5Conf::default(),
        };

        let principal =
            PrincipalName::parse(&self.config.principal)?.with_default_realm(conf.default_realm());
        if !principal.has_realm() {
            return Err(AuthError::MissingRealm(principal.to_string()));
        }
        let kdcs = conf
            .realm(&principal.realm)
            .map(|realm| realm.kdcs)
            .unwrap_or_default();

        if let Some(path) = &self.config.keytab_path {
            return issue_from_keytab(path, principal, kdcs, &conf).await;
        }
        if let Some(path) = &self.config.ticket_cache_path {
            return adopt_from_cache(path, principal, kdcs).await;
        }
        Err(AuthError::Configuration(
            "kerberos authentication requires a keytab or a ticket cache".into(),
        ))
    }
}

impl fmt::Debug for KerberosAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosAuth")
            .field("principal", &self.config.principal)
            .field("keytab", &self.config.keytab_path)
            .field("ticket_cache", &self.config.ticket_cache_path)
            .field("tickets_issued", &self.tickets_issued())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for KerberosAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::Kerberos
    }

    #[instrument(skip(self), fields(principal = %self.config.principal))]
    async fn authenticate(&self) -> Result<AuthContext, AuthError> {
        let mut cached = self.cached.lock().await;
        let now = SystemTime::now();

        if self.invalidated.swap(false, Ordering::AcqRel) && cached.take().is_some() {
            debug!("kerberos ticket invalidated");
        }

        if let Some(ticket) = cached.as_ref() {
            if !ticket.needs_refresh_at(now, self.margin_for(ticket)) {
                return Ok(AuthContext::Kerberos(Arc::clone(ticket)));
            }
            debug!(expires_at = ?ticket.expires_at, "kerberos ticket due for refresh");
        }

        // Drop the stale ticket first so a failed refresh never leaves it cached.
        *cached = None;
        let ticket = Arc::new(self.issue().await?);
        self.issued.fetch_add(1, Ordering::Relaxed);
        debug!(
            principal = %ticket.principal,
            lifetime_secs = ticket.lifetime().as_secs(),
            "kerberos ticket issued"
        );

        *cached = Some(Arc::clone(&ticket));
        Ok(AuthContext::Kerberos(ticket))
    }

    /// Drop the cached ticket before the next `authenticate`. Also takes
    /// effect when another task is issuing a ticket at the time, in which
    /// case that ticket is discarded as well.
    fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }
}

async fn read_text(path: &Path) -> Result<String, AuthError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AuthError::io(path, e))
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, AuthError> {
    tokio::fs::read(path).await.map_err(|e| AuthError::io(path, e))
}

async fn issue_from_keytab(
    path: &Path,
    principal: PrincipalName,
    kdcs: Vec<String>,
    conf: &Krb5Conf,
) -> Result<KerberosTicket, AuthError> {
    let keytab = Keytab::parse(&read_bytes(path).await?)?;
    let entry = keytab
        .best_entry_for(&principal)
        .ok_or_else(|| AuthError::PrincipalNotFound {
            principal: principal.to_string(),
            keytab: path.to_path_buf(),
        })?;

    let issued_at = SystemTime::now();
    let expires_at = issued_at + conf.ticket_lifetime()?;
    let renew_until = conf.renew_lifetime()?.map(|renew| issued_at + renew);

    Ok(KerberosTicket {
        kdcs,
        source: TicketSource::Keytab {
            path: path.to_path_buf(),
            kvno: entry.kvno,
        },
        enctype: entry.enctype,
        key: entry.key.clone(),
        ticket: None,
        issued_at,
        expires_at,
        renew_until,
        principal,
    })
}

async fn adopt_from_cache(
    path: &Path,
    principal: PrincipalName,
    kdcs: Vec<String>,
) -> Result<KerberosTicket, AuthError> {
    let cache = CredentialCache::parse(&read_bytes(path).await?)?;
    if cache.default_principal != principal {
        return Err(AuthError::Configuration(format!(
            "credential cache {} belongs to {}, not {}",
            path.display(),
            cache.default_principal,
            principal
        )));
    }

    let tgt = cache.tgt().ok_or_else(|| {
        AuthError::CredentialCache(format!(
            "{} holds no ticket-granting ticket for {}",
            path.display(),
            principal
        ))
    })?;

    let epoch = |secs: u32| UNIX_EPOCH + Duration::from_secs(u64::from(secs));
    let expires_at = epoch(tgt.endtime);
    if SystemTime::now() >= expires_at {
        return Err(AuthError::TicketExpired {
            principal: principal.to_string(),
        });
    }

    Ok(KerberosTicket {
        kdcs,
        source: TicketSource::CredentialCache {
            path: path.to_path_buf(),
        },
        enctype: tgt.enctype,
        key: tgt.session_key.clone(),
        ticket: Some(tgt.ticket.clone()),
        issued_at: epoch(tgt.starttime.max(tgt.authtime)),
        expires_at,
        renew_until: (tgt.renew_till > tgt.endtime).then(|| epoch(tgt.renew_till)),
        principal,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ticket(lifetime: Duration) -> KerberosTicket {
        let issued_at = UNIX_EPOCH + Duration::from_secs(1_000_000);
        KerberosTicket {
            principal: PrincipalName::parse("svc@EXAMPLE.COM").unwrap(),
            kdcs: vec![],
            source: TicketSource::Keytab {
                path: PathBuf::from("/k"),
                kvno: 1,
            },
            enctype: 18,
            key: vec![0x42; 32],
            ticket: None,
            issued_at,
            expires_at: issued_at + lifetime,
            renew_until: None,
        }
    }

    #[test]
    fn test_ticket_validity_window() {
        let t = ticket(Duration::from_secs(3600));
        let start = t.issued_at;
        assert_eq!(t.lifetime(), Duration::from_secs(3600));
        assert!(!t.is_expired_at(start));
        assert!(t.is_expired_at(start + Duration::from_secs(3600)));
        assert_eq!(t.remaining_at(start + Duration::from_secs(4000)), Duration::ZERO);

        let margin = Duration::from_secs(300);
        assert!(!t.needs_refresh_at(start + Duration::from_secs(3000), margin));
        assert!(t.needs_refresh_at(start + Duration::from_secs(3300), margin));
    }

    #[test]
    fn test_default_margin_is_capped() {
        let auth = KerberosAuth::new(KerberosConfig::new("svc"));
        assert_eq!(auth.margin_for(&ticket(Duration::from_secs(600))), Duration::from_secs(60));
        assert_eq!(
            auth.margin_for(&ticket(Duration::from_secs(86_400))),
            MAX_DEFAULT_REFRESH_MARGIN
        );

        let auth = auth.with_refresh_margin(Duration::from_secs(1));
        assert_eq!(auth.margin_for(&ticket(Duration::from_secs(86_400))), Duration::from_secs(1));
    }

    #[test]
    fn test_ticket_debug_hides_key() {
        let debug = format!("{:?}", ticket(Duration::from_secs(60)));
        assert!(debug.contains("svc@EXAMPLE.COM"));
        assert!(!debug.contains("66, 66"));
    }
}
