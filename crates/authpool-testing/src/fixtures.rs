//! On-disk Kerberos material for tests.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use authpool_auth::KerberosConfig;
use authpool_auth::kerberos::keytab::enctype;
use authpool_auth::kerberos::{
    CachedCredential, CredentialCache, Keytab, KeytabEntry, PrincipalName,
};
use tempfile::TempDir;

/// Realm used by every fixture.
pub const REALM: &str = "EXAMPLE.COM";

/// Service principal used by every fixture, without realm.
pub const SERVICE_PRINCIPAL: &str = "svc_reports";

/// A realm configuration with one realm and two KDCs.
pub const KRB5_CONF: &str = "\
[libdefaults]
    default_realm = EXAMPLE.COM
    ticket_lifetime = 10h
    renew_lifetime = 7d
    dns_lookup_kdc = false

[realms]
    EXAMPLE.COM = {
        kdc = kdc1.example.com:88
        kdc = kdc2.example.com:88
        admin_server = kdc1.example.com
    }

[domain_realm]
    .example.com = EXAMPLE.COM
";

/// A temporary directory holding `krb5.conf` and a keytab for
/// [`SERVICE_PRINCIPAL`].
///
/// Removed when dropped.
#[derive(Debug)]
pub struct KerberosFixture {
    dir: TempDir,
    krb5_conf: PathBuf,
    keytab: PathBuf,
}

impl KerberosFixture {
    /// Write a valid realm configuration and keytab.
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let krb5_conf = dir.path().join("krb5.conf");
        std::fs::write(&krb5_conf, KRB5_CONF)?;
        let keytab = dir.path().join("svc_reports.keytab");
        std::fs::write(&keytab, service_keytab(1)?)?;
        Ok(Self {
            dir,
            krb5_conf,
            keytab,
        })
    }

    /// Keytab-based configuration for [`SERVICE_PRINCIPAL`].
    #[must_use]
    pub fn config(&self) -> KerberosConfig {
        KerberosConfig::new(SERVICE_PRINCIPAL)
            .krb5_conf(&self.krb5_conf)
            .keytab(&self.keytab)
    }

    /// Configuration that adopts the credential cache at `ccache`.
    #[must_use]
    pub fn ccache_config(&self, ccache: &Path) -> KerberosConfig {
        KerberosConfig::new(SERVICE_PRINCIPAL)
            .krb5_conf(&self.krb5_conf)
            .ticket_cache(ccache)
    }

    /// Directory the fixture lives in.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the realm configuration.
    #[must_use]
    pub fn krb5_conf_path(&self) -> &Path {
        &self.krb5_conf
    }

    /// Path of the keytab.
    #[must_use]
    pub fn keytab_path(&self) -> &Path {
        &self.keytab
    }

    /// Replace the keytab with bytes that do not parse.
    pub fn corrupt_keytab(&self) -> io::Result<()> {
        std::fs::write(&self.keytab, b"definitely not a keytab")
    }

    /// Replace the keytab with one at key version `kvno`.
    pub fn rotate_keytab(&self, kvno: u32) -> io::Result<()> {
        std::fs::write(&self.keytab, service_keytab(kvno)?)
    }

    /// Write a credential cache holding a TGT for [`SERVICE_PRINCIPAL`] that
    /// ends `valid_for_secs` from now (negative for already expired).
    pub fn write_ccache(&self, name: &str, valid_for_secs: i64) -> io::Result<PathBuf> {
        let client = principal(&format!("{SERVICE_PRINCIPAL}@{REALM}"))?;
        let server = principal(&format!("krbtgt/{REALM}@{REALM}"))?;
        let endtime = epoch_secs(valid_for_secs)?;
        let cache = CredentialCache::new(
            client.clone(),
            vec![CachedCredential {
                client,
                server,
                enctype: enctype::AES256_CTS_HMAC_SHA1_96,
                session_key: vec![0x5A; 32],
                authtime: epoch_secs(-60)?,
                starttime: epoch_secs(-60)?,
                endtime,
                renew_till: endtime.saturating_add(86_400),
                flags: 0,
                ticket: vec![0x61, 0x03, 0x02, 0x01, 0x05],
            }],
        );

        let path = self.dir.path().join(name);
        std::fs::write(&path, cache.encode())?;
        Ok(path)
    }
}

fn service_keytab(kvno: u32) -> io::Result<Vec<u8>> {
    let keytab = Keytab::new(vec![KeytabEntry::new(
        principal(&format!("{SERVICE_PRINCIPAL}@{REALM}"))?,
        kvno,
        enctype::AES256_CTS_HMAC_SHA1_96,
        vec![kvno as u8; 32],
    )]);
    Ok(keytab.encode().to_vec())
}

fn principal(s: &str) -> io::Result<PrincipalName> {
    PrincipalName::parse(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn epoch_secs(offset: i64) -> io::Result<u32> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(io::Error::other)?
        .as_secs() as i64;
    u32::try_from(now + offset).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
