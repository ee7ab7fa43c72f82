//! MIT credential cache file format (versions 0x0503 and 0x0504).
//!
//! Only what the provider needs is kept: the default principal and, per
//! credential, the client/server principals, validity times, and the ticket.
//! Versions 1 and 2 used host byte order and are rejected.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::principal::{NT_PRINCIPAL, PrincipalName};
use crate::error::AuthError;

const CCACHE_V3: u16 = 0x0503;
const CCACHE_V4: u16 = 0x0504;

/// Realm used by MIT for cache configuration entries.
const CONF_REALM: &str = "X-CACHECONF:";

/// One cached credential.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedCredential {
    /// Client principal.
    pub client: PrincipalName,
    /// Service principal the ticket is for.
    pub server: PrincipalName,
    /// Session key encryption type.
    pub enctype: u16,
    /// Session key.
    pub session_key: Vec<u8>,
    /// Authentication time (seconds since the epoch).
    pub authtime: u32,
    /// Start of validity.
    pub starttime: u32,
    /// End of validity.
    pub endtime: u32,
    /// Renewable until.
    pub renew_till: u32,
    /// Ticket flags.
    pub flags: u32,
    /// Encoded ticket.
    pub ticket: Vec<u8>,
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("client", &self.client.to_string())
            .field("server", &self.server.to_string())
            .field("starttime", &self.starttime)
            .field("endtime", &self.endtime)
            .field("renew_till", &self.renew_till)
            .finish_non_exhaustive()
    }
}

impl CachedCredential {
    /// Whether this is a ticket-granting ticket (`krbtgt/REALM@REALM`).
    #[must_use]
    pub fn is_tgt(&self) -> bool {
        self.server.components.len() == 2 && self.server.components[0] == "krbtgt"
    }

    fn is_config_entry(&self) -> bool {
        self.server.realm == CONF_REALM
    }
}

/// A parsed credential cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCache {
    /// File format version.
    pub version: u16,
    /// Principal the cache belongs to.
    pub default_principal: PrincipalName,
    /// Cached credentials in file order (configuration entries excluded).
    pub credentials: Vec<CachedCredential>,
}

impl CredentialCache {
    /// Create a version 4 cache.
    #[must_use]
    pub fn new(default_principal: PrincipalName, credentials: Vec<CachedCredential>) -> Self {
        Self {
            version: CCACHE_V4,
            default_principal,
            credentials,
        }
    }

    /// Decode credential cache bytes.
    pub fn parse(mut src: &[u8]) -> Result<Self, AuthError> {
        let version = get_u16(&mut src, "version")?;
        match version {
            CCACHE_V4 => {
                let header_len = get_u16(&mut src, "header length")? as usize;
                ensure(src, header_len, "header")?;
                src.advance(header_len);
            }
            CCACHE_V3 => {}
            other => {
                return Err(AuthError::CredentialCache(format!(
                    "unsupported credential cache version {other:#06x}"
                )));
            }
        }

        let default_principal = get_principal(&mut src)?;

        let mut credentials = Vec::new();
        while src.has_remaining() {
            let credential = get_credential(&mut src, version)?;
            if !credential.is_config_entry() {
                credentials.push(credential);
            }
        }

        Ok(Self {
            version,
            default_principal,
            credentials,
        })
    }

    /// Encode as a version 4 cache with an empty header.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(256);
        dst.put_u16(CCACHE_V4);
        dst.put_u16(0);
        put_principal(&mut dst, &self.default_principal);
        for c in &self.credentials {
            put_principal(&mut dst, &c.client);
            put_principal(&mut dst, &c.server);
            dst.put_u16(c.enctype);
            put_data(&mut dst, &c.session_key);
            dst.put_u32(c.authtime);
            dst.put_u32(c.starttime);
            dst.put_u32(c.endtime);
            dst.put_u32(c.renew_till);
            dst.put_u8(0);
            dst.put_u32(c.flags);
            dst.put_u32(0); // addresses
            dst.put_u32(0); // authdata
            put_data(&mut dst, &c.ticket);
            put_data(&mut dst, &[]);
        }
        dst.freeze()
    }

    /// The ticket-granting ticket for the default principal, if cached.
    ///
    /// When several are present the one valid longest wins.
    #[must_use]
    pub fn tgt(&self) -> Option<&CachedCredential> {
        self.credentials
            .iter()
            .filter(|c| c.is_tgt() && c.client == self.default_principal)
            .max_by_key(|c| c.endtime)
    }
}

fn get_credential(src: &mut &[u8], version: u16) -> Result<CachedCredential, AuthError> {
    let client = get_principal(src)?;
    let server = get_principal(src)?;

    let enctype = get_u16(src, "key enctype")?;
    if version == CCACHE_V3 {
        // v3 repeats the enctype.
        get_u16(src, "key enctype")?;
    }
    let session_key = get_data(src, "session key")?.to_vec();

    let authtime = get_u32(src, "authtime")?;
    let starttime = get_u32(src, "starttime")?;
    let endtime = get_u32(src, "endtime")?;
    let renew_till = get_u32(src, "renew_till")?;
    get_u8(src, "is_skey")?;
    let flags = get_u32(src, "ticket flags")?;

    let addresses = get_u32(src, "address count")?;
    for _ in 0..addresses {
        get_u16(src, "address type")?;
        get_data(src, "address")?;
    }
    let authdata = get_u32(src, "authdata count")?;
    for _ in 0..authdata {
        get_u16(src, "authdata type")?;
        get_data(src, "authdata")?;
    }

    let ticket = get_data(src, "ticket")?.to_vec();
    get_data(src, "second ticket")?;

    Ok(CachedCredential {
        client,
        server,
        enctype,
        session_key,
        authtime,
        starttime,
        endtime,
        renew_till,
        flags,
        ticket,
    })
}

fn get_principal(src: &mut &[u8]) -> Result<PrincipalName, AuthError> {
    let _name_type = get_u32(src, "name type")?;
    let count = get_u32(src, "component count")?;
    let realm = get_string(src, "realm")?;
    // Each component needs at least its length prefix.
    ensure(src, (count as usize).saturating_mul(4), "components")?;
    let mut components = Vec::with_capacity(count as usize);
    for _ in 0..count {
        components.push(get_string(src, "component")?);
    }
    Ok(PrincipalName { components, realm })
}

fn put_principal(dst: &mut BytesMut, principal: &PrincipalName) {
    dst.put_u32(NT_PRINCIPAL);
    dst.put_u32(principal.components.len() as u32);
    put_data(dst, principal.realm.as_bytes());
    for component in &principal.components {
        put_data(dst, component.as_bytes());
    }
}

fn get_u8(src: &mut &[u8], what: &str) -> Result<u8, AuthError> {
    ensure(src, 1, what)?;
    Ok(src.get_u8())
}

fn get_u16(src: &mut &[u8], what: &str) -> Result<u16, AuthError> {
    ensure(src, 2, what)?;
    Ok(src.get_u16())
}

fn get_u32(src: &mut &[u8], what: &str) -> Result<u32, AuthError> {
    ensure(src, 4, what)?;
    Ok(src.get_u32())
}

fn get_data<'a>(src: &mut &'a [u8], what: &str) -> Result<&'a [u8], AuthError> {
    let len = get_u32(src, what)? as usize;
    ensure(src, len, what)?;
    let (data, rest) = src.split_at(len);
    *src = rest;
    Ok(data)
}

fn get_string(src: &mut &[u8], what: &str) -> Result<String, AuthError> {
    let data = get_data(src, what)?;
    String::from_utf8(data.to_vec())
        .map_err(|_| AuthError::CredentialCache(format!("{what} is not valid UTF-8")))
}

fn put_data(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32(data.len() as u32);
    dst.put_slice(data);
}

fn ensure(src: &[u8], needed: usize, what: &str) -> Result<(), AuthError> {
    if src.len() < needed {
        return Err(AuthError::CredentialCache(format!(
            "truncated {what}: need {needed} bytes, have {}",
            src.len()
        )));
    }
    Ok(())
}
