//! MIT keytab file format (version 0x0502).
//!
//! ```text
//! keytab   := 0x05 0x02 record*
//! record   := i32 size, entry | -size bytes of hole
//! entry    := u16 components, data realm, data component*, u32 name_type,
//!             u32 timestamp, u8 vno8, u16 enctype, data key, [u32 vno]
//! data     := u16 length, bytes
//! ```
//!
//! All integers are big-endian. Version 0x0501 used host byte order and is
//! rejected.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::principal::{NT_PRINCIPAL, PrincipalName};
use crate::error::AuthError;

const KEYTAB_MAGIC: u8 = 0x05;
const KEYTAB_V2: u8 = 0x02;

/// Encryption type numbers (RFC 3961 / RFC 8009).
pub mod enctype {
    /// aes128-cts-hmac-sha1-96
    pub const AES128_CTS_HMAC_SHA1_96: u16 = 17;
    /// aes256-cts-hmac-sha1-96
    pub const AES256_CTS_HMAC_SHA1_96: u16 = 18;
    /// aes128-cts-hmac-sha256-128
    pub const AES128_CTS_HMAC_SHA256_128: u16 = 19;
    /// aes256-cts-hmac-sha384-192
    pub const AES256_CTS_HMAC_SHA384_192: u16 = 20;
    /// rc4-hmac
    pub const RC4_HMAC: u16 = 23;

    /// Preference rank; higher is stronger.
    #[must_use]
    pub fn strength(enctype: u16) -> u8 {
        match enctype {
            AES256_CTS_HMAC_SHA384_192 => 5,
            AES256_CTS_HMAC_SHA1_96 => 4,
            AES128_CTS_HMAC_SHA256_128 => 3,
            AES128_CTS_HMAC_SHA1_96 => 2,
            RC4_HMAC => 1,
            _ => 0,
        }
    }
}

/// One key for one principal.
#[derive(Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    /// Principal the key belongs to.
    pub principal: PrincipalName,
    /// Principal name type.
    pub name_type: u32,
    /// Time the key was written (seconds since the epoch).
    pub timestamp: u32,
    /// Key version number.
    pub kvno: u32,
    /// Encryption type.
    pub enctype: u16,
    /// Raw key bytes.
    pub key: Vec<u8>,
}

impl fmt::Debug for KeytabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeytabEntry")
            .field("principal", &self.principal.to_string())
            .field("kvno", &self.kvno)
            .field("enctype", &self.enctype)
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

impl KeytabEntry {
    /// Create an entry with `KRB5_NT_PRINCIPAL` name type.
    pub fn new(principal: PrincipalName, kvno: u32, enctype: u16, key: impl Into<Vec<u8>>) -> Self {
        Self {
            principal,
            name_type: NT_PRINCIPAL,
            timestamp: 0,
            kvno,
            enctype,
            key: key.into(),
        }
    }

    fn decode(mut src: &[u8]) -> Result<Self, AuthError> {
        let count = get_u16(&mut src, "component count")?;
        let realm = get_string(&mut src, "realm")?;
        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            components.push(get_string(&mut src, "component")?);
        }
        let name_type = get_u32(&mut src, "name type")?;
        let timestamp = get_u32(&mut src, "timestamp")?;
        let vno8 = get_u8(&mut src, "key version")?;
        let enctype = get_u16(&mut src, "enctype")?;
        let key = get_data(&mut src, "key")?.to_vec();

        // Trailing 32-bit kvno overrides the 8-bit one when present and non-zero.
        let kvno = if src.remaining() >= 4 {
            match src.get_u32() {
                0 => u32::from(vno8),
                vno => vno,
            }
        } else {
            u32::from(vno8)
        };

        Ok(Self {
            principal: PrincipalName { components, realm },
            name_type,
            timestamp,
            kvno,
            enctype,
            key,
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.principal.components.len() as u16);
        put_data(dst, self.principal.realm.as_bytes());
        for component in &self.principal.components {
            put_data(dst, component.as_bytes());
        }
        dst.put_u32(self.name_type);
        dst.put_u32(self.timestamp);
        dst.put_u8(self.kvno.min(255) as u8);
        dst.put_u16(self.enctype);
        put_data(dst, &self.key);
        dst.put_u32(self.kvno);
    }
}

/// A parsed keytab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    /// Entries in file order.
    pub entries: Vec<KeytabEntry>,
}

impl Keytab {
    /// Create a keytab from entries.
    #[must_use]
    pub fn new(entries: Vec<KeytabEntry>) -> Self {
        Self { entries }
    }

    /// Decode keytab bytes.
    pub fn parse(mut src: &[u8]) -> Result<Self, AuthError> {
        if src.remaining() < 2 {
            return Err(AuthError::Keytab("file too short".into()));
        }
        let magic = src.get_u8();
        let version = src.get_u8();
        if magic != KEYTAB_MAGIC {
            return Err(AuthError::Keytab(format!("bad magic byte {magic:#04x}")));
        }
        if version != KEYTAB_V2 {
            return Err(AuthError::Keytab(format!(
                "unsupported keytab version {magic:#04x}{version:02x}"
            )));
        }

        let mut entries = Vec::new();
        while src.remaining() >= 4 {
            let size = src.get_i32();
            if size == 0 {
                break;
            }
            let len = size.unsigned_abs() as usize;
            if src.remaining() < len {
                return Err(AuthError::Keytab(format!(
                    "record of {len} bytes truncated at {} bytes",
                    src.remaining()
                )));
            }
            let (record, rest) = src.split_at(len);
            src = rest;

            // Negative sizes mark deleted entries.
            if size > 0 {
                entries.push(KeytabEntry::decode(record)?);
            }
        }

        Ok(Self { entries })
    }

    /// Encode as version 0x0502 keytab bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(2 + self.entries.len() * 64);
        dst.put_u8(KEYTAB_MAGIC);
        dst.put_u8(KEYTAB_V2);
        for entry in &self.entries {
            let mut record = BytesMut::new();
            entry.encode(&mut record);
            dst.put_i32(record.len() as i32);
            dst.put_slice(&record);
        }
        dst.freeze()
    }

    /// Entries whose principal matches exactly (components and realm).
    pub fn entries_for<'a>(
        &'a self,
        principal: &'a PrincipalName,
    ) -> impl Iterator<Item = &'a KeytabEntry> + 'a {
        self.entries.iter().filter(move |e| &e.principal == principal)
    }

    /// The key to use for `principal`: highest key version, then strongest enctype.
    #[must_use]
    pub fn best_entry_for(&self, principal: &PrincipalName) -> Option<&KeytabEntry> {
        self.entries
            .iter()
            .filter(|e| &e.principal == principal)
            .max_by_key(|e| (e.kvno, enctype::strength(e.enctype)))
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
    let len = get_u16(src, what)? as usize;
    ensure(src, len, what)?;
    let (data, rest) = src.split_at(len);
    *src = rest;
    Ok(data)
}

fn get_string(src: &mut &[u8], what: &str) -> Result<String, AuthError> {
    let data = get_data(src, what)?;
    String::from_utf8(data.to_vec())
        .map_err(|_| AuthError::Keytab(format!("{what} is not valid UTF-8")))
}

fn ensure(src: &[u8], needed: usize, what: &str) -> Result<(), AuthError> {
    if src.len() < needed {
        return Err(AuthError::Keytab(format!(
            "truncated {what}: need {needed} bytes, have {}",
            src.len()
        )));
    }
    Ok(())
}

fn put_data(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u16(data.len() as u16);
    dst.put_slice(data);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn principal(s: &str) -> PrincipalName {
        PrincipalName::parse(s).unwrap()
    }

    #[test]
    fn test_encode_then_parse_preserves_entries() {
        let keytab = Keytab::new(vec![
            KeytabEntry::new(principal("svc@EXAMPLE.COM"), 3, enctype::AES256_CTS_HMAC_SHA1_96, [7u8; 32]),
            KeytabEntry::new(principal("http/web@EXAMPLE.COM"), 1, enctype::RC4_HMAC, [1u8; 16]),
        ]);

        let parsed = Keytab::parse(&keytab.encode()).unwrap();
        assert_eq!(parsed, keytab);
    }

    #[test]
    fn test_best_entry_prefers_kvno_then_strength() {
        let p = principal("svc@EXAMPLE.COM");
        let keytab = Keytab::new(vec![
            KeytabEntry::new(p.clone(), 2, enctype::AES256_CTS_HMAC_SHA1_96, [1u8; 32]),
            KeytabEntry::new(p.clone(), 3, enctype::RC4_HMAC, [2u8; 16]),
            KeytabEntry::new(p.clone(), 3, enctype::AES128_CTS_HMAC_SHA1_96, [3u8; 16]),
            KeytabEntry::new(principal("svc@OTHER.COM"), 9, enctype::AES256_CTS_HMAC_SHA1_96, [4u8; 32]),
        ]);

        let best = keytab.best_entry_for(&p).unwrap();
        assert_eq!(best.kvno, 3);
        assert_eq!(best.enctype, enctype::AES128_CTS_HMAC_SHA1_96);
        assert!(keytab.best_entry_for(&principal("nobody@EXAMPLE.COM")).is_none());
    }

    #[test]
    fn test_holes_are_skipped() {
        let entry = KeytabEntry::new(principal("svc@EXAMPLE.COM"), 1, enctype::AES256_CTS_HMAC_SHA1_96, [9u8; 32]);
        let encoded = Keytab::new(vec![entry.clone()]).encode();

        let mut bytes = BytesMut::new();
        bytes.put_slice(&encoded[..2]);
        bytes.put_i32(-6);
        bytes.put_slice(&[0u8; 6]);
        bytes.put_slice(&encoded[2..]);

        let parsed = Keytab::parse(&bytes).unwrap();
        assert_eq!(parsed.entries, vec![entry]);
    }

    #[test]
    fn test_short_kvno_used_without_trailer() {
        let mut record = BytesMut::new();
        record.put_u16(1);
        put_data(&mut record, b"EXAMPLE.COM");
        put_data(&mut record, b"svc");
        record.put_u32(NT_PRINCIPAL);
        record.put_u32(0);
        record.put_u8(5);
        record.put_u16(enctype::AES128_CTS_HMAC_SHA1_96);
        put_data(&mut record, &[0u8; 16]);

        let mut bytes = BytesMut::new();
        bytes.put_u8(KEYTAB_MAGIC);
        bytes.put_u8(KEYTAB_V2);
        bytes.put_i32(record.len() as i32);
        bytes.put_slice(&record);

        let parsed = Keytab::parse(&bytes).unwrap();
        assert_eq!(parsed.entries[0].kvno, 5);
    }

    #[test]
    fn test_rejects_bad_headers_and_truncation() {
        assert!(Keytab::parse(&[]).is_err());
        assert!(Keytab::parse(&[0x04, 0x02]).is_err());
        assert!(Keytab::parse(&[0x05, 0x01]).is_err());
        assert!(Keytab::parse(b"not a keytab at all").is_err());

        let encoded = Keytab::new(vec![KeytabEntry::new(
            principal("svc@EXAMPLE.COM"),
            1,
            enctype::AES256_CTS_HMAC_SHA1_96,
            [0u8; 32],
        )])
        .encode();
        assert!(Keytab::parse(&encoded[..encoded.len() - 10]).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let entry = KeytabEntry::new(principal("svc@EXAMPLE.COM"), 1, 18, vec![0xAB; 4]);
        let debug = format!("{entry:?}");
        assert!(debug.contains("key_len: 4"));
        assert!(!debug.contains("171"));
    }
}
