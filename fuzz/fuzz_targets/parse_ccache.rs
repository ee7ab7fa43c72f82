//! Fuzz the credential cache reader.

#![no_main]

use authpool_auth::kerberos::CredentialCache;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(cache) = CredentialCache::parse(data) {
        let _ = cache.tgt();
        let encoded = cache.encode();
        assert!(CredentialCache::parse(&encoded).is_ok());
    }
});
