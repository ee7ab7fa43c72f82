//! Fuzz the keytab reader. Whatever parses must survive re-encoding.

#![no_main]

use authpool_auth::kerberos::Keytab;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(keytab) = Keytab::parse(data) {
        let encoded = keytab.encode();
        assert!(Keytab::parse(&encoded).is_ok());
    }
});
