//! Fuzz the krb5.conf parser and the lookups run on its result.

#![no_main]

use authpool_auth::kerberos::Krb5Conf;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    if let Ok(conf) = Krb5Conf::parse(text) {
        let _ = conf.ticket_lifetime();
        let _ = conf.renew_lifetime();
        if let Some(realm) = conf.default_realm() {
            let _ = conf.realm(realm);
        }
        let _ = conf.realm_for_host("db01.example.com");
    }
});
