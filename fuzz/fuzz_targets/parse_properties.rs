//! Fuzz the properties reader and the configuration binding on top of it.

#![no_main]

use arbitrary::Arbitrary;
use authpool::{PoolConfig, properties};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    datasource: &'a str,
    text: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let _ = properties::parse(input.text);
    if let Ok(config) = PoolConfig::from_properties(input.text, input.datasource) {
        assert!(config.validate().is_ok());
    }
});
