#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use ldap_protocol::control::oid;
use ldap_protocol::{Control, ControlRegistry, RawControl};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct ControlInput {
    which: u8,
    critical: bool,
    value: Option<Vec<u8>>,
}

const OIDS: [&str; 3] = [oid::PAGED_RESULTS, oid::PASSWORD_POLICY, oid::SORT_RESPONSE];

fuzz_target!(|input: ControlInput| {
    let registry = ControlRegistry::with_defaults();
    let raw = RawControl::new(
        OIDS[usize::from(input.which) % OIDS.len()],
        input.critical,
        input.value.map(Bytes::from),
    );
    if let Ok(control) = registry.decode(&raw, None) {
        // Controls with a request codec must encode again.
        if registry.supports_request(control.oid()) {
            let _ = registry.encode(control.as_ref());
        }
    }
});
