#![no_main]

use ldap_protocol::Filter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(filter) = Filter::parse(s) {
            // The canonical string form must parse back to the same filter.
            let printed = filter.to_string();
            let reparsed = Filter::parse(&printed);
            assert_eq!(reparsed.ok(), Some(filter));
        }
    }
});
