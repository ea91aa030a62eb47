#![no_main]

use ldapkit_client::ConnectionConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ConnectionConfig::from_properties(s);
    }
});
