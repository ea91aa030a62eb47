#![no_main]

use ldap_protocol::LdapMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = LdapMessage::decode(data) {
        // Anything we accept must survive re-encoding.
        let encoded = message.encode();
        let _ = LdapMessage::decode(&encoded);
    }
});
