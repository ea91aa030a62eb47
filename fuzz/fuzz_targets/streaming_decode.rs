#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use ldapkit_codec::LdapCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

#[derive(Debug, Arbitrary)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Feed the frames in arbitrary chunks, as they would arrive from TCP.
    let mut codec = LdapCodec::new();
    let mut buf = BytesMut::new();
    for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
