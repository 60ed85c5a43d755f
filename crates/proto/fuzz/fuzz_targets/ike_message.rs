#![no_main]

use libfuzzer_sys::fuzz_target;
use tngf_proto::ipsec::ikev2::message::{IkeHeader, IkeMessage};

fuzz_target!(|data: &[u8]| {
    // Malformed input is expected; only panics are of interest
    let _ = IkeHeader::from_bytes(data);

    if let Ok(message) = IkeMessage::decode(data) {
        let encoded = message.encode();
        let _ = IkeMessage::decode(&encoded);
    }
});
