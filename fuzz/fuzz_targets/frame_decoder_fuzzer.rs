#![no_main]
use libfuzzer_sys::fuzz_target;

use bytes::BytesMut;
use picomq::{decoder, encoder};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = decoder::decode(data) {
        // Anything that decodes must encode back to the same bytes.
        let mut bytes = BytesMut::new();
        encoder::encode(frame.topic, frame.payload, &mut bytes);
        assert_eq!(&bytes[..], data);
    }
});
