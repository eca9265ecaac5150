#![no_main]
use libfuzzer_sys::fuzz_target;
use picomq::topic;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        for index in 0..8 {
            assert!(!topic::element_at(s, index).contains('/'));
        }
    }
});
