#![no_main]
use libfuzzer_sys::fuzz_target;
use picomq::topic;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let mut parts = s.splitn(2, '\0');
        let filter = parts.next().unwrap_or("");
        let topic = parts.next().unwrap_or("");

        let _ = topic::matches(filter, topic);
        assert!(topic::matches(topic, topic) || topic.contains(|c| c == '+' || c == '#'));
    }
});
