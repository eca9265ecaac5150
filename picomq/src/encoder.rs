use crate::MAGIC;
use bytes::{BufMut, BytesMut};

/// Writes the frame header: the magic byte, the topic and its NUL terminator.
///
/// The topic must not contain a NUL byte, receivers would cut it short.
pub fn encode_header(topic: &str, bytes: &mut BytesMut) {
    debug_assert!(!topic.contains('\0'), "topic contains a NUL byte");

    bytes.reserve(topic.len() + 2);
    bytes.put_u8(MAGIC);
    bytes.put_slice(topic.as_bytes());
    bytes.put_u8(b'\0');
}

/// Encodes a complete frame. There is no length prefix, the datagram boundary
/// delimits the payload.
pub fn encode(topic: &str, payload: &[u8], bytes: &mut BytesMut) {
    encode_header(topic, bytes);
    bytes.put_slice(payload);
}

/// Size of the datagram `encode` produces.
pub fn encoded_len(topic: &str, payload: &[u8]) -> usize {
    topic.len() + payload.len() + 2
}
