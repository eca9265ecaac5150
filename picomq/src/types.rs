use bytes::Bytes;
use thiserror::Error;

/// Reasons an inbound datagram is rejected by the frame decoder.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram too short")]
    TooShort,
    #[error("datagram too long")]
    TooLong,
    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),
    #[error("topic is not NUL terminated")]
    UnterminatedTopic,
    #[error("topic is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite { written: usize, expected: usize },
    #[error("datagram of {len} bytes exceeds the frame size limit")]
    DatagramTooLarge { len: usize },
    #[error("datagram of {len} bytes is too short to be a frame")]
    DatagramTooShort { len: usize },
    #[error("failed to format payload")]
    Format(#[from] std::fmt::Error),
    #[error("multicast group has not been joined")]
    NotJoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn to_message(&self) -> Message {
        Message { topic: self.topic.to_string(), payload: Bytes::copy_from_slice(self.payload) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// What a single receive cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub delivered: usize,
    /// Datagrams dropped as our own or malformed.
    pub discarded: usize,
    /// The cycle ended early on a malformed frame or a transport failure.
    pub aborted: bool,
}
