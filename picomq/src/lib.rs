use std::net::Ipv4Addr;

pub const TOPIC_SEPARATOR: u8 = b'/';
pub const MULTI_LEVEL_WILDCARD: u8 = b'#';
pub const SINGLE_LEVEL_WILDCARD: u8 = b'+';

/// First byte of every frame ('P').
pub const MAGIC: u8 = 0x50;

/// Frames must be strictly longer than this.
pub const MIN_DATAGRAM_LEN: usize = 2;
/// Frames must be strictly shorter than this.
pub const MAX_DATAGRAM_LEN: usize = 1500;

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 80);
pub const DEFAULT_PORT: u16 = 1880;
pub const DEFAULT_TTL: u8 = 1;

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod registry;
pub mod topic;
pub mod transport;
pub mod types;

pub use config::{Config, MalformedPolicy};
pub use engine::{PicoMq, Publish, MAX_DATAGRAMS_PER_POLL};
pub use transport::{MulticastTransport, UdpMulticast};
pub use types::{Frame, FrameError, Message, PollStats, TransportError};

#[cfg(feature = "codec")]
pub mod codec {
    use crate::{
        decoder, encoder,
        types::{FrameError, Message},
        MAX_DATAGRAM_LEN, MIN_DATAGRAM_LEN,
    };
    use bytes::BytesMut;
    use thiserror::Error;
    use tokio_util::codec::{Decoder, Encoder};

    #[derive(Debug, Error)]
    pub enum CodecError {
        #[error(transparent)]
        Frame(#[from] FrameError),
        #[error("message of {len} bytes exceeds the frame size limit")]
        DatagramTooLarge { len: usize },
        #[error("message of {len} bytes is too short to be a frame")]
        DatagramTooShort { len: usize },
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Datagram codec for use with `tokio_util::udp::UdpFramed`.
    ///
    /// Every buffer handed to `decode` is treated as exactly one datagram and is
    /// consumed whether or not it decodes.
    #[derive(Debug, Default)]
    pub struct PicoCodec;

    impl PicoCodec {
        pub fn new() -> Self {
            PicoCodec
        }
    }

    impl Decoder for PicoCodec {
        type Error = CodecError;
        type Item = Message;

        fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
            if buf.is_empty() {
                return Ok(None);
            }

            let datagram = buf.split();
            let frame = decoder::decode(&datagram)?;

            Ok(Some(frame.to_message()))
        }
    }

    impl Encoder<Message> for PicoCodec {
        type Error = CodecError;

        fn encode(&mut self, message: Message, bytes: &mut BytesMut) -> Result<(), Self::Error> {
            let len = encoder::encoded_len(&message.topic, &message.payload);

            if len <= MIN_DATAGRAM_LEN {
                return Err(CodecError::DatagramTooShort { len });
            }

            if len >= MAX_DATAGRAM_LEN {
                return Err(CodecError::DatagramTooLarge { len });
            }

            encoder::encode(&message.topic, &message.payload, bytes);
            Ok(())
        }
    }

}
