use crate::{
    types::{Frame, FrameError},
    MAGIC, MAX_DATAGRAM_LEN, MIN_DATAGRAM_LEN,
};

/// Decodes one datagram into a frame borrowing its topic and payload.
pub fn decode(datagram: &[u8]) -> Result<Frame<'_>, FrameError> {
    if datagram.len() <= MIN_DATAGRAM_LEN {
        return Err(FrameError::TooShort);
    }

    if datagram.len() >= MAX_DATAGRAM_LEN {
        return Err(FrameError::TooLong);
    }

    if datagram[0] != MAGIC {
        return Err(FrameError::BadMagic(datagram[0]));
    }

    let body = &datagram[1..];
    let topic_len = body.iter().position(|&b| b == b'\0').ok_or(FrameError::UnterminatedTopic)?;

    let topic = std::str::from_utf8(&body[..topic_len]).map_err(|_| FrameError::InvalidUtf8)?;
    let payload = &body[(topic_len + 1)..];

    Ok(Frame { topic, payload })
}
