//! Framing: one tag character + UTF-8 body. No length prefix; the transport payload is the frame.

use crate::protocol::{ApplicationMessage, PAGE_TAG, URL_TAG};

/// Encode a message into a single payload: tag character followed by the body.
pub fn encode_message(msg: &ApplicationMessage) -> Vec<u8> {
    let body = msg.body();
    let mut out = String::with_capacity(1 + body.len());
    out.push(msg.tag());
    out.push_str(body);
    out.into_bytes()
}

/// Decode one payload into a message. The whole slice is the message.
pub fn decode_message(bytes: &[u8]) -> Result<ApplicationMessage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    let mut chars = text.chars();
    let tag = chars.next().ok_or(DecodeError::Empty)?;
    let body = chars.as_str();
    match tag {
        URL_TAG | PAGE_TAG if body.is_empty() => Err(DecodeError::MissingBody(tag)),
        URL_TAG => Ok(ApplicationMessage::Url(body.to_string())),
        PAGE_TAG => Ok(ApplicationMessage::Page(body.to_string())),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

/// Error decoding a received payload. Non-fatal: the link stays up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("message with tag '{0}' has no body")]
    MissingBody(char),
    #[error("unrecognized message tag '{0}'")]
    UnknownTag(char),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PayloadKind, MAX_BYTES_PAYLOAD};
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    #[test]
    fn roundtrip_url() {
        let msg = ApplicationMessage::Url("https://example.com".into());
        assert_eq!(decode_message(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn roundtrip_page() {
        let msg = ApplicationMessage::Page("<html></html>".into());
        assert_eq!(decode_message(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn encoding_is_tag_then_body() {
        let frame = encode_message(&ApplicationMessage::Url("https://x.test".into()));
        assert_eq!(frame, b"Uhttps://x.test");
        let frame = encode_message(&ApplicationMessage::Page("<p>hi</p>".into()));
        assert_eq!(frame, b"H<p>hi</p>");
    }

    #[test]
    fn empty_is_rejected() {
        assert_eq!(decode_message(b""), Err(DecodeError::Empty));
    }

    #[test]
    fn lone_tag_is_rejected() {
        assert_eq!(decode_message(b"U"), Err(DecodeError::MissingBody('U')));
        assert_eq!(decode_message(b"H"), Err(DecodeError::MissingBody('H')));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            decode_message(b"Xsomething"),
            Err(DecodeError::UnknownTag('X'))
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert_eq!(
            decode_message(&[b'U', 0xff, 0xfe]),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn multibyte_body_survives() {
        let msg = ApplicationMessage::Page("<p>héllo, 世界</p>".into());
        assert_eq!(decode_message(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn page_larger_than_bounded_transfer() {
        let html: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MAX_BYTES_PAYLOAD * 3)
            .map(char::from)
            .collect();
        let msg = ApplicationMessage::Page(html);
        let frame = encode_message(&msg);
        assert_eq!(PayloadKind::for_len(frame.len()), PayloadKind::Stream);
        assert_eq!(decode_message(&frame).unwrap(), msg);
    }
}
