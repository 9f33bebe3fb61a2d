//! Application messages exchanged once a link is ready: a URL or a serialized page.

use serde::{Deserialize, Serialize};

/// Tag character for [`ApplicationMessage::Url`].
pub const URL_TAG: char = 'U';
/// Tag character for [`ApplicationMessage::Page`].
pub const PAGE_TAG: char = 'H';

/// Largest payload a transport should send as one bounded transfer (32 KiB).
/// Bigger payloads are streamed; the encoding itself has no size limit.
pub const MAX_BYTES_PAYLOAD: usize = 32 * 1024;

/// Logical payload shared between peers. Receivers hand it to the UI for
/// confirmation before acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationMessage {
    /// A browsable URL.
    Url(String),
    /// A serialized HTML document.
    Page(String),
}

impl ApplicationMessage {
    pub fn tag(&self) -> char {
        match self {
            ApplicationMessage::Url(_) => URL_TAG,
            ApplicationMessage::Page(_) => PAGE_TAG,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            ApplicationMessage::Url(s) | ApplicationMessage::Page(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApplicationMessage::Url(_) => "url",
            ApplicationMessage::Page(_) => "page",
        }
    }
}

/// How a transport should move a payload of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Single bounded transfer.
    Bytes,
    /// Streamed transfer.
    Stream,
}

impl PayloadKind {
    pub fn for_len(len: usize) -> Self {
        if len <= MAX_BYTES_PAYLOAD {
            PayloadKind::Bytes
        } else {
            PayloadKind::Stream
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_variants() {
        assert_eq!(ApplicationMessage::Url("u".into()).tag(), 'U');
        assert_eq!(ApplicationMessage::Page("p".into()).tag(), 'H');
    }

    #[test]
    fn payload_kind_boundary() {
        assert_eq!(PayloadKind::for_len(0), PayloadKind::Bytes);
        assert_eq!(PayloadKind::for_len(MAX_BYTES_PAYLOAD), PayloadKind::Bytes);
        assert_eq!(PayloadKind::for_len(MAX_BYTES_PAYLOAD + 1), PayloadKind::Stream);
    }
}
