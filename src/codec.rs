use bytes::{Buf, BytesMut};
use std::fmt;
use tracing::{debug, warn};

use crate::error::BikeError;

/// Frame start delimiter
pub const FRAME_START: u8 = b'<';

/// Frame end delimiter
pub const FRAME_END: u8 = b'>';

/// Longest fragment carried across reads while waiting for a `>`
pub const MAX_PENDING: usize = 1024;

/// One delimited protocol message, `<CODE[_DATA]>`
///
/// The text is normalized: exactly one leading `<`, one trailing `>`, and only
/// printable ASCII in between.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(String);

impl Frame {
    /// Build a frame from its inner payload, e.g. `"EQ_OK"`
    ///
    /// Delimiters and non-printable bytes in `payload` are stripped.
    /// Returns `None` if nothing is left.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let inner: String = payload
            .iter()
            .filter(|b| b.is_ascii_graphic() && **b != FRAME_START && **b != FRAME_END)
            .map(|&b| char::from(b))
            .collect();

        if inner.is_empty() {
            None
        } else {
            Some(Self(format!("<{inner}>")))
        }
    }

    /// Full frame text including delimiters
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Frame text without the delimiters
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.0[1..self.0.len() - 1]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits the raw byte stream of one connection into frames
///
/// Bytes are accumulated across reads. Everything up to each `>` becomes a
/// frame; whatever follows the last `>` is kept for the next read.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: BytesMut,
}

impl FrameCodec {
    /// Create an empty codec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from one read and return every frame they complete
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == FRAME_END) {
            let fragment = self.pending.split_to(end + 1);
            if let Some(frame) = Frame::from_payload(&fragment[..end]) {
                frames.push(frame);
            }
        }

        if self.pending.len() > MAX_PENDING {
            let err = BikeError::Frame(format!(
                "no frame end within {} bytes",
                self.pending.len()
            ));
            warn!("Dropping buffered bytes: {err}");
            self.pending.clear();
        }

        if !self.pending.is_empty() {
            debug!("Carrying {} byte(s) to next read", self.pending.len());
        }

        frames
    }

    /// Bytes waiting for a frame end
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.remaining()
    }

    /// Forget any partially received frame
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_frames_split() {
        let mut codec = FrameCodec::new();
        let frames = codec.push(b"<EQ_OK><ER_1-20>");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_str(), "<EQ_OK>");
        assert_eq!(frames[1].payload(), "ER_1-20");
        assert_eq!(codec.pending_len(), 0);
    }

    #[test]
    fn test_split_frame_carried_to_next_read() {
        let mut codec = FrameCodec::new();

        assert!(codec.push(b"<W6_0,224,0").is_empty());
        assert_eq!(codec.pending_len(), 11);

        let frames = codec.push(b"00,000,03,000000,000,00><EP_");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), "W6_0,224,000,000,03,000000,000,00");

        let frames = codec.push(b"SUPERWIGH>");
        assert_eq!(frames, vec![Frame("<EP_SUPERWIGH>".to_string())]);
    }

    #[test]
    fn test_noise_and_empty_fragments() {
        let mut codec = FrameCodec::new();
        let frames = codec.push(b"<EA_0A1B2C3D4E5F\r\n>>\r\n<<Ez_1E>");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload(), "EA_0A1B2C3D4E5F");
        assert_eq!(frames[1].payload(), "Ez_1E");
    }

    #[test]
    fn test_missing_start_delimiter_tolerated() {
        let mut codec = FrameCodec::new();
        let frames = codec.push(b"CP_OK>");
        assert_eq!(frames[0].as_str(), "<CP_OK>");
    }

    #[test]
    fn test_oversized_fragment_dropped() {
        let mut codec = FrameCodec::new();
        let junk = vec![b'x'; MAX_PENDING + 1];

        assert!(codec.push(&junk).is_empty());
        assert_eq!(codec.pending_len(), 0);

        let frames = codec.push(b"<EQ_OK>");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_from_payload_rejects_empty() {
        assert!(Frame::from_payload(b"").is_none());
        assert!(Frame::from_payload(b"\r\n<").is_none());
    }
}
