pub mod binary;
pub mod text;

pub use binary::{BinaryDecoder, BinaryPacket};
pub use text::{encode_text_packet, TextDecoder, ARKIT_BLENDSHAPES};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Well-known UDP port for the text stream
pub const TEXT_PORT: u16 = 49983;

/// Well-known UDP port for the binary stream
pub const BINARY_PORT: u16 = 49985;

/// Why a datagram was dropped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("expected 2 '=' segments, found {0}")]
    SegmentCount(usize),

    #[error("malformed blend shape pair '{0}'")]
    MalformedPair(String),

    #[error("non-numeric field '{0}'")]
    NotNumeric(String),

    #[error("expected {expected} transform floats, found {found}")]
    FloatCount { expected: usize, found: usize },

    #[error("expected {expected} bytes, found {found}")]
    Length { expected: usize, found: usize },

    #[error("non-finite float at index {0}")]
    NonFinite(usize),
}

/// Turns one raw datagram into a fixed-length motion vector
///
/// Every datagram is decoded independently; a failure drops only that
/// datagram.
pub trait PacketDecoder: Send + Sync {
    fn decode(&self, datagram: &[u8]) -> Result<Vec<f32>, DecodeError>;

    /// Length of every vector this decoder produces
    fn frame_len(&self) -> usize;
}

/// Wire encoding selected per stream
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Text,
    Binary,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Text => TEXT_PORT,
            Protocol::Binary => BINARY_PORT,
        }
    }

    /// Build a decoder; `blendshapes` and `transform_len` only affect text
    pub fn decoder(self, blendshapes: Vec<String>, transform_len: usize) -> Arc<dyn PacketDecoder> {
        match self {
            Protocol::Text => Arc::new(TextDecoder::new(blendshapes, transform_len)),
            Protocol::Binary => Arc::new(BinaryDecoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parses_lowercase() {
        let protocol: Protocol = serde_json::from_str("\"binary\"").unwrap();
        assert_eq!(protocol, Protocol::Binary);
        assert_eq!(protocol.default_port(), BINARY_PORT);
    }

    #[test]
    fn test_decoder_frame_lengths() {
        let text = Protocol::Text.decoder(vec!["a".into(), "b".into()], 12);
        assert_eq!(text.frame_len(), 14);

        let binary = Protocol::Binary.decoder(Vec::new(), 12);
        assert_eq!(binary.frame_len(), binary::FLOAT_COUNT);
    }
}
