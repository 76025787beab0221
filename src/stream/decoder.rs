//! Incremental decoding of `data: <json>` frame lines.
//!
//! Transport chunks arrive at arbitrary byte boundaries, including mid-line
//! and mid-UTF-8. The decoder carries incomplete trailing bytes from one
//! chunk to the next, so feeding the same byte sequence split at any boundary
//! yields the identical frame sequence.

use tracing::debug;

use crate::stream::proto::StreamFrame;

/// Wire prefix that marks a frame-bearing line.
const FRAME_PREFIX: &[u8] = b"data: ";

/// Byte-level line splitter with carry-over.
///
/// `feed` returns the payload of every complete `data: `-prefixed line in the
/// input so far, with the prefix stripped. Bytes after the last newline are
/// held back until a later chunk completes the line. Blank lines and lines
/// without the prefix are dropped.
#[derive(Debug, Default)]
pub(crate) struct DataLineBuffer {
    buf: Vec<u8>,
}

impl DataLineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(payload) = line.strip_prefix(FRAME_PREFIX) {
                payloads.push(payload.to_vec());
            }
        }
        payloads
    }
}

/// Turns raw response-body chunks into decoded [`StreamFrame`]s.
///
/// Protocol errors are non-fatal: a line whose payload fails to parse is
/// skipped and the stream continues. Each turn uses a fresh decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: DataLineBuffer,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.lines
            .feed(chunk)
            .into_iter()
            .filter_map(|payload| match serde_json::from_slice(&payload) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    debug!(error = %err, "skipping unparseable frame line");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::proto::{CompletePayload, TokenPayload};

    const TWO_FRAMES: &[u8] = b"data: {\"event_type\":\"token\",\"data\":{\"text\":\"Hi\"}}\n\ndata: {\"event_type\":\"complete\",\"data\":{\"message_id\":\"m1\",\"session_id\":\"s1\",\"duration_ms\":120}}\n\n";

    fn expected_two_frames() -> Vec<StreamFrame> {
        vec![
            StreamFrame::Token(TokenPayload {
                text: "Hi".to_string(),
            }),
            StreamFrame::Complete(CompletePayload {
                message_id: "m1".to_string(),
                session_id: "s1".to_string(),
                duration_ms: 120,
            }),
        ]
    }

    #[test]
    fn decodes_token_then_complete_in_order() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(TWO_FRAMES), expected_two_frames());
    }

    #[test]
    fn any_chunk_boundary_yields_identical_frames() {
        for split in 0..=TWO_FRAMES.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.feed(&TWO_FRAMES[..split]);
            frames.extend(decoder.feed(&TWO_FRAMES[split..]));
            assert_eq!(frames, expected_two_frames(), "split at byte {split}");
        }
    }

    #[test]
    fn one_byte_at_a_time_yields_identical_frames() {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in TWO_FRAMES {
            frames.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(frames, expected_two_frames());
    }

    #[test]
    fn split_inside_multibyte_character_survives() {
        let input = "data: {\"event_type\":\"token\",\"data\":{\"text\":\"héllo\"}}\n".as_bytes();
        // Split in the middle of the two-byte 'é'.
        let split = input.iter().position(|&b| b == 0xc3).expect("utf8 lead byte") + 1;
        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.feed(&input[..split]);
        frames.extend(decoder.feed(&input[split..]));
        assert_eq!(
            frames,
            vec![StreamFrame::Token(TokenPayload {
                text: "héllo".to_string()
            })]
        );
    }

    #[test]
    fn malformed_line_between_valid_frames_is_skipped() {
        let input = b"data: {\"event_type\":\"token\",\"data\":{\"text\":\"a\"}}\n\ndata: {not-json\n\ndata: {\"event_type\":\"token\",\"data\":{\"text\":\"b\"}}\n\n";
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(input);
        assert_eq!(
            frames,
            vec![
                StreamFrame::Token(TokenPayload {
                    text: "a".to_string()
                }),
                StreamFrame::Token(TokenPayload {
                    text: "b".to_string()
                }),
            ]
        );
    }

    #[test]
    fn lines_without_frame_prefix_are_ignored() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(
            b"event: ping\n: comment\ndata: {\"event_type\":\"token\",\"data\":{\"text\":\"x\"}}\n",
        );
        assert_eq!(
            frames,
            vec![StreamFrame::Token(TokenPayload {
                text: "x".to_string()
            })]
        );
    }

    #[test]
    fn unknown_event_type_is_dropped_without_stopping_the_stream() {
        let input = b"data: {\"event_type\":\"telemetry\",\"data\":{}}\ndata: {\"event_type\":\"token\",\"data\":{\"text\":\"y\"}}\n";
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.feed(input),
            vec![StreamFrame::Token(TokenPayload {
                text: "y".to_string()
            })]
        );
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: {\"event_type\":\"token\",\"data\":{\"text\":\"z\"}}\r\n\r\n");
        assert_eq!(
            frames,
            vec![StreamFrame::Token(TokenPayload {
                text: "z".to_string()
            })]
        );
    }

    #[test]
    fn incomplete_trailing_line_is_held_back() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .feed(b"data: {\"event_type\":\"token\",\"data\":{\"text\":\"held\"")
            .is_empty());
        assert_eq!(
            decoder.feed(b"}}\n"),
            vec![StreamFrame::Token(TokenPayload {
                text: "held".to_string()
            })]
        );
    }
}
