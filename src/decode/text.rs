//! Plain-text stub decoding.
//!
//! Synthetic streams embed their visible codes as a newline-separated text
//! payload at the start of the luma plane, behind a short magic prefix.
//! `TextDecoder` parses that payload back out. Anything without the prefix
//! (every real camera frame) decodes to the empty set, so the stub path is
//! inert in production.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::ingest::Frame;
use crate::Code;

const MAGIC: &[u8] = b"CODES\n";

/// Build a frame whose luma plane carries the given codes as text.
///
/// Used by synthetic streams and by tests that script exact frame
/// sequences.
pub fn text_frame(codes: &[&str], width: u32, height: u32) -> Frame {
    let mut luma = vec![0u8; (width as usize) * (height as usize)];
    let mut payload = Vec::from(MAGIC);
    for code in codes {
        payload.extend_from_slice(code.as_bytes());
        payload.push(b'\n');
    }
    let len = payload.len().min(luma.len());
    luma[..len].copy_from_slice(&payload[..len]);
    Frame {
        luma,
        width,
        height,
    }
}

/// Decoder for text-payload frames.
pub struct TextDecoder;

impl TextDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Decoder for TextDecoder {
    fn decode(&self, frame: &Frame) -> Result<BTreeSet<Code>> {
        let mut codes = BTreeSet::new();
        let Some(rest) = frame.luma.strip_prefix(MAGIC) else {
            return Ok(codes);
        };
        let text_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..text_end]);
        for line in text.lines() {
            let code = line.trim();
            if !code.is_empty() {
                codes.insert(code.to_string());
            }
        }
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;

    #[test]
    fn round_trips_codes_through_a_frame() {
        let frame = text_frame(&["789100012345", "789100067890"], 64, 64);
        let codes = TextDecoder::new().decode(&frame).expect("decode");
        assert_eq!(codes.len(), 2);
        assert!(codes.contains("789100012345"));
        assert!(codes.contains("789100067890"));
    }

    #[test]
    fn duplicate_payload_lines_collapse() {
        let frame = text_frame(&["789100012345", "789100012345"], 64, 64);
        let codes = TextDecoder::new().decode(&frame).expect("decode");
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn frames_without_magic_decode_to_nothing() {
        let frame = Frame {
            luma: vec![17u8; 64 * 64],
            width: 64,
            height: 64,
        };
        let codes = TextDecoder::new().decode(&frame).expect("decode");
        assert!(codes.is_empty());
    }

    #[test]
    fn empty_code_list_decodes_to_empty_set() {
        let frame = text_frame(&[], 64, 64);
        let codes = TextDecoder::new().decode(&frame).expect("decode");
        assert!(codes.is_empty());
    }
}
