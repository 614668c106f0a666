//! Real barcode decoding via rxing.
//!
//! Multi-format, multi-symbol decode over the grayscale luma plane. A frame
//! in which rxing finds nothing is a normal empty result; only genuinely
//! malformed frames surface as errors (and make the reader skip the frame).

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use rxing::Exceptions;

use crate::ingest::Frame;
use crate::Code;

pub struct RxingDecoder;

impl RxingDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RxingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Decoder for RxingDecoder {
    fn decode(&self, frame: &Frame) -> Result<BTreeSet<Code>> {
        let results = match rxing::helpers::detect_multiple_in_luma(
            frame.luma.clone(),
            frame.width,
            frame.height,
        ) {
            Ok(results) => results,
            Err(Exceptions::NotFoundException(_)) => return Ok(BTreeSet::new()),
            Err(err) => return Err(anyhow!("barcode decode failed: {}", err)),
        };

        Ok(results
            .iter()
            .map(|result| result.getText().to_string())
            .collect())
    }
}
