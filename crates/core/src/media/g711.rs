//! G.711 companding (ITU-T G.711), RTP payload types 0 (PCMU) and 8 (PCMA).
//!
//! One byte per sample, 8 kHz, so a 20 ms frame is 160 bytes.

use crate::capture::{AudioEncoder, CaptureResult};
use crate::config::AudioCodec;

/// A-law compression of a 16-bit linear sample.
pub fn linear_to_alaw(sample: i16) -> u8 {
    // 13 most significant bits, one's complement for negatives.
    let mut ix = if sample < 0 {
        ((!sample) as u16 >> 4) as i16
    } else {
        sample >> 4
    };

    if ix > 15 {
        let mut exponent = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            exponent += 1;
        }
        ix -= 16;
        ix += exponent << 4;
    }

    if sample >= 0 {
        ix |= 0x80;
    }
    (ix ^ 0x55) as u8
}

/// μ-law compression of a 16-bit linear sample.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    // 14 most significant bits plus the bias of 33.
    let magnitude = if sample < 0 {
        ((!sample) as u16 >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let magnitude = magnitude.min(0x1FFF);

    let mut segment = 1;
    let mut i = magnitude >> 6;
    while i != 0 {
        segment += 1;
        i >>= 1;
    }

    let high_nibble = 0x08 - segment;
    let low_nibble = 0x0F - ((magnitude >> segment) & 0x0F);
    let mut code = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        code |= 0x80;
    }
    code as u8
}

/// Software G.711 encoder used when the capture device delivers raw PCM.
#[derive(Debug, Clone, Copy)]
pub struct G711Encoder {
    law: fn(i16) -> u8,
}

impl G711Encoder {
    /// Encoder for `codec`; anything that is not PCMA encodes μ-law.
    pub fn new(codec: AudioCodec) -> Self {
        let law: fn(i16) -> u8 = match codec {
            AudioCodec::Pcma => linear_to_alaw,
            _ => linear_to_ulaw,
        };
        Self { law }
    }
}

impl AudioEncoder for G711Encoder {
    fn encode(&mut self, pcm: &[i16]) -> CaptureResult<Vec<u8>> {
        Ok(pcm.iter().map(|&s| (self.law)(s)).collect())
    }
}
