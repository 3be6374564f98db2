//! Sample and stream format descriptors

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric encoding of a PCM sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Two's complement signed integer
    Signed,
    /// Unsigned integer with the midpoint as silence
    Unsigned,
    /// IEEE 754 floating point
    Float,
}

/// Encoding and width of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Numeric encoding
    pub encoding: SampleEncoding,
    /// Width in bits
    pub bits: u16,
}

impl SampleFormat {
    pub const I8: Self = Self::new(SampleEncoding::Signed, 8);
    pub const I16: Self = Self::new(SampleEncoding::Signed, 16);
    pub const I32: Self = Self::new(SampleEncoding::Signed, 32);
    pub const I64: Self = Self::new(SampleEncoding::Signed, 64);
    pub const U8: Self = Self::new(SampleEncoding::Unsigned, 8);
    pub const U16: Self = Self::new(SampleEncoding::Unsigned, 16);
    pub const U32: Self = Self::new(SampleEncoding::Unsigned, 32);
    pub const U64: Self = Self::new(SampleEncoding::Unsigned, 64);
    pub const F32: Self = Self::new(SampleEncoding::Float, 32);
    pub const F64: Self = Self::new(SampleEncoding::Float, 64);

    /// Create a format descriptor
    pub const fn new(encoding: SampleEncoding, bits: u16) -> Self {
        Self { encoding, bits }
    }

    /// Size of one sample in bytes, rounded up to whole bytes
    pub const fn bytes(&self) -> usize {
        (self.bits as usize).div_ceil(8)
    }

    /// Whether the format matches a native Rust scalar (8/16/32/64-bit
    /// integers, 32/64-bit floats).
    pub const fn is_native(&self) -> bool {
        match self.encoding {
            SampleEncoding::Signed | SampleEncoding::Unsigned => {
                matches!(self.bits, 8 | 16 | 32 | 64)
            }
            SampleEncoding::Float => matches!(self.bits, 32 | 64),
        }
    }

    /// Byte pattern of one silent sample in native byte order.
    ///
    /// Signed and float silence is all zeros; unsigned silence is the
    /// midpoint of the range.
    pub fn silence_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.bytes()];
        if self.encoding == SampleEncoding::Unsigned && !bytes.is_empty() {
            let msb = if cfg!(target_endian = "little") {
                bytes.len() - 1
            } else {
                0
            };
            bytes[msb] = 0x80;
        }
        bytes
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::F32
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.encoding {
            SampleEncoding::Signed => 'i',
            SampleEncoding::Unsigned => 'u',
            SampleEncoding::Float => 'f',
        };
        write!(f, "{}{}", prefix, self.bits)
    }
}

/// Negotiated stream parameters of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Frames per hardware period
    pub buffer_size_frames: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Sample encoding and width
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes() * self.channels as usize
    }

    /// Bytes in one period
    pub fn period_bytes(&self) -> usize {
        self.frame_bytes() * self.buffer_size_frames as usize
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size_frames: 512,
            channels: 2,
            sample_format: SampleFormat::F32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::I16.bytes(), 2);
        assert_eq!(SampleFormat::F64.bytes(), 8);
        assert_eq!(SampleFormat::new(SampleEncoding::Signed, 24).bytes(), 3);
        assert_eq!(SampleFormat::new(SampleEncoding::Signed, 256).bytes(), 32);
    }

    #[test]
    fn test_native_formats() {
        assert!(SampleFormat::U8.is_native());
        assert!(SampleFormat::F32.is_native());
        assert!(!SampleFormat::new(SampleEncoding::Float, 16).is_native());
        assert!(!SampleFormat::new(SampleEncoding::Signed, 256).is_native());
    }

    #[test]
    fn test_display() {
        assert_eq!(SampleFormat::F32.to_string(), "f32");
        assert_eq!(SampleFormat::U16.to_string(), "u16");
        assert_eq!(SampleFormat::new(SampleEncoding::Signed, 256).to_string(), "i256");
    }

    #[test]
    fn test_silence_bytes() {
        assert_eq!(SampleFormat::F32.silence_bytes(), vec![0, 0, 0, 0]);
        assert_eq!(SampleFormat::U8.silence_bytes(), vec![0x80]);
        let u16_silence = SampleFormat::U16.silence_bytes();
        assert_eq!(u16::from_ne_bytes([u16_silence[0], u16_silence[1]]), 0x8000);
    }

    #[test]
    fn test_period_bytes() {
        let format = StreamFormat {
            sample_rate: 48_000,
            buffer_size_frames: 256,
            channels: 2,
            sample_format: SampleFormat::I16,
        };
        assert_eq!(format.frame_bytes(), 4);
        assert_eq!(format.period_bytes(), 1024);
    }
}
