//! Intel HEX to flat binary conversion.
//!
//! Release catalogs publish application images as `.hex` files. The legacy
//! bootloader expects a contiguous binary starting at the lowest address,
//! so gaps between records are filled with erased-flash bytes (`0xFF`).

use thiserror::Error;

/// Upper bound on the decoded span. Application flash on nRF51/nRF52 is well below this.
pub const MAX_IMAGE_SPAN: usize = 1024 * 1024;

const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: record does not start with ':'")]
    MissingStartCode { line: usize },

    #[error("line {line}: invalid hex digits")]
    InvalidDigits { line: usize },

    #[error("line {line}: record length does not match byte count")]
    LengthMismatch { line: usize },

    #[error("line {line}: checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    Checksum { line: usize, expected: u8, actual: u8 },

    #[error("line {line}: unsupported record type 0x{record_type:02X}")]
    UnsupportedRecord { line: usize, record_type: u8 },

    #[error("image spans {span} bytes, exceeding the 1 MiB limit")]
    TooLarge { span: usize },

    #[error("no data records")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Data,
    Eof,
    ExtendedSegment,
    StartSegment,
    ExtendedLinear,
    StartLinear,
}

impl RecordType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(RecordType::Data),
            0x01 => Some(RecordType::Eof),
            0x02 => Some(RecordType::ExtendedSegment),
            0x03 => Some(RecordType::StartSegment),
            0x04 => Some(RecordType::ExtendedLinear),
            0x05 => Some(RecordType::StartLinear),
            _ => None,
        }
    }
}

fn decode_hex_bytes(text: &str, line: usize) -> Result<Vec<u8>, HexError> {
    if text.len() % 2 != 0 {
        return Err(HexError::InvalidDigits { line });
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(HexError::InvalidDigits { line })
        })
        .collect()
}

/// Convert Intel HEX text into a flat binary image.
pub fn hex_to_bin(text: &str) -> Result<Vec<u8>, HexError> {
    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut base: u32 = 0;

    for (index, raw_line) in text.lines().enumerate() {
        let line = index + 1;
        let record = raw_line.trim();
        if record.is_empty() {
            continue;
        }
        let body = record
            .strip_prefix(':')
            .ok_or(HexError::MissingStartCode { line })?;
        let bytes = decode_hex_bytes(body, line)?;
        if bytes.len() < 5 || bytes.len() != bytes[0] as usize + 5 {
            return Err(HexError::LengthMismatch { line });
        }

        let (content, checksum) = bytes.split_at(bytes.len() - 1);
        let sum = content.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let expected = sum.wrapping_neg();
        if expected != checksum[0] {
            return Err(HexError::Checksum {
                line,
                expected,
                actual: checksum[0],
            });
        }

        let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
        let data = &content[4..];
        let record_type =
            RecordType::from_byte(bytes[3]).ok_or(HexError::UnsupportedRecord {
                line,
                record_type: bytes[3],
            })?;

        match record_type {
            RecordType::Data => chunks.push((base.wrapping_add(offset), data.to_vec())),
            RecordType::Eof => break,
            RecordType::ExtendedSegment if data.len() == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
            }
            RecordType::ExtendedLinear if data.len() == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
            }
            RecordType::ExtendedSegment | RecordType::ExtendedLinear => {
                return Err(HexError::LengthMismatch { line });
            }
            // Entry point records carry nothing for a flat image.
            RecordType::StartSegment | RecordType::StartLinear => {}
        }
    }

    let start = chunks
        .iter()
        .map(|(address, _)| *address)
        .min()
        .ok_or(HexError::Empty)?;
    let end = chunks
        .iter()
        .map(|(address, data)| *address as u64 + data.len() as u64)
        .max()
        .unwrap_or(start as u64);
    let span = (end - start as u64) as usize;
    if span > MAX_IMAGE_SPAN {
        return Err(HexError::TooLarge { span });
    }

    let mut image = vec![ERASED_BYTE; span];
    for (address, data) in chunks {
        let at = (address - start) as usize;
        image[at..at + data.len()].copy_from_slice(&data);
    }
    Ok(image)
}
