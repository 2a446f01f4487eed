//! Firmware image loading for legacy Nordic DFU.
//!
//! Images come from two places:
//! - a release catalog entry (Intel HEX or raw binary, plus an optional `.dat` init packet)
//! - a Nordic DFU package on disk (`manifest.json`, `*.bin`, `*.dat` in a zip)

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::ihex::{self, HexError};
use super::packet::{image_crc, init_packet_crc};

/// Errors building a [`FirmwareImage`].
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid Intel HEX: {0}")]
    Hex(#[from] HexError),

    #[error("Missing file in firmware package: {filename}")]
    MissingFile { filename: String },

    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("Firmware image is empty")]
    Empty,

    #[error("Image CRC mismatch: init packet expects 0x{expected:04X}, image is 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// Application image ready for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Flat binary written to the packet characteristic.
    pub data: Vec<u8>,
    /// Legacy init packet (`.dat`), if the release ships one.
    pub init_packet: Option<Vec<u8>>,
}

impl FirmwareImage {
    pub fn new(data: Vec<u8>, init_packet: Option<Vec<u8>>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { data, init_packet })
    }

    /// Decode an Intel HEX image.
    pub fn from_hex(text: &str, init_packet: Option<Vec<u8>>) -> Result<Self, ImageError> {
        Self::new(ihex::hex_to_bin(text)?, init_packet)
    }

    /// Build an image from downloaded bytes, decoding HEX when the URL says so.
    pub fn from_download(
        url: &str,
        bytes: Vec<u8>,
        init_packet: Option<Vec<u8>>,
    ) -> Result<Self, ImageError> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".hex") {
            let text = String::from_utf8_lossy(&bytes);
            Self::from_hex(&text, init_packet)
        } else {
            Self::new(bytes, init_packet)
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the image against the CRC carried in the init packet.
    ///
    /// Passes when there is no init packet or it carries no CRC.
    pub fn verify_crc(&self) -> Result<(), ImageError> {
        let Some(expected) = self.init_packet.as_deref().and_then(init_packet_crc) else {
            return Ok(());
        };
        let actual = image_crc(&self.data);
        if expected != actual {
            return Err(ImageError::CrcMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Raw manifest.json structure for deserialization.
#[derive(Debug, Deserialize)]
struct RawManifest {
    manifest: ManifestInner,
}

#[derive(Debug, Deserialize)]
struct ManifestInner {
    application: Option<ApplicationManifest>,
}

#[derive(Debug, Deserialize)]
struct ApplicationManifest {
    bin_file: String,
    dat_file: Option<String>,
}

/// Read an application image from a Nordic DFU zip package.
pub fn read_firmware_zip<P: AsRef<Path>>(path: P) -> Result<FirmwareImage, ImageError> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut archive = zip::ZipArchive::new(file)?;

    let application = read_manifest(&mut archive)?;
    let data = read_file_from_zip(&mut archive, &application.bin_file)?;
    let init_packet = match &application.dat_file {
        Some(name) => Some(read_file_from_zip(&mut archive, name)?),
        None => None,
    };

    FirmwareImage::new(data, init_packet)
}

fn read_manifest(
    archive: &mut zip::ZipArchive<std::fs::File>,
) -> Result<ApplicationManifest, ImageError> {
    let mut manifest_file =
        archive
            .by_name("manifest.json")
            .map_err(|_| ImageError::MissingFile {
                filename: "manifest.json".to_string(),
            })?;

    let mut contents = String::new();
    manifest_file.read_to_string(&mut contents)?;

    let raw: RawManifest = serde_json::from_str(&contents)?;
    raw.manifest
        .application
        .ok_or_else(|| ImageError::InvalidManifest {
            reason: "package has no application image".to_string(),
        })
}

fn read_file_from_zip(
    archive: &mut zip::ZipArchive<std::fs::File>,
    name: &str,
) -> Result<Vec<u8>, ImageError> {
    let mut file = archive.by_name(name).map_err(|_| ImageError::MissingFile {
        filename: name.to_string(),
    })?;

    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;

    Ok(data)
}
