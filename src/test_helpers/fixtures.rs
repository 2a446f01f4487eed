use serde_json::{json, Map, Value};

use crate::device_info::DeviceInfo;

/// Builder for creating test DeviceInfo instances
pub struct DeviceInfoBuilder {
    manufacturer: Option<String>,
    model_number: String,
    firmware_revision: String,
    software_revision: Option<String>,
    bootloader_version: Option<Option<String>>,
}

impl DeviceInfoBuilder {
    pub fn new() -> Self {
        Self {
            manufacturer: Some("Adafruit Industries".to_string()),
            model_number: "BLEFRIEND32".to_string(),
            firmware_revision: "0.6.5".to_string(),
            software_revision: Some("S110 8.0.0".to_string()),
            bootloader_version: None,
        }
    }

    pub fn model_number(mut self, model: &str) -> Self {
        self.model_number = model.to_string();
        self
    }

    pub fn firmware_revision(mut self, revision: &str) -> Self {
        self.firmware_revision = revision.to_string();
        self
    }

    /// Override the derived bootloader version
    pub fn bootloader_version(mut self, version: Option<&str>) -> Self {
        self.bootloader_version = Some(version.map(str::to_string));
        self
    }

    pub fn build(self) -> DeviceInfo {
        let info = DeviceInfo::new(
            self.manufacturer,
            self.model_number,
            self.firmware_revision,
            self.software_revision,
        );
        match self.bootloader_version {
            Some(version) => info.with_bootloader_version(version),
            None => info,
        }
    }
}

impl Default for DeviceInfoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// URL used by [`CatalogBuilder`] for a release file
pub fn release_url(board: &str, version: &str, extension: &str) -> String {
    format!("https://releases.test/{}/{}.{}", board, version, extension)
}

/// Builder for release catalog JSON
#[derive(Default)]
pub struct CatalogBuilder {
    boards: Map<String, Value>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, board: &str, list: &str, entry: Value) {
        let board_entry = self
            .boards
            .entry(board.to_string())
            .or_insert_with(|| json!({}));
        let releases = board_entry
            .as_object_mut()
            .expect("board entry is an object")
            .entry(list.to_string())
            .or_insert_with(|| json!([]));
        releases
            .as_array_mut()
            .expect("release list is an array")
            .push(entry);
    }

    /// Add a firmware release with `.hex` and `.dat` URLs from [`release_url`]
    pub fn firmware(
        mut self,
        board: &str,
        version: &str,
        beta: bool,
        min_bootloader: Option<&str>,
    ) -> Self {
        let mut entry = json!({
            "version": version,
            "hexfile": release_url(board, version, "hex"),
            "initfile": release_url(board, version, "dat"),
            "beta": beta,
        });
        if let Some(min) = min_bootloader {
            entry["minbootloader"] = json!(min);
        }
        self.push(board, "firmware", entry);
        self
    }

    pub fn bootloader(mut self, board: &str, version: &str) -> Self {
        let entry = json!({
            "version": version,
            "hexfile": release_url(board, &format!("bootloader-{}", version), "hex"),
        });
        self.push(board, "bootloader", entry);
        self
    }

    pub fn build(self) -> String {
        Value::Object(self.boards).to_string()
    }
}

/// Deterministic image contents of the given length
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Legacy init packet carrying `crc` as the image CRC
pub fn init_packet_with_crc(crc: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(14);
    packet.extend_from_slice(&0xFFFFu16.to_le_bytes()); // device type
    packet.extend_from_slice(&0xFFFFu16.to_le_bytes()); // device revision
    packet.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // application version
    packet.extend_from_slice(&1u16.to_le_bytes()); // softdevice count
    packet.extend_from_slice(&0xFFFEu16.to_le_bytes()); // any softdevice
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

/// Encode `data` at address 0 as Intel HEX
pub fn to_intel_hex(data: &[u8]) -> String {
    let mut hex = String::new();
    for (index, chunk) in data.chunks(16).enumerate() {
        let address = (index * 16) as u16;
        let mut record = vec![chunk.len() as u8];
        record.extend_from_slice(&address.to_be_bytes());
        record.push(0x00);
        record.extend_from_slice(chunk);
        let checksum = record
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_neg();
        record.push(checksum);

        hex.push(':');
        for byte in record {
            hex.push_str(&format!("{:02X}", byte));
        }
        hex.push('\n');
    }
    hex.push_str(":00000001FF\n");
    hex
}
