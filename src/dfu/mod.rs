//! Nordic legacy DFU (Device Firmware Update) over BLE.
//!
//! Updates the application image of Bluefruit LE peripherals running the
//! Nordic legacy (SDK 8-11) bootloader.
//!
//! # Protocol Overview
//!
//! The DFU process consists of:
//! 1. **Discovery** - Find the DFU service, subscribe to the control point
//! 2. **Bootloader Entry** - Buttonless `Start DFU` from the application, then reconnect
//! 3. **Init Transfer** - Image sizes and the `.dat` init packet
//! 4. **Firmware Transfer** - Image packets under packet-receipt flow control
//! 5. **Validation** - Size report and CRC check by the bootloader
//! 6. **Activation** - Bootloader applies and boots the new firmware
//!
//! # Example
//!
//! ```ignore
//! use bluefruit_updater::dfu::{DfuConfig, DfuEngine, FirmwareImage};
//!
//! let engine = DfuEngine::new(central, DfuConfig::default());
//! let image = FirmwareImage::from_hex(&hex_text, Some(init_packet))?;
//! engine
//!     .run(peripheral, image, |event| println!("{:?}", event))
//!     .await?;
//! ```

mod cancel;
pub mod config;
mod device;
mod error;
mod firmware_reader;
mod ihex;
pub mod packet;
mod protocol;
mod transport;

pub use cancel::CancelToken;
pub use config::{DfuConfig, DfuOpcode, DfuResponseStatus};
pub use error::{DfuFailure, DfuResult};
pub use firmware_reader::{read_firmware_zip, FirmwareImage, ImageError};
pub use ihex::HexError;
pub use protocol::{DfuEngine, DfuEvent, DfuOutcome, TransferState};
