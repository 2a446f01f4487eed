//! Release catalog: parsed firmware and bootloader releases per board.

mod parser;
mod selector;
mod store;

use std::collections::BTreeMap;

use semver::Version;
use serde::Serialize;

pub use parser::{parse_catalog, ParseError};
pub use selector::{select_update, UpdatePlan};
pub use store::{CatalogSnapshot, CatalogStore};

/// Fields shared by firmware and bootloader releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub version: Version,
    /// Application image (`.hex` or `.bin`).
    pub image_url: String,
    /// Companion init packet (`.dat`), when published.
    pub init_url: Option<String>,
    pub board_name: String,
    pub is_beta: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareRelease {
    #[serde(flatten)]
    pub info: ReleaseInfo,
    /// Oldest bootloader able to run this firmware.
    pub min_bootloader_version: Option<Version>,
}

impl FirmwareRelease {
    pub fn version(&self) -> &Version {
        &self.info.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootloaderRelease {
    #[serde(flatten)]
    pub info: ReleaseInfo,
}

impl BootloaderRelease {
    pub fn version(&self) -> &Version {
        &self.info.version
    }
}

/// Releases for one board, each list sorted by version, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoardReleases {
    pub firmware: Vec<FirmwareRelease>,
    pub bootloader: Vec<BootloaderRelease>,
}

/// Board identifier to releases. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseCatalog {
    boards: BTreeMap<String, BoardReleases>,
}

impl ReleaseCatalog {
    pub fn new(boards: BTreeMap<String, BoardReleases>) -> Self {
        Self { boards }
    }

    /// Look up a board, ignoring ASCII case.
    pub fn board(&self, name: &str) -> Option<&BoardReleases> {
        self.boards.get(name).or_else(|| {
            self.boards
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, releases)| releases)
        })
    }

    pub fn boards(&self) -> impl Iterator<Item = (&str, &BoardReleases)> {
        self.boards.iter().map(|(name, releases)| (name.as_str(), releases))
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}
