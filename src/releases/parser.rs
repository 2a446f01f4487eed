//! Release catalog parsing.
//!
//! The catalog is a JSON document keyed by board identifier:
//!
//! ```json
//! {
//!   "BLEFRIEND32": {
//!     "firmware": [
//!       { "version": "0.6.7", "hexfile": "https://.../blefriend32_0.6.7.hex",
//!         "initfile": "https://.../blefriend32_0.6.7.dat", "minbootloader": "0.1", "beta": false }
//!     ],
//!     "bootloader": [ { "version": "0.2", "hexfile": "..." } ]
//!   }
//! }
//! ```
//!
//! The same structure is accepted as an XML or binary property list.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::{BoardReleases, BootloaderRelease, FirmwareRelease, ReleaseCatalog, ReleaseInfo};
use crate::version::parse_lenient;

/// Errors that reject the whole catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Malformed release catalog: {reason}")]
    MalformedCatalog { reason: String },
}

fn malformed(reason: impl Into<String>) -> ParseError {
    ParseError::MalformedCatalog {
        reason: reason.into(),
    }
}

/// One release entry as published. Every field is optional here; required
/// fields are checked after deserialization so a bad entry can be skipped.
#[derive(Debug, Deserialize)]
struct RawRelease {
    #[serde(default, deserialize_with = "string_or_number")]
    version: Option<String>,
    #[serde(default, alias = "hexFileUrl", alias = "imageUrl")]
    hexfile: Option<String>,
    #[serde(default, alias = "iniFileUrl", alias = "initFileUrl")]
    initfile: Option<String>,
    #[serde(default, alias = "minBootloaderVersion", deserialize_with = "string_or_number")]
    minbootloader: Option<String>,
    #[serde(default, alias = "isBeta", deserialize_with = "flexible_bool")]
    beta: bool,
}

/// Accept `"0.6"` as well as a bare integer `2`.
///
/// Fractional numbers are refused: `1.10` has already become `1.1` by the
/// time it is read, so the entry is skipped rather than misversioned.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(Some(n.to_string())),
        Value::Number(n) => Err(de::Error::custom(format!(
            "numeric version {n} is ambiguous, publish it as a string"
        ))),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Accept `true`, `"true"`, `"yes"`, `"1"`, or any non-zero number.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        )),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        other => Err(de::Error::custom(format!("expected boolean, got {other}"))),
    }
}

fn is_property_list(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let first = bytes.iter().position(|b| !b.is_ascii_whitespace());
    let start = first.map_or(&[][..], |index| &bytes[index..]);
    start.starts_with(b"bplist") || start.starts_with(b"<")
}

fn decode_root(bytes: &[u8]) -> Result<Value, ParseError> {
    if !is_property_list(bytes) {
        return serde_json::from_slice(bytes).map_err(|e| malformed(format!("invalid JSON: {e}")));
    }
    let plist: plist::Value = plist::from_bytes(bytes)
        .map_err(|e| malformed(format!("invalid property list: {e}")))?;
    serde_json::to_value(plist)
        .map_err(|e| malformed(format!("unsupported property list value: {e}")))
}

/// Parse a release catalog from JSON or a property list.
///
/// Structural problems fail the whole parse. Individual entries that are
/// incomplete or carry an unparsable version are skipped with a warning.
pub fn parse_catalog(bytes: &[u8]) -> Result<ReleaseCatalog, ParseError> {
    let Value::Object(boards) = decode_root(bytes)? else {
        return Err(malformed("root is not an object"));
    };

    let mut catalog = BTreeMap::new();
    for (board_name, board_value) in boards {
        let Value::Object(lists) = board_value else {
            return Err(malformed(format!("board '{board_name}' is not an object")));
        };

        let mut firmware: Vec<FirmwareRelease> = raw_entries(&board_name, &lists, "firmware")?
            .into_iter()
            .filter_map(|raw| firmware_release(&board_name, raw))
            .collect();
        let mut bootloader: Vec<BootloaderRelease> =
            raw_entries(&board_name, &lists, "bootloader")?
                .into_iter()
                .filter_map(|raw| {
                    release_info(&board_name, "bootloader", &raw)
                        .map(|info| BootloaderRelease { info })
                })
                .collect();

        sort_descending(&mut firmware, |r| &r.info);
        sort_descending(&mut bootloader, |r| &r.info);

        debug!(
            "Board {}: {} firmware, {} bootloader releases",
            board_name,
            firmware.len(),
            bootloader.len()
        );
        catalog.insert(
            board_name,
            BoardReleases {
                firmware,
                bootloader,
            },
        );
    }

    Ok(ReleaseCatalog::new(catalog))
}

fn raw_entries(
    board: &str,
    lists: &Map<String, Value>,
    kind: &str,
) -> Result<Vec<RawRelease>, ParseError> {
    let items = match lists.get(kind) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(malformed(format!(
                "{kind} list of board '{board}' is not an array"
            )))
        }
    };

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            match RawRelease::deserialize(item) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!("Skipping {} entry {} of {}: {}", kind, index, board, e);
                    None
                }
            }
        })
        .collect())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn release_info(board: &str, kind: &str, raw: &RawRelease) -> Option<ReleaseInfo> {
    let Some(version_text) = non_empty(&raw.version) else {
        warn!("Skipping {} entry of {} without a version", kind, board);
        return None;
    };
    let Some(image_url) = non_empty(&raw.hexfile) else {
        warn!("Skipping {} {} of {}: no image URL", kind, version_text, board);
        return None;
    };
    let Some(version) = parse_lenient(version_text) else {
        warn!("Skipping {} of {}: unparsable version '{}'", kind, board, version_text);
        return None;
    };

    Some(ReleaseInfo {
        version,
        image_url: image_url.to_string(),
        init_url: non_empty(&raw.initfile).map(str::to_string),
        board_name: board.to_string(),
        is_beta: raw.beta,
    })
}

fn firmware_release(board: &str, raw: RawRelease) -> Option<FirmwareRelease> {
    let info = release_info(board, "firmware", &raw)?;
    let min_bootloader_version = non_empty(&raw.minbootloader).and_then(|text| {
        let parsed = parse_lenient(text);
        if parsed.is_none() {
            warn!(
                "Ignoring unparsable minimum bootloader '{}' for {} {}",
                text, board, info.version
            );
        }
        parsed
    });
    Some(FirmwareRelease {
        info,
        min_bootloader_version,
    })
}

/// Sort newest first and drop repeated versions, keeping the first occurrence.
fn sort_descending<T>(releases: &mut Vec<T>, info: impl Fn(&T) -> &ReleaseInfo) {
    releases.sort_by(|a, b| info(b).version.cmp(&info(a).version));
    releases.dedup_by(|later, earlier| {
        let duplicate = info(later).version == info(earlier).version;
        if duplicate {
            warn!(
                "Dropping duplicate release {} for {}",
                info(later).version,
                info(later).board_name
            );
        }
        duplicate
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    const CATALOG: &str = r#"{
        "BLEFRIEND32": {
            "firmware": [
                { "version": "0.6.5", "hexfile": "fw/0.6.5.hex", "initfile": "fw/0.6.5.dat", "minbootloader": "0.1" },
                { "version": "0.7.0", "hexfile": "fw/0.7.0.hex", "beta": "yes" },
                { "version": "0.6.7", "hexfile": "fw/0.6.7.hex", "initfile": "" }
            ],
            "bootloader": [
                { "version": "0.1", "hexfile": "bl/0.1.hex" },
                { "version": "0.2", "hexfile": "bl/0.2.hex" }
            ]
        },
        "BLESPIFRIEND": {
            "firmware": [
                { "version": "0.6.7", "hexFileUrl": "spi/0.6.7.hex", "iniFileUrl": "spi/0.6.7.dat", "isBeta": 0 }
            ]
        }
    }"#;

    fn versions(releases: &[FirmwareRelease]) -> Vec<String> {
        releases.iter().map(|r| r.version().to_string()).collect()
    }

    #[test]
    fn test_parse_sorts_descending() {
        let catalog = parse_catalog(CATALOG.as_bytes()).unwrap();
        let board = catalog.board("BLEFRIEND32").unwrap();

        assert_eq!(versions(&board.firmware), vec!["0.7.0", "0.6.7", "0.6.5"]);
        assert_eq!(board.bootloader[0].version(), &Version::new(0, 2, 0));
        assert_eq!(board.bootloader[1].version(), &Version::new(0, 1, 0));
        assert!(board
            .firmware
            .windows(2)
            .all(|pair| pair[0].version() > pair[1].version()));
    }

    #[test]
    fn test_parse_entry_fields() {
        let catalog = parse_catalog(CATALOG.as_bytes()).unwrap();
        let board = catalog.board("BLEFRIEND32").unwrap();

        let beta = &board.firmware[0];
        assert!(beta.info.is_beta);
        assert_eq!(beta.info.board_name, "BLEFRIEND32");

        let stable = &board.firmware[1];
        assert!(!stable.info.is_beta);
        assert_eq!(stable.info.init_url, None);

        let oldest = &board.firmware[2];
        assert_eq!(oldest.info.init_url.as_deref(), Some("fw/0.6.5.dat"));
        assert_eq!(oldest.min_bootloader_version, Some(Version::new(0, 1, 0)));
    }

    #[test]
    fn test_parse_accepts_field_aliases() {
        let catalog = parse_catalog(CATALOG.as_bytes()).unwrap();
        let release = &catalog.board("BLESPIFRIEND").unwrap().firmware[0];

        assert_eq!(release.info.image_url, "spi/0.6.7.hex");
        assert_eq!(release.info.init_url.as_deref(), Some("spi/0.6.7.dat"));
        assert!(!release.info.is_beta);
        assert!(catalog.board("BLESPIFRIEND").unwrap().bootloader.is_empty());
    }

    #[test]
    fn test_malformed_top_level() {
        for blob in [
            "not json",
            "[]",
            r#"{"BLEFRIEND32": []}"#,
            r#"{"BLEFRIEND32": {"firmware": {"version": "1.0"}}}"#,
            r#"{"BLEFRIEND32": {"bootloader": "0.1"}}"#,
        ] {
            assert!(
                matches!(
                    parse_catalog(blob.as_bytes()),
                    Err(ParseError::MalformedCatalog { .. })
                ),
                "{blob}"
            );
        }
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let blob = r#"{
            "BOARD": {
                "firmware": [
                    { "hexfile": "no-version.hex" },
                    { "version": "1.0.0" },
                    { "version": "latest", "hexfile": "bad-version.hex" },
                    { "version": ["1"], "hexfile": "array-version.hex" },
                    "not an object",
                    { "version": "1.2.0", "hexfile": "good.hex", "minbootloader": "??" }
                ]
            }
        }"#;

        let catalog = parse_catalog(blob.as_bytes()).unwrap();
        let firmware = &catalog.board("BOARD").unwrap().firmware;

        assert_eq!(versions(firmware), vec!["1.2.0"]);
        assert_eq!(firmware[0].min_bootloader_version, None);
    }

    #[test]
    fn test_duplicate_versions_dropped() {
        let blob = r#"{
            "BOARD": {
                "firmware": [
                    { "version": "1.0", "hexfile": "first.hex" },
                    { "version": "1.0.0", "hexfile": "second.hex" },
                    { "version": "0.9", "hexfile": "older.hex" }
                ]
            }
        }"#;

        let catalog = parse_catalog(blob.as_bytes()).unwrap();
        let firmware = &catalog.board("BOARD").unwrap().firmware;

        assert_eq!(versions(firmware), vec!["1.0.0", "0.9.0"]);
        assert_eq!(firmware[0].info.image_url, "first.hex");
    }

    #[test]
    fn test_beta_flag_forms() {
        let blob = r#"{
            "BOARD": {
                "firmware": [
                    { "version": "5", "hexfile": "a.hex", "beta": true },
                    { "version": "4", "hexfile": "b.hex", "beta": "TRUE" },
                    { "version": "3", "hexfile": "c.hex", "beta": 1 },
                    { "version": "2", "hexfile": "d.hex", "beta": "no" },
                    { "version": 1, "hexfile": "e.hex" }
                ]
            }
        }"#;

        let catalog = parse_catalog(blob.as_bytes()).unwrap();
        let flags: Vec<bool> = catalog.board("BOARD").unwrap().firmware.iter().map(|r| r.info.is_beta).collect();

        assert_eq!(flags, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_fractional_numeric_version_is_skipped() {
        let blob = r#"{
            "BOARD": {
                "firmware": [
                    { "version": 1.10, "hexfile": "float.hex" },
                    { "version": "1.0.0", "hexfile": "ok.hex", "minbootloader": 0.2 },
                    { "version": 2, "hexfile": "integer.hex" }
                ]
            }
        }"#;

        let catalog = parse_catalog(blob.as_bytes()).unwrap();
        let firmware = &catalog.board("BOARD").unwrap().firmware;

        assert_eq!(versions(firmware), vec!["2.0.0"]);
        assert_eq!(firmware[0].info.image_url, "integer.hex");
    }

    const PLIST_CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>BLEFRIEND32</key>
    <dict>
        <key>firmware</key>
        <array>
            <dict>
                <key>version</key><string>0.6.5</string>
                <key>hexfile</key><string>fw/0.6.5.hex</string>
                <key>initfile</key><string>fw/0.6.5.dat</string>
                <key>minbootloader</key><string>0.1</string>
            </dict>
            <dict>
                <key>version</key><string>0.7.0</string>
                <key>hexfile</key><string>fw/0.7.0.hex</string>
                <key>beta</key><true/>
            </dict>
            <dict>
                <key>hexfile</key><string>fw/no-version.hex</string>
            </dict>
        </array>
        <key>bootloader</key>
        <array>
            <dict>
                <key>version</key><string>0.2</string>
                <key>hexfile</key><string>bl/0.2.hex</string>
            </dict>
        </array>
    </dict>
</dict>
</plist>
"#;

    #[test]
    fn test_parse_property_list() {
        let catalog = parse_catalog(PLIST_CATALOG.as_bytes()).unwrap();
        let board = catalog.board("BLEFRIEND32").unwrap();

        assert_eq!(versions(&board.firmware), vec!["0.7.0", "0.6.5"]);
        assert!(board.firmware[0].info.is_beta);
        assert_eq!(board.firmware[1].info.init_url.as_deref(), Some("fw/0.6.5.dat"));
        assert_eq!(board.firmware[1].min_bootloader_version, Some(Version::new(0, 1, 0)));
        assert_eq!(board.bootloader[0].version(), &Version::new(0, 2, 0));
    }

    #[test]
    fn test_malformed_property_list() {
        for blob in [
            "<plist version=\"1.0\"><dict><key>BOARD</key>",
            "<?xml version=\"1.0\"?><plist version=\"1.0\"><array/></plist>",
        ] {
            assert!(
                matches!(
                    parse_catalog(blob.as_bytes()),
                    Err(ParseError::MalformedCatalog { .. })
                ),
                "{blob}"
            );
        }
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = parse_catalog(b"{}").unwrap();
        assert!(catalog.is_empty());
    }
}
