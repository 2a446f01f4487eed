//! Lenient version parsing for release catalogs and device revisions.
//!
//! Bluefruit firmware strings are not always strict semver: bootloaders
//! report `0.1`, some releases are tagged `v0.6.7`. Missing fields are
//! treated as 0 so that `0.6` and `0.6.0` compare equal.

use semver::{Prerelease, Version};

/// Parse a version string, padding missing minor/patch fields with zero.
///
/// Returns `None` for empty strings, non-numeric fields, or more than three
/// dot-separated components.
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if trimmed.is_empty() {
        return None;
    }

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    // Build metadata is ignored; a pre-release suffix is kept.
    let without_build = trimmed.split('+').next().unwrap_or(trimmed);
    let (core, pre) = match without_build.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (without_build, None),
    };

    let fields: Vec<&str> = core.split('.').collect();
    if fields.len() > 3 {
        return None;
    }

    let mut numbers = [0u64; 3];
    for (slot, field) in numbers.iter_mut().zip(fields.iter()) {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = field.parse().ok()?;
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
        version.pre = Prerelease::new(pre).ok()?;
    }
    Some(version)
}

/// Parse a version string, falling back to `0.0.0` when it is unparsable.
///
/// Used for device-reported revisions so that a garbled revision string
/// still gets offered any valid release.
pub fn parse_or_zero(raw: &str) -> Version {
    parse_lenient(raw).unwrap_or_else(|| Version::new(0, 0, 0))
}
