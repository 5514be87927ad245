//! Hashed storage paths and fallback-path parsing.
//!
//! Files live under a configurable-depth tree of hashed directories:
//! level `i` is the first `i + 1` hex digits of the file name's digest,
//! so `Sunset.jpg` with two levels lands in `d/d4/Sunset.jpg`. Thumbnails
//! sit one level deeper, keyed by thumbnail name:
//! `d/d4/Sunset.jpg/120px-Sunset.jpg`.
//!
//! When a thumbnail request arrives through the not-found fallback
//! route, all we have is such a relative path. [`FallbackPath::parse`]
//! recognizes the three valid shapes (current, `archive/`, `temp/`) and
//! rejects everything else before any further processing happens.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use percent_encoding::percent_decode_str;

/// Storage zone a source file lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
    /// Current file versions.
    Public,
    /// Archived (old) versions, named `<timestamp>!<name>`.
    Archive,
    /// Transient uploads not yet published.
    Temp,
}

impl Zone {
    /// Path prefix for this zone, empty for the public zone.
    pub fn prefix(self) -> &'static str {
        match self {
            Zone::Public => "",
            Zone::Archive => "archive/",
            Zone::Temp => "temp/",
        }
    }
}

/// Hashed directory fragment for a file name, with trailing slash:
/// `"d/d4/"` for two levels. Zero levels yield an empty fragment.
pub fn hash_fragment(file_name: &str, levels: u8) -> String {
    if levels == 0 {
        return String::new();
    }
    let hex = ContentHash::compute(file_name.as_bytes()).to_hex();
    let mut fragment = String::new();
    for i in 1..=usize::from(levels) {
        fragment.push_str(&hex[..i]);
        fragment.push('/');
    }
    fragment
}

/// Relative path of a source file within its zone root.
pub fn source_rel(zone: Zone, file_name: &str, levels: u8) -> String {
    format!(
        "{}{}{}",
        zone.prefix(),
        hash_fragment(file_name, levels),
        file_name
    )
}

/// Relative path of a thumbnail within the thumb zone root.
pub fn thumb_rel(zone: Zone, file_name: &str, levels: u8, thumb_name: &str) -> String {
    format!(
        "{}{}{}/{}",
        zone.prefix(),
        hash_fragment(file_name, levels),
        file_name,
        thumb_name
    )
}

/// Percent-decode a fallback path for comparison against canonical
/// thumbnail paths. Invalid UTF-8 after decoding is a malformed request.
pub fn decode_rel(rel: &str) -> Result<String> {
    percent_decode_str(rel)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::InvalidFallbackPath(format!("undecodable path: {rel}")))
}

/// A parsed not-found fallback path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackPath {
    pub zone: Zone,
    /// Source file name (path segment before the thumbnail name).
    pub file_name: String,
    /// Thumbnail name (final path segment), parameters not yet parsed.
    pub thumb_name: String,
    /// The path as it must match the canonical thumb-zone relative path.
    /// Includes the `archive/` prefix, excludes the `temp/` prefix (temp
    /// thumbnails are compared within the temp zone).
    pub rel: String,
}

impl FallbackPath {
    /// Parse a zone-relative thumbnail path recovered by the not-found
    /// handler. `levels` is the configured hash-directory depth.
    ///
    /// Valid shapes, where `h{i}` is an `i`-character lowercase-hex
    /// segment:
    ///
    /// ```text
    /// h1/h2/.../{filename}/{thumbname}
    /// archive/h1/h2/.../{filename}/{thumbname}
    /// temp/h1/h2/.../{filename}/{thumbname}
    /// ```
    pub fn parse(rel: &str, levels: u8) -> Result<Self> {
        let malformed = || Error::InvalidFallbackPath(format!("unrecognized path shape: {rel}"));

        let (zone, rest) = if let Some(rest) = rel.strip_prefix("archive/") {
            (Zone::Archive, rest)
        } else if let Some(rest) = rel.strip_prefix("temp/") {
            (Zone::Temp, rest)
        } else {
            (Zone::Public, rel)
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != usize::from(levels) + 2 {
            return Err(malformed());
        }

        for (i, seg) in segments[..usize::from(levels)].iter().enumerate() {
            if seg.len() != i + 1 || !seg.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
                return Err(malformed());
            }
        }

        let file_name = segments[usize::from(levels)];
        let thumb_name = segments[usize::from(levels) + 1];
        if file_name.is_empty() || thumb_name.is_empty() {
            return Err(malformed());
        }

        let stored = match zone {
            // The archive/ prefix is part of the thumb-zone layout; temp
            // thumbnails live under their own zone root.
            Zone::Archive => rel.to_string(),
            _ => rest.to_string(),
        };

        Ok(Self {
            zone,
            file_name: file_name.to_string(),
            thumb_name: thumb_name.to_string(),
            rel: stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_depth_and_shape() {
        let frag = hash_fragment("Sunset.jpg", 2);
        let parts: Vec<&str> = frag.trim_end_matches('/').split('/').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 1);
        assert_eq!(parts[1].len(), 2);
        assert!(parts[1].starts_with(parts[0]));
        assert_eq!(hash_fragment("Sunset.jpg", 0), "");
    }

    #[test]
    fn source_and_thumb_rel_agree_on_fragment() {
        let frag = hash_fragment("Foo.png", 2);
        assert_eq!(source_rel(Zone::Public, "Foo.png", 2), format!("{frag}Foo.png"));
        assert_eq!(
            thumb_rel(Zone::Public, "Foo.png", 2, "120px-Foo.png"),
            format!("{frag}Foo.png/120px-Foo.png")
        );
        assert!(source_rel(Zone::Archive, "x!Foo.png", 2).starts_with("archive/"));
    }

    #[test]
    fn parse_current_shape() {
        let frag = hash_fragment("Foo.png", 2);
        let rel = format!("{frag}Foo.png/120px-Foo.png");
        let parsed = FallbackPath::parse(&rel, 2).unwrap();
        assert_eq!(parsed.zone, Zone::Public);
        assert_eq!(parsed.file_name, "Foo.png");
        assert_eq!(parsed.thumb_name, "120px-Foo.png");
        assert_eq!(parsed.rel, rel);
    }

    #[test]
    fn parse_archive_keeps_prefix_temp_drops_it() {
        let archived = "archive/a/ab/20200101000000!Foo.png/120px-Foo.png";
        let parsed = FallbackPath::parse(archived, 2).unwrap();
        assert_eq!(parsed.zone, Zone::Archive);
        assert_eq!(parsed.rel, archived);

        let temp = "temp/a/ab/Foo.png/120px-Foo.png";
        let parsed = FallbackPath::parse(temp, 2).unwrap();
        assert_eq!(parsed.zone, Zone::Temp);
        assert_eq!(parsed.rel, "a/ab/Foo.png/120px-Foo.png");
    }

    #[test]
    fn wrong_hash_depth_is_malformed() {
        // Two segments where three hash levels are configured.
        assert!(FallbackPath::parse("xx/yy/zz", 2).is_err());
        assert!(FallbackPath::parse("a/ab/Foo.png/120px-Foo.png", 3).is_err());
    }

    #[test]
    fn malformed_hash_segments_rejected() {
        // Wrong segment lengths.
        assert!(FallbackPath::parse("ab/a/Foo.png/120px-Foo.png", 2).is_err());
        // Uppercase hex is not a valid hash dir.
        assert!(FallbackPath::parse("A/AB/Foo.png/120px-Foo.png", 2).is_err());
        // Non-hex characters.
        assert!(FallbackPath::parse("g/gh/Foo.png/120px-Foo.png", 2).is_err());
    }

    #[test]
    fn decode_rel_handles_percent_escapes() {
        assert_eq!(decode_rel("a/ab/Foo%20Bar.png/x").unwrap(), "a/ab/Foo Bar.png/x");
        assert!(decode_rel("%ff%fe").is_err());
    }
}
