//! File identifiers.
//!
//! A stored object is addressed by `group/D1/D2/md5` where `D1`/`D2` are two
//! pairs of uppercase hex taken from the tail of the payload's CRC-32 and
//! `md5` is the lowercase hex MD5 of the payload. Sharding by the CRC tail
//! instead of the MD5 keeps a client that only knows an MD5 from predicting
//! the storage path and forging a collision into another file's slot.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;

lazy_static! {
    /// Grammar of a file identifier.
    pub static ref FID_PATTERN: Regex =
        Regex::new(r"^([^/]+)/([0-9A-F]{2})/([0-9A-F]{2})/([0-9a-f]{32})$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    pub group: String,
    pub d1: String,
    pub d2: String,
    pub md5: String,
}

impl FileId {
    /// Parse an identifier string. Returns `None` when it does not match the
    /// grammar; callers translate that into a NOT_FOUND reply.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = FID_PATTERN.captures(s)?;
        Some(Self {
            group: caps[1].to_string(),
            d1: caps[2].to_string(),
            d2: caps[3].to_string(),
            md5: caps[4].to_string(),
        })
    }

    /// Build the identifier of freshly ingested content from its digests.
    /// `crc32_hex` must be the 8-char lowercase hex CRC-32 of the payload.
    pub fn from_digests(group: &str, crc32_hex: &str, md5_hex: &str) -> Self {
        debug_assert_eq!(crc32_hex.len(), 8);
        debug_assert_eq!(md5_hex.len(), 32);
        Self {
            group: group.to_string(),
            d1: crc32_hex[4..6].to_uppercase(),
            d2: crc32_hex[6..8].to_uppercase(),
            md5: md5_hex.to_string(),
        }
    }

    /// Path of the object below the data directory: `D1/D2/md5`.
    pub fn relative_path(&self) -> PathBuf {
        [&self.d1, &self.d2, &self.md5].iter().collect()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.group, self.d1, self.d2, self.md5)
    }
}
