//! `PathSpec` — an in-game resource path, reduced to the hashes SqPack
//! actually indexes on.
//!
//! A game path like `bg/ffxiv/sea_s1/twn/common/texture/s1t0_a0_aset1.tex`
//! resolves to a `(category, expac, part)` triplet plus three CRC32 hashes:
//! the hash of everything before the last `/`, the hash of the final path
//! component, and the hash of the whole string. Readers can look an entry up
//! from either the (path_hash, name_hash) pair or the full_hash alone
//! without ever storing the original string, though a text locator table
//! preserves it for display and for resolving synonyms.

use crate::crc::{crc32, crc32_combine, SLASH_HASH_VALUE};

/// Resolved location of an archive within the wider SqPack installation:
/// which category, which expansion, which part (dat-set) a path's
/// `category/expac/part` folder segments map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveId {
    pub category: u8,
    pub expac: u8,
    pub part: u8,
}

impl ArchiveId {
    pub fn new(category: u8, expac: u8, part: u8) -> Self {
        Self { category, expac, part }
    }

    /// 24-bit packed form used in directory/file names: `0x CC EE PP`.
    pub fn packed_id(&self) -> u32 {
        ((self.category as u32) << 16) | ((self.expac as u32) << 8) | self.part as u32
    }
}

/// A resource path reduced to its lookup hashes, with the original text kept
/// when known.
///
/// Two `PathSpec`s compare equal when their full hash matches; if both carry
/// text, the text must match too (so a hash collision between two distinct
/// real paths is still detected whenever the original string is available).
#[derive(Debug, Clone)]
pub struct PathSpec {
    id: ArchiveId,
    path_hash: u32,
    name_hash: u32,
    full_hash: u32,
    text: Option<String>,
}

impl PathSpec {
    /// Build a `PathSpec` from a slash-delimited in-game path, computing all
    /// three hashes and resolving the archive id from the first path
    /// component via the category table.
    ///
    /// `.` segments are dropped and `..` segments pop the preceding
    /// component, mirroring the original game client's path normalization.
    /// Matching is case-insensitive: hashes are computed over the
    /// lowercased bytes of each segment, but the text stored for display
    /// keeps the caller's original casing.
    pub fn parse(path: &str) -> Self {
        let normalized = normalize_segments(path);
        let joined = normalized.join("/");

        let id = category_lookup(&normalized);

        let (dir, name) = match joined.rfind('/') {
            Some(idx) => (&joined[..idx], &joined[idx + 1..]),
            None => ("", joined.as_str()),
        };

        let path_hash = hash_segment(dir);
        let name_hash = hash_segment(name);
        let full_hash = if dir.is_empty() {
            name_hash
        } else {
            // full = crc(dir) combined with crc('/') combined with crc(name),
            // each operand already complemented by hash_segment, so undo the
            // complement before combining and redo it after (crc32_combine
            // operates on raw, non-complemented CRC state).
            let raw_dir = !path_hash;
            let raw_name = !name_hash;
            let with_slash = crc32_combine(raw_dir, SLASH_HASH_VALUE, 1);
            !crc32_combine(with_slash, raw_name, name.len() as u64)
        };

        Self {
            id,
            path_hash,
            name_hash,
            full_hash,
            text: Some(joined),
        }
    }

    /// Build a `PathSpec` from hashes alone, as read back out of an index
    /// hash-locator table with no corresponding text locator entry.
    pub fn from_hashes(id: ArchiveId, path_hash: u32, name_hash: u32, full_hash: u32) -> Self {
        Self { id, path_hash, name_hash, full_hash, text: None }
    }

    /// Build a `PathSpec` from a full hash alone (index2's hash-locator
    /// table carries only this).
    pub fn from_full_hash(id: ArchiveId, full_hash: u32) -> Self {
        Self { id, path_hash: 0, name_hash: 0, full_hash, text: None }
    }

    /// The sentinel empty path spec: all hashes `0xFFFFFFFF`, used for
    /// reserved/placeholder slots that carry no real path.
    pub fn empty(id: ArchiveId) -> Self {
        Self {
            id,
            path_hash: 0xFFFF_FFFF,
            name_hash: 0xFFFF_FFFF,
            full_hash: 0xFFFF_FFFF,
            text: None,
        }
    }

    /// Whether this is the sentinel empty path spec.
    pub fn is_empty(&self) -> bool {
        self.full_hash == 0xFFFF_FFFF && self.path_hash == 0xFFFF_FFFF && self.name_hash == 0xFFFF_FFFF
    }

    pub fn archive_id(&self) -> ArchiveId {
        self.id
    }

    pub fn path_hash(&self) -> u32 {
        self.path_hash
    }

    pub fn name_hash(&self) -> u32 {
        self.name_hash
    }

    pub fn full_hash(&self) -> u32 {
        self.full_hash
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attach recovered text (e.g. from an index1 text-locator table) to a
    /// hash-only `PathSpec`, without recomputing hashes.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Human-readable label for logging and error messages: the original
    /// path if known, otherwise `category/expac/part@full_hash`.
    pub fn display_name(&self) -> String {
        match &self.text {
            Some(t) => t.clone(),
            None => format!(
                "{}@{:08x}",
                self.category_prefix(),
                self.full_hash
            ),
        }
    }

    /// The installation-relative prefix for this spec's archive, e.g.
    /// `bg/ffxiv/sea_s1` or `exd`: most categories are flat,
    /// `bg`/`bgcommon`/`cut`/`music` additionally fold in the expac number.
    pub fn category_prefix(&self) -> String {
        let name = category_name(self.id.category);
        match self.id.category {
            0x02 => format!("bg/ex{}", self.id.expac), // bg
            0x03 => format!("cut/ex{}", self.id.expac), // cut
            0x0c => format!("music/ex{}", self.id.expac), // music
            _ if self.id.expac != 0 => format!("{name}/ex{}", self.id.expac),
            _ => name.to_string(),
        }
    }

    /// Compare two specs using only the (path_hash, name_hash) pair, as
    /// index1's hash-locator table is ordered.
    pub fn pair_hash_eq(&self, other: &PathSpec) -> bool {
        self.path_hash == other.path_hash && self.name_hash == other.name_hash
    }

    /// Compare two specs using only the full hash, as index2's hash-locator
    /// table is ordered.
    pub fn full_hash_eq(&self, other: &PathSpec) -> bool {
        self.full_hash == other.full_hash
    }

    /// Strict comparison: archive id, full hash, and (if both sides have
    /// it) the original text must all agree.
    pub fn full_path_eq(&self, other: &PathSpec) -> bool {
        if self.id != other.id || self.full_hash != other.full_hash {
            return false;
        }
        match (&self.text, &other.text) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

impl PartialEq for PathSpec {
    fn eq(&self, other: &Self) -> bool {
        self.full_path_eq(other)
    }
}

impl Eq for PathSpec {}

/// Hash one path segment (directory prefix or file name), returning the
/// bit-complemented CRC32 the index tables store.
fn hash_segment(segment: &str) -> u32 {
    let lower = segment.to_ascii_lowercase();
    !crc32(lower.as_bytes())
}

fn normalize_segments(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => {
                out.pop();
            }
            s => out.push(s.to_string()),
        }
    }
    out
}

/// Category table mapping installation folder names to numeric category
/// ids. Categories whose folder layout nests an
/// `exN` expansion segment (and, for `bg` only, a part segment after it)
/// fold those into the archive id; everything else defaults to
/// `(expac=0, part=0)` — `cut` has an expansion segment but never a part.
fn category_lookup(segments: &[String]) -> ArchiveId {
    let first = segments.first().map(String::as_str).unwrap_or("");
    let category = category_id(first);

    if !matches!(category, 0x01 | 0x02 | 0x03 | 0x0c) {
        return ArchiveId::new(category, 0, 0);
    }

    let expac = segments
        .get(1)
        .and_then(|s| s.strip_prefix("ex"))
        .and_then(|n| n.parse::<u8>().ok())
        .unwrap_or(0);

    // Only `bg` derives a part id from its third segment; `cut` always
    // stays at part 0.
    let part = if category == 0x02 {
        segments.get(2).map(|s| part_id_for_segment(s)).unwrap_or(0)
    } else {
        0
    };

    ArchiveId::new(category, expac, part)
}

/// `bg` nests one more folder level (e.g. `bg/ex2/01_a_uss/...`); the part
/// id is the segment's leading decimal digits, truncated to `u8`, mirroring
/// `strtol(&segment[0], nullptr, 10)` cast to `uint8_t`.
fn part_id_for_segment(segment: &str) -> u8 {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().unwrap_or(0) as u8
}

fn category_id(name: &str) -> u8 {
    match name {
        "common" => 0x00,
        "bgcommon" => 0x01,
        "bg" => 0x02,
        "cut" => 0x03,
        "chara" => 0x04,
        "shader" => 0x05,
        "ui" => 0x06,
        "sound" => 0x07,
        "vfx" => 0x08,
        "ui_script" => 0x09,
        "exd" => 0x0a,
        "game_script" => 0x0b,
        "music" => 0x0c,
        "sqpack_test" => 0x12,
        "debug" => 0x13,
        _ => 0x00,
    }
}

fn category_name(id: u8) -> &'static str {
    match id {
        0x00 => "common",
        0x01 => "bgcommon",
        0x02 => "bg",
        0x03 => "cut",
        0x04 => "chara",
        0x05 => "shader",
        0x06 => "ui",
        0x07 => "sound",
        0x08 => "vfx",
        0x09 => "ui_script",
        0x0a => "exd",
        0x0b => "game_script",
        0x0c => "music",
        0x12 => "sqpack_test",
        0x13 => "debug",
        _ => "common",
    }
}
