//! Bounded string descriptor table
//!
//! Index 0 is the supported-language entry. Its single UTF-16 code unit is the
//! language id, so `"\u{0409}"` encodes to the same bytes as a LANGID array
//! holding US English. Every lookup is bounds-checked: an index the caller
//! never supplied resolves to `None`, which the stack answers with a STALL.

use crate::error::{DescriptorError, Result};
use crate::types::DESC_STRING;

/// Maximum number of entries in a string table, language entry included
pub const MAX_STRING_DESCRIPTORS: usize = 8;

/// Maximum length of one string, in UTF-16 code units
pub const MAX_STRING_LEN: usize = 31;

/// Language entry for US English (0x0409)
pub const LANGUAGE_EN_US: &str = "\u{0409}";

/// Borrowed, validated view over caller-owned strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringTable<'a> {
    entries: &'a [&'a str],
}

impl<'a> StringTable<'a> {
    /// Validate `entries` against the declared count and the table bounds
    pub fn new(entries: &'a [&'a str], declared_count: usize) -> Result<Self> {
        if entries.len() != declared_count {
            return Err(DescriptorError::Inconsistent(format!(
                "string_count is {} but {} strings were supplied",
                declared_count,
                entries.len()
            )));
        }
        if entries.len() > MAX_STRING_DESCRIPTORS {
            return Err(DescriptorError::Inconsistent(format!(
                "{} strings exceed the table limit of {}",
                entries.len(),
                MAX_STRING_DESCRIPTORS
            )));
        }
        if let Some((index, s)) = entries
            .iter()
            .enumerate()
            .find(|(_, s)| s.encode_utf16().count() > MAX_STRING_LEN)
        {
            return Err(DescriptorError::Inconsistent(format!(
                "string {} is {} code units long (max {})",
                index,
                s.encode_utf16().count(),
                MAX_STRING_LEN
            )));
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a string by descriptor index
    pub fn get(&self, index: u8) -> Option<&'a str> {
        self.entries.get(index as usize).copied()
    }

    /// Language id advertised in entry 0, if any
    pub fn language_id(&self) -> Option<u16> {
        self.get(0).and_then(|s| s.encode_utf16().next())
    }

    /// Render a string descriptor (UTF-16LE payload) for the given index
    pub fn descriptor(&self, index: u8) -> Option<Vec<u8>> {
        let s = self.get(index)?;
        let units: Vec<u16> = s.encode_utf16().collect();

        let mut buf = Vec::with_capacity(2 + units.len() * 2);
        buf.push((2 + units.len() * 2) as u8);
        buf.push(DESC_STRING);
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        Some(buf)
    }
}
