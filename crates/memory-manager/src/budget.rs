// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocator byte ceilings.
//!
//! A [`MemoryBudget`] caps the bytes a [`crate::HeapAllocator`] may hold at
//! once. It is written as a byte count with an optional binary suffix and
//! serialises in that form, so configs carry `memory_budget = "64M"`.

use crate::MemoryError;
use std::fmt;
use std::str::FromStr;

/// Binary suffixes, longest spelling first so `"MB"` wins over `"B"`.
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("G", 1 << 30),
    ("M", 1 << 20),
    ("K", 1 << 10),
    ("B", 1),
];

/// A non-zero ceiling on live allocator bytes.
///
/// ```
/// use memory_manager::MemoryBudget;
///
/// let budget: MemoryBudget = "64M".parse().unwrap();
/// assert_eq!(budget.as_bytes(), 64 << 20);
/// assert_eq!(budget.to_string(), "64M");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemoryBudget(usize);

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self(bytes)
    }

    pub fn from_mb(mb: usize) -> Self {
        Self(mb << 20)
    }

    pub fn as_bytes(self) -> usize {
        self.0
    }

    /// Whole mebibytes, truncated.
    pub fn as_mb(self) -> usize {
        self.0 >> 20
    }
}

impl FromStr for MemoryBudget {
    type Err = MemoryError;

    /// Parses `"512M"`, `"1GB"`, `"2048k"` or a raw byte count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let upper = text.to_ascii_uppercase();
        let (digits, unit) = SUFFIXES
            .iter()
            .find_map(|(suffix, unit)| upper.strip_suffix(suffix).map(|d| (d, *unit)))
            .unwrap_or((upper.as_str(), 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| MemoryError::InvalidBudget(format!("'{text}' is not a byte count with K, M or G suffix")))?;
        match value.checked_mul(unit) {
            Some(0) => Err(MemoryError::InvalidBudget(format!("'{text}' is zero"))),
            Some(bytes) => Ok(Self(bytes)),
            None => Err(MemoryError::InvalidBudget(format!("'{text}' overflows"))),
        }
    }
}

impl TryFrom<String> for MemoryBudget {
    type Error = MemoryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MemoryBudget> for String {
    fn from(budget: MemoryBudget) -> Self {
        budget.to_string()
    }
}

/// The largest suffix that divides the byte count exactly.
impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (suffix, unit) = SUFFIXES[3..6]
            .iter()
            .find(|(_, unit)| self.0 % unit == 0)
            .copied()
            .unwrap_or(("", 1));
        write!(f, "{}{suffix}", self.0 / unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        let cases = [
            ("512M", 512 << 20),
            ("512mb", 512 << 20),
            ("1G", 1 << 30),
            ("2gb", 2 << 30),
            ("2048K", 2 << 20),
            ("100B", 100),
            ("  4096 ", 4096),
        ];
        for (text, bytes) in cases {
            assert_eq!(text.parse::<MemoryBudget>().unwrap().as_bytes(), bytes, "{text}");
        }
    }

    #[test]
    fn test_parse_invalid() {
        for text in ["", "lots", "M", "0M", "-1K", "99999999999999999999G"] {
            assert!(
                matches!(text.parse::<MemoryBudget>(), Err(MemoryError::InvalidBudget(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_display_uses_largest_exact_suffix() {
        assert_eq!(MemoryBudget::from_mb(1024).to_string(), "1G");
        assert_eq!(MemoryBudget::from_mb(64).to_string(), "64M");
        assert_eq!(MemoryBudget::from_bytes(3 << 10).to_string(), "3K");
        assert_eq!(MemoryBudget::from_bytes(1000).to_string(), "1000");
        assert_eq!(MemoryBudget::from_mb(3).as_mb(), 3);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&MemoryBudget::from_mb(256)).unwrap();
        assert_eq!(json, "\"256M\"");
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MemoryBudget::from_mb(256));
        assert!(serde_json::from_str::<MemoryBudget>("\"0K\"").is_err());
    }
}
