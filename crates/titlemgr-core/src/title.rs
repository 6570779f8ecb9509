//! Title, ticket and save data records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// 64-bit title identifier, displayed as 16 upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TitleId(pub u64);

impl TitleId {
    /// Upper 32 bits (the title category and platform).
    pub fn high(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Lower 32 bits (the unique id).
    pub fn low(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// A hex identifier failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} '{value}'")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

fn parse_hex(value: &str, kind: &'static str, max_digits: usize) -> Result<u64, ParseIdError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() || digits.len() > max_digits {
        return Err(ParseIdError {
            kind,
            value: value.to_string(),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|_| ParseIdError {
        kind,
        value: value.to_string(),
    })
}

impl FromStr for TitleId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, "title id", 16).map(Self)
    }
}

/// 32-bit system save data identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SaveId(pub u32);

impl fmt::Display for SaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for SaveId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, "save id", 8).map(|v| Self(v as u32))
    }
}

/// Storage medium a title or container lives on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Nand,
    Sd,
    #[strum(to_string = "gamecard", serialize = "card")]
    GameCard,
}

/// An installed ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub title_id: TitleId,
    /// Size of the stored ticket in bytes.
    pub size: u64,
}

/// A title whose installation was started but never committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTitleInfo {
    pub title_id: TitleId,
    pub media: MediaType,
    /// Bytes occupied by the pending content.
    pub size: u64,
}

/// A system save data container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSaveDataInfo {
    pub save_id: SaveId,
    pub size: u64,
}

/// An ext save data container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtSaveDataInfo {
    pub ext_id: TitleId,
    pub media: MediaType,
    /// Whether a BOSS (SpotPass) ext save data archive exists for this id.
    pub has_boss: bool,
    pub size: u64,
}
