use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

static TILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9+\-_.]*$").expect("tile name pattern"));

static CAMPAIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9_]*$").expect("campaign pattern"));

/// Processing campaign tag, e.g. `Y3A1_COADD`. Always stored uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Campaign(String);

impl Campaign {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Campaign {
    fn default() -> Self {
        Self("Y3A1_COADD".to_string())
    }
}

impl fmt::Display for Campaign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Campaign {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !CAMPAIGN_RE.is_match(&normalized) {
            return Err(FetchError::InvalidCampaign(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Campaign {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Campaign> for String {
    fn from(value: Campaign) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileName(String);

impl TileName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TileName {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !TILE_NAME_RE.is_match(trimmed) {
            return Err(FetchError::InvalidTileName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for TileName {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TileName> for String {
    fn from(value: TileName) -> Self {
        value.0
    }
}

/// Single-letter photometric band code. Case is significant (`Y` is not `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Band(char);

impl Band {
    pub fn as_char(&self) -> char {
        self.0
    }

    pub fn defaults() -> Vec<Band> {
        ['g', 'r', 'i', 'z', 'Y'].into_iter().map(Band).collect()
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Band {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut chars = value.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) if ch.is_ascii_alphabetic() => Ok(Self(ch)),
            _ => Err(FetchError::InvalidBand(value.to_string())),
        }
    }
}

impl TryFrom<String> for Band {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Band> for String {
    fn from(value: Band) -> Self {
        value.0.to_string()
    }
}

/// Lookup key of a cache row: `{tile}-{band}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(tile: &TileName, band: Band) -> Self {
        Self(format!("{tile}-{band}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product-type directory token; sibling products live in parallel trees that
/// differ only in this final path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductDir {
    Coadd,
    Cat,
    Aux,
    Seg,
    Psf,
}

impl ProductDir {
    pub fn token(&self) -> &'static str {
        match self {
            ProductDir::Coadd => "coadd",
            ProductDir::Cat => "cat",
            ProductDir::Aux => "aux",
            ProductDir::Seg => "seg",
            ProductDir::Psf => "psf",
        }
    }
}

impl fmt::Display for ProductDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
