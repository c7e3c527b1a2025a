// src/hash.rs

//! Source checksums
//!
//! Formulas pin their source archive (and optionally each remote patch) with
//! a prefixed checksum string such as `sha256:<hex>` or `xxh128:<hex>`.
//!
//! | Algorithm | Hex length | Notes |
//! |-----------|-----------|-------|
//! | `sha256`  | 64 | Cryptographic, the default for upstream tarballs |
//! | `xxh128`  | 32 | Fast, for locally generated artifacts |

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Xxh128,
}

impl HashAlgorithm {
    /// Expected length of the hex digest
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Xxh128 => 32,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            other => Err(Error::ParseError(format!(
                "unsupported checksum algorithm: {other} (supported: sha256, xxh128)"
            ))),
        }
    }
}

/// A pinned checksum: algorithm plus lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    value: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.len() != algorithm.hex_len() {
            return Err(Error::ParseError(format!(
                "{algorithm} checksum must be {} hex characters, got {}",
                algorithm.hex_len(),
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("invalid hex in checksum: {value}")));
        }
        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Parse a prefixed checksum (`sha256:abc...`)
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, value) = s
            .split_once(':')
            .ok_or_else(|| Error::ParseError(format!("checksum must be 'algorithm:hex': {s}")))?;
        Self::new(algo.parse()?, value)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.value
    }

    /// Compute the checksum of a byte slice
    pub fn of_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let value = match algorithm {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(data)),
        };
        Self { algorithm, value }
    }

    /// Compute the checksum of a file
    pub fn of_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        match algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                let mut buffer = [0u8; 8192];
                loop {
                    let n = file.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
                Ok(Self {
                    algorithm,
                    value: hex::encode(hasher.finalize()),
                })
            }
            // XXH3 has no incremental API here, read the whole file
            HashAlgorithm::Xxh128 => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(Self::of_bytes(algorithm, &data))
            }
        }
    }

    /// Check whether a file on disk matches this checksum
    pub fn matches_file(&self, path: &Path) -> io::Result<bool> {
        Ok(Self::of_file(self.algorithm, path)?.value == self.value)
    }

    /// Key used for content-addressed caches (`sha256_abc...`)
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.algorithm, self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
