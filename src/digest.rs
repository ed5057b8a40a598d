//! SHA-256 fingerprint of a specification's canonical text.
use crate::normalize::normalize;
use crate::util::sha256_hex;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex length of a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// A 64-character lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalDigest(String);

impl CanonicalDigest {
    /// Accept only the exact shape produced by [`compute`].
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != DIGEST_HEX_LEN {
            return Err(anyhow!(
                "digest must be {DIGEST_HEX_LEN} hex characters, got {}",
                raw.len()
            ));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(anyhow!("digest must be lowercase hex: {raw:?}"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CanonicalDigest {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CanonicalDigest> for String {
    fn from(value: CanonicalDigest) -> Self {
        value.0
    }
}

/// Digest of the normalized form of `spec_text`.
pub fn compute(spec_text: &str) -> CanonicalDigest {
    CanonicalDigest(sha256_hex(normalize(spec_text).as_bytes()))
}
