use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Length of a hex encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 of an object's raw bytes.
///
/// Values produced by the hasher are always well formed. Values coming from outside
/// the store (request paths, CLI arguments) go through [`Digest::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let well_formed = value.len() == DIGEST_HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(StoreError::Validation(format!(
                "invalid sha256 digest '{value}': expected {DIGEST_HEX_LEN} lowercase hex characters"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub(crate) fn from_hash(hash: &[u8]) -> Self {
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, used to prefix labeled file names.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Digest {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_accepts_lowercase_hex() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(digest.as_str(), EMPTY_SHA256);
        assert_eq!(digest.short(), "e3b0c442");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Digest::parse("abc").unwrap_err().is_client_error());
        assert!(Digest::parse(&EMPTY_SHA256.to_uppercase()).is_err());
        assert!(Digest::parse(&format!("{}0", EMPTY_SHA256)).is_err());
        assert!(Digest::parse(&EMPTY_SHA256.replace('e', "g")).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let json = format!("\"{EMPTY_SHA256}\"");
        let digest: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&digest).unwrap(), json);

        assert!(serde_json::from_str::<Digest>("\"not-a-digest\"").is_err());
    }
}
