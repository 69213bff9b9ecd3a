//! Secret identifiers: 128 random bits rendered as 32 lowercase hex chars.

use std::fmt;

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::Error;

/// Canonical identifier for a stored secret.
///
/// Constructed only through [`SecretId::new`] or [`SecretId::parse`], so a
/// `SecretId` in hand is always exactly 32 lowercase hex characters. That
/// property doubles as path-traversal protection wherever an id becomes a
/// filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretId(String);

impl SecretId {
    /// Mint a fresh identifier from 16 bytes of OS randomness.
    ///
    /// Fails only if the operating system random source fails; that is an
    /// `Internal` error and indicates something much worse than a bad
    /// request.
    pub fn new() -> Result<Self, Error> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("read random bytes for secret id")?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Validate an untrusted string and wrap it. Returns `InvalidId` unless
    /// the input is exactly 32 chars of `[0-9a-f]`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if !is_valid_id(s) {
            return Err(Error::InvalidId);
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocation-free validation used by `parse` and by the blob store when
/// screening directory entries.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
}
