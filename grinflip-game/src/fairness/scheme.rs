use crate::{GameError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const SEED_LEN: usize = 32;

/// Trait for commitment schemes
pub trait CommitmentScheme {
    type Secret;
    type Commitment;

    fn commit(secret: &Self::Secret) -> Self::Commitment;
    fn verify(commitment: &Self::Commitment, secret: &Self::Secret) -> bool;
}

/// House secret for one wager. Never logged; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSeed([u8; SEED_LEN]);

impl ServerSeed {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| {
            GameError::validation(format!(
                "Server seed must be {} bytes, got {}",
                SEED_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(seed))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| GameError::validation(format!("Server seed is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn from_array(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSeed(..)")
    }
}

/// Public SHA-256 commitment to a server seed, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commitment(String);

impl Commitment {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match hex::decode(&s) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(s)),
            _ => Err(GameError::validation(format!(
                "Commitment must be 32 hex-encoded bytes: '{}'",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Plain `SHA-256(server_seed)`.
pub struct Sha256Commitment;

impl CommitmentScheme for Sha256Commitment {
    type Secret = ServerSeed;
    type Commitment = Commitment;

    fn commit(secret: &ServerSeed) -> Commitment {
        Commitment(hex::encode(Sha256::digest(secret.as_bytes())))
    }

    fn verify(commitment: &Commitment, secret: &ServerSeed) -> bool {
        Self::commit(secret) == *commitment
    }
}
