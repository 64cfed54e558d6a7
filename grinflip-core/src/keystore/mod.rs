//! Password-encrypted house key file.

pub mod encryption;

use crate::error::{GrinflipError, Result};
use crate::types::WalletAddress;
use crate::wallet::{keypair_address, mnemonic_to_keypair};
use base64::{engine::general_purpose, Engine as _};
use bitcoin::key::Keypair;
use chrono::{DateTime, Utc};
use encryption::Sealed;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PASSWORD_ENV: &str = "GRINFLIP_HOUSE_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeystore {
    pub version: u32,
    pub encryption_method: String,
    pub address: WalletAddress,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl EncryptedKeystore {
    /// Encrypt `mnemonic` under `password`. The address is stored in clear so
    /// the config can be checked without unlocking.
    pub fn seal(mnemonic: &str, password: &str) -> Result<Self> {
        let keypair = mnemonic_to_keypair(mnemonic)?;
        let sealed = encryption::seal(mnemonic.as_bytes(), password)?;

        Ok(Self {
            version: 1,
            encryption_method: "ChaCha20Poly1305".to_string(),
            address: keypair_address(&keypair),
            salt: general_purpose::STANDARD.encode(&sealed.salt),
            nonce: general_purpose::STANDARD.encode(&sealed.nonce),
            ciphertext: general_purpose::STANDARD.encode(&sealed.ciphertext),
            checksum: sealed.checksum,
            created_at: Utc::now(),
        })
    }

    pub fn unlock(&self, password: &str) -> Result<String> {
        let decode = |field: &str, value: &str| {
            general_purpose::STANDARD
                .decode(value)
                .map_err(|e| GrinflipError::keystore(format!("Bad {} encoding: {}", field, e)))
        };
        let sealed = Sealed {
            salt: decode("salt", &self.salt)?,
            nonce: decode("nonce", &self.nonce)?,
            ciphertext: decode("ciphertext", &self.ciphertext)?,
            checksum: self.checksum.clone(),
        };

        let plaintext = encryption::open(&sealed, password)?;
        String::from_utf8(plaintext)
            .map_err(|_| GrinflipError::keystore("Keystore does not hold a mnemonic"))
    }

    /// Unlock and derive the keypair, refusing a keystore whose key does not
    /// match the address it claims.
    pub fn keypair(&self, password: &str) -> Result<Keypair> {
        let keypair = mnemonic_to_keypair(&self.unlock(password)?)?;
        if keypair_address(&keypair) != self.address {
            return Err(GrinflipError::keystore(format!(
                "Keystore key does not match address {}",
                self.address
            )));
        }
        Ok(keypair)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("House keystore written to {}", path.display());
        Ok(())
    }
}
