use crate::error::{GrinflipError, Result};
use bip39::rand::{rngs::OsRng, RngCore};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};

pub const SALT_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Output of [`seal`]: everything [`open`] needs besides the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub checksum: String,
}

pub fn seal(plaintext: &[u8], password: &str) -> Result<Sealed> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let cipher = ChaCha20Poly1305::new(&derive_key(password, &salt));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| GrinflipError::keystore(format!("Encryption failed: {}", e)))?;

    Ok(Sealed {
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        checksum: checksum(&ciphertext),
        ciphertext,
    })
}

pub fn open(sealed: &Sealed, password: &str) -> Result<Vec<u8>> {
    if checksum(&sealed.ciphertext) != sealed.checksum {
        return Err(GrinflipError::keystore("Keystore checksum mismatch"));
    }
    if sealed.nonce.len() != NONCE_SIZE {
        return Err(GrinflipError::keystore(format!(
            "Nonce must be {} bytes, got {}",
            NONCE_SIZE,
            sealed.nonce.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(&derive_key(password, &sealed.salt));
    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| GrinflipError::keystore("Wrong password or corrupted keystore"))
}

fn derive_key(password: &str, salt: &[u8]) -> Key {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    *Key::from_slice(&key)
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let sealed = seal(b"abandon abandon about", "hunter2").unwrap();
        assert_eq!(open(&sealed, "hunter2").unwrap(), b"abandon abandon about");
    }

    #[test]
    fn test_wrong_password() {
        let sealed = seal(b"secret", "right").unwrap();
        assert!(open(&sealed, "wrong").is_err());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let mut sealed = seal(b"secret", "pw").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(open(&sealed, "pw").is_err());
    }
}
