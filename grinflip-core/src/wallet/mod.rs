pub mod instance;
pub mod manager;

pub use instance::{Approval, LocalWallet};
pub use manager::WalletManager;

use crate::chain::{SignedTransfer, UnsignedTransfer};
use crate::error::{GrinflipError, Result};
use crate::types::WalletAddress;
use async_trait::async_trait;
use bip39::{Language, Mnemonic};
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{schnorr, Message, Secp256k1};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// What settlement needs from a player's wallet, and nothing more.
///
/// A caller that cannot provide all three capabilities cannot construct a
/// wager; there is no partially-capable wallet type.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    fn address(&self) -> WalletAddress;

    /// Authorize a transfer out of this wallet. May wait on the player.
    async fn sign_transfer(&self, transfer: UnsignedTransfer) -> Result<SignedTransfer>;

    /// Sign an arbitrary message; used to derive client seeds.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

pub fn generate_mnemonic() -> Result<String> {
    let mut rng = bip39::rand::thread_rng();
    let mnemonic = Mnemonic::generate_in_with(&mut rng, Language::English, 24)
        .map_err(|e| GrinflipError::internal(format!("Failed to generate mnemonic: {}", e)))?;
    Ok(mnemonic.to_string())
}

pub fn mnemonic_to_keypair(mnemonic: &str) -> Result<Keypair> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic.trim())
        .map_err(|e| GrinflipError::key(format!("Invalid mnemonic: {}", e)))?;

    let seed = mnemonic.to_seed("");
    let secp = Secp256k1::new();

    let master_key = bitcoin::bip32::Xpriv::new_master(bitcoin::Network::Bitcoin, &seed)
        .map_err(|e| GrinflipError::key(format!("Failed to derive master key: {}", e)))?;

    let path = bitcoin::bip32::DerivationPath::from_str("m/86'/0'/0'/0/0")
        .map_err(|e| GrinflipError::key(format!("Invalid derivation path: {}", e)))?;

    let child_key = master_key
        .derive_priv(&secp, &path)
        .map_err(|e| GrinflipError::key(format!("Failed to derive child key: {}", e)))?;

    Ok(Keypair::from_secret_key(&secp, &child_key.private_key))
}

pub fn keypair_address(keypair: &Keypair) -> WalletAddress {
    WalletAddress::from_public_key(&keypair.x_only_public_key().0)
}

/// BIP340 signature over a 32-byte digest, without auxiliary randomness so
/// the same key and digest always give the same signature.
pub fn sign_digest(keypair: &Keypair, digest: [u8; 32]) -> Vec<u8> {
    let secp = Secp256k1::new();
    let msg = Message::from_digest(digest);
    secp.sign_schnorr_no_aux_rand(&msg, keypair).serialize().to_vec()
}

pub fn verify_digest(address: &WalletAddress, digest: [u8; 32], signature: &[u8]) -> Result<()> {
    let secp = Secp256k1::verification_only();
    let public_key = address.public_key()?;
    let sig = schnorr::Signature::from_slice(signature)
        .map_err(|e| GrinflipError::key(format!("Malformed signature: {}", e)))?;
    secp.verify_schnorr(&sig, &Message::from_digest(digest), &public_key)
        .map_err(|e| GrinflipError::key(format!("Signature does not verify: {}", e)))
}

pub fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"grinflip/message/v1");
    hasher.update(message);
    hasher.finalize().into()
}

pub fn sign_message(keypair: &Keypair, message: &[u8]) -> Vec<u8> {
    sign_digest(keypair, message_digest(message))
}

pub fn verify_message(address: &WalletAddress, message: &[u8], signature: &[u8]) -> Result<()> {
    verify_digest(address, message_digest(message), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_derivation_is_stable() {
        let mnemonic = generate_mnemonic().unwrap();
        let a = mnemonic_to_keypair(&mnemonic).unwrap();
        let b = mnemonic_to_keypair(&mnemonic).unwrap();
        assert_eq!(keypair_address(&a), keypair_address(&b));
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert!(mnemonic_to_keypair("not a real mnemonic").is_err());
    }

    #[test]
    fn test_message_signature() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let address = keypair_address(&keypair);
        let sig = sign_message(&keypair, b"grinflip:hello");
        assert_eq!(sig.len(), 64);
        verify_message(&address, b"grinflip:hello", &sig).unwrap();
        assert!(verify_message(&address, b"grinflip:other", &sig).is_err());
        // deterministic
        assert_eq!(sig, sign_message(&keypair, b"grinflip:hello"));
    }

    #[test]
    fn test_digest_signature_bytes() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let digest = message_digest(b"grinflip:bytes");
        let sig = sign_digest(&keypair, digest);

        let parsed = schnorr::Signature::from_slice(&sig).unwrap();
        assert_eq!(parsed.serialize().as_slice(), sig.as_slice());
        assert_eq!(hex::encode(&sig), parsed.to_string());
        verify_digest(&keypair_address(&keypair), digest, &sig).unwrap();
    }
}
