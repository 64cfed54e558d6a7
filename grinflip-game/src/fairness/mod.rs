//! Commit-reveal outcome generation.
//!
//! The house commits to `SHA-256(server_seed)` before the player fixes a
//! client seed. The side is then
//!
//! ```text
//! digest = SHA-256("grinflip/v1" || server_seed || SHA-256(client_seed))
//! side   = heads if digest[0] is even, tails otherwise
//! ```
//!
//! Both inputs after the tag are exactly 32 bytes, so anyone holding the
//! revealed seeds can recompute the result.

pub mod scheme;

pub use scheme::{Commitment, CommitmentScheme, ServerSeed, Sha256Commitment, SEED_LEN};

use crate::{GameError, Result};
use grinflip_core::Side;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const OUTCOME_DOMAIN: &[u8] = b"grinflip/v1";

/// Draw a fresh server seed from the OS and commit to it.
pub fn commit() -> Result<(ServerSeed, Commitment)> {
    commit_with(&mut OsRng)
}

/// Like [`commit`] with an explicit entropy source. A failing source is fatal.
pub fn commit_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<(ServerSeed, Commitment)> {
    let mut bytes = [0u8; SEED_LEN];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| GameError::Randomness(e.to_string()))?;

    let seed = ServerSeed::from_array(bytes);
    let commitment = Sha256Commitment::commit(&seed);
    Ok((seed, commitment))
}

pub fn reveal(server_seed: &ServerSeed, client_seed: &[u8]) -> Side {
    let client_digest = Sha256::digest(client_seed);

    let mut hasher = Sha256::new();
    hasher.update(OUTCOME_DOMAIN);
    hasher.update(server_seed.as_bytes());
    hasher.update(client_digest);
    let digest = hasher.finalize();

    if digest[0] & 1 == 0 {
        Side::Heads
    } else {
        Side::Tails
    }
}

pub fn verify(server_seed: &ServerSeed, client_seed: &[u8], claimed: Side) -> bool {
    reveal(server_seed, client_seed) == claimed
}

pub fn verify_commitment(commitment: &Commitment, server_seed: &ServerSeed) -> bool {
    Sha256Commitment::verify(commitment, server_seed)
}

/// Text the player signs to produce the client seed. The commitment is part
/// of it, so the signature proves the player saw the commitment first.
pub fn client_seed_message(wager_id: Uuid, commitment: &Commitment, unix_millis: i64) -> String {
    format!("grinflip:{}:{}:{}", wager_id, commitment, unix_millis)
}

/// Everything a player needs to check a flip after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessProof {
    pub commitment: Commitment,
    pub server_seed: String,
    pub client_seed: String,
    pub result: Side,
}

impl FairnessProof {
    pub fn new(
        commitment: Commitment,
        server_seed: &ServerSeed,
        client_seed: &[u8],
        result: Side,
    ) -> Self {
        Self {
            commitment,
            server_seed: server_seed.to_hex(),
            client_seed: hex::encode(client_seed),
            result,
        }
    }

    /// Check the commitment opens to the seed and the seeds give the result.
    pub fn verify(&self) -> Result<bool> {
        let seed = ServerSeed::from_hex(&self.server_seed)?;
        let client_seed = hex::decode(&self.client_seed)
            .map_err(|e| GameError::validation(format!("Client seed is not hex: {}", e)))?;

        Ok(verify_commitment(&self.commitment, &seed) && verify(&seed, &client_seed, self.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0)
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source gone",
            )))
        }
    }

    #[test]
    fn test_commit_then_verify() {
        let (seed, commitment) = commit().unwrap();
        let client_seed = b"player signature bytes";
        let result = reveal(&seed, client_seed);

        assert!(verify_commitment(&commitment, &seed));
        assert!(verify(&seed, client_seed, result));
        assert!(!verify(&seed, client_seed, result.opposite()));
    }

    #[test]
    fn test_reveal_is_deterministic() {
        let seed = ServerSeed::from_bytes(&[42u8; SEED_LEN]).unwrap();
        let first = reveal(&seed, b"client");
        for _ in 0..10 {
            assert_eq!(reveal(&seed, b"client"), first);
        }
    }

    #[test]
    fn test_randomness_failure_is_fatal() {
        assert!(matches!(
            commit_with(&mut BrokenRng),
            Err(GameError::Randomness(_))
        ));
    }

    #[test]
    fn test_outcome_is_fair() {
        let trials = 10_000;
        let mut heads = 0;
        let mut client_seed = [0u8; 32];
        for _ in 0..trials {
            let (seed, _) = commit().unwrap();
            OsRng.fill_bytes(&mut client_seed);
            if reveal(&seed, &client_seed) == Side::Heads {
                heads += 1;
            }
        }
        let ratio = heads as f64 / trials as f64;
        assert!((0.48..=0.52).contains(&ratio), "heads ratio {}", ratio);
    }

    #[test]
    fn test_fairness_proof() {
        let (seed, commitment) = commit().unwrap();
        let result = reveal(&seed, b"sig");
        let proof = FairnessProof::new(commitment, &seed, b"sig", result);
        assert!(proof.verify().unwrap());

        let mut forged = proof.clone();
        forged.result = result.opposite();
        assert!(!forged.verify().unwrap());

        let mut swapped = proof;
        swapped.server_seed = ServerSeed::from_bytes(&[1u8; SEED_LEN]).unwrap().to_hex();
        assert!(!swapped.verify().unwrap());
    }

    #[test]
    fn test_client_seed_message_binds_commitment() {
        let (_, commitment) = commit().unwrap();
        let id = Uuid::new_v4();
        let message = client_seed_message(id, &commitment, 1_700_000_000_000);
        assert_eq!(
            message,
            format!("grinflip:{}:{}:1700000000000", id, commitment)
        );
    }
}
