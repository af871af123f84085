//! Identity-Based Encryption of bid fields using BLS12-381 pairings.
//!
//! Every confidential value of an auction is encrypted to the auction identity.
//! Nobody can open it until the key holders jointly release σ = s·H(id).
//!
//! # Encryption
//!
//! To encrypt a value `v` to identity `id`:
//! 1. Compute id_hash = H_1(id) ∈ G1
//! 2. Sample random scalar r
//! 3. Compute U = r·G2 (ephemeral public key)
//! 4. Compute shared = e(id_hash, MPK)^r
//! 5. Derive symmetric key from shared
//! 6. Encrypt v (16 bytes, little-endian) with AES-GCM
//!
//! The encryptor keeps `r` as the witness for the input proof.
//!
//! # Decryption
//!
//! Given decryption key σ:
//! 1. Compute shared = e(σ, U)
//! 2. Derive symmetric key from shared
//! 3. Decrypt with AES-GCM and parse the value

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use auction_types::{ConfidentialValue, EncryptionKey, G1Point, G2Point};

use crate::error::CryptoError;

/// Plaintext width of a confidential value.
const VALUE_LEN: usize = 16;

/// Parameters for IBE encryption.
pub struct IbeParams {
    /// Master public key (MPK = s·G2 where s is the master secret)
    pub mpk: G2Affine,
}

impl IbeParams {
    /// Create IBE params from serialized G2 point.
    pub fn from_bytes(bytes: &[u8; 96]) -> Result<Self, CryptoError> {
        let mpk = decompress_g2(bytes)?;
        Ok(Self { mpk })
    }

    /// Create IBE params from the committee's published key.
    pub fn from_encryption_key(key: &EncryptionKey) -> Result<Self, CryptoError> {
        Self::from_bytes(&key.mpk.0)
    }
}

/// Encrypt a value to an identity.
///
/// Returns the ciphertext together with the randomness `r`, which the caller
/// needs to build an input proof and must discard afterwards.
pub fn encrypt_value<R: RngCore + CryptoRng>(
    params: &IbeParams,
    identity: &[u8],
    value: u128,
    rng: &mut R,
) -> Result<(ConfidentialValue, Scalar), CryptoError> {
    let id_hash = hash_to_g1(identity);
    let r = random_scalar(rng);

    let u = (G2Projective::generator() * r).to_affine();

    // e(H(id), MPK)^r = e(r·H(id), MPK)
    let r_id_hash = (G1Projective::from(id_hash) * r).to_affine();
    let key = derive_key_from_gt(&pairing(&r_id_hash, &params.mpk))?;

    let mut nonce_bytes = [0u8; 12];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Failed to create cipher: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), &value.to_le_bytes()[..])
        .map_err(|e| CryptoError::EncryptionFailed(format!("AES-GCM encryption failed: {}", e)))?;

    let value = ConfidentialValue {
        ephemeral_pubkey: compress_g2(&u),
        ciphertext,
        nonce: nonce_bytes,
    };
    Ok((value, r))
}

/// Decrypt a confidential value with the identity's decryption key.
pub fn decrypt_value(
    value: &ConfidentialValue,
    decryption_key: &G1Point,
) -> Result<u128, CryptoError> {
    let sigma = decompress_g1(&decryption_key.0)?;
    let u = decompress_g2(&value.ephemeral_pubkey.0)?;

    // e(σ, U) = e(s·H(id), r·G2) = e(H(id), MPK)^r
    let key = derive_key_from_gt(&pairing(&sigma, &u))?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&value.nonce), value.ciphertext.as_ref())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let bytes: [u8; VALUE_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidCiphertextFormat)?;
    Ok(u128::from_le_bytes(bytes))
}

/// Derive the full decryption key for an identity from the master secret.
///
/// Only a dealer or a test harness holds the master secret; key holders
/// produce the same key jointly through [`crate::threshold`].
pub fn derive_decryption_key(master_secret: &Scalar, identity: &[u8]) -> G1Point {
    let id_hash = hash_to_g1(identity);
    compress_g1(&(G1Projective::from(id_hash) * master_secret).to_affine())
}

/// Hash arbitrary data to a G1 point.
///
/// Simplified construction: the digest is reduced to a scalar and multiplied
/// onto the generator, retrying on the (negligible) zero case.
pub fn hash_to_g1(data: &[u8]) -> G1Affine {
    let mut counter = 0u32;
    loop {
        let counter_bytes = counter.to_le_bytes();
        let scalar = hash_to_scalar(&[b"AUCTION_H1_G1:".as_slice(), data, &counter_bytes]);
        if scalar != Scalar::ZERO {
            return (G1Projective::generator() * scalar).to_affine();
        }
        counter += 1;
    }
}

/// Hash a sequence of byte strings to a uniformly reduced scalar.
pub(crate) fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut wide = [0u8; 64];
    for (half, chunk) in wide.chunks_mut(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update([half as u8]);
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        chunk.copy_from_slice(&hasher.finalize());
    }
    Scalar::from_bytes_wide(&wide)
}

/// Generate a random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_wide(&bytes)
}

/// Derive a symmetric key from a GT element.
fn derive_key_from_gt(gt: &bls12_381::Gt) -> Result<[u8; 32], CryptoError> {
    // Gt has no canonical byte encoding in bls12_381; hash its debug form.
    let gt_digest = Sha256::digest(format!("{:?}", gt).as_bytes());

    let hk = Hkdf::<Sha256>::new(None, &gt_digest);
    let mut key = [0u8; 32];
    hk.expand(b"AUCTION-BID-KEY", &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(key)
}

/// Compress a G1 point to bytes.
pub fn compress_g1(point: &G1Affine) -> G1Point {
    G1Point(point.to_compressed())
}

/// Decompress a G1 point from bytes.
pub fn decompress_g1(bytes: &[u8; 48]) -> Result<G1Affine, CryptoError> {
    Option::from(G1Affine::from_compressed(bytes)).ok_or(CryptoError::InvalidG1Point)
}

/// Compress a G2 point to bytes.
pub fn compress_g2(point: &G2Affine) -> G2Point {
    G2Point(point.to_compressed())
}

/// Decompress a G2 point from bytes.
pub fn decompress_g2(bytes: &[u8; 96]) -> Result<G2Affine, CryptoError> {
    Option::from(G2Affine::from_compressed(bytes)).ok_or(CryptoError::InvalidG2Point)
}
