//! Threshold key release for bid decryption.
//!
//! In a (t, n) committee:
//! - n key holders each hold a Shamir share sk_i = f(i) of the master secret s = f(0)
//! - Any t holders can release the decryption key for an auction identity
//! - Fewer than t holders learn nothing about the key
//!
//! # Partial Key
//!
//! For identity `id`, holder i computes σ_i = sk_i · H(id) and publishes it.
//! Anyone can check it against the holder's public key PK_i = sk_i · G2:
//!
//! e(σ_i, G2) == e(H(id), PK_i)
//!
//! # Aggregation
//!
//! Given t verified partial keys, σ = Σ λ_i · σ_i where λ_i are Lagrange
//! coefficients at x = 0.

use bls12_381::{pairing, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{CryptoRng, RngCore};
use std::collections::HashSet;

use auction_types::{EncryptionKey, G1Point, G2Point, PartialKeyShare};

use crate::error::CryptoError;
use crate::ibe::{compress_g1, compress_g2, decompress_g1, decompress_g2, hash_to_g1, random_scalar};

/// One key holder's secret share.
#[derive(Clone, Debug)]
pub struct KeyShare {
    /// Evaluation point (1-based)
    pub index: u32,
    pub secret: Scalar,
}

impl KeyShare {
    /// PK_i = sk_i · G2
    pub fn public_key(&self) -> G2Point {
        compress_g2(&(G2Projective::generator() * self.secret).to_affine())
    }

    /// Produce this holder's partial decryption key for an identity.
    pub fn partial_key(&self, identity: &[u8]) -> PartialKeyShare {
        let id_point = hash_to_g1(identity);
        PartialKeyShare {
            holder_index: self.index,
            partial_key: compress_g1(&(G1Projective::from(id_point) * self.secret).to_affine()),
        }
    }
}

/// Output of a trusted dealer.
#[derive(Clone, Debug)]
pub struct DealtKeys {
    pub encryption_key: EncryptionKey,
    pub shares: Vec<KeyShare>,
}

/// Split a fresh master secret into `total` Shamir shares with threshold `threshold`.
pub fn deal_key_shares<R: RngCore + CryptoRng>(
    threshold: u32,
    total: u32,
    rng: &mut R,
) -> Result<DealtKeys, CryptoError> {
    if threshold == 0 || threshold > total {
        return Err(CryptoError::InvalidThreshold { threshold, total });
    }

    // f(x) = a_0 + a_1·x + ... + a_{t-1}·x^{t-1}, a_0 = s
    let coefficients: Vec<Scalar> = (0..threshold).map(|_| random_scalar(rng)).collect();
    let master_secret = coefficients[0];

    let shares = (1..=total)
        .map(|index| KeyShare {
            index,
            secret: evaluate_polynomial(&coefficients, &Scalar::from(index as u64)),
        })
        .collect();

    Ok(DealtKeys {
        encryption_key: EncryptionKey {
            mpk: compress_g2(&(G2Projective::generator() * master_secret).to_affine()),
            threshold,
            total_holders: total,
        },
        shares,
    })
}

/// Verify a partial key against the holder's public key.
pub fn verify_partial_key(
    share: &PartialKeyShare,
    identity: &[u8],
    holder_public_key: &G2Point,
) -> Result<(), CryptoError> {
    let partial = decompress_g1(&share.partial_key.0)?;
    let public_key = decompress_g2(&holder_public_key.0)?;
    let id_point = hash_to_g1(identity);

    if pairing(&partial, &G2Affine::generator()) == pairing(&id_point, &public_key) {
        Ok(())
    } else {
        Err(CryptoError::PartialKeyVerificationFailed(share.holder_index))
    }
}

/// Aggregate partial keys into the identity's decryption key.
pub fn aggregate_partial_keys(
    shares: &[PartialKeyShare],
    threshold: usize,
) -> Result<G1Point, CryptoError> {
    if shares.len() < threshold {
        return Err(CryptoError::InsufficientShares {
            required: threshold,
            got: shares.len(),
        });
    }

    let indices: Vec<u32> = shares.iter().map(|s| s.holder_index).collect();
    if indices.iter().collect::<HashSet<_>>().len() != indices.len() {
        return Err(CryptoError::DuplicateShareIndex);
    }
    if indices.contains(&0) {
        return Err(CryptoError::InvalidShareIndex);
    }

    let mut result = G1Projective::identity();
    for share in shares {
        let partial = decompress_g1(&share.partial_key.0)?;
        let lambda = lagrange_coefficient(share.holder_index, &indices)?;
        result += G1Projective::from(partial) * lambda;
    }

    Ok(compress_g1(&result.to_affine()))
}

/// Horner evaluation of f(x).
fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coeff| acc * x + coeff)
}

/// λ_i = Π_{j≠i} x_j / (x_j - x_i), evaluated at x = 0.
fn lagrange_coefficient(i: u32, indices: &[u32]) -> Result<Scalar, CryptoError> {
    let x_i = Scalar::from(i as u64);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &j in indices.iter().filter(|&&j| j != i) {
        let x_j = Scalar::from(j as u64);
        numerator *= x_j;
        denominator *= x_j - x_i;
    }

    Option::from(denominator.invert())
        .map(|inv: Scalar| numerator * inv)
        .ok_or(CryptoError::LagrangeInterpolationFailed)
}
