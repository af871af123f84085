//! Input proofs for confidential bid fields.
//!
//! A bidder proves knowledge of the randomness `r` behind each ciphertext's
//! ephemeral key `U = r·G2` (Schnorr, Fiat-Shamir). The challenge binds the
//! auction identity, the bidder address, the field tag and the full
//! ciphertext, so a ciphertext lifted from another bidder or another auction
//! cannot be resubmitted with a fresh proof.

use bls12_381::{G2Projective, Scalar};
use group::Curve;
use rand::{CryptoRng, RngCore};

use auction_types::{Address, ConfidentialValue, InputProof, KnowledgeProof};

use crate::error::CryptoError;
use crate::ibe::{compress_g2, decompress_g2, hash_to_scalar, random_scalar};

/// Field tag for the encrypted quantity.
pub const QUANTITY_FIELD: &[u8] = b"quantity";
/// Field tag for the encrypted price per unit.
pub const PRICE_FIELD: &[u8] = b"price_per_unit";

/// Prove knowledge of `r` for one confidential field.
pub fn prove_knowledge<R: RngCore + CryptoRng>(
    identity: &[u8],
    bidder: &Address,
    field: &[u8],
    value: &ConfidentialValue,
    witness: &Scalar,
    rng: &mut R,
) -> KnowledgeProof {
    let k = random_scalar(rng);
    let commitment = compress_g2(&(G2Projective::generator() * k).to_affine());
    let c = challenge(identity, bidder, field, value, &commitment.0);

    KnowledgeProof {
        commitment,
        response: auction_types::Scalar((k + c * witness).to_bytes()),
    }
}

/// Build the proof for both fields of a bid.
pub fn prove_input<R: RngCore + CryptoRng>(
    identity: &[u8],
    bidder: &Address,
    quantity: (&ConfidentialValue, &Scalar),
    price: (&ConfidentialValue, &Scalar),
    rng: &mut R,
) -> InputProof {
    InputProof {
        quantity: prove_knowledge(identity, bidder, QUANTITY_FIELD, quantity.0, quantity.1, rng),
        price: prove_knowledge(identity, bidder, PRICE_FIELD, price.0, price.1, rng),
    }
}

/// Check z·G2 == R + c·U for one field.
pub fn verify_knowledge(
    identity: &[u8],
    bidder: &Address,
    field: &[u8],
    value: &ConfidentialValue,
    proof: &KnowledgeProof,
) -> Result<(), CryptoError> {
    let u = decompress_g2(&value.ephemeral_pubkey.0)?;
    let r = decompress_g2(&proof.commitment.0)?;
    let z: Scalar =
        Option::from(Scalar::from_bytes(&proof.response.0)).ok_or(CryptoError::InvalidScalar)?;
    let c = challenge(identity, bidder, field, value, &proof.commitment.0);

    let lhs = G2Projective::generator() * z;
    let rhs = G2Projective::from(r) + G2Projective::from(u) * c;
    if lhs == rhs {
        Ok(())
    } else {
        Err(CryptoError::ProofVerificationFailed)
    }
}

/// Verify a bid's input proof against both of its ciphertexts.
pub fn verify_input_proof(
    identity: &[u8],
    bidder: &Address,
    quantity: &ConfidentialValue,
    price: &ConfidentialValue,
    proof: &InputProof,
) -> Result<(), CryptoError> {
    verify_knowledge(identity, bidder, QUANTITY_FIELD, quantity, &proof.quantity)?;
    verify_knowledge(identity, bidder, PRICE_FIELD, price, &proof.price)
}

fn challenge(
    identity: &[u8],
    bidder: &Address,
    field: &[u8],
    value: &ConfidentialValue,
    commitment: &[u8; 96],
) -> Scalar {
    let handle = value.handle();
    hash_to_scalar(&[
        b"AUCTION_INPUT_PROOF_V1:".as_slice(),
        identity,
        bidder.as_slice(),
        field,
        handle.as_slice(),
        commitment.as_slice(),
    ])
}
