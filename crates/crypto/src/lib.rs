//! Threshold BLS encryption primitives for confidential bids.
//!
//! This crate implements Identity-Based Encryption (IBE) with threshold key
//! release on the BLS12-381 curve.
//!
//! # Overview
//!
//! 1. **Setup**: A dealer splits a master secret s into Shamir shares sk_i
//!    held by n key holders and publishes MPK = s·G2.
//!
//! 2. **Encryption**: Bidders encrypt quantity and price to the auction
//!    identity using only the MPK, and attach a proof that they know the
//!    encryption randomness.
//!
//! 3. **Key Release**: At settlement, key holders publish partial keys
//!    σ_i = sk_i · H(identity). Any t of them aggregate into σ = Σ λ_i · σ_i.
//!
//! 4. **Decryption**: Anyone with σ can decrypt every value of that auction.

pub mod error;
pub mod ibe;
pub mod proof;
pub mod threshold;

pub use error::CryptoError;
pub use ibe::{decrypt_value, derive_decryption_key, encrypt_value, IbeParams};
pub use proof::{prove_input, verify_input_proof};
pub use threshold::{
    aggregate_partial_keys, deal_key_shares, verify_partial_key, DealtKeys, KeyShare,
};
