//! Core type definitions for sealed-bid uniform-price auctions.
//!
//! This crate provides the shared data structures used across the auction system,
//! including confidential values, auction configurations, bids and settlement results.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeMap;

// =========================
// CRYPTOGRAPHIC PRIMITIVES
// =========================

/// Compressed G1 point on BLS12-381 (48 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G1Point(#[serde_as(as = "[_; 48]")] pub [u8; 48]);

impl Default for G1Point {
    fn default() -> Self {
        Self([0u8; 48])
    }
}

/// Compressed G2 point on BLS12-381 (96 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G2Point(#[serde_as(as = "[_; 96]")] pub [u8; 96]);

impl Default for G2Point {
    fn default() -> Self {
        Self([0u8; 96])
    }
}

/// Scalar field element (32 bytes, little-endian)
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Scalar(pub [u8; 32]);

// =========================
// CONFIDENTIAL VALUES
// =========================

/// Content-derived identifier of a confidential value.
pub type CiphertextHandle = [u8; 32];

/// Public encryption key of the key-holder committee (MPK = s·G2).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub mpk: G2Point,
    pub threshold: u32,
    pub total_holders: u32,
}

/// Threshold-IBE ciphertext of a single `u128`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConfidentialValue {
    /// Ephemeral public key: U = r·G2
    pub ephemeral_pubkey: G2Point,

    /// AES-256-GCM output (ciphertext || tag)
    pub ciphertext: Vec<u8>,

    /// Nonce for AEAD
    pub nonce: [u8; 12],
}

impl ConfidentialValue {
    /// Stable handle for this ciphertext. Equal ciphertexts share a handle.
    pub fn handle(&self) -> CiphertextHandle {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"CONFIDENTIAL_VALUE_V1:");
        hasher.update(self.ephemeral_pubkey.0);
        hasher.update(self.nonce);
        hasher.update(&self.ciphertext);
        hasher.finalize().into()
    }
}

/// Schnorr proof of knowledge of the encryption randomness `r` behind `U = r·G2`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct KnowledgeProof {
    /// R = k·G2
    pub commitment: G2Point,
    /// z = k + c·r
    pub response: Scalar,
}

/// Validity proof attached to a bid's two confidential fields.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct InputProof {
    pub quantity: KnowledgeProof,
    pub price: KnowledgeProof,
}

/// Partial decryption key from one key holder: σ_i = sk_i·H(id)
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PartialKeyShare {
    pub holder_index: u32,
    pub partial_key: G1Point,
}

// =========================
// AUCTION TYPES
// =========================

/// Generic address type (32 bytes)
pub type Address = [u8; 32];

/// Auction identifier assigned by the registry.
pub type AuctionId = u64;

/// Quantities, prices and collateral share one unsigned width.
pub type Amount = u128;

/// Kind of asset being auctioned.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum AssetType {
    /// Divisible token (ERC20-like)
    Fungible,
    /// One unique token per unit (ERC721-like)
    NonFungibleUnique,
    /// Semi-fungible batch under a single token id (ERC1155-like)
    NonFungibleBatch,
    /// Tokenized vault shares (ERC4626-like)
    VaultShare,
    /// Off-ledger offering, e.g. ad inventory
    Custom,
}

/// How the platform charges the organizer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum PaymentType {
    /// Share of the final proceeds
    FinalPriceShare,
    /// Share of the configured settle price volume
    SettlePriceShare,
}

/// Collateral each bid must lock at submission.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CollateralPolicy {
    pub required: bool,
    pub lock_amount_per_bid: Amount,
}

/// Auction timing. `started_at` and `deadline` are fixed by `start()`.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Timing {
    /// Bidding window length in seconds
    pub duration: u64,
    pub started_at: Option<u64>,
    pub deadline: Option<u64>,
}

/// Full auction configuration
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AuctionConfig {
    pub name: String,
    pub symbol: String,
    pub asset_type: AssetType,
    pub payment_type: PaymentType,
    pub total_supply: Amount,

    /// Optional early-stop price per unit
    pub settle_threshold: Option<Amount>,
    /// Close bidding as soon as the settle threshold is confirmed
    pub terminate_on_settle_price: bool,

    pub collateral_policy: CollateralPolicy,
    pub max_bids_per_bidder: u32,
    pub timing: Timing,

    /// Whether parties other than the creator may edit before start
    pub modifiable: bool,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            name: "Auction".to_string(),
            symbol: "AUC".to_string(),
            asset_type: AssetType::Fungible,
            payment_type: PaymentType::FinalPriceShare,
            total_supply: 1,
            settle_threshold: None,
            terminate_on_settle_price: false,
            collateral_policy: CollateralPolicy::default(),
            max_bids_per_bidder: 1,
            timing: Timing {
                duration: 86_400, // 1 day
                started_at: None,
                deadline: None,
            },
            modifiable: false,
        }
    }
}

/// Auction lifecycle phase
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum AuctionPhase {
    /// Configurable, not accepting bids
    Unstarted,
    /// Accepting bids
    Live,
    /// Reveal in flight; every mutation is rejected
    Settling,
    /// Closed without allocation
    Terminated,
    /// Cleared and settled
    Finished,
}

impl AuctionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionPhase::Terminated | AuctionPhase::Finished)
    }
}

/// An accepted bid. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: Address,
    pub sequence_index: u64,
    pub encrypted_quantity: ConfidentialValue,
    pub encrypted_price_per_unit: ConfidentialValue,
    pub locked_collateral: Amount,
    pub accepted_at: u64,
}

/// Plaintext view of a bid, only alive during clearing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevealedBid {
    pub sequence_index: u64,
    pub quantity: Amount,
    pub price_per_unit: Amount,
}

/// Per-bid outcome of clearing.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BidFill {
    pub sequence_index: u64,
    pub bidder: Address,
    pub quantity: Amount,
    pub payment: Amount,
}

/// Auction settlement result
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SettlementResult {
    pub auction_id: AuctionId,
    pub clearing_price: Amount,

    /// Bidders with a non-zero allocation
    #[serde_as(as = "Vec<(_, _)>")]
    pub allocations: BTreeMap<Address, Amount>,

    pub total_allocated: Amount,
    pub organizer_proceeds: Amount,

    /// One entry per revealed bid, in clearing order
    pub fills: Vec<BidFill>,
}

impl SettlementResult {
    /// Settlement of an auction that closed with no active bids.
    pub fn empty(auction_id: AuctionId) -> Self {
        Self {
            auction_id,
            clearing_price: 0,
            allocations: BTreeMap::new(),
            total_allocated: 0,
            organizer_proceeds: 0,
            fills: Vec::new(),
        }
    }

    /// Amount owed by a bidder across all of their winning bids.
    pub fn payment_of(&self, bidder: &Address) -> Amount {
        self.allocations
            .get(bidder)
            .map(|quantity| quantity * self.clearing_price)
            .unwrap_or(0)
    }
}

/// Observable status snapshot.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AuctionStatus {
    pub started: bool,
    pub terminated: bool,
    pub finished: bool,
    pub winners_calculated: bool,
    pub settle_price_met: bool,
    pub bid_count: u64,
    pub settle_price: Amount,
    pub auction_id: AuctionId,
}

/// Claim token issued to a winner for their allocation.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PositionReceipt {
    pub position_id: u64,
    pub auction_id: AuctionId,
    pub holder: Address,
    pub quantity: Amount,
    pub clearing_price: Amount,
}

// =========================
// HELPER FUNCTIONS
// =========================

/// Compute the IBE identity every confidential value of an auction is encrypted to.
pub fn compute_auction_identity(auction_id: AuctionId) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"AUCTION_IDENTITY_V2:");
    hasher.update(auction_id.to_le_bytes());
    hasher.finalize().into()
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(fill: u8) -> ConfidentialValue {
        ConfidentialValue {
            ephemeral_pubkey: G2Point([fill; 96]),
            ciphertext: vec![fill; 32],
            nonce: [fill; 12],
        }
    }

    #[test]
    fn test_compute_auction_identity() {
        let id1 = compute_auction_identity(0);
        let id2 = compute_auction_identity(1);

        assert_ne!(id1, id2);
        assert_eq!(id1, compute_auction_identity(0));
    }

    #[test]
    fn test_handle_tracks_content() {
        assert_eq!(value(1).handle(), value(1).handle());
        assert_ne!(value(1).handle(), value(2).handle());
    }

    #[test]
    fn test_g1_point_serialization() {
        let point = G1Point([42u8; 48]);
        let encoded = borsh::to_vec(&point).unwrap();
        let decoded: G1Point = borsh::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_settlement_json_keeps_allocations() {
        let mut result = SettlementResult::empty(7);
        result.clearing_price = 2;
        result.allocations.insert([1u8; 32], 400);
        result.total_allocated = 400;
        result.organizer_proceeds = 800;

        let json = serde_json::to_string(&result).unwrap();
        let decoded: SettlementResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.payment_of(&[1u8; 32]), 800);
        assert_eq!(decoded.payment_of(&[2u8; 32]), 0);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(AuctionPhase::Finished.is_terminal());
        assert!(AuctionPhase::Terminated.is_terminal());
        assert!(!AuctionPhase::Settling.is_terminal());
    }
}
