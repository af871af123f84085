//! Bid creation and encryption.

use rand::{CryptoRng, RngCore};
use thiserror::Error;

use auction_crypto::{encrypt_value, prove_input, IbeParams};
use auction_types::{
    compute_auction_identity, Address, Amount, AuctionId, ConfidentialValue, EncryptionKey,
    InputProof,
};

/// Errors that can occur during bid creation.
#[derive(Debug, Error)]
pub enum BidError {
    #[error("Invalid encryption key")]
    InvalidEncryptionKey,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Quantity times price overflows")]
    BidTooLarge,
}

/// A prepared bid ready for submission.
#[derive(Debug, Clone)]
pub struct PreparedBid {
    pub auction_id: AuctionId,
    pub bidder: Address,
    pub encrypted_quantity: ConfidentialValue,
    pub encrypted_price_per_unit: ConfidentialValue,
    /// Binds both ciphertexts to this bidder and auction
    pub proof: InputProof,
    /// Plaintext quantity (keep secret)
    pub quantity: Amount,
    /// Plaintext price per unit (keep secret)
    pub price_per_unit: Amount,
}

impl PreparedBid {
    /// Collateral that covers the worst case payment of this bid.
    ///
    /// A winner never pays more than `quantity × price_per_unit`, so locking
    /// this much guarantees settlement cannot fail on this bid.
    pub fn covering_collateral(&self) -> Amount {
        // Checked in `create_bid`
        self.quantity * self.price_per_unit
    }
}

/// Create an encrypted bid for an auction.
///
/// # Arguments
/// * `encryption_key` - Public key of the key-holder committee
/// * `auction_id` - ID of the auction to bid in
/// * `bidder` - Address that will submit the bid; the proof is bound to it
/// * `quantity` - Units requested
/// * `price_per_unit` - Highest price the bidder accepts per unit
/// * `rng` - Cryptographically secure random number generator
pub fn create_bid<R: RngCore + CryptoRng>(
    encryption_key: &EncryptionKey,
    auction_id: AuctionId,
    bidder: &Address,
    quantity: Amount,
    price_per_unit: Amount,
    rng: &mut R,
) -> Result<PreparedBid, BidError> {
    quantity
        .checked_mul(price_per_unit)
        .ok_or(BidError::BidTooLarge)?;

    let params =
        IbeParams::from_encryption_key(encryption_key).map_err(|_| BidError::InvalidEncryptionKey)?;
    let identity = compute_auction_identity(auction_id);

    let (encrypted_quantity, r_quantity) = encrypt_value(&params, &identity, quantity, rng)
        .map_err(|e| BidError::EncryptionFailed(e.to_string()))?;
    let (encrypted_price_per_unit, r_price) =
        encrypt_value(&params, &identity, price_per_unit, rng)
            .map_err(|e| BidError::EncryptionFailed(e.to_string()))?;

    let proof = prove_input(
        &identity,
        bidder,
        (&encrypted_quantity, &r_quantity),
        (&encrypted_price_per_unit, &r_price),
        rng,
    );

    Ok(PreparedBid {
        auction_id,
        bidder: *bidder,
        encrypted_quantity,
        encrypted_price_per_unit,
        proof,
        quantity,
        price_per_unit,
    })
}

/// Builder for creating bids with additional options.
pub struct BidBuilder {
    encryption_key: EncryptionKey,
    auction_id: AuctionId,
    bidder: Address,
    quantity: Amount,
    price_per_unit: Amount,
}

impl BidBuilder {
    pub fn new(encryption_key: EncryptionKey, auction_id: AuctionId, bidder: Address) -> Self {
        Self {
            encryption_key,
            auction_id,
            bidder,
            quantity: 0,
            price_per_unit: 0,
        }
    }

    pub fn quantity(mut self, quantity: Amount) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn price_per_unit(mut self, price: Amount) -> Self {
        self.price_per_unit = price;
        self
    }

    pub fn build<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<PreparedBid, BidError> {
        create_bid(
            &self.encryption_key,
            self.auction_id,
            &self.bidder,
            self.quantity,
            self.price_per_unit,
            rng,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_crypto::{aggregate_partial_keys, decrypt_value, deal_key_shares, verify_input_proof};
    use rand::rngs::OsRng;

    const BIDDER: Address = [0xb0; 32];

    #[test]
    fn test_create_bid_decrypts_under_released_key() {
        let mut rng = OsRng;
        let dealt = deal_key_shares(2, 3, &mut rng).unwrap();

        let bid = create_bid(&dealt.encryption_key, 7, &BIDDER, 500_000, 2_000, &mut rng).unwrap();
        assert_eq!(bid.covering_collateral(), 1_000_000_000);

        let identity = compute_auction_identity(7);
        let partials: Vec<_> = dealt.shares[1..]
            .iter()
            .map(|share| share.partial_key(&identity))
            .collect();
        let key = aggregate_partial_keys(&partials, 2).unwrap();

        assert_eq!(decrypt_value(&bid.encrypted_quantity, &key), Ok(500_000));
        assert_eq!(decrypt_value(&bid.encrypted_price_per_unit, &key), Ok(2_000));
    }

    #[test]
    fn test_proof_is_bound_to_bidder() {
        let mut rng = OsRng;
        let dealt = deal_key_shares(1, 1, &mut rng).unwrap();
        let bid = BidBuilder::new(dealt.encryption_key, 3, BIDDER)
            .quantity(10)
            .price_per_unit(4)
            .build(&mut rng)
            .unwrap();

        let identity = compute_auction_identity(3);
        assert!(verify_input_proof(
            &identity,
            &BIDDER,
            &bid.encrypted_quantity,
            &bid.encrypted_price_per_unit,
            &bid.proof
        )
        .is_ok());
        assert!(verify_input_proof(
            &identity,
            &[0xca; 32],
            &bid.encrypted_quantity,
            &bid.encrypted_price_per_unit,
            &bid.proof
        )
        .is_err());
    }

    #[test]
    fn test_overflowing_bid_rejected() {
        let mut rng = OsRng;
        let dealt = deal_key_shares(1, 1, &mut rng).unwrap();
        let result = create_bid(&dealt.encryption_key, 0, &BIDDER, Amount::MAX, 2, &mut rng);
        assert!(matches!(result, Err(BidError::BidTooLarge)));
    }
}
