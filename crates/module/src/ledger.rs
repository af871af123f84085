//! Append-only bid ledger for one auction.

use std::collections::BTreeSet;

use auction_types::{Address, Amount, AuctionConfig, Bid, ConfidentialValue};

use crate::error::AuctionError;

/// Accepted bids, indexed by sequence index.
///
/// `bids[i].sequence_index == i` always holds: indices are gapless and a
/// cancelled bid keeps its slot.
#[derive(Debug, Default)]
pub struct BidLedger {
    bids: Vec<Bid>,
    active: BTreeSet<u64>,
}

impl BidLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence index the next accepted bid receives.
    pub fn next_sequence(&self) -> u64 {
        self.bids.len() as u64
    }

    /// Every bid ever accepted, cancelled ones included.
    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    pub fn get(&self, sequence_index: u64) -> Option<&Bid> {
        self.bids.get(sequence_index as usize)
    }

    pub fn is_active(&self, sequence_index: u64) -> bool {
        self.active.contains(&sequence_index)
    }

    /// Bids still taking part in clearing, in sequence order.
    pub fn active_bids(&self) -> impl Iterator<Item = &Bid> + '_ {
        self.active
            .iter()
            .filter_map(move |index| self.bids.get(*index as usize))
    }

    pub fn all(&self) -> &[Bid] {
        &self.bids
    }

    pub fn live_count(&self, bidder: &Address) -> u32 {
        self.active_bids().filter(|bid| &bid.bidder == bidder).count() as u32
    }

    /// Per-bidder and per-auction admission policy.
    pub fn check_admission(
        &self,
        config: &AuctionConfig,
        bidder: &Address,
        collateral: Amount,
    ) -> Result<(), AuctionError> {
        let policy = &config.collateral_policy;
        if policy.required && collateral < policy.lock_amount_per_bid {
            return Err(AuctionError::InsufficientCollateral {
                required: policy.lock_amount_per_bid,
                got: collateral,
            });
        }

        if self.live_count(bidder) >= config.max_bids_per_bidder {
            return Err(AuctionError::BidLimitExceeded {
                limit: config.max_bids_per_bidder,
            });
        }

        Ok(())
    }

    /// Store a new immutable bid and return its sequence index.
    pub fn append(
        &mut self,
        bidder: Address,
        encrypted_quantity: ConfidentialValue,
        encrypted_price_per_unit: ConfidentialValue,
        locked_collateral: Amount,
        accepted_at: u64,
    ) -> u64 {
        let sequence_index = self.next_sequence();
        self.bids.push(Bid {
            bidder,
            sequence_index,
            encrypted_quantity,
            encrypted_price_per_unit,
            locked_collateral,
            accepted_at,
        });
        self.active.insert(sequence_index);
        sequence_index
    }

    /// Remove a bid from the active set. Returns false if it was not active.
    pub fn deactivate(&mut self, sequence_index: u64) -> bool {
        self.active.remove(&sequence_index)
    }
}
