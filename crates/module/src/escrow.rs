//! Collateral escrow with exactly-once release.

use std::collections::BTreeMap;

use auction_types::{Address, Amount};
use serde::{Deserialize, Serialize};

use crate::error::AuctionError;

/// Lifecycle of one bid's collateral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    Locked,
    /// Returned in full (cancel, terminate or losing bid)
    Refunded,
    /// Payment taken, remainder returned
    Settled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEntry {
    pub bidder: Address,
    pub amount: Amount,
    pub state: EscrowState,
}

/// Escrowed collateral of one auction.
///
/// Released funds accrue to a withdrawable balance per bidder; nothing is
/// pushed to bidders directly.
#[derive(Debug, Default)]
pub struct Escrow {
    entries: BTreeMap<u64, EscrowEntry>,
    withdrawable: BTreeMap<Address, Amount>,
    /// Payments taken from winning bids, owed to the organizer
    collected: Amount,
}

impl Escrow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&mut self, sequence_index: u64, bidder: Address, amount: Amount) {
        self.entries.insert(
            sequence_index,
            EscrowEntry {
                bidder,
                amount,
                state: EscrowState::Locked,
            },
        );
    }

    pub fn entry(&self, sequence_index: u64) -> Option<&EscrowEntry> {
        self.entries.get(&sequence_index)
    }

    /// Fail unless the entry exists and has not been released.
    pub fn ensure_locked(&self, sequence_index: u64) -> Result<&EscrowEntry, AuctionError> {
        match self.entries.get(&sequence_index) {
            Some(entry) if entry.state == EscrowState::Locked => Ok(entry),
            Some(_) => Err(AuctionError::CollateralReleased(sequence_index)),
            None => Err(AuctionError::BidNotFound(sequence_index)),
        }
    }

    /// Release the full amount back to the bidder.
    pub fn refund(&mut self, sequence_index: u64) -> Result<Amount, AuctionError> {
        self.release(sequence_index, 0)
    }

    /// Take `payment` and release the remainder back to the bidder.
    pub fn settle(&mut self, sequence_index: u64, payment: Amount) -> Result<Amount, AuctionError> {
        self.release(sequence_index, payment)
    }

    fn release(&mut self, sequence_index: u64, payment: Amount) -> Result<Amount, AuctionError> {
        let entry = self.ensure_locked(sequence_index)?;
        let refund = entry
            .amount
            .checked_sub(payment)
            .ok_or(AuctionError::CollateralShortfall {
                sequence_index,
                locked: entry.amount,
                owed: payment,
            })?;
        let collected = self
            .collected
            .checked_add(payment)
            .ok_or(AuctionError::ArithmeticOverflow)?;
        let bidder = entry.bidder;
        let balance = self.withdrawable.get(&bidder).copied().unwrap_or(0);
        let balance = balance
            .checked_add(refund)
            .ok_or(AuctionError::ArithmeticOverflow)?;

        // All checks passed; commit.
        self.collected = collected;
        self.withdrawable.insert(bidder, balance);
        if let Some(entry) = self.entries.get_mut(&sequence_index) {
            entry.state = if payment == 0 {
                EscrowState::Refunded
            } else {
                EscrowState::Settled
            };
        }
        Ok(refund)
    }

    pub fn withdrawable(&self, bidder: &Address) -> Amount {
        self.withdrawable.get(bidder).copied().unwrap_or(0)
    }

    /// Pull the bidder's whole released balance.
    pub fn withdraw(&mut self, bidder: &Address) -> Result<Amount, AuctionError> {
        match self.withdrawable.remove(bidder) {
            Some(amount) if amount > 0 => Ok(amount),
            _ => Err(AuctionError::NothingToWithdraw(*bidder)),
        }
    }

    pub fn collected(&self) -> Amount {
        self.collected
    }

    /// Collateral still locked across all bids.
    pub fn total_locked(&self) -> Amount {
        self.entries
            .values()
            .filter(|entry| entry.state == EscrowState::Locked)
            .map(|entry| entry.amount)
            .sum()
    }
}
