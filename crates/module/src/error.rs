//! Auction module error types.

use thiserror::Error;

use auction_types::{Address, AuctionId, AuctionPhase};

/// Errors that can occur in the auction module.
///
/// Every error is terminal to the call that produced it: a failed call
/// commits no mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error("Input proof does not verify against the submitted ciphertexts")]
    InvalidProof,

    #[error("Insufficient collateral: need {required}, got {got}")]
    InsufficientCollateral { required: u128, got: u128 },

    #[error("Bid limit exceeded: at most {limit} live bids per bidder")]
    BidLimitExceeded { limit: u32 },

    #[error("Auction is not live (phase: {0:?})")]
    NotLive(AuctionPhase),

    #[error("Auction already started (phase: {0:?})")]
    AlreadyStarted(AuctionPhase),

    #[error("Configuration is locked once the auction has started")]
    ConfigLocked,

    #[error("Auction is settling")]
    AuctionBusy,

    #[error("Settlement incomplete: {0}")]
    SettlementIncomplete(String),

    #[error("Collateral shortfall for bid {sequence_index}: locked {locked}, owed {owed}")]
    CollateralShortfall {
        sequence_index: u64,
        locked: u128,
        owed: u128,
    },

    #[error("Auction not found: {0}")]
    AuctionNotFound(AuctionId),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Bidding closed at {deadline}")]
    BiddingClosed { deadline: u64 },

    #[error("Deadline not reached and settle price not confirmed")]
    DeadlineNotReached,

    #[error("Bid not found: {0}")]
    BidNotFound(u64),

    #[error("Bid {0} belongs to another bidder")]
    NotBidOwner(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Auction has not finished")]
    NotFinished,

    #[error("Collateral of bid {0} already released")]
    CollateralReleased(u64),

    #[error("Nothing to withdraw for {}", hex_prefix(.0))]
    NothingToWithdraw(Address),

    #[error("Distribution failed: {0}")]
    DistributionFailed(String),

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

impl AuctionError {
    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuctionError::SettlementIncomplete(_))
    }
}

fn hex_prefix(address: &Address) -> String {
    hex::encode(&address[..4])
}
