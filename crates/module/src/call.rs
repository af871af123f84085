//! Call message types for the auction module.

use auction_types::{Address, AuctionConfig, AuctionId, ConfidentialValue, InputProof};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::config::AuctionConfigUpdate;

/// Context provided by the runtime for each call.
#[derive(Clone, Copy, Debug)]
pub struct CallContext {
    /// Sender of the transaction
    pub sender: Address,
    /// Current timestamp (seconds)
    pub timestamp: u64,
    /// Value attached to the call (collateral for bids)
    pub value: u128,
}

impl CallContext {
    pub fn new(sender: Address, timestamp: u64) -> Self {
        Self {
            sender,
            timestamp,
            value: 0,
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// Call messages for the auction module.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum AuctionCall {
    // === Registry ===
    /// Create a new auction owned by the sender.
    CreateAuction { config: AuctionConfig },

    // === Configuration (Unstarted only) ===
    SetConfig {
        auction_id: AuctionId,
        update: AuctionConfigUpdate,
    },

    SetConfigModifiable {
        auction_id: AuctionId,
        modifiable: bool,
    },

    // === Lifecycle ===
    Start { auction_id: AuctionId },

    /// Submit a sealed bid. The attached value is the collateral.
    SubmitBid {
        auction_id: AuctionId,
        encrypted_quantity: ConfidentialValue,
        encrypted_price_per_unit: ConfidentialValue,
        proof: InputProof,
    },

    CancelBid {
        auction_id: AuctionId,
        sequence_index: u64,
    },

    Terminate {
        auction_id: AuctionId,
        reason: String,
    },

    /// Creator attests that the settle threshold has been met.
    ConfirmSettlePrice { auction_id: AuctionId },

    /// Reveal, clear and settle (permissionless once eligible).
    Finish { auction_id: AuctionId },

    // === Post-settlement ===
    Distribute { auction_id: AuctionId },

    /// Claim released collateral.
    Withdraw { auction_id: AuctionId },
}
