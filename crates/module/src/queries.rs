//! Query handlers for the auction module.
//!
//! These functions provide read-only access to auction state.

use serde::{Deserialize, Serialize};

use auction_types::{
    Address, Amount, AuctionConfig, AuctionId, AuctionStatus, Bid, SettlementResult,
};

use crate::distributor::DistributionProgress;
use crate::handlers::HandlerResult;
use crate::registry::{AuctionRegistry, AuctionSummary};

/// Query request types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQuery {
    /// Derived status snapshot.
    GetStatus { auction_id: AuctionId },

    GetConfig { auction_id: AuctionId },

    /// Settlement result, absent until the auction finishes.
    GetSettlement { auction_id: AuctionId },

    /// Every accepted bid, cancelled ones included. Fields stay encrypted.
    GetBids { auction_id: AuctionId },

    GetWithdrawable {
        auction_id: AuctionId,
        bidder: Address,
    },

    GetDistribution { auction_id: AuctionId },

    ListAuctions { offset: u64, limit: u64 },
}

/// Query response types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQueryResponse {
    Status(AuctionStatus),
    Config(AuctionConfig),
    Settlement(Option<SettlementResult>),
    Bids(Vec<Bid>),
    Withdrawable(Amount),
    Distribution(Option<DistributionProgress>),
    AuctionList(Vec<AuctionSummary>),
}

/// Handle a query.
pub fn handle_query(
    registry: &AuctionRegistry,
    query: AuctionQuery,
) -> HandlerResult<AuctionQueryResponse> {
    let response = match query {
        AuctionQuery::GetStatus { auction_id } => {
            AuctionQueryResponse::Status(registry.get_auction(auction_id)?.status())
        }

        AuctionQuery::GetConfig { auction_id } => {
            AuctionQueryResponse::Config(registry.get_auction(auction_id)?.config())
        }

        AuctionQuery::GetSettlement { auction_id } => {
            AuctionQueryResponse::Settlement(registry.get_auction(auction_id)?.settlement())
        }

        AuctionQuery::GetBids { auction_id } => AuctionQueryResponse::Bids(
            registry
                .get_auction(auction_id)?
                .read(|a| a.bids().to_vec()),
        ),

        AuctionQuery::GetWithdrawable { auction_id, bidder } => AuctionQueryResponse::Withdrawable(
            registry
                .get_auction(auction_id)?
                .read(|a| a.withdrawable(&bidder)),
        ),

        AuctionQuery::GetDistribution { auction_id } => AuctionQueryResponse::Distribution(
            registry
                .get_auction(auction_id)?
                .read(|a| a.distribution().cloned()),
        ),

        AuctionQuery::ListAuctions { offset, limit } => AuctionQueryResponse::AuctionList(
            registry
                .list_auctions()
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect(),
        ),
    };
    Ok(response)
}
