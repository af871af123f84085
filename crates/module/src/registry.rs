//! Arena of auction instances.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use auction_types::{Address, AuctionConfig, AuctionId, AuctionPhase};

use crate::call::CallContext;
use crate::error::AuctionError;
use crate::handlers::HandlerResult;
use crate::machine::{Auction, AuctionHandle};

/// Listing entry for one auction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSummary {
    pub auction_id: AuctionId,
    pub creator: Address,
    pub name: String,
    pub symbol: String,
    pub phase: AuctionPhase,
}

/// Creation record, in creation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionCreated {
    pub auction_id: AuctionId,
    pub creator: Address,
    pub created_at: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: AuctionId,
    auctions: BTreeMap<AuctionId, AuctionHandle>,
    created: Vec<AuctionCreated>,
}

/// Creates auctions and hands out their handles.
///
/// The registry lock only guards the id map. Each auction has its own lock,
/// so independent auctions never contend.
#[derive(Debug, Default)]
pub struct AuctionRegistry {
    state: RwLock<RegistryState>,
}

impl AuctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an auction owned by the sender. Ids start at 0.
    pub fn create_auction(
        &self,
        ctx: &CallContext,
        config: AuctionConfig,
    ) -> HandlerResult<AuctionId> {
        let mut state = self.state.write();
        let auction_id = state.next_id;
        let auction = Auction::new(auction_id, ctx.sender, config)?;

        state.next_id += 1;
        state.auctions.insert(auction_id, AuctionHandle::new(auction));
        state.created.push(AuctionCreated {
            auction_id,
            creator: ctx.sender,
            created_at: ctx.timestamp,
        });

        info!(auction_id, created_at = ctx.timestamp, "Auction created");
        Ok(auction_id)
    }

    pub fn get_auction(&self, auction_id: AuctionId) -> HandlerResult<AuctionHandle> {
        self.state
            .read()
            .auctions
            .get(&auction_id)
            .cloned()
            .ok_or(AuctionError::AuctionNotFound(auction_id))
    }

    pub fn list_auctions(&self) -> Vec<AuctionSummary> {
        // Clone handles first so no auction lock is taken under the registry lock.
        let handles: Vec<AuctionHandle> = self.state.read().auctions.values().cloned().collect();
        handles
            .iter()
            .map(|handle| {
                handle.read(|a| AuctionSummary {
                    auction_id: a.id(),
                    creator: *a.creator(),
                    name: a.config().name.clone(),
                    symbol: a.config().symbol.clone(),
                    phase: a.phase(),
                })
            })
            .collect()
    }

    pub fn creation_log(&self) -> Vec<AuctionCreated> {
        self.state.read().created.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().auctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
