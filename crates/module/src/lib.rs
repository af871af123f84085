//! Clearing core for sealed-bid, uniform-price auctions.
//!
//! This module implements the on-ledger logic of an auction instance:
//!
//! - Configuration with a durable lock once bidding starts
//! - Confidential bid submission with input proofs and collateral escrow
//! - Staged reveal through an external decryption oracle
//! - Uniform-price clearing and exactly-once collateral release
//! - Settlement distribution through an asset-transfer collaborator
//!
//! # Architecture
//!
//! - `call`: Message types for state-changing operations
//! - `handlers`: Dispatch of calls onto auctions
//! - `queries`: Read-only state access
//! - `machine`: The per-auction state machine and its lock
//! - `ledger` / `escrow`: Bids and collateral of one auction
//! - `clearing`: Reveal and allocation
//! - `distributor`: Post-settlement transfers
//! - `registry`: Arena of auction instances
//! - `substrate`: Interfaces to the confidential-computation layer
//! - `config` / `platform`: Validation and fee schedule
//! - `error`: Error types
//!
//! # Example
//!
//! ```ignore
//! use auction_module::{handle_call, AuctionCall, AuctionRuntime, CallContext};
//!
//! let runtime = AuctionRuntime::new(verifier, oracle, distributor);
//! let ctx = CallContext::new(creator, now);
//!
//! handle_call(&runtime, &ctx, AuctionCall::CreateAuction { config }).await?;
//! handle_call(&runtime, &ctx, AuctionCall::Start { auction_id: 0 }).await?;
//! ```

pub mod call;
pub mod clearing;
pub mod config;
pub mod distributor;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod ledger;
pub mod machine;
pub mod platform;
pub mod queries;
pub mod registry;
pub mod substrate;

pub use call::{AuctionCall, CallContext};
pub use config::AuctionConfigUpdate;
pub use distributor::{
    AssetTransfer, DistributionProgress, Distributor, InMemoryAssetLedger, TransferError,
    TransferInstruction,
};
pub use error::AuctionError;
pub use handlers::{handle_call, AuctionRuntime, CallOutcome, HandlerResult};
pub use machine::{Auction, AuctionHandle};
pub use platform::PlatformConfig;
pub use queries::{handle_query, AuctionQuery, AuctionQueryResponse};
pub use registry::{AuctionRegistry, AuctionSummary};
pub use substrate::{
    BlsInputVerifier, DecryptionHandle, DecryptionOracle, InputVerifier, OracleError,
};
