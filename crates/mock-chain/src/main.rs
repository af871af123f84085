//! Auction node for local testing of sealed-bid uniform-price auctions.
//!
//! This provides a JSON-RPC server over an auction registry, with a simulated
//! clock and a locally dealt key-holder committee serving decryption.

use anyhow::Result;
use clap::Parser;
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::Server;
use jsonrpsee::types::ErrorObjectOwned;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use auction_module::{
    handle_call, handle_query, AuctionCall, AuctionConfigUpdate, AuctionError, AuctionQuery,
    AuctionQueryResponse, AuctionRuntime, BlsInputVerifier, CallContext, CallOutcome,
    Distributor, InMemoryAssetLedger,
};
use auction_types::{Amount, AuctionConfig, AuctionId, AuctionStatus, EncryptionKey};
use decryption_coordinator::{spawn_key_holders, ThresholdGateway};

mod config;
mod types;

use config::NodeConfig;
use types::*;

/// Simulated chain clock.
struct ChainClock {
    block_height: u64,
    timestamp: u64,
    block_time: u64,
}

impl ChainClock {
    fn advance_block(&mut self) {
        self.block_height += 1;
        self.timestamp += self.block_time;
    }

    fn info(&self) -> BlockInfo {
        BlockInfo {
            height: self.block_height,
            timestamp: self.timestamp,
        }
    }
}

/// RPC API definition for the auction node.
#[rpc(server)]
pub trait AuctionNodeApi {
    // ============ Admin Methods ============

    /// Advance the chain by one block.
    #[method(name = "admin_advanceBlock")]
    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    /// Set the current timestamp (for testing time-dependent logic).
    #[method(name = "admin_setTimestamp")]
    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<bool, ErrorObjectOwned>;

    // ============ Auction Methods ============

    #[method(name = "auction_create")]
    async fn auction_create(&self, params: CreateAuctionParams)
        -> Result<AuctionId, ErrorObjectOwned>;

    #[method(name = "auction_configure")]
    async fn auction_configure(
        &self,
        sender: String,
        auction_id: AuctionId,
        update: AuctionConfigUpdate,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_setModifiable")]
    async fn auction_set_modifiable(
        &self,
        sender: String,
        auction_id: AuctionId,
        modifiable: bool,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_start")]
    async fn auction_start(&self, sender: String, auction_id: AuctionId)
        -> Result<bool, ErrorObjectOwned>;

    /// Submit an encrypted bid. Returns its sequence index.
    #[method(name = "auction_submitBid")]
    async fn auction_submit_bid(&self, params: SubmitBidParams) -> Result<u64, ErrorObjectOwned>;

    /// Cancel a bid. Returns the refunded collateral.
    #[method(name = "auction_cancelBid")]
    async fn auction_cancel_bid(
        &self,
        sender: String,
        auction_id: AuctionId,
        sequence_index: u64,
    ) -> Result<Amount, ErrorObjectOwned>;

    #[method(name = "auction_terminate")]
    async fn auction_terminate(
        &self,
        sender: String,
        auction_id: AuctionId,
        reason: String,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_confirmSettlePrice")]
    async fn auction_confirm_settle_price(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Reveal and clear. Retryable if the decryption service is unavailable.
    #[method(name = "auction_finish")]
    async fn auction_finish(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<SettlementRpc, ErrorObjectOwned>;

    #[method(name = "auction_distribute")]
    async fn auction_distribute(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<DistributionRpc, ErrorObjectOwned>;

    #[method(name = "auction_withdraw")]
    async fn auction_withdraw(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<Amount, ErrorObjectOwned>;

    // ============ Query Methods ============

    #[method(name = "chain_getBlockInfo")]
    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    #[method(name = "query_getEncryptionKey")]
    async fn query_get_encryption_key(&self) -> Result<EncryptionKeyRpc, ErrorObjectOwned>;

    #[method(name = "query_getStatus")]
    async fn query_get_status(&self, auction_id: AuctionId)
        -> Result<AuctionStatus, ErrorObjectOwned>;

    #[method(name = "query_getConfig")]
    async fn query_get_config(&self, auction_id: AuctionId)
        -> Result<AuctionConfig, ErrorObjectOwned>;

    #[method(name = "query_getSettlement")]
    async fn query_get_settlement(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<SettlementRpc>, ErrorObjectOwned>;

    #[method(name = "query_getBids")]
    async fn query_get_bids(&self, auction_id: AuctionId) -> Result<Vec<BidRpc>, ErrorObjectOwned>;

    #[method(name = "query_getWithdrawable")]
    async fn query_get_withdrawable(
        &self,
        auction_id: AuctionId,
        bidder: String,
    ) -> Result<Amount, ErrorObjectOwned>;

    #[method(name = "query_getDistribution")]
    async fn query_get_distribution(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<DistributionRpc>, ErrorObjectOwned>;

    #[method(name = "query_listAuctions")]
    async fn query_list_auctions(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AuctionSummaryRpc>, ErrorObjectOwned>;
}

/// Implementation of the auction node RPC server.
struct AuctionNode {
    runtime: Arc<AuctionRuntime>,
    clock: Arc<RwLock<ChainClock>>,
    encryption_key: EncryptionKey,
}

impl AuctionNode {
    /// Build a node with a freshly dealt committee whose holders already serve.
    fn start(config: &NodeConfig) -> Result<Self> {
        let (gateway, encryption_key, holders) =
            ThresholdGateway::deal(config.gateway.clone(), &mut OsRng)?;
        spawn_key_holders(&gateway, holders);

        let distributor = Distributor::new(
            Arc::new(InMemoryAssetLedger::new()),
            config.platform.clone(),
        );
        let runtime = AuctionRuntime::new(Arc::new(BlsInputVerifier), Arc::new(gateway), distributor);

        Ok(Self {
            runtime: Arc::new(runtime),
            clock: Arc::new(RwLock::new(ChainClock {
                block_height: 0,
                timestamp: config.initial_timestamp,
                block_time: config.block_time,
            })),
            encryption_key,
        })
    }

    fn context(&self, sender: &str, value: Amount) -> Result<CallContext, ErrorObjectOwned> {
        let sender = parse_address(sender).map_err(Self::rpc_error)?;
        let timestamp = self.clock.read().timestamp;
        Ok(CallContext::new(sender, timestamp).with_value(value))
    }

    async fn call(
        &self,
        sender: &str,
        value: Amount,
        call: AuctionCall,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let ctx = self.context(sender, value)?;
        handle_call(&self.runtime, &ctx, call)
            .await
            .map_err(Self::auction_error)
    }

    fn query(&self, query: AuctionQuery) -> Result<AuctionQueryResponse, ErrorObjectOwned> {
        handle_query(&self.runtime.registry, query).map_err(Self::auction_error)
    }

    fn rpc_error(msg: impl ToString) -> ErrorObjectOwned {
        ErrorObjectOwned::owned(-32000, msg.to_string(), None::<()>)
    }

    /// Retryable failures get their own code so clients can tell them apart.
    fn auction_error(e: AuctionError) -> ErrorObjectOwned {
        let code = if e.is_retryable() { -32001 } else { -32000 };
        ErrorObjectOwned::owned(code, e.to_string(), None::<()>)
    }

    fn unexpected<T: std::fmt::Debug>(got: T) -> ErrorObjectOwned {
        Self::rpc_error(format!("Unexpected response: {:?}", got))
    }
}

#[async_trait]
impl AuctionNodeApiServer for AuctionNode {
    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        let mut clock = self.clock.write();
        clock.advance_block();
        Ok(clock.info())
    }

    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<bool, ErrorObjectOwned> {
        self.clock.write().timestamp = timestamp;
        info!(timestamp, "Timestamp set");
        Ok(true)
    }

    async fn auction_create(
        &self,
        params: CreateAuctionParams,
    ) -> Result<AuctionId, ErrorObjectOwned> {
        match self
            .call(&params.sender, 0, AuctionCall::CreateAuction { config: params.config })
            .await?
        {
            CallOutcome::Created(auction_id) => {
                info!(auction_id, "Created auction");
                Ok(auction_id)
            }
            other => Err(Self::unexpected(other)),
        }
    }

    async fn auction_configure(
        &self,
        sender: String,
        auction_id: AuctionId,
        update: AuctionConfigUpdate,
    ) -> Result<bool, ErrorObjectOwned> {
        self.call(&sender, 0, AuctionCall::SetConfig { auction_id, update })
            .await?;
        Ok(true)
    }

    async fn auction_set_modifiable(
        &self,
        sender: String,
        auction_id: AuctionId,
        modifiable: bool,
    ) -> Result<bool, ErrorObjectOwned> {
        self.call(
            &sender,
            0,
            AuctionCall::SetConfigModifiable {
                auction_id,
                modifiable,
            },
        )
        .await?;
        Ok(true)
    }

    async fn auction_start(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<bool, ErrorObjectOwned> {
        self.call(&sender, 0, AuctionCall::Start { auction_id }).await?;
        info!(auction_id, "Auction started");
        Ok(true)
    }

    async fn auction_submit_bid(&self, params: SubmitBidParams) -> Result<u64, ErrorObjectOwned> {
        let call = AuctionCall::SubmitBid {
            auction_id: params.auction_id,
            encrypted_quantity: (&params.encrypted_quantity)
                .try_into()
                .map_err(Self::rpc_error)?,
            encrypted_price_per_unit: (&params.encrypted_price_per_unit)
                .try_into()
                .map_err(Self::rpc_error)?,
            proof: (&params.proof).try_into().map_err(Self::rpc_error)?,
        };

        match self.call(&params.sender, params.collateral, call).await? {
            CallOutcome::BidAccepted(sequence_index) => {
                info!(
                    auction_id = params.auction_id,
                    sequence_index,
                    bidder = %params.sender,
                    "Bid submitted"
                );
                Ok(sequence_index)
            }
            other => Err(Self::unexpected(other)),
        }
    }

    async fn auction_cancel_bid(
        &self,
        sender: String,
        auction_id: AuctionId,
        sequence_index: u64,
    ) -> Result<Amount, ErrorObjectOwned> {
        match self
            .call(
                &sender,
                0,
                AuctionCall::CancelBid {
                    auction_id,
                    sequence_index,
                },
            )
            .await?
        {
            CallOutcome::Refunded(amount) => Ok(amount),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn auction_terminate(
        &self,
        sender: String,
        auction_id: AuctionId,
        reason: String,
    ) -> Result<bool, ErrorObjectOwned> {
        self.call(&sender, 0, AuctionCall::Terminate { auction_id, reason })
            .await?;
        info!(auction_id, "Auction terminated");
        Ok(true)
    }

    async fn auction_confirm_settle_price(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<bool, ErrorObjectOwned> {
        self.call(&sender, 0, AuctionCall::ConfirmSettlePrice { auction_id })
            .await?;
        Ok(true)
    }

    async fn auction_finish(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<SettlementRpc, ErrorObjectOwned> {
        match self.call(&sender, 0, AuctionCall::Finish { auction_id }).await? {
            CallOutcome::Settled(result) => {
                info!(
                    auction_id,
                    clearing_price = result.clearing_price,
                    total_allocated = result.total_allocated,
                    "Auction finished"
                );
                Ok(SettlementRpc::from(&result))
            }
            other => Err(Self::unexpected(other)),
        }
    }

    async fn auction_distribute(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<DistributionRpc, ErrorObjectOwned> {
        match self.call(&sender, 0, AuctionCall::Distribute { auction_id }).await? {
            CallOutcome::Distributed(progress) => Ok(DistributionRpc::from(&progress)),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn auction_withdraw(
        &self,
        sender: String,
        auction_id: AuctionId,
    ) -> Result<Amount, ErrorObjectOwned> {
        match self.call(&sender, 0, AuctionCall::Withdraw { auction_id }).await? {
            CallOutcome::Withdrawn(amount) => {
                info!(auction_id, amount, "Collateral withdrawn");
                Ok(amount)
            }
            other => Err(Self::unexpected(other)),
        }
    }

    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        Ok(self.clock.read().info())
    }

    async fn query_get_encryption_key(&self) -> Result<EncryptionKeyRpc, ErrorObjectOwned> {
        Ok(EncryptionKeyRpc::from(&self.encryption_key))
    }

    async fn query_get_status(
        &self,
        auction_id: AuctionId,
    ) -> Result<AuctionStatus, ErrorObjectOwned> {
        match self.query(AuctionQuery::GetStatus { auction_id })? {
            AuctionQueryResponse::Status(status) => Ok(status),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_get_config(
        &self,
        auction_id: AuctionId,
    ) -> Result<AuctionConfig, ErrorObjectOwned> {
        match self.query(AuctionQuery::GetConfig { auction_id })? {
            AuctionQueryResponse::Config(config) => Ok(config),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_get_settlement(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<SettlementRpc>, ErrorObjectOwned> {
        match self.query(AuctionQuery::GetSettlement { auction_id })? {
            AuctionQueryResponse::Settlement(result) => Ok(result.as_ref().map(SettlementRpc::from)),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_get_bids(&self, auction_id: AuctionId) -> Result<Vec<BidRpc>, ErrorObjectOwned> {
        match self.query(AuctionQuery::GetBids { auction_id })? {
            AuctionQueryResponse::Bids(bids) => Ok(bids.iter().map(BidRpc::from).collect()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_get_withdrawable(
        &self,
        auction_id: AuctionId,
        bidder: String,
    ) -> Result<Amount, ErrorObjectOwned> {
        let bidder = parse_address(&bidder).map_err(Self::rpc_error)?;
        match self.query(AuctionQuery::GetWithdrawable { auction_id, bidder })? {
            AuctionQueryResponse::Withdrawable(amount) => Ok(amount),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_get_distribution(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<DistributionRpc>, ErrorObjectOwned> {
        match self.query(AuctionQuery::GetDistribution { auction_id })? {
            AuctionQueryResponse::Distribution(progress) => {
                Ok(progress.as_ref().map(DistributionRpc::from))
            }
            other => Err(Self::unexpected(other)),
        }
    }

    async fn query_list_auctions(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AuctionSummaryRpc>, ErrorObjectOwned> {
        match self.query(AuctionQuery::ListAuctions { offset, limit })? {
            AuctionQueryResponse::AuctionList(list) => {
                Ok(list.iter().map(AuctionSummaryRpc::from).collect())
            }
            other => Err(Self::unexpected(other)),
        }
    }
}

#[derive(Parser)]
#[command(name = "auction-node")]
#[command(about = "JSON-RPC node hosting sealed-bid uniform-price auctions")]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Key-holder threshold, overrides the config file
    #[arg(long)]
    threshold: Option<u32>,

    /// Number of key holders, overrides the config file
    #[arg(long)]
    holders: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("auction_node=info".parse()?)
                .add_directive("decryption_coordinator=info".parse()?)
                .add_directive("jsonrpsee=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(threshold) = args.threshold {
        config.gateway.threshold = threshold;
    }
    if let Some(holders) = args.holders {
        config.gateway.total_holders = holders;
    }
    config.validate()?;

    let addr = config.listen_addr()?;
    let node = AuctionNode::start(&config)?;

    info!(
        %addr,
        threshold = config.gateway.threshold,
        holders = config.gateway.total_holders,
        "Starting auction node"
    );

    let server = Server::builder().build(addr).await?;
    let handle = server.start(node.into_rpc());

    info!("Auction node running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    handle.stop()?;
    handle.stopped().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_client::create_bid;
    use auction_types::CollateralPolicy;

    const CREATOR: &str = "c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0";
    const BOB: [u8; 32] = [0xb0; 32];

    fn node() -> AuctionNode {
        let mut config = NodeConfig::default();
        config.initial_timestamp = 1_000;
        AuctionNode::start(&config).unwrap()
    }

    async fn bid(node: &AuctionNode, auction_id: AuctionId, quantity: Amount, price: Amount) -> u64 {
        let prepared =
            create_bid(&node.encryption_key, auction_id, &BOB, quantity, price, &mut OsRng).unwrap();
        node.auction_submit_bid(SubmitBidParams {
            sender: hex::encode(BOB),
            auction_id,
            encrypted_quantity: (&prepared.encrypted_quantity).into(),
            encrypted_price_per_unit: (&prepared.encrypted_price_per_unit).into(),
            proof: (&prepared.proof).into(),
            collateral: prepared.covering_collateral(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_over_rpc_methods() {
        let node = node();
        let config = AuctionConfig {
            total_supply: 100,
            collateral_policy: CollateralPolicy {
                required: true,
                lock_amount_per_bid: 1,
            },
            timing: auction_types::Timing {
                duration: 60,
                ..Default::default()
            },
            ..Default::default()
        };

        let auction_id = node
            .auction_create(CreateAuctionParams {
                sender: CREATOR.into(),
                config,
            })
            .await
            .unwrap();
        assert!(node.auction_start(CREATOR.into(), auction_id).await.unwrap());
        assert_eq!(bid(&node, auction_id, 40, 7).await, 0);

        // Bidding window still open
        let early = node.auction_finish(CREATOR.into(), auction_id).await;
        assert!(early.is_err());

        node.admin_set_timestamp(2_000).await.unwrap();
        let settlement = node.auction_finish(CREATOR.into(), auction_id).await.unwrap();
        assert_eq!(settlement.clearing_price, 7);
        assert_eq!(settlement.total_allocated, 40);
        assert_eq!(settlement.allocations[0].payment, 280);

        let status = node.query_get_status(auction_id).await.unwrap();
        assert!(status.finished);

        let listed = node.query_list_auctions(0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].phase, "finished");
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let node = node();
        let err = node.query_get_status(9).await.unwrap_err();
        assert_eq!(err.code(), -32000);

        let err = node
            .auction_start("not hex".into(), 0)
            .await
            .unwrap_err();
        assert!(err.message().contains("address"));
    }

    #[tokio::test]
    async fn test_advance_block_moves_clock() {
        let node = node();
        let info = node.admin_advance_block().await.unwrap();
        assert_eq!(info.height, 1);
        assert_eq!(info.timestamp, 1_012);
    }
}
