//! CLI for interacting with sealed-bid uniform-price auctions.
//!
//! This binary provides commands for:
//! - Creating, configuring and starting auctions
//! - Submitting encrypted bids and cancelling them
//! - Finishing, distributing and withdrawing collateral
//! - Querying auction status and settlement

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use auction_client::create_bid;
use auction_types::{
    Address, Amount, AssetType, AuctionConfig, AuctionStatus, CollateralPolicy, EncryptionKey,
    G2Point, PaymentType, Timing,
};

#[derive(Parser)]
#[command(name = "auction-cli")]
#[command(about = "CLI for sealed-bid uniform-price auctions")]
struct Cli {
    /// Auction node RPC endpoint
    #[arg(long, default_value = "http://127.0.0.1:9944")]
    rpc: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AssetKind {
    Fungible,
    Unique,
    Batch,
    Vault,
    Custom,
}

impl From<AssetKind> for AssetType {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Fungible => AssetType::Fungible,
            AssetKind::Unique => AssetType::NonFungibleUnique,
            AssetKind::Batch => AssetType::NonFungibleBatch,
            AssetKind::Vault => AssetType::VaultShare,
            AssetKind::Custom => AssetType::Custom,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FeeKind {
    FinalPrice,
    SettlePrice,
}

impl From<FeeKind> for PaymentType {
    fn from(kind: FeeKind) -> Self {
        match kind {
            FeeKind::FinalPrice => PaymentType::FinalPriceShare,
            FeeKind::SettlePrice => PaymentType::SettlePriceShare,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new auction
    Create {
        /// Sender address (hex)
        #[arg(long)]
        sender: String,

        #[arg(long, default_value = "Auction")]
        name: String,

        #[arg(long, default_value = "AUC")]
        symbol: String,

        #[arg(long, value_enum, default_value = "fungible")]
        asset_type: AssetKind,

        #[arg(long, value_enum, default_value = "final-price")]
        payment_type: FeeKind,

        /// Units on offer
        #[arg(long)]
        supply: Amount,

        /// Early-stop price per unit
        #[arg(long)]
        settle_threshold: Option<Amount>,

        /// Close bidding once the settle price is confirmed
        #[arg(long)]
        terminate_on_settle_price: bool,

        /// Collateral every bid must lock; omit for no requirement
        #[arg(long)]
        collateral: Option<Amount>,

        #[arg(long, default_value = "1")]
        max_bids: u32,

        /// Bidding window in seconds
        #[arg(long, default_value = "86400")]
        duration: u64,

        /// Let anyone edit the config before start
        #[arg(long)]
        modifiable: bool,
    },

    /// Update an unstarted auction's configuration
    Configure {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        symbol: Option<String>,

        #[arg(long)]
        supply: Option<Amount>,

        #[arg(long)]
        settle_threshold: Option<Amount>,

        /// Remove the settle threshold
        #[arg(long, conflicts_with = "settle_threshold")]
        clear_settle_threshold: bool,

        #[arg(long)]
        max_bids: Option<u32>,

        #[arg(long)]
        duration: Option<u64>,
    },

    /// Open bidding
    Start {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,
    },

    /// Submit an encrypted bid
    Bid {
        /// Sender address (hex)
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,

        /// Units requested (will be encrypted)
        #[arg(long)]
        quantity: Amount,

        /// Price per unit (will be encrypted)
        #[arg(long)]
        price: Amount,

        /// Collateral to lock; defaults to quantity × price
        #[arg(long)]
        collateral: Option<Amount>,
    },

    /// Cancel one of your bids
    Cancel {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,

        #[arg(long)]
        sequence_index: u64,
    },

    /// Terminate an auction without allocation
    Terminate {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,

        #[arg(long, default_value = "terminated by creator")]
        reason: String,
    },

    /// Confirm the settle price was met
    ConfirmSettlePrice {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,
    },

    /// Reveal bids and clear the auction
    Finish {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,
    },

    /// Run (or resume) settlement distribution
    Distribute {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,
    },

    /// Withdraw refunded collateral
    Withdraw {
        #[arg(long)]
        sender: String,

        #[arg(long)]
        auction_id: u64,
    },

    /// Get auction status
    Status {
        #[arg(long)]
        auction_id: u64,
    },

    /// Get settlement result
    Settlement {
        #[arg(long)]
        auction_id: u64,
    },

    /// List auctions
    List {
        #[arg(long, default_value = "0")]
        offset: u64,

        #[arg(long, default_value = "50")]
        limit: u64,
    },

    /// Advance chain time (for testing)
    AdvanceBlock,

    /// Set chain timestamp (for testing)
    SetTimestamp {
        #[arg(long)]
        timestamp: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptionKeyRpc {
    mpk: String,
    threshold: u32,
    total_holders: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockInfo {
    height: u64,
    timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AllocationRpc {
    bidder: String,
    quantity: Amount,
    payment: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettlementRpc {
    auction_id: u64,
    clearing_price: Amount,
    allocations: Vec<AllocationRpc>,
    total_allocated: Amount,
    organizer_proceeds: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
struct DistributionRpc {
    auction_id: u64,
    completed_steps: usize,
    total_steps: usize,
    complete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuctionSummaryRpc {
    auction_id: u64,
    creator: String,
    name: String,
    symbol: String,
    phase: String,
}

fn parse_address(s: &str) -> Result<Address> {
    hex::decode(s.trim_start_matches("0x"))?
        .try_into()
        .map_err(|_| anyhow!("Address must be 32 bytes"))
}

async fn encryption_key(client: &HttpClient) -> Result<EncryptionKey> {
    let key: EncryptionKeyRpc = client
        .request("query_getEncryptionKey", rpc_params![])
        .await?;
    let mpk: [u8; 96] = hex::decode(&key.mpk)?
        .try_into()
        .map_err(|_| anyhow!("Invalid MPK length"))?;
    Ok(EncryptionKey {
        mpk: G2Point(mpk),
        threshold: key.threshold,
        total_holders: key.total_holders,
    })
}

async fn submit_bid_cmd(
    client: &HttpClient,
    sender: &str,
    auction_id: u64,
    quantity: Amount,
    price: Amount,
    collateral: Option<Amount>,
) -> Result<()> {
    let bidder = parse_address(sender)?;
    let key = encryption_key(client).await?;

    let prepared = create_bid(&key, auction_id, &bidder, quantity, price, &mut OsRng)?;
    let collateral = collateral.unwrap_or_else(|| prepared.covering_collateral());

    let encode = |v: &auction_types::ConfidentialValue| {
        serde_json::json!({
            "ephemeral_pubkey": hex::encode(v.ephemeral_pubkey.0),
            "ciphertext": hex::encode(&v.ciphertext),
            "nonce": hex::encode(v.nonce)
        })
    };
    let encode_proof = |p: &auction_types::KnowledgeProof| {
        serde_json::json!({
            "commitment": hex::encode(p.commitment.0),
            "response": hex::encode(p.response.0)
        })
    };

    let params = serde_json::json!({
        "sender": sender,
        "auction_id": auction_id,
        "encrypted_quantity": encode(&prepared.encrypted_quantity),
        "encrypted_price_per_unit": encode(&prepared.encrypted_price_per_unit),
        "proof": {
            "quantity": encode_proof(&prepared.proof.quantity),
            "price": encode_proof(&prepared.proof.price)
        },
        "collateral": serde_json::to_value(collateral)?
    });

    let sequence_index: u64 = client
        .request("auction_submitBid", rpc_params![params])
        .await?;

    info!(auction_id, sequence_index, "Bid submitted");
    println!("Bid submitted successfully");
    println!("  Auction ID: {}", auction_id);
    println!("  Sequence Index: {}", sequence_index);
    println!("  Quantity: {} (encrypted)", quantity);
    println!("  Price: {} (encrypted)", price);
    println!("  Collateral: {}", collateral);

    Ok(())
}

fn print_settlement(s: &SettlementRpc) {
    println!("Settlement for auction {}:", s.auction_id);
    println!("  Clearing Price: {}", s.clearing_price);
    println!("  Total Allocated: {}", s.total_allocated);
    println!("  Organizer Proceeds: {}", s.organizer_proceeds);
    for a in &s.allocations {
        println!("  {} -> {} units, pays {}", a.bidder, a.quantity, a.payment);
    }
}

fn print_status(auction_id: u64, s: &AuctionStatus) {
    println!("Auction {}:", auction_id);
    println!("  Started: {}", s.started);
    println!("  Terminated: {}", s.terminated);
    println!("  Finished: {}", s.finished);
    println!("  Winners Calculated: {}", s.winners_calculated);
    println!("  Settle Price Met: {}", s.settle_price_met);
    println!("  Settle Price: {}", s.settle_price);
    println!("  Bids: {}", s.bid_count);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("auction_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let client = HttpClientBuilder::default().build(&cli.rpc)?;

    match cli.command {
        Commands::Create {
            sender,
            name,
            symbol,
            asset_type,
            payment_type,
            supply,
            settle_threshold,
            terminate_on_settle_price,
            collateral,
            max_bids,
            duration,
            modifiable,
        } => {
            let config = AuctionConfig {
                name,
                symbol,
                asset_type: asset_type.into(),
                payment_type: payment_type.into(),
                total_supply: supply,
                settle_threshold,
                terminate_on_settle_price,
                collateral_policy: CollateralPolicy {
                    required: collateral.is_some(),
                    lock_amount_per_bid: collateral.unwrap_or(0),
                },
                max_bids_per_bidder: max_bids,
                timing: Timing {
                    duration,
                    ..Default::default()
                },
                modifiable,
            };
            let params =
                serde_json::json!({ "sender": sender, "config": serde_json::to_value(&config)? });
            let auction_id: u64 = client.request("auction_create", rpc_params![params]).await?;
            info!(auction_id, "Created auction");
            println!("Auction ID: {}", auction_id);
        }

        Commands::Configure {
            sender,
            auction_id,
            name,
            symbol,
            supply,
            settle_threshold,
            clear_settle_threshold,
            max_bids,
            duration,
        } => {
            let mut update = serde_json::Map::new();
            if let Some(name) = name {
                update.insert("name".into(), name.into());
            }
            if let Some(symbol) = symbol {
                update.insert("symbol".into(), symbol.into());
            }
            if let Some(supply) = supply {
                update.insert("total_supply".into(), serde_json::to_value(supply)?);
            }
            if let Some(threshold) = settle_threshold {
                update.insert("settle_threshold".into(), serde_json::to_value(threshold)?);
            } else if clear_settle_threshold {
                update.insert("settle_threshold".into(), serde_json::Value::Null);
            }
            if let Some(max_bids) = max_bids {
                update.insert("max_bids_per_bidder".into(), max_bids.into());
            }
            if let Some(duration) = duration {
                update.insert("duration".into(), duration.into());
            }
            if update.is_empty() {
                return Err(anyhow!("Nothing to update"));
            }

            let _: bool = client
                .request("auction_configure", rpc_params![sender, auction_id, update])
                .await?;
            println!("Auction {} configured", auction_id);
        }

        Commands::Start { sender, auction_id } => {
            let _: bool = client
                .request("auction_start", rpc_params![sender, auction_id])
                .await?;
            println!("Auction {} started", auction_id);
        }

        Commands::Bid {
            sender,
            auction_id,
            quantity,
            price,
            collateral,
        } => {
            submit_bid_cmd(&client, &sender, auction_id, quantity, price, collateral).await?;
        }

        Commands::Cancel {
            sender,
            auction_id,
            sequence_index,
        } => {
            let refunded: Amount = client
                .request("auction_cancelBid", rpc_params![sender, auction_id, sequence_index])
                .await?;
            println!("Bid {} cancelled, {} refunded", sequence_index, refunded);
        }

        Commands::Terminate {
            sender,
            auction_id,
            reason,
        } => {
            let _: bool = client
                .request("auction_terminate", rpc_params![sender, auction_id, reason])
                .await?;
            println!("Auction {} terminated", auction_id);
        }

        Commands::ConfirmSettlePrice { sender, auction_id } => {
            let _: bool = client
                .request("auction_confirmSettlePrice", rpc_params![sender, auction_id])
                .await?;
            println!("Settle price confirmed for auction {}", auction_id);
        }

        Commands::Finish { sender, auction_id } => {
            let settlement: SettlementRpc = client
                .request("auction_finish", rpc_params![sender, auction_id])
                .await?;
            print_settlement(&settlement);
        }

        Commands::Distribute { sender, auction_id } => {
            let progress: DistributionRpc = client
                .request("auction_distribute", rpc_params![sender, auction_id])
                .await?;
            println!(
                "Distribution for auction {}: {}/{} steps{}",
                progress.auction_id,
                progress.completed_steps,
                progress.total_steps,
                if progress.complete { " (complete)" } else { "" }
            );
        }

        Commands::Withdraw { sender, auction_id } => {
            let amount: Amount = client
                .request("auction_withdraw", rpc_params![sender, auction_id])
                .await?;
            println!("Withdrew {}", amount);
        }

        Commands::Status { auction_id } => {
            let status: AuctionStatus = client
                .request("query_getStatus", rpc_params![auction_id])
                .await?;
            print_status(auction_id, &status);
        }

        Commands::Settlement { auction_id } => {
            let settlement: Option<SettlementRpc> = client
                .request("query_getSettlement", rpc_params![auction_id])
                .await?;
            match settlement {
                Some(s) => print_settlement(&s),
                None => println!("Auction {} not settled yet", auction_id),
            }
        }

        Commands::List { offset, limit } => {
            let auctions: Vec<AuctionSummaryRpc> = client
                .request("query_listAuctions", rpc_params![offset, limit])
                .await?;
            if auctions.is_empty() {
                println!("No auctions found");
            } else {
                println!("Auctions:");
                for a in auctions {
                    println!(
                        "  [{}] {} ({}) - {} ({})",
                        a.auction_id, a.name, a.symbol, a.phase, a.creator
                    );
                }
            }
        }

        Commands::AdvanceBlock => {
            let info: BlockInfo = client.request("admin_advanceBlock", rpc_params![]).await?;
            println!("Block advanced: height={}, timestamp={}", info.height, info.timestamp);
        }

        Commands::SetTimestamp { timestamp } => {
            let _: bool = client
                .request("admin_setTimestamp", rpc_params![timestamp])
                .await?;
            println!("Timestamp set to {}", timestamp);
        }
    }

    Ok(())
}
