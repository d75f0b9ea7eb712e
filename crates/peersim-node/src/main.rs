//! Peersim -- scripted peer for exercising a node's p2p stack.
//!
//! Usage:
//!   peersim establish                    # Handshake, exchange status, disconnect
//!   peersim send-block                   # Push the solo sample chain
//!   peersim send-parcel --tx <hex>...    # Propagate encoded transactions
//!   peersim listen                       # Answer one session handshake

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use peersim_node::config::HarnessConfig;
use peersim_node::session::Session;
use peersim_node::test_helper::{self, TestHelper};
use peersim_protocol::Value;

#[derive(Parser)]
#[command(name = "peersim", about = "Scripted peer for blockchain node p2p testing")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "peersim.toml")]
    config: PathBuf,

    /// Override the target node address (host:port)
    #[arg(short, long)]
    target: Option<String>,

    /// Log every message
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and exchange status, then disconnect
    Establish,
    /// Send the genesis and two solo blocks
    SendBlock,
    /// Send encoded transactions to the node
    SendParcel {
        /// RLP-encoded transaction, hex
        #[arg(long = "tx", required = true)]
        txs: Vec<String>,
    },
    /// Wait for a peer to open a session
    Listen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "peersim_node=debug,peersim_protocol=debug"
    } else {
        "peersim_node=info,peersim_protocol=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut cfg = HarnessConfig::load_or_default(&cli.config)?;
    if let Some(target) = cli.target {
        cfg.target.addr = target;
    }

    match cli.command {
        Commands::Establish => {
            let mut helper = TestHelper::new(cfg.build_layer()?);
            helper.establish(None, None).await?;
            println!("Genesis hash: {:x}", helper.genesis_hash());
            helper.end().await?;
        }
        Commands::SendBlock => {
            let mut helper = TestHelper::new(cfg.build_layer()?);
            helper.establish(None, None).await?;

            let genesis = test_helper::solo_genesis_block_header();
            let header1 = test_helper::solo_block_1(genesis.hash());
            let header2 = test_helper::solo_block_2(header1.hash());
            helper
                .send_encoded_block(
                    vec![header1.to_value(), header2.to_value()],
                    vec![Vec::new(), Vec::new()],
                    header2.hash(),
                    header2.score(),
                )
                .await?;
            println!("Sent blocks 1 and 2, best hash {:x}", header2.hash());
            helper.end().await?;
        }
        Commands::SendParcel { txs } => {
            let parcels = txs
                .iter()
                .map(|tx| -> anyhow::Result<Value> {
                    let bytes = hex::decode(tx.trim_start_matches("0x"))?;
                    Ok(Value::from_bytes(&bytes)?)
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut helper = TestHelper::new(cfg.build_layer()?);
            helper.establish(None, None).await?;
            let count = parcels.len();
            helper.send_encoded_parcel(parcels).await?;
            println!("Sent {count} parcels");
            helper.end().await?;
        }
        Commands::Listen => {
            let mut session = Session::responder(cfg.session_options()?);
            let peer = session.listen().await?;
            println!("Session established with {peer}");
            println!("Peer nonce: {:#034x}", session.target_nonce());
        }
    }

    Ok(())
}
