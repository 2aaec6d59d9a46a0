use std::path::Path;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use bpcon_common::{auth::ed25519::Ed25519Authenticator, utils::NodeId};
use bpcon_consensus::ConsensusConfig;
use bpcon_node::{
    cli::{Cli, Commands},
    config::{add_peer, NodeConfig},
    demo::run_demo,
};
use bpcon_p2p::key_manager::load_or_generate_signing_key;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Parse Arguments
    let cli = Cli::parse();

    // 2. Logging: protocol events to the audit file, the rest to stdout
    let file_appender = tracing_appender::rolling::never(&cli.log_dir, "audit-consensus.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let consensus_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() == "consensus"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,bpcon_consensus=debug".into()),
        )
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() != "consensus"));

    tracing_subscriber::registry().with(consensus_layer).with(stdout_layer).init();

    // 3. Dispatch
    match cli.command {
        Commands::Demo { peers, timeout_ms } => {
            let config = ConsensusConfig {
                round_timeout_ms: timeout_ms,
                ..ConsensusConfig::default()
            };
            let report = run_demo(peers, config).await?;
            info!("{}/{} requests committed", report.committed(), report.outcomes.len());
            for (id, store) in &report.stores {
                println!("{}: {:?}", id, store);
            }
        }
        Commands::Keygen { out } => {
            let key = load_or_generate_signing_key(&out)?;
            let auth = Ed25519Authenticator::new(key);
            println!("PubHex: {}", auth.public_key_hex());
        }
        Commands::InitConfig { out, address, peers, keypair, credentials_dir } => {
            let mut config = NodeConfig::new(NodeId::from(address), peers.into_iter().map(NodeId::from).collect());
            config.keypair_path = keypair;
            config.credentials_dir = credentials_dir;
            config.save_to_file(&out)?;
            info!("📝 wrote {}", out.display());
        }
        Commands::AddPeer { config, address, public_key, certificate } => {
            let node_config = load_config(&config)?;
            add_peer(&node_config, NodeId::from(address.as_str()), &public_key, &certificate)?;
            info!("🔑 stored key for {}", address);
        }
        Commands::Status { config } => {
            let bundle = load_config(&config)?.resolve()?;
            println!("address:     {}", bundle.address);
            println!("public key:  {}", bundle.auth.public_key_hex());
            println!("group size:  {}", bundle.directory.num_peers());
            println!("quorum size: {}", bundle.directory.quorum_size());
            for peer in bundle.missing_peers() {
                println!("missing key: {}", peer);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    NodeConfig::load_from_file(path).map_err(|e| {
        error!("could not read config {}: {}", path.display(), e);
        e.into()
    })
}
