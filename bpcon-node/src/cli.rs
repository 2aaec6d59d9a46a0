use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bpcon-node")]
#[command(about = "Byzantine Paxos consensus node tools")]
pub struct Cli {
    /// Directory for the consensus audit log
    #[arg(long, global = true, default_value = "logs")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an in-process group and replay the demo requests
    Demo {
        /// Remote peers next to the proposing node
        #[arg(long, default_value_t = 4)]
        peers: usize,
        /// Deadline for each ballot round
        #[arg(long, default_value_t = 3_000)]
        timeout_ms: u64,
    },
    /// Create (or load) a signing key and print its public key
    Keygen {
        #[arg(short, long, value_name = "OUT")]
        out: PathBuf,
    },
    /// Write a node configuration file
    InitConfig {
        #[arg(short, long, value_name = "OUT")]
        out: PathBuf,
        #[arg(long)]
        address: String,
        #[arg(long = "peer")]
        peers: Vec<String>,
        #[arg(long, default_value = "keys/node.key")]
        keypair: String,
        #[arg(long, default_value = "keys/peers")]
        credentials_dir: String,
    },
    /// Store a peer's public key and certificate
    AddPeer {
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,
        #[arg(long)]
        address: String,
        #[arg(long)]
        public_key: String,
        #[arg(long, default_value = "")]
        certificate: String,
    },
    /// Resolve a configuration and report the group it describes
    Status {
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,
    },
}
