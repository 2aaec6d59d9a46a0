pub mod cli;
pub mod config;
pub mod demo;

pub use config::{NodeBundle, NodeConfig};
