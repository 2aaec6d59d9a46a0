//! utils.rs
//!
//! Common types and helper implementations shared across BPCon.
//!
//! This module provides basic utilities such as peer identifiers
//! and wall-clock helpers used to timestamp protocol messages.

pub mod node_id;
pub use node_id::NodeId;

pub mod time;
