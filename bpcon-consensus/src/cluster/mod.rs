pub mod builder;
pub mod core;
pub mod proposals;
pub mod voting;
