pub mod auth;
pub mod env;
pub mod error;
pub mod utils;
