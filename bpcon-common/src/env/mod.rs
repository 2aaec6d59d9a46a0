pub mod consensus;
pub mod proposal;
pub mod value;
pub mod vote_data;
