pub mod broadcast;
pub mod in_memory;
pub mod key_manager;
pub mod message;
pub mod peer_manager;
pub mod ports;

pub use broadcast::{Broadcaster, LatencyReport, PeerReply};
pub use in_memory::{InMemoryNetwork, InMemoryTransport};
pub use message::{NetworkError, PaxosMessage};
pub use peer_manager::PeerDirectory;
pub use ports::{MessageHandler, Transport};
