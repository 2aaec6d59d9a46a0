use std::{collections::BTreeMap, sync::Arc};

use ed25519_dalek::VerifyingKey;
use tracing::{debug, info, warn};

use bpcon_common::{
    auth::{
        ed25519::{parse_public_key, verify_signature},
        AuthError,
    },
    env::vote_data::SignedMessage,
    utils::NodeId,
};

use crate::key_manager::{CredentialStore, StoredCredentials};

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address: NodeId,
    pub public_key: VerifyingKey,
    pub certificate: String,
}

/// Group membership as seen by one node: peer address -> public key.
///
/// The local node is always a member, so `num_peers()` counts it while
/// `all_peer_addresses()` leaves it out.
pub struct PeerDirectory {
    local: NodeId,
    peers: BTreeMap<NodeId, PeerRecord>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl PeerDirectory {
    pub fn new(local: NodeId, local_public_key: &[u8], local_certificate: &str) -> Result<Self, AuthError> {
        let public_key = parse_public_key(local_public_key)?;
        let mut peers = BTreeMap::new();
        peers.insert(
            local.clone(),
            PeerRecord {
                address: local.clone(),
                public_key,
                certificate: local_certificate.to_string(),
            },
        );
        Ok(Self { local, peers, store: None })
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Registers every configured peer whose credentials are in the store.
    /// Returns how many were loaded.
    pub fn load_group(&mut self, addresses: &[NodeId]) -> usize {
        let Some(store) = self.store.clone() else {
            warn!("no credential store configured, group not loaded");
            return 0;
        };

        let mut loaded = 0;
        for address in addresses.iter().filter(|a| **a != self.local) {
            match store.load_peer(address) {
                Ok(Some(creds)) => match hex::decode(creds.public_key_hex.trim())
                    .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))
                    .and_then(|bytes| parse_public_key(&bytes))
                {
                    Ok(public_key) => {
                        self.peers.insert(
                            address.clone(),
                            PeerRecord {
                                address: address.clone(),
                                public_key,
                                certificate: creds.certificate,
                            },
                        );
                        loaded += 1;
                    }
                    Err(e) => warn!("bad key file for {}: {}", address, e),
                },
                Ok(None) => info!("missing key file for {}", address),
                Err(e) => warn!("failed to read credentials for {}: {}", address, e),
            }
        }
        loaded
    }

    /// Adds a peer from a hex-encoded ed25519 public key. Fails on a known
    /// address, malformed key material, or when the credentials cannot be
    /// persisted.
    pub fn add_peer(&mut self, address: NodeId, public_key_hex: &str, certificate: &str) -> bool {
        if self.peers.contains_key(&address) {
            debug!("add peer: {} already registered", address);
            return false;
        }

        let public_key = match hex::decode(public_key_hex.trim())
            .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))
            .and_then(|bytes| parse_public_key(&bytes))
        {
            Ok(key) => key,
            Err(e) => {
                debug!("add peer {} failed: {}", address, e);
                return false;
            }
        };

        if let Some(store) = &self.store {
            let creds = StoredCredentials {
                public_key_hex: public_key_hex.trim().to_string(),
                certificate: certificate.to_string(),
            };
            if let Err(e) = store.save_peer(&address, &creds) {
                warn!("add peer {}: could not persist credentials: {}", address, e);
                return false;
            }
        }

        debug!("add peer: key imported for {}", address);
        self.peers.insert(
            address.clone(),
            PeerRecord {
                address,
                public_key,
                certificate: certificate.to_string(),
            },
        );
        true
    }

    pub fn remove_peer(&mut self, address: &NodeId) -> bool {
        if *address == self.local || self.peers.remove(address).is_none() {
            debug!("remove failed: {}", address);
            return false;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_peer(address) {
                warn!("remove peer {}: stale credential files left behind: {}", address, e);
            }
        }
        true
    }

    pub fn contains(&self, address: &NodeId) -> bool {
        self.peers.contains_key(address)
    }

    pub fn peer(&self, address: &NodeId) -> Option<&PeerRecord> {
        self.peers.get(address)
    }

    /// Every member except the local node, in address order.
    pub fn all_peer_addresses(&self) -> Vec<NodeId> {
        self.peers.keys().filter(|id| **id != self.local).cloned().collect()
    }

    /// Group size including the local node.
    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    /// `ceil(num_peers / 2)`: valid 1b signatures an acceptor needs to see in a 1c.
    pub fn quorum_size(&self) -> usize {
        let n = self.num_peers();
        n / 2 + n % 2
    }

    /// Checks one signed message against the signer's registered key.
    /// `None` when the signer is not a member.
    pub fn verify(&self, message: &SignedMessage) -> Option<bool> {
        let record = self.peers.get(&message.signer)?;
        Some(verify_signature(&record.public_key, &message.payload, &message.signature).unwrap_or(false))
    }

    /// Counts the messages in `batch` carrying a valid signature from a known
    /// member. Unknown signers are logged and skipped.
    pub fn verify_signed_batch(&self, batch: &[SignedMessage]) -> usize {
        let mut verified = 0;
        for message in batch {
            match self.verify(message) {
                Some(true) => verified += 1,
                Some(false) => debug!("bad signature from {}", message.signer),
                None => info!("missing a key for {}", message.signer),
            }
        }
        verified
    }
}
