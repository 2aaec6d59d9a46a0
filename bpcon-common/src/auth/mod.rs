pub mod ed25519;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// Signs outgoing protocol records and checks signatures produced by peers.
pub trait Authenticator: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AuthError>;

    /// Checks a signature against this authenticator's own key.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, AuthError>;

    fn public_key(&self) -> Vec<u8>;
}
