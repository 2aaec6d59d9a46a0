use super::{AuthError, Authenticator};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

pub struct Ed25519Authenticator {
    keypair: SigningKey,
}

impl Ed25519Authenticator {
    pub fn new(keypair: SigningKey) -> Self {
        Self { keypair }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        let secret: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::InvalidKeyLength(bytes.len()))?;
        Ok(Self { keypair: SigningKey::from_bytes(secret) })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.verifying_key().to_bytes())
    }
}

/// Parses a raw 32-byte ed25519 public key.
pub fn parse_public_key(public_key: &[u8]) -> Result<VerifyingKey, AuthError> {
    let bytes: &[u8; 32] = public_key
        .try_into()
        .map_err(|_| AuthError::InvalidKeyLength(public_key.len()))?;
    VerifyingKey::from_bytes(bytes).map_err(|e| AuthError::InvalidPublicKey(e.to_string()))
}

/// Verifies `signature` over `message` with an already parsed key.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<bool, AuthError> {
    let signature = Signature::from_slice(signature).map_err(|e| AuthError::InvalidSignature(e.to_string()))?;
    Ok(key.verify(message, &signature).is_ok())
}

impl Authenticator for Ed25519Authenticator {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AuthError> {
        let signature = self.keypair.sign(message);
        Ok(signature.to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, AuthError> {
        verify_signature(&self.keypair.verifying_key(), message, signature)
    }

    fn public_key(&self) -> Vec<u8> {
        self.keypair.verifying_key().to_bytes().to_vec()
    }
}
