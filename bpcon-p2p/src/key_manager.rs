use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use bpcon_common::utils::NodeId;

/// Loads the local ed25519 signing key from a file or generates a new one if
/// the file does not exist. The file holds the 32 raw secret-key bytes.
pub fn load_or_generate_signing_key(path: &Path) -> io::Result<SigningKey> {
    if path.exists() {
        let mut file = fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected 32 key bytes in {}, found {}", path.display(), bytes.len()),
            )
        })?;
        Ok(SigningKey::from_bytes(&secret))
    } else {
        let key = SigningKey::generate(&mut OsRng);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(&key.to_bytes())?;
        Ok(key)
    }
}

/// File-name-safe identifier for a peer address.
pub fn peer_file_id(address: &NodeId) -> String {
    hex::encode(Sha256::digest(address.as_str().as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub public_key_hex: String,
    pub certificate: String,
}

/// Where peer key material lives between restarts.
pub trait CredentialStore: Send + Sync {
    fn save_peer(&self, address: &NodeId, credentials: &StoredCredentials) -> io::Result<()>;
    fn load_peer(&self, address: &NodeId) -> io::Result<Option<StoredCredentials>>;
    fn remove_peer(&self, address: &NodeId) -> io::Result<()>;
}

/// `<root>/pubkeys/<id>.pubkey` and `<root>/certs/<id>.crt`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("pubkeys"))?;
        fs::create_dir_all(root.join("certs"))?;
        Ok(Self { root })
    }

    fn key_path(&self, address: &NodeId) -> PathBuf {
        self.root.join("pubkeys").join(format!("{}.pubkey", peer_file_id(address)))
    }

    fn cert_path(&self, address: &NodeId) -> PathBuf {
        self.root.join("certs").join(format!("{}.crt", peer_file_id(address)))
    }
}

impl CredentialStore for FileCredentialStore {
    fn save_peer(&self, address: &NodeId, credentials: &StoredCredentials) -> io::Result<()> {
        fs::write(self.key_path(address), &credentials.public_key_hex)?;
        fs::write(self.cert_path(address), &credentials.certificate)
    }

    fn load_peer(&self, address: &NodeId) -> io::Result<Option<StoredCredentials>> {
        let key_path = self.key_path(address);
        if !key_path.is_file() {
            return Ok(None);
        }
        let public_key_hex = fs::read_to_string(key_path)?.trim().to_string();
        let certificate = match fs::read_to_string(self.cert_path(address)) {
            Ok(cert) => cert,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        Ok(Some(StoredCredentials { public_key_hex, certificate }))
    }

    fn remove_peer(&self, address: &NodeId) -> io::Result<()> {
        for path in [self.key_path(address), self.cert_path(address)] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
