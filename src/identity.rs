use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{NodeError, NodeResult};

const KEY_BITS: usize = 2048;

/// This node's RSA-2048 keypair. Generated on first boot, persisted to PEM at
/// `NodeConfig.key_path`, and reloaded unchanged on restart so the ASN's public
/// key stays stable across process lifetimes.
pub struct NodeIdentity {
    pub asn: String,
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
}

impl NodeIdentity {
    /// Load the keypair at `path`, generating and persisting a fresh one if it
    /// does not exist yet.
    pub fn load_or_generate(asn: &str, path: &Path) -> NodeResult<Self> {
        let private_key = if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| NodeError::Config(e.to_string()))?
        } else {
            let mut rng = rand::thread_rng();
            let key = RsaPrivateKey::new(&mut rng, KEY_BITS)?;
            let pem = key
                .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
                .map_err(|e| NodeError::Config(e.to_string()))?;
            std::fs::write(path, pem.as_bytes())?;
            key
        };
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self { asn: asn.to_string(), private_key, public_key })
    }

    /// Sign an arbitrary message (a transaction's or block's canonical byte
    /// string); the caller digests nothing itself, this hashes internally.
    pub fn sign(&self, message: &[u8]) -> NodeResult<Vec<u8>> {
        let digest = Sha256::digest(message);
        let mut rng = rand::thread_rng();
        let sig = self
            .private_key
            .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha256>(), &digest)?;
        Ok(sig)
    }

    pub fn public_key_pem(&self) -> NodeResult<String> {
        self.public_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map(|s| s.to_string())
            .map_err(|e| NodeError::Config(e.to_string()))
    }
}

/// Verify a signature against a PEM-encoded public key. Used both for
/// transaction signatures (asSource's key) and block signatures (miner's key).
pub fn verify(public_key_pem: &str, message: &[u8], signature: &[u8]) -> NodeResult<()> {
    let key = RsaPublicKey::from_pkcs1_pem(public_key_pem).map_err(|_| NodeError::SignatureInvalid)?;
    let digest = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| NodeError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_a_keypair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let id = NodeIdentity::load_or_generate("65000", &path).unwrap();
        assert!(path.exists());
        let reloaded = NodeIdentity::load_or_generate("65000", &path).unwrap();
        assert_eq!(id.public_key, reloaded.public_key);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let dir = tempdir().unwrap();
        let id = NodeIdentity::load_or_generate("65000", &dir.path().join("key.pem")).unwrap();
        let msg = b"hello ledger";
        let sig = id.sign(msg).unwrap();
        let pem = id.public_key_pem().unwrap();
        assert!(verify(&pem, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let dir = tempdir().unwrap();
        let id = NodeIdentity::load_or_generate("65000", &dir.path().join("key.pem")).unwrap();
        let sig = id.sign(b"original").unwrap();
        let pem = id.public_key_pem().unwrap();
        assert!(verify(&pem, b"tampered", &sig).is_err());
    }
}
