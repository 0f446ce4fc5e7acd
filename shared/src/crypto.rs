// Domain signature scheme
//
// A DomainData signature is Ed25519 over the canonical encoding
//   domain | owner | H(records) | last_updated
// where H folds each record's (name, value, ttl) into a single SHA-256.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::{DomainData, DomainRecord};

/// Hash of a record set: SHA-256 over every record's (name, value, ttl)
pub fn hash_records(records: &[DomainRecord]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.name.as_bytes());
        hasher.update(record.value.as_bytes());
        hasher.update(record.ttl.to_be_bytes());
    }
    hasher.finalize().into()
}

/// Canonical byte encoding signed by the domain owner
pub fn canonical_signing_bytes(data: &DomainData) -> Vec<u8> {
    let record_hash = hash_records(&data.records);
    let mut bytes =
        Vec::with_capacity(data.domain.len() + data.owner.len() + record_hash.len() + 8);
    bytes.extend_from_slice(data.domain.as_bytes());
    bytes.extend_from_slice(data.owner.as_bytes());
    bytes.extend_from_slice(&record_hash);
    bytes.extend_from_slice(&data.last_updated.to_be_bytes());
    bytes
}

/// Verify the hex-encoded Ed25519 signature carried in `data.signature`
/// against a hex-encoded 32-byte public key
pub fn verify_domain_signature(data: &DomainData, public_key_hex: &str) -> Result<bool> {
    let key_bytes = hex::decode(public_key_hex.trim_start_matches("0x"))
        .map_err(|e| anyhow!("Invalid public key hex: {}", e))?;
    let key_array: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("Public key must be 32 bytes"))?;
    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| anyhow!("Invalid Ed25519 public key: {}", e))?;

    let sig_bytes = hex::decode(data.signature.trim_start_matches("0x"))
        .map_err(|e| anyhow!("Invalid signature hex: {}", e))?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("Signature must be 64 bytes"))?;
    let signature = Signature::from_bytes(&sig_array);

    let message = canonical_signing_bytes(data);
    Ok(verifying_key.verify(&message, &signature).is_ok())
}

/// Ed25519 keypair used by the native resolver and tests
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let mut secret_key = [0u8; 32];
        csprng.fill_bytes(&mut secret_key);
        let signing_key = SigningKey::from_bytes(&secret_key);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(
            bytes
                .try_into()
                .map_err(|_| anyhow!("Invalid key length"))?,
        );
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Sign a DomainData's canonical encoding, returning the hex signature
    pub fn sign_domain(&self, data: &DomainData) -> String {
        let message = canonical_signing_bytes(data);
        hex::encode(self.signing_key.sign(&message).to_bytes())
    }

    /// Hex encoding of the public key
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Derived address: "ghost" + first 20 bytes of blake3(public key)
    pub fn address(&self) -> String {
        let hash = blake3::hash(self.verifying_key.as_bytes());
        format!("ghost{}", hex::encode(&hash.as_bytes()[..20]))
    }
}

/// Deterministic transaction hash for native mutations
pub fn transaction_hash(domain: &str, operation: &str, timestamp: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(operation.as_bytes());
    hasher.update(&timestamp.to_be_bytes());
    format!("0x{}", hex::encode(hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;

    fn sample_domain_data() -> DomainData {
        DomainData::new(
            "alice.ghost",
            "ghost1abc",
            vec![DomainRecord::new(RecordType::A, "alice.ghost", "10.0.0.1", 600)],
        )
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let keypair = KeyPair::generate();
        let mut data = sample_domain_data();
        data.owner = keypair.address();
        data.signature = keypair.sign_domain(&data);

        let valid = verify_domain_signature(&data, &keypair.public_key_hex()).unwrap();
        assert!(valid);
    }

    #[test]
    fn test_verify_rejects_tampered_records() {
        let keypair = KeyPair::generate();
        let mut data = sample_domain_data();
        data.signature = keypair.sign_domain(&data);

        data.records[0].value = "10.0.0.2".to_string();
        let valid = verify_domain_signature(&data, &keypair.public_key_hex()).unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let mut data = sample_domain_data();
        data.signature = keypair.sign_domain(&data);

        let valid = verify_domain_signature(&data, &other.public_key_hex()).unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_record_hash_is_order_sensitive() {
        let a = DomainRecord::new(RecordType::A, "a.ghost", "10.0.0.1", 600);
        let b = DomainRecord::new(RecordType::Txt, "a.ghost", "v=1", 300);
        assert_ne!(
            hash_records(&[a.clone(), b.clone()]),
            hash_records(&[b, a])
        );
    }

    #[test]
    fn test_transaction_hash_is_deterministic() {
        let h1 = transaction_hash("alice.ghost", "register", 1_700_000_000);
        let h2 = transaction_hash("alice.ghost", "register", 1_700_000_000);
        let h3 = transaction_hash("alice.ghost", "update", 1_700_000_000);
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("0x"));
    }
}
