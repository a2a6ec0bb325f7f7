//! Personal message signing as the payment chain's wallets implement it:
//! the message is wrapped in a personal-message intent, length prefixed,
//! hashed with Blake2b-256 and signed with Ed25519. Signature blobs carry
//! `flag || signature || public key` base64 encoded, and an address is the
//! Blake2b-256 hash of `flag || public key`.

use anyhow::{anyhow, bail, Context, Result};
use blake2::{digest::consts::U32, Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use model::Address;

type Blake2b256 = Blake2b<U32>;

const ED25519_FLAG: u8 = 0x00;
const PERSONAL_MESSAGE_INTENT: [u8; 3] = [3, 0, 0];
const SIGNATURE_BLOB_LEN: usize = 1 + 64 + 32;

pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The address belonging to an Ed25519 public key.
pub fn derive_address(public_key: &VerifyingKey) -> Address {
    let mut preimage = Vec::with_capacity(1 + 32);
    preimage.push(ED25519_FLAG);
    preimage.extend_from_slice(public_key.as_bytes());
    Address(blake2b256(&preimage))
}

fn signing_digest(message: &[u8]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(3 + 10 + message.len());
    preimage.extend_from_slice(&PERSONAL_MESSAGE_INTENT);
    // ULEB128 length prefix of the wrapped message.
    let mut len = message.len() as u64;
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        preimage.push(byte);
        if len == 0 {
            break;
        }
    }
    preimage.extend_from_slice(message);
    blake2b256(&preimage)
}

/// Signs `message` the way a wallet would, producing the serialized signature
/// blob clients send alongside their deposits.
pub fn sign_personal_message(key: &SigningKey, message: &[u8]) -> String {
    let signature = key.sign(&signing_digest(message));
    let mut blob = Vec::with_capacity(SIGNATURE_BLOB_LEN);
    blob.push(ED25519_FLAG);
    blob.extend_from_slice(&signature.to_bytes());
    blob.extend_from_slice(key.verifying_key().as_bytes());
    base64::encode(blob)
}

/// Verifies a personal message signature blob and recovers the signer's
/// address. The address is derived from the public key embedded in the blob,
/// so callers must compare it against whatever identity they expect.
pub fn verify_personal_message(message: &[u8], signature: &str) -> Result<Address> {
    let blob = base64::decode(signature).context("signature is not valid base64")?;
    if blob.len() != SIGNATURE_BLOB_LEN {
        bail!(
            "expect serialized signature of {} bytes but got {}",
            SIGNATURE_BLOB_LEN,
            blob.len()
        );
    }
    if blob[0] != ED25519_FLAG {
        bail!("unsupported signature scheme flag {:#04x}", blob[0]);
    }
    let signature = Signature::from_bytes(blob[1..65].try_into().unwrap());
    let public_key = VerifyingKey::from_bytes(blob[65..].try_into().unwrap())
        .map_err(|err| anyhow!("invalid public key in signature blob: {}", err))?;
    public_key
        .verify(&signing_digest(message), &signature)
        .map_err(|err| anyhow!("signature verification failed: {}", err))?;
    Ok(derive_address(&public_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = test_key();
        let message = b"challenge bytes";
        let signature = sign_personal_message(&key, message);
        let signer = verify_personal_message(message, &signature).unwrap();
        assert_eq!(signer, derive_address(&key.verifying_key()));
    }

    #[test]
    fn tampered_message_fails() {
        let key = test_key();
        let signature = sign_personal_message(&key, b"original");
        assert!(verify_personal_message(b"tampered", &signature).is_err());
    }

    #[test]
    fn malformed_blobs_fail() {
        assert!(verify_personal_message(b"m", "!!not-base64!!").is_err());
        assert!(verify_personal_message(b"m", &base64::encode([0u8; 10])).is_err());
        // Wrong scheme flag.
        let mut blob = [0u8; SIGNATURE_BLOB_LEN];
        blob[0] = 0x01;
        assert!(verify_personal_message(b"m", &base64::encode(blob)).is_err());
    }

    #[test]
    fn address_derivation_is_stable() {
        let key = test_key();
        let address = derive_address(&key.verifying_key());
        assert_eq!(address, derive_address(&key.verifying_key()));
        let other = SigningKey::from_bytes(&[8u8; 32]);
        assert_ne!(address, derive_address(&other.verifying_key()));
    }
}
