//! Challenge-response authentication binding a chain address to a deposit,
//! and session token issuance for everything after it.

use crate::{
    error::{Error, Result},
    sui,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{
    pkcs8::{EncodePrivateKey, EncodePublicKey},
    SigningKey,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use model::Address;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
}

pub struct Auth {
    // Keying material for the challenge hash, also the session signing seed.
    seed: [u8; 32],
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    message_auth_timeout: Duration,
    session_timeout: Duration,
    now: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Auth {
    pub fn new(seed: [u8; 32], message_auth_timeout: Duration, session_timeout: Duration) -> Result<Self> {
        Self::with_clock(seed, message_auth_timeout, session_timeout, Box::new(Utc::now))
    }

    pub fn with_clock(
        seed: [u8; 32],
        message_auth_timeout: Duration,
        session_timeout: Duration,
        now: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&seed);
        let private_der = signing_key
            .to_pkcs8_der()
            .context("failed to encode token signing key")?;
        let public_der = signing_key
            .verifying_key()
            .to_public_key_der()
            .context("failed to encode token verification key")?;
        let key_id = format!(
            "0x{}",
            hex::encode(sui::blake2b256(signing_key.verifying_key().as_bytes()))
        );
        Ok(Self {
            seed,
            encoding_key: EncodingKey::from_ed_der(private_der.as_bytes()),
            decoding_key: DecodingKey::from_ed_der(public_der.as_bytes()),
            key_id,
            message_auth_timeout,
            session_timeout,
            now,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    /// The advertised id of the server's signing key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Deterministic challenge for `(address, start_time)`: a keyed 256 bit
    /// hash over the server secret, the address bytes and the timestamp.
    pub fn challenge(&self, address: &Address, start_time: DateTime<Utc>) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(32 + 32 + 8);
        preimage.extend_from_slice(&self.seed);
        preimage.extend_from_slice(address.as_bytes());
        preimage.extend_from_slice(&start_time.timestamp_micros().to_be_bytes());
        sui::blake2b256(&preimage)
    }

    /// Verifies a signed challenge: the bytes must match the recomputation
    /// for `(address, start_time)`, the start time must not be in the future
    /// or older than the message auth timeout, and the personal message
    /// signature over the challenge must recover exactly `address`.
    pub fn verify_payload(
        &self,
        start_time: DateTime<Utc>,
        challenge: &[u8],
        address: &Address,
        signature: &str,
    ) -> Result<()> {
        let expected = self.challenge(address, start_time);
        if !bool::from(expected.as_ref().ct_eq(challenge)) {
            return Err(Error::PermissionDenied("invalid challenge bytes".to_string()));
        }
        let now = self.now();
        if start_time > now {
            return Err(Error::PermissionDenied(format!(
                "challenge start time {} is in the future",
                start_time
            )));
        }
        if start_time + self.message_auth_timeout < now {
            return Err(Error::PermissionDenied(format!(
                "challenge from {} timed out at {}",
                start_time, now
            )));
        }
        let signer = sui::verify_personal_message(challenge, signature)
            .map_err(|err| Error::PermissionDenied(format!("invalid personal message: {}", err)))?;
        if signer != *address {
            return Err(Error::PermissionDenied(format!(
                "wrong personal message signer: {} != {}",
                signer, address
            )));
        }
        Ok(())
    }

    pub fn generate_session_token(&self, account_id: i64) -> Result<String> {
        let claims = SessionClaims {
            sub: account_id.to_string(),
            exp: (self.now() + self.session_timeout).timestamp(),
        };
        let header = Header {
            kid: Some(self.key_id.clone()),
            ..Header::new(Algorithm::EdDSA)
        };
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .context("failed to sign session token")
            .map_err(Into::into)
    }

    /// Checks a bearer session token and returns the account id it was issued
    /// to.
    pub fn verify_session_token(&self, token: &str) -> Result<i64> {
        let validation = Validation::new(Algorithm::EdDSA);
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|err| Error::Unauthenticated(format!("invalid session token: {}", err)))?;
        let account_id: i64 = data
            .claims
            .sub
            .parse()
            .map_err(|_| Error::Unauthenticated("subject is not an account id".to_string()))?;
        if account_id <= 0 {
            return Err(Error::Unauthenticated("account id is invalid".to_string()));
        }
        Ok(account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sui::{derive_address, sign_personal_message};
    use chrono::TimeZone;

    fn fixed_auth(now: DateTime<Utc>) -> Auth {
        Auth::with_clock(
            [3u8; 32],
            Duration::minutes(5),
            Duration::hours(1),
            Box::new(move || now),
        )
        .unwrap()
    }

    #[test]
    fn challenge_is_deterministic_and_keyed() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(now);
        let address = Address([0x11; 32]);
        assert_eq!(auth.challenge(&address, now), auth.challenge(&address, now));
        assert_ne!(
            auth.challenge(&address, now),
            auth.challenge(&address, now + Duration::seconds(1))
        );
        assert_ne!(
            auth.challenge(&address, now),
            auth.challenge(&Address([0x12; 32]), now)
        );
        let other_secret = Auth::with_clock(
            [4u8; 32],
            Duration::minutes(5),
            Duration::hours(1),
            Box::new(move || now),
        )
        .unwrap();
        assert_ne!(auth.challenge(&address, now), other_secret.challenge(&address, now));
    }

    #[test]
    fn verify_payload_accepts_a_fresh_signed_challenge() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(start + Duration::minutes(1));
        let wallet = SigningKey::from_bytes(&[9u8; 32]);
        let address = derive_address(&wallet.verifying_key());
        let challenge = auth.challenge(&address, start);
        let signature = sign_personal_message(&wallet, &challenge);
        auth.verify_payload(start, &challenge, &address, &signature).unwrap();
    }

    #[test]
    fn verify_payload_rejects_replays_after_the_timeout() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(start + Duration::minutes(6));
        let wallet = SigningKey::from_bytes(&[9u8; 32]);
        let address = derive_address(&wallet.verifying_key());
        let challenge = auth.challenge(&address, start);
        let signature = sign_personal_message(&wallet, &challenge);
        assert!(matches!(
            auth.verify_payload(start, &challenge, &address, &signature),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn verify_payload_rejects_future_start_times() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(now);
        let start = now + Duration::seconds(30);
        let wallet = SigningKey::from_bytes(&[9u8; 32]);
        let address = derive_address(&wallet.verifying_key());
        let challenge = auth.challenge(&address, start);
        let signature = sign_personal_message(&wallet, &challenge);
        assert!(matches!(
            auth.verify_payload(start, &challenge, &address, &signature),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn verify_payload_rejects_a_different_signer() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(start);
        let wallet = SigningKey::from_bytes(&[9u8; 32]);
        let address = derive_address(&wallet.verifying_key());
        let challenge = auth.challenge(&address, start);
        // Signed by someone else entirely.
        let impostor = SigningKey::from_bytes(&[10u8; 32]);
        let signature = sign_personal_message(&impostor, &challenge);
        assert!(matches!(
            auth.verify_payload(start, &challenge, &address, &signature),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn verify_payload_rejects_tampered_challenges() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let auth = fixed_auth(start);
        let wallet = SigningKey::from_bytes(&[9u8; 32]);
        let address = derive_address(&wallet.verifying_key());
        let mut challenge = auth.challenge(&address, start);
        challenge[0] ^= 1;
        let signature = sign_personal_message(&wallet, &challenge);
        assert!(matches!(
            auth.verify_payload(start, &challenge, &address, &signature),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn session_token_roundtrip() {
        let now = Utc::now();
        let auth = fixed_auth(now);
        let token = auth.generate_session_token(42).unwrap();
        assert_eq!(auth.verify_session_token(&token).unwrap(), 42);
    }

    #[test]
    fn session_token_from_another_key_is_rejected() {
        let now = Utc::now();
        let auth = fixed_auth(now);
        let other = Auth::with_clock(
            [5u8; 32],
            Duration::minutes(5),
            Duration::hours(1),
            Box::new(move || now),
        )
        .unwrap();
        let token = other.generate_session_token(42).unwrap();
        assert!(matches!(
            auth.verify_session_token(&token),
            Err(Error::Unauthenticated(_))
        ));
    }
}
