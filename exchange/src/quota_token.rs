//! Minting and verification of quota capability tokens: Ed25519 signed JWS
//! whose claims mirror the ledger row of the claim they were minted for.

use crate::{
    error::{Error, Result},
    sui,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use ed25519_dalek::{
    pkcs8::{EncodePrivateKey, EncodePublicKey},
    SigningKey,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use model::{
    order::Claim,
    quota_token::{QuotaTokenClaims, TransferTokenClaims},
};
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct QuotaTokenMinter {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    now: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl QuotaTokenMinter {
    pub fn new(seed: [u8; 32]) -> Result<Self> {
        Self::with_clock(seed, Box::new(Utc::now))
    }

    pub fn with_clock(
        seed: [u8; 32],
        now: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&seed);
        let private_der = signing_key
            .to_pkcs8_der()
            .context("failed to encode quota signing key")?;
        let public_der = signing_key
            .verifying_key()
            .to_public_key_der()
            .context("failed to encode quota verification key")?;
        let key_id = format!(
            "0x{}",
            hex::encode(sui::blake2b256(signing_key.verifying_key().as_bytes()))
        );
        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(private_der.as_bytes()),
            decoding_key: DecodingKey::from_ed_der(public_der.as_bytes()),
            key_id,
            now,
        })
    }

    /// The advertised key id verifiers should expect in the `kid` header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signs a capability for a successful claim. `expiration` is the
    /// fulfillment's service expire time for sold quota or the next refresh
    /// for free quota; the jti is fresh per mint so every claim is revocable
    /// on its own.
    pub fn mint(
        &self,
        claim: &Claim,
        expiration: DateTime<Utc>,
        policy_claims: BTreeMap<String, i64>,
    ) -> Result<(String, QuotaTokenClaims)> {
        let now = (self.now)();
        let claims = QuotaTokenClaims {
            iss: self.key_id.clone(),
            aud: claim.audience_address.to_string(),
            exp: expiration.timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            service_id: claim.service_id,
            order_id: claim.order_id,
            order_fulfillment_id: claim.order_fulfillment_id,
            seller_id: claim.seller_id,
            quota_quantity: claim.quantity,
            policy_claims,
        };
        let header = Header {
            kid: Some(self.key_id.clone()),
            ..Header::new(Algorithm::EdDSA)
        };
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .context("failed to sign quota token")?;
        Ok((token, claims))
    }

    /// Signs a token paid for with plain balance rather than a fulfillment
    /// claim; the audience is the username the buyer wants a session with.
    pub fn mint_transfer_token(
        &self,
        audience: &str,
        quantity: i64,
        ttl: chrono::Duration,
    ) -> Result<(String, TransferTokenClaims)> {
        let now = (self.now)();
        let claims = TransferTokenClaims {
            iss: self.key_id.clone(),
            aud: audience.to_string(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            quantity,
        };
        let header = Header {
            kid: Some(self.key_id.clone()),
            ..Header::new(Algorithm::EdDSA)
        };
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .context("failed to sign transfer token")?;
        Ok((token, claims))
    }

    /// Verifies algorithm, key id, signature and expiration of a quota token
    /// and returns its claims.
    pub fn verify(&self, token: &str) -> Result<QuotaTokenClaims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|err| Error::Unauthenticated(format!("invalid quota token: {}", err)))?;
        if header.kid.as_deref() != Some(self.key_id.as_str()) {
            return Err(Error::Unauthenticated(format!(
                "quota token signed by unknown key {:?}",
                header.kid
            )));
        }
        let mut validation = Validation::new(Algorithm::EdDSA);
        // The audience is an off platform address, not something we match.
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<QuotaTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|err| Error::Unauthenticated(format!("invalid quota token: {}", err)))?;
        Ok(data.claims)
    }
}
