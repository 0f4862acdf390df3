//! RS256 token verification and revocation checks (spec §6 "Token claims").

use crate::bus::SharedBus;
use crate::error::TokenError;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The RS256 claim set every access/refresh token carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenType,
    /// Token family id: correlates an access+refresh pair so the family can
    /// be revoked together (e.g. on refresh-token reuse detection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
    /// SHA-256 hex digest of the device fingerprint bound at issue time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
}

pub struct TokenVerifier {
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn from_rsa_pem(public_key_pem: &[u8], issuer: impl Into<String>, audience: impl Into<String>) -> Result<Self, TokenError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem).map_err(|e| TokenError::Invalid(e.to_string()))?;
        Ok(Self { decoding_key, issuer: issuer.into(), audience: audience.into() })
    }

    /// Decodes and validates signature, `iss`, `aud`, `exp`, `nbf` — the
    /// structural checks a JWT library can perform without the shared bus.
    /// Revocation and fingerprint checks are separate (see
    /// [`TokenVerifier::authenticate`]) because they need the bus and the
    /// caller-supplied fingerprint respectively.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iat", "jti"]);

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                other => TokenError::Invalid(other.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    /// Full connection-time authentication sequence (spec §4.5 "Connection
    /// lifecycle"): decode, reject wrong token type, consult the revocation
    /// list and per-user revoke-after watermark, and check the device
    /// fingerprint binding if the token carries one.
    pub async fn authenticate(
        &self,
        bus: &Arc<dyn SharedBus>,
        token: &str,
        expected_type: TokenType,
        device_fingerprint: Option<&str>,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;

        if claims.typ != expected_type {
            let expected = match expected_type {
                TokenType::Access => "access",
                TokenType::Refresh => "refresh",
            };
            return Err(TokenError::WrongType { expected });
        }

        if bus.is_jti_revoked(&claims.jti).await.map_err(|e| TokenError::Invalid(e.to_string()))? {
            return Err(TokenError::Revoked);
        }

        if let Some(watermark) = bus.revoke_after(&claims.sub).await.map_err(|e| TokenError::Invalid(e.to_string()))? {
            if claims.iat <= watermark.timestamp() {
                return Err(TokenError::Revoked);
            }
        }

        if let Some(family_id) = &claims.fid {
            if bus.is_family_revoked(family_id).await.map_err(|e| TokenError::Invalid(e.to_string()))? {
                return Err(TokenError::Revoked);
            }
        }

        if let Some(expected_fp) = &claims.fp {
            let provided = device_fingerprint.ok_or(TokenError::FingerprintMismatch)?;
            let digest = hex::encode(Sha256::digest(provided.as_bytes()));
            if &digest != expected_fp {
                return Err(TokenError::FingerprintMismatch);
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemorySharedBus;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const TEST_PRIVATE_KEY: &str = include_str!("../testdata/test_rsa_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../testdata/test_rsa_public.pem");

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes(), "mtrader", "mtrader-clients").unwrap()
    }

    fn sign(claims: &TokenClaims) -> String {
        let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
    }

    fn base_claims(typ: TokenType) -> TokenClaims {
        let now = chrono::Utc::now().timestamp();
        TokenClaims {
            sub: "user-1".into(),
            iss: "mtrader".into(),
            aud: "mtrader-clients".into(),
            iat: now,
            nbf: now,
            exp: now + 3600,
            jti: uuid::Uuid::new_v4().to_string(),
            typ,
            fid: None,
            fp: None,
        }
    }

    #[tokio::test]
    async fn valid_token_authenticates() {
        let bus: Arc<dyn SharedBus> = InMemorySharedBus::new();
        let claims = base_claims(TokenType::Access);
        let token = sign(&claims);
        let result = verifier().authenticate(&bus, &token, TokenType::Access, None).await.unwrap();
        assert_eq!(result.sub, "user-1");
    }

    #[tokio::test]
    async fn wrong_token_type_is_rejected() {
        let bus: Arc<dyn SharedBus> = InMemorySharedBus::new();
        let claims = base_claims(TokenType::Refresh);
        let token = sign(&claims);
        let err = verifier().authenticate(&bus, &token, TokenType::Access, None).await.unwrap_err();
        assert!(matches!(err, TokenError::WrongType { .. }));
    }

    #[tokio::test]
    async fn revoked_family_is_rejected() {
        let bus: Arc<dyn SharedBus> = InMemorySharedBus::new();
        let mut claims = base_claims(TokenType::Access);
        claims.fid = Some("fam-1".to_string());
        bus.revoke_family("fam-1").await.unwrap();
        let token = sign(&claims);
        let err = verifier().authenticate(&bus, &token, TokenType::Access, None).await.unwrap_err();
        assert!(matches!(err, TokenError::Revoked));
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_rejected() {
        let bus: Arc<dyn SharedBus> = InMemorySharedBus::new();
        let mut claims = base_claims(TokenType::Access);
        claims.fp = Some(hex::encode(Sha256::digest(b"real-device")));
        let token = sign(&claims);
        let err = verifier()
            .authenticate(&bus, &token, TokenType::Access, Some("wrong-device"))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::FingerprintMismatch));
    }
}
