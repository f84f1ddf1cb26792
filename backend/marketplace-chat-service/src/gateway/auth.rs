//! Credential verification against the external identity issuer.

use crate::error::{AppError, AppResult};
use crate::models::{AuthenticatedUser, UserRole};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims issued by the identity provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub role: UserRole,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<Uuid>,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

impl Claims {
    pub fn into_user(self) -> AppResult<AuthenticatedUser> {
        let user_id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Auth("subject is not a user id".into()))?;

        if self.role == UserRole::StoreManager && self.store_id.is_none() {
            return Err(AppError::Auth("store manager credential without store".into()));
        }

        Ok(AuthenticatedUser {
            user_id,
            role: self.role,
            display_name: self.name,
            store_id: self.store_id,
        })
    }
}

/// Turns an opaque credential into a verified identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> AppResult<AuthenticatedUser>;
}

/// HS256 verifier sharing a secret with the issuer.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a credential for `user` valid for `ttl_secs`. Used by local
    /// tooling and tests; production credentials come from the issuer.
    pub fn sign(&self, user: &AuthenticatedUser, ttl_secs: i64) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.user_id.to_string(),
            role: user.role,
            name: user.display_name.clone(),
            store_id: user.store_id,
            exp: (now + ttl_secs).max(0) as usize,
            iat: now.max(0) as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("token signing: {e}")))
    }

    pub fn decode_claims(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Auth(format!("invalid token: {e}")))
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> AppResult<AuthenticatedUser> {
        let token = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();
        if token.is_empty() {
            return Err(AppError::Auth("missing credential".into()));
        }
        self.decode_claims(token)?.into_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::StoreManager,
            display_name: "Autopartes Lara".into(),
            store_id: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let verifier = JwtVerifier::new("secret");
        let user = manager();
        let token = verifier.sign(&user, 3600).unwrap();

        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified, user);

        let with_scheme = verifier.verify(&format!("Bearer {token}")).await.unwrap();
        assert_eq!(with_scheme, user);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let token = JwtVerifier::new("secret").sign(&manager(), 3600).unwrap();
        let result = JwtVerifier::new("other").verify(&token).await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new("secret");
        let token = verifier.sign(&manager(), -3600).unwrap();
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_credential_rejected() {
        let verifier = JwtVerifier::new("secret");
        assert!(verifier.verify("  ").await.is_err());
    }

    #[test]
    fn test_store_manager_needs_store() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: UserRole::StoreManager,
            name: "x".into(),
            store_id: None,
            exp: 0,
            iat: 0,
        };
        assert!(claims.into_user().is_err());
    }
}
