//! Token auth (spec §4.9): verifies bearer JWTs and consults the revocation
//! list. Issuance is out of scope — tokens are assumed minted by an external
//! identity provider carrying `sub`, `role`, `jti`, `exp`.

use chrono::{TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use phoenix_db::TokenRepository;
use phoenix_types::{Claims, PhoenixError, PhoenixResult};
use std::sync::Arc;

pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    tokens: Arc<dyn TokenRepository>,
}

impl TokenVerifier {
    pub fn new(jwt_secret: &str, tokens: Arc<dyn TokenRepository>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::default(),
            tokens,
        }
    }

    /// Rejects missing/invalid/expired tokens with `Unauthorized`, then
    /// checks the revocation table — revoked tokens stay rejected until GC
    /// removes the row, independent of their `exp`.
    pub async fn verify(&self, bearer_token: &str) -> PhoenixResult<Claims> {
        let data = decode::<Claims>(bearer_token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if self.tokens.is_revoked(&claims.jti).await? {
            return Err(PhoenixError::Unauthorized("token has been revoked".to_string()));
        }

        Ok(claims)
    }

    /// Writes `jti` to the revocation table with `expires_at = exp`, per spec §4.9.
    pub async fn logout(&self, claims: &Claims) -> PhoenixResult<()> {
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| PhoenixError::Validation("invalid exp claim".to_string()))?;
        self.tokens
            .revoke(&claims.jti, &claims.sub, expires_at, Utc::now())
            .await
    }
}

/// Checks that `role` is one of `allowed`; returns `Forbidden` otherwise.
pub fn require_role(role: &str, allowed: &[&str]) -> PhoenixResult<()> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(PhoenixError::Forbidden(format!(
            "role '{role}' is not permitted to perform this action"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTokenRepository {
        revoked: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl TokenRepository for FakeTokenRepository {
        async fn revoke(&self, jti: &str, _user_id: &str, _expires_at: DateTime<Utc>, _now: DateTime<Utc>) -> PhoenixResult<()> {
            self.revoked.lock().unwrap().insert(jti.to_string());
            Ok(())
        }

        async fn is_revoked(&self, jti: &str) -> PhoenixResult<bool> {
            Ok(self.revoked.lock().unwrap().contains(jti))
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> PhoenixResult<u64> {
            Ok(0)
        }
    }

    fn make_token(secret: &str, jti: &str, exp: i64) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            role: "operator".to_string(),
            jti: jti.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn verify_accepts_a_valid_unrevoked_token() {
        let repo = Arc::new(FakeTokenRepository::default());
        let verifier = TokenVerifier::new("secret", repo);
        let token = make_token("secret", "jti-1", (Utc::now().timestamp()) + 3600);

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.jti, "jti-1");
    }

    #[tokio::test]
    async fn verify_rejects_revoked_token() {
        let repo = Arc::new(FakeTokenRepository::default());
        let verifier = TokenVerifier::new("secret", repo.clone());
        let token = make_token("secret", "jti-2", Utc::now().timestamp() + 3600);

        repo.revoke("jti-2", "user-1", Utc::now(), Utc::now()).await.unwrap();
        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(PhoenixError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn verify_rejects_expired_token() {
        let repo = Arc::new(FakeTokenRepository::default());
        let verifier = TokenVerifier::new("secret", repo);
        let token = make_token("secret", "jti-3", Utc::now().timestamp() - 10);

        assert!(verifier.verify(&token).await.is_err());
    }

    #[test]
    fn require_role_rejects_unlisted_roles() {
        assert!(require_role("viewer", &["admin", "operator"]).is_err());
        assert!(require_role("admin", &["admin", "operator"]).is_ok());
    }
}
