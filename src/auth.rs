use crate::error::{AppError, AppResult};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// bcrypt with a fixed work factor. Hashing is CPU-bound, so it runs on the
/// blocking pool with at most `concurrency` jobs in flight.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    permits: Arc<Semaphore>,
}

impl PasswordHasher {
    pub fn new(cost: u32, concurrency: usize) -> Self {
        Self {
            cost,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn hash(&self, password: &str) -> AppResult<String> {
        let cost = self.cost;
        let password = password.to_owned();
        self.run(move || bcrypt::hash(password, cost)).await
    }

    /// Returns `Ok(false)` for a mismatch and for a stored hash bcrypt cannot
    /// parse; only pool failures are errors.
    pub async fn verify(&self, password: &str, hash: &str) -> AppResult<bool> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        self.run(move || Ok::<_, bcrypt::BcryptError>(bcrypt::verify(password, &hash).unwrap_or(false)))
            .await
    }

    async fn run<F, T>(&self, job: F) -> AppResult<T>
    where
        F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
        T: Send + 'static,
    {
        // Owned by the blocking job, so a dropped request cannot free it early.
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?;

        Ok(result?)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<(EncodingKey, DecodingKey)>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            keys: Arc::new((
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            )),
            ttl,
        }
    }

    pub fn issue(&self, username: &str) -> AppResult<String> {
        let iat = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| AppError::Internal("token lifetime overflows".to_string()))?;
        let claims = Claims {
            username: username.to_string(),
            iat,
            exp,
        };

        Ok(encode(&Header::default(), &claims, &self.keys.0)?)
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.keys.1, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("token rejected: {}", e);
                AppError::Unauthorized
            })
    }
}

// Middleware to validate the bearer token; verified claims go into request extensions
pub async fn auth_middleware(
    State(tokens): State<TokenIssuer>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok());

    let token = match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
        Some(token) => token.trim(),
        None => return Err(AppError::Unauthorized),
    };

    let claims = tokens.verify(token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = PasswordHasher::new(4, 2);
        let hash = hasher.hash("password123").await.unwrap();

        assert_ne!(hash, "password123");
        assert!(hasher.verify("password123", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let hasher = PasswordHasher::new(4, 1);
        let a = hasher.hash("pw").await.unwrap();
        let b = hasher.hash("pw").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_a_mismatch() {
        let hasher = PasswordHasher::new(4, 1);
        assert!(!hasher.verify("pw", "not-a-bcrypt-hash").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_hash_keeps_its_permit_until_bcrypt_finishes() {
        let hasher = PasswordHasher::new(14, 1);

        let outcome = tokio::time::timeout(Duration::from_millis(20), hasher.hash("pw")).await;
        assert!(outcome.is_err(), "cost 14 should outlast 20ms");
        assert_eq!(hasher.permits.available_permits(), 0);

        // Released once the abandoned job completes.
        let permit = hasher.permits.acquire().await.unwrap();
        drop(permit);
        assert_eq!(hasher.permits.available_permits(), 1);
    }

    #[test]
    fn oversized_ttl_is_an_error_not_a_panic() {
        let tokens = TokenIssuer::new("secret", Duration::from_secs(u64::MAX));
        assert!(matches!(tokens.issue("alice"), Err(AppError::Internal(_))));
    }

    #[test]
    fn issued_token_carries_username() {
        let tokens = TokenIssuer::new("test-secret", Duration::from_secs(60));
        let token = tokens.issue("alice").unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let ours = TokenIssuer::new("ours", Duration::from_secs(60));
        let theirs = TokenIssuer::new("theirs", Duration::from_secs(60));
        let token = theirs.issue("alice").unwrap();

        assert!(matches!(ours.verify(&token), Err(AppError::Unauthorized)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenIssuer::new("secret", Duration::from_secs(60));
        let past = Utc::now().timestamp() - 3600;
        let claims = Claims {
            username: "alice".into(),
            iat: past - 60,
            exp: past,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(matches!(tokens.verify(&token), Err(AppError::Unauthorized)));
    }
}
