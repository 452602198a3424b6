use crate::auth::PasswordHasher;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{RegisterRequest, User, UserSummary};
use chrono::Utc;
use sqlx::Row;

/// Credential store: every read and write of the `users` table.
#[derive(Clone)]
pub struct UserStore {
    pool: DbPool,
    hasher: PasswordHasher,
}

impl UserStore {
    pub fn new(pool: DbPool, hasher: PasswordHasher) -> Self {
        Self { pool, hasher }
    }

    /// Hashes the password and inserts the user. A duplicate username is
    /// reported by the unique constraint, not by a lookup beforehand.
    pub async fn register(&self, new_user: &RegisterRequest) -> AppResult<User> {
        let password_hash = self.hasher.hash(&new_user.password).await?;

        let result = sqlx::query(
            "INSERT INTO users (username, password, first_name, last_name, phone, join_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_user.username)
        .bind(&password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.phone)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict("Username already taken".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(username = %new_user.username, "registered user");
        self.get(&new_user.username).await
    }

    /// `false` for an unknown username as well as a wrong password.
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool.as_ref())
            .await?;

        match row {
            Some(row) => {
                let hash: String = row.get("password");
                self.hasher.verify(password, &hash).await
            }
            None => Ok(false),
        }
    }

    pub async fn update_last_login(&self, username: &str) -> AppResult<User> {
        let result = sqlx::query("UPDATE users SET last_login_at = ? WHERE username = ?")
            .bind(Utc::now())
            .bind(username)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User"));
        }

        self.get(username).await
    }

    pub async fn get(&self, username: &str) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT username, first_name, last_name, phone, join_at, last_login_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(AppError::NotFound("User"))
    }

    pub async fn all(&self) -> AppResult<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT username, first_name, last_name, phone FROM users ORDER BY username",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_pool;

    pub(crate) fn new_user(username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            first_name: "Test".to_string(),
            last_name: username.to_string(),
            phone: "+15550100".to_string(),
        }
    }

    pub(crate) fn store(pool: DbPool) -> UserStore {
        UserStore::new(pool, PasswordHasher::new(4, 4))
    }

    async fn user_count(pool: &DbPool, username: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(pool.as_ref())
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn register_stores_a_hash_not_the_password() {
        let pool = test_pool().await;
        let users = store(pool.clone());

        let user = users.register(&new_user("alice", "password123")).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.last_name, "alice");
        assert!(user.last_login_at.is_none());

        let stored: String = sqlx::query("SELECT password FROM users WHERE username = 'alice'")
            .fetch_one(pool.as_ref())
            .await
            .unwrap()
            .get("password");
        assert_ne!(stored, "password123");
        assert!(stored.starts_with("$2"));
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts_without_second_row() {
        let pool = test_pool().await;
        let users = store(pool.clone());

        users.register(&new_user("alice", "password123")).await.unwrap();
        let err = users.register(&new_user("alice", "other")).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(user_count(&pool, "alice").await, 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_registrations_yield_one_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("users.db").display());
        let pool = crate::db::init_db(&url, 2).await.unwrap();
        let users = store(pool.clone());

        let first = new_user("alice", "pw1");
        let second = new_user("alice", "pw2");
        let (a, b) = tokio::join!(users.register(&first), users.register(&second));

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(AppError::Conflict(_))))
                .count(),
            1
        );
        assert_eq!(user_count(&pool, "alice").await, 1);
    }

    #[tokio::test]
    async fn authenticate_is_true_only_for_matching_credentials() {
        let users = store(test_pool().await);
        users.register(&new_user("alice", "password123")).await.unwrap();

        assert!(users.authenticate("alice", "password123").await.unwrap());
        assert!(!users.authenticate("alice", "wrong").await.unwrap());
        assert!(!users.authenticate("bob", "password123").await.unwrap());
        assert!(!users.authenticate("", "").await.unwrap());
    }

    #[tokio::test]
    async fn update_last_login_sets_timestamp() {
        let users = store(test_pool().await);
        let registered = users.register(&new_user("alice", "pw")).await.unwrap();

        let updated = users.update_last_login("alice").await.unwrap();
        let last_login = updated.last_login_at.expect("last_login_at set");
        assert!(last_login >= registered.join_at);
        assert_eq!(updated.join_at, registered.join_at);
    }

    #[tokio::test]
    async fn update_last_login_for_unknown_user_creates_nothing() {
        let pool = test_pool().await;
        let users = store(pool.clone());

        let err = users.update_last_login("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(user_count(&pool, "ghost").await, 0);
    }

    #[tokio::test]
    async fn get_and_all() {
        let users = store(test_pool().await);
        assert!(matches!(users.get("alice").await, Err(AppError::NotFound(_))));
        assert!(users.all().await.unwrap().is_empty());

        users.register(&new_user("bob", "pw")).await.unwrap();
        users.register(&new_user("alice", "pw")).await.unwrap();

        assert_eq!(users.get("bob").await.unwrap().username, "bob");
        let names: Vec<String> = users
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
