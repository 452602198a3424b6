use crate::auth::TokenIssuer;
use crate::error::{AppError, AppResult};
use crate::models::RegisterRequest;
use crate::users::UserStore;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(users: UserStore, tokens: TokenIssuer) -> Self {
        Self { users, tokens }
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<String> {
        let username = normalize_username(username);
        if !self.users.authenticate(username, password).await? {
            tracing::info!(username, "failed login");
            return Err(AppError::InvalidCredentials);
        }

        self.users.update_last_login(username).await?;
        self.tokens.issue(username)
    }

    /// Registers the user, records the login and only then hands out a token.
    pub async fn register_and_issue_token(&self, mut new_user: RegisterRequest) -> AppResult<String> {
        new_user.username = normalize_username(&new_user.username).to_string();
        validate_registration(&new_user)?;

        let user = self.users.register(&new_user).await?;
        self.users.update_last_login(&user.username).await?;
        tracing::info!(username = %user.username, "new user registered");

        self.tokens.issue(&user.username)
    }
}

/// Usernames are stored and looked up without surrounding whitespace.
fn normalize_username(username: &str) -> &str {
    username.trim()
}

fn validate_registration(new_user: &RegisterRequest) -> AppResult<()> {
    if new_user.username.is_empty() {
        return Err(AppError::Validation("Username cannot be empty".to_string()));
    }
    if new_user.username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::Validation(format!(
            "Username cannot be longer than {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if new_user.password.is_empty() {
        return Err(AppError::Validation("Password cannot be empty".to_string()));
    }
    Ok(())
}
