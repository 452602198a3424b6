use crate::auth::{Claims, TokenIssuer};
use crate::error::{AppError, AppResult};
use crate::messages::MessageStore;
use crate::models::*;
use crate::service::AuthService;
use crate::users::UserStore;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path, State,
    },
    Json,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub users: UserStore,
    pub messages: MessageStore,
    pub tokens: TokenIssuer,
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<TokenResponse>> {
    let Json(payload) = payload?;
    let token = state.auth.login(&payload.username, &payload.password).await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<Json<TokenResponse>> {
    let Json(payload) = payload?;
    let token = state.auth.register_and_issue_token(payload).await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<UsersResponse>> {
    let users = state.users.all().await?;
    Ok(Json(UsersResponse { users }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    username: Result<Path<String>, PathRejection>,
) -> AppResult<Json<UserResponse>> {
    let Path(username) = username?;
    ensure_correct_user(&claims, &username)?;

    let user = state.users.get(&username).await?;
    Ok(Json(UserResponse { user }))
}

pub async fn messages_to_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    username: Result<Path<String>, PathRejection>,
) -> AppResult<Json<MessagesResponse<ReceivedMessage>>> {
    let Path(username) = username?;
    ensure_correct_user(&claims, &username)?;

    let messages = state.messages.list_received_by(&username).await?;
    Ok(Json(MessagesResponse { messages }))
}

pub async fn messages_from_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    username: Result<Path<String>, PathRejection>,
) -> AppResult<Json<MessagesResponse<SentMessage>>> {
    let Path(username) = username?;
    ensure_correct_user(&claims, &username)?;

    let messages = state.messages.list_sent_by(&username).await?;
    Ok(Json(MessagesResponse { messages }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse<Message>>> {
    let Json(payload) = payload?;
    if payload.body.trim().is_empty() {
        return Err(AppError::Validation("Message body cannot be empty".to_string()));
    }

    let message = state
        .messages
        .create(&claims.username, &payload.to_username, &payload.body)
        .await?;
    Ok(Json(MessageResponse { message }))
}

/// Visible to the sender and the recipient only.
pub async fn get_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<MessageResponse<MessageDetail>>> {
    let Path(id) = id?;
    let message = state.messages.get(id).await?;

    if message.from_user.username != claims.username && message.to_user.username != claims.username {
        return Err(AppError::Forbidden);
    }
    Ok(Json(MessageResponse { message }))
}

/// Only the recipient can mark a message read.
pub async fn mark_message_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<MessageResponse<ReadReceipt>>> {
    let Path(id) = id?;
    let message = state.messages.get(id).await?;

    if message.to_user.username != claims.username {
        return Err(AppError::Forbidden);
    }

    let message = state.messages.mark_read(id).await?;
    Ok(Json(MessageResponse { message }))
}

fn ensure_correct_user(claims: &Claims, username: &str) -> AppResult<()> {
    if claims.username == username {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
