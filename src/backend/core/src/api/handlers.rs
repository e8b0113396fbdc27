//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, ApiError>` so that errors
//! are converted to HTTP status codes by the `IntoResponse` implementation
//! on `ApiError`. Project-scoped handlers take [`AuthorizedProject`], which
//! only exists once the capability guard has allowed the request.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::info;

use super::{extract::Json, ApiResponse, AppState};
use crate::db::{NewLocale, NewUser};
use crate::error::{ApiError, ErrorCode, Result};
use crate::rbac::{AuthorizedProject, Principal, Role};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 256;

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{} cannot be empty", field)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ApiError::validation(format!(
            "{} cannot exceed {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn require_user(principal: &Principal) -> Result<()> {
    if principal.is_user() {
        Ok(())
    } else {
        Err(ApiError::forbidden("This operation is only available to users"))
    }
}

/// Fresh client secret and the digest that gets persisted.
fn generate_client_secret() -> (String, String) {
    let secret = uuid::Uuid::new_v4().simple().to_string();
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));
    (secret, digest)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Public
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn ping() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "message": "pong",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route", "no route matches this request")
}

/// Fallback for a known path reached with a method it does not serve.
pub async fn method_not_allowed() -> ApiError {
    ApiError::new(
        ErrorCode::MethodNotAllowed,
        "This method is not supported for this resource",
    )
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::validation("A valid email address is required"));
    }
    require_non_empty("Name", &req.name)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::internal(format!("password hashing failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::internal(format!("password hashing task failed: {}", e)))??;

    let user = state
        .store
        .create_user(NewUser {
            email,
            name: req.name.trim().to_string(),
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn current_user(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse> {
    require_user(&principal)?;

    let user = state
        .store
        .get_user(principal.id.as_str())
        .await?
        .ok_or_else(|| ApiError::not_found("User", principal.id.as_str()))?;

    Ok(Json(ApiResponse::success(user)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Projects
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse> {
    let projects = state.store.list_user_projects(&principal.id).await?;
    Ok(Json(ApiResponse::success(projects)))
}

pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse> {
    require_user(&principal)?;
    require_non_empty("Project name", &req.name)?;

    let project = state
        .store
        .create_project(&principal.id, req.name.trim())
        .await?;

    info!(project_id = %project.id, owner = %principal.id, "Project created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(project))))
}

pub async fn show_project(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
) -> Result<impl IntoResponse> {
    let id = &authorized.project_id;
    let project = state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project", id.as_str()))?;

    Ok(Json(ApiResponse::success(project)))
}

pub async fn delete_project(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
) -> Result<impl IntoResponse> {
    state.store.delete_project(&authorized.project_id).await?;
    info!(
        project_id = %authorized.project_id,
        principal = %authorized.principal.id,
        "Project deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Project Keys
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Deserialize)]
pub struct RenameKeyRequest {
    pub old_key: String,
    pub new_key: String,
}

pub async fn add_project_key(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<KeyRequest>,
) -> Result<impl IntoResponse> {
    require_non_empty("Key", &req.key)?;
    let project = state
        .store
        .add_project_key(&authorized.project_id, req.key.trim())
        .await?;
    Ok(Json(ApiResponse::success(project)))
}

pub async fn rename_project_key(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<RenameKeyRequest>,
) -> Result<impl IntoResponse> {
    require_non_empty("Key", &req.new_key)?;
    let project = state
        .store
        .rename_project_key(&authorized.project_id, &req.old_key, req.new_key.trim())
        .await?;
    Ok(Json(ApiResponse::success(project)))
}

pub async fn delete_project_key(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<KeyRequest>,
) -> Result<impl IntoResponse> {
    let project = state
        .store
        .delete_project_key(&authorized.project_id, &req.key)
        .await?;
    Ok(Json(ApiResponse::success(project)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Project Users
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct AssignUserRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

pub async fn list_project_users(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
) -> Result<impl IntoResponse> {
    let users = state
        .store
        .list_project_users(&authorized.project_id)
        .await?;
    Ok(Json(ApiResponse::success(users)))
}

pub async fn assign_project_user(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<AssignUserRequest>,
) -> Result<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::not_found("User", &email))?;

    let member = state
        .store
        .assign_project_user(&authorized.project_id, &user.id, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(member))))
}

pub async fn update_project_user_role(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, user_id)): Path<(String, String)>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse> {
    let member = state
        .store
        .update_project_user_role(&authorized.project_id, &user_id, req.role)
        .await?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn revoke_project_user(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    state
        .store
        .revoke_project_user(&authorized.project_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Project Clients
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct ClientNameRequest {
    pub name: String,
}

pub async fn list_project_clients(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
) -> Result<impl IntoResponse> {
    let clients = state
        .store
        .list_project_clients(&authorized.project_id)
        .await?;
    Ok(Json(ApiResponse::success(clients)))
}

pub async fn show_project_client(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, client_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let client = state
        .store
        .get_project_client(&authorized.project_id, &client_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Client", &client_id))?;
    Ok(Json(ApiResponse::success(client)))
}

pub async fn create_project_client(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<ClientNameRequest>,
) -> Result<impl IntoResponse> {
    require_non_empty("Client name", &req.name)?;
    let (secret, digest) = generate_client_secret();

    let mut client = state
        .store
        .create_project_client(&authorized.project_id, req.name.trim(), &digest)
        .await?;
    client.secret = Some(secret);

    info!(
        project_id = %authorized.project_id,
        client_id = %client.client_id,
        "API client created"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(client))))
}

pub async fn reset_project_client_secret(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, client_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let (secret, digest) = generate_client_secret();

    let mut client = state
        .store
        .reset_project_client_secret(&authorized.project_id, &client_id, &digest)
        .await?;
    client.secret = Some(secret);

    info!(
        project_id = %authorized.project_id,
        client_id = %client.client_id,
        "API client secret reset"
    );
    Ok(Json(ApiResponse::success(client)))
}

pub async fn rename_project_client(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, client_id)): Path<(String, String)>,
    Json(req): Json<ClientNameRequest>,
) -> Result<impl IntoResponse> {
    require_non_empty("Client name", &req.name)?;
    let client = state
        .store
        .rename_project_client(&authorized.project_id, &client_id, req.name.trim())
        .await?;
    Ok(Json(ApiResponse::success(client)))
}

pub async fn delete_project_client(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, client_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    state
        .store
        .delete_project_client(&authorized.project_id, &client_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Locales
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_locales(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
) -> Result<impl IntoResponse> {
    let locales = state.store.list_locales(&authorized.project_id).await?;
    Ok(Json(ApiResponse::success(locales)))
}

pub async fn create_locale(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Json(req): Json<NewLocale>,
) -> Result<impl IntoResponse> {
    require_non_empty("Locale ident", &req.ident)?;
    require_non_empty("Language", &req.language)?;

    let locale = state
        .store
        .create_locale(&authorized.project_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(locale))))
}

pub async fn show_locale(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, ident)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let locale = state
        .store
        .get_locale(&authorized.project_id, &ident)
        .await?
        .ok_or_else(|| ApiError::not_found("Locale", &ident))?;
    Ok(Json(ApiResponse::success(locale)))
}

pub async fn update_locale_pairs(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, ident)): Path<(String, String)>,
    Json(pairs): Json<BTreeMap<String, String>>,
) -> Result<impl IntoResponse> {
    let locale = state
        .store
        .update_locale_pairs(&authorized.project_id, &ident, pairs)
        .await?;
    Ok(Json(ApiResponse::success(locale)))
}

pub async fn delete_locale(
    State(state): State<AppState>,
    authorized: AuthorizedProject,
    Path((_, ident)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    state
        .store
        .delete_locale(&authorized.project_id, &ident)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_secret_digest() {
        let (secret, digest) = generate_client_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hex::encode(Sha256::digest(secret.as_bytes())));

        let (other, _) = generate_client_secret();
        assert_ne!(secret, other);
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("Name", "Website").is_ok());
        assert!(require_non_empty("Name", "   ").is_err());
        assert!(require_non_empty("Name", &"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_clients_cannot_use_user_operations() {
        assert!(require_user(&Principal::user("alice")).is_ok());
        assert!(require_user(&Principal::client("ci")).is_err());
    }
}
