#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::config::DATABASE_DIR;

/// JSON file holding every registered user, keyed by username
pub const USERS_FILE: &str = "database/users.json";

/// Session lifetime in seconds (24 hours)
pub const SESSION_DURATION: u64 = 24 * 60 * 60;

/// A registered application user
///
/// Stored in the users file; the password is kept only as an Argon2 hash.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Display name shown in the UI
    pub full_name: String,

    /// Email address (unique across users)
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,
}

/// Registration form data
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub full_name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,
}

/// Login form data
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// An active login session
#[derive(Debug, Clone)]
pub struct Session {
    /// Username the session belongs to
    pub user_id: String,

    /// When the session stops being valid
    pub expires_at: SystemTime,
}

lazy_static! {
    /// Active sessions by session id, shared across request handlers
    pub static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

/// Initialize the database directory and users file
///
/// Creates the database directory and an empty users file when they do not
/// exist yet. Safe to call on every startup.
///
/// # Returns
/// * `std::io::Result<()>` - Success or the underlying IO error
pub fn init_database() -> std::io::Result<()> {
    if !Path::new(DATABASE_DIR).exists() {
        create_dir_all(DATABASE_DIR)?;
    }
    if !Path::new(USERS_FILE).exists() {
        let mut file = File::create(USERS_FILE)?;
        file.write_all(b"{}")?;
    }
    Ok(())
}

/// Per-user directory under the database root
pub fn user_dir(username: &str) -> String {
    format!("{}/{}", DATABASE_DIR, username)
}

/// Load all users from the users file
///
/// # Returns
/// * `Result<HashMap<String, User>, String>` - Users keyed by username, or
///   an error message when the file is unreadable or corrupt
pub fn get_users() -> Result<HashMap<String, User>, String> {
    if !Path::new(USERS_FILE).exists() {
        return Ok(HashMap::new());
    }
    let contents =
        fs::read_to_string(USERS_FILE).map_err(|e| format!("Failed to read users file: {}", e))?;
    serde_json::from_str(&contents).map_err(|e| format!("Failed to parse users file: {}", e))
}

/// Save all users to the users file
///
/// # Arguments
/// * `users` - Full user map to persist
///
/// # Returns
/// * `Result<(), String>` - Success or an error message
pub fn save_users(users: &HashMap<String, User>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(users)
        .map_err(|e| format!("Failed to serialize users: {}", e))?;
    fs::write(USERS_FILE, json).map_err(|e| format!("Failed to write users file: {}", e))
}

/// Hash a password with Argon2 and a random salt
///
/// # Arguments
/// * `password` - Plaintext password
///
/// # Returns
/// * `Result<String, String>` - PHC-format hash string or an error message
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| format!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Check a password against a stored hash
///
/// # Arguments
/// * `password` - Plaintext password to check
/// * `hash` - Stored PHC-format hash
///
/// # Returns
/// * `Result<bool, String>` - Ok(false) on mismatch; Err only when the
///   stored hash itself is invalid
pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Register a new user
///
/// Rejects duplicate usernames and duplicate email addresses, then stores
/// the user with a freshly hashed password and creates their directory.
///
/// # Arguments
/// * `request` - Validated registration form data
///
/// # Returns
/// * `Result<User, String>` - The stored user or the rejection message
pub fn register_user(request: &RegisterRequest) -> Result<User, String> {
    let mut users = get_users()?;

    let username = request.username.trim().to_string();
    let email = request.email.trim().to_string();

    if users.contains_key(&username) {
        return Err("Username already exists".to_string());
    }
    if users.values().any(|u| u.email == email) {
        return Err("Email already exists!".to_string());
    }

    let user = User {
        username: username.clone(),
        full_name: request.full_name.trim().to_string(),
        email,
        password_hash: hash_password(&request.password)?,
    };

    users.insert(username.clone(), user.clone());
    save_users(&users)?;

    create_dir_all(user_dir(&username))
        .map_err(|e| format!("Failed to create user directory: {}", e))?;

    Ok(user)
}

/// Verify a username and password pair
///
/// # Arguments
/// * `username` - Claimed username
/// * `password` - Plaintext password
///
/// # Returns
/// * `Result<User, String>` - The user on success; the same generic message
///   for unknown usernames and wrong passwords
pub fn verify_user(username: &str, password: &str) -> Result<User, String> {
    let users = get_users()?;
    let user = users
        .get(username)
        .ok_or_else(|| "Invalid username or password".to_string())?;
    if !verify_password(password, &user.password_hash)? {
        return Err("Invalid username or password".to_string());
    }
    Ok(user.clone())
}

/// Create a session for a user and return its id
pub fn create_session(username: &str) -> String {
    let session_id = Uuid::new_v4().to_string();
    let session = Session {
        user_id: username.to_string(),
        expires_at: SystemTime::now() + Duration::from_secs(SESSION_DURATION),
    };
    SESSIONS
        .write()
        .unwrap()
        .insert(session_id.clone(), session);
    session_id
}

/// Resolve a session id to its username, if still valid
pub fn validate_session(session_id: &str) -> Option<String> {
    let sessions = SESSIONS.read().unwrap();
    let session = sessions.get(session_id)?;
    if session.expires_at < SystemTime::now() {
        return None;
    }
    Some(session.user_id.clone())
}

/// Remove a session; unknown ids are ignored
pub fn destroy_session(session_id: &str) {
    SESSIONS.write().unwrap().remove(session_id);
}

/// Middleware guarding the API routes
///
/// Validates the session cookie and stores the username in the request
/// extensions for handlers to pick up. Requests without a valid session get
/// a JSON 401.
pub async fn require_auth(jar: CookieJar, mut request: Request, next: Next) -> Response {
    if let Some(cookie) = jar.get("session") {
        if let Some(username) = validate_session(cookie.value()) {
            request.extensions_mut().insert(username);
            return next.run(request).await;
        }
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized"})),
    )
        .into_response()
}

/// POST /api/register
pub async fn handle_register(Json(payload): Json<RegisterRequest>) -> Response {
    if payload.username.trim().is_empty()
        || payload.password.is_empty()
        || payload.email.trim().is_empty()
        || payload.full_name.trim().is_empty()
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing required fields"})),
        )
            .into_response();
    }

    match register_user(&payload) {
        Ok(user) => {
            log::info!("Registered user '{}'", user.username);
            (
                StatusCode::CREATED,
                Json(json!({"message": "Registration successful"})),
            )
                .into_response()
        }
        Err(message) => (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response(),
    }
}

/// POST /api/login
pub async fn handle_login(jar: CookieJar, Json(payload): Json<LoginRequest>) -> Response {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing username or password"})),
        )
            .into_response();
    }

    match verify_user(payload.username.trim(), &payload.password) {
        Ok(user) => {
            let session_id = create_session(&user.username);
            let mut cookie = Cookie::new("session", session_id);
            cookie.set_path("/");
            cookie.set_http_only(true);
            let jar = jar.add(cookie);

            (
                jar,
                Json(json!({
                    "message": "Login successful",
                    "user": {
                        "id": user.username,
                        "username": user.username,
                        "full_name": user.full_name,
                        "email": user.email,
                    }
                })),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid username or password"})),
        )
            .into_response(),
    }
}

/// GET /api/logout
pub async fn handle_logout(jar: CookieJar) -> Response {
    let session_value = jar.get("session").map(|c| c.value().to_string());
    let jar = match session_value {
        Some(session_id) => {
            destroy_session(&session_id);
            let mut removal = Cookie::from("session");
            removal.set_path("/");
            jar.remove(removal)
        }
        None => jar,
    };
    (jar, Json(json!({"message": "Logged out successfully"}))).into_response()
}

/// GET /api/user
pub async fn handle_current_user(Extension(username): Extension<String>) -> Response {
    let users = match get_users() {
        Ok(users) => users,
        Err(message) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": message})),
            )
                .into_response();
        }
    };

    match users.get(&username) {
        Some(user) => Json(json!({
            "user": {
                "id": user.username,
                "username": user.username,
                "full_name": user.full_name,
                "email": user.email,
            }
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        )
            .into_response(),
    }
}
