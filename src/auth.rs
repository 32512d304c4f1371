use std::future::Future;

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use axum::{
    extract::{FromRequestParts, Json, State},
    http::{header, request::Parts, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, models::User};
use crate::error::{ok, ApiError, ApiResult};
use crate::AppState;

const AUTH_COOKIE_NAME: &str = "access_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Safe-to-serialize view of a signed-in user.
#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl From<User> for SessionUser {
    fn from(user: User) -> Self {
        SessionUser {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        }
    }
}

// Claims for our JWT
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    email: String,
    name: String,
    iss: Option<String>,
}

/// Request identity, extracted from the `access_token` cookie or a Bearer
/// header. A missing token is a 401; a token that fails validation is
/// a 403.
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let config = state.config.clone();
        async move {
            let token = extract_token(parts)
                .ok_or_else(|| ApiError::Unauthorized("Missing auth token".to_string()))?;
            let claims = decode_token(&token, &config)?;
            let id = claims
                .sub
                .parse::<Uuid>()
                .map_err(|_| ApiError::Forbidden("Invalid token".to_string()))?;
            Ok(AuthenticatedUser {
                id,
                email: claims.email,
                name: claims.name,
            })
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Response> {
    let user = db::users::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_jwt(&user, &state.config)?;
    let cookie = build_auth_cookie(&token, &state.config);

    tracing::info!(user_id = %user.id, "user logged in");
    let mut response = ok(SessionUser::from(user)).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(anyhow::Error::from)?,
    );
    Ok(response)
}

pub async fn logout(State(state): State<AppState>) -> ApiResult<Response> {
    let cookie = clear_auth_cookie(&state.config);
    let mut response = ok("Logged out").into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(anyhow::Error::from)?,
    );
    Ok(response)
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let user = db::users::get(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(ok(SessionUser::from(user)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("stored password hash is malformed: {}", e);
            false
        }
    }
}

fn create_jwt(user: &User, config: &Config) -> anyhow::Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::days(1))
        .expect("valid timestamp")
        .timestamp();

    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        name: user.name.clone(),
        exp: expiration as usize,
        iss: config.jwt_issuer.clone(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )?;
    Ok(token)
}

fn decode_token(token: &str, config: &Config) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    if let Some(issuer) = &config.jwt_issuer {
        validation.set_issuer(&[issuer.as_str()]);
    }

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("token rejected: {}", e);
        ApiError::Forbidden("Invalid token".to_string())
    })
}

fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(auth_header) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    if let Some(cookie_header) = parts
        .headers
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
    {
        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some((k, v)) = cookie.split_once('=') {
                if k == AUTH_COOKIE_NAME {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn build_auth_cookie(token: &str, config: &Config) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age=86400",
        AUTH_COOKIE_NAME, token
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_auth_cookie(config: &Config) -> String {
    let mut cookie = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        AUTH_COOKIE_NAME
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn test_config(production: bool) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            port: 3000,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: Some("donorhub".to_string()),
            env_mode: if production {
                "production".to_string()
            } else {
                "development".to_string()
            },
            allowed_origins: None,
            rate_limit_per_second: 1200,
            rate_limit_burst: 2400,
        }
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Pat Chen".to_string(),
            email: "pat@example.org".to_string(),
            password_hash: String::new(),
            role: "staff".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cookie_is_secure_only_in_production() {
        let dev = build_auth_cookie("abc", &test_config(false));
        assert!(dev.starts_with("access_token=abc; HttpOnly; SameSite=Strict"));
        assert!(!dev.contains("Secure"));

        let prod = build_auth_cookie("abc", &test_config(true));
        assert!(prod.ends_with("; Secure"));

        let cleared = clear_auth_cookie(&test_config(false));
        assert!(cleared.contains("access_token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn token_round_trips_through_decode() {
        let config = test_config(false);
        let user = sample_user();
        let token = create_jwt(&user, &config).unwrap();
        let claims = decode_token(&token, &config).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.iss.as_deref(), Some("donorhub"));
    }

    #[test]
    fn tampered_token_is_forbidden() {
        let config = test_config(false);
        let other = Config {
            jwt_secret: "different-secret".to_string(),
            ..test_config(false)
        };
        let token = create_jwt(&sample_user(), &other).unwrap();
        let err = decode_token(&token, &config).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn extract_token_prefers_bearer_then_cookie() {
        let request = Request::builder()
            .header("Cookie", "theme=dark; access_token=cookie-token")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(extract_token(&parts).as_deref(), Some("cookie-token"));

        let request = Request::builder()
            .header("Authorization", "Bearer header-token")
            .header("Cookie", "access_token=cookie-token")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(extract_token(&parts).as_deref(), Some("header-token"));

        let request = Request::builder().body(()).unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(extract_token(&parts), None);
    }

    #[test]
    fn password_verification_rejects_wrong_password() {
        use argon2::password_hash::{rand_core::OsRng, SaltString};
        use argon2::PasswordHasher;

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"correct horse", &salt)
            .unwrap()
            .to_string();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
