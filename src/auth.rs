use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entity::account;
use crate::error::AppError;

/// The identity acting in a request, threaded explicitly into every
/// authenticated handler.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub account_id: i32,
    pub username: String,
}

#[derive(Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i32,
    pub username: String,
    pub token_type: String,
    pub exp: usize,
}

#[derive(Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i32,
    pub token_type: String,
    pub exp: usize,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let db = match req.app_data::<web::Data<DatabaseConnection>>() {
            Some(db) => db.clone(),
            None => {
                return Box::pin(async { Err(AppError::Internal.into()) });
            }
        };
        let config = match req.app_data::<web::Data<AppConfig>>() {
            Some(cfg) => cfg.clone(),
            None => {
                return Box::pin(async { Err(AppError::Internal.into()) });
            }
        };
        let token = extract_token(req, &config);

        Box::pin(async move {
            let token = token.ok_or_else(AppError::need_login)?;
            let auth = authenticate_token(&db, &config, &token).await?;
            Ok(auth)
        })
    }
}

fn extract_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let header = config.token_header.as_str();
    req.headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn authenticate_token(
    db: &DatabaseConnection,
    config: &AppConfig,
    token: &str,
) -> Result<AuthUser, AppError> {
    let claims = decode_access_token(config, token)?;
    let account = account::Entity::find_by_id(claims.sub)
        .one(db)
        .await?
        .ok_or_else(AppError::invalid_credentials)?;

    Ok(AuthUser {
        account_id: account.id,
        username: account.username,
    })
}

pub fn issue_access_token(config: &AppConfig, account: &account::Model) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::minutes(config.access_token_ttl_minutes)).timestamp() as usize;
    let claims = AccessClaims {
        sub: account.id,
        username: account.username.clone(),
        token_type: "access".to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal)
}

pub fn issue_refresh_token(config: &AppConfig, account: &account::Model) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(config.refresh_token_ttl_days)).timestamp() as usize;
    let claims = RefreshClaims {
        sub: account.id,
        token_type: "refresh".to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal)
}

/// Refresh tokens are rejected here: only `token_type = "access"` grants
/// access to protected resources.
pub fn decode_access_token(config: &AppConfig, token: &str) -> Result<AccessClaims, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let claims = decode::<AccessClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::need_login())?;
    if claims.token_type != "access" {
        return Err(AppError::need_login());
    }
    Ok(claims)
}
