use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify};
use chrono::Utc;
use log::{error, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{issue_access_token, issue_refresh_token, AuthUser};
use crate::config::AppConfig;
use crate::entity::{account, profile};
use crate::error::{AppError, FieldErrors};
use crate::mailer::Mailer;
use crate::verification::{self, VerifyOutcome};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(register)))
        .service(web::resource("/").route(web::post().to(register)))
        .service(web::resource("/auth/login/").route(web::post().to(login)))
        .service(web::resource("/auth/token/").route(web::post().to(login)))
        .service(web::resource("/auth/verify-email/").route(web::get().to(verify_email)))
        .service(web::resource("/auth/resend-verification/").route(web::post().to(resend_verification)))
        .service(
            web::resource("/profile/")
                .route(web::get().to(get_profile))
                .route(web::patch().to(patch_profile)),
        );
}

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]+$").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w\.-]+@[\w\.-]+\.\w+$").unwrap());
static NIM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8,20}$").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{10,15}$").unwrap());

#[derive(Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    password_confirmation: Option<String>,
    full_name: Option<String>,
    nim: Option<String>,
    jurusan: Option<String>,
    angkatan: Option<i32>,
    phone_number: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct VerifyEmailQuery {
    token: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct ResendVerificationRequest {
    email: Option<String>,
}

#[derive(Deserialize)]
struct ProfileUpdateRequest {
    full_name: Option<String>,
    jurusan: Option<String>,
    angkatan: Option<i32>,
    phone_number: Option<String>,
    nim: Option<String>,
}

#[derive(Serialize)]
struct UserDto {
    id: i32,
    username: String,
    email: String,
}

#[derive(Serialize)]
struct ProfileDto {
    user: UserDto,
    phone_number: Option<String>,
    full_name: String,
    nim: String,
    jurusan: String,
    angkatan: i32,
    is_email_verified: bool,
}

struct ValidatedRegistration {
    username: String,
    email: String,
    password: String,
    full_name: String,
    nim: String,
    jurusan: String,
    angkatan: i32,
    phone_number: Option<String>,
}

fn push_error(errors: &mut FieldErrors, field: &str, msg: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(msg.to_string());
}

/// All field checks run before any error is returned, so a client sees
/// every invalid field in one response.
async fn validate_registration(
    db: &DatabaseConnection,
    payload: &RegisterRequest,
) -> Result<ValidatedRegistration, AppError> {
    let mut errors = FieldErrors::new();

    let username = payload.username.clone().unwrap_or_default();
    if username.trim().is_empty() {
        push_error(&mut errors, "username", "This field is required.");
    } else if !USERNAME_RE.is_match(&username) {
        push_error(&mut errors, "username", "Username contains invalid characters.");
    } else {
        let taken = account::Entity::find()
            .filter(account::Column::Username.eq(username.clone()))
            .count(db)
            .await?;
        if taken > 0 {
            push_error(&mut errors, "username", "Username is already in use.");
        }
    }

    let email = payload.email.clone().unwrap_or_default();
    if email.trim().is_empty() {
        push_error(&mut errors, "email", "This field is required.");
    } else if !EMAIL_RE.is_match(&email) {
        push_error(&mut errors, "email", "Invalid email format.");
    } else {
        let taken = account::Entity::find()
            .filter(account::Column::Email.eq(email.clone()))
            .count(db)
            .await?;
        if taken > 0 {
            push_error(&mut errors, "email", "Email is already in use.");
        }
    }

    let password = payload.password.clone().unwrap_or_default();
    if password.is_empty() {
        push_error(&mut errors, "password", "This field is required.");
    } else if password.len() < 8 {
        push_error(&mut errors, "password", "Password must be at least 8 characters.");
    }
    let confirmation = payload.password_confirmation.clone().unwrap_or_default();
    if confirmation.is_empty() {
        push_error(&mut errors, "password_confirmation", "This field is required.");
    } else if !password.is_empty() && password != confirmation {
        push_error(&mut errors, "password_confirmation", "Passwords do not match.");
    }

    let full_name = payload.full_name.clone().unwrap_or_default();
    if full_name.trim().is_empty() {
        push_error(&mut errors, "full_name", "This field is required.");
    } else if full_name.len() > 100 {
        push_error(&mut errors, "full_name", "Ensure this field has no more than 100 characters.");
    }

    let nim = payload.nim.clone().unwrap_or_default();
    if nim.trim().is_empty() {
        push_error(&mut errors, "nim", "This field is required.");
    } else if !NIM_RE.is_match(&nim) {
        push_error(&mut errors, "nim", "Invalid NIM format. Use 8-20 digits.");
    } else {
        let taken = profile::Entity::find()
            .filter(profile::Column::Nim.eq(nim.clone()))
            .count(db)
            .await?;
        if taken > 0 {
            push_error(&mut errors, "nim", "NIM is already in use.");
        }
    }

    let jurusan = payload.jurusan.clone().unwrap_or_default();
    if jurusan.trim().is_empty() {
        push_error(&mut errors, "jurusan", "This field is required.");
    } else if jurusan.len() > 100 {
        push_error(&mut errors, "jurusan", "Ensure this field has no more than 100 characters.");
    }

    let angkatan = match payload.angkatan {
        Some(v) if (2000..=2100).contains(&v) => v,
        Some(_) => {
            push_error(&mut errors, "angkatan", "Angkatan must be between 2000 and 2100.");
            0
        }
        None => {
            push_error(&mut errors, "angkatan", "This field is required.");
            0
        }
    };

    let phone_number = payload.phone_number.clone().filter(|v| !v.is_empty());
    if let Some(ref phone) = phone_number {
        if !PHONE_RE.is_match(phone) {
            push_error(&mut errors, "phone_number", "Invalid phone number format.");
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok(ValidatedRegistration {
        username,
        email,
        password,
        full_name,
        nim,
        jurusan,
        angkatan,
        phone_number,
    })
}

/// A UNIQUE violation that slips past the pre-checks under concurrent
/// registration maps back to the same field-level 400.
fn map_insert_error(err: sea_orm::DbErr) -> AppError {
    let msg = err.to_string();
    if msg.contains("UNIQUE") || msg.contains("Duplicate") {
        if msg.contains("nim") {
            return AppError::field_error("nim", "NIM is already in use.");
        }
        if msg.contains("email") {
            return AppError::field_error("email", "Email is already in use.");
        }
        return AppError::field_error("username", "Username is already in use.");
    }
    err.into()
}

async fn register(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    mailer: web::Data<dyn Mailer>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let data = validate_registration(db.get_ref(), &payload).await?;

    let password_hash = hash(&data.password, 10).map_err(|_| AppError::Internal)?;
    let token = verification::generate_token();
    let now = Utc::now();

    let username = data.username.clone();
    let email = data.email.clone();
    let stored_token = token.clone();
    let created = db
        .transaction::<_, account::Model, AppError>(move |txn| {
            Box::pin(async move {
                let new_account = account::ActiveModel {
                    username: Set(username),
                    email: Set(email),
                    password_hash: Set(password_hash),
                    created: Set(Some(now)),
                    updated: Set(Some(now)),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(map_insert_error)?;

                profile::ActiveModel {
                    account_id: Set(new_account.id),
                    nim: Set(data.nim),
                    full_name: Set(data.full_name),
                    phone_number: Set(data.phone_number),
                    jurusan: Set(data.jurusan),
                    angkatan: Set(data.angkatan),
                    is_email_verified: Set(0),
                    email_verification_token: Set(Some(stored_token)),
                    created: Set(Some(now)),
                    updated: Set(Some(now)),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(map_insert_error)?;

                Ok(new_account)
            })
        })
        .await
        .map_err(AppError::from)?;

    if let Err(err) = verification::send_verification_email(
        mailer.get_ref(),
        config.get_ref(),
        &created.email,
        &token,
    ) {
        error!("failed to send verification email to {}", created.email);
        return Err(err);
    }

    let user = UserDto {
        id: created.id,
        username: created.username,
        email: created.email,
    };
    Ok(HttpResponse::Created().json(json!({
        "user": user,
        "message": "User registered successfully. Please verify your email.",
        "redirect": config.frontend_redirect_url.clone(),
    })))
}

async fn verify_email(
    db: web::Data<DatabaseConnection>,
    query: web::Query<VerifyEmailQuery>,
) -> Result<HttpResponse, AppError> {
    let token = match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => {
            warn!("invalid email verification attempt: no token provided");
            return Err(AppError::bad_request("Token is required"));
        }
    };

    let outcome = verification::consume_token(db.get_ref(), token, query.email.as_deref()).await?;
    let message = match outcome {
        VerifyOutcome::Verified => "Email verified successfully",
        VerifyOutcome::AlreadyVerified => "Email already verified",
    };
    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}

async fn resend_verification(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    mailer: web::Data<dyn Mailer>,
    payload: web::Json<ResendVerificationRequest>,
) -> Result<HttpResponse, AppError> {
    let email = match payload.email.as_deref().filter(|e| !e.is_empty()) {
        Some(email) => email,
        None => {
            warn!("resend verification attempt: no email provided");
            return Err(AppError::bad_request("Email is required"));
        }
    };

    let found = account::Entity::find()
        .filter(account::Column::Email.eq(email))
        .one(db.get_ref())
        .await?;
    let acc = match found {
        Some(acc) => acc,
        None => {
            warn!("resend verification attempt: email {} not found", email);
            return Err(AppError::not_found("User not found"));
        }
    };

    let prof = profile::Entity::find()
        .filter(profile::Column::AccountId.eq(acc.id))
        .one(db.get_ref())
        .await?
        .ok_or(AppError::Internal)?;

    if prof.is_email_verified == 1 {
        return Ok(HttpResponse::Ok().json(json!({ "message": "Email already verified" })));
    }

    // the old token is gone as soon as this commits
    let token = verification::assign_new_token(db.get_ref(), prof.id).await?;

    if let Err(err) =
        verification::send_verification_email(mailer.get_ref(), config.get_ref(), &acc.email, &token)
    {
        error!("failed to resend verification email to {}", acc.email);
        return Err(err);
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "Verification email resent" })))
}

async fn login(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let password = payload.password.clone().unwrap_or_default();
    if password.is_empty() {
        return Err(AppError::DetailBadRequest("Password is required.".to_string()));
    }

    let acc = if let Some(email) = payload.email.as_deref().filter(|e| !e.trim().is_empty()) {
        account::Entity::find()
            .filter(account::Column::Email.eq(email))
            .one(db.get_ref())
            .await?
            .ok_or_else(|| {
                AppError::DetailNotFound("No user found with this email address.".to_string())
            })?
    } else if let Some(username) = payload.username.as_deref().filter(|u| !u.trim().is_empty()) {
        account::Entity::find()
            .filter(account::Column::Username.eq(username))
            .one(db.get_ref())
            .await?
            .ok_or_else(|| {
                warn!("failed login attempt: username {} not found", username);
                AppError::invalid_credentials()
            })?
    } else {
        return Err(AppError::DetailBadRequest(
            "Either username or email must be provided.".to_string(),
        ));
    };

    let prof = profile::Entity::find()
        .filter(profile::Column::AccountId.eq(acc.id))
        .one(db.get_ref())
        .await?
        .ok_or(AppError::Internal)?;

    // surfaced before the password check so the client can prompt a resend
    if prof.is_email_verified != 1 {
        warn!("failed login attempt for {}: email not verified", acc.username);
        return Err(AppError::EmailNotVerified);
    }

    let ok = verify(&password, &acc.password_hash).map_err(|_| AppError::Internal)?;
    if !ok {
        warn!("failed login attempt for {}: bad password", acc.username);
        return Err(AppError::invalid_credentials());
    }

    let access = issue_access_token(config.get_ref(), &acc)?;
    let refresh = issue_refresh_token(config.get_ref(), &acc)?;
    Ok(HttpResponse::Ok().json(json!({ "access": access, "refresh": refresh })))
}

async fn get_profile(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let (acc, prof) = load_account_profile(db.get_ref(), auth.account_id).await?;
    Ok(HttpResponse::Ok().json(to_profile_dto(acc, prof)))
}

async fn patch_profile(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<ProfileUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let (acc, prof) = load_account_profile(db.get_ref(), auth.account_id).await?;

    let mut errors = FieldErrors::new();
    if payload.nim.is_some() {
        push_error(&mut errors, "nim", "NIM is immutable.");
    }
    if let Some(ref full_name) = payload.full_name {
        if full_name.trim().is_empty() {
            push_error(&mut errors, "full_name", "This field may not be blank.");
        } else if full_name.len() > 100 {
            push_error(&mut errors, "full_name", "Ensure this field has no more than 100 characters.");
        }
    }
    if let Some(ref jurusan) = payload.jurusan {
        if jurusan.trim().is_empty() {
            push_error(&mut errors, "jurusan", "This field may not be blank.");
        } else if jurusan.len() > 100 {
            push_error(&mut errors, "jurusan", "Ensure this field has no more than 100 characters.");
        }
    }
    if let Some(angkatan) = payload.angkatan {
        if !(2000..=2100).contains(&angkatan) {
            push_error(&mut errors, "angkatan", "Angkatan must be between 2000 and 2100.");
        }
    }
    if let Some(ref phone) = payload.phone_number {
        if !phone.is_empty() && !PHONE_RE.is_match(phone) {
            push_error(&mut errors, "phone_number", "Invalid phone number format.");
        }
    }
    if !errors.is_empty() {
        warn!("profile update failed for user {}: invalid fields", auth.username);
        return Err(AppError::Validation(errors));
    }

    let mut active = profile::ActiveModel {
        id: Set(prof.id),
        ..Default::default()
    };
    active.updated = Set(Some(Utc::now()));
    if let Some(v) = payload.full_name.clone() {
        active.full_name = Set(v);
    }
    if let Some(v) = payload.jurusan.clone() {
        active.jurusan = Set(v);
    }
    if let Some(v) = payload.angkatan {
        active.angkatan = Set(v);
    }
    if let Some(v) = payload.phone_number.clone() {
        active.phone_number = Set(if v.is_empty() { None } else { Some(v) });
    }
    profile::Entity::update(active).exec(db.get_ref()).await?;

    let updated = profile::Entity::find_by_id(prof.id)
        .one(db.get_ref())
        .await?
        .ok_or(AppError::Internal)?;
    Ok(HttpResponse::Ok().json(to_profile_dto(acc, updated)))
}

async fn load_account_profile(
    db: &DatabaseConnection,
    account_id: i32,
) -> Result<(account::Model, profile::Model), AppError> {
    let acc = account::Entity::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or_else(AppError::invalid_credentials)?;
    let prof = profile::Entity::find()
        .filter(profile::Column::AccountId.eq(account_id))
        .one(db)
        .await?
        .ok_or(AppError::Internal)?;
    Ok((acc, prof))
}

fn to_profile_dto(acc: account::Model, prof: profile::Model) -> ProfileDto {
    ProfileDto {
        user: UserDto {
            id: acc.id,
            username: acc.username,
            email: acc.email,
        },
        phone_number: prof.phone_number,
        full_name: prof.full_name,
        nim: prof.nim,
        jurusan: prof.jurusan,
        angkatan: prof.angkatan,
        is_email_verified: prof.is_email_verified == 1,
    }
}
