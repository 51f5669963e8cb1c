use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use log::warn;
use rand::RngCore;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Statement};

use crate::config::AppConfig;
use crate::entity::{account, profile};
use crate::error::AppError;
use crate::mailer::Mailer;

/// Opaque single-use verification token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn verification_link(config: &AppConfig, token: &str, email: &str) -> String {
    format!("{}?token={}&email={}", config.verification_base_url, token, email)
}

pub fn send_verification_email(
    mailer: &dyn Mailer,
    config: &AppConfig,
    email: &str,
    token: &str,
) -> Result<(), AppError> {
    let link = verification_link(config, token, email);
    mailer.send(
        email,
        "Verify Your Email",
        &format!("Click the link to verify your email: {}", link),
    )
}

pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

/// Consumes a verification token. The clear happens in one compare-and-set
/// UPDATE keyed on the token value, so two concurrent requests cannot both
/// consume it; the loser falls through to the idempotent branch.
///
/// A consumed token no longer matches any profile. The mailed link also
/// carries the address, so `email_hint` lets a re-click of an already-used
/// link resolve to its verified account instead of failing.
pub async fn consume_token(
    db: &DatabaseConnection,
    token: &str,
    email_hint: Option<&str>,
) -> Result<VerifyOutcome, AppError> {
    let matched = profile::Entity::find()
        .filter(profile::Column::EmailVerificationToken.eq(token))
        .one(db)
        .await?;

    if let Some(found) = matched {
        if found.is_email_verified == 1 {
            return Ok(VerifyOutcome::AlreadyVerified);
        }

        let backend = db.get_database_backend();
        let stmt = Statement::from_sql_and_values(
            backend,
            "update t_profile set is_email_verified = 1, email_verification_token = null, updated = ? where email_verification_token = ?",
            vec![Utc::now().into(), token.into()],
        );
        let result = db.execute(stmt).await?;
        if result.rows_affected() > 0 {
            return Ok(VerifyOutcome::Verified);
        }
        // lost a concurrent consume; resolve like a re-clicked link
    }

    if let Some(email) = email_hint {
        if let Some(acc) = account::Entity::find()
            .filter(account::Column::Email.eq(email))
            .one(db)
            .await?
        {
            let existing = profile::Entity::find()
                .filter(profile::Column::AccountId.eq(acc.id))
                .one(db)
                .await?;
            if existing.map(|p| p.is_email_verified == 1).unwrap_or(false) {
                return Ok(VerifyOutcome::AlreadyVerified);
            }
        }
    }

    warn!("invalid email verification token: {}", token);
    Err(AppError::InvalidToken)
}

/// Overwrites the stored token with a fresh one; the previous token becomes
/// invalid the moment this commits since the column holds a single value.
pub async fn assign_new_token(
    db: &DatabaseConnection,
    profile_id: i32,
) -> Result<String, AppError> {
    let token = generate_token();
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(
        backend,
        "update t_profile set email_verification_token = ?, updated = ? where id = ?",
        vec![token.clone().into(), Utc::now().into(), profile_id.into()],
    );
    db.execute(stmt).await?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_opaque_and_url_safe() {
        let token = generate_token();
        // 32 bytes -> 43 chars of unpadded base64
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_token()));
        }
    }

    #[test]
    fn link_embeds_token_and_email() {
        let mut config = crate::config::AppConfig::from_env();
        config.verification_base_url = "http://localhost:3000/verify-email".to_string();
        let link = verification_link(&config, "tok123", "a@b.io");
        assert_eq!(link, "http://localhost:3000/verify-email?token=tok123&email=a@b.io");
    }
}
