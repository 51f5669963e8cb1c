use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use log::warn;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::entity::{post, reaction};
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(create)))
        .service(web::resource("/").route(web::post().to(create)));
}

#[derive(Deserialize)]
struct ReactionRequest {
    post: Option<i32>,
    reaction_type: Option<String>,
}

#[derive(Serialize)]
struct ReactionDto {
    id: i32,
    post: i32,
    user: String,
    reaction_type: String,
    created_at: Option<String>,
}

enum Outcome {
    Created(reaction::Model),
    Removed(String),
    Updated(String),
}

/// Per (post, account) the stored reaction moves between absent and set:
/// absent + submit(R) creates it, same R again removes it, a different R
/// replaces it in place. The whole read-then-act sequence runs in one
/// transaction, and a lost first-insert race collapses onto the
/// toggle/replace path instead of surfacing the UNIQUE violation.
async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<ReactionRequest>,
) -> Result<HttpResponse, AppError> {
    let post_id = payload
        .post
        .ok_or_else(|| AppError::field_error("post", "This field is required."))?;
    let reaction_type = payload
        .reaction_type
        .clone()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::field_error("reaction_type", "This field is required."))?;

    let account_id = auth.account_id;
    let username = auth.username.clone();
    let submitted = reaction_type.clone();

    let outcome = db
        .transaction::<_, Outcome, AppError>(move |txn| {
            Box::pin(async move {
                let target = post::Entity::find_by_id(post_id).one(txn).await?;
                if target.is_none() {
                    warn!("post {} not found for reaction by user {}", post_id, username);
                    return Err(AppError::not_found("Post not found"));
                }

                let mut retried = false;
                loop {
                    let existing = reaction::Entity::find()
                        .filter(reaction::Column::PostId.eq(post_id))
                        .filter(reaction::Column::AccountId.eq(account_id))
                        .one(txn)
                        .await?;

                    match existing {
                        Some(current) if current.reaction_type == submitted => {
                            reaction::Entity::delete_by_id(current.id).exec(txn).await?;
                            return Ok(Outcome::Removed(submitted));
                        }
                        Some(current) => {
                            let mut active = reaction::ActiveModel {
                                id: Set(current.id),
                                ..Default::default()
                            };
                            active.reaction_type = Set(submitted.clone());
                            active.updated = Set(Some(Utc::now()));
                            reaction::Entity::update(active).exec(txn).await?;
                            return Ok(Outcome::Updated(submitted));
                        }
                        None => {
                            let now = Utc::now();
                            let insert = reaction::ActiveModel {
                                post_id: Set(post_id),
                                account_id: Set(account_id),
                                reaction_type: Set(submitted.clone()),
                                created: Set(Some(now)),
                                updated: Set(Some(now)),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await;

                            match insert {
                                Ok(model) => return Ok(Outcome::Created(model)),
                                Err(err) => {
                                    let msg = err.to_string();
                                    let conflict =
                                        msg.contains("UNIQUE") || msg.contains("Duplicate");
                                    // a concurrent request created the row first;
                                    // re-read and take the toggle/replace branch
                                    if conflict && !retried {
                                        retried = true;
                                        continue;
                                    }
                                    return Err(err.into());
                                }
                            }
                        }
                    }
                }
            })
        })
        .await
        .map_err(AppError::from)?;

    match outcome {
        Outcome::Created(model) => Ok(HttpResponse::Created().json(ReactionDto {
            id: model.id,
            post: model.post_id,
            user: auth.username,
            reaction_type: model.reaction_type,
            created_at: model.created.map(to_rfc3339),
        })),
        Outcome::Removed(t) => {
            Ok(HttpResponse::Ok().json(json!({ "message": format!("{} removed", t) })))
        }
        Outcome::Updated(t) => {
            Ok(HttpResponse::Ok().json(json!({ "message": format!("Reaction updated to {}", t) })))
        }
    }
}

fn to_rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}
