use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::content_filter;
use crate::entity::{account, comment, post};
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/{id}/")
            .route(web::patch().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize)]
struct CommentCreateRequest {
    post: Option<i32>,
    content: Option<String>,
}

#[derive(Deserialize)]
struct CommentUpdateRequest {
    content: Option<String>,
}

#[derive(Serialize)]
struct CommentDto {
    id: i32,
    post: i32,
    user: String,
    content: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

async fn list(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let comments = comment::Entity::find()
        .order_by_desc(comment::Column::Created)
        .all(db.get_ref())
        .await?;

    let ids: Vec<i32> = comments.iter().map(|c| c.account_id).collect();
    let usernames = username_map(db.get_ref(), ids).await?;
    let list: Vec<CommentDto> = comments
        .into_iter()
        .map(|c| to_comment_dto(c, &usernames))
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<CommentCreateRequest>,
) -> Result<HttpResponse, AppError> {
    let post_id = payload
        .post
        .ok_or_else(|| AppError::field_error("post", "This field is required."))?;
    post::Entity::find_by_id(post_id)
        .one(db.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;

    let content = payload
        .content
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::field_error("content", "This field is required."))?;
    content_filter::check(&content)?;

    let now = Utc::now();
    let created = comment::ActiveModel {
        post_id: Set(post_id),
        account_id: Set(auth.account_id),
        content: Set(content),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(CommentDto {
        id: created.id,
        post: created.post_id,
        user: auth.username,
        content: created.content,
        created_at: created.created.map(to_rfc3339),
        updated_at: created.updated.map(to_rfc3339),
    }))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<CommentUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let found = find_comment(db.get_ref(), *path).await?;
    require_author(&found, &auth)?;

    let mut active = comment::ActiveModel {
        id: Set(found.id),
        ..Default::default()
    };
    active.updated = Set(Some(Utc::now()));
    if let Some(content) = payload.content.clone() {
        content_filter::check(&content)?;
        active.content = Set(content);
    }
    comment::Entity::update(active).exec(db.get_ref()).await?;

    let updated = find_comment(db.get_ref(), found.id).await?;
    Ok(HttpResponse::Ok().json(CommentDto {
        id: updated.id,
        post: updated.post_id,
        user: auth.username,
        content: updated.content,
        created_at: updated.created.map(to_rfc3339),
        updated_at: updated.updated.map(to_rfc3339),
    }))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = find_comment(db.get_ref(), *path).await?;
    require_author(&found, &auth)?;

    comment::Entity::delete_by_id(found.id)
        .exec(db.get_ref())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn find_comment(db: &DatabaseConnection, id: i32) -> Result<comment::Model, AppError> {
    comment::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))
}

fn require_author(found: &comment::Model, auth: &AuthUser) -> Result<(), AppError> {
    if found.account_id != auth.account_id {
        return Err(AppError::forbidden(
            "You do not have permission to perform this action.",
        ));
    }
    Ok(())
}

async fn username_map(
    db: &DatabaseConnection,
    ids: Vec<i32>,
) -> Result<HashMap<i32, String>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let accounts = account::Entity::find()
        .filter(account::Column::Id.is_in(ids))
        .all(db)
        .await?;
    Ok(accounts.into_iter().map(|a| (a.id, a.username)).collect())
}

fn to_comment_dto(c: comment::Model, usernames: &HashMap<i32, String>) -> CommentDto {
    CommentDto {
        id: c.id,
        post: c.post_id,
        user: usernames.get(&c.account_id).cloned().unwrap_or_default(),
        content: c.content,
        created_at: c.created.map(to_rfc3339),
        updated_at: c.updated.map(to_rfc3339),
    }
}

fn to_rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}
