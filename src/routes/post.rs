use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::content_filter;
use crate::entity::{account, comment, post, reaction};
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
            .route(web::get().to(retrieve))
            .route(web::patch().to(update))
            .route(web::delete().to(remove)),
    )
    .service(web::resource("/{id}/comments/").route(web::get().to(post_comments)))
    .service(web::resource("/{id}/reactions/").route(web::get().to(post_reactions)));
}

#[derive(Deserialize)]
struct PostCreateRequest {
    content: Option<String>,
    image: Option<String>,
}

#[derive(Deserialize)]
struct PostUpdateRequest {
    content: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
struct PostDto {
    id: i32,
    user: String,
    content: String,
    image: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
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

#[derive(Serialize)]
struct ReactionDto {
    id: i32,
    post: i32,
    user: String,
    reaction_type: String,
    created_at: Option<String>,
}

async fn list(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let posts = post::Entity::find()
        .order_by_desc(post::Column::Created)
        .all(db.get_ref())
        .await?;

    let usernames = username_map(db.get_ref(), posts.iter().map(|p| p.account_id)).await?;
    let list: Vec<PostDto> = posts
        .into_iter()
        .map(|p| to_post_dto(p, &usernames))
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<PostCreateRequest>,
) -> Result<HttpResponse, AppError> {
    let content = payload
        .content
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::field_error("content", "This field is required."))?;
    content_filter::check(&content)?;

    let now = Utc::now();
    let created = post::ActiveModel {
        account_id: Set(auth.account_id),
        content: Set(content),
        image_url: Set(payload.image.clone()),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(PostDto {
        id: created.id,
        user: auth.username,
        content: created.content,
        image: created.image_url,
        created_at: created.created.map(to_rfc3339),
        updated_at: created.updated.map(to_rfc3339),
    }))
}

async fn retrieve(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = find_post(db.get_ref(), *path).await?;
    let usernames = username_map(db.get_ref(), std::iter::once(found.account_id)).await?;
    Ok(HttpResponse::Ok().json(to_post_dto(found, &usernames)))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<PostUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let found = find_post(db.get_ref(), *path).await?;
    require_author(&found, &auth)?;

    let mut active = post::ActiveModel {
        id: Set(found.id),
        ..Default::default()
    };
    active.updated = Set(Some(Utc::now()));
    if let Some(content) = payload.content.clone() {
        content_filter::check(&content)?;
        active.content = Set(content);
    }
    if let Some(image) = payload.image.clone() {
        active.image_url = Set(Some(image));
    }
    post::Entity::update(active).exec(db.get_ref()).await?;

    let updated = find_post(db.get_ref(), found.id).await?;
    Ok(HttpResponse::Ok().json(PostDto {
        id: updated.id,
        user: auth.username,
        content: updated.content,
        image: updated.image_url,
        created_at: updated.created.map(to_rfc3339),
        updated_at: updated.updated.map(to_rfc3339),
    }))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = find_post(db.get_ref(), *path).await?;
    require_author(&found, &auth)?;

    post::Entity::delete_by_id(found.id)
        .exec(db.get_ref())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn post_comments(
    db: web::Data<DatabaseConnection>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = find_post(db.get_ref(), *path).await?;
    let comments = comment::Entity::find()
        .filter(comment::Column::PostId.eq(found.id))
        .order_by_desc(comment::Column::Created)
        .all(db.get_ref())
        .await?;

    let usernames = username_map(db.get_ref(), comments.iter().map(|c| c.account_id)).await?;
    let list: Vec<CommentDto> = comments
        .into_iter()
        .map(|c| CommentDto {
            id: c.id,
            post: c.post_id,
            user: username_of(&usernames, c.account_id),
            content: c.content,
            created_at: c.created.map(to_rfc3339),
            updated_at: c.updated.map(to_rfc3339),
        })
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn post_reactions(
    db: web::Data<DatabaseConnection>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = find_post(db.get_ref(), *path).await?;
    let reactions = reaction::Entity::find()
        .filter(reaction::Column::PostId.eq(found.id))
        .all(db.get_ref())
        .await?;

    let usernames = username_map(db.get_ref(), reactions.iter().map(|r| r.account_id)).await?;
    let list: Vec<ReactionDto> = reactions
        .into_iter()
        .map(|r| ReactionDto {
            id: r.id,
            post: r.post_id,
            user: username_of(&usernames, r.account_id),
            reaction_type: r.reaction_type,
            created_at: r.created.map(to_rfc3339),
        })
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn find_post(db: &DatabaseConnection, id: i32) -> Result<post::Model, AppError> {
    post::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))
}

fn require_author(found: &post::Model, auth: &AuthUser) -> Result<(), AppError> {
    if found.account_id != auth.account_id {
        return Err(AppError::forbidden(
            "You do not have permission to perform this action.",
        ));
    }
    Ok(())
}

async fn username_map(
    db: &DatabaseConnection,
    ids: impl Iterator<Item = i32>,
) -> Result<HashMap<i32, String>, AppError> {
    let ids: Vec<i32> = ids.collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let accounts = account::Entity::find()
        .filter(account::Column::Id.is_in(ids))
        .all(db)
        .await?;
    Ok(accounts.into_iter().map(|a| (a.id, a.username)).collect())
}

fn username_of(map: &HashMap<i32, String>, id: i32) -> String {
    map.get(&id).cloned().unwrap_or_default()
}

fn to_post_dto(p: post::Model, usernames: &HashMap<i32, String>) -> PostDto {
    PostDto {
        id: p.id,
        user: username_of(usernames, p.account_id),
        content: p.content,
        image: p.image_url,
        created_at: p.created.map(to_rfc3339),
        updated_at: p.updated.map(to_rfc3339),
    }
}

fn to_rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}
