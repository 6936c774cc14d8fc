//! Public blog reads and platform-admin post management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use propdesk_core::{BlogPost, NewPost, Paged, Pagination, PostStatus, UpdatePost, Validate};

use super::record;
use crate::auth::AdminUser;
use crate::{ApiResult, AppState};

pub async fn list_published(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Paged<BlogPost>>> {
    Ok(Json(state.store.list_published_posts(page).await?))
}

/// Drafts are indistinguishable from missing posts here.
pub async fn get_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<BlogPost>> {
    Ok(Json(state.store.get_published_post_by_slug(&slug).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
}

pub async fn list(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PostQuery>,
) -> ApiResult<Json<Vec<BlogPost>>> {
    Ok(Json(state.store.list_posts(query.status).await?))
}

pub async fn create(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(input): Json<NewPost>,
) -> ApiResult<(StatusCode, Json<BlogPost>)> {
    input.validate()?;
    let post = state.store.create_post(Some(admin.user.id), &input).await?;
    record(
        &state,
        admin
            .audit("blog.create", "blog_post")
            .subject(post.id)
            .metadata(json!({ "slug": post.slug })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdatePost>,
) -> ApiResult<Json<BlogPost>> {
    input.validate()?;
    let post = state.store.update_post(id, &input).await?;
    record(&state, admin.audit("blog.update", "blog_post").subject(id)).await;
    Ok(Json(post))
}

pub async fn delete(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let post = state.store.get_post(id).await?;
    state.store.delete_post(id).await?;
    record(
        &state,
        admin
            .audit("blog.delete", "blog_post")
            .subject(id)
            .metadata(json!({ "slug": post.slug })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BlogPost>> {
    let post = state.store.publish_post(id).await?;
    record(&state, admin.audit("blog.publish", "blog_post").subject(id)).await;
    Ok(Json(post))
}

pub async fn unpublish(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BlogPost>> {
    let post = state.store.unpublish_post(id).await?;
    record(&state, admin.audit("blog.unpublish", "blog_post").subject(id)).await;
    Ok(Json(post))
}
