use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{extractors::AuthUser, identity::authorize},
    comments::repo::Comment,
    error::{non_empty, AppError},
    state::AppState,
};

use super::{
    dto::{Pagination, PostDetails, PostRequest},
    repo::{Post, PostSummary},
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:id", get(get_post))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", axum::routing::post(create_post))
        .route(
            "/posts/:id",
            axum::routing::put(update_post).delete(delete_post),
        )
}

#[instrument(skip(state))]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PostSummary>>, AppError> {
    let (limit, offset) = p.bounds();
    let posts = Post::list(&state.db, limit, offset).await?;
    Ok(Json(posts))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PostDetails>, AppError> {
    let post = Post::find_with_author(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Post"))?;
    let comments = Comment::list_for_post(&state.db, id).await?;
    Ok(Json(PostDetails::new(post, comments)))
}

#[instrument(skip(state, payload))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<PostRequest>,
) -> Result<(StatusCode, HeaderMap, Json<Post>), AppError> {
    let title = non_empty("title", &payload.title)?;
    let content = non_empty("content", &payload.content)?;

    let post = Post::create(&state.db, identity.user_id, &title, &content)
        .await
        .map_err(author_gone)?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/posts/{}", post.id)) {
        headers.insert(header::LOCATION, location);
    }

    info!(post_id = post.id, user_id = identity.user_id, "post created");
    Ok((StatusCode::CREATED, headers, Json(post)))
}

#[instrument(skip(state, payload))]
pub async fn update_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<PostRequest>,
) -> Result<Json<Post>, AppError> {
    let existing = Post::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Post"))?;
    authorize(&identity, existing.user_id)?;

    let title = non_empty("title", &payload.title)?;
    let content = non_empty("content", &payload.content)?;
    let post = Post::update(&state.db, id, &title, &content)
        .await?
        .ok_or(AppError::NotFound("Post"))?;

    info!(post_id = id, user_id = identity.user_id, "post updated");
    Ok(Json(post))
}

#[instrument(skip(state))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let existing = Post::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Post"))?;
    authorize(&identity, existing.user_id)?;

    if !Post::delete(&state.db, id).await? {
        return Err(AppError::NotFound("Post"));
    }
    info!(post_id = id, user_id = identity.user_id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// A foreign-key failure on insert means the caller's account was deleted
/// while their token was still live.
pub(crate) fn author_gone(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            warn!(error = %db_err, "insert referenced a missing row");
            AppError::Unauthorized("Account no longer exists".into())
        }
        other => AppError::from(other),
    }
}
