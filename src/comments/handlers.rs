use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{extractors::AuthUser, identity::authorize},
    error::{non_empty, AppError},
    posts::{handlers::author_gone, repo::Post},
    state::AppState,
};

use super::{
    dto::{CommentDeleted, CommentRequest},
    repo::Comment,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/posts/:id/comments", post(create_comment))
        .route("/comments/:id", put(update_comment).delete(delete_comment))
}

#[instrument(skip(state, payload))]
pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(post_id): Path<i64>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let content = non_empty("content", &payload.content)?;
    if Post::find(&state.db, post_id).await?.is_none() {
        return Err(AppError::NotFound("Post"));
    }

    let comment = Comment::create(&state.db, post_id, identity.user_id, &content)
        .await
        .map_err(missing_parent)?;

    info!(comment_id = comment.id, post_id, user_id = identity.user_id, "comment added");
    Ok((StatusCode::CREATED, Json(comment)))
}

/// Looks the comment up by its own id, then checks its author.
#[instrument(skip(state, payload))]
pub async fn update_comment(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let existing = Comment::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Comment"))?;
    authorize(&identity, existing.user_id)?;

    let content = non_empty("content", &payload.content)?;
    let comment = Comment::update(&state.db, id, &content)
        .await?
        .ok_or(AppError::NotFound("Comment"))?;

    info!(comment_id = id, post_id = comment.post_id, "comment updated");
    Ok(Json(comment))
}

#[instrument(skip(state))]
pub async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<CommentDeleted>, AppError> {
    let existing = Comment::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Comment"))?;
    authorize(&identity, existing.user_id)?;

    if !Comment::delete(&state.db, id).await? {
        return Err(AppError::NotFound("Comment"));
    }

    info!(comment_id = id, post_id = existing.post_id, "comment deleted");
    Ok(Json(CommentDeleted {
        id,
        post_id: existing.post_id,
    }))
}

/// The post can vanish between the existence check and the insert.
fn missing_parent(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_foreign_key_violation()
            && db_err.constraint().is_some_and(|c| c.contains("post_id"))
        {
            return AppError::NotFound("Post");
        }
    }
    author_gone(e)
}
