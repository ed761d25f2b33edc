use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Row for the post index: no body, author nickname joined in.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PostSummary {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub nickname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct PostWithAuthor {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub nickname: String,
    pub created_at: OffsetDateTime,
}

impl Post {
    /// Returns the raw sqlx error so callers can spot a vanished author.
    pub async fn create(
        db: &PgPool,
        user_id: i64,
        title: &str,
        content: &str,
    ) -> Result<Post, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (user_id, title, content)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, title, content, created_at
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(content)
        .fetch_one(db)
        .await
    }

    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<PostSummary>> {
        let rows = sqlx::query_as::<_, PostSummary>(
            r#"
            SELECT p.id, p.user_id, p.title, u.nickname, p.created_at
              FROM posts p
              JOIN users u ON u.id = p.user_id
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
        .context("list posts")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, user_id, title, content, created_at
              FROM posts
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find post")?;
        Ok(post)
    }

    pub async fn find_with_author(db: &PgPool, id: i64) -> anyhow::Result<Option<PostWithAuthor>> {
        let post = sqlx::query_as::<_, PostWithAuthor>(
            r#"
            SELECT p.id, p.user_id, p.title, p.content, u.nickname, p.created_at
              FROM posts p
              JOIN users u ON u.id = p.user_id
             WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find post with author")?;
        Ok(post)
    }

    pub async fn update(
        db: &PgPool,
        id: i64,
        title: &str,
        content: &str,
    ) -> anyhow::Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts
               SET title = $2, content = $3
             WHERE id = $1
            RETURNING id, user_id, title, content, created_at
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(content)
        .fetch_optional(db)
        .await
        .context("update post")?;
        Ok(post)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete post")?;
        Ok(res.rows_affected() > 0)
    }
}
