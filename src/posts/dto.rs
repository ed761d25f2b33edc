use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::comments::repo::CommentWithAuthor;

use super::{markup, repo::PostWithAuthor};

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostDetails {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub content_html: String,
    pub nickname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub comments: Vec<CommentWithAuthor>,
}

impl PostDetails {
    pub fn new(post: PostWithAuthor, comments: Vec<CommentWithAuthor>) -> Self {
        Self {
            content_html: markup::render(&post.content),
            id: post.id,
            user_id: post.user_id,
            title: post.title,
            content: post.content,
            nickname: post.nickname,
            created_at: post.created_at,
            comments,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    20
}

impl Pagination {
    /// `(limit, offset)` clamped to sane bounds.
    pub fn bounds(&self) -> (i64, i64) {
        (self.limit.clamp(1, MAX_PAGE_SIZE), self.offset.max(0))
    }
}
