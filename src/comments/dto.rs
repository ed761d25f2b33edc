use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

/// Returned after a comment is removed so the client can go back to its post.
#[derive(Debug, Serialize)]
pub struct CommentDeleted {
    pub id: i64,
    pub post_id: i64,
}
