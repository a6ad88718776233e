//! Authorization seam
//!
//! Read access is decided by an injected policy before any report is
//! generated. The engine only needs to expose the subject id early enough
//! for the check to happen; the policy internals live elsewhere.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Whether `user` (None = anonymous) may read reports for the subject
    async fn can_read(&self, user: Option<&str>, subject_id: Uuid) -> bool;
}

/// Policy that admits every request; deployments plug in their own.
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn can_read(&self, _user: Option<&str>, _subject_id: Uuid) -> bool {
        true
    }
}

/// Opaque caller identity from the Authorization bearer token
pub fn bearer_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}
