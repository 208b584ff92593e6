//! Read-only views of the identity and library tables shared with the rest of
//! the platform.

use super::records::{ContentMetadataRecord, UserRecord};
use super::*;
use async_trait::async_trait;
use forum_core::ports::{ContentMetadataService, UserDirectory};

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_user(&self, user_id: u64) -> PortResult<UserProfile> {
        sqlx::query_as::<_, UserRecord>("SELECT id, handle, created_at FROM forum_users WHERE id = $1")
            .bind(db_id(user_id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("user {user_id}")))
            .map(UserRecord::to_domain)
    }

    async fn find_by_handles(&self, handles: &[String]) -> PortResult<Vec<UserProfile>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = handles.iter().map(|h| h.to_lowercase()).collect();
        let rows = sqlx::query_as::<_, UserRecord>(
            "SELECT id, handle, created_at FROM forum_users WHERE lower(handle) = ANY($1) ORDER BY id",
        )
        .bind(&lowered)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("users"))?;
        Ok(rows.into_iter().map(UserRecord::to_domain).collect())
    }
}

#[async_trait]
impl ContentMetadataService for PgStore {
    async fn get_content_metadata(&self, kind: ContentKind, id: u64) -> PortResult<ContentMetadata> {
        sqlx::query_as::<_, ContentMetadataRecord>(
            "SELECT title, summary, owner_id, tags FROM library_content WHERE kind = $1 AND id = $2",
        )
        .bind(kind.as_str())
        .bind(db_id(id))
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("{kind} {id}")))
        .map(ContentMetadataRecord::to_domain)
    }
}
