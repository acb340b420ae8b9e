//! Weak ETag for the friend connections list.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::FriendConnection;

/// `W/"friends-connections-{user}-{millis}-{digest}"`.
///
/// `millis` is the newest timestamp seen across the friendship rows and the
/// listed users; `digest` covers the serialized list.
pub fn connections_etag(
    user_id: Uuid,
    connections: &[FriendConnection],
    latest_update: Option<DateTime<Utc>>,
) -> String {
    let newest = connections
        .iter()
        .flat_map(|c| {
            [
                c.created_at,
                c.updated_at,
                c.user.avatar_updated_at,
                c.user.updated_at,
            ]
        })
        .flatten()
        .chain(latest_update)
        .max()
        .map_or(0, |ts| ts.timestamp_millis());

    let mut hasher = Sha256::new();
    for c in connections {
        hasher.update(c.user.id.as_bytes());
        hasher.update(c.user.username.as_bytes());
        hasher.update(c.user.display_name.as_deref().unwrap_or_default().as_bytes());
        hasher.update(c.user.avatar_path.as_deref().unwrap_or_default().as_bytes());
        hasher.update([c.status as u8]);
        if let Some(request_id) = c.request_id {
            hasher.update(request_id.as_bytes());
        }
    }
    let digest = hex::encode(&hasher.finalize()[..8]);

    format!("W/\"friends-connections-{user_id}-{newest}-{digest}\"")
}
