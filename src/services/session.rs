//! Server-side login sessions stored in Redis.

use redis::AsyncCommands;
use uuid::Uuid;

use crate::errors::AppError;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "vulntrack_session";

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn store_error(e: redis::RedisError) -> AppError {
    AppError::Internal(format!("Session store error: {e}"))
}

/// Open a session for `user_id`, returning the opaque session id.
pub async fn create(client: &redis::Client, user_id: Uuid, ttl_secs: u64) -> Result<String, AppError> {
    let session_id = Uuid::new_v4().simple().to_string();
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(store_error)?;
    conn.set_ex::<_, _, ()>(session_key(&session_id), user_id.to_string(), ttl_secs)
        .await
        .map_err(store_error)?;

    tracing::debug!(user_id = %user_id, "Session created");
    Ok(session_id)
}

/// Resolve a session id to its user, `None` when expired or unknown.
pub async fn lookup(client: &redis::Client, session_id: &str) -> Result<Option<Uuid>, AppError> {
    if !is_well_formed(session_id) {
        return Ok(None);
    }
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(store_error)?;
    let value: Option<String> = conn
        .get(session_key(session_id))
        .await
        .map_err(store_error)?;
    Ok(value.and_then(|v| v.parse().ok()))
}

pub async fn destroy(client: &redis::Client, session_id: &str) -> Result<(), AppError> {
    if !is_well_formed(session_id) {
        return Ok(());
    }
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(store_error)?;
    conn.del::<_, ()>(session_key(session_id))
        .await
        .map_err(store_error)?;
    Ok(())
}

fn is_well_formed(session_id: &str) -> bool {
    session_id.len() == 32 && session_id.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(session_key("abc"), "session:abc");
    }

    #[test]
    fn session_ids_are_validated() {
        assert!(is_well_formed(&Uuid::new_v4().simple().to_string()));
        assert!(!is_well_formed("session:*"));
        assert!(!is_well_formed(""));
    }
}
