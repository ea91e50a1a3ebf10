use std::time::Duration;

use chrono::Utc;

use crate::auth::model::{Session, SessionUser};
use crate::platform::runtime;

/// Unexpired session for `user_id`; the refresh token is derived from `access_token`.
pub fn sample_session(user_id: &str, access_token: &str) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: format!("refresh-for-{access_token}"),
        token_type: "bearer".to_string(),
        expires_at: Some(Utc::now().timestamp() + 3600),
        user: SessionUser {
            id: user_id.to_string(),
            email: None,
            user_metadata: serde_json::Value::Null,
        },
    }
}

/// Polls `condition` for up to a second so detached tasks get a chance to run.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        runtime::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
