use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Transient progress of one account through a multi-step interactive flow.
/// Maps to the `conversation_states` table, one row per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ConversationState {
    pub account_id: i64,
    /// Which step of which flow the account is in, e.g. `"awaiting_amount"`
    pub state_tag: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        account_id: i64,
        state_tag: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            account_id,
            state_tag: state_tag.into(),
            payload,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Expired entries are absent from the moment `expires_at` is reached
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let state = ConversationState::new(7, "awaiting_amount", json!({}), now, Duration::minutes(1));

        assert!(!state.is_expired_at(now));
        assert!(!state.is_expired_at(now + Duration::seconds(59)));
        assert!(state.is_expired_at(now + Duration::seconds(60)));
        assert!(state.is_expired_at(now + Duration::seconds(61)));
    }

    #[test]
    fn test_remaining_lifetime() {
        let now = Utc::now();
        let state = ConversationState::new(7, "awaiting_amount", json!({"token": "abc"}), now, Duration::minutes(10));

        assert_eq!(
            state.remaining_at(now + Duration::minutes(4)),
            Some(std::time::Duration::from_secs(360))
        );
        assert_eq!(state.remaining_at(now + Duration::minutes(10)), None);
        assert_eq!(state.remaining_at(now + Duration::minutes(11)), None);
    }
}
