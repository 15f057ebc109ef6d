//! Single-use codes that bind a user account to a notification channel.
//!
//! The user requests a code through the API, then sends it to the bot from
//! the chat that should receive alerts.

use std::sync::Arc;

use chrono::{Duration, Utc};
use skyguard_database::{DbError, Storage};
use skyguard_database_models::{
    LinkCodeRow, ProfileChange, ProfileFilter, ProfileUpdate, WriteBatch,
};

/// Number of characters in a link code.
pub const LINK_CODE_LEN: usize = 8;

/// Minutes a link code stays valid.
pub const LINK_CODE_TTL_MINUTES: i64 = 10;

/// Generates a fresh upper-case hexadecimal code.
#[must_use]
pub fn generate_code() -> String {
    let mut code = uuid::Uuid::new_v4().simple().to_string();
    code.truncate(LINK_CODE_LEN);
    code.to_uppercase()
}

/// Issues and consumes link codes.
#[derive(Clone)]
pub struct LinkCodes {
    storage: Arc<dyn Storage>,
}

impl LinkCodes {
    /// Creates a link code manager over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Issues a new code for `user_id`, invalidating any earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn create_link_code(&self, user_id: i64) -> Result<LinkCodeRow, DbError> {
        let now = Utc::now();
        let code = LinkCodeRow {
            code: generate_code(),
            user_id,
            created_at: now,
            expires_at: now + Duration::minutes(LINK_CODE_TTL_MINUTES),
            used: false,
        };

        self.storage.replace_link_code(&code).await?;
        log::info!("Issued link code for user {user_id}");

        Ok(code)
    }

    /// Consumes `code` on behalf of `channel_id`.
    ///
    /// On success the owner's profile is bound to the channel with
    /// notifications enabled, the code is marked used and the owner's user
    /// id is returned. Unknown, used and expired codes yield `None`.
    ///
    /// The channel is detached from any other profile it was bound to, so
    /// a chat always maps to at most one account.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn consume_link_code(
        &self,
        code: &str,
        channel_id: &str,
    ) -> Result<Option<i64>, DbError> {
        let code = code.trim().to_uppercase();
        let Some(mut link) = self.storage.get_link_code(&code).await? else {
            return Ok(None);
        };

        if !link.is_valid(Utc::now()) {
            log::debug!("Rejected stale link code for user {}", link.user_id);
            return Ok(None);
        }

        let previous = self
            .storage
            .query_profiles(&ProfileFilter {
                channel_id: Some(channel_id.to_string()),
                ..ProfileFilter::default()
            })
            .await?;

        let mut profile_updates: Vec<_> = previous
            .into_iter()
            .filter(|p| p.user_id != link.user_id)
            .map(|p| ProfileUpdate::new(p.user_id, ProfileChange::SetChannel(None)))
            .collect();
        profile_updates.push(ProfileUpdate::new(
            link.user_id,
            ProfileChange::SetChannel(Some(channel_id.to_string())),
        ));
        profile_updates.push(ProfileUpdate::new(
            link.user_id,
            ProfileChange::SetNotificationsEnabled(true),
        ));

        link.used = true;
        let user_id = link.user_id;

        self.storage
            .commit(WriteBatch {
                profile_updates,
                link_codes: vec![link],
                ..WriteBatch::default()
            })
            .await?;

        log::info!("Linked user {user_id} to channel {channel_id}");
        Ok(Some(user_id))
    }
}

#[cfg(test)]
mod tests {
    use skyguard_database::memory::MemoryStore;
    use skyguard_database_models::UserProfileRow;

    use super::*;

    #[test]
    fn generated_codes_are_upper_hex() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), LINK_CODE_LEN);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)),
                "{code}"
            );
        }
    }

    #[tokio::test]
    async fn consuming_binds_channel_once() {
        let store = Arc::new(MemoryStore::new());
        let links = LinkCodes::new(store.clone());

        let code = links.create_link_code(3).await.unwrap();
        assert_eq!(code.expires_at - code.created_at, Duration::minutes(10));

        let lower = code.code.to_lowercase();
        assert_eq!(links.consume_link_code(&lower, "chat-1").await.unwrap(), Some(3));

        let profile = store.get_profile(3).await.unwrap().unwrap();
        assert_eq!(profile.channel(), Some("chat-1"));
        assert!(profile.notifications_enabled);

        assert_eq!(links.consume_link_code(&code.code, "chat-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn new_code_invalidates_previous() {
        let links = LinkCodes::new(Arc::new(MemoryStore::new()));

        let first = links.create_link_code(5).await.unwrap();
        let second = links.create_link_code(5).await.unwrap();

        if first.code != second.code {
            assert_eq!(links.consume_link_code(&first.code, "c").await.unwrap(), None);
        }
        assert_eq!(links.consume_link_code(&second.code, "c").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let links = LinkCodes::new(store.clone());
        let now = Utc::now();

        store
            .replace_link_code(&LinkCodeRow {
                code: "ABCDEF12".to_string(),
                user_id: 8,
                created_at: now - Duration::minutes(11),
                expires_at: now - Duration::minutes(1),
                used: false,
            })
            .await
            .unwrap();

        assert_eq!(links.consume_link_code("ABCDEF12", "chat").await.unwrap(), None);
        assert!(store.get_profile(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_code_is_rejected() {
        let links = LinkCodes::new(Arc::new(MemoryStore::new()));
        assert_eq!(links.consume_link_code("00000000", "chat").await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_moves_between_accounts() {
        let store = Arc::new(MemoryStore::new());
        let links = LinkCodes::new(store.clone());

        let mut old = UserProfileRow::new(1);
        old.channel_id = Some("shared".to_string());
        store.save_profile(old).await.unwrap();

        let code = links.create_link_code(2).await.unwrap();
        assert_eq!(links.consume_link_code(&code.code, "shared").await.unwrap(), Some(2));

        assert_eq!(store.get_profile(1).await.unwrap().unwrap().channel(), None);
        assert_eq!(store.get_profile(2).await.unwrap().unwrap().channel(), Some("shared"));
    }
}
