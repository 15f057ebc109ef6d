//! Self-service profile settings.

use std::sync::Arc;

use skyguard_database::{DbError, Storage};
use skyguard_database_models::{ProfileChange, ProfileFilter, UserProfileRow};
use skyguard_spatial::validate_coordinates;

use crate::{UsersError, get_or_create_profile};

/// Reads and updates user profiles.
#[derive(Clone)]
pub struct ProfileStore {
    storage: Arc<dyn Storage>,
}

impl ProfileStore {
    /// Creates a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Profile of `user_id`, created on first access.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn get(&self, user_id: i64) -> Result<UserProfileRow, DbError> {
        get_or_create_profile(self.storage.as_ref(), user_id).await
    }

    /// Profile bound to the notification channel `channel_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn find_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<UserProfileRow>, DbError> {
        let filter = ProfileFilter {
            channel_id: Some(channel_id.to_string()),
            ..ProfileFilter::default()
        };
        Ok(self
            .storage
            .query_profiles(&filter)
            .await?
            .into_iter()
            .next())
    }

    /// Records the last known location of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`UsersError::InvalidCoordinates`] for out-of-range values,
    /// or [`UsersError::Database`] on storage failure.
    pub async fn update_location(
        &self,
        user_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<UserProfileRow, UsersError> {
        validate_coordinates(latitude, longitude)?;

        Ok(self
            .storage
            .update_profile(
                user_id,
                ProfileChange::SetLocation {
                    latitude,
                    longitude,
                },
            )
            .await?)
    }

    /// Turns alert delivery on or off for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn set_notifications_enabled(
        &self,
        user_id: i64,
        enabled: bool,
    ) -> Result<UserProfileRow, DbError> {
        let profile = self
            .storage
            .update_profile(user_id, ProfileChange::SetNotificationsEnabled(enabled))
            .await?;

        log::info!(
            "Notifications {} for user {user_id}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(profile)
    }
}
