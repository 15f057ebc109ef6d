#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Per-user state: trust ratings, profile settings and the single-use
//! codes that bind a user to a notification channel.
//!
//! Profiles are created lazily. Every component that needs one goes through
//! [`get_or_create_profile`] instead of assuming it exists.

pub mod link;
pub mod profile;
pub mod trust;

use skyguard_database::{DbError, Storage};
use skyguard_database_models::{ProfileChange, UserProfileRow};
use skyguard_spatial::InvalidCoordinateError;

/// Errors from user-state operations.
#[derive(Debug, thiserror::Error)]
pub enum UsersError {
    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// A submitted location is out of range.
    #[error(transparent)]
    InvalidCoordinates(#[from] InvalidCoordinateError),
}

/// Returns the profile of `user_id`, creating and persisting a default one
/// if none exists yet.
///
/// # Errors
///
/// Returns [`DbError`] if the lookup or the insert fails.
pub async fn get_or_create_profile(
    storage: &dyn Storage,
    user_id: i64,
) -> Result<UserProfileRow, DbError> {
    if let Some(profile) = storage.get_profile(user_id).await? {
        return Ok(profile);
    }

    log::debug!("Creating profile for user {user_id}");
    storage.update_profile(user_id, ProfileChange::Create).await
}
