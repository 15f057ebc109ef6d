//! Trust rating store.
//!
//! A rating lives in `[MIN_RATING, MAX_RATING]` and maps linearly onto a
//! corroboration weight in `[0.5, 1.5]`.

use std::{collections::BTreeMap, sync::Arc};

use skyguard_database::{DbError, Storage};
use skyguard_database_models::{
    MAX_TRUST_RATING, MIN_TRUST_RATING, ProfileChange, UserProfileRow,
};

use crate::get_or_create_profile;

/// Lowest possible trust rating.
pub const MIN_RATING: f64 = MIN_TRUST_RATING;

/// Highest possible trust rating.
pub const MAX_RATING: f64 = MAX_TRUST_RATING;

/// Weight of a user without a profile.
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// Clamps a rating into `[MIN_RATING, MAX_RATING]`. NaN becomes neutral.
#[must_use]
pub fn clamp_rating(rating: f64) -> f64 {
    if rating.is_nan() {
        return 0.0;
    }
    rating.clamp(MIN_RATING, MAX_RATING)
}

/// Corroboration weight for a rating: `1 + rating / 10`.
#[must_use]
pub fn weight_for_rating(rating: f64) -> f64 {
    NEUTRAL_WEIGHT + clamp_rating(rating) / 10.0
}

/// Reads and adjusts per-user trust.
#[derive(Clone)]
pub struct TrustStore {
    storage: Arc<dyn Storage>,
}

impl TrustStore {
    /// Creates a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// See [`crate::get_or_create_profile`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfileRow, DbError> {
        get_or_create_profile(self.storage.as_ref(), user_id).await
    }

    /// Current rating of `user_id`, `0.0` when the user has no profile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn rating(&self, user_id: i64) -> Result<f64, DbError> {
        Ok(self
            .storage
            .get_profile(user_id)
            .await?
            .map_or(0.0, |p| clamp_rating(p.trust_rating)))
    }

    /// Corroboration weight of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn get_weight(&self, user_id: i64) -> Result<f64, DbError> {
        Ok(self
            .storage
            .get_profile(user_id)
            .await?
            .map_or(NEUTRAL_WEIGHT, |p| weight_for_rating(p.trust_rating)))
    }

    /// Weights for a set of authors, keyed by user id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn weights(&self, user_ids: &[i64]) -> Result<BTreeMap<i64, f64>, DbError> {
        let mut weights = BTreeMap::new();
        for &user_id in user_ids {
            if !weights.contains_key(&user_id) {
                weights.insert(user_id, self.get_weight(user_id).await?);
            }
        }
        Ok(weights)
    }

    /// Adds `delta` to the rating of `user_id`, creating the profile if
    /// needed. Returns the new rating.
    ///
    /// The addition happens in storage, so concurrent adjustments of the
    /// same user all count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn adjust(&self, user_id: i64, delta: f64) -> Result<f64, DbError> {
        let rating = self
            .storage
            .update_profile(user_id, ProfileChange::AdjustRating(delta))
            .await?
            .trust_rating;

        log::debug!("Adjusted trust of user {user_id} by {delta:+} to {rating}");
        Ok(rating)
    }
}

#[cfg(test)]
mod tests {
    use skyguard_database::memory::MemoryStore;

    use super::*;

    #[test]
    fn weight_stays_in_range() {
        let mut rating = MIN_RATING;
        while rating <= MAX_RATING {
            let weight = weight_for_rating(rating);
            assert!((0.5..=1.5).contains(&weight), "{rating} -> {weight}");
            rating += 0.05;
        }
        assert!((weight_for_rating(100.0) - 1.5).abs() < 1e-12);
        assert!((weight_for_rating(-100.0) - 0.5).abs() < 1e-12);
        assert!((weight_for_rating(0.0) - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unknown_user_has_neutral_weight() {
        let trust = TrustStore::new(Arc::new(MemoryStore::new()));
        assert!((trust.get_weight(77).await.unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(trust.rating(77).await.unwrap().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn adjust_saturates_at_upper_bound() {
        let store = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(store.clone());

        let mut profile = UserProfileRow::new(1);
        profile.trust_rating = 4.9;
        store.save_profile(profile).await.unwrap();

        for _ in 0..10 {
            let rating = trust.adjust(1, 0.25).await.unwrap();
            assert!(rating <= MAX_RATING);
        }
        assert!((trust.rating(1).await.unwrap() - MAX_RATING).abs() < f64::EPSILON);
        assert!((trust.get_weight(1).await.unwrap() - 1.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn adjust_creates_profile_and_saturates_at_lower_bound() {
        let trust = TrustStore::new(Arc::new(MemoryStore::new()));

        assert!((trust.adjust(2, -0.25).await.unwrap() + 0.25).abs() < 1e-12);
        for _ in 0..40 {
            trust.adjust(2, -0.25).await.unwrap();
        }
        assert!((trust.rating(2).await.unwrap() - MIN_RATING).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn adjust_keeps_location_and_channel() {
        let store = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(store.clone());

        let mut profile = UserProfileRow::new(6);
        profile.last_latitude = Some(50.0);
        profile.last_longitude = Some(20.0);
        profile.channel_id = Some("chat-6".to_string());
        store.save_profile(profile).await.unwrap();

        trust.adjust(6, -0.25).await.unwrap();

        let stored = store.get_profile(6).await.unwrap().unwrap();
        assert_eq!(stored.location(), Some((50.0, 20.0)));
        assert_eq!(stored.channel(), Some("chat-6"));
        assert!((stored.trust_rating + 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn weights_deduplicate_authors() {
        let store = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(store.clone());
        trust.adjust(3, 5.0).await.unwrap();

        let weights = trust.weights(&[3, 3, 4]).await.unwrap();
        assert_eq!(weights.len(), 2);
        assert!((weights[&3] - 1.5).abs() < 1e-12);
        assert!((weights[&4] - 1.0).abs() < 1e-12);
    }
}
