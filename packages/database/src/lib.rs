#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Storage layer for `SkyGuard`.
//!
//! The rest of the system talks to storage exclusively through the
//! [`Storage`] trait. Two backends are provided:
//!
//! - [`sql::SqlStore`] persists to `SQLite` through `switchy_database`,
//!   applying every [`WriteBatch`] inside a transaction.
//! - [`memory::MemoryStore`] keeps everything in process memory behind a
//!   single lock. Used by tests and throwaway runs.

pub mod db;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use skyguard_database_models::{
    LinkCodeRow, NewReport, NewShelter, ProfileChange, ProfileFilter, ProfileUpdate,
    ReportFilter, ReportRow, ShelterRow, UserProfileRow, WriteBatch,
};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The database could not be opened.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Persistence operations required by the aggregation engine, the trust
/// store, the notifier and the HTTP API.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts a new report and returns the stored row with its id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn create_report(&self, report: NewReport) -> Result<ReportRow, DbError>;

    /// Fetches a report by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, DbError>;

    /// Returns every report matching `filter`, ordered by ascending id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn query_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, DbError>;

    /// Counts reports matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64, DbError>;

    /// Deletes a report together with its direct children. Returns the
    /// number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    async fn delete_report(&self, id: i64) -> Result<u64, DbError>;

    /// Fetches a user profile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfileRow>, DbError>;

    /// Returns every profile matching `filter`, ordered by user id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn query_profiles(&self, filter: &ProfileFilter)
    -> Result<Vec<UserProfileRow>, DbError>;

    /// Stores `code`, deleting every other code of the same user.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn replace_link_code(&self, code: &LinkCodeRow) -> Result<(), DbError>;

    /// Fetches a link code by its exact (upper-case) value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn get_link_code(&self, code: &str) -> Result<Option<LinkCodeRow>, DbError>;

    /// Lists all shelters ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn list_shelters(&self) -> Result<Vec<ShelterRow>, DbError>;

    /// Inserts a shelter.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn create_shelter(&self, shelter: NewShelter) -> Result<ShelterRow, DbError>;

    /// Applies every write in `batch` atomically.
    ///
    /// Reports must already exist; profiles and link codes are upserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any write fails, in which case none of the
    /// batch is applied.
    async fn commit(&self, batch: WriteBatch) -> Result<(), DbError>;

    /// Applies one column-level change to the profile of `user_id`,
    /// creating the profile if needed, and returns the stored profile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write or the read-back fails.
    async fn update_profile(
        &self,
        user_id: i64,
        change: ProfileChange,
    ) -> Result<UserProfileRow, DbError> {
        self.commit(WriteBatch {
            profile_updates: vec![ProfileUpdate::new(user_id, change)],
            ..WriteBatch::default()
        })
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| DbError::Conversion {
                message: format!("Profile {user_id} missing after update"),
            })
    }

    /// Upserts a single profile, overwriting every column.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn save_profile(&self, profile: UserProfileRow) -> Result<(), DbError> {
        self.commit(WriteBatch {
            profiles: vec![profile],
            ..WriteBatch::default()
        })
        .await
    }

    /// Overwrites a single report.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn save_report(&self, report: ReportRow) -> Result<(), DbError> {
        self.commit(WriteBatch {
            reports: vec![report],
            ..WriteBatch::default()
        })
        .await
    }
}
