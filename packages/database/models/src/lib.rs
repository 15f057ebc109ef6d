#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Storage row types and query filter definitions.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the storage layer. They are distinct from the API response types in
//! `skyguard_server_models`.
//!
//! Reports form an arena: a child report refers to its cluster root by id
//! through [`ReportRow::parent_id`], never by embedding the root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyguard_threat_models::{DangerRadius, Probability, ReportStatus, ThreatType};

/// A sighting report as stored.
///
/// `report_count`, `weighted_score` and `probability` are only meaningful
/// on a cluster root (a report with no parent whose status is past
/// [`ReportStatus::Pending`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Primary key.
    pub id: i64,
    /// Short title. Cluster roots carry the upper-cased threat label.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Kind of threat sighted.
    pub threat_type: ThreatType,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Danger radius picked by the reporter.
    pub danger_radius: DangerRadius,
    /// Lifecycle status.
    pub status: ReportStatus,
    /// Derived confidence.
    pub probability: Probability,
    /// Number of corroborating reports including the root itself.
    pub report_count: i64,
    /// Sum of reporter trust weights across the cluster.
    pub weighted_score: f64,
    /// Id of the cluster root, `None` for roots and independent reports.
    pub parent_id: Option<i64>,
    /// User id of the reporter.
    pub author_id: i64,
    /// When the report was submitted.
    pub created_at: DateTime<Utc>,
    /// When an administrator confirmed or rejected the report.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether the threat broadcast has already been dispatched.
    pub notifications_sent: bool,
}

impl ReportRow {
    /// Whether this report has no parent.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// `(latitude, longitude)` pair.
    #[must_use]
    pub const fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// A report to be inserted. Storage assigns the id and the initial
/// lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    /// Short title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Kind of threat sighted.
    pub threat_type: ThreatType,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Danger radius picked by the reporter.
    pub danger_radius: DangerRadius,
    /// User id of the reporter.
    pub author_id: i64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl NewReport {
    /// Builds the stored row for this report with the given id.
    ///
    /// New reports always start out `pending`, parentless and with a
    /// single-report aggregate.
    #[must_use]
    pub fn into_row(self, id: i64) -> ReportRow {
        ReportRow {
            id,
            title: self.title,
            description: self.description,
            threat_type: self.threat_type,
            latitude: self.latitude,
            longitude: self.longitude,
            danger_radius: self.danger_radius,
            status: ReportStatus::Pending,
            probability: Probability::Low,
            report_count: 1,
            weighted_score: 0.0,
            parent_id: None,
            author_id: self.author_id,
            created_at: self.created_at,
            resolved_at: None,
            notifications_sent: false,
        }
    }
}

/// Constraint on [`ReportRow::parent_id`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentFilter {
    /// Don't filter on the parent.
    #[default]
    Any,
    /// Only reports without a parent.
    Root,
    /// Only direct children of the given root.
    ChildOf(i64),
}

/// Parameters for querying reports.
///
/// Every `None`/empty field means "don't filter". Results are always
/// ordered by ascending id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    /// Only reports of this threat type.
    pub threat_type: Option<ThreatType>,
    /// Only reports created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only reports whose status is in this set.
    pub statuses: Vec<ReportStatus>,
    /// Parent constraint.
    pub parent: ParentFilter,
    /// Only reports by this author.
    pub author_id: Option<i64>,
    /// Skip the report with this id.
    pub exclude_id: Option<i64>,
    /// Only reports with this probability.
    pub probability: Option<Probability>,
}

impl ReportFilter {
    /// Whether `report` satisfies every constraint of this filter.
    #[must_use]
    pub fn matches(&self, report: &ReportRow) -> bool {
        if self.threat_type.is_some_and(|t| t != report.threat_type) {
            return false;
        }
        if self.created_after.is_some_and(|t| report.created_at < t) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&report.status) {
            return false;
        }
        match self.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => {
                if report.parent_id.is_some() {
                    return false;
                }
            }
            ParentFilter::ChildOf(root) => {
                if report.parent_id != Some(root) {
                    return false;
                }
            }
        }
        if self.author_id.is_some_and(|a| a != report.author_id) {
            return false;
        }
        if self.exclude_id.is_some_and(|id| id == report.id) {
            return false;
        }
        if self.probability.is_some_and(|p| p != report.probability) {
            return false;
        }
        true
    }
}

/// Lowest stored trust rating.
pub const MIN_TRUST_RATING: f64 = -5.0;

/// Highest stored trust rating.
pub const MAX_TRUST_RATING: f64 = 5.0;

/// Per-user trust and notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileRow {
    /// Owning user id.
    pub user_id: i64,
    /// Trust rating in `[-5, 5]`.
    pub trust_rating: f64,
    /// Last known latitude.
    pub last_latitude: Option<f64>,
    /// Last known longitude.
    pub last_longitude: Option<f64>,
    /// External notification channel (Telegram chat id).
    pub channel_id: Option<String>,
    /// Whether the user wants alerts.
    pub notifications_enabled: bool,
}

impl UserProfileRow {
    /// A fresh profile with neutral trust and notifications enabled.
    #[must_use]
    pub const fn new(user_id: i64) -> Self {
        Self {
            user_id,
            trust_rating: 0.0,
            last_latitude: None,
            last_longitude: None,
            channel_id: None,
            notifications_enabled: true,
        }
    }

    /// Last known location, if both components are set.
    #[must_use]
    pub const fn location(&self) -> Option<(f64, f64)> {
        match (self.last_latitude, self.last_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// The notification channel, if set and non-empty.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel_id.as_deref().filter(|c| !c.is_empty())
    }

    /// Applies a single column change in place.
    pub fn apply(&mut self, change: &ProfileChange) {
        match change {
            ProfileChange::Create => {}
            ProfileChange::AdjustRating(delta) => {
                if !delta.is_nan() {
                    self.trust_rating =
                        (self.trust_rating + delta).clamp(MIN_TRUST_RATING, MAX_TRUST_RATING);
                }
            }
            ProfileChange::SetLocation {
                latitude,
                longitude,
            } => {
                self.last_latitude = Some(*latitude);
                self.last_longitude = Some(*longitude);
            }
            ProfileChange::SetNotificationsEnabled(enabled) => {
                self.notifications_enabled = *enabled;
            }
            ProfileChange::SetChannel(channel_id) => {
                self.channel_id.clone_from(channel_id);
            }
        }
    }
}

/// A change to one group of profile columns.
///
/// Every change creates the default profile first if it does not exist, and
/// leaves the other columns as they are in storage at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileChange {
    /// Only creates the profile.
    Create,
    /// Adds to the trust rating, saturating at
    /// [`MIN_TRUST_RATING`]/[`MAX_TRUST_RATING`].
    AdjustRating(f64),
    /// Records the last known location.
    SetLocation {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
    /// Turns alerts on or off.
    SetNotificationsEnabled(bool),
    /// Binds or unbinds the notification channel.
    SetChannel(Option<String>),
}

/// A [`ProfileChange`] addressed to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    /// Target user.
    pub user_id: i64,
    /// Change to apply.
    pub change: ProfileChange,
}

impl ProfileUpdate {
    /// Creates an update of `user_id`.
    #[must_use]
    pub const fn new(user_id: i64, change: ProfileChange) -> Self {
        Self { user_id, change }
    }
}

/// Parameters for querying profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFilter {
    /// Only profiles with a known last location.
    pub has_location: bool,
    /// Only profiles with a non-empty notification channel.
    pub has_channel: bool,
    /// Only profiles with this notifications flag.
    pub notifications_enabled: Option<bool>,
    /// Only the profile bound to this channel.
    pub channel_id: Option<String>,
}

impl ProfileFilter {
    /// Profiles that can receive any broadcast.
    #[must_use]
    pub const fn reachable() -> Self {
        Self {
            has_location: false,
            has_channel: true,
            notifications_enabled: Some(true),
            channel_id: None,
        }
    }

    /// Profiles that can receive location-based alerts.
    #[must_use]
    pub const fn reachable_with_location() -> Self {
        Self {
            has_location: true,
            has_channel: true,
            notifications_enabled: Some(true),
            channel_id: None,
        }
    }

    /// Whether `profile` satisfies every constraint of this filter.
    #[must_use]
    pub fn matches(&self, profile: &UserProfileRow) -> bool {
        if self.has_location && profile.location().is_none() {
            return false;
        }
        if self.has_channel && profile.channel().is_none() {
            return false;
        }
        if self
            .notifications_enabled
            .is_some_and(|e| e != profile.notifications_enabled)
        {
            return false;
        }
        match &self.channel_id {
            Some(channel) => profile.channel_id.as_deref() == Some(channel.as_str()),
            None => true,
        }
    }
}

/// Single-use code binding a user to an external notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCodeRow {
    /// Upper-case code.
    pub code: String,
    /// User the code was issued to.
    pub user_id: i64,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Whether the code was already consumed.
    pub used: bool,
}

impl LinkCodeRow {
    /// Whether the code can still be consumed at `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}

/// A public shelter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShelterRow {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub title: String,
    /// Street address.
    pub address: String,
    /// Number of people the shelter holds.
    pub capacity: i64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A shelter to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShelter {
    /// Display name.
    pub title: String,
    /// Street address.
    pub address: String,
    /// Number of people the shelter holds.
    pub capacity: i64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A set of upserts applied atomically by the storage layer.
///
/// Either every row is written or none is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Reports to overwrite (matched by id).
    pub reports: Vec<ReportRow>,
    /// Whole profiles to upsert (matched by user id). Overwrites every
    /// column; concurrent writers should use `profile_updates`.
    pub profiles: Vec<UserProfileRow>,
    /// Column-level profile changes, applied in order after `profiles`.
    pub profile_updates: Vec<ProfileUpdate>,
    /// Link codes to overwrite (matched by code).
    pub link_codes: Vec<LinkCodeRow>,
}

impl WriteBatch {
    /// Whether the batch contains no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
            && self.profiles.is_empty()
            && self.profile_updates.is_empty()
            && self.link_codes.is_empty()
    }
}
