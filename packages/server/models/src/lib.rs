#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the `SkyGuard` server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the database row types to allow independent evolution of the API
//! contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyguard_database_models::{LinkCodeRow, ReportRow, ShelterRow, UserProfileRow};
use skyguard_threat_models::{DangerRadius, Probability, ReportStatus, ThreatType};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Always `true` when the server answers.
    pub healthy: bool,
    /// Server version.
    pub version: String,
}

/// A report as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReport {
    /// Report id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Free text.
    pub description: String,
    /// Kind of threat.
    pub threat_type: ThreatType,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Danger radius in km.
    pub danger_radius: DangerRadius,
    /// Lifecycle status.
    pub status: ReportStatus,
    /// Confidence of the incident.
    pub probability: Probability,
    /// Number of reports in the cluster (roots only).
    pub report_count: i64,
    /// Trust-weighted corroboration score (roots only).
    pub weighted_score: f64,
    /// Root of the cluster this report belongs to.
    pub parent_id: Option<i64>,
    /// Reporting user.
    pub author_id: i64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the incident was confirmed or rejected.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether the threat alert went out.
    pub notifications_sent: bool,
}

impl From<ReportRow> for ApiReport {
    fn from(row: ReportRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            threat_type: row.threat_type,
            latitude: row.latitude,
            longitude: row.longitude,
            danger_radius: row.danger_radius,
            status: row.status,
            probability: row.probability,
            report_count: row.report_count,
            weighted_score: row.weighted_score,
            parent_id: row.parent_id,
            author_id: row.author_id,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
            notifications_sent: row.notifications_sent,
        }
    }
}

/// Query parameters for `GET /api/reports`.
///
/// Values are kept as strings; unrecognized ones are ignored by the
/// handler instead of failing the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportListParams {
    /// `unconfirmed` or `confirmed`.
    pub status: Option<String>,
    /// `low`, `medium` or `high`.
    pub probability: Option<String>,
    /// Threat type name.
    #[serde(rename = "type")]
    pub threat_type: Option<String>,
}

/// Body of `POST /api/reports`.
///
/// Everything is optional at the wire level so that missing fields
/// surface as field-level validation errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    /// Optional title.
    pub title: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
    /// Threat type name.
    pub threat_type: Option<String>,
    /// Danger radius in km.
    pub danger_radius: Option<i64>,
}

/// Outcome of confirming or rejecting an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResolution {
    /// The root after resolution.
    pub report: ApiReport,
    /// Reports whose status changed.
    pub affected_reports: usize,
    /// Users reached by the follow-up broadcast.
    pub notified: usize,
}

/// Outcome of deleting a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDeleted {
    /// Number of deleted reports, children included.
    pub deleted: u64,
}

/// A shelter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiShelter {
    /// Shelter id.
    pub id: i64,
    /// Name.
    pub title: String,
    /// Street address.
    pub address: String,
    /// Number of people it holds.
    pub capacity: i64,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
}

impl From<ShelterRow> for ApiShelter {
    fn from(row: ShelterRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            address: row.address,
            capacity: row.capacity,
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}

/// The caller's own profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProfile {
    /// User id.
    pub user_id: i64,
    /// Trust rating in [-5, 5].
    pub trust_rating: f64,
    /// Last reported latitude.
    pub last_latitude: Option<f64>,
    /// Last reported longitude.
    pub last_longitude: Option<f64>,
    /// Whether a notification channel is bound.
    pub channel_linked: bool,
    /// Whether alerts are delivered.
    pub notifications_enabled: bool,
}

impl From<UserProfileRow> for ApiProfile {
    fn from(row: UserProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            trust_rating: row.trust_rating,
            last_latitude: row.last_latitude,
            last_longitude: row.last_longitude,
            channel_linked: row.channel().is_some(),
            notifications_enabled: row.notifications_enabled,
        }
    }
}

/// Body of `PUT /api/me/location`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Body of `PUT /api/me/notifications`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsRequest {
    /// New notification switch state.
    pub enabled: bool,
}

/// A freshly issued link code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLinkCode {
    /// The code to send to the bot.
    pub code: String,
    /// When the code stops working.
    pub expires_at: DateTime<Utc>,
    /// Bot username without the `@`.
    pub bot_username: String,
    /// Deep link that sends `/start <code>` to the bot.
    pub link: String,
}

impl ApiLinkCode {
    /// Builds the response for `row`, pointing at `bot_username`.
    #[must_use]
    pub fn new(row: LinkCodeRow, bot_username: &str) -> Self {
        let bot_username = bot_username.trim_start_matches('@').to_string();
        Self {
            link: format!("https://t.me/{bot_username}?start={}", row.code),
            code: row.code,
            expires_at: row.expires_at,
            bot_username,
        }
    }
}

/// A user's public trust rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRating {
    /// User id.
    pub user_id: i64,
    /// Trust rating in [-5, 5].
    pub rating: f64,
}
