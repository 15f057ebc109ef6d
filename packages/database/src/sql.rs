//! `SQLite` [`Storage`] backend built on `switchy_database`.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and a
//! `Z` suffix so that string comparison matches chronological order.
//! Booleans are stored as integers.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use moosicbox_json_utils::database::ToValue as _;
use skyguard_database_models::{
    LinkCodeRow, MAX_TRUST_RATING, MIN_TRUST_RATING, NewReport, NewShelter, ParentFilter,
    ProfileChange, ProfileFilter, ProfileUpdate, ReportFilter, ReportRow, ShelterRow,
    UserProfileRow, WriteBatch,
};
use skyguard_threat_models::{DangerRadius, Probability, ReportStatus, ThreatType};
use switchy_database::{Database, DatabaseValue, Row};

use crate::{DbError, Storage};

const REPORT_COLUMNS: &str = "id, title, description, threat_type, latitude, longitude, \
     danger_radius, status, probability, report_count, weighted_score, parent_id, \
     author_id, created_at, resolved_at, notifications_sent";

const PROFILE_COLUMNS: &str =
    "user_id, trust_rating, last_latitude, last_longitude, channel_id, notifications_enabled";

/// [`Storage`] over any `switchy_database` connection.
pub struct SqlStore {
    db: Box<dyn Database>,
}

impl SqlStore {
    /// Wraps an open connection. The schema must already exist (see
    /// [`crate::db::ensure_schema`]).
    #[must_use]
    pub fn new(db: Box<dyn Database>) -> Self {
        Self { db }
    }
}

/// Encodes a timestamp in the canonical sortable text form.
#[must_use]
pub fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("Invalid timestamp '{value}': {e}"),
        })
}

fn opt_real(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

fn opt_string(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.to_string()))
}

fn flag(value: bool) -> DatabaseValue {
    DatabaseValue::Int64(i64::from(value))
}

/// Builds the `WHERE` clause and parameters for a [`ReportFilter`].
///
/// Placeholders are numbered starting at `$1`.
#[must_use]
pub fn build_report_where(filter: &ReportFilter) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params: Vec<DatabaseValue> = Vec::new();
    let mut param_idx = 1u32;

    if let Some(threat_type) = filter.threat_type {
        write!(sql, " AND threat_type = ${param_idx}").unwrap();
        params.push(DatabaseValue::String(threat_type.as_ref().to_string()));
        param_idx += 1;
    }

    if let Some(after) = filter.created_after {
        write!(sql, " AND created_at >= ${param_idx}").unwrap();
        params.push(DatabaseValue::String(encode_time(after)));
        param_idx += 1;
    }

    if !filter.statuses.is_empty() {
        let placeholders: Vec<String> = filter
            .statuses
            .iter()
            .map(|status| {
                params.push(DatabaseValue::String(status.as_ref().to_string()));
                let placeholder = format!("${param_idx}");
                param_idx += 1;
                placeholder
            })
            .collect();
        write!(sql, " AND status IN ({})", placeholders.join(", ")).unwrap();
    }

    match filter.parent {
        ParentFilter::Any => {}
        ParentFilter::Root => sql.push_str(" AND parent_id IS NULL"),
        ParentFilter::ChildOf(root) => {
            write!(sql, " AND parent_id = ${param_idx}").unwrap();
            params.push(DatabaseValue::Int64(root));
            param_idx += 1;
        }
    }

    if let Some(author_id) = filter.author_id {
        write!(sql, " AND author_id = ${param_idx}").unwrap();
        params.push(DatabaseValue::Int64(author_id));
        param_idx += 1;
    }

    if let Some(exclude_id) = filter.exclude_id {
        write!(sql, " AND id != ${param_idx}").unwrap();
        params.push(DatabaseValue::Int64(exclude_id));
        param_idx += 1;
    }

    if let Some(probability) = filter.probability {
        write!(sql, " AND probability = ${param_idx}").unwrap();
        params.push(DatabaseValue::String(probability.as_ref().to_string()));
    }

    (sql, params)
}

/// Builds the `WHERE` clause and parameters for a [`ProfileFilter`].
#[must_use]
pub fn build_profile_where(filter: &ProfileFilter) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params: Vec<DatabaseValue> = Vec::new();
    let mut param_idx = 1u32;

    if filter.has_location {
        sql.push_str(" AND last_latitude IS NOT NULL AND last_longitude IS NOT NULL");
    }

    if filter.has_channel {
        sql.push_str(" AND channel_id IS NOT NULL AND channel_id != ''");
    }

    if let Some(enabled) = filter.notifications_enabled {
        write!(sql, " AND notifications_enabled = ${param_idx}").unwrap();
        params.push(flag(enabled));
        param_idx += 1;
    }

    if let Some(channel_id) = &filter.channel_id {
        write!(sql, " AND channel_id = ${param_idx}").unwrap();
        params.push(DatabaseValue::String(channel_id.clone()));
    }

    (sql, params)
}

fn parse_report(row: &Row) -> Result<ReportRow, DbError> {
    let threat_type: String = row.to_value("threat_type").unwrap_or_default();
    let threat_type = threat_type
        .parse::<ThreatType>()
        .map_err(|e| DbError::Conversion {
            message: format!("Invalid threat type '{threat_type}': {e}"),
        })?;

    let status: String = row.to_value("status").unwrap_or_default();
    let status = status
        .parse::<ReportStatus>()
        .map_err(|e| DbError::Conversion {
            message: format!("Invalid status '{status}': {e}"),
        })?;

    let probability: String = row.to_value("probability").unwrap_or_default();
    let probability = probability
        .parse::<Probability>()
        .unwrap_or(Probability::Low);

    let radius: i64 = row.to_value("danger_radius").unwrap_or(1);
    let danger_radius = u8::try_from(radius)
        .ok()
        .and_then(|r| DangerRadius::from_value(r).ok())
        .ok_or_else(|| DbError::Conversion {
            message: format!("Invalid danger radius {radius}"),
        })?;

    let created_at: String = row.to_value("created_at").unwrap_or_default();
    let resolved_at: Option<String> = row.to_value("resolved_at").unwrap_or(None);
    let notifications_sent: i64 = row.to_value("notifications_sent").unwrap_or(0);

    Ok(ReportRow {
        id: row.to_value("id").unwrap_or(0),
        title: row.to_value("title").unwrap_or_default(),
        description: row.to_value("description").unwrap_or_default(),
        threat_type,
        latitude: row.to_value("latitude").unwrap_or(0.0),
        longitude: row.to_value("longitude").unwrap_or(0.0),
        danger_radius,
        status,
        probability,
        report_count: row.to_value("report_count").unwrap_or(1),
        weighted_score: row.to_value("weighted_score").unwrap_or(0.0),
        parent_id: row.to_value("parent_id").unwrap_or(None),
        author_id: row.to_value("author_id").unwrap_or(0),
        created_at: decode_time(&created_at)?,
        resolved_at: resolved_at.as_deref().map(decode_time).transpose()?,
        notifications_sent: notifications_sent != 0,
    })
}

fn parse_profile(row: &Row) -> UserProfileRow {
    let enabled: i64 = row.to_value("notifications_enabled").unwrap_or(1);
    UserProfileRow {
        user_id: row.to_value("user_id").unwrap_or(0),
        trust_rating: row.to_value("trust_rating").unwrap_or(0.0),
        last_latitude: row.to_value("last_latitude").unwrap_or(None),
        last_longitude: row.to_value("last_longitude").unwrap_or(None),
        channel_id: row.to_value("channel_id").unwrap_or(None),
        notifications_enabled: enabled != 0,
    }
}

fn parse_link_code(row: &Row) -> Result<LinkCodeRow, DbError> {
    let created_at: String = row.to_value("created_at").unwrap_or_default();
    let expires_at: String = row.to_value("expires_at").unwrap_or_default();
    let used: i64 = row.to_value("used").unwrap_or(0);
    Ok(LinkCodeRow {
        code: row.to_value("code").unwrap_or_default(),
        user_id: row.to_value("user_id").unwrap_or(0),
        created_at: decode_time(&created_at)?,
        expires_at: decode_time(&expires_at)?,
        used: used != 0,
    })
}

fn parse_shelter(row: &Row) -> ShelterRow {
    ShelterRow {
        id: row.to_value("id").unwrap_or(0),
        title: row.to_value("title").unwrap_or_default(),
        address: row.to_value("address").unwrap_or_default(),
        capacity: row.to_value("capacity").unwrap_or(0),
        latitude: row.to_value("latitude").unwrap_or(0.0),
        longitude: row.to_value("longitude").unwrap_or(0.0),
    }
}

async fn update_report(db: &dyn Database, report: &ReportRow) -> Result<(), DbError> {
    let updated = db
        .exec_raw_params(
            "UPDATE reports SET
                title = $2, description = $3, threat_type = $4,
                latitude = $5, longitude = $6, danger_radius = $7,
                status = $8, probability = $9, report_count = $10,
                weighted_score = $11, parent_id = $12, author_id = $13,
                resolved_at = $14, notifications_sent = $15
             WHERE id = $1",
            &[
                DatabaseValue::Int64(report.id),
                DatabaseValue::String(report.title.clone()),
                DatabaseValue::String(report.description.clone()),
                DatabaseValue::String(report.threat_type.as_ref().to_string()),
                DatabaseValue::Real64(report.latitude),
                DatabaseValue::Real64(report.longitude),
                DatabaseValue::Int64(i64::from(report.danger_radius.value())),
                DatabaseValue::String(report.status.as_ref().to_string()),
                DatabaseValue::String(report.probability.as_ref().to_string()),
                DatabaseValue::Int64(report.report_count),
                DatabaseValue::Real64(report.weighted_score),
                report
                    .parent_id
                    .map_or(DatabaseValue::Null, DatabaseValue::Int64),
                DatabaseValue::Int64(report.author_id),
                opt_string(report.resolved_at.map(encode_time).as_deref()),
                flag(report.notifications_sent),
            ],
        )
        .await?;

    if updated == 0 {
        return Err(DbError::Conversion {
            message: format!("Cannot update unknown report {}", report.id),
        });
    }

    Ok(())
}

async fn upsert_profile(db: &dyn Database, profile: &UserProfileRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO user_profiles (
            user_id, trust_rating, last_latitude, last_longitude,
            channel_id, notifications_enabled
         ) VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (user_id) DO UPDATE SET
            trust_rating = excluded.trust_rating,
            last_latitude = excluded.last_latitude,
            last_longitude = excluded.last_longitude,
            channel_id = excluded.channel_id,
            notifications_enabled = excluded.notifications_enabled",
        &[
            DatabaseValue::Int64(profile.user_id),
            DatabaseValue::Real64(profile.trust_rating),
            opt_real(profile.last_latitude),
            opt_real(profile.last_longitude),
            opt_string(profile.channel_id.as_deref()),
            flag(profile.notifications_enabled),
        ],
    )
    .await?;

    Ok(())
}

async fn apply_profile_update(db: &dyn Database, update: &ProfileUpdate) -> Result<(), DbError> {
    let user_id = update.user_id;

    db.exec_raw_params(
        "INSERT INTO user_profiles (user_id) VALUES ($1)
         ON CONFLICT (user_id) DO NOTHING",
        &[DatabaseValue::Int64(user_id)],
    )
    .await?;

    match &update.change {
        ProfileChange::Create => {}
        ProfileChange::AdjustRating(delta) => {
            if delta.is_nan() {
                return Ok(());
            }
            db.exec_raw_params(
                "UPDATE user_profiles
                 SET trust_rating = MAX($2, MIN($3, trust_rating + $4))
                 WHERE user_id = $1",
                &[
                    DatabaseValue::Int64(user_id),
                    DatabaseValue::Real64(MIN_TRUST_RATING),
                    DatabaseValue::Real64(MAX_TRUST_RATING),
                    DatabaseValue::Real64(*delta),
                ],
            )
            .await?;
        }
        ProfileChange::SetLocation {
            latitude,
            longitude,
        } => {
            db.exec_raw_params(
                "UPDATE user_profiles SET last_latitude = $2, last_longitude = $3
                 WHERE user_id = $1",
                &[
                    DatabaseValue::Int64(user_id),
                    DatabaseValue::Real64(*latitude),
                    DatabaseValue::Real64(*longitude),
                ],
            )
            .await?;
        }
        ProfileChange::SetNotificationsEnabled(enabled) => {
            db.exec_raw_params(
                "UPDATE user_profiles SET notifications_enabled = $2 WHERE user_id = $1",
                &[DatabaseValue::Int64(user_id), flag(*enabled)],
            )
            .await?;
        }
        ProfileChange::SetChannel(channel_id) => {
            db.exec_raw_params(
                "UPDATE user_profiles SET channel_id = $2 WHERE user_id = $1",
                &[DatabaseValue::Int64(user_id), opt_string(channel_id.as_deref())],
            )
            .await?;
        }
    }

    Ok(())
}

async fn upsert_link_code(db: &dyn Database, code: &LinkCodeRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO link_codes (code, user_id, created_at, expires_at, used)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (code) DO UPDATE SET
            user_id = excluded.user_id,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at,
            used = excluded.used",
        &[
            DatabaseValue::String(code.code.clone()),
            DatabaseValue::Int64(code.user_id),
            DatabaseValue::String(encode_time(code.created_at)),
            DatabaseValue::String(encode_time(code.expires_at)),
            flag(code.used),
        ],
    )
    .await?;

    Ok(())
}

async fn write_batch(db: &dyn Database, batch: &WriteBatch) -> Result<(), DbError> {
    for report in &batch.reports {
        update_report(db, report).await?;
    }
    for profile in &batch.profiles {
        upsert_profile(db, profile).await?;
    }
    for update in &batch.profile_updates {
        apply_profile_update(db, update).await?;
    }
    for code in &batch.link_codes {
        upsert_link_code(db, code).await?;
    }
    Ok(())
}

#[async_trait]
impl Storage for SqlStore {
    async fn create_report(&self, report: NewReport) -> Result<ReportRow, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "INSERT INTO reports (
                    title, description, threat_type, latitude, longitude,
                    danger_radius, status, probability, report_count,
                    weighted_score, parent_id, author_id, created_at,
                    resolved_at, notifications_sent
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, 0.0, NULL, $9, $10, NULL, 0)
                 RETURNING id",
                &[
                    DatabaseValue::String(report.title.clone()),
                    DatabaseValue::String(report.description.clone()),
                    DatabaseValue::String(report.threat_type.as_ref().to_string()),
                    DatabaseValue::Real64(report.latitude),
                    DatabaseValue::Real64(report.longitude),
                    DatabaseValue::Int64(i64::from(report.danger_radius.value())),
                    DatabaseValue::String(ReportStatus::Pending.as_ref().to_string()),
                    DatabaseValue::String(Probability::Low.as_ref().to_string()),
                    DatabaseValue::Int64(report.author_id),
                    DatabaseValue::String(encode_time(report.created_at)),
                ],
            )
            .await?;

        let row = rows.first().ok_or_else(|| DbError::Conversion {
            message: "Failed to get report id from insert".to_string(),
        })?;

        let id: i64 = row.to_value("id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse report id: {e}"),
        })?;

        Ok(report.into_row(id))
    }

    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, DbError> {
        let rows = self
            .db
            .query_raw_params(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"),
                &[DatabaseValue::Int64(id)],
            )
            .await?;

        rows.first().map(parse_report).transpose()
    }

    async fn query_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, DbError> {
        let (where_sql, params) = build_report_where(filter);
        let sql = format!("SELECT {REPORT_COLUMNS} FROM reports{where_sql} ORDER BY id");
        let rows = self.db.query_raw_params(&sql, &params).await?;

        rows.iter().map(parse_report).collect()
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64, DbError> {
        let (where_sql, params) = build_report_where(filter);
        let sql = format!("SELECT COUNT(*) as cnt FROM reports{where_sql}");
        let rows = self.db.query_raw_params(&sql, &params).await?;

        let count: i64 = rows.first().map_or(0, |r| r.to_value("cnt").unwrap_or(0));
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_report(&self, id: i64) -> Result<u64, DbError> {
        let deleted = self
            .db
            .exec_raw_params(
                "DELETE FROM reports WHERE id = $1 OR parent_id = $1",
                &[DatabaseValue::Int64(id)],
            )
            .await?;

        Ok(deleted)
    }

    async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfileRow>, DbError> {
        let rows = self
            .db
            .query_raw_params(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1"),
                &[DatabaseValue::Int64(user_id)],
            )
            .await?;

        Ok(rows.first().map(parse_profile))
    }

    async fn query_profiles(
        &self,
        filter: &ProfileFilter,
    ) -> Result<Vec<UserProfileRow>, DbError> {
        let (where_sql, params) = build_profile_where(filter);
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles{where_sql} ORDER BY user_id");
        let rows = self.db.query_raw_params(&sql, &params).await?;

        Ok(rows.iter().map(parse_profile).collect())
    }

    async fn replace_link_code(&self, code: &LinkCodeRow) -> Result<(), DbError> {
        let txn = self.db.begin_transaction().await?;

        let result = async {
            txn.exec_raw_params(
                "DELETE FROM link_codes WHERE user_id = $1",
                &[DatabaseValue::Int64(code.user_id)],
            )
            .await?;
            upsert_link_code(txn.as_ref(), code).await
        }
        .await;

        if let Err(e) = result {
            if let Err(rollback_err) = txn.rollback().await {
                log::error!("Failed to roll back link code replacement: {rollback_err}");
            }
            return Err(e);
        }

        txn.commit().await?;
        Ok(())
    }

    async fn get_link_code(&self, code: &str) -> Result<Option<LinkCodeRow>, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT code, user_id, created_at, expires_at, used
                 FROM link_codes WHERE code = $1",
                &[DatabaseValue::String(code.to_string())],
            )
            .await?;

        rows.first().map(parse_link_code).transpose()
    }

    async fn list_shelters(&self) -> Result<Vec<ShelterRow>, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT id, title, address, capacity, latitude, longitude
                 FROM shelters ORDER BY id",
                &[],
            )
            .await?;

        Ok(rows.iter().map(parse_shelter).collect())
    }

    async fn create_shelter(&self, shelter: NewShelter) -> Result<ShelterRow, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "INSERT INTO shelters (title, address, capacity, latitude, longitude)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
                &[
                    DatabaseValue::String(shelter.title.clone()),
                    DatabaseValue::String(shelter.address.clone()),
                    DatabaseValue::Int64(shelter.capacity),
                    DatabaseValue::Real64(shelter.latitude),
                    DatabaseValue::Real64(shelter.longitude),
                ],
            )
            .await?;

        let id: i64 = rows
            .first()
            .ok_or_else(|| DbError::Conversion {
                message: "Failed to get shelter id from insert".to_string(),
            })?
            .to_value("id")
            .map_err(|e| DbError::Conversion {
                message: format!("Failed to parse shelter id: {e}"),
            })?;

        Ok(ShelterRow {
            id,
            title: shelter.title,
            address: shelter.address,
            capacity: shelter.capacity,
            latitude: shelter.latitude,
            longitude: shelter.longitude,
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_transaction().await?;

        if let Err(e) = write_batch(txn.as_ref(), &batch).await {
            if let Err(rollback_err) = txn.rollback().await {
                log::error!("Failed to roll back write batch: {rollback_err}");
            }
            return Err(e);
        }

        txn.commit().await?;
        Ok(())
    }
}
