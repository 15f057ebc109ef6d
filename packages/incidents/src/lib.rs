#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident engine.
//!
//! [`IncidentService`] owns the report lifecycle: it validates and stores
//! new sightings, clusters them into incidents ([`aggregator`]), and
//! applies administrator decisions ([`resolution`]).
//!
//! Every cluster decision for one threat type runs under that type's lock,
//! so two concurrent reports can never promote the same cluster twice and
//! a resolution never races an attach onto the same root. Notification
//! fan-out happens after the lock is released.

pub mod aggregator;
pub mod resolution;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skyguard_database::{DbError, Storage};
use skyguard_database_models::{NewReport, ParentFilter, ReportFilter, ReportRow};
use skyguard_notify::Notifier;
use skyguard_threat_models::{DangerRadius, Probability, ReportStatus, ThreatType};
use skyguard_users::trust::TrustStore;
use tokio::sync::{Mutex, MutexGuard};

pub use aggregator::{AggregationOutcome, AggregationSettings};
pub use resolution::ResolutionOutcome;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Errors from incident operations.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    /// Submitted data is invalid.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field as named in requests.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The report is not in a state that allows the operation.
    #[error("Report {id} is already {status}")]
    InvalidStateTransition {
        /// Report id.
        id: i64,
        /// Its current status.
        status: ReportStatus,
    },

    /// No report with this id exists.
    #[error("Report {id} not found")]
    NotFound {
        /// Requested id.
        id: i64,
    },

    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DbError),
}

impl IncidentError {
    fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Unvalidated fields of a new report as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewReportInput {
    /// Optional title; defaults to the upper-cased threat label.
    pub title: Option<String>,
    /// Optional free text.
    pub description: Option<String>,
    /// Required latitude.
    pub latitude: Option<f64>,
    /// Required longitude.
    pub longitude: Option<f64>,
    /// Required threat type name.
    pub threat_type: Option<String>,
    /// Optional danger radius in km.
    pub danger_radius: Option<i64>,
}

impl NewReportInput {
    /// Checks every field and builds the report to store.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentError::Validation`] naming the first bad field.
    pub fn validate(
        self,
        author_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<NewReport, IncidentError> {
        let latitude = self
            .latitude
            .ok_or_else(|| IncidentError::validation("latitude", "is required"))?;
        let longitude = self
            .longitude
            .ok_or_else(|| IncidentError::validation("longitude", "is required"))?;
        skyguard_spatial::validate_coordinates(latitude, longitude)
            .map_err(|e| IncidentError::validation(e.field.name(), e.to_string()))?;

        let threat_type = self
            .threat_type
            .ok_or_else(|| IncidentError::validation("threatType", "is required"))?;
        let threat_type = threat_type.trim().parse::<ThreatType>().map_err(|_| {
            IncidentError::validation("threatType", format!("unknown threat type '{threat_type}'"))
        })?;

        let danger_radius = match self.danger_radius {
            None => DangerRadius::default(),
            Some(value) => u8::try_from(value)
                .ok()
                .and_then(|v| DangerRadius::from_value(v).ok())
                .ok_or_else(|| {
                    IncidentError::validation(
                        "dangerRadius",
                        format!("{value} is not one of 1, 2, 3, 5, 10"),
                    )
                })?,
        };

        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| threat_type.label());
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(IncidentError::validation(
                "title",
                format!("must be at most {MAX_TITLE_LEN} characters"),
            ));
        }

        Ok(NewReport {
            title,
            description: self.description.unwrap_or_default(),
            threat_type,
            latitude,
            longitude,
            danger_radius,
            author_id,
            created_at,
        })
    }
}

/// Filters for the public incident list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncidentQuery {
    /// Only incidents in this status. Statuses that are not incident
    /// statuses are ignored.
    pub status: Option<ReportStatus>,
    /// Only incidents with this probability.
    pub probability: Option<Probability>,
    /// Only incidents of this type.
    pub threat_type: Option<ThreatType>,
}

/// Report lifecycle service.
pub struct IncidentService {
    storage: Arc<dyn Storage>,
    trust: TrustStore,
    notifier: Arc<Notifier>,
    settings: AggregationSettings,
    locks: Vec<Mutex<()>>,
}

impl IncidentService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<Notifier>,
        settings: AggregationSettings,
    ) -> Self {
        Self {
            trust: TrustStore::new(storage.clone()),
            storage,
            notifier,
            settings,
            locks: ThreatType::all().iter().map(|_| Mutex::new(())).collect(),
        }
    }

    /// Active clustering thresholds.
    #[must_use]
    pub const fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    async fn lock(&self, threat_type: ThreatType) -> MutexGuard<'_, ()> {
        self.locks[threat_type as usize].lock().await
    }

    /// Validates and stores a report from `author_id`, then runs the
    /// aggregation pass for it. Returns the report as stored afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentError::Validation`] for bad input, or
    /// [`IncidentError::Database`] on storage failure.
    pub async fn create_report(
        &self,
        author_id: i64,
        input: NewReportInput,
    ) -> Result<ReportRow, IncidentError> {
        let now = Utc::now();
        let new_report = input.validate(author_id, now)?;

        let _guard = self.lock(new_report.threat_type).await;

        let report = self.storage.create_report(new_report).await?;
        log::info!(
            "Stored {} report {} from user {author_id}",
            report.threat_type,
            report.id
        );

        let outcome =
            aggregator::aggregate(self.storage.as_ref(), &self.trust, &self.settings, &report, now)
                .await?;
        log::debug!("Aggregation of report {}: {outcome:?}", report.id);

        self.storage
            .get_report(report.id)
            .await?
            .ok_or(IncidentError::NotFound { id: report.id })
    }

    /// Fetches one report.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentError::NotFound`] if it does not exist.
    pub async fn get_report(&self, id: i64) -> Result<ReportRow, IncidentError> {
        self.storage
            .get_report(id)
            .await?
            .ok_or(IncidentError::NotFound { id })
    }

    /// Direct children of `root_id`.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentError::Database`] on storage failure.
    pub async fn children(&self, root_id: i64) -> Result<Vec<ReportRow>, IncidentError> {
        Ok(self
            .storage
            .query_reports(&ReportFilter {
                parent: ParentFilter::ChildOf(root_id),
                ..ReportFilter::default()
            })
            .await?)
    }

    /// Publicly listed incidents: parentless reports that are unconfirmed
    /// or confirmed, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentError::Database`] on storage failure.
    pub async fn list_incidents(
        &self,
        query: IncidentQuery,
    ) -> Result<Vec<ReportRow>, IncidentError> {
        let statuses = match query.status {
            Some(status) if status.is_incident() => vec![status],
            _ => vec![ReportStatus::Unconfirmed, ReportStatus::Confirmed],
        };

        let mut incidents = self
            .storage
            .query_reports(&ReportFilter {
                threat_type: query.threat_type,
                statuses,
                parent: ParentFilter::Root,
                probability: query.probability,
                ..ReportFilter::default()
            })
            .await?;

        incidents.reverse();
        Ok(incidents)
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::test_support::*;
    use super::*;

    #[test]
    fn validation_requires_coordinates_and_type() {
        let now = Utc::now();
        let err = NewReportInput::default().validate(1, now).unwrap_err();
        assert!(matches!(err, IncidentError::Validation { field: "latitude", .. }));

        let err = NewReportInput {
            latitude: Some(50.0),
            longitude: Some(200.0),
            threat_type: Some("drone".to_string()),
            ..NewReportInput::default()
        }
        .validate(1, now)
        .unwrap_err();
        assert!(matches!(err, IncidentError::Validation { field: "longitude", .. }));

        let err = NewReportInput {
            threat_type: Some("ufo".to_string()),
            ..drone_at(50.0)
        }
        .validate(1, now)
        .unwrap_err();
        assert!(matches!(err, IncidentError::Validation { field: "threatType", .. }));
    }

    #[test]
    fn validation_applies_defaults() {
        let report = drone_at(50.0).validate(9, Utc::now()).unwrap();
        assert_eq!(report.title, "DRONE");
        assert_eq!(report.danger_radius, DangerRadius::Km1);
        assert_eq!(report.author_id, 9);
        assert!(report.description.is_empty());
    }

    #[test]
    fn validation_rejects_bad_radius_and_long_title() {
        let err = NewReportInput {
            danger_radius: Some(4),
            ..drone_at(50.0)
        }
        .validate(1, Utc::now())
        .unwrap_err();
        assert!(matches!(err, IncidentError::Validation { field: "dangerRadius", .. }));

        let err = NewReportInput {
            title: Some("x".repeat(MAX_TITLE_LEN + 1)),
            ..drone_at(50.0)
        }
        .validate(1, Utc::now())
        .unwrap_err();
        assert!(matches!(err, IncidentError::Validation { field: "title", .. }));
    }

    #[tokio::test]
    async fn four_authors_stay_pending_fifth_promotes() {
        let h = harness();

        for i in 0..4 {
            let lat = 0.001f64.mul_add(f64::from(i), 50.0);
            let report = h
                .service
                .create_report(i64::from(i) + 1, drone_at(lat))
                .await
                .unwrap();
            assert_eq!(report.status, ReportStatus::Pending);
            assert!(report.parent_id.is_none());
        }

        let root = h.service.create_report(5, drone_at(50.004)).await.unwrap();

        assert_eq!(root.status, ReportStatus::Unconfirmed);
        assert_eq!(root.report_count, 5);
        assert!((root.weighted_score - 5.0).abs() < 1e-12);
        assert_eq!(root.probability, Probability::Low);
        assert_eq!(root.title, "DRONE");
        assert!((root.latitude - 50.002).abs() < 1e-9);

        let children = h.service.children(root.id).await.unwrap();
        assert_eq!(children.len(), 4);
        assert!(children.iter().all(|c| c.parent_id == Some(root.id)));
        assert_eq!(root.report_count, 1 + children.len() as i64);

        let listed = h.service.list_incidents(IncidentQuery::default()).await.unwrap();
        assert_eq!(listed, vec![root]);
    }

    #[tokio::test]
    async fn same_author_never_counts_twice() {
        let h = harness();

        for i in 0..6 {
            let lat = 0.001f64.mul_add(f64::from(i), 50.0);
            let report = h.service.create_report(1, drone_at(lat)).await.unwrap();
            assert_eq!(report.status, ReportStatus::Pending);
        }
        for author in 2..=4 {
            h.service.create_report(author, drone_at(50.0)).await.unwrap();
        }

        assert!(h.service.list_incidents(IncidentQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_author_one_km_apart_does_not_attach() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        // Author 1 already contributed the first report of the cluster.
        let again = h.service.create_report(1, drone_at(50.009)).await.unwrap();
        assert!(again.parent_id.is_none());
        assert_eq!(again.status, ReportStatus::Pending);

        // The root's own author cannot attach either.
        let root_again = h
            .service
            .create_report(root.author_id, drone_at(50.0))
            .await
            .unwrap();
        assert!(root_again.parent_id.is_none());

        let root = h.service.get_report(root.id).await.unwrap();
        assert_eq!(root.report_count, 5);
    }

    #[tokio::test]
    async fn new_author_attaches_and_recomputes() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        let trust = TrustStore::new(h.store.clone());
        trust.adjust(42, 5.0).await.unwrap();

        let child = h.service.create_report(42, drone_at(50.01)).await.unwrap();
        assert_eq!(child.parent_id, Some(root.id));

        let root = h.service.get_report(root.id).await.unwrap();
        assert_eq!(root.report_count, 6);
        assert!((root.weighted_score - 6.5).abs() < 1e-12);
        assert_eq!(root.probability, Probability::Medium);
    }

    #[tokio::test]
    async fn attach_prefers_nearest_incident() {
        let h = harness();
        let west = promoted_cluster(&h.service, 1).await;

        // Second incident ~1.4 km east of the first.
        let mut east = h
            .store
            .create_report(NewReport {
                title: "DRONE".to_string(),
                description: String::new(),
                threat_type: ThreatType::Drone,
                latitude: 50.002,
                longitude: 20.02,
                danger_radius: DangerRadius::Km1,
                author_id: 99,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        east.status = ReportStatus::Unconfirmed;
        h.store.save_report(east.clone()).await.unwrap();

        let near_east = h
            .service
            .create_report(
                100,
                NewReportInput {
                    longitude: Some(20.018),
                    ..drone_at(50.002)
                },
            )
            .await
            .unwrap();
        assert_eq!(near_east.parent_id, Some(east.id));

        let near_west = h.service.create_report(101, drone_at(50.002)).await.unwrap();
        assert_eq!(near_west.parent_id, Some(west.id));
    }

    #[tokio::test]
    async fn stale_and_other_type_reports_are_ignored() {
        let h = harness();
        let old = Utc::now() - Duration::hours(3);

        for author in 1..=4 {
            let report = drone_at(50.0).validate(author, old).unwrap();
            h.store.create_report(report).await.unwrap();
        }
        for author in 5..=8 {
            h.service
                .create_report(
                    author,
                    NewReportInput {
                        threat_type: Some("rocket".to_string()),
                        ..drone_at(50.0)
                    },
                )
                .await
                .unwrap();
        }

        let report = h.service.create_report(9, drone_at(50.0)).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn list_filters_ignore_non_incident_status() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        let pending_only = IncidentQuery {
            status: Some(ReportStatus::Pending),
            ..IncidentQuery::default()
        };
        assert_eq!(h.service.list_incidents(pending_only).await.unwrap(), vec![root.clone()]);

        let confirmed_only = IncidentQuery {
            status: Some(ReportStatus::Confirmed),
            ..IncidentQuery::default()
        };
        assert!(h.service.list_incidents(confirmed_only).await.unwrap().is_empty());

        let rockets = IncidentQuery {
            threat_type: Some(ThreatType::Rocket),
            ..IncidentQuery::default()
        };
        assert!(h.service.list_incidents(rockets).await.unwrap().is_empty());

        let low = IncidentQuery {
            probability: Some(Probability::Low),
            ..IncidentQuery::default()
        };
        assert_eq!(h.service.list_incidents(low).await.unwrap(), vec![root]);
    }

    #[tokio::test]
    async fn concurrent_reports_promote_once() {
        let h = harness();
        let service = Arc::new(h.service);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let lat = 0.0005f64.mul_add(f64::from(i), 50.0);
                    service.create_report(i64::from(i) + 1, drone_at(lat)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let incidents = service.list_incidents(IncidentQuery::default()).await.unwrap();
        assert_eq!(incidents.len(), 1);
        let root = &incidents[0];
        let children = service.children(root.id).await.unwrap();
        assert_eq!(root.report_count, 10);
        assert_eq!(children.len(), 9);
    }
}
