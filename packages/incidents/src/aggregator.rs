//! Clustering and escalation of fresh reports.
//!
//! Runs exactly once per report, right after it is stored, while the
//! caller holds the lock of the report's threat type. A report either
//! joins an existing incident, completes a pending cluster (becoming its
//! root), or stays as it is.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use skyguard_database::{DbError, Storage};
use skyguard_database_models::{ParentFilter, ReportFilter, ReportRow, WriteBatch};
use skyguard_threat_models::{Probability, ReportStatus};
use skyguard_users::trust::TrustStore;

const fn default_attach_radius_km() -> f64 {
    2.0
}

const fn default_window_minutes() -> i64 {
    120
}

const fn default_min_cluster_authors() -> usize {
    5
}

/// Clustering thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Reports at most this far apart may describe the same event.
    #[serde(default = "default_attach_radius_km")]
    pub attach_radius_km: f64,

    /// Only reports newer than this many minutes are considered.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Distinct reporters needed to escalate a pending cluster.
    #[serde(default = "default_min_cluster_authors")]
    pub min_cluster_authors: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            attach_radius_km: default_attach_radius_km(),
            window_minutes: default_window_minutes(),
            min_cluster_authors: default_min_cluster_authors(),
        }
    }
}

impl AggregationSettings {
    /// Earliest creation time still inside the window at `now`.
    #[must_use]
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.window_minutes)
    }
}

/// What happened to a report during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Joined the incident rooted at `root_id`.
    Attached {
        /// Root the report now belongs to.
        root_id: i64,
    },
    /// Became the root of a new incident with `members` reports.
    Promoted {
        /// Number of reports in the new cluster, root included.
        members: usize,
    },
    /// Left as an independent pending report.
    Unchanged,
}

/// Keeps the reports within `radius_km` of `origin` and orders them by
/// distance, then by id.
#[must_use]
pub fn rank_by_distance(
    origin: (f64, f64),
    candidates: Vec<ReportRow>,
    radius_km: f64,
) -> Vec<(f64, ReportRow)> {
    let mut ranked: Vec<(f64, ReportRow)> = candidates
        .into_iter()
        .map(|r| {
            let d = skyguard_spatial::distance_km(origin.0, origin.1, r.latitude, r.longitude);
            (d, r)
        })
        .filter(|(d, _)| *d <= radius_km)
        .collect();

    ranked.sort_by(|(da, a), (db, b)| da.total_cmp(db).then(a.id.cmp(&b.id)));
    ranked
}

/// Builds a cluster around `seed` from ranked candidates, admitting at most
/// one report per author. `seed` is always the first member.
#[must_use]
pub fn select_cluster_members(seed: &ReportRow, ranked: Vec<(f64, ReportRow)>) -> Vec<ReportRow> {
    let mut authors = BTreeSet::from([seed.author_id]);
    let mut members = vec![seed.clone()];

    for (_, candidate) in ranked {
        if authors.insert(candidate.author_id) {
            members.push(candidate);
        }
    }

    members
}

/// Recomputes the aggregate fields of `root` from its children.
///
/// Authors missing from `weights` count with a neutral weight of `1.0`.
pub fn recompute(root: &mut ReportRow, children: &[ReportRow], weights: &BTreeMap<i64, f64>) {
    let weight = |author: i64| weights.get(&author).copied().unwrap_or(1.0);

    root.report_count = i64::try_from(children.len()).map_or(i64::MAX, |n| n + 1);
    root.weighted_score =
        weight(root.author_id) + children.iter().map(|c| weight(c.author_id)).sum::<f64>();
    root.probability = Probability::from_corroboration(root.weighted_score, root.report_count);
}

/// Turns the first member into an unconfirmed root positioned at the
/// members' centroid and reparents the others to it.
///
/// Returns the new root and its children. Aggregates are not computed.
#[must_use]
pub fn promote(members: Vec<ReportRow>) -> Option<(ReportRow, Vec<ReportRow>)> {
    let points: Vec<(f64, f64)> = members.iter().map(ReportRow::coordinates).collect();
    let (latitude, longitude) = skyguard_spatial::centroid(&points)?;
    let danger_radius = members.iter().map(|m| m.danger_radius).max()?;

    let mut members = members.into_iter();
    let mut root = members.next()?;
    root.status = ReportStatus::Unconfirmed;
    root.latitude = latitude;
    root.longitude = longitude;
    root.danger_radius = danger_radius;
    root.title = root.threat_type.label();
    root.parent_id = None;

    let children = members
        .map(|mut m| {
            m.parent_id = Some(root.id);
            m
        })
        .collect();

    Some((root, children))
}

/// Runs the attach-then-cluster pass for a freshly stored `report`.
///
/// # Errors
///
/// Returns [`DbError`] on storage failure. Nothing is written in that case.
pub async fn aggregate(
    storage: &dyn Storage,
    trust: &TrustStore,
    settings: &AggregationSettings,
    report: &ReportRow,
    now: DateTime<Utc>,
) -> Result<AggregationOutcome, DbError> {
    if let Some(root_id) = try_attach(storage, trust, settings, report, now).await? {
        return Ok(AggregationOutcome::Attached { root_id });
    }

    try_form_cluster(storage, trust, settings, report, now).await
}

async fn try_attach(
    storage: &dyn Storage,
    trust: &TrustStore,
    settings: &AggregationSettings,
    report: &ReportRow,
    now: DateTime<Utc>,
) -> Result<Option<i64>, DbError> {
    let incidents = storage
        .query_reports(&ReportFilter {
            threat_type: Some(report.threat_type),
            created_after: Some(settings.window_start(now)),
            statuses: vec![ReportStatus::Unconfirmed, ReportStatus::Confirmed],
            parent: ParentFilter::Root,
            exclude_id: Some(report.id),
            ..ReportFilter::default()
        })
        .await?;

    let ranked = rank_by_distance(report.coordinates(), incidents, settings.attach_radius_km);

    for (distance, mut root) in ranked {
        if root.author_id == report.author_id {
            continue;
        }

        let mut children = storage
            .query_reports(&ReportFilter {
                parent: ParentFilter::ChildOf(root.id),
                ..ReportFilter::default()
            })
            .await?;

        if children.iter().any(|c| c.author_id == report.author_id) {
            continue;
        }

        let mut child = report.clone();
        child.parent_id = Some(root.id);
        children.push(child.clone());

        let authors: Vec<i64> = std::iter::once(root.author_id)
            .chain(children.iter().map(|c| c.author_id))
            .collect();
        let weights = trust.weights(&authors).await?;
        recompute(&mut root, &children, &weights);

        let root_id = root.id;
        log::info!(
            "Report {} attached to incident {root_id} ({distance:.2} km away), now {} reports, \
             probability {}",
            report.id,
            root.report_count,
            root.probability
        );

        storage
            .commit(WriteBatch {
                reports: vec![child, root],
                ..WriteBatch::default()
            })
            .await?;

        return Ok(Some(root_id));
    }

    Ok(None)
}

async fn try_form_cluster(
    storage: &dyn Storage,
    trust: &TrustStore,
    settings: &AggregationSettings,
    report: &ReportRow,
    now: DateTime<Utc>,
) -> Result<AggregationOutcome, DbError> {
    let pending = storage
        .query_reports(&ReportFilter {
            threat_type: Some(report.threat_type),
            created_after: Some(settings.window_start(now)),
            statuses: vec![ReportStatus::Pending],
            parent: ParentFilter::Root,
            exclude_id: Some(report.id),
            ..ReportFilter::default()
        })
        .await?;

    let ranked = rank_by_distance(report.coordinates(), pending, settings.attach_radius_km);
    let members = select_cluster_members(report, ranked);

    if members.len() < settings.min_cluster_authors {
        log::debug!(
            "Report {} stays pending ({} of {} authors nearby)",
            report.id,
            members.len(),
            settings.min_cluster_authors
        );
        return Ok(AggregationOutcome::Unchanged);
    }

    let member_count = members.len();
    let Some((mut root, children)) = promote(members) else {
        return Ok(AggregationOutcome::Unchanged);
    };

    let authors: Vec<i64> = std::iter::once(root.author_id)
        .chain(children.iter().map(|c| c.author_id))
        .collect();
    let weights = trust.weights(&authors).await?;
    recompute(&mut root, &children, &weights);

    log::info!(
        "Report {} escalated to incident with {member_count} reports, probability {}",
        root.id,
        root.probability
    );

    let mut reports = children;
    reports.push(root);
    storage
        .commit(WriteBatch {
            reports,
            ..WriteBatch::default()
        })
        .await?;

    Ok(AggregationOutcome::Promoted {
        members: member_count,
    })
}

#[cfg(test)]
mod tests {
    use skyguard_database_models::NewReport;
    use skyguard_threat_models::{DangerRadius, ThreatType};

    use super::*;

    fn row(id: i64, author_id: i64, latitude: f64, longitude: f64) -> ReportRow {
        NewReport {
            title: format!("report {id}"),
            description: String::new(),
            threat_type: ThreatType::Drone,
            latitude,
            longitude,
            danger_radius: DangerRadius::Km1,
            author_id,
            created_at: Utc::now(),
        }
        .into_row(id)
    }

    #[test]
    fn ranking_orders_by_distance_then_id() {
        let origin = (50.0, 20.0);
        let ranked = rank_by_distance(
            origin,
            vec![
                row(1, 1, 50.01, 20.0),
                row(2, 2, 50.005, 20.0),
                row(3, 3, 50.005, 20.0),
                row(4, 4, 51.0, 20.0),
            ],
            2.0,
        );

        let ids: Vec<i64> = ranked.iter().map(|(_, r)| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn ranking_includes_reports_exactly_on_the_radius() {
        let origin = (0.0, 0.0);
        let candidate = row(1, 1, 1.0, 0.0);
        let exact = skyguard_spatial::distance_km(0.0, 0.0, 1.0, 0.0);
        assert_eq!(rank_by_distance(origin, vec![candidate], exact).len(), 1);
    }

    #[test]
    fn cluster_admits_one_report_per_author() {
        let seed = row(10, 1, 50.0, 20.0);
        let ranked = vec![
            (0.1, row(1, 1, 50.0, 20.0)),
            (0.2, row(2, 2, 50.0, 20.0)),
            (0.3, row(3, 2, 50.0, 20.0)),
            (0.4, row(4, 3, 50.0, 20.0)),
        ];

        let ids: Vec<i64> = select_cluster_members(&seed, ranked)
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![10, 2, 4]);
    }

    #[test]
    fn recompute_counts_root_and_children() {
        let mut root = row(1, 1, 50.0, 20.0);
        let children: Vec<_> = (2..=8).map(|i| row(i, i, 50.0, 20.0)).collect();
        let weights = BTreeMap::from([(1, 1.5), (2, 0.5)]);

        recompute(&mut root, &children, &weights);

        assert_eq!(root.report_count, 8);
        assert!((root.weighted_score - 8.0).abs() < 1e-12);
        assert_eq!(root.probability, Probability::Medium);
    }

    #[test]
    fn recompute_without_children() {
        let mut root = row(1, 1, 50.0, 20.0);
        recompute(&mut root, &[], &BTreeMap::new());
        assert_eq!(root.report_count, 1);
        assert!((root.weighted_score - 1.0).abs() < 1e-12);
        assert_eq!(root.probability, Probability::Low);
    }

    #[test]
    fn promotion_moves_root_to_centroid() {
        let mut far = row(2, 2, 50.02, 20.02);
        far.danger_radius = DangerRadius::Km5;
        let members = vec![row(1, 1, 50.0, 20.0), far, row(3, 3, 50.01, 20.01)];

        let (root, children) = promote(members).unwrap();

        assert_eq!(root.id, 1);
        assert_eq!(root.status, ReportStatus::Unconfirmed);
        assert_eq!(root.title, "DRONE");
        assert_eq!(root.danger_radius, DangerRadius::Km5);
        assert!((root.latitude - 50.01).abs() < 1e-9);
        assert!((root.longitude - 20.01).abs() < 1e-9);
        assert!(children.iter().all(|c| c.parent_id == Some(1)));
        assert!(children.iter().all(|c| c.status == ReportStatus::Pending));
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn promotion_of_nothing() {
        assert!(promote(Vec::new()).is_none());
    }
}
