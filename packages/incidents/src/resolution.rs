//! Administrator decisions on incidents.
//!
//! Confirming or rejecting a root resolves the whole cluster and adjusts
//! the trust of every contributing author in one atomic write. Broadcasts
//! run afterwards, outside the threat-type lock.

use std::collections::BTreeSet;

use chrono::Utc;
use skyguard_database_models::{ProfileChange, ProfileUpdate, ReportRow, WriteBatch};
use skyguard_threat_models::ReportStatus;

use crate::{IncidentError, IncidentService, aggregator};

/// Trust added to each author of a confirmed incident.
pub const CONFIRM_DELTA: f64 = 0.25;

/// Trust removed from each author of a rejected incident.
pub const REJECT_DELTA: f64 = -0.25;

/// Result of confirming or rejecting an incident.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    /// The root as stored after the operation.
    pub report: ReportRow,
    /// Number of reports whose status changed, root included.
    pub affected_reports: usize,
    /// Number of users reached by the follow-up broadcast.
    pub notified: usize,
}

impl IncidentService {
    /// Confirms the unconfirmed incident rooted at `root_id`.
    ///
    /// All cluster members become confirmed and every distinct author gains
    /// [`CONFIRM_DELTA`] trust. Nearby users are alerted unless the alert
    /// for this root was already sent.
    ///
    /// # Errors
    ///
    /// * [`IncidentError::NotFound`] if the report does not exist
    /// * [`IncidentError::InvalidStateTransition`] unless it is unconfirmed
    /// * [`IncidentError::Database`] on storage failure
    pub async fn confirm(&self, root_id: i64) -> Result<ResolutionOutcome, IncidentError> {
        let (root, affected_reports) = self
            .resolve(root_id, ReportStatus::Confirmed, CONFIRM_DELTA)
            .await?;

        if root.notifications_sent {
            return Ok(ResolutionOutcome {
                report: root,
                affected_reports,
                notified: 0,
            });
        }

        let notified = match self.notifier.notify_threat(&root).await {
            Ok(count) => count,
            Err(e) => {
                log::error!("Failed to alert users about incident {root_id}: {e}");
                return Ok(ResolutionOutcome {
                    report: root,
                    affected_reports,
                    notified: 0,
                });
            }
        };

        let report = self.mark_notified(&root).await?;

        Ok(ResolutionOutcome {
            report,
            affected_reports,
            notified,
        })
    }

    /// Rejects the unconfirmed incident rooted at `root_id`.
    ///
    /// All cluster members become rejected and every distinct author loses
    /// [`REJECT_DELTA`] trust. Afterwards the all-clear check runs.
    ///
    /// # Errors
    ///
    /// Same as [`IncidentService::confirm`].
    pub async fn reject(&self, root_id: i64) -> Result<ResolutionOutcome, IncidentError> {
        let (report, affected_reports) = self
            .resolve(root_id, ReportStatus::Rejected, REJECT_DELTA)
            .await?;

        let notified = self.run_all_clear().await;

        Ok(ResolutionOutcome {
            report,
            affected_reports,
            notified,
        })
    }

    /// Deletes a report. Deleting a root also deletes its children.
    /// Returns the number of deleted reports.
    ///
    /// Deleting a child recomputes the aggregates of its root. Removing a
    /// confirmed report may end the alarm, so the all-clear check runs
    /// afterwards in that case.
    ///
    /// # Errors
    ///
    /// * [`IncidentError::NotFound`] if the report does not exist
    /// * [`IncidentError::Database`] on storage failure
    pub async fn delete(&self, report_id: i64) -> Result<u64, IncidentError> {
        let threat_type = self.get_report(report_id).await?.threat_type;

        let (deleted, was_confirmed) = {
            let _guard = self.lock(threat_type).await;

            let report = self.get_report(report_id).await?;
            let deleted = self.storage.delete_report(report_id).await?;
            if deleted == 0 {
                return Err(IncidentError::NotFound { id: report_id });
            }
            if let Some(root_id) = report.parent_id {
                self.refresh_root(root_id).await?;
            }

            (deleted, report.status == ReportStatus::Confirmed)
        };

        log::info!("Deleted report {report_id} ({deleted} rows)");

        if was_confirmed {
            self.run_all_clear().await;
        }

        Ok(deleted)
    }

    /// Recomputes the aggregates of `root_id` from its remaining children.
    /// The caller holds the root's threat-type lock.
    async fn refresh_root(&self, root_id: i64) -> Result<(), IncidentError> {
        let Some(mut root) = self.storage.get_report(root_id).await? else {
            return Ok(());
        };

        let children = self.children(root_id).await?;
        let authors: Vec<i64> = std::iter::once(root.author_id)
            .chain(children.iter().map(|c| c.author_id))
            .collect();
        let weights = self.trust.weights(&authors).await?;
        aggregator::recompute(&mut root, &children, &weights);

        log::info!(
            "Incident {root_id} now has {} reports, probability {}",
            root.report_count,
            root.probability
        );
        self.storage.save_report(root).await?;

        Ok(())
    }

    async fn resolve(
        &self,
        root_id: i64,
        status: ReportStatus,
        delta: f64,
    ) -> Result<(ReportRow, usize), IncidentError> {
        let threat_type = self.get_report(root_id).await?.threat_type;
        let _guard = self.lock(threat_type).await;

        let mut root = self.get_report(root_id).await?;
        if root.status != ReportStatus::Unconfirmed {
            return Err(IncidentError::InvalidStateTransition {
                id: root_id,
                status: root.status,
            });
        }

        let now = Utc::now();
        let mut children = self.children(root_id).await?;

        root.status = status;
        root.resolved_at = Some(now);
        for child in &mut children {
            child.status = status;
            child.resolved_at = Some(now);
        }

        let authors: BTreeSet<i64> = std::iter::once(root.author_id)
            .chain(children.iter().map(|c| c.author_id))
            .collect();

        let profile_updates: Vec<ProfileUpdate> = authors
            .into_iter()
            .map(|author| ProfileUpdate::new(author, ProfileChange::AdjustRating(delta)))
            .collect();

        let affected_reports = children.len() + 1;
        let author_count = profile_updates.len();
        let mut reports = children;
        reports.push(root.clone());

        self.storage
            .commit(WriteBatch {
                reports,
                profile_updates,
                ..WriteBatch::default()
            })
            .await?;

        log::info!(
            "Incident {root_id} {status}: {affected_reports} reports, {author_count} authors \
             adjusted by {delta:+}"
        );

        Ok((root, affected_reports))
    }

    async fn mark_notified(&self, root: &ReportRow) -> Result<ReportRow, IncidentError> {
        let _guard = self.lock(root.threat_type).await;

        let Some(mut current) = self.storage.get_report(root.id).await? else {
            log::warn!("Incident {} disappeared before it was marked notified", root.id);
            return Ok(root.clone());
        };

        current.notifications_sent = true;
        self.storage.save_report(current.clone()).await?;

        Ok(current)
    }

    async fn run_all_clear(&self) -> usize {
        match self.notifier.notify_all_clear().await {
            Ok(count) => count,
            Err(e) => {
                log::error!("All-clear check failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use skyguard_database::{DbError, Storage, memory::MemoryStore};
    use skyguard_database_models::{
        LinkCodeRow, NewReport, NewShelter, ProfileFilter, ReportFilter, ShelterRow,
        UserProfileRow,
    };
    use skyguard_notify::{Notifier, NotifySettings};
    use skyguard_threat_models::ThreatType;
    use skyguard_users::trust::TrustStore;

    use crate::{AggregationSettings, NewReportInput, test_support::*};

    use super::*;

    /// Holds the next `gates` commits until that many are waiting, so every
    /// gated writer has finished its reads before any of them writes.
    struct GatedStore {
        inner: MemoryStore,
        gates: AtomicUsize,
        barrier: tokio::sync::Barrier,
    }

    impl GatedStore {
        fn new(gates: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                gates: AtomicUsize::new(0),
                barrier: tokio::sync::Barrier::new(gates),
            }
        }

        fn arm(&self, gates: usize) {
            self.gates.store(gates, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Storage for GatedStore {
        async fn create_report(&self, report: NewReport) -> Result<ReportRow, DbError> {
            self.inner.create_report(report).await
        }

        async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, DbError> {
            self.inner.get_report(id).await
        }

        async fn query_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, DbError> {
            self.inner.query_reports(filter).await
        }

        async fn count_reports(&self, filter: &ReportFilter) -> Result<u64, DbError> {
            self.inner.count_reports(filter).await
        }

        async fn delete_report(&self, id: i64) -> Result<u64, DbError> {
            self.inner.delete_report(id).await
        }

        async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfileRow>, DbError> {
            self.inner.get_profile(user_id).await
        }

        async fn query_profiles(
            &self,
            filter: &ProfileFilter,
        ) -> Result<Vec<UserProfileRow>, DbError> {
            self.inner.query_profiles(filter).await
        }

        async fn replace_link_code(&self, code: &LinkCodeRow) -> Result<(), DbError> {
            self.inner.replace_link_code(code).await
        }

        async fn get_link_code(&self, code: &str) -> Result<Option<LinkCodeRow>, DbError> {
            self.inner.get_link_code(code).await
        }

        async fn list_shelters(&self) -> Result<Vec<ShelterRow>, DbError> {
            self.inner.list_shelters().await
        }

        async fn create_shelter(&self, shelter: NewShelter) -> Result<ShelterRow, DbError> {
            self.inner.create_shelter(shelter).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<(), DbError> {
            let gated = self
                .gates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if gated {
                self.barrier.wait().await;
            }
            self.inner.commit(batch).await
        }
    }

    async fn subscribe(store: &skyguard_database::memory::MemoryStore, user_id: i64) {
        let mut profile = UserProfileRow::new(user_id);
        profile.last_latitude = Some(50.0);
        profile.last_longitude = Some(20.0);
        profile.channel_id = Some(format!("chat-{user_id}"));
        store.save_profile(profile).await.unwrap();
    }

    #[tokio::test]
    async fn confirm_resolves_cluster_and_rewards_authors() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;
        subscribe(&h.store, 500).await;

        let outcome = h.service.confirm(root.id).await.unwrap();

        assert_eq!(outcome.affected_reports, 5);
        assert_eq!(outcome.notified, 1);
        assert_eq!(outcome.report.status, ReportStatus::Confirmed);
        assert!(outcome.report.notifications_sent);
        assert!(outcome.report.resolved_at.is_some());

        for child in h.service.children(root.id).await.unwrap() {
            assert_eq!(child.status, ReportStatus::Confirmed);
        }

        let trust = TrustStore::new(h.store.clone());
        for author in 1..=5 {
            assert!((trust.rating(author).await.unwrap() - 0.25).abs() < 1e-12);
        }
        assert!(trust.rating(500).await.unwrap().abs() < 1e-12);
    }

    #[tokio::test]
    async fn confirm_with_three_children() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        // Shrink the cluster to a root with three children.
        let children = h.service.children(root.id).await.unwrap();
        h.store.delete_report(children[0].id).await.unwrap();

        let outcome = h.service.confirm(root.id).await.unwrap();
        assert_eq!(outcome.affected_reports, 4);

        let trust = TrustStore::new(h.store.clone());
        let rewarded: Vec<i64> = std::iter::once(root.author_id)
            .chain(children[1..].iter().map(|c| c.author_id))
            .collect();
        for author in rewarded {
            assert!((trust.rating(author).await.unwrap() - 0.25).abs() < 1e-12);
        }
        assert!(trust.rating(children[0].author_id).await.unwrap().abs() < 1e-12);
    }

    #[tokio::test]
    async fn second_confirm_fails_without_double_reward() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        h.service.confirm(root.id).await.unwrap();
        let err = h.service.confirm(root.id).await.unwrap_err();

        assert!(matches!(
            err,
            IncidentError::InvalidStateTransition {
                status: ReportStatus::Confirmed,
                ..
            }
        ));
        let trust = TrustStore::new(h.store.clone());
        assert!((trust.rating(root.author_id).await.unwrap() - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn reject_penalizes_authors() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;

        let outcome = h.service.reject(root.id).await.unwrap();

        assert_eq!(outcome.report.status, ReportStatus::Rejected);
        assert_eq!(outcome.affected_reports, 5);
        let trust = TrustStore::new(h.store.clone());
        for author in 1..=5 {
            assert!((trust.rating(author).await.unwrap() + 0.25).abs() < 1e-12);
        }
        assert!(h.service.confirm(root.id).await.is_err());
    }

    #[tokio::test]
    async fn missing_and_pending_reports_cannot_be_resolved() {
        let h = harness();
        assert!(matches!(
            h.service.confirm(404).await.unwrap_err(),
            IncidentError::NotFound { id: 404 }
        ));

        let pending = h.service.create_report(1, drone_at(50.0)).await.unwrap();
        assert!(matches!(
            h.service.reject(pending.id).await.unwrap_err(),
            IncidentError::InvalidStateTransition {
                status: ReportStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn all_clear_after_last_confirmed_incident_is_rejected() {
        let h = harness();
        let first = promoted_cluster(&h.service, 1).await;
        subscribe(&h.store, 500).await;
        h.service.confirm(first.id).await.unwrap();
        let alerts = h.sender.count();

        // A second incident elsewhere, rejected while the first is still
        // confirmed: no all-clear yet.
        let mut second = Vec::new();
        for i in 0..5 {
            let lat = 0.001f64.mul_add(f64::from(i), 51.0);
            second.push(h.service.create_report(10 + i64::from(i), drone_at(lat)).await.unwrap());
        }
        let second_root = second.last().unwrap().clone();
        assert_eq!(second_root.status, ReportStatus::Unconfirmed);

        let outcome = h.service.reject(second_root.id).await.unwrap();
        assert_eq!(outcome.notified, 0);
        assert_eq!(h.sender.count(), alerts);

        // Removing the confirmed incident ends the alarm.
        assert_eq!(h.service.delete(first.id).await.unwrap(), 5);
        assert_eq!(h.sender.count(), alerts + 1);
        let (_, message) = h.sender.sent.lock().unwrap().last().unwrap().clone();
        assert!(message.contains("ALARM ODWOŁANY"));
    }

    #[tokio::test]
    async fn rejecting_with_no_confirmed_reports_broadcasts_all_clear() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;
        subscribe(&h.store, 500).await;
        subscribe(&h.store, 501).await;

        let outcome = h.service.reject(root.id).await.unwrap();
        assert_eq!(outcome.notified, 2);
    }

    #[tokio::test]
    async fn concurrent_confirms_reward_shared_authors_twice() {
        let store = Arc::new(GatedStore::new(2));
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            Arc::new(RecordingSender::default()),
            NotifySettings::default(),
        ));
        let service = IncidentService::new(store.clone(), notifier, AggregationSettings::default());

        let drones = promoted_cluster(&service, 1).await;
        let mut rockets = None;
        for i in 0..5 {
            let input = NewReportInput {
                threat_type: Some("rocket".to_string()),
                ..drone_at(0.001f64.mul_add(f64::from(i), 50.0))
            };
            rockets = Some(service.create_report(1 + i64::from(i), input).await.unwrap());
        }
        let rockets = rockets.unwrap();
        assert_eq!(rockets.status, ReportStatus::Unconfirmed);

        store.arm(2);
        let (first, second) = tokio::join!(service.confirm(drones.id), service.confirm(rockets.id));
        first.unwrap();
        second.unwrap();

        let trust = TrustStore::new(store.clone());
        for author in 1..=5 {
            let rating = trust.rating(author).await.unwrap();
            assert!((rating - 0.5).abs() < 1e-12, "author {author}: {rating}");
        }
    }

    #[tokio::test]
    async fn deleting_a_child_recomputes_its_root() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;
        assert_eq!(root.report_count, 5);
        let before = root.weighted_score;

        let children = h.service.children(root.id).await.unwrap();
        assert_eq!(h.service.delete(children[0].id).await.unwrap(), 1);

        let root = h.service.get_report(root.id).await.unwrap();
        assert_eq!(root.report_count, 4);
        assert_eq!(h.service.children(root.id).await.unwrap().len(), 3);
        assert!((before - root.weighted_score - 1.0).abs() < 1e-12);
        assert_eq!(
            root.probability,
            skyguard_threat_models::Probability::from_corroboration(root.weighted_score, 4)
        );

        let listed = h.service.list_incidents(crate::IncidentQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].report_count, 4);
    }

    #[tokio::test]
    async fn delete_sees_confirmation_that_lands_while_waiting_for_the_lock() {
        let h = harness();
        let root = promoted_cluster(&h.service, 1).await;
        subscribe(&h.store, 500).await;

        let guard = h.service.lock(ThreatType::Drone).await;
        let delete = h.service.delete(root.id);
        let confirm_meanwhile = async {
            tokio::task::yield_now().await;
            let mut current = h.store.get_report(root.id).await.unwrap().unwrap();
            current.status = ReportStatus::Confirmed;
            h.store.save_report(current).await.unwrap();
            drop(guard);
        };

        let (deleted, ()) = tokio::join!(delete, confirm_meanwhile);
        assert_eq!(deleted.unwrap(), 5);

        assert_eq!(h.sender.count(), 1);
        let (_, message) = h.sender.sent.lock().unwrap().last().unwrap().clone();
        assert!(message.contains("ALARM ODWOŁANY"));
    }

    #[tokio::test]
    async fn delete_unknown_report() {
        let h = harness();
        assert!(matches!(
            h.service.delete(7).await.unwrap_err(),
            IncidentError::NotFound { id: 7 }
        ));
    }
}
