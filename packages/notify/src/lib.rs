#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Alert fan-out.
//!
//! The [`Notifier`] selects recipients from stored profiles and hands each
//! message to a [`NotificationSender`]. Deliveries run concurrently with a
//! bounded fan-out and a per-delivery timeout. A failed or timed-out
//! delivery is logged and counted as not delivered; it never aborts the
//! rest of the broadcast.

pub mod messages;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt as _, stream};
use serde::{Deserialize, Serialize};
use skyguard_database::{DbError, Storage};
use skyguard_database_models::{ProfileFilter, ReportFilter, ReportRow};
use skyguard_threat_models::ReportStatus;

/// Delivers a text message to an external channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends `message` to `channel_id`. Returns whether the transport
    /// accepted it.
    async fn send(&self, channel_id: &str, message: &str) -> bool;
}

const fn default_alert_radius_km() -> f64 {
    30.0
}

const fn default_concurrency() -> usize {
    16
}

const fn default_delivery_timeout_secs() -> u64 {
    10
}

/// Notification tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Users at most this far from a confirmed incident are alerted.
    #[serde(default = "default_alert_radius_km")]
    pub alert_radius_km: f64,

    /// Maximum number of deliveries in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-delivery timeout in seconds.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            alert_radius_km: default_alert_radius_km(),
            concurrency: default_concurrency(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

/// Resets the all-clear flag when the evaluation ends, even on error.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Threat and all-clear broadcaster.
pub struct Notifier {
    storage: Arc<dyn Storage>,
    sender: Arc<dyn NotificationSender>,
    settings: NotifySettings,
    all_clear_in_flight: AtomicBool,
}

impl Notifier {
    /// Creates a notifier reading profiles from `storage` and delivering
    /// through `sender`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        sender: Arc<dyn NotificationSender>,
        settings: NotifySettings,
    ) -> Self {
        Self {
            storage,
            sender,
            settings,
            all_clear_in_flight: AtomicBool::new(false),
        }
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &NotifySettings {
        &self.settings
    }

    /// Alerts every reachable user within the alert radius of `report`.
    /// Returns the number of successful deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if recipients cannot be loaded. Delivery
    /// failures are not errors.
    pub async fn notify_threat(&self, report: &ReportRow) -> Result<usize, DbError> {
        let profiles = self
            .storage
            .query_profiles(&ProfileFilter::reachable_with_location())
            .await?;

        let deliveries: Vec<(String, String)> = profiles
            .iter()
            .filter_map(|profile| {
                let (lat, lon) = profile.location()?;
                let channel = profile.channel()?;
                let distance =
                    skyguard_spatial::distance_km(lat, lon, report.latitude, report.longitude);
                (distance <= self.settings.alert_radius_km).then(|| {
                    (
                        channel.to_string(),
                        messages::threat_alert(report.threat_type, &report.title, distance),
                    )
                })
            })
            .collect();

        log::info!(
            "Alerting {} of {} reachable users about report {}",
            deliveries.len(),
            profiles.len(),
            report.id
        );

        let delivered = self.deliver(deliveries).await;
        log::info!("Threat alert for report {} delivered to {delivered} users", report.id);

        Ok(delivered)
    }

    /// Broadcasts the all-clear message if no confirmed report remains.
    ///
    /// Only one evaluation runs at a time per notifier. A call made while
    /// another is in flight returns `0` immediately. Returns the number of
    /// successful deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if reports or recipients cannot be loaded.
    pub async fn notify_all_clear(&self) -> Result<usize, DbError> {
        if self
            .all_clear_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("All-clear check already in flight, skipping");
            return Ok(0);
        }
        let _guard = InFlight(&self.all_clear_in_flight);

        let confirmed = self
            .storage
            .count_reports(&ReportFilter {
                statuses: vec![ReportStatus::Confirmed],
                ..ReportFilter::default()
            })
            .await?;

        if confirmed > 0 {
            log::debug!("{confirmed} confirmed reports remain, no all-clear");
            return Ok(0);
        }

        let deliveries: Vec<(String, String)> = self
            .storage
            .query_profiles(&ProfileFilter::reachable())
            .await?
            .iter()
            .filter_map(|p| p.channel().map(str::to_string))
            .map(|channel| (channel, messages::all_clear().to_string()))
            .collect();

        log::info!("Broadcasting all-clear to {} users", deliveries.len());
        let delivered = self.deliver(deliveries).await;
        log::info!("All-clear delivered to {delivered} users");

        Ok(delivered)
    }

    async fn deliver(&self, deliveries: Vec<(String, String)>) -> usize {
        let timeout = Duration::from_secs(self.settings.delivery_timeout_secs);
        let sender = &self.sender;

        let results: Vec<bool> = stream::iter(deliveries.into_iter().map(
            |(channel, message)| async move {
                match tokio::time::timeout(timeout, sender.send(&channel, &message)).await {
                    Ok(true) => true,
                    Ok(false) => {
                        log::warn!("Delivery to {channel} failed");
                        false
                    }
                    Err(_) => {
                        log::warn!("Delivery to {channel} timed out after {timeout:?}");
                        false
                    }
                }
            },
        ))
        .buffer_unordered(self.settings.concurrency.max(1))
        .collect()
        .await;

        results.into_iter().filter(|ok| *ok).count()
    }
}
