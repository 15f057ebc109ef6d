#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aerial threat taxonomy and report lifecycle types.
//!
//! This crate defines the canonical enums shared by every layer of the
//! `SkyGuard` system: the kind of threat a sighting describes, the fixed set
//! of danger radii a reporter may pick, the lifecycle status of a report and
//! the derived confidence (probability) of a corroborated incident.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Weighted corroboration score at which an incident becomes
/// [`Probability::High`].
pub const HIGH_WEIGHTED_SCORE: f64 = 10.0;

/// Report count at which an incident becomes [`Probability::High`].
pub const HIGH_REPORT_COUNT: i64 = 15;

/// Weighted corroboration score at which an incident becomes
/// [`Probability::Medium`].
pub const MEDIUM_WEIGHTED_SCORE: f64 = 6.0;

/// Report count at which an incident becomes [`Probability::Medium`].
pub const MEDIUM_REPORT_COUNT: i64 = 8;

/// The kind of aerial threat a sighting describes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ThreatType {
    /// Unmanned aerial vehicle
    Drone,
    /// Rocket or missile
    Rocket,
    /// Fixed-wing aircraft
    Plane,
    /// Rotary-wing aircraft
    Helicopter,
    /// Audible or visible explosion
    Explosion,
    /// Anything that doesn't fit the other types
    Other,
}

impl ThreatType {
    /// Upper-cased label used as the title of a cluster root
    /// (e.g. `"DRONE"`).
    #[must_use]
    pub fn label(self) -> String {
        self.as_ref().to_uppercase()
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Drone,
            Self::Rocket,
            Self::Plane,
            Self::Helicopter,
            Self::Explosion,
            Self::Other,
        ]
    }
}

/// Danger radius chosen by the reporter, in kilometers.
///
/// Only the fixed set {1, 2, 3, 5, 10} is allowed. Serialized as the bare
/// integer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum DangerRadius {
    /// 1 km
    #[default]
    Km1 = 1,
    /// 2 km
    Km2 = 2,
    /// 3 km
    Km3 = 3,
    /// 5 km
    Km5 = 5,
    /// 10 km
    Km10 = 10,
}

impl DangerRadius {
    /// Returns the radius in whole kilometers.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Creates a danger radius from a kilometer value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not one of 1, 2, 3, 5 or 10.
    pub const fn from_value(value: u8) -> Result<Self, InvalidDangerRadiusError> {
        match value {
            1 => Ok(Self::Km1),
            2 => Ok(Self::Km2),
            3 => Ok(Self::Km3),
            5 => Ok(Self::Km5),
            10 => Ok(Self::Km10),
            _ => Err(InvalidDangerRadiusError { value }),
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Km1, Self::Km2, Self::Km3, Self::Km5, Self::Km10]
    }
}

impl TryFrom<u8> for DangerRadius {
    type Error = InvalidDangerRadiusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<DangerRadius> for u8 {
    fn from(radius: DangerRadius) -> Self {
        radius.value()
    }
}

/// Error returned when attempting to create a [`DangerRadius`] from a value
/// outside the allowed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDangerRadiusError {
    /// The rejected radius value.
    pub value: u8,
}

impl std::fmt::Display for InvalidDangerRadiusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid danger radius {}: expected one of 1, 2, 3, 5, 10",
            self.value
        )
    }
}

impl std::error::Error for InvalidDangerRadiusError {}

/// Lifecycle status of a report.
///
/// ```text
/// pending ──(cluster reaches quorum)──> unconfirmed ──confirm──> confirmed
///                                            └───────reject────> rejected
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportStatus {
    /// Freshly submitted, not yet corroborated
    #[default]
    Pending,
    /// Corroborated by enough reporters, awaiting review
    Unconfirmed,
    /// Confirmed by an administrator
    Confirmed,
    /// Rejected by an administrator
    Rejected,
}

impl ReportStatus {
    /// Whether a parentless report in this status is a publicly listed
    /// incident.
    #[must_use]
    pub const fn is_incident(self) -> bool {
        matches!(self, Self::Unconfirmed | Self::Confirmed)
    }

    /// Whether an administrator has resolved the report.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Pending,
            Self::Unconfirmed,
            Self::Confirmed,
            Self::Rejected,
        ]
    }
}

/// Confidence that an incident is real, derived from corroboration.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Probability {
    /// Few or low-trust reporters
    #[default]
    Low,
    /// Moderate corroboration
    Medium,
    /// Strong corroboration
    High,
}

impl Probability {
    /// Derives the probability of a cluster from its trust-weighted score
    /// and its raw report count. Either signal alone can raise the level.
    #[must_use]
    pub fn from_corroboration(weighted_score: f64, report_count: i64) -> Self {
        if weighted_score >= HIGH_WEIGHTED_SCORE || report_count >= HIGH_REPORT_COUNT {
            Self::High
        } else if weighted_score >= MEDIUM_WEIGHTED_SCORE || report_count >= MEDIUM_REPORT_COUNT {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_type_parses_case_insensitively() {
        assert_eq!("drone".parse::<ThreatType>().unwrap(), ThreatType::Drone);
        assert_eq!("Rocket".parse::<ThreatType>().unwrap(), ThreatType::Rocket);
        assert!("ufo".parse::<ThreatType>().is_err());
    }

    #[test]
    fn threat_label_is_upper_case() {
        assert_eq!(ThreatType::Helicopter.label(), "HELICOPTER");
        assert_eq!(ThreatType::Drone.label(), "DRONE");
    }

    #[test]
    fn danger_radius_accepts_only_fixed_set() {
        for radius in DangerRadius::all() {
            assert_eq!(DangerRadius::from_value(radius.value()).unwrap(), *radius);
        }
        for bad in [0u8, 4, 6, 7, 11, 255] {
            assert!(DangerRadius::from_value(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn danger_radius_serializes_as_integer() {
        let json = serde_json::to_string(&DangerRadius::Km5).unwrap();
        assert_eq!(json, "5");
        let parsed: DangerRadius = serde_json::from_str("10").unwrap();
        assert_eq!(parsed, DangerRadius::Km10);
        assert!(serde_json::from_str::<DangerRadius>("4").is_err());
    }

    #[test]
    fn only_unconfirmed_and_confirmed_are_incidents() {
        let incidents: Vec<_> = ReportStatus::all()
            .iter()
            .filter(|s| s.is_incident())
            .collect();
        assert_eq!(
            incidents,
            vec![&ReportStatus::Unconfirmed, &ReportStatus::Confirmed]
        );
    }

    #[test]
    fn probability_thresholds() {
        assert_eq!(Probability::from_corroboration(5.0, 5), Probability::Low);
        assert_eq!(Probability::from_corroboration(6.0, 5), Probability::Medium);
        assert_eq!(Probability::from_corroboration(4.0, 8), Probability::Medium);
        assert_eq!(Probability::from_corroboration(10.0, 7), Probability::High);
        assert_eq!(Probability::from_corroboration(7.5, 15), Probability::High);
        assert_eq!(
            Probability::from_corroboration(9.999, 14),
            Probability::Medium
        );
    }
}
