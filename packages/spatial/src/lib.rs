#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Great-circle distance and coordinate helpers.
//!
//! Used by the incident aggregator to decide whether two sightings are
//! close enough to describe the same event, and by the notifier to find
//! users within alert range of a confirmed incident.

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle (haversine) distance between two points in kilometers.
///
/// Coordinates are in degrees. No datum validation is performed.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Arithmetic mean of a set of `(latitude, longitude)` pairs.
///
/// Returns `None` for an empty set. The mean is taken component-wise, which
/// is accurate enough for clusters spanning a few kilometers.
#[must_use]
pub fn centroid(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let (lat_sum, lon_sum) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lon), (p_lat, p_lon)| {
            (lat + p_lat, lon + p_lon)
        });

    Some((lat_sum / n, lon_sum / n))
}

/// Which coordinate component failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateField {
    /// The latitude component.
    Latitude,
    /// The longitude component.
    Longitude,
}

impl CoordinateField {
    /// Field name as it appears in request payloads.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
        }
    }
}

/// Error returned when a coordinate is not a finite value within range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinateError {
    /// The offending component.
    pub field: CoordinateField,
    /// The rejected value.
    pub value: f64,
}

impl std::fmt::Display for InvalidCoordinateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let range = match self.field {
            CoordinateField::Latitude => "-90..=90",
            CoordinateField::Longitude => "-180..=180",
        };
        write!(
            f,
            "invalid {} {}: expected a finite value in {range}",
            self.field.name(),
            self.value
        )
    }
}

impl std::error::Error for InvalidCoordinateError {}

/// Checks that a latitude/longitude pair is finite and within the usual
/// degree ranges.
///
/// # Errors
///
/// Returns [`InvalidCoordinateError`] naming the first offending component.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), InvalidCoordinateError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(InvalidCoordinateError {
            field: CoordinateField::Latitude,
            value: latitude,
        });
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(InvalidCoordinateError {
            field: CoordinateField::Longitude,
            value: longitude,
        });
    }
    Ok(())
}
