use crate::core::{AnchorOffset, GeoPoint, GpsFix};
use crate::processing::transform::AnchorTransform;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One year in milliseconds
const YEAR_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// One hour in milliseconds
const HOUR_MS: u64 = 60 * 60 * 1000;

/// Configuration for data validation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// How far in the past a timestamp may be before it is considered corrupt (ms)
    pub max_timestamp_age_ms: u64,
    /// How far in the future a timestamp may be, for clock skew (ms)
    pub max_future_skew_ms: u64,
    /// Largest believable offset from the origin (meters)
    pub max_offset_magnitude_m: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_timestamp_age_ms: YEAR_MS,   // 1 year
            max_future_skew_ms: HOUR_MS,     // 1 hour
            max_offset_magnitude_m: 50_000.0, // 50 km
        }
    }
}

/// Boundary validator for all externally sourced positioning data
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    config: ValidationConfig,
}

impl DataValidator {
    /// Create a new data validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration
    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate_geo_point(&self, point: &GeoPoint) -> GeoAnchorResult<()> {
        point.validate()
    }

    pub fn validate_offset(&self, offset: &AnchorOffset) -> GeoAnchorResult<()> {
        offset.validate()?;
        let magnitude = offset.to_vector().norm();
        if magnitude > self.config.max_offset_magnitude_m {
            return Err(GeoAnchorError::InvalidInput {
                field: "anchor_offset",
                reason: format!(
                    "{:.1} m from origin exceeds {:.1} m",
                    magnitude, self.config.max_offset_magnitude_m
                ),
            });
        }
        Ok(())
    }

    pub fn validate_vector(&self, field: &'static str, v: &Vector3<f64>) -> GeoAnchorResult<()> {
        if v.iter().all(|c| c.is_finite()) {
            Ok(())
        } else {
            Err(GeoAnchorError::NonFiniteValue { field })
        }
    }

    /// Decode and check an encoded anchor transform
    pub fn validate_transform(&self, encoded: &str) -> GeoAnchorResult<AnchorTransform> {
        AnchorTransform::decode(encoded)
    }

    /// Timestamps must fall within [now - 1 year, now + 1 hour]
    pub fn validate_timestamp(&self, timestamp_ms: u64, now_ms: u64) -> GeoAnchorResult<()> {
        let earliest = now_ms.saturating_sub(self.config.max_timestamp_age_ms);
        let latest = now_ms.saturating_add(self.config.max_future_skew_ms);
        if timestamp_ms < earliest || timestamp_ms > latest {
            return Err(GeoAnchorError::InvalidInput {
                field: "timestamp",
                reason: format!(
                    "{} ms outside accepted window [{}, {}]",
                    timestamp_ms, earliest, latest
                ),
            });
        }
        Ok(())
    }

    /// Fix coordinates must be valid; accuracy may be negative (unknown) but not NaN
    pub fn validate_fix(&self, fix: &GpsFix) -> GeoAnchorResult<()> {
        fix.coordinate.validate()?;
        if fix.horizontal_accuracy_m.is_nan() {
            return Err(GeoAnchorError::NonFiniteValue { field: "horizontal_accuracy" });
        }
        Ok(())
    }

    /// Check every supplied piece of positioning data. Absent pieces are not checked.
    pub fn validate_positioning(
        &self,
        origin: Option<&GeoPoint>,
        offset: Option<&AnchorOffset>,
        transform: Option<&str>,
        timestamp_ms: Option<u64>,
        now_ms: u64,
    ) -> GeoAnchorResult<()> {
        if let Some(origin) = origin {
            self.validate_geo_point(origin)?;
        }
        if let Some(offset) = offset {
            self.validate_offset(offset)?;
        }
        if let Some(encoded) = transform {
            self.validate_transform(encoded)?;
        }
        if let Some(timestamp_ms) = timestamp_ms {
            self.validate_timestamp(timestamp_ms, now_ms)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: u64 = 1_700_000_000_000;

    #[test]
    fn test_timestamp_window() {
        let validator = DataValidator::new();
        assert!(validator.validate_timestamp(NOW_MS, NOW_MS).is_ok());
        assert!(validator.validate_timestamp(NOW_MS - 30 * 24 * HOUR_MS, NOW_MS).is_ok());
        assert!(validator.validate_timestamp(NOW_MS + HOUR_MS / 2, NOW_MS).is_ok());

        // Two hours of clock skew is too much
        assert!(validator.validate_timestamp(NOW_MS + 2 * HOUR_MS, NOW_MS).is_err());
        // Older than a year is corrupt
        assert!(validator.validate_timestamp(NOW_MS - YEAR_MS - 1, NOW_MS).is_err());
        assert!(validator.validate_timestamp(0, NOW_MS).is_err());
    }

    #[test]
    fn test_offset_validation() {
        let validator = DataValidator::new();
        assert!(validator.validate_offset(&AnchorOffset::new(10.0, 0.0, -4.0)).is_ok());
        assert!(validator.validate_offset(&AnchorOffset::new(f64::NAN, 0.0, 0.0)).is_err());
        assert!(validator.validate_offset(&AnchorOffset::new(1e9, 0.0, 0.0)).is_err());
    }

    #[test]
    fn test_positioning_bundle() {
        let validator = DataValidator::new();
        let origin = GeoPoint::new(40.0, -105.0).unwrap();
        let offset = AnchorOffset::new(5.0, 0.0, 5.0);
        let transform = AnchorTransform::from_translation(5.0, 0.0, 5.0).unwrap().encode();

        assert!(validator
            .validate_positioning(Some(&origin), Some(&offset), Some(&transform), Some(NOW_MS), NOW_MS)
            .is_ok());
        assert!(validator.validate_positioning(None, None, None, None, NOW_MS).is_ok());

        let bad_origin = GeoPoint { latitude: 120.0, longitude: 0.0 };
        assert!(validator
            .validate_positioning(Some(&bad_origin), None, None, None, NOW_MS)
            .is_err());
        assert!(validator
            .validate_positioning(None, None, Some("AAAA"), None, NOW_MS)
            .is_err());
    }

    #[test]
    fn test_fix_validation_allows_unknown_accuracy() {
        let validator = DataValidator::new();
        let coordinate = GeoPoint::new(40.0, -105.0).unwrap();
        assert!(validator.validate_fix(&GpsFix::new(coordinate, -1.0, NOW_MS)).is_ok());
        assert!(validator.validate_fix(&GpsFix::new(coordinate, f64::NAN, NOW_MS)).is_err());

        let corrupt = GpsFix::new(GeoPoint { latitude: f64::INFINITY, longitude: 0.0 }, 3.0, NOW_MS);
        assert!(validator.validate_fix(&corrupt).is_err());
    }
}
