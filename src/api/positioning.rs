//! Validated offset <-> GPS conversions and persistence payloads

use crate::algorithms::coordinates::{offset_from_origin, point_from_offset};
use crate::core::{AnchorOffset, GeoPoint, OriginState, TrackedObject};
use crate::processing::transform::AnchorTransform;
use crate::validation::data::{DataValidator, ValidationConfig};
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persistence payload for a placed object's canonical location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub object_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub offset: AnchorOffset,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub anchor_transform: Option<String>,
    pub server_version: i64,
    pub placed_at_ms: u64,
}

impl PlacementRecord {
    pub fn to_json(&self) -> GeoAnchorResult<String> {
        serde_json::to_string(self).map_err(|e| GeoAnchorError::InvalidInput {
            field: "placement_record",
            reason: e.to_string(),
        })
    }

    /// Parse and validate a record received from the remote store
    pub fn from_json(json: &str) -> GeoAnchorResult<Self> {
        let record: PlacementRecord = serde_json::from_str(json).map_err(|e| GeoAnchorError::InvalidInput {
            field: "placement_record",
            reason: e.to_string(),
        })?;
        GeoPoint::new(record.latitude, record.longitude)?;
        GeoPoint::new(record.origin_latitude, record.origin_longitude)?;
        record.offset.validate()?;
        if let Some(encoded) = &record.anchor_transform {
            AnchorTransform::decode(encoded)?;
        }
        Ok(record)
    }

    pub fn location(&self) -> GeoAnchorResult<GeoPoint> {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Rebuild the tracked object this record describes
    pub fn to_tracked_object(&self) -> GeoAnchorResult<TrackedObject> {
        let origin = GeoPoint::new(self.origin_latitude, self.origin_longitude)?;
        let mut object = TrackedObject::new(
            self.object_id.clone(),
            self.offset,
            origin,
            self.location()?,
            self.placed_at_ms,
        )
        .with_server_version(self.server_version);
        object.anchor_transform = self.anchor_transform.clone();
        Ok(object)
    }
}

/// Façade over coordinate math with validation at every entry point
#[derive(Debug, Clone, Default)]
pub struct PositioningService {
    validator: DataValidator,
}

impl PositioningService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation(config: ValidationConfig) -> Self {
        Self {
            validator: DataValidator::with_config(config),
        }
    }

    pub fn validator(&self) -> &DataValidator {
        &self.validator
    }

    /// The origin usable for GPS conversion.
    ///
    /// Fails with `OriginUnavailable` before an origin exists and with `DegradedOrigin`
    /// while running on the placeholder, so callers never mistake (0, 0) for a location.
    pub fn usable_origin<'a>(&self, origin: Option<&'a OriginState>) -> GeoAnchorResult<&'a GeoPoint> {
        match origin {
            None => Err(GeoAnchorError::OriginUnavailable),
            Some(state) if state.is_degraded() => Err(GeoAnchorError::DegradedOrigin),
            Some(state) => Ok(&state.origin),
        }
    }

    /// GPS location of `offset` from `origin`.
    ///
    /// When an encoded anchor transform is supplied its translation is used instead of
    /// `offset`, since it carries the full-precision placement.
    pub fn calculate_real_world_position(
        &self,
        origin: &GeoPoint,
        offset: &AnchorOffset,
        anchor_transform: Option<&str>,
    ) -> GeoAnchorResult<GeoPoint> {
        self.validator.validate_geo_point(origin)?;

        let effective = match anchor_transform {
            Some(encoded) => {
                let transform = self.validator.validate_transform(encoded).map_err(|e| {
                    warn!(error = %e, "anchor transform rejected");
                    e
                })?;
                transform.translation()
            }
            None => *offset,
        };
        self.validator.validate_offset(&effective).map_err(|e| {
            warn!(error = %e, "offset rejected");
            e
        })?;

        Ok(point_from_offset(origin, &effective))
    }

    /// GPS location of a tracked object relative to the origin it was placed against.
    ///
    /// Objects placed against the degraded placeholder have no real location until
    /// they are re-anchored, and fail with `DegradedOrigin`.
    pub fn locate_object(&self, object: &TrackedObject) -> GeoAnchorResult<GeoPoint> {
        if object.origin_at_placement == GeoPoint::DEGRADED_SENTINEL {
            return Err(GeoAnchorError::DegradedOrigin);
        }
        self.calculate_real_world_position(
            &object.origin_at_placement,
            &object.offset,
            object.anchor_transform.as_deref(),
        )
    }

    /// ENU offset of `target` from `origin`
    pub fn calculate_offset(&self, origin: &GeoPoint, target: &GeoPoint) -> GeoAnchorResult<AnchorOffset> {
        self.validator.validate_geo_point(origin)?;
        self.validator.validate_geo_point(target)?;
        let offset = offset_from_origin(origin, target);
        self.validator.validate_offset(&offset)?;
        Ok(offset)
    }

    pub fn is_valid_positioning(
        &self,
        origin: Option<&GeoPoint>,
        offset: Option<&AnchorOffset>,
        anchor_transform: Option<&str>,
        timestamp_ms: Option<u64>,
        now_ms: u64,
    ) -> bool {
        match self
            .validator
            .validate_positioning(origin, offset, anchor_transform, timestamp_ms, now_ms)
        {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "positioning data invalid");
                false
            }
        }
    }

    /// Build the persistence payload for an object
    pub fn placement_record(&self, object: &TrackedObject) -> GeoAnchorResult<PlacementRecord> {
        let location = self.locate_object(object)?;
        Ok(PlacementRecord {
            object_id: object.id.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            offset: object.offset,
            origin_latitude: object.origin_at_placement.latitude,
            origin_longitude: object.origin_at_placement.longitude,
            anchor_transform: object.anchor_transform.clone(),
            server_version: object.server_version,
            placed_at_ms: object.placement_timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OriginMode;

    fn boulder() -> GeoPoint {
        GeoPoint::new(40.0, -105.0).unwrap()
    }

    fn accurate_origin() -> OriginState {
        OriginState {
            origin: boulder(),
            established_at_ms: 0,
            ground_level: -1.5,
            mode: OriginMode::Accurate,
        }
    }

    #[test]
    fn test_real_world_position_scenario() {
        let service = PositioningService::new();
        let point = service
            .calculate_real_world_position(&boulder(), &AnchorOffset::new(50.0, 0.0, 0.0), None)
            .unwrap();
        assert!((point.latitude - 40.0).abs() < 1e-9);
        assert!((point.longitude - -104.999412).abs() < 1e-6);
    }

    #[test]
    fn test_transform_preferred_over_offset() {
        let service = PositioningService::new();
        let encoded = AnchorTransform::from_translation(50.0, 0.0, 0.0).unwrap().encode();
        let coarse = AnchorOffset::new(49.0, 0.0, 1.0);

        let precise = service
            .calculate_real_world_position(&boulder(), &coarse, Some(&encoded))
            .unwrap();
        let expected = service
            .calculate_real_world_position(&boulder(), &AnchorOffset::new(50.0, 0.0, 0.0), None)
            .unwrap();
        assert_eq!(precise, expected);
    }

    #[test]
    fn test_non_finite_offset_rejected() {
        let service = PositioningService::new();
        for bad in [
            AnchorOffset::new(f64::NAN, 0.0, 0.0),
            AnchorOffset::new(0.0, f64::INFINITY, 0.0),
            AnchorOffset::new(0.0, 0.0, f64::NEG_INFINITY),
        ] {
            assert!(matches!(
                service.calculate_real_world_position(&boulder(), &bad, None),
                Err(GeoAnchorError::NonFiniteValue { .. })
            ));
        }
    }

    #[test]
    fn test_malformed_transform_rejected() {
        let service = PositioningService::new();
        let short = "AACAPwAAAAA=";
        assert!(matches!(
            service.calculate_real_world_position(&boulder(), &AnchorOffset::default(), Some(short)),
            Err(GeoAnchorError::MalformedTransform { .. })
        ));
    }

    #[test]
    fn test_usable_origin_distinguishes_missing_and_degraded() {
        let service = PositioningService::new();
        assert_eq!(service.usable_origin(None), Err(GeoAnchorError::OriginUnavailable));

        let degraded = OriginState {
            origin: GeoPoint::DEGRADED_SENTINEL,
            mode: OriginMode::Degraded,
            ..accurate_origin()
        };
        assert_eq!(service.usable_origin(Some(&degraded)), Err(GeoAnchorError::DegradedOrigin));

        let accurate = accurate_origin();
        assert_eq!(service.usable_origin(Some(&accurate)), Ok(&boulder()));
    }

    #[test]
    fn test_placeholder_placements_have_no_location() {
        let service = PositioningService::new();
        let object = TrackedObject::new(
            "coin",
            AnchorOffset::new(10.0, 0.0, 10.0),
            GeoPoint::DEGRADED_SENTINEL,
            GeoPoint::DEGRADED_SENTINEL,
            0,
        );
        assert_eq!(service.locate_object(&object), Err(GeoAnchorError::DegradedOrigin));
        assert_eq!(service.placement_record(&object), Err(GeoAnchorError::DegradedOrigin));
    }

    #[test]
    fn test_calculate_offset_inverts_position() {
        let service = PositioningService::new();
        let offset = AnchorOffset::new(-30.0, 0.0, 12.5);
        let point = service.calculate_real_world_position(&boulder(), &offset, None).unwrap();
        let back = service.calculate_offset(&boulder(), &point).unwrap();
        assert!(back.distance_to(&offset) < 1e-6);
    }

    #[test]
    fn test_is_valid_positioning() {
        let service = PositioningService::new();
        let now = 1_700_000_000_000u64;
        let offset = AnchorOffset::new(1.0, 0.0, 2.0);
        let transform = AnchorTransform::from_translation(1.0, 0.0, 2.0).unwrap().encode();

        assert!(service.is_valid_positioning(Some(&boulder()), Some(&offset), Some(&transform), Some(now), now));
        assert!(service.is_valid_positioning(None, None, None, None, now));

        let bad_origin = GeoPoint { latitude: 95.0, longitude: 0.0 };
        assert!(!service.is_valid_positioning(Some(&bad_origin), None, None, None, now));
        assert!(!service.is_valid_positioning(None, Some(&AnchorOffset::new(f64::NAN, 0.0, 0.0)), None, None, now));
        assert!(!service.is_valid_positioning(None, None, Some("AAAA"), None, now));

        let two_hours = 2 * 60 * 60 * 1000;
        assert!(!service.is_valid_positioning(None, None, None, Some(now + two_hours), now));
        assert!(service.is_valid_positioning(None, None, None, Some(now - 30 * 24 * 60 * 60 * 1000), now));
        assert!(!service.is_valid_positioning(None, None, None, Some(now - 400 * 24 * 60 * 60 * 1000), now));
    }

    #[test]
    fn test_placement_record_json() {
        let service = PositioningService::new();
        let transform = AnchorTransform::from_translation(50.0, 0.0, 0.0).unwrap().encode();
        let object = TrackedObject::new(
            "chest-7",
            AnchorOffset::new(50.0, 0.0, 0.0),
            boulder(),
            boulder(),
            1_700_000_000_000,
        )
        .with_anchor_transform(transform)
        .with_server_version(4);

        let record = service.placement_record(&object).unwrap();
        assert!((record.longitude - -104.999412).abs() < 1e-6);

        let json = record.to_json().unwrap();
        assert!(json.contains("\"object_id\":\"chest-7\""));
        let parsed = PlacementRecord::from_json(&json).unwrap();
        assert_eq!(parsed, record);

        let rebuilt = parsed.to_tracked_object().unwrap();
        assert_eq!(rebuilt.server_version, 4);
        assert!(rebuilt.has_ar_data());
        assert_eq!(rebuilt.origin_at_placement, boulder());
    }

    #[test]
    fn test_placement_record_rejects_garbage() {
        assert!(PlacementRecord::from_json("{not json").is_err());
        let out_of_range = r#"{"object_id":"x","latitude":120.0,"longitude":0.0,
            "offset":{"x":0.0,"y":0.0,"z":0.0},"origin_latitude":0.0,"origin_longitude":0.0,
            "server_version":1,"placed_at_ms":0}"#;
        assert!(matches!(
            PlacementRecord::from_json(out_of_range),
            Err(GeoAnchorError::CoordinateOutOfRange { .. })
        ));
    }
}
