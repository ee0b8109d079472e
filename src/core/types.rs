//! Core data types for the geospatial anchor core

use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// GPS coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Placeholder origin used while running without GPS. Not a real location.
    pub const DEGRADED_SENTINEL: GeoPoint = GeoPoint { latitude: 0.0, longitude: 0.0 };

    /// Create a validated coordinate
    pub fn new(latitude: f64, longitude: f64) -> GeoAnchorResult<Self> {
        let point = Self { latitude, longitude };
        point.validate()?;
        Ok(point)
    }

    /// Check finiteness and the WGS84 latitude/longitude ranges
    pub fn validate(&self) -> GeoAnchorResult<()> {
        if !self.latitude.is_finite() {
            return Err(GeoAnchorError::NonFiniteValue { field: "latitude" });
        }
        if !self.longitude.is_finite() {
            return Err(GeoAnchorError::NonFiniteValue { field: "longitude" });
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GeoAnchorError::CoordinateOutOfRange {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// A single fix from the location subsystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub coordinate: GeoPoint,
    /// Horizontal accuracy radius in meters. Negative means unknown.
    pub horizontal_accuracy_m: f64,
    /// Fix time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl GpsFix {
    pub fn new(coordinate: GeoPoint, horizontal_accuracy_m: f64, timestamp_ms: u64) -> Self {
        Self {
            coordinate,
            horizontal_accuracy_m,
            timestamp_ms,
        }
    }

    /// Whether the fix reports a known accuracy value
    pub fn has_known_accuracy(&self) -> bool {
        self.horizontal_accuracy_m.is_finite() && self.horizontal_accuracy_m >= 0.0
    }

    /// True when the accuracy is known and strictly below `threshold_m`
    pub fn is_accurate_within(&self, threshold_m: f64) -> bool {
        self.has_known_accuracy() && self.horizontal_accuracy_m < threshold_m
    }
}

/// Tracking quality reported by the AR subsystem alongside each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingQuality {
    Normal,
    Limited,
    NotAvailable,
}

impl TrackingQuality {
    /// Stability estimate for an anchor tracked under this quality
    pub fn stability_estimate(self) -> f64 {
        match self {
            TrackingQuality::Normal => 0.9,
            TrackingQuality::Limited => 0.5,
            TrackingQuality::NotAvailable => 0.1,
        }
    }
}

/// Rigid transform in AR tracking space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self { position, orientation }
    }

    pub fn from_position(position: Vector3<f64>) -> Self {
        Self::new(position, UnitQuaternion::identity())
    }

    /// Build a pose from a camera transform. Rejects matrices with NaN or infinite entries.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> GeoAnchorResult<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(GeoAnchorError::NonFiniteValue { field: "camera_transform" });
        }

        let m = matrix.cast::<f64>();
        let position = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        let linear: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = Rotation3::from_matrix(&linear);

        Ok(Self::new(position, UnitQuaternion::from_rotation_matrix(&rotation)))
    }

    /// Build a pose from 16 column-major floats as delivered by the frame stream
    pub fn from_column_major(values: &[f32; 16]) -> GeoAnchorResult<Self> {
        Self::from_matrix(&Matrix4::from_column_slice(values))
    }
}

/// Origin establishment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginMode {
    /// Origin anchored to an accurate GPS fix
    Accurate,
    /// No usable GPS; origin is the placeholder sentinel
    Degraded,
}

/// The GPS coordinate treated as AR-space (0, 0, 0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginState {
    pub origin: GeoPoint,
    pub established_at_ms: u64,
    /// Estimated ground height in AR space (meters)
    pub ground_level: f32,
    pub mode: OriginMode,
}

impl OriginState {
    pub fn is_degraded(&self) -> bool {
        self.mode == OriginMode::Degraded
    }
}

/// Position relative to the origin in meters: +X east, +Y up, +Z north
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnchorOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AnchorOffset {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Reject offsets carrying NaN or infinite components
    pub fn validate(&self) -> GeoAnchorResult<()> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(GeoAnchorError::NonFiniteValue { field: "anchor_offset" })
        }
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    pub fn distance_to(&self, other: &AnchorOffset) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }
}

/// A placed virtual object with its canonical position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: String,
    pub offset: AnchorOffset,
    pub origin_at_placement: GeoPoint,
    pub last_known_gps: GeoPoint,
    pub placement_timestamp_ms: u64,
    pub server_version: i64,
    /// Encoded precise anchor transform; present when the placement is AR-derived
    pub anchor_transform: Option<String>,
    /// Placement token assigned by the owning session
    #[serde(default)]
    pub generation: u64,
}

impl TrackedObject {
    pub fn new(
        id: impl Into<String>,
        offset: AnchorOffset,
        origin_at_placement: GeoPoint,
        last_known_gps: GeoPoint,
        placement_timestamp_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            offset,
            origin_at_placement,
            last_known_gps,
            placement_timestamp_ms,
            server_version: 0,
            anchor_transform: None,
            generation: 0,
        }
    }

    pub fn with_anchor_transform(mut self, encoded: impl Into<String>) -> Self {
        self.anchor_transform = Some(encoded.into());
        self
    }

    pub fn with_server_version(mut self, version: i64) -> Self {
        self.server_version = version;
        self
    }

    pub fn has_ar_data(&self) -> bool {
        self.anchor_transform.is_some()
    }

    /// Same placement content, ignoring the session-local generation token
    pub fn same_placement(&self, other: &TrackedObject) -> bool {
        self.id == other.id
            && self.offset == other.offset
            && self.origin_at_placement == other.origin_at_placement
            && self.last_known_gps == other.last_known_gps
            && self.placement_timestamp_ms == other.placement_timestamp_ms
            && self.server_version == other.server_version
            && self.anchor_transform == other.anchor_transform
    }
}
