//! Physical constants and system parameters

/// Meters per degree of latitude in the flat-earth approximation
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Lower bound for cos(latitude) when scaling longitude degrees
pub const MIN_COS_LATITUDE: f64 = 1e-6;

/// Assumed height of the device above the ground while the user holds it (meters)
pub const EYE_HEIGHT_M: f32 = 1.5;

/// GPS accuracy required to leave the uninitialized state (meters, exclusive)
pub const ACCURATE_THRESHOLD_M: f64 = 7.5;

/// GPS accuracy required to leave degraded mode (meters, exclusive)
pub const EXIT_DEGRADED_THRESHOLD_M: f64 = 6.5;

/// Time without any usable fix before falling back to degraded mode
pub const NO_GPS_TIMEOUT_MS: u64 = 5_000;

/// Time with only inaccurate fixes before falling back to degraded mode
pub const INACCURATE_GPS_TIMEOUT_MS: u64 = 10_000;

/// Size of an encoded anchor transform: 16 f32 values
pub const ANCHOR_TRANSFORM_BYTES: usize = 64;
