use thiserror::Error;

/// Result type for anchor-core operations
pub type GeoAnchorResult<T> = Result<T, GeoAnchorError>;

/// Error classification for the geospatial anchor core
///
/// None of these are fatal. Sensor noise is routine, so every caller is expected to
/// log, keep its last known-good state and carry on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoAnchorError {
    /// Externally sourced value failed validation
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// NaN or infinite float in sensor or decoded data
    #[error("Non-finite value in {field}")]
    NonFiniteValue { field: &'static str },

    /// Coordinate outside the WGS84 latitude/longitude ranges
    #[error("Coordinate out of range: ({latitude}, {longitude})")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },

    /// Anchor transform payload could not be decoded
    #[error("Malformed anchor transform: {reason}")]
    MalformedTransform { reason: String },

    /// No origin has been established for this session yet
    #[error("AR origin unavailable")]
    OriginUnavailable,

    /// The origin is the degraded-mode placeholder and cannot be used for GPS conversion
    #[error("AR origin is a degraded-mode placeholder; GPS conversion unavailable")]
    DegradedOrigin,

    /// Too few reference anchors to disambiguate drift
    #[error("Insufficient reference anchors: {available} available, {required} required")]
    InsufficientReferenceData { available: usize, required: usize },

    /// A version older than the canonical state or the resolution window
    #[error("Stale version {version} for object {object_id}")]
    StaleConflict { object_id: String, version: i64 },

    /// Remote persistence or broadcast failed
    #[error("Transport failure after {attempts} attempt(s): {reason}")]
    TransportFailure { attempts: u32, reason: String },

    /// Operation referenced an object that is not tracked
    #[error("Unknown object: {0}")]
    UnknownObject(String),

    /// Configuration value out of its accepted range
    #[error("Configuration error: {parameter} = {value} ({reason})")]
    Configuration { parameter: String, value: String, reason: String },
}

impl GeoAnchorError {
    /// Whether the caller can continue with its previous state
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GeoAnchorError::Configuration { .. })
    }

    /// Errors caused by corrupt external data, rejected at the boundary
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            GeoAnchorError::InvalidInput { .. }
                | GeoAnchorError::NonFiniteValue { .. }
                | GeoAnchorError::CoordinateOutOfRange { .. }
                | GeoAnchorError::MalformedTransform { .. }
        )
    }
}
