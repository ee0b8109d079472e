//! Geospatial Anchor Core
//!
//! Places virtual objects at real-world GPS locations inside an AR session and keeps
//! them there: a local flat-earth frame anchored at a GPS origin, drift correction
//! against nearby reference anchors, and reconciliation of positions reported by
//! several observers.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use core::{AnchorOffset, GeoPoint, GpsFix, OriginMode, OriginState, Pose, TrackedObject, TrackingQuality};
pub use algorithms::{
    AnchorStabilityEngine, ConflictResolver, ObjectVersion, ReferenceAnchorSource, ReferenceObservation,
};
pub use processing::{AnchorTransform, OriginResolver, OriginTransition, ResolverState};
pub use validation::{GeoAnchorError, GeoAnchorResult};
pub use utils::{init_logging, ConfigurationManager, CoreConfig};
pub use api::{GeoAnchorSession, PositionSync, PositioningService, SessionEvent};
