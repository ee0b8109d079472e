//! Geospatial math, drift stabilization and conflict resolution

pub mod conflict;
pub mod coordinates;
pub mod stability;

pub use conflict::{ConflictConfig, ConflictResolution, ConflictResolver, ObjectVersion, ResolutionReason};
pub use stability::{
    AnchorCategory, AnchorSnapshot, AnchorStabilityEngine, DriftReport, ReferenceAnchorSource,
    ReferenceObservation, StabilityConfig, StabilityNetwork,
};
