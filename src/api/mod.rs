//! Application-facing API
//!
//! [`GeoAnchorSession`] is the entry point: it consumes the GPS and camera-frame
//! streams, owns the tracked objects, and drives stabilization and reconciliation.
//! Remote persistence is plugged in through [`PositionSync`].

pub mod positioning;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use positioning::{PlacementRecord, PositioningService};
pub use scheduler::Ticker;
pub use session::{
    CallbackHandle, Clock, EventCallback, GeoAnchorSession, MaintenanceTickers, ManualClock, RemoteUpdate,
    SessionEvent, SharedAnchorSource, SystemClock,
};
pub use transport::{PositionSync, RetryPolicy, SyncJob};
