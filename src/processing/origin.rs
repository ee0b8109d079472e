//! AR origin resolution
//!
//! Establishes which GPS coordinate is treated as AR-space (0, 0, 0) and keeps it stable
//! for the rest of the session. States:
//!
//! ```text
//! Uninitialized --accurate fix--> Accurate
//! Uninitialized --timeout-------> Degraded --fix below exit threshold--> Accurate
//! any ----------reset-----------> Uninitialized
//! ```
//!
//! The exit threshold for degraded mode is stricter than the entry threshold, which
//! keeps a fix hovering around the boundary from flapping between modes.

use crate::core::{
    GeoPoint, GpsFix, OriginMode, OriginState, Pose, ACCURATE_THRESHOLD_M, EXIT_DEGRADED_THRESHOLD_M,
    EYE_HEIGHT_M, INACCURATE_GPS_TIMEOUT_MS, NO_GPS_TIMEOUT_MS,
};
use crate::validation::data::DataValidator;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Thresholds and timeouts for origin establishment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Accuracy required to establish an accurate origin (meters, exclusive)
    pub accurate_threshold_m: f64,
    /// Accuracy required to leave degraded mode (meters, exclusive)
    pub exit_degraded_threshold_m: f64,
    /// Fallback delay when no usable fix has arrived (ms)
    pub no_gps_timeout_ms: u64,
    /// Fallback delay when fixes arrive but are too inaccurate (ms)
    pub inaccurate_gps_timeout_ms: u64,
    /// Device height above ground assumed for the camera heuristic (meters)
    pub eye_height_m: f32,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            accurate_threshold_m: ACCURATE_THRESHOLD_M,           // 7.5 m
            exit_degraded_threshold_m: EXIT_DEGRADED_THRESHOLD_M, // 6.5 m
            no_gps_timeout_ms: NO_GPS_TIMEOUT_MS,                 // 5 s
            inaccurate_gps_timeout_ms: INACCURATE_GPS_TIMEOUT_MS, // 10 s
            eye_height_m: EYE_HEIGHT_M,                           // 1.5 m
        }
    }
}

/// Resolver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolverState {
    Uninitialized,
    Accurate,
    Degraded,
}

/// A state change produced by the resolver
#[derive(Debug, Clone, PartialEq)]
pub enum OriginTransition {
    /// First origin established from an accurate fix
    Established(OriginState),
    /// No usable GPS within the timeout; running on the placeholder origin
    EnteredDegraded(OriginState),
    /// Re-anchored to an accurate fix after running degraded
    ExitedDegraded { previous: OriginState, current: OriginState },
    /// Origin discarded
    Reset,
}

/// State machine owning the session's AR origin
#[derive(Debug, Clone)]
pub struct OriginResolver {
    config: OriginConfig,
    validator: DataValidator,
    origin: Option<OriginState>,
    /// Start of the current wait for a usable fix
    waiting_since_ms: u64,
    /// A fix with known but insufficient accuracy arrived during the wait
    saw_inaccurate_fix: bool,
    last_camera_height: Option<f32>,
    highest_ground_surface: Option<f32>,
}

impl OriginResolver {
    /// Create a resolver waiting for its first fix
    pub fn new(config: OriginConfig, now_ms: u64) -> Self {
        Self {
            config,
            validator: DataValidator::new(),
            origin: None,
            waiting_since_ms: now_ms,
            saw_inaccurate_fix: false,
            last_camera_height: None,
            highest_ground_surface: None,
        }
    }

    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    pub fn state(&self) -> ResolverState {
        match self.origin {
            None => ResolverState::Uninitialized,
            Some(OriginState { mode: OriginMode::Accurate, .. }) => ResolverState::Accurate,
            Some(OriginState { mode: OriginMode::Degraded, .. }) => ResolverState::Degraded,
        }
    }

    /// Current origin, or `OriginUnavailable` before one is established
    pub fn origin(&self) -> GeoAnchorResult<&OriginState> {
        self.origin.as_ref().ok_or(GeoAnchorError::OriginUnavailable)
    }

    /// Record the latest camera pose for the ground-level heuristic
    pub fn observe_camera_pose(&mut self, pose: &Pose) {
        let height = pose.position.y as f32;
        if height.is_finite() {
            self.last_camera_height = Some(height);
        }
    }

    /// Record a horizontal surface detected by the plane/mesh subsystem
    pub fn report_ground_surface(&mut self, height: f32) {
        if !height.is_finite() {
            warn!(height, "ignoring non-finite ground surface");
            return;
        }
        // Surfaces above the camera are tables and shelves, not ground
        if let Some(camera) = self.last_camera_height {
            if height > camera {
                return;
            }
        }
        self.highest_ground_surface = Some(match self.highest_ground_surface {
            Some(current) => current.max(height),
            None => height,
        });
    }

    /// Feed a GPS fix. Invalid fixes are rejected and leave the state untouched.
    pub fn handle_fix(&mut self, fix: &GpsFix, now_ms: u64) -> GeoAnchorResult<Option<OriginTransition>> {
        if let Err(e) = self.validator.validate_fix(fix) {
            warn!(error = %e, "rejecting GPS fix");
            return Err(e);
        }

        match self.state() {
            ResolverState::Uninitialized => {
                if fix.is_accurate_within(self.config.accurate_threshold_m) {
                    let state = self.build_origin(fix.coordinate, OriginMode::Accurate, now_ms, true);
                    self.origin = Some(state);
                    info!(
                        latitude = state.origin.latitude,
                        longitude = state.origin.longitude,
                        accuracy_m = fix.horizontal_accuracy_m,
                        ground_level = state.ground_level,
                        "AR origin established"
                    );
                    return Ok(Some(OriginTransition::Established(state)));
                }

                if fix.has_known_accuracy() {
                    self.saw_inaccurate_fix = true;
                }
                debug!(accuracy_m = fix.horizontal_accuracy_m, "fix not accurate enough for origin");
                Ok(self.tick(now_ms))
            }
            ResolverState::Degraded => {
                if !fix.is_accurate_within(self.config.exit_degraded_threshold_m) {
                    return Ok(None);
                }
                let previous = self.origin.ok_or(GeoAnchorError::OriginUnavailable)?;
                let current = self.build_origin(fix.coordinate, OriginMode::Accurate, now_ms, true);
                self.origin = Some(current);
                info!(
                    latitude = current.origin.latitude,
                    longitude = current.origin.longitude,
                    accuracy_m = fix.horizontal_accuracy_m,
                    "leaving degraded mode, origin re-anchored"
                );
                Ok(Some(OriginTransition::ExitedDegraded { previous, current }))
            }
            // Once accurate, the origin stays put until reset
            ResolverState::Accurate => Ok(None),
        }
    }

    /// Check the degraded-mode timeout
    pub fn tick(&mut self, now_ms: u64) -> Option<OriginTransition> {
        if self.origin.is_some() {
            return None;
        }

        let waited = now_ms.saturating_sub(self.waiting_since_ms);
        let timeout = if self.saw_inaccurate_fix {
            self.config.inaccurate_gps_timeout_ms
        } else {
            self.config.no_gps_timeout_ms
        };
        if waited < timeout {
            return None;
        }

        let state = self.build_origin(GeoPoint::DEGRADED_SENTINEL, OriginMode::Degraded, now_ms, false);
        self.origin = Some(state);
        warn!(
            waited_ms = waited,
            saw_inaccurate_fix = self.saw_inaccurate_fix,
            "no usable GPS, entering degraded mode with placeholder origin"
        );
        Some(OriginTransition::EnteredDegraded(state))
    }

    /// Discard the origin, on explicit request or after session failure
    pub fn reset(&mut self, now_ms: u64) -> Option<OriginTransition> {
        let had_origin = self.origin.take().is_some();
        self.waiting_since_ms = now_ms;
        self.saw_inaccurate_fix = false;
        self.highest_ground_surface = None;
        if had_origin {
            info!("AR origin reset");
            Some(OriginTransition::Reset)
        } else {
            None
        }
    }

    fn build_origin(&self, origin: GeoPoint, mode: OriginMode, now_ms: u64, use_surfaces: bool) -> OriginState {
        OriginState {
            origin,
            established_at_ms: now_ms,
            ground_level: self.estimate_ground_level(use_surfaces),
            mode,
        }
    }

    fn estimate_ground_level(&self, use_surfaces: bool) -> f32 {
        if use_surfaces {
            if let Some(surface) = self.highest_ground_surface {
                return surface;
            }
        }
        self.last_camera_height.unwrap_or(0.0) - self.config.eye_height_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn fix(accuracy: f64) -> GpsFix {
        GpsFix::new(GeoPoint::new(40.0, -105.0).unwrap(), accuracy, 0)
    }

    fn degraded_resolver() -> OriginResolver {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        assert!(resolver.tick(5_000).is_some());
        assert_eq!(resolver.state(), ResolverState::Degraded);
        resolver
    }

    #[test]
    fn test_origin_unavailable_before_fix() {
        let resolver = OriginResolver::new(OriginConfig::default(), 0);
        assert_eq!(resolver.state(), ResolverState::Uninitialized);
        assert_eq!(resolver.origin().unwrap_err(), GeoAnchorError::OriginUnavailable);
    }

    #[test]
    fn test_accurate_fix_establishes_origin() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        resolver.observe_camera_pose(&Pose::from_position(Vector3::new(0.0, 0.2, 0.0)));

        let transition = resolver.handle_fix(&fix(5.0), 1_000).unwrap();
        assert!(matches!(transition, Some(OriginTransition::Established(_))));

        let origin = resolver.origin().unwrap();
        assert_eq!(origin.mode, OriginMode::Accurate);
        assert_eq!(origin.origin, GeoPoint::new(40.0, -105.0).unwrap());
        assert_eq!(origin.established_at_ms, 1_000);
        assert!((origin.ground_level - (0.2 - 1.5)).abs() < 1e-6);
    }

    #[test]
    fn test_detected_surface_beats_camera_heuristic() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        resolver.observe_camera_pose(&Pose::from_position(Vector3::new(0.0, 0.0, 0.0)));
        resolver.report_ground_surface(-1.42);
        resolver.report_ground_surface(-1.60);
        // Above the camera: a shelf, ignored
        resolver.report_ground_surface(0.4);

        resolver.handle_fix(&fix(3.0), 0).unwrap();
        assert!((resolver.origin().unwrap().ground_level + 1.42).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_accuracy_does_not_establish() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        assert!(resolver.handle_fix(&fix(7.5), 100).unwrap().is_none());
        assert_eq!(resolver.state(), ResolverState::Uninitialized);

        assert!(resolver.handle_fix(&fix(7.0), 200).unwrap().is_some());
        assert_eq!(resolver.state(), ResolverState::Accurate);
    }

    #[test]
    fn test_unknown_accuracy_times_out_after_five_seconds() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        assert!(resolver.handle_fix(&fix(-1.0), 100).unwrap().is_none());
        assert!(resolver.tick(4_999).is_none());

        let transition = resolver.tick(5_000);
        assert!(matches!(transition, Some(OriginTransition::EnteredDegraded(_))));

        let origin = resolver.origin().unwrap();
        assert_eq!(origin.mode, OriginMode::Degraded);
        assert_eq!(origin.origin, GeoPoint::DEGRADED_SENTINEL);
    }

    #[test]
    fn test_inaccurate_fixes_wait_ten_seconds() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        resolver.handle_fix(&fix(25.0), 500).unwrap();
        assert!(resolver.tick(6_000).is_none());
        assert_eq!(resolver.state(), ResolverState::Uninitialized);
        assert!(resolver.tick(10_000).is_some());
        assert_eq!(resolver.state(), ResolverState::Degraded);
    }

    #[test]
    fn test_degraded_hysteresis() {
        let mut resolver = degraded_resolver();

        // 7.0 would establish from Uninitialized, but is not good enough to leave Degraded
        assert!(resolver.handle_fix(&fix(7.0), 6_000).unwrap().is_none());
        assert!(resolver.handle_fix(&fix(7.0), 7_000).unwrap().is_none());
        assert!(resolver.handle_fix(&fix(6.5), 7_500).unwrap().is_none());
        assert_eq!(resolver.state(), ResolverState::Degraded);

        let transition = resolver.handle_fix(&fix(6.4), 8_000).unwrap();
        match transition {
            Some(OriginTransition::ExitedDegraded { previous, current }) => {
                assert_eq!(previous.mode, OriginMode::Degraded);
                assert_eq!(current.mode, OriginMode::Accurate);
                assert_eq!(current.origin, GeoPoint::new(40.0, -105.0).unwrap());
                assert_eq!(current.established_at_ms, 8_000);
            }
            other => panic!("expected ExitedDegraded, got {:?}", other),
        }
    }

    #[test]
    fn test_origin_is_stable_once_accurate() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        resolver.handle_fix(&fix(4.0), 0).unwrap();

        let moved = GpsFix::new(GeoPoint::new(40.001, -105.001).unwrap(), 1.0, 0);
        assert!(resolver.handle_fix(&moved, 1_000).unwrap().is_none());
        assert!(resolver.tick(60_000).is_none());
        assert_eq!(resolver.origin().unwrap().origin, GeoPoint::new(40.0, -105.0).unwrap());
    }

    #[test]
    fn test_invalid_fix_is_rejected_without_state_change() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        let corrupt = GpsFix::new(GeoPoint { latitude: f64::NAN, longitude: -105.0 }, 2.0, 0);
        assert!(resolver.handle_fix(&corrupt, 100).is_err());
        assert_eq!(resolver.state(), ResolverState::Uninitialized);
    }

    #[test]
    fn test_reset_restarts_timeout() {
        let mut resolver = OriginResolver::new(OriginConfig::default(), 0);
        resolver.handle_fix(&fix(2.0), 0).unwrap();
        assert_eq!(resolver.reset(20_000), Some(OriginTransition::Reset));
        assert_eq!(resolver.state(), ResolverState::Uninitialized);
        assert!(resolver.origin().is_err());

        assert!(resolver.tick(24_000).is_none());
        assert!(resolver.tick(25_000).is_some());
        assert!(resolver.reset(30_000).is_some());
        assert!(resolver.reset(30_001).is_none());
    }
}
