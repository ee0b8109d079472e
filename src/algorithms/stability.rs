//! Anchor stability networks and drift correction
//!
//! Each placed object gets a small network of nearby reference anchors (planes, mesh
//! features, geo anchors, image markers). The relative offsets between the object and
//! its references are recorded when the network is built. Later, if those offsets no
//! longer agree with what the AR session reports, the object has drifted and is nudged
//! back in small damped steps.
//!
//! Corrections are split into a read-only planning phase ([`AnchorStabilityEngine::plan_correction`])
//! and a short mutating commit ([`AnchorStabilityEngine::commit_correction`]) so callers
//! holding shared state can do the math outside their lock.

use crate::core::TrackingQuality;
use crate::processing::throttle::RateLimiter;
use crate::validation::data::DataValidator;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Categories of reference anchors, ranked by how well they hold position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorCategory {
    /// Detected planar surface
    Plane,
    /// LiDAR scene-mesh feature
    Mesh,
    /// GPS geo anchor
    GeoAnchor,
    /// Tracked image marker
    Image,
    /// Anything else
    Generic,
}

impl AnchorCategory {
    pub fn type_weight(self) -> f64 {
        match self {
            AnchorCategory::Plane => 0.9,
            AnchorCategory::Mesh => 0.95,
            AnchorCategory::GeoAnchor => 0.85,
            AnchorCategory::Image => 0.8,
            AnchorCategory::Generic => 0.6,
        }
    }
}

/// A reference anchor as reported by the AR subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceObservation {
    pub anchor_id: String,
    pub position: Vector3<f64>,
    pub category: AnchorCategory,
    /// Seconds since the anchor was first tracked
    pub age_seconds: f64,
    /// Transform consistency over recent frames, 0.0 (jittery) to 1.0 (rock solid)
    pub consistency: f64,
}

impl ReferenceObservation {
    pub fn new(anchor_id: impl Into<String>, position: Vector3<f64>, category: AnchorCategory) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            position,
            category,
            age_seconds: 0.0,
            consistency: 1.0,
        }
    }

    pub fn with_age(mut self, age_seconds: f64) -> Self {
        self.age_seconds = age_seconds;
        self
    }

    pub fn with_consistency(mut self, consistency: f64) -> Self {
        self.consistency = consistency;
        self
    }

    fn is_finite(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
    }
}

/// External anchor/mesh subsystem queried by the engine
pub trait ReferenceAnchorSource {
    /// Anchors within `radius_m` of `center`
    fn anchors_within(&self, center: &Vector3<f64>, radius_m: f64) -> Vec<ReferenceObservation>;

    /// Current position of a previously reported anchor, if it is still tracked
    fn current_position(&self, anchor_id: &str) -> Option<Vector3<f64>>;
}

/// Observations captured from a live source, replayable without touching it again
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorSnapshot {
    observations: Vec<ReferenceObservation>,
}

impl AnchorSnapshot {
    /// Query `source` once around `center`
    pub fn capture(source: &dyn ReferenceAnchorSource, center: &Vector3<f64>, radius_m: f64) -> Self {
        Self {
            observations: source.anchors_within(center, radius_m),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl ReferenceAnchorSource for AnchorSnapshot {
    fn anchors_within(&self, center: &Vector3<f64>, radius_m: f64) -> Vec<ReferenceObservation> {
        self.observations
            .iter()
            .filter(|o| (o.position - center).norm() <= radius_m)
            .cloned()
            .collect()
    }

    fn current_position(&self, anchor_id: &str) -> Option<Vector3<f64>> {
        self.observations
            .iter()
            .find(|o| o.anchor_id == anchor_id)
            .map(|o| o.position)
    }
}

/// Tuning for stability networks and corrections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Default radius for the reference anchor search (meters)
    pub search_radius_m: f64,
    /// References kept per network
    pub max_reference_anchors: usize,
    /// Below this many references drift cannot be disambiguated
    pub min_reference_anchors: usize,
    /// Score reported for under-determined networks
    pub insufficient_reference_score: f64,
    /// Share of the score from the primary anchor's own stability
    pub primary_score_share: f64,
    /// Per-reference distance change that counts as drift (meters)
    pub drift_threshold_m: f64,
    /// Confidence required before correcting
    pub min_correction_confidence: f64,
    /// Largest correction vector considered per application (meters)
    pub max_correction_m: f64,
    /// Fraction of the capped correction applied per step
    pub correction_damping: f64,
    /// Minimum time between corrections of one object (ms).
    /// Sessions take this from `ThrottleConfig`, so it is not part of the config file.
    #[serde(skip, default = "default_correction_interval_ms")]
    pub correction_interval_ms: u64,
    /// Minimum time between network recomputations (ms). Also set from `ThrottleConfig`.
    #[serde(skip, default = "default_stability_update_interval_ms")]
    pub stability_update_interval_ms: u64,
    /// Age at which a reference anchor is considered fully settled (seconds)
    pub anchor_maturity_s: f64,
    /// References closer than this to the primary are the primary itself (meters)
    pub min_reference_distance_m: f64,
}

fn default_correction_interval_ms() -> u64 {
    1_000
}

fn default_stability_update_interval_ms() -> u64 {
    2_000
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            search_radius_m: 5.0,
            max_reference_anchors: 5,
            min_reference_anchors: 2,
            insufficient_reference_score: 0.3,
            primary_score_share: 0.4,
            drift_threshold_m: 0.05,     // 5 cm
            min_correction_confidence: 0.6,
            max_correction_m: 0.10,      // 10 cm
            correction_damping: 0.3,
            correction_interval_ms: default_correction_interval_ms(),
            stability_update_interval_ms: default_stability_update_interval_ms(),
            anchor_maturity_s: 10.0,
            min_reference_distance_m: 0.01,
        }
    }
}

/// A reference anchor inside a network
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAnchor {
    pub anchor_id: String,
    pub position: Vector3<f64>,
    pub category: AnchorCategory,
    pub weight: f64,
    pub distance: f64,
    /// Offset from the primary to this reference when it joined the network
    pub expected_offset: Vector3<f64>,
    pub stability_contribution: f64,
}

/// Reference network for one tracked object
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityNetwork {
    pub object_id: String,
    pub primary_position: Vector3<f64>,
    pub search_radius_m: f64,
    pub reference_anchors: Vec<ReferenceAnchor>,
    pub stability_score: f64,
    pub last_updated_ms: u64,
}

/// Result of comparing expected and current reference geometry
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    pub has_drift: bool,
    pub magnitude_m: f64,
    pub confidence: f64,
    /// Weighted drift of the primary relative to its references
    pub drift: Vector3<f64>,
    /// References that could be measured
    pub reference_count: usize,
    /// Whether enough references existed for a meaningful answer
    pub sufficient: bool,
}

impl DriftReport {
    fn insufficient(reference_count: usize, stability_score: f64) -> Self {
        Self {
            has_drift: false,
            magnitude_m: 0.0,
            confidence: (stability_score * reference_count as f64 / 3.0).min(1.0),
            drift: Vector3::zeros(),
            reference_count,
            sufficient: false,
        }
    }
}

/// A correction computed against a snapshot, not yet applied
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionPlan {
    pub object_id: String,
    pub delta: Vector3<f64>,
    pub report: DriftReport,
}

impl StabilityNetwork {
    /// Number of references in the network
    pub fn reference_count(&self) -> usize {
        self.reference_anchors.len()
    }

    /// Compare the recorded reference offsets with what the source reports now
    pub fn measure_drift(
        &self,
        primary: &Vector3<f64>,
        source: &dyn ReferenceAnchorSource,
        config: &StabilityConfig,
    ) -> DriftReport {
        let mut weighted_drift = Vector3::zeros();
        let mut total_weight = 0.0;
        let mut measured = 0usize;

        for reference in &self.reference_anchors {
            let current = match source.current_position(&reference.anchor_id) {
                Some(p) if p.iter().all(|c| c.is_finite()) => p,
                _ => continue,
            };
            measured += 1;
            total_weight += reference.weight;

            let current_offset = current - primary;
            let distance_change = (current_offset.norm() - reference.expected_offset.norm()).abs();
            if distance_change > config.drift_threshold_m {
                // The primary moved by (expected - current) relative to this reference
                weighted_drift += (reference.expected_offset - current_offset) * reference.weight;
            }
        }

        if measured < config.min_reference_anchors || total_weight <= 0.0 {
            return DriftReport::insufficient(measured, self.stability_score);
        }

        let drift = weighted_drift / total_weight;
        let magnitude = drift.norm();
        DriftReport {
            has_drift: magnitude > config.drift_threshold_m,
            magnitude_m: magnitude,
            confidence: (self.stability_score * measured as f64 / 3.0).min(1.0),
            drift,
            reference_count: measured,
            sufficient: true,
        }
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityStatistics {
    pub networks_created: u64,
    pub corrections_applied: u64,
    pub corrections_skipped: u64,
    pub stability_updates: u64,
}

/// Maintains stability networks for all tracked objects
#[derive(Debug, Clone)]
pub struct AnchorStabilityEngine {
    config: StabilityConfig,
    networks: HashMap<String, StabilityNetwork>,
    correction_limiter: RateLimiter<String>,
    last_stability_update_ms: Option<u64>,
    tracking_quality: TrackingQuality,
    statistics: StabilityStatistics,
    validator: DataValidator,
}

impl Default for AnchorStabilityEngine {
    fn default() -> Self {
        Self::new(StabilityConfig::default())
    }
}

impl AnchorStabilityEngine {
    pub fn new(config: StabilityConfig) -> Self {
        let correction_limiter = RateLimiter::new(config.correction_interval_ms);
        Self {
            config,
            networks: HashMap::new(),
            correction_limiter,
            last_stability_update_ms: None,
            tracking_quality: TrackingQuality::Normal,
            statistics: StabilityStatistics::default(),
            validator: DataValidator::new(),
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub fn statistics(&self) -> &StabilityStatistics {
        &self.statistics
    }

    /// Latest tracking quality, used as the primary anchor's own stability estimate
    pub fn set_tracking_quality(&mut self, quality: TrackingQuality) {
        self.tracking_quality = quality;
    }

    pub fn tracking_quality(&self) -> TrackingQuality {
        self.tracking_quality
    }

    pub fn network(&self, object_id: &str) -> Option<&StabilityNetwork> {
        self.networks.get(object_id)
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn stability_score(&self, object_id: &str) -> Option<f64> {
        self.networks.get(object_id).map(|n| n.stability_score)
    }

    /// Build (or rebuild) the reference network for an object
    pub fn create_network(
        &mut self,
        object_id: &str,
        primary_position: Vector3<f64>,
        search_radius_m: f64,
        source: &dyn ReferenceAnchorSource,
        now_ms: u64,
    ) -> GeoAnchorResult<&StabilityNetwork> {
        self.validator.validate_vector("primary_position", &primary_position)?;
        if !search_radius_m.is_finite() || search_radius_m <= 0.0 {
            return Err(GeoAnchorError::InvalidInput {
                field: "search_radius_m",
                reason: format!("radius must be positive, got {}", search_radius_m),
            });
        }

        let candidates = source.anchors_within(&primary_position, search_radius_m);
        let mut references: Vec<ReferenceAnchor> = candidates
            .iter()
            .filter_map(|candidate| self.build_reference(candidate, &primary_position, search_radius_m))
            .collect();
        self.rank_and_trim(&mut references);

        let mut network = StabilityNetwork {
            object_id: object_id.to_string(),
            primary_position,
            search_radius_m,
            reference_anchors: references,
            stability_score: 0.0,
            last_updated_ms: now_ms,
        };
        network.stability_score = self.compute_score(&network.reference_anchors);

        debug!(
            object_id,
            references = network.reference_count(),
            score = network.stability_score,
            "stability network created"
        );

        self.statistics.networks_created += 1;
        self.correction_limiter.forget(&object_id.to_string());
        self.networks.insert(object_id.to_string(), network);
        self.networks
            .get(object_id)
            .ok_or_else(|| GeoAnchorError::UnknownObject(object_id.to_string()))
    }

    pub fn remove_network(&mut self, object_id: &str) -> Option<StabilityNetwork> {
        self.correction_limiter.forget(&object_id.to_string());
        self.networks.remove(object_id)
    }

    /// Measure drift for an object at its current position
    pub fn detect_drift(
        &self,
        object_id: &str,
        primary_position: &Vector3<f64>,
        source: &dyn ReferenceAnchorSource,
    ) -> GeoAnchorResult<DriftReport> {
        self.validator.validate_vector("primary_position", primary_position)?;
        let network = self
            .networks
            .get(object_id)
            .ok_or_else(|| GeoAnchorError::UnknownObject(object_id.to_string()))?;
        Ok(network.measure_drift(primary_position, source, &self.config))
    }

    /// Work out the next damped correction step without mutating anything.
    ///
    /// Returns `Ok(None)` when no correction is warranted right now.
    pub fn plan_correction(
        &self,
        object_id: &str,
        primary_position: &Vector3<f64>,
        source: &dyn ReferenceAnchorSource,
        now_ms: u64,
    ) -> GeoAnchorResult<Option<CorrectionPlan>> {
        if !self.correction_limiter.is_ready(&object_id.to_string(), now_ms) {
            trace!(object_id, "correction rate limited");
            return Ok(None);
        }

        let report = self.detect_drift(object_id, primary_position, source)?;
        if !report.sufficient {
            return Err(GeoAnchorError::InsufficientReferenceData {
                available: report.reference_count,
                required: self.config.min_reference_anchors,
            });
        }
        if !report.has_drift || report.confidence <= self.config.min_correction_confidence {
            return Ok(None);
        }

        let mut correction = -report.drift;
        let magnitude = correction.norm();
        if magnitude > self.config.max_correction_m {
            correction *= self.config.max_correction_m / magnitude;
        }
        let delta = correction * self.config.correction_damping;

        Ok(Some(CorrectionPlan {
            object_id: object_id.to_string(),
            delta,
            report,
        }))
    }

    /// Apply a planned correction to `primary_position`. Rate limiting is enforced here.
    pub fn commit_correction(
        &mut self,
        plan: &CorrectionPlan,
        primary_position: &mut Vector3<f64>,
        now_ms: u64,
    ) -> bool {
        if !plan.delta.iter().all(|c| c.is_finite()) {
            self.statistics.corrections_skipped += 1;
            return false;
        }
        if !self.networks.contains_key(&plan.object_id) {
            self.statistics.corrections_skipped += 1;
            return false;
        }
        if !self.correction_limiter.try_acquire(&plan.object_id, now_ms) {
            self.statistics.corrections_skipped += 1;
            return false;
        }

        *primary_position += plan.delta;
        if let Some(network) = self.networks.get_mut(&plan.object_id) {
            network.primary_position = *primary_position;
        }
        self.statistics.corrections_applied += 1;

        info!(
            object_id = %plan.object_id,
            drift_m = plan.report.magnitude_m,
            step_m = plan.delta.norm(),
            confidence = plan.report.confidence,
            "drift correction applied"
        );
        true
    }

    /// Plan and commit in one step. Returns whether `primary_position` moved.
    pub fn apply_correction(
        &mut self,
        object_id: &str,
        primary_position: &mut Vector3<f64>,
        source: &dyn ReferenceAnchorSource,
        now_ms: u64,
    ) -> bool {
        match self.plan_correction(object_id, primary_position, source, now_ms) {
            Ok(Some(plan)) => self.commit_correction(&plan, primary_position, now_ms),
            Ok(None) => false,
            Err(e) => {
                debug!(object_id, error = %e, "drift correction skipped");
                self.statistics.corrections_skipped += 1;
                false
            }
        }
    }

    /// Periodic recomputation of reference weights and scores.
    ///
    /// Returns the number of networks refreshed, or 0 when called before the update
    /// interval has elapsed.
    pub fn update_network_stability(&mut self, source: &dyn ReferenceAnchorSource, now_ms: u64) -> usize {
        match self.refresh_networks(source, now_ms) {
            Some(refreshed) => self.install_networks(refreshed, now_ms, |_| true),
            None => 0,
        }
    }

    /// Recompute every network without mutating the engine.
    ///
    /// Returns `None` when the update interval has not elapsed yet.
    pub fn refresh_networks(
        &self,
        source: &dyn ReferenceAnchorSource,
        now_ms: u64,
    ) -> Option<HashMap<String, StabilityNetwork>> {
        if let Some(last) = self.last_stability_update_ms {
            if now_ms.saturating_sub(last) < self.config.stability_update_interval_ms {
                return None;
            }
        }

        let refreshed = self
            .networks
            .iter()
            .map(|(object_id, network)| (object_id.clone(), self.refresh_network(network, source, now_ms)))
            .collect();
        Some(refreshed)
    }

    /// Swap in networks produced by [`refresh_networks`](Self::refresh_networks).
    ///
    /// Networks removed since the refresh, or rejected by `keep`, are discarded. The
    /// primary position is taken from the live network in case a correction landed
    /// in between.
    pub fn install_networks<F>(
        &mut self,
        refreshed: HashMap<String, StabilityNetwork>,
        now_ms: u64,
        keep: F,
    ) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.last_stability_update_ms = Some(now_ms);
        self.statistics.stability_updates += 1;

        let mut installed = 0;
        for (object_id, mut network) in refreshed {
            if !keep(&object_id) {
                continue;
            }
            if let Some(live) = self.networks.get_mut(&object_id) {
                network.primary_position = live.primary_position;
                *live = network;
                installed += 1;
            }
        }
        debug!(networks = installed, "stability networks refreshed");
        installed
    }

    fn refresh_network(
        &self,
        network: &StabilityNetwork,
        source: &dyn ReferenceAnchorSource,
        now_ms: u64,
    ) -> StabilityNetwork {
        let primary = network.primary_position;
        let radius = network.search_radius_m;

        let mut references: Vec<ReferenceAnchor> = network
            .reference_anchors
            .iter()
            .filter_map(|reference| self.refresh_reference(reference, &primary, radius, source))
            .collect();

        // Back-fill with anchors that appeared since the last update
        if references.len() < self.config.max_reference_anchors {
            for candidate in source.anchors_within(&primary, radius) {
                if references.iter().any(|r| r.anchor_id == candidate.anchor_id) {
                    continue;
                }
                if let Some(reference) = self.build_reference(&candidate, &primary, radius) {
                    references.push(reference);
                }
            }
        }
        self.rank_and_trim(&mut references);

        StabilityNetwork {
            stability_score: self.compute_score(&references),
            reference_anchors: references,
            last_updated_ms: now_ms,
            ..network.clone()
        }
    }

    fn build_reference(
        &self,
        observation: &ReferenceObservation,
        primary: &Vector3<f64>,
        radius: f64,
    ) -> Option<ReferenceAnchor> {
        if !observation.is_finite() {
            return None;
        }
        let offset = observation.position - primary;
        let distance = offset.norm();
        if distance < self.config.min_reference_distance_m || distance > radius {
            return None;
        }

        Some(ReferenceAnchor {
            anchor_id: observation.anchor_id.clone(),
            position: observation.position,
            category: observation.category,
            weight: (1.0 - distance / radius) * observation.category.type_weight(),
            distance,
            expected_offset: offset,
            stability_contribution: self.contribution(observation),
        })
    }

    /// Re-measure an existing reference, keeping its recorded baseline offset
    fn refresh_reference(
        &self,
        reference: &ReferenceAnchor,
        primary: &Vector3<f64>,
        radius: f64,
        source: &dyn ReferenceAnchorSource,
    ) -> Option<ReferenceAnchor> {
        let position = source.current_position(&reference.anchor_id)?;
        if !position.iter().all(|c| c.is_finite()) {
            return None;
        }
        let distance = (position - primary).norm();
        if distance > radius {
            return None;
        }

        Some(ReferenceAnchor {
            position,
            distance,
            weight: (1.0 - distance / radius).max(0.0) * reference.category.type_weight(),
            ..reference.clone()
        })
    }

    fn contribution(&self, observation: &ReferenceObservation) -> f64 {
        let maturity = if self.config.anchor_maturity_s > 0.0 {
            (observation.age_seconds / self.config.anchor_maturity_s).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let consistency = if observation.consistency.is_finite() {
            observation.consistency.clamp(0.0, 1.0)
        } else {
            0.0
        };
        0.5 * maturity + 0.5 * consistency
    }

    fn rank_and_trim(&self, references: &mut Vec<ReferenceAnchor>) {
        references.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        references.truncate(self.config.max_reference_anchors);
    }

    fn compute_score(&self, references: &[ReferenceAnchor]) -> f64 {
        if references.len() < self.config.min_reference_anchors {
            return self.config.insufficient_reference_score;
        }

        let total_weight: f64 = references.iter().map(|r| r.weight).sum();
        if total_weight <= 0.0 {
            return self.config.insufficient_reference_score;
        }
        let reference_score = references
            .iter()
            .map(|r| r.weight * r.stability_contribution)
            .sum::<f64>()
            / total_weight;

        let primary_share = self.config.primary_score_share;
        let score = primary_share * self.tracking_quality.stability_estimate()
            + (1.0 - primary_share) * reference_score;
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory anchor source whose anchors can be moved between calls
    #[derive(Default)]
    pub(crate) struct MockAnchorSource {
        anchors: Mutex<Vec<ReferenceObservation>>,
    }

    impl MockAnchorSource {
        pub(crate) fn with_anchors(anchors: Vec<ReferenceObservation>) -> Self {
            Self { anchors: Mutex::new(anchors) }
        }

        /// Four mature plane anchors two meters around the origin
        pub(crate) fn square() -> Self {
            Self::with_anchors(vec![
                mature("north", Vector3::new(0.0, 0.0, 2.0)),
                mature("east", Vector3::new(2.0, 0.0, 0.0)),
                mature("south", Vector3::new(0.0, 0.0, -2.0)),
                mature("west", Vector3::new(-2.0, 0.0, 0.0)),
            ])
        }

        pub(crate) fn shift_all(&self, delta: Vector3<f64>) {
            for anchor in self.anchors.lock().unwrap().iter_mut() {
                anchor.position += delta;
            }
        }

        pub(crate) fn remove(&self, anchor_id: &str) {
            self.anchors.lock().unwrap().retain(|a| a.anchor_id != anchor_id);
        }

        pub(crate) fn add(&self, anchor: ReferenceObservation) {
            self.anchors.lock().unwrap().push(anchor);
        }
    }

    impl ReferenceAnchorSource for MockAnchorSource {
        fn anchors_within(&self, center: &Vector3<f64>, radius_m: f64) -> Vec<ReferenceObservation> {
            self.anchors
                .lock()
                .unwrap()
                .iter()
                .filter(|a| (a.position - center).norm() <= radius_m)
                .cloned()
                .collect()
        }

        fn current_position(&self, anchor_id: &str) -> Option<Vector3<f64>> {
            self.anchors
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.anchor_id == anchor_id)
                .map(|a| a.position)
        }
    }

    pub(crate) fn mature(id: &str, position: Vector3<f64>) -> ReferenceObservation {
        ReferenceObservation::new(id, position, AnchorCategory::Plane).with_age(30.0)
    }

    fn engine_with_network(source: &MockAnchorSource) -> AnchorStabilityEngine {
        let mut engine = AnchorStabilityEngine::default();
        engine
            .create_network("chest", Vector3::zeros(), 5.0, source, 0)
            .unwrap();
        engine
    }

    #[test]
    fn test_create_network_weights_and_score() {
        let source = MockAnchorSource::square();
        let engine = engine_with_network(&source);
        let network = engine.network("chest").unwrap();

        assert_eq!(network.reference_count(), 4);
        for reference in &network.reference_anchors {
            assert!((reference.distance - 2.0).abs() < 1e-12);
            // (1 - 2/5) * 0.9
            assert!((reference.weight - 0.54).abs() < 1e-12);
            assert!((reference.stability_contribution - 1.0).abs() < 1e-12);
        }
        // 0.4 * 0.9 (normal tracking) + 0.6 * 1.0
        assert!((network.stability_score - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_network_keeps_top_five_by_weight() {
        let source = MockAnchorSource::with_anchors(
            (1..=8)
                .map(|i| {
                    ReferenceObservation::new(
                        format!("a{}", i),
                        Vector3::new(i as f64 * 0.5, 0.0, 0.0),
                        AnchorCategory::Mesh,
                    )
                })
                .collect(),
        );
        let engine = engine_with_network(&source);
        let network = engine.network("chest").unwrap();

        assert_eq!(network.reference_count(), 5);
        let ids: Vec<&str> = network.reference_anchors.iter().map(|r| r.anchor_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3", "a4", "a5"]);
        assert!(network
            .reference_anchors
            .windows(2)
            .all(|pair| pair[0].weight >= pair[1].weight));
    }

    #[test]
    fn test_category_ranking() {
        assert!(AnchorCategory::Mesh.type_weight() > AnchorCategory::Plane.type_weight());
        assert!(AnchorCategory::Plane.type_weight() > AnchorCategory::GeoAnchor.type_weight());
        assert!(AnchorCategory::GeoAnchor.type_weight() > AnchorCategory::Image.type_weight());
        assert!(AnchorCategory::Image.type_weight() > AnchorCategory::Generic.type_weight());
    }

    #[test]
    fn test_single_reference_falls_back_to_low_score() {
        let source = MockAnchorSource::with_anchors(vec![mature("only", Vector3::new(1.0, 0.0, 0.0))]);
        let mut engine = engine_with_network(&source);
        assert_eq!(engine.stability_score("chest"), Some(0.3));

        source.shift_all(Vector3::new(0.5, 0.0, 0.0));
        let report = engine.detect_drift("chest", &Vector3::zeros(), &source).unwrap();
        assert!(!report.sufficient);
        assert!(!report.has_drift);

        let mut primary = Vector3::zeros();
        assert!(!engine.apply_correction("chest", &mut primary, &source, 5_000));
        assert_eq!(primary, Vector3::zeros());
        assert!(matches!(
            engine.plan_correction("chest", &primary, &source, 5_000),
            Err(GeoAnchorError::InsufficientReferenceData { available: 1, required: 2 })
        ));
    }

    #[test]
    fn test_no_drift_when_geometry_unchanged() {
        let source = MockAnchorSource::square();
        let engine = engine_with_network(&source);
        let report = engine.detect_drift("chest", &Vector3::zeros(), &source).unwrap();
        assert!(!report.has_drift);
        assert!(report.magnitude_m < 1e-12);
        assert_eq!(report.reference_count, 4);
        assert!((report.confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_shift_below_threshold_is_ignored() {
        let source = MockAnchorSource::square();
        let engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.03, 0.0, 0.0));
        let report = engine.detect_drift("chest", &Vector3::zeros(), &source).unwrap();
        assert!(!report.has_drift);
    }

    #[test]
    fn test_drift_detected_and_corrected_toward_references() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.2, 0.0, 0.0));

        let report = engine.detect_drift("chest", &Vector3::zeros(), &source).unwrap();
        assert!(report.has_drift);
        assert!(report.magnitude_m > 0.05);

        let mut primary = Vector3::zeros();
        assert!(engine.apply_correction("chest", &mut primary, &source, 1_000));
        // Object follows its references (+X), in a damped step
        assert!(primary.x > 0.0);
        assert!(primary.norm() <= 0.10 + 1e-12);
        assert!(primary.norm() < 0.2);
    }

    #[test]
    fn test_correction_is_bounded_for_huge_drift() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(-1.5, 0.0, 1.2));

        let mut primary = Vector3::zeros();
        assert!(engine.apply_correction("chest", &mut primary, &source, 1_000));
        assert!(primary.norm() <= 0.10 + 1e-12);
    }

    #[test]
    fn test_correction_rate_limited() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.0, 0.0, 0.4));

        let mut primary = Vector3::zeros();
        assert!(engine.apply_correction("chest", &mut primary, &source, 10_000));
        let after_first = primary;
        assert!(!engine.apply_correction("chest", &mut primary, &source, 10_400));
        assert!(!engine.apply_correction("chest", &mut primary, &source, 10_999));
        assert_eq!(primary, after_first);

        assert!(engine.apply_correction("chest", &mut primary, &source, 11_000));
        assert!(primary.z > after_first.z);
    }

    #[test]
    fn test_repeated_corrections_converge() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.25, 0.0, 0.0));

        let mut primary = Vector3::zeros();
        for step in 0..40u64 {
            engine.apply_correction("chest", &mut primary, &source, 1_000 * (step + 1));
        }
        // Never overshoots, and stops once the measured drift is under the threshold
        assert!(primary.x > 0.1);
        assert!(primary.x < 0.25);
        let report = engine.detect_drift("chest", &primary, &source).unwrap();
        assert!(!report.has_drift);
    }

    #[test]
    fn test_low_confidence_blocks_correction() {
        let mut engine = AnchorStabilityEngine::default();
        engine.set_tracking_quality(TrackingQuality::NotAvailable);
        // Young, jittery anchors
        let shaky = MockAnchorSource::with_anchors(vec![
            ReferenceObservation::new("a", Vector3::new(1.0, 0.0, 0.0), AnchorCategory::Generic).with_consistency(0.1),
            ReferenceObservation::new("b", Vector3::new(-1.0, 0.0, 0.0), AnchorCategory::Generic).with_consistency(0.1),
        ]);
        engine.create_network("chest", Vector3::zeros(), 5.0, &shaky, 0).unwrap();
        shaky.shift_all(Vector3::new(0.3, 0.0, 0.0));

        let report = engine.detect_drift("chest", &Vector3::zeros(), &shaky).unwrap();
        assert!(report.has_drift);
        assert!(report.confidence <= 0.6);

        let mut primary = Vector3::zeros();
        assert!(!engine.apply_correction("chest", &mut primary, &shaky, 5_000));
        assert_eq!(primary, Vector3::zeros());
    }

    #[test]
    fn test_non_finite_primary_rejected() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.3, 0.0, 0.0));

        let mut primary = Vector3::new(f64::NAN, 0.0, 0.0);
        assert!(!engine.apply_correction("chest", &mut primary, &source, 5_000));
        assert!(primary.x.is_nan());
        assert_eq!(
            engine
                .create_network("bad", Vector3::new(0.0, f64::INFINITY, 0.0), 5.0, &source, 0)
                .err(),
            Some(GeoAnchorError::NonFiniteValue { field: "primary_position" })
        );
        assert_eq!(
            engine.detect_drift("chest", &primary, &source).err(),
            Some(GeoAnchorError::NonFiniteValue { field: "primary_position" })
        );
    }

    #[test]
    fn test_commit_discards_plan_for_removed_network() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.3, 0.0, 0.0));

        let mut primary = Vector3::zeros();
        let plan = engine
            .plan_correction("chest", &primary, &source, 2_000)
            .unwrap()
            .expect("drift should produce a plan");
        engine.remove_network("chest");
        assert!(!engine.commit_correction(&plan, &mut primary, 2_000));
        assert_eq!(primary, Vector3::zeros());
    }

    #[test]
    fn test_update_network_stability_is_throttled_and_refreshes() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);

        assert_eq!(engine.update_network_stability(&source, 0), 1);
        assert_eq!(engine.update_network_stability(&source, 1_500), 0);

        // Two anchors vanish: the network becomes under-determined
        source.remove("north");
        source.remove("east");
        source.remove("south");
        assert_eq!(engine.update_network_stability(&source, 2_000), 1);
        assert_eq!(engine.network("chest").unwrap().reference_count(), 1);
        assert_eq!(engine.stability_score("chest"), Some(0.3));

        // A new mesh anchor shows up and is back-filled
        source.add(mature("mesh", Vector3::new(0.0, 1.0, 1.0)));
        assert_eq!(engine.update_network_stability(&source, 4_000), 1);
        let network = engine.network("chest").unwrap();
        assert_eq!(network.reference_count(), 2);
        assert!(network.stability_score > 0.3);
        assert_eq!(network.last_updated_ms, 4_000);
    }

    #[test]
    fn test_install_skips_networks_removed_meanwhile() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        engine
            .create_network("coin", Vector3::new(0.5, 0.0, 0.5), 5.0, &source, 0)
            .unwrap();

        let refreshed = engine.refresh_networks(&source, 3_000).unwrap();
        assert_eq!(refreshed.len(), 2);
        engine.remove_network("coin");

        assert_eq!(engine.install_networks(refreshed, 3_000, |id| id != "chest"), 0);
        assert!(engine.network("coin").is_none());
        assert!(engine.refresh_networks(&source, 4_000).is_none());
    }

    #[test]
    fn test_snapshot_replays_captured_anchors() {
        let source = MockAnchorSource::square();
        let snapshot = AnchorSnapshot::capture(&source, &Vector3::zeros(), 5.0);
        source.shift_all(Vector3::new(10.0, 0.0, 0.0));

        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.current_position("north"), Some(Vector3::new(0.0, 0.0, 2.0)));
        assert_eq!(snapshot.anchors_within(&Vector3::new(2.0, 0.0, 0.0), 0.5).len(), 1);
    }

    #[test]
    fn test_refresh_keeps_baseline_offsets() {
        let source = MockAnchorSource::square();
        let mut engine = engine_with_network(&source);
        source.shift_all(Vector3::new(0.2, 0.0, 0.0));
        engine.update_network_stability(&source, 0);

        // Drift is still visible after the refresh
        let report = engine.detect_drift("chest", &Vector3::zeros(), &source).unwrap();
        assert!(report.has_drift);
    }
}
