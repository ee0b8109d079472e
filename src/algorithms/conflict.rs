//! Multi-observer conflict detection and resolution
//!
//! Every update to a tracked object, local or remote, is recorded as an [`ObjectVersion`].
//! When two or more recent versions disagree on position by more than the configured
//! threshold, the resolver picks one canonical state: AR-derived placements beat
//! GPS-only placements, then the latest timestamp wins, then the highest version number.

use crate::algorithms::coordinates::distance_and_bearing;
use crate::core::TrackedObject;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// One observed state of a tracked object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub version: i64,
    pub state: TrackedObject,
    pub timestamp_ms: u64,
    pub observer_id: String,
}

impl ObjectVersion {
    pub fn new(version: i64, state: TrackedObject, timestamp_ms: u64, observer_id: impl Into<String>) -> Self {
        Self {
            version,
            state,
            timestamp_ms,
            observer_id: observer_id.into(),
        }
    }

    pub fn object_id(&self) -> &str {
        &self.state.id
    }

    fn is_duplicate_of(&self, other: &ObjectVersion) -> bool {
        self.version == other.version
            && self.observer_id == other.observer_id
            && self.timestamp_ms == other.timestamp_ms
            && self.state.same_placement(&other.state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Versions kept per object
    pub max_history: usize,
    /// Versions older than this are pruned, except the newest one (ms)
    pub retention_ms: u64,
    /// Only versions this recent take part in conflict detection (ms)
    pub conflict_window_ms: u64,
    /// Positional disagreement that counts as a conflict (meters)
    pub disagreement_threshold_m: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            max_history: 32,
            retention_ms: 5 * 60 * 1_000,
            conflict_window_ms: 30 * 1_000,
            disagreement_threshold_m: 0.10,
        }
    }
}

/// Disagreeing recent versions of one object
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub object_id: String,
    pub versions: Vec<ObjectVersion>,
    pub max_disagreement_m: f64,
}

/// Why a version won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionReason {
    /// Winner carried AR-derived coordinates and at least one contender did not
    ArPreferred,
    /// Winner had the latest timestamp
    LatestTimestamp,
    /// Timestamps tied; highest version number taken
    HighestVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub winner: ObjectVersion,
    pub reason: ResolutionReason,
    pub contenders: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictStatistics {
    pub versions_recorded: u64,
    pub conflicts_detected: u64,
    pub resolutions_applied: u64,
    pub stale_rejections: u64,
}

/// Positional disagreement between two versions in meters.
///
/// Offsets are compared directly when both were placed against the same origin;
/// otherwise the GPS coordinates are compared.
pub fn disagreement_m(a: &TrackedObject, b: &TrackedObject) -> f64 {
    if a.origin_at_placement == b.origin_at_placement {
        a.offset.distance_to(&b.offset)
    } else {
        distance_and_bearing(&a.last_known_gps, &b.last_known_gps).0
    }
}

fn precedence(a: &ObjectVersion, b: &ObjectVersion) -> Ordering {
    a.state
        .has_ar_data()
        .cmp(&b.state.has_ar_data())
        .then(a.timestamp_ms.cmp(&b.timestamp_ms))
        .then(a.version.cmp(&b.version))
}

/// Pick the canonical version among contenders
pub fn select_winner(versions: &[ObjectVersion]) -> Option<(&ObjectVersion, ResolutionReason)> {
    let winner = versions.iter().max_by(|a, b| precedence(a, b))?;
    let others = || versions.iter().filter(move |v| !std::ptr::eq(*v, winner));

    let reason = if winner.state.has_ar_data() && others().any(|v| !v.state.has_ar_data()) {
        ResolutionReason::ArPreferred
    } else if others()
        .filter(|v| v.state.has_ar_data() == winner.state.has_ar_data())
        .all(|v| v.timestamp_ms < winner.timestamp_ms)
    {
        ResolutionReason::LatestTimestamp
    } else {
        ResolutionReason::HighestVersion
    };
    Some((winner, reason))
}

/// Bounded per-object version history with conflict resolution
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ConflictConfig,
    histories: HashMap<String, VecDeque<ObjectVersion>>,
    statistics: ConflictStatistics,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
            statistics: ConflictStatistics::default(),
        }
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    pub fn statistics(&self) -> &ConflictStatistics {
        &self.statistics
    }

    /// Append a version to its object's history.
    ///
    /// Exact duplicates (same observer, version, timestamp and placement) are ignored
    /// and `Ok(false)` is returned.
    pub fn record_version(&mut self, version: ObjectVersion, now_ms: u64) -> GeoAnchorResult<bool> {
        version.state.offset.validate()?;
        version.state.last_known_gps.validate()?;

        let retention_ms = self.config.retention_ms;
        let max_history = self.config.max_history.max(1);
        let history = self.histories.entry(version.state.id.clone()).or_default();
        if history.iter().any(|existing| existing.is_duplicate_of(&version)) {
            return Ok(false);
        }

        debug!(
            object_id = %version.state.id,
            version = version.version,
            observer = %version.observer_id,
            "object version recorded"
        );
        history.push_back(version);
        self.statistics.versions_recorded += 1;

        // Oldest first out, but never drop the newest entry
        while history.len() > max_history {
            history.pop_front();
        }
        while history.len() > 1
            && history
                .front()
                .map_or(false, |v| now_ms.saturating_sub(v.timestamp_ms) > retention_ms)
        {
            history.pop_front();
        }
        Ok(true)
    }

    pub fn history(&self, object_id: &str) -> Vec<&ObjectVersion> {
        self.histories
            .get(object_id)
            .map(|h| h.iter().collect())
            .unwrap_or_default()
    }

    /// Versions young enough to take part in conflict detection
    pub fn recent_versions(&self, object_id: &str, now_ms: u64) -> Vec<&ObjectVersion> {
        let window = self.config.conflict_window_ms;
        self.histories
            .get(object_id)
            .map(|h| {
                h.iter()
                    .filter(|v| now_ms.saturating_sub(v.timestamp_ms) <= window)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn detect_conflict(&self, object_id: &str, now_ms: u64) -> Option<Conflict> {
        let recent = self.recent_versions(object_id, now_ms);
        if recent.len() < 2 {
            return None;
        }

        let mut max_disagreement: f64 = 0.0;
        for (i, a) in recent.iter().enumerate() {
            for b in &recent[i + 1..] {
                max_disagreement = max_disagreement.max(disagreement_m(&a.state, &b.state));
            }
        }
        if max_disagreement <= self.config.disagreement_threshold_m {
            return None;
        }

        Some(Conflict {
            object_id: object_id.to_string(),
            versions: recent.into_iter().cloned().collect(),
            max_disagreement_m: max_disagreement,
        })
    }

    /// Detect and resolve a conflict for one object, if there is one
    pub fn resolve(&mut self, object_id: &str, now_ms: u64) -> Option<ConflictResolution> {
        let conflict = self.detect_conflict(object_id, now_ms)?;
        self.statistics.conflicts_detected += 1;

        let (winner, reason) = select_winner(&conflict.versions)?;
        info!(
            object_id,
            contenders = conflict.versions.len(),
            disagreement_m = conflict.max_disagreement_m,
            winner_version = winner.version,
            winner_observer = %winner.observer_id,
            ?reason,
            "conflict resolved"
        );
        Some(ConflictResolution {
            winner: winner.clone(),
            reason,
            contenders: conflict.versions.len(),
        })
    }

    /// Make the winner of a resolution the canonical state in `objects`.
    ///
    /// The winner was chosen on AR data and timestamp, so its version number does not
    /// gate it; the canonical `server_version` never moves backwards. Returns
    /// `Ok(false)` when the canonical state already equals the winner, so a repeated
    /// application changes nothing.
    pub fn apply_resolved_version(
        &mut self,
        objects: &mut HashMap<String, TrackedObject>,
        winner: &ObjectVersion,
    ) -> GeoAnchorResult<bool> {
        winner.state.offset.validate()?;
        winner.state.last_known_gps.validate()?;

        let mut canonical = winner.state.clone();
        canonical.server_version = winner.version;

        if let Some(current) = objects.get(&winner.state.id) {
            canonical.server_version = canonical.server_version.max(current.server_version);
            if current.same_placement(&canonical) {
                return Ok(false);
            }
            canonical.generation = current.generation;
        }

        objects.insert(canonical.id.clone(), canonical);
        self.statistics.resolutions_applied += 1;
        Ok(true)
    }

    /// Apply an update that is not in conflict with anything recent.
    ///
    /// Versions older than the canonical `server_version` are rejected with
    /// `StaleConflict`; otherwise this behaves like
    /// [`apply_resolved_version`](Self::apply_resolved_version).
    pub fn apply_version(
        &mut self,
        objects: &mut HashMap<String, TrackedObject>,
        version: &ObjectVersion,
    ) -> GeoAnchorResult<bool> {
        if let Some(current) = objects.get(&version.state.id) {
            if version.version < current.server_version {
                self.statistics.stale_rejections += 1;
                warn!(
                    object_id = %version.state.id,
                    version = version.version,
                    canonical = current.server_version,
                    "stale version ignored"
                );
                return Err(GeoAnchorError::StaleConflict {
                    object_id: version.state.id.clone(),
                    version: version.version,
                });
            }
        }
        self.apply_resolved_version(objects, version)
    }

    /// Carry a local change to the canonical object (a drift correction, or re-anchoring
    /// a degraded placement) into the history entries describing its previous placement,
    /// so a later resolution in their favour does not undo it. Returns the number of
    /// entries amended.
    pub fn amend_state(&mut self, before: &TrackedObject, after: &TrackedObject) -> usize {
        let Some(history) = self.histories.get_mut(&before.id) else {
            return 0;
        };

        let mut amended = 0;
        for entry in history.iter_mut() {
            let state = &mut entry.state;
            if state.offset == before.offset
                && state.origin_at_placement == before.origin_at_placement
                && state.anchor_transform == before.anchor_transform
            {
                state.offset = after.offset;
                state.origin_at_placement = after.origin_at_placement;
                state.last_known_gps = after.last_known_gps;
                amended += 1;
            }
        }
        if amended > 0 {
            debug!(object_id = %before.id, entries = amended, "version history amended");
        }
        amended
    }

    /// Drop the history of a removed object
    pub fn forget(&mut self, object_id: &str) {
        self.histories.remove(object_id);
    }

    pub fn tracked_objects(&self) -> usize {
        self.histories.len()
    }
}
