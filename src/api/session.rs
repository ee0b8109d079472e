//! Single-writer session owning all shared anchor state
//!
//! The GPS stream and the camera-frame stream feed one [`GeoAnchorSession`]. Queries
//! take a read lock; every mutation takes the write lock for a short critical section.
//! Expensive work (anchor searches, drift planning, network refreshes) runs against a
//! snapshot without the lock, and its result is committed only if the object it was
//! computed for still exists with the same placement generation.

use crate::algorithms::conflict::{ConflictResolution, ConflictResolver, ObjectVersion};
use crate::algorithms::stability::{AnchorSnapshot, AnchorStabilityEngine, CorrectionPlan, ReferenceAnchorSource};
use crate::api::positioning::{PlacementRecord, PositioningService};
use crate::api::scheduler::Ticker;
use crate::api::transport::{spawn_job, PositionSync, SyncJob};
use crate::core::{AnchorOffset, GeoPoint, GpsFix, OriginState, Pose, TrackedObject, TrackingQuality};
use crate::processing::origin::{OriginResolver, OriginTransition, ResolverState};
use crate::processing::throttle::{FrameThrottle, OperationClass};
use crate::utils::config::CoreConfig;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

/// Source of "now" in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock advanced by hand, for replaying recorded sessions and for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Anchor subsystem shared with background work
pub type SharedAnchorSource = Arc<dyn ReferenceAnchorSource + Send + Sync>;

/// Callback function type for session events
pub type EventCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Notifications for the session's owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    OriginChanged(OriginTransition),
    ObjectPlaced {
        object_id: String,
        generation: u64,
    },
    ObjectRemoved {
        object_id: String,
    },
    /// An object placed in degraded mode got a real location from a new accurate origin
    PlacementAnchored {
        object_id: String,
        location: GeoPoint,
    },
    DriftCorrected {
        object_id: String,
        delta: AnchorOffset,
        offset: AnchorOffset,
    },
    ConflictResolved {
        object_id: String,
        resolution: ConflictResolution,
        changed: bool,
    },
    /// Sensor or remote data rejected at the boundary; prior state kept
    InputRejected {
        source: &'static str,
        error: GeoAnchorError,
    },
    /// Background persistence or broadcast gave up
    SyncFailed {
        object_id: String,
        error: GeoAnchorError,
    },
}

/// What happened to a version received from another observer
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteUpdate {
    /// No conflict; the version became canonical
    Applied,
    /// Conflicting versions were reconciled
    Resolved {
        resolution: ConflictResolution,
        changed: bool,
    },
    /// Canonical state already matched
    Unchanged,
    /// Older than the canonical state, or for an object removed locally
    Stale,
}

struct SessionState {
    resolver: OriginResolver,
    objects: HashMap<String, TrackedObject>,
    stability: AnchorStabilityEngine,
    conflicts: ConflictResolver,
    throttle: FrameThrottle,
    /// Last server version of removed objects, so stale remote copies cannot revive them
    tombstones: HashMap<String, i64>,
    next_generation: u64,
}

impl SessionState {
    fn assign_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Periodic maintenance threads; dropping this stops them
pub struct MaintenanceTickers {
    tickers: Vec<Ticker>,
}

impl MaintenanceTickers {
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn stop(self) {
        for ticker in self.tickers {
            ticker.stop();
        }
    }
}

/// Owner of the origin, tracked objects, stability networks and version histories
#[derive(Clone)]
pub struct GeoAnchorSession {
    config: Arc<CoreConfig>,
    state: Arc<RwLock<SessionState>>,
    clock: Arc<dyn Clock>,
    anchors: SharedAnchorSource,
    sync: Option<Arc<dyn PositionSync>>,
    positioning: PositioningService,
    callbacks: Arc<RwLock<HashMap<CallbackHandle, EventCallback>>>,
    callback_counter: Arc<AtomicU32>,
    pending_sync: Arc<Mutex<Vec<JoinHandle<GeoAnchorResult<()>>>>>,
}

fn emit_to(callbacks: &RwLock<HashMap<CallbackHandle, EventCallback>>, event: SessionEvent) {
    let callbacks = callbacks.read().unwrap_or_else(PoisonError::into_inner);
    for callback in callbacks.values() {
        callback(event.clone());
    }
}

impl GeoAnchorSession {
    pub fn new(config: CoreConfig, clock: Arc<dyn Clock>, anchors: SharedAnchorSource) -> GeoAnchorResult<Self> {
        config.validate()?;

        let now = clock.now_ms();
        let state = SessionState {
            resolver: OriginResolver::new(config.origin.clone(), now),
            objects: HashMap::new(),
            stability: AnchorStabilityEngine::new(config.effective_stability()),
            conflicts: ConflictResolver::new(config.conflict.clone()),
            throttle: FrameThrottle::new(&config.throttle),
            tombstones: HashMap::new(),
            next_generation: 0,
        };

        info!(observer = %config.observer_id, "anchor session started");
        Ok(Self {
            positioning: PositioningService::with_validation(config.validation.clone()),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            anchors,
            sync: None,
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            callback_counter: Arc::new(AtomicU32::new(0)),
            pending_sync: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Attach the remote store / broadcast channel
    pub fn with_sync(mut self, sync: Arc<dyn PositionSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- callbacks ----

    pub fn register_event_callback(&self, callback: EventCallback) -> CallbackHandle {
        let handle = CallbackHandle(self.callback_counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, callback);
        handle
    }

    pub fn unregister_callback(&self, handle: CallbackHandle) -> GeoAnchorResult<()> {
        let removed = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(GeoAnchorError::InvalidInput {
                field: "callback_handle",
                reason: format!("no callback registered for handle {}", handle.id()),
            })
        }
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn emit(&self, event: SessionEvent) {
        emit_to(&self.callbacks, event);
    }

    fn reject(&self, source: &'static str, error: GeoAnchorError) -> GeoAnchorError {
        warn!(source, error = %error, "input rejected");
        self.emit(SessionEvent::InputRejected {
            source,
            error: error.clone(),
        });
        error
    }

    // ---- sensor streams ----

    /// Feed one fix from the location stream
    pub fn handle_gps_fix(&self, fix: &GpsFix) -> GeoAnchorResult<Option<OriginTransition>> {
        let now = self.clock.now_ms();
        let (result, records) = {
            let mut state = self.write_state();
            let result = state.resolver.handle_fix(fix, now);
            let records = match &result {
                Ok(Some(OriginTransition::Established(current)))
                | Ok(Some(OriginTransition::ExitedDegraded { current, .. })) => {
                    self.anchor_degraded_placements(&mut state, &current.origin)
                }
                _ => Vec::new(),
            };
            (result, records)
        };

        match result {
            Ok(Some(transition)) => {
                self.emit(SessionEvent::OriginChanged(transition.clone()));
                for record in records {
                    self.emit(SessionEvent::PlacementAnchored {
                        object_id: record.object_id.clone(),
                        location: GeoPoint {
                            latitude: record.latitude,
                            longitude: record.longitude,
                        },
                    });
                    self.dispatch_sync(SyncJob::Persist(record));
                }
                Ok(Some(transition))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.reject("gps_fix", e)),
        }
    }

    /// Re-anchor objects placed against the placeholder origin to `origin`, keeping
    /// their AR offsets. Returns the persistence payloads skipped at placement.
    fn anchor_degraded_placements(&self, state: &mut SessionState, origin: &GeoPoint) -> Vec<PlacementRecord> {
        let SessionState { objects, conflicts, .. } = state;
        let mut records = Vec::new();
        for object in objects
            .values_mut()
            .filter(|o| o.origin_at_placement == GeoPoint::DEGRADED_SENTINEL)
        {
            let location = match self.positioning.calculate_real_world_position(
                origin,
                &object.offset,
                object.anchor_transform.as_deref(),
            ) {
                Ok(location) => location,
                Err(e) => {
                    warn!(object_id = %object.id, error = %e, "degraded placement left unanchored");
                    continue;
                }
            };

            let before = object.clone();
            object.origin_at_placement = *origin;
            object.last_known_gps = location;
            conflicts.amend_state(&before, object);

            match self.positioning.placement_record(object) {
                Ok(record) => records.push(record),
                Err(e) => warn!(object_id = %object.id, error = %e, "anchored placement not persisted"),
            }
        }
        if !records.is_empty() {
            info!(objects = records.len(), "degraded placements anchored to GPS origin");
        }
        records
    }

    /// Feed one camera frame: a column-major 4x4 pose and the tracking quality
    pub fn handle_camera_frame(
        &self,
        transform: &[f32; 16],
        quality: TrackingQuality,
    ) -> GeoAnchorResult<Option<OriginTransition>> {
        let pose = Pose::from_column_major(transform).map_err(|e| self.reject("camera_pose", e))?;

        let now = self.clock.now_ms();
        let transition = {
            let mut state = self.write_state();
            state.resolver.observe_camera_pose(&pose);
            state.stability.set_tracking_quality(quality);
            state.resolver.tick(now)
        };
        if let Some(transition) = &transition {
            self.emit(SessionEvent::OriginChanged(transition.clone()));
        }
        Ok(transition)
    }

    /// Height of a horizontal surface found by plane detection
    pub fn report_ground_surface(&self, height: f32) -> GeoAnchorResult<()> {
        if !height.is_finite() {
            return Err(self.reject("ground_surface", GeoAnchorError::NonFiniteValue { field: "ground_surface" }));
        }
        self.write_state().resolver.report_ground_surface(height);
        Ok(())
    }

    /// Check the degraded-mode timeout without a new frame
    pub fn tick_origin(&self) -> Option<OriginTransition> {
        let now = self.clock.now_ms();
        let transition = self.write_state().resolver.tick(now);
        if let Some(transition) = &transition {
            self.emit(SessionEvent::OriginChanged(transition.clone()));
        }
        transition
    }

    pub fn reset_origin(&self) -> Option<OriginTransition> {
        let now = self.clock.now_ms();
        let transition = self.write_state().resolver.reset(now);
        if let Some(transition) = &transition {
            self.emit(SessionEvent::OriginChanged(transition.clone()));
        }
        transition
    }

    pub fn origin_state(&self) -> GeoAnchorResult<OriginState> {
        self.read_state().resolver.origin().copied()
    }

    pub fn resolver_state(&self) -> ResolverState {
        self.read_state().resolver.state()
    }

    /// Gate per-frame work for an operation class, optionally per object
    pub fn try_schedule(&self, class: OperationClass, object_id: Option<&str>) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.write_state();
        match object_id {
            Some(id) => state.throttle.try_acquire_for(class, id, now),
            None => state.throttle.try_acquire(class, now),
        }
    }

    // ---- objects ----

    /// Place (or move) an object at `offset` from the current origin.
    ///
    /// Placement works in degraded mode, but the object is only persisted remotely
    /// once it has a real GPS location.
    pub fn place_object(
        &self,
        object_id: &str,
        offset: AnchorOffset,
        anchor_transform: Option<String>,
    ) -> GeoAnchorResult<TrackedObject> {
        if object_id.trim().is_empty() {
            return Err(GeoAnchorError::InvalidInput {
                field: "object_id",
                reason: "must not be empty".to_string(),
            });
        }
        let validator = self.positioning.validator();
        validator.validate_offset(&offset).map_err(|e| self.reject("placement", e))?;
        if let Some(encoded) = &anchor_transform {
            validator
                .validate_transform(encoded)
                .map_err(|e| self.reject("placement", e))?;
        }

        let now = self.clock.now_ms();
        let primary = offset.to_vector();
        let radius = self.config.stability.search_radius_m;
        let snapshot = AnchorSnapshot::capture(self.anchors.as_ref(), &primary, radius);

        let (object, record) = {
            let mut state = self.write_state();
            let origin = *state.resolver.origin()?;
            let location = if origin.is_degraded() {
                origin.origin
            } else {
                self.positioning
                    .calculate_real_world_position(&origin.origin, &offset, anchor_transform.as_deref())?
            };

            let previous_version = state
                .objects
                .get(object_id)
                .map(|o| o.server_version)
                .or_else(|| state.tombstones.get(object_id).copied())
                .unwrap_or(0);
            let generation = state.assign_generation();

            let mut object = TrackedObject::new(object_id, offset, origin.origin, location, now)
                .with_server_version(previous_version + 1);
            object.anchor_transform = anchor_transform;
            object.generation = generation;

            state.stability.create_network(object_id, primary, radius, &snapshot, now)?;
            state.conflicts.record_version(
                ObjectVersion::new(object.server_version, object.clone(), now, self.config.observer_id.clone()),
                now,
            )?;
            state.throttle.forget_key(object_id);
            state.tombstones.remove(object_id);
            state.objects.insert(object_id.to_string(), object.clone());

            let record = if origin.is_degraded() {
                None
            } else {
                Some(self.positioning.placement_record(&object)?)
            };
            (object, record)
        };

        debug!(object_id, generation = object.generation, anchors = snapshot.len(), "object placed");
        self.emit(SessionEvent::ObjectPlaced {
            object_id: object.id.clone(),
            generation: object.generation,
        });
        if let Some(record) = record {
            self.dispatch_sync(SyncJob::Persist(record));
        }
        Ok(object)
    }

    /// Remove a collected or deleted object. In-flight work for it is discarded.
    pub fn remove_object(&self, object_id: &str) -> GeoAnchorResult<TrackedObject> {
        let object = {
            let mut state = self.write_state();
            let object = state
                .objects
                .remove(object_id)
                .ok_or_else(|| GeoAnchorError::UnknownObject(object_id.to_string()))?;
            state.stability.remove_network(object_id);
            state.conflicts.forget(object_id);
            state.throttle.forget_key(object_id);
            state.tombstones.insert(object_id.to_string(), object.server_version);
            object
        };
        debug!(object_id, "object removed");
        self.emit(SessionEvent::ObjectRemoved {
            object_id: object_id.to_string(),
        });
        Ok(object)
    }

    pub fn object(&self, object_id: &str) -> Option<TrackedObject> {
        self.read_state().objects.get(object_id).cloned()
    }

    /// All tracked objects, ordered by id
    pub fn objects(&self) -> Vec<TrackedObject> {
        let mut objects: Vec<TrackedObject> = self.read_state().objects.values().cloned().collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    pub fn object_count(&self) -> usize {
        self.read_state().objects.len()
    }

    pub fn stability_score(&self, object_id: &str) -> Option<f64> {
        self.read_state().stability.stability_score(object_id)
    }

    /// Real-world location of a tracked object
    pub fn locate_object(&self, object_id: &str) -> GeoAnchorResult<GeoPoint> {
        let state = self.read_state();
        self.positioning.usable_origin(state.resolver.origin().ok())?;
        let object = state
            .objects
            .get(object_id)
            .ok_or_else(|| GeoAnchorError::UnknownObject(object_id.to_string()))?;
        self.positioning.locate_object(object)
    }

    /// Offset from the current origin to a GPS location, e.g. for objects loaded from the server
    pub fn offset_for(&self, target: &GeoPoint) -> GeoAnchorResult<AnchorOffset> {
        let state = self.read_state();
        let origin = self.positioning.usable_origin(state.resolver.origin().ok())?;
        self.positioning.calculate_offset(origin, target)
    }

    // ---- stabilization ----

    /// Plan corrections for every object outside the lock, then commit the ones whose
    /// object is unchanged. Returns the number of corrections applied.
    pub fn run_drift_corrections(&self) -> usize {
        let now = self.clock.now_ms();
        let (engine, targets) = {
            let state = self.read_state();
            let targets: Vec<(String, u64, AnchorOffset)> = state
                .objects
                .values()
                .map(|o| (o.id.clone(), o.generation, o.offset))
                .collect();
            (state.stability.clone(), targets)
        };

        let plans: Vec<(CorrectionPlan, u64, AnchorOffset)> = targets
            .into_iter()
            .filter_map(|(object_id, generation, offset)| {
                match engine.plan_correction(&object_id, &offset.to_vector(), self.anchors.as_ref(), now) {
                    Ok(Some(plan)) => Some((plan, generation, offset)),
                    Ok(None) => None,
                    Err(e) => {
                        trace!(object_id = %object_id, error = %e, "no correction planned");
                        None
                    }
                }
            })
            .collect();
        if plans.is_empty() {
            return 0;
        }

        let mut events = Vec::new();
        {
            let mut state = self.write_state();
            let SessionState {
                objects,
                stability,
                conflicts,
                ..
            } = &mut *state;
            for (plan, generation, planned_from) in plans {
                let Some(object) = objects.get_mut(&plan.object_id) else {
                    debug!(object_id = %plan.object_id, "object removed before correction landed");
                    continue;
                };
                if object.generation != generation || object.offset != planned_from {
                    debug!(object_id = %plan.object_id, "object changed before correction landed");
                    continue;
                }

                let mut position = object.offset.to_vector();
                if stability.commit_correction(&plan, &mut position, now) {
                    let before = object.clone();
                    object.offset = AnchorOffset::from_vector(&position);
                    // A later resolution in favour of this placement must keep the correction
                    conflicts.amend_state(&before, object);
                    events.push(SessionEvent::DriftCorrected {
                        object_id: plan.object_id.clone(),
                        delta: AnchorOffset::from_vector(&plan.delta),
                        offset: object.offset,
                    });
                }
            }
        }

        let applied = events.len();
        for event in events {
            self.emit(event);
        }
        applied
    }

    /// Refresh every stability network (throttled). Returns the number refreshed.
    pub fn update_network_stability(&self) -> usize {
        let now = self.clock.now_ms();
        let (engine, generations) = {
            let state = self.read_state();
            let generations: HashMap<String, u64> = state
                .objects
                .iter()
                .map(|(id, o)| (id.clone(), o.generation))
                .collect();
            (state.stability.clone(), generations)
        };

        let Some(refreshed) = engine.refresh_networks(self.anchors.as_ref(), now) else {
            return 0;
        };

        let mut state = self.write_state();
        let SessionState { objects, stability, .. } = &mut *state;
        stability.install_networks(refreshed, now, |object_id| {
            objects.get(object_id).map(|o| o.generation) == generations.get(object_id).copied()
        })
    }

    // ---- multi-observer reconciliation ----

    /// Ingest a version of an object from another observer and reconcile
    pub fn record_remote_version(&self, version: ObjectVersion) -> GeoAnchorResult<RemoteUpdate> {
        let validator = self.positioning.validator();
        validator
            .validate_offset(&version.state.offset)
            .and_then(|_| validator.validate_geo_point(&version.state.last_known_gps))
            .map_err(|e| self.reject("remote_version", e))?;

        let now = self.clock.now_ms();
        let object_id = version.state.id.clone();

        let (update, rebuild) = {
            let mut state = self.write_state();
            if let Some(&removed_at) = state.tombstones.get(&object_id) {
                if version.version <= removed_at {
                    debug!(object_id = %object_id, version = version.version, "version for removed object ignored");
                    return Ok(RemoteUpdate::Stale);
                }
            }

            state.conflicts.record_version(version.clone(), now)?;
            let resolution = state.conflicts.resolve(&object_id, now);

            // A resolution winner is applied whatever its version number; an uncontested
            // update must not be older than the canonical state
            let SessionState { objects, conflicts, .. } = &mut *state;
            let applied = match &resolution {
                Some(resolution) => conflicts.apply_resolved_version(objects, &resolution.winner),
                None => conflicts.apply_version(objects, &version),
            };
            let changed = match applied {
                Ok(changed) => changed,
                Err(GeoAnchorError::StaleConflict { .. }) => return Ok(RemoteUpdate::Stale),
                Err(e) => return Err(e),
            };

            let mut rebuild = None;
            if changed {
                let generation = state.assign_generation();
                if let Some(object) = state.objects.get_mut(&object_id) {
                    object.generation = generation;
                    rebuild = Some((generation, object.offset));
                }
                state.tombstones.remove(&object_id);
            }

            let update = match resolution {
                Some(resolution) => RemoteUpdate::Resolved { resolution, changed },
                None if changed => RemoteUpdate::Applied,
                None => RemoteUpdate::Unchanged,
            };
            (update, rebuild)
        };

        // The canonical position moved, so the old reference baseline no longer applies
        if let Some((generation, offset)) = rebuild {
            self.rebuild_network(&object_id, generation, offset);
        }

        if let RemoteUpdate::Resolved { resolution, changed } = &update {
            self.emit(SessionEvent::ConflictResolved {
                object_id: object_id.clone(),
                resolution: resolution.clone(),
                changed: *changed,
            });
            // The sender already has its own version; others only need to hear about a different winner
            if resolution.winner != version {
                self.dispatch_sync(SyncJob::Broadcast(resolution.winner.clone()));
            }
        }
        Ok(update)
    }

    fn rebuild_network(&self, object_id: &str, generation: u64, offset: AnchorOffset) {
        let primary = offset.to_vector();
        let radius = self.config.stability.search_radius_m;
        let snapshot = AnchorSnapshot::capture(self.anchors.as_ref(), &primary, radius);
        let now = self.clock.now_ms();

        let mut state = self.write_state();
        let current = state.objects.get(object_id).map(|o| o.generation);
        if current != Some(generation) {
            debug!(object_id, "object changed before network rebuild");
            return;
        }
        if let Err(e) = state.stability.create_network(object_id, primary, radius, &snapshot, now) {
            warn!(object_id, error = %e, "stability network rebuild failed");
        }
    }

    // ---- background work ----

    fn dispatch_sync(&self, job: SyncJob) {
        let Some(sync) = &self.sync else {
            return;
        };
        let callbacks = self.callbacks.clone();
        let spawned = spawn_job(sync.clone(), self.config.retry.clone(), job, move |job, result| {
            if let Err(e) = result {
                emit_to(
                    &callbacks,
                    SessionEvent::SyncFailed {
                        object_id: job.object_id().to_string(),
                        error: e.clone(),
                    },
                );
            }
        });

        match spawned {
            Ok(handle) => {
                let mut pending = self.pending_sync.lock().unwrap_or_else(PoisonError::into_inner);
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => warn!(error = %e, "sync not dispatched"),
        }
    }

    /// Wait for outstanding persistence and broadcast jobs
    pub fn wait_for_sync(&self) -> Vec<GeoAnchorResult<()>> {
        let handles: Vec<_> = self
            .pending_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(GeoAnchorError::TransportFailure {
                        attempts: 0,
                        reason: "sync thread panicked".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Start the periodic drift-correction and stability-refresh threads
    pub fn spawn_maintenance(&self) -> GeoAnchorResult<MaintenanceTickers> {
        let throttle = &self.config.throttle;

        let session = self.clone();
        let drift = Ticker::spawn(
            "drift-correction",
            Duration::from_millis(throttle.drift_correction_interval_ms),
            move || {
                session.tick_origin();
                session.run_drift_corrections();
            },
        )?;

        let session = self.clone();
        let stability = Ticker::spawn(
            "stability-update",
            Duration::from_millis(throttle.stability_update_interval_ms),
            move || {
                session.update_network_stability();
            },
        )?;

        Ok(MaintenanceTickers {
            tickers: vec![drift, stability],
        })
    }
}
