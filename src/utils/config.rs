use crate::algorithms::conflict::ConflictConfig;
use crate::algorithms::stability::StabilityConfig;
use crate::api::transport::RetryPolicy;
use crate::processing::origin::OriginConfig;
use crate::processing::throttle::ThrottleConfig;
use crate::utils::logging::LogConfig;
use crate::validation::data::ValidationConfig;
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete tuning for one anchor session.
///
/// Missing sections in a config file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Identifies this device in version histories and broadcasts
    pub observer_id: String,
    pub origin: OriginConfig,
    pub stability: StabilityConfig,
    pub conflict: ConflictConfig,
    /// Per-operation-class intervals; the only place stability intervals are configured
    pub throttle: ThrottleConfig,
    pub validation: ValidationConfig,
    pub retry: RetryPolicy,
    pub logging: LogConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            observer_id: "local".to_string(),
            origin: OriginConfig::default(),
            stability: StabilityConfig::default(),
            conflict: ConflictConfig::default(),
            throttle: ThrottleConfig::default(),
            validation: ValidationConfig::default(),
            retry: RetryPolicy::default(),
            logging: LogConfig::default(),
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> GeoAnchorError {
    GeoAnchorError::Configuration {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn require_positive(parameter: &str, value: f64) -> GeoAnchorResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be a positive finite number"))
    }
}

fn require_unit_interval(parameter: &str, value: f64) -> GeoAnchorResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be between 0 and 1"))
    }
}

fn require_nonzero_ms(parameter: &str, value: u64) -> GeoAnchorResult<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "interval must be at least 1 ms"))
    }
}

impl CoreConfig {
    pub fn from_json(json: &str) -> GeoAnchorResult<Self> {
        let config: CoreConfig =
            serde_json::from_str(json).map_err(|e| invalid("config", "<json>", &e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> GeoAnchorResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| invalid("config", "<json>", &e.to_string()))
    }

    /// Stability tuning with its intervals taken from the throttle section
    pub fn effective_stability(&self) -> StabilityConfig {
        StabilityConfig {
            correction_interval_ms: self.throttle.drift_correction_interval_ms,
            stability_update_interval_ms: self.throttle.stability_update_interval_ms,
            ..self.stability.clone()
        }
    }

    /// Check every section, reporting the first offending parameter
    pub fn validate(&self) -> GeoAnchorResult<()> {
        if self.observer_id.trim().is_empty() {
            return Err(invalid("observer_id", "", "must not be empty"));
        }

        let origin = &self.origin;
        require_positive("origin.accurate_threshold_m", origin.accurate_threshold_m)?;
        require_positive("origin.exit_degraded_threshold_m", origin.exit_degraded_threshold_m)?;
        if origin.exit_degraded_threshold_m > origin.accurate_threshold_m {
            return Err(invalid(
                "origin.exit_degraded_threshold_m",
                origin.exit_degraded_threshold_m,
                "must not exceed accurate_threshold_m or degraded mode would flap",
            ));
        }
        require_nonzero_ms("origin.no_gps_timeout_ms", origin.no_gps_timeout_ms)?;
        if origin.inaccurate_gps_timeout_ms < origin.no_gps_timeout_ms {
            return Err(invalid(
                "origin.inaccurate_gps_timeout_ms",
                origin.inaccurate_gps_timeout_ms,
                "must be at least no_gps_timeout_ms",
            ));
        }
        if !origin.eye_height_m.is_finite() || origin.eye_height_m < 0.0 {
            return Err(invalid("origin.eye_height_m", origin.eye_height_m, "must be finite and non-negative"));
        }

        let stability = &self.stability;
        require_positive("stability.search_radius_m", stability.search_radius_m)?;
        if stability.min_reference_anchors < 2 {
            return Err(invalid(
                "stability.min_reference_anchors",
                stability.min_reference_anchors,
                "at least 2 references are needed to tell drift direction",
            ));
        }
        if stability.max_reference_anchors < stability.min_reference_anchors {
            return Err(invalid(
                "stability.max_reference_anchors",
                stability.max_reference_anchors,
                "must be at least min_reference_anchors",
            ));
        }
        require_unit_interval("stability.insufficient_reference_score", stability.insufficient_reference_score)?;
        require_unit_interval("stability.primary_score_share", stability.primary_score_share)?;
        require_positive("stability.drift_threshold_m", stability.drift_threshold_m)?;
        require_unit_interval("stability.min_correction_confidence", stability.min_correction_confidence)?;
        require_positive("stability.max_correction_m", stability.max_correction_m)?;
        require_positive("stability.correction_damping", stability.correction_damping)?;
        if stability.correction_damping > 1.0 {
            return Err(invalid(
                "stability.correction_damping",
                stability.correction_damping,
                "must not exceed 1.0",
            ));
        }

        let conflict = &self.conflict;
        if conflict.max_history == 0 {
            return Err(invalid("conflict.max_history", 0, "must keep at least one version"));
        }
        require_positive("conflict.disagreement_threshold_m", conflict.disagreement_threshold_m)?;
        if conflict.retention_ms < conflict.conflict_window_ms {
            return Err(invalid(
                "conflict.retention_ms",
                conflict.retention_ms,
                "must cover the conflict window",
            ));
        }

        let throttle = &self.throttle;
        require_nonzero_ms("throttle.drift_correction_interval_ms", throttle.drift_correction_interval_ms)?;
        require_nonzero_ms("throttle.stability_update_interval_ms", throttle.stability_update_interval_ms)?;
        require_nonzero_ms("throttle.occlusion_check_interval_ms", throttle.occlusion_check_interval_ms)?;
        require_nonzero_ms("throttle.viewport_check_interval_ms", throttle.viewport_check_interval_ms)?;
        require_nonzero_ms("throttle.placement_check_interval_ms", throttle.placement_check_interval_ms)?;

        require_positive("validation.max_offset_magnitude_m", self.validation.max_offset_magnitude_m)?;

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", 0, "must allow at least one attempt"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
                "must be at least 1.0",
            ));
        }

        Ok(())
    }
}

/// Owns the active configuration and its backing file
#[derive(Debug, Clone, Default)]
pub struct ConfigurationManager {
    config: CoreConfig,
    config_file_path: Option<PathBuf>,
    is_modified: bool,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> GeoAnchorResult<Self> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Replace the configuration. Invalid configurations are rejected and the current one kept.
    pub fn update(&mut self, config: CoreConfig) -> GeoAnchorResult<()> {
        config.validate()?;
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> GeoAnchorResult<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| invalid("config_file", path.display(), &format!("read failed: {}", e)))?;
        let config = CoreConfig::from_json(&content)?;

        info!(path = %path.display(), observer = %config.observer_id, "configuration loaded");
        self.config = config;
        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> GeoAnchorResult<()> {
        let path = path.as_ref();
        let content = self.config.to_json_pretty()?;
        fs::write(path, content)
            .map_err(|e| invalid("config_file", path.display(), &format!("write failed: {}", e)))?;

        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    /// Save to the file the configuration was last loaded from or saved to
    pub fn save(&mut self) -> GeoAnchorResult<()> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(invalid("config_file", "", "no file path set for saving configuration")),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.is_modified
    }
}
