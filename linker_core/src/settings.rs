//! Pass settings and linker configuration.
//!
//! Settings can be built in code (every struct implements `Default`) or read
//! from a JSON object, e.g. a settings file. Reading checks that every
//! required key is present with the right JSON type; `validate` checks
//! ranges. Both report the offending key.

use crate::{
    cost::CostFunction,
    error::{LinkError, Result},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Alternative-cost factor applied to the frame-to-frame distance threshold.
pub const FTF_ALTERNATIVE_COST_FACTOR: f64 = 1.05;

/// Default bound on how long a pass waits for its worker tasks.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub const KEY_LINKING_MAX_DISTANCE: &str = "linking_max_distance";
pub const KEY_ALLOW_GAP_CLOSING: &str = "allow_gap_closing";
pub const KEY_GAP_CLOSING_MAX_DISTANCE: &str = "gap_closing_max_distance";
pub const KEY_MAX_FRAME_GAP: &str = "max_frame_gap";
pub const KEY_ALLOW_MERGING: &str = "allow_merging";
pub const KEY_MERGING_MAX_DISTANCE: &str = "merging_max_distance";
pub const KEY_ALLOW_SPLITTING: &str = "allow_splitting";
pub const KEY_SPLITTING_MAX_DISTANCE: &str = "splitting_max_distance";
pub const KEY_ALTERNATIVE_COST_FACTOR: &str = "alternative_cost_factor";
pub const KEY_CUTOFF_PERCENTILE: &str = "cutoff_percentile";

// ---------------------------------------------------------------------------
// Frame-to-frame
// ---------------------------------------------------------------------------

/// Settings of the frame-to-frame pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FtfSettings {
    /// Maximum linking distance; pairs costing more than its square are never linked
    pub max_distance: f64,
}

impl Default for FtfSettings {
    fn default() -> Self {
        Self { max_distance: 15.0 }
    }
}

impl FtfSettings {
    pub fn new(max_distance: f64) -> Self {
        Self { max_distance }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let reader = SettingsReader::new(value)?;
        let settings = Self {
            max_distance: reader.f64(KEY_LINKING_MAX_DISTANCE)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        check_distance(KEY_LINKING_MAX_DISTANCE, self.max_distance)
    }

    /// Cost given to leaving a spot unlinked: `(1.05 · max_distance)²`.
    pub fn alternative_cost(&self) -> f64 {
        let d = FTF_ALTERNATIVE_COST_FACTOR * self.max_distance;
        d * d
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Settings of the gap-closing / merging / splitting pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentSettings {
    pub allow_gap_closing: bool,
    pub gap_closing_max_distance: f64,
    /// Number of missing frames a gap-closing link may bridge
    pub max_frame_gap: u32,
    pub allow_merging: bool,
    pub merging_max_distance: f64,
    pub allow_splitting: bool,
    pub splitting_max_distance: f64,
    /// Scales the cutoff cost into the alternative (no-link) cost
    pub alternative_cost_factor: f64,
    /// Percentile of the candidate costs used as cutoff, in (0, 1]
    pub cutoff_percentile: f64,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            allow_gap_closing: true,
            gap_closing_max_distance: 15.0,
            max_frame_gap: 1,
            allow_merging: false,
            merging_max_distance: 15.0,
            allow_splitting: false,
            splitting_max_distance: 15.0,
            alternative_cost_factor: 1.05,
            cutoff_percentile: 0.9,
        }
    }
}

impl SegmentSettings {
    pub fn from_json(value: &Value) -> Result<Self> {
        let reader = SettingsReader::new(value)?;
        let settings = Self {
            allow_gap_closing: reader.bool(KEY_ALLOW_GAP_CLOSING)?,
            gap_closing_max_distance: reader.f64(KEY_GAP_CLOSING_MAX_DISTANCE)?,
            max_frame_gap: reader.u32(KEY_MAX_FRAME_GAP)?,
            allow_merging: reader.bool(KEY_ALLOW_MERGING)?,
            merging_max_distance: reader.f64(KEY_MERGING_MAX_DISTANCE)?,
            allow_splitting: reader.bool(KEY_ALLOW_SPLITTING)?,
            splitting_max_distance: reader.f64(KEY_SPLITTING_MAX_DISTANCE)?,
            alternative_cost_factor: reader.f64(KEY_ALTERNATIVE_COST_FACTOR)?,
            cutoff_percentile: reader.f64(KEY_CUTOFF_PERCENTILE)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        check_distance(KEY_GAP_CLOSING_MAX_DISTANCE, self.gap_closing_max_distance)?;
        check_distance(KEY_MERGING_MAX_DISTANCE, self.merging_max_distance)?;
        check_distance(KEY_SPLITTING_MAX_DISTANCE, self.splitting_max_distance)?;
        if !(self.alternative_cost_factor.is_finite() && self.alternative_cost_factor > 0.0) {
            return Err(LinkError::setting(
                KEY_ALTERNATIVE_COST_FACTOR,
                format!("must be a positive number, got {}", self.alternative_cost_factor),
            ));
        }
        if !(self.cutoff_percentile > 0.0 && self.cutoff_percentile <= 1.0) {
            return Err(LinkError::setting(
                KEY_CUTOFF_PERCENTILE,
                format!("must lie in (0, 1], got {}", self.cutoff_percentile),
            ));
        }
        Ok(())
    }

    /// True if at least one link type is enabled.
    pub fn any_enabled(&self) -> bool {
        self.allow_gap_closing || self.allow_merging || self.allow_splitting
    }

    /// Largest frame offset a gap-closing link may span.
    pub fn max_frame_offset(&self) -> u32 {
        self.max_frame_gap.saturating_add(1)
    }

    /// Settings for local relinking: only splitting/merging, same distance for both.
    pub fn local(max_distance: f64, allow_splitting: bool, allow_merging: bool) -> Self {
        Self {
            allow_gap_closing: false,
            gap_closing_max_distance: max_distance,
            max_frame_gap: 0,
            allow_merging,
            merging_max_distance: max_distance,
            allow_splitting,
            splitting_max_distance: max_distance,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Linker configuration
// ---------------------------------------------------------------------------

/// Configuration of a [`crate::linker::Linker`].
#[derive(Clone, Debug)]
pub struct LinkerConfig {
    /// Cost strategy shared by every pass
    pub cost: CostFunction,
    /// Worker threads for frame-pair tasks (0 = hardware parallelism)
    pub ftf_threads: usize,
    /// Worker threads for segment candidate generation (0 = hardware parallelism)
    pub segment_threads: usize,
    /// Bound on how long a pass waits for its tasks
    pub task_timeout: Duration,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            cost: CostFunction::default(),
            ftf_threads: 0,
            segment_threads: 0,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON reading helpers
// ---------------------------------------------------------------------------

fn check_distance(key: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LinkError::setting(
            key,
            format!("must be a finite non-negative distance, got {value}"),
        ))
    }
}

/// Typed access to the keys of a settings object.
struct SettingsReader<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> SettingsReader<'a> {
    fn new(value: &'a Value) -> Result<Self> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or_else(|| LinkError::setting("<root>", "settings must be a JSON object"))
    }

    fn get(&self, key: &str) -> Result<&'a Value> {
        self.map
            .get(key)
            .ok_or_else(|| LinkError::setting(key, "missing required key"))
    }

    fn bool(&self, key: &str) -> Result<bool> {
        self.get(key)?
            .as_bool()
            .ok_or_else(|| LinkError::setting(key, "expected a boolean"))
    }

    fn f64(&self, key: &str) -> Result<f64> {
        self.get(key)?
            .as_f64()
            .ok_or_else(|| LinkError::setting(key, "expected a number"))
    }

    fn u32(&self, key: &str) -> Result<u32> {
        self.get(key)?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| LinkError::setting(key, "expected a non-negative integer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn segment_json() -> Value {
        json!({
            "allow_gap_closing": true,
            "gap_closing_max_distance": 10.0,
            "max_frame_gap": 2,
            "allow_merging": false,
            "merging_max_distance": 5,
            "allow_splitting": true,
            "splitting_max_distance": 5.0,
            "alternative_cost_factor": 1.05,
            "cutoff_percentile": 0.9
        })
    }

    #[test]
    fn segment_settings_from_json() {
        let s = SegmentSettings::from_json(&segment_json()).unwrap();
        assert!(s.allow_gap_closing && s.allow_splitting && !s.allow_merging);
        assert_eq!(s.max_frame_gap, 2);
        assert_eq!(s.max_frame_offset(), 3);
        assert_abs_diff_eq!(s.merging_max_distance, 5.0);
    }

    #[test]
    fn missing_key_is_named() {
        let mut value = segment_json();
        value.as_object_mut().unwrap().remove("max_frame_gap");
        let err = SegmentSettings::from_json(&value).unwrap_err();
        match err {
            LinkError::InvalidSetting { key, .. } => assert_eq!(key, "max_frame_gap"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn mistyped_key_is_named() {
        let mut value = segment_json();
        value["allow_merging"] = json!("yes");
        let err = SegmentSettings::from_json(&value).unwrap_err();
        assert!(err.to_string().contains("allow_merging"));
    }

    #[test]
    fn out_of_range_values_rejected() {
        let mut value = segment_json();
        value["cutoff_percentile"] = json!(1.5);
        assert!(SegmentSettings::from_json(&value)
            .unwrap_err()
            .to_string()
            .contains("cutoff_percentile"));

        let err = FtfSettings::new(-1.0).validate().unwrap_err();
        assert!(err.to_string().contains(KEY_LINKING_MAX_DISTANCE));
    }

    #[test]
    fn ftf_alternative_cost() {
        let s = FtfSettings::from_json(&json!({ "linking_max_distance": 10.0 })).unwrap();
        assert_abs_diff_eq!(s.alternative_cost(), 110.25, epsilon = 1e-9);
    }

    #[test]
    fn non_object_root_rejected() {
        assert!(FtfSettings::from_json(&json!([1, 2])).is_err());
    }
}
