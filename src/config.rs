//! Engine configuration.
//!
//! Every field has a default so a partial JSON document (or none at all)
//! yields a working engine.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Peak normalization policy applied to offline renders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalizeConfig {
    /// Peak the buffer is scaled to when normalization applies.
    pub target_amplitude: f64,
    /// Peaks above this are scaled down.
    pub clip_threshold: f64,
    /// Non-silent peaks below this are boosted.
    pub audibility_floor: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            target_amplitude: 0.8,
            clip_threshold: 1.05,
            audibility_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Tolerance after a clip's start during which it still triggers.
    pub trigger_window: f64,
    /// Added to every voice's lifetime before it is stopped.
    pub safety_buffer: f64,
    /// Extra slack on the fallback teardown timer.
    pub fallback_slack: f64,
    pub master_gain: f64,
    /// tanh soft clip on the live master bus.
    pub soft_clip: bool,
    pub tail_min: f64,
    pub tail_max: f64,
    pub normalize: NormalizeConfig,
    pub noise_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            trigger_window: 0.2,
            safety_buffer: 0.1,
            fallback_slack: 0.1,
            master_gain: 1.0,
            soft_clip: true,
            tail_min: 1.0,
            tail_max: 10.0,
            normalize: NormalizeConfig::default(),
            noise_seed: 0x5eed_f0_49e,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}
