pub mod config;
pub mod context;
pub mod dsp;
pub mod error;
pub mod preset;
pub mod render;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod sound;
pub mod synth;
pub mod timeline;
pub mod voice;
pub mod wav;

pub use crate::config::EngineConfig;
pub use crate::error::EngineError;
pub use crate::session::Studio;
pub use crate::sound::{SoundKind, SoundParameters};

use crate::render::{RenderOptions, render_sound, render_timeline};
use crate::timeline::TimelineState;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the soundforge-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Render one sound, given as a `SoundParameters` JSON record, to WAV bytes.
pub fn render_sound_json(json: &str) -> Result<Vec<u8>, EngineError> {
    let sound: SoundParameters = serde_json::from_str(json)?;
    let config = EngineConfig::default();
    let buffer = render_sound(&sound, true, &config)?;
    wav::encode_wav(&buffer.channels(), buffer.sample_rate)
}

/// Render a whole project (timeline JSON + sounds JSON array) to WAV bytes.
pub fn render_project_json(timeline_json: &str, sounds_json: &str) -> Result<Vec<u8>, EngineError> {
    let timeline: TimelineState = serde_json::from_str(timeline_json)?;
    let sounds: Vec<SoundParameters> = serde_json::from_str(sounds_json)?;
    let config = EngineConfig::default();
    let options = RenderOptions::default();
    let buffer = render_timeline(&timeline, &sounds, options, &config, &mut |_| {})?;
    wav::encode_wav(&buffer.channels(), buffer.sample_rate)
}

/// WASM-exposed: render a single sound to a WAV byte array.
#[wasm_bindgen]
pub fn render_sound_wav(json: &str) -> Result<Vec<u8>, JsValue> {
    render_sound_json(json).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render the timeline to a WAV byte array.
#[wasm_bindgen]
pub fn render_project_wav(timeline_json: &str, sounds_json: &str) -> Result<Vec<u8>, JsValue> {
    render_project_json(timeline_json, sounds_json).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: a fresh sound record with the defaults for `kind`
/// (e.g. "Bass Kick", "Pad"). Unknown names yield a custom sound.
#[wasm_bindgen]
pub fn default_sound(kind: &str) -> Result<JsValue, JsValue> {
    let sound = SoundParameters::new(SoundKind::parse(kind));
    serde_wasm_bindgen::to_value(&sound).map_err(|e| JsValue::from_str(&format!("{e}")))
}
