//! Saved snapshots of sounds and timeline arrangements, and the persisted
//! document they travel in.
//!
//! Loading a preset never reuses stored ids: every sound, track and clip it
//! instantiates gets a freshly minted one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::sound::SoundParameters;
use crate::timeline::{TimelineState, TimelineTrack, mint_id};

// ── Sound presets ───────────────────────────────────────────

/// A named snapshot of one sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    /// Caller-supplied timestamp, milliseconds since the epoch.
    pub saved_at: f64,
    pub sound: SoundParameters,
}

impl Default for Preset {
    fn default() -> Self {
        Preset {
            id: String::new(),
            name: String::new(),
            saved_at: 0.0,
            sound: SoundParameters::default(),
        }
    }
}

impl Preset {
    pub fn capture(name: impl Into<String>, sound: &SoundParameters, saved_at: f64) -> Self {
        Preset {
            id: mint_id(),
            name: name.into(),
            saved_at,
            sound: sound.clone(),
        }
    }

    /// A copy of the stored sound under a fresh id.
    pub fn instantiate(&self) -> SoundParameters {
        SoundParameters {
            id: mint_id(),
            ..self.sound.clone()
        }
    }
}

// ── Timeline presets ────────────────────────────────────────

/// A named snapshot of a track/clip arrangement and the sounds it uses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelinePreset {
    pub id: String,
    pub name: String,
    pub saved_at: f64,
    pub duration: f64,
    pub tracks: Vec<TimelineTrack>,
    pub sounds: Vec<SoundParameters>,
}

impl TimelinePreset {
    /// Snapshot `timeline`, keeping only the sounds its tracks reference.
    pub fn capture(
        name: impl Into<String>,
        timeline: &TimelineState,
        sounds: &[SoundParameters],
        saved_at: f64,
    ) -> Self {
        let used: Vec<SoundParameters> = sounds
            .iter()
            .filter(|s| timeline.tracks.iter().any(|t| t.sound_id == s.id))
            .cloned()
            .collect();
        TimelinePreset {
            id: mint_id(),
            name: name.into(),
            saved_at,
            duration: timeline.duration,
            tracks: timeline.tracks.clone(),
            sounds: used,
        }
    }

    /// Fresh copies of the stored tracks and sounds.
    ///
    /// Track `soundId`s are remapped onto the new sound ids; references to
    /// sounds the preset does not carry are left as they are.
    pub fn instantiate(&self) -> (Vec<TimelineTrack>, Vec<SoundParameters>) {
        let mut remap: HashMap<&str, String> = HashMap::new();
        let sounds = self
            .sounds
            .iter()
            .map(|s| {
                let id = mint_id();
                remap.insert(s.id.as_str(), id.clone());
                SoundParameters {
                    id,
                    ..s.clone()
                }
            })
            .collect();

        let tracks = self
            .tracks
            .iter()
            .map(|t| {
                let mut track = t.clone();
                track.id = mint_id();
                if let Some(id) = remap.get(t.sound_id.as_str()) {
                    track.sound_id = id.clone();
                }
                for clip in &mut track.clips {
                    clip.id = mint_id();
                }
                track
            })
            .collect();

        (tracks, sounds)
    }
}

// ── Persisted document ──────────────────────────────────────

/// The document an external store hydrates the engine from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub sounds: Vec<SoundParameters>,
    pub presets: Vec<Preset>,
    pub timeline_presets: Vec<TimelinePreset>,
}

impl PersistedState {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::SoundKind;
    use crate::timeline::TimelineClip;

    #[test]
    fn sound_preset_instantiates_under_a_new_id() {
        let mut sound = SoundParameters::new(SoundKind::Pad);
        sound.volume = 0.42;
        let preset = Preset::capture("Warm pad", &sound, 1_700_000_000_000.0);
        assert_ne!(preset.id, sound.id);

        let a = preset.instantiate();
        let b = preset.instantiate();
        assert_ne!(a.id, sound.id);
        assert_ne!(a.id, b.id);
        assert_eq!(a.volume, 0.42);
        assert_eq!(a.kind, SoundKind::Pad);
    }

    #[test]
    fn timeline_preset_remaps_sound_references() {
        let kick = SoundParameters::new(SoundKind::BassKick);
        let unused = SoundParameters::new(SoundKind::Lead);
        let mut track = TimelineTrack::new(&kick.id, "Drums");
        track.clips.push(TimelineClip::new(0.0, 0.5).unwrap());
        track.clips.push(TimelineClip::new(1.0, 0.5).unwrap());
        let orphan = TimelineTrack::new("gone", "Orphan");
        let timeline = TimelineState {
            tracks: vec![track.clone(), orphan],
            ..Default::default()
        };

        let preset = TimelinePreset::capture("Beat", &timeline, &[kick.clone(), unused], 0.0);
        assert_eq!(preset.sounds.len(), 1, "only referenced sounds are kept");

        let (tracks, sounds) = preset.instantiate();
        assert_eq!(sounds.len(), 1);
        assert_ne!(sounds[0].id, kick.id);
        assert_eq!(tracks[0].sound_id, sounds[0].id);
        assert_ne!(tracks[0].id, track.id);
        assert_eq!(tracks[0].clips.len(), 2);
        for (fresh, stored) in tracks[0].clips.iter().zip(&track.clips) {
            assert_ne!(fresh.id, stored.id);
            assert_eq!(fresh.start_time, stored.start_time);
        }
        assert_eq!(tracks[1].sound_id, "gone");
    }

    #[test]
    fn persisted_state_hydrates_partial_documents() {
        let state =
            PersistedState::from_json(r#"{"sounds":[{"id":"s1","type":"Snare"}]}"#).unwrap();
        assert_eq!(state.sounds.len(), 1);
        assert_eq!(state.sounds[0].kind, SoundKind::Snare);
        assert!(state.presets.is_empty());
        assert!(state.timeline_presets.is_empty());

        let json = state.to_json().unwrap();
        assert!(json.contains("\"timelinePresets\""));
        assert_eq!(PersistedState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(matches!(
            PersistedState::from_json("{\"sounds\": 3}"),
            Err(EngineError::Json(_))
        ));
    }
}
